//! Configuration for external tools and timeouts

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for the vendor lookup request in seconds
pub const MAX_VENDOR_API_TIMEOUT: u64 = 3;

/// Ports probed by a LAN scan when the caller gives none
pub const DEFAULT_LAN_PORTS: &[&str] = &[
    "21", "22", "23", "25", "53", "80", "110", "143", "443", "445", "3306", "3389",
];

/// Paths and limits for the external probing tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Path (or bare name searched on PATH) of the nmap binary
    pub nmap_path: PathBuf,

    pub nbtscan_path: PathBuf,

    pub avahi_resolve_path: PathBuf,

    pub arp_path: PathBuf,

    pub upnpc_path: PathBuf,

    /// Socket listing tool used to find established external connections
    pub ss_path: PathBuf,

    /// Fallback when `ss` is not installed
    pub netstat_path: PathBuf,

    pub ufw_path: PathBuf,

    /// GeoLite2 country database for the external communication check
    pub geoip_db: PathBuf,

    /// Local OUI database, one `PREFIX Vendor` entry per line
    pub oui_db: PathBuf,

    /// Base URL of the MAC vendor lookup service
    pub vendor_api_url: String,

    /// Timeout for the vendor lookup request in seconds
    pub vendor_api_timeout: u64,

    /// Overall host discovery timeout in seconds
    pub discovery_timeout: u64,

    /// Hard timeout for an unsupervised probe in seconds
    pub probe_timeout: u64,

    /// Timeout for each name resolution step in seconds
    pub name_lookup_timeout: u64,

    /// Timeout for each LAN security check in seconds
    pub lan_check_timeout: u64,

    /// Ports used by a LAN scan when none are given
    pub default_ports: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            nmap_path: PathBuf::from("nmap"),
            nbtscan_path: PathBuf::from("nbtscan"),
            avahi_resolve_path: PathBuf::from("avahi-resolve"),
            arp_path: PathBuf::from("arp"),
            upnpc_path: PathBuf::from("upnpc"),
            ss_path: PathBuf::from("ss"),
            netstat_path: PathBuf::from("netstat"),
            ufw_path: PathBuf::from("ufw"),
            geoip_db: PathBuf::from("GeoLite2-Country.mmdb"),
            oui_db: PathBuf::from("oui.txt"),
            vendor_api_url: "https://api.macvendors.com".to_string(),
            vendor_api_timeout: 3,
            discovery_timeout: 60,
            probe_timeout: 600, // 10 minutes
            name_lookup_timeout: 5,
            lan_check_timeout: 120,
            default_ports: DEFAULT_LAN_PORTS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl ToolConfig {
    /// Use a different nmap binary
    pub fn with_nmap_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.nmap_path = path.into();
        self
    }

    pub fn with_probe_timeout(mut self, secs: u64) -> Self {
        self.probe_timeout = secs;
        self
    }

    pub fn with_discovery_timeout(mut self, secs: u64) -> Self {
        self.discovery_timeout = secs;
        self
    }

    pub fn vendor_api_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.vendor_api_timeout)
    }

    pub fn discovery_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout)
    }

    pub fn probe_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn name_lookup_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.name_lookup_timeout)
    }

    pub fn lan_check_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.lan_check_timeout)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::ScanError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: ToolConfig = toml::from_str(&content)
            .map_err(|e| crate::ScanError::ConfigError(format!("Failed to parse TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `~/.lanscore.toml`, or defaults when absent
    pub fn load_default_config() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let path = home_dir.join(".lanscore.toml");

        if path.exists() {
            match Self::from_toml_file(&path) {
                Ok(config) => {
                    log::info!("Loaded tool config from {}", path.display());
                    return config;
                }
                Err(e) => log::warn!("Ignoring {}: {}", path.display(), e),
            }
        }

        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        let paths = [
            ("nmap_path", &self.nmap_path),
            ("nbtscan_path", &self.nbtscan_path),
            ("avahi_resolve_path", &self.avahi_resolve_path),
            ("arp_path", &self.arp_path),
            ("upnpc_path", &self.upnpc_path),
            ("ss_path", &self.ss_path),
            ("netstat_path", &self.netstat_path),
            ("ufw_path", &self.ufw_path),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(crate::ScanError::ConfigError(format!("{} cannot be empty", name)));
            }
        }

        let timeouts = [
            ("vendor_api_timeout", self.vendor_api_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("probe_timeout", self.probe_timeout),
            ("name_lookup_timeout", self.name_lookup_timeout),
            ("lan_check_timeout", self.lan_check_timeout),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                return Err(crate::ScanError::ConfigError(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.vendor_api_timeout > MAX_VENDOR_API_TIMEOUT {
            return Err(crate::ScanError::ConfigError(format!(
                "vendor_api_timeout must be at most {}s",
                MAX_VENDOR_API_TIMEOUT
            )));
        }

        Ok(())
    }
}
