//! Scoring configuration and its process-wide store
//!
//! A [`ScoringConfig`] is an immutable value. [`ConfigStore`] holds the
//! current one behind an `Arc` and swaps the pointer on reload, so a scoring
//! call that took a snapshot keeps seeing that config in full.

use crate::{Result, ScanError};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Per-severity score deductions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            high: 4.5,
            medium: 1.7,
            low: 0.5,
        }
    }
}

impl Weights {
    /// Non-finite weights deduct nothing
    pub fn sanitized(&self) -> Self {
        Self {
            high: finite_or_zero(self.high),
            medium: finite_or_zero(self.medium),
            low: finite_or_zero(self.low),
        }
    }
}

pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Heuristic scoring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Ports that count as a high risk when found open
    pub danger_ports: BTreeSet<String>,

    pub weights: Weights,

    /// Added to the score when a UTM appliance is active
    pub utm_bonus: f64,

    /// Countermeasure text per risk kind (snake_case kind name)
    pub countermeasures: BTreeMap<String, String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            danger_ports: ["3389", "445", "23"].iter().map(|p| p.to_string()).collect(),
            weights: Weights::default(),
            utm_bonus: 2.0,
            countermeasures: default_countermeasures(),
        }
    }
}

fn default_countermeasures() -> BTreeMap<String, String> {
    [
        ("danger_port", "Close RDP/SMB/Telnet or restrict them behind a firewall"),
        ("hostile_country", "Block traffic to high-risk countries with web filtering"),
        ("foreign_country", "Review foreign traffic or use web filtering"),
        ("invalid_certificate", "Install a valid certificate from a trusted CA"),
        ("firewall_disabled", "Enable the host firewall"),
        ("endpoint_protection_disabled", "Enable endpoint protection / antivirus"),
        ("legacy_os", "Upgrade to a supported operating system"),
        ("smb_v1", "Disable SMBv1 and use SMBv2 or later"),
        ("upnp", "Disable UPnP on routers and devices"),
        ("open_ports", "Close unused ports or enable a firewall"),
        ("international_traffic", "Audit international connections and apply web filtering"),
        ("ip_conflict", "Fix static address assignments or DHCP reservations"),
        ("dns_failures", "Check DNS server health and resolver settings"),
        ("plaintext_http", "Move services to HTTPS"),
        ("unknown_devices", "Inventory unknown devices and restrict network access"),
        ("device_count", "Segment the network into smaller zones"),
        ("arp_spoofing", "Enable IPS / dynamic ARP inspection"),
        ("netbios_exposure", "Disable NetBIOS and restrict SMB to trusted hosts"),
        ("suspicious_external_comm", "Block suspicious destinations with web filtering"),
        ("multiple_dhcp", "Remove rogue DHCP servers and enable DHCP snooping"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Serialization format of a scoring config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Format implied by the file extension, if any
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }
}

impl ScoringConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ScanError::ConfigError(format!("Invalid JSON scoring config: {}", e)))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| ScanError::ConfigError(format!("Invalid YAML scoring config: {}", e)))
    }

    /// Parse text in the given format; with no format, JSON then YAML
    pub fn parse(text: &str, format: Option<ConfigFormat>) -> Result<Self> {
        match format {
            Some(ConfigFormat::Json) => Self::from_json_str(text),
            Some(ConfigFormat::Yaml) => Self::from_yaml_str(text),
            None => Self::from_json_str(text).or_else(|_| Self::from_yaml_str(text)),
        }
    }

    /// Load from a JSON or YAML file; omitted fields keep their defaults
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ScanError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&text, ConfigFormat::from_path(path))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ScanError::ConfigError(format!("Config serialization error: {}", e)))
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| ScanError::ConfigError(format!("Config serialization error: {}", e)))
    }

    /// Write to `path`, YAML for `.yaml`/`.yml` and JSON otherwise
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_path(path) {
            Some(ConfigFormat::Yaml) => self.to_yaml_string()?,
            _ => self.to_json_string()?,
        };
        fs::write(path, content)?;
        Ok(())
    }

    pub fn is_danger_port(&self, port: &str) -> bool {
        self.danger_ports.contains(port.trim())
    }

    pub fn countermeasure(&self, kind: &str) -> Option<&str> {
        self.countermeasures.get(kind).map(String::as_str)
    }
}

/// Holder of the current scoring config
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<ScoringConfig>>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

impl ConfigStore {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// The complete current config
    pub fn snapshot(&self) -> Arc<ScoringConfig> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Swap in `config`, returning the previous one
    pub fn replace(&self, config: ScoringConfig) -> Arc<ScoringConfig> {
        let next = Arc::new(config);
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, next)
    }

    /// Load `path` and make it current. On error the old config stays.
    pub fn reload_from_path<P: AsRef<Path>>(&self, path: P) -> Result<Arc<ScoringConfig>> {
        let path = path.as_ref();
        let config = ScoringConfig::from_path(path)?;
        self.replace(config);
        info!("Reloaded scoring config from {}", path.display());
        Ok(self.snapshot())
    }

    /// Back to the built-in defaults
    pub fn reset(&self) -> Arc<ScoringConfig> {
        self.replace(ScoringConfig::default())
    }
}
