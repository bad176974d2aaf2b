//! LAN-wide security checks
//!
//! Each check shells out to a system tool, inspects the text it prints and
//! reports `ok`, `warning` or `unknown`. A check never fails the batch: tool
//! errors become `unknown` with the error text as details.

pub mod external;
pub mod protection;

use crate::config::ToolConfig;
use crate::nmap::{find_executable, run_with_timeout, ToolOutput};
use crate::scoring::{Mitigation, RiskObservations, DANGER_COUNTRIES};
use crate::{Result, ScanError};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use external::{CountryLookup, GeoIpCountries, StaticCountries};
pub use protection::HostProtection;

static ARP_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+\.\d+\.\d+\.\d+).*?([0-9A-Fa-f]{2}(?:[:-][0-9A-Fa-f]{2}){5})").unwrap()
});

static GREPABLE_HOST: Lazy<Regex> = Lazy::new(|| Regex::new(r"Host: (\S+)").unwrap());

static IPV4: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+\.\d+\.\d+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
    #[serde(other)]
    Unknown,
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
    /// Mitigations worth enabling; only meaningful on a warning
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub utm: Vec<Mitigation>,
}

impl CheckResult {
    pub fn ok() -> Self {
        Self {
            status: CheckStatus::Ok,
            details: String::new(),
            utm: Vec::new(),
        }
    }

    pub fn warning<S: Into<String>>(details: S, utm: Mitigation) -> Self {
        Self {
            status: CheckStatus::Warning,
            details: details.into(),
            utm: vec![utm],
        }
    }

    pub fn unknown<S: Into<String>>(details: S) -> Self {
        Self {
            status: CheckStatus::Unknown,
            details: details.into(),
            utm: Vec::new(),
        }
    }

    fn from_outcome(outcome: Result<CheckResult>) -> Self {
        outcome.unwrap_or_else(|e| Self::unknown(e.to_string()))
    }
}

/// IP to the MAC addresses listed for it, normalized to lowercase with colons
pub fn parse_arp_table(output: &str) -> BTreeMap<String, Vec<String>> {
    let mut table: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for caps in output.lines().filter_map(|line| ARP_ENTRY.captures(line)) {
        let mac = caps[2].to_ascii_lowercase().replace('-', ":");
        table.entry(caps[1].to_string()).or_default().push(mac);
    }
    table
}

/// IPs listed with more than one distinct MAC
pub fn spoofed_addresses(table: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    table
        .iter()
        .filter(|(_, macs)| macs.iter().collect::<BTreeSet<_>>().len() > 1)
        .map(|(ip, _)| ip.clone())
        .collect()
}

pub fn parse_upnp_output(output: &str) -> bool {
    output.contains("UPnP") || output.contains("upnp")
}

/// Hosts with an open NetBIOS/SMB port in grepable nmap output
pub fn parse_netbios_output(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains("/open/") && IPV4.is_match(line))
        .filter_map(|line| GREPABLE_HOST.captures(line).map(|caps| caps[1].to_string()))
        .collect()
}

/// Number of DHCP servers that answered a broadcast discover
pub fn parse_dhcp_output(output: &str) -> usize {
    output.matches("Server Identifier").count()
}

pub fn parse_smb_protocol_output(output: &str) -> bool {
    output.contains("SMBv1") || output.contains("SMB1")
}

/// Results of [`LanChecker::run_checks`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanCheckReport {
    pub arp_spoofing: CheckResult,
    pub upnp: CheckResult,
    pub netbios: CheckResult,
    pub dhcp: CheckResult,
    pub external_comm: CheckResult,
    pub smb_protocol: CheckResult,
    #[serde(default)]
    pub protection: HostProtection,
    pub utm_recommendations: BTreeSet<Mitigation>,
}

impl LanCheckReport {
    pub fn new(
        arp_spoofing: CheckResult,
        upnp: CheckResult,
        netbios: CheckResult,
        dhcp: CheckResult,
        external_comm: CheckResult,
        smb_protocol: CheckResult,
    ) -> Self {
        let mut report = Self {
            arp_spoofing,
            upnp,
            netbios,
            dhcp,
            external_comm,
            smb_protocol,
            protection: HostProtection::default(),
            utm_recommendations: BTreeSet::new(),
        };
        report.utm_recommendations = report
            .checks()
            .iter()
            .filter(|check| check.status == CheckStatus::Warning)
            .flat_map(|check| check.utm.iter().copied())
            .collect();
        report
    }

    pub fn with_protection(mut self, protection: HostProtection) -> Self {
        self.protection = protection;
        self
    }

    fn checks(&self) -> [&CheckResult; 6] {
        [
            &self.arp_spoofing,
            &self.upnp,
            &self.netbios,
            &self.dhcp,
            &self.external_comm,
            &self.smb_protocol,
        ]
    }

    pub fn warnings(&self) -> usize {
        self.checks()
            .iter()
            .filter(|check| check.status == CheckStatus::Warning)
            .count()
    }

    /// Copy check outcomes into scoring observations. Protection states
    /// that could not be determined leave the observation untouched.
    pub fn apply_to(&self, observations: &mut RiskObservations) {
        let checks = &mut observations.lan_checks;
        checks.arp_spoofing = Some(self.arp_spoofing.status);
        checks.netbios = Some(self.netbios.status);
        checks.dhcp = Some(self.dhcp.status);
        checks.external_comm = Some(self.external_comm.status);

        if self.upnp.status == CheckStatus::Warning {
            observations.upnp = true;
        }
        if self.smb_protocol.status == CheckStatus::Warning {
            observations.smbv1 = true;
        }
        if let Some(enabled) = self.protection.firewall_enabled {
            observations.firewall_enabled = Some(enabled);
        }
        if let Some(enabled) = self.protection.endpoint_protection_enabled {
            observations.endpoint_protection_enabled = Some(enabled);
        }
    }
}

/// Runs the LAN checks with the tools named in [`ToolConfig`]
#[derive(Clone)]
pub struct LanChecker {
    nmap: PathBuf,
    arp: PathBuf,
    upnpc: PathBuf,
    ss: PathBuf,
    netstat: PathBuf,
    ufw: PathBuf,
    countries: Option<Arc<dyn CountryLookup>>,
    timeout: Duration,
}

impl LanChecker {
    /// Checker using the configured tools. Country information is disabled
    /// when the GeoIP database cannot be opened.
    pub fn new(config: &ToolConfig) -> Self {
        let countries: Option<Arc<dyn CountryLookup>> = match GeoIpCountries::open(&config.geoip_db) {
            Ok(db) => Some(Arc::new(db)),
            Err(e) => {
                debug!("{}; country information disabled", e);
                None
            }
        };

        Self {
            nmap: config.nmap_path.clone(),
            arp: config.arp_path.clone(),
            upnpc: config.upnpc_path.clone(),
            ss: config.ss_path.clone(),
            netstat: config.netstat_path.clone(),
            ufw: config.ufw_path.clone(),
            countries,
            timeout: config.lan_check_timeout_duration(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_country_lookup(mut self, countries: Arc<dyn CountryLookup>) -> Self {
        self.countries = Some(countries);
        self
    }

    async fn run(&self, tool: &Path, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        debug!("Running {} {:?}", tool.display(), args);
        run_with_timeout(tool, &args, self.timeout)
            .await
            .and_then(ToolOutput::into_stdout)
    }

    /// Same IP answering from several MACs
    pub async fn check_arp_spoofing(&self) -> CheckResult {
        let outcome = async {
            let table = parse_arp_table(&self.run(&self.arp, &["-a"]).await?);
            let suspicious = spoofed_addresses(&table);
            Ok::<_, ScanError>(if suspicious.is_empty() {
                CheckResult::ok()
            } else {
                CheckResult::warning(
                    format!("Multiple MAC addresses for {}", suspicious.join(", ")),
                    Mitigation::Ips,
                )
            })
        };
        CheckResult::from_outcome(outcome.await)
    }

    /// UPnP responders, via `upnpc` when installed and nmap otherwise
    pub async fn check_upnp(&self, subnet: &str) -> CheckResult {
        let attempts: [(&Path, Vec<&str>); 2] = [
            (self.upnpc.as_path(), vec!["-l"]),
            (self.nmap.as_path(), vec!["-p", "1900", "-sU", "--script", "upnp-info", "-oN", "-", subnet]),
        ];

        for (tool, args) in attempts {
            match self.run(tool, &args).await {
                Ok(stdout) if parse_upnp_output(&stdout) => {
                    return CheckResult::warning("UPnP service detected", Mitigation::Firewall)
                }
                Ok(_) => return CheckResult::ok(),
                Err(ScanError::ToolNotFound(_)) => continue,
                Err(e) => return CheckResult::unknown(e.to_string()),
            }
        }
        CheckResult::unknown("no UPnP scanner available")
    }

    pub async fn check_netbios(&self, subnet: &str) -> CheckResult {
        let outcome = async {
            let stdout = self
                .run(&self.nmap, &["-p", "137,138,139,445", "--open", "-oG", "-", subnet])
                .await?;
            let hosts = parse_netbios_output(&stdout);
            Ok::<_, ScanError>(if hosts.is_empty() {
                CheckResult::ok()
            } else {
                CheckResult::warning(format!("SMB/NetBIOS open on {}", hosts.join(", ")), Mitigation::Ips)
            })
        };
        CheckResult::from_outcome(outcome.await)
    }

    pub async fn check_dhcp(&self) -> CheckResult {
        let outcome = async {
            let stdout = self.run(&self.nmap, &["--script", "broadcast-dhcp-discover"]).await?;
            let servers = parse_dhcp_output(&stdout);
            Ok::<_, ScanError>(if servers > 1 {
                CheckResult::warning(format!("Multiple DHCP servers detected: {}", servers), Mitigation::Ips)
            } else {
                CheckResult::ok()
            })
        };
        CheckResult::from_outcome(outcome.await)
    }

    pub async fn check_smb_protocol(&self, subnet: &str) -> CheckResult {
        let outcome = async {
            let stdout = self
                .run(&self.nmap, &["-p", "445", "--script", "smb-protocols", "-oN", "-", subnet])
                .await?;
            Ok::<_, ScanError>(if parse_smb_protocol_output(&stdout) {
                CheckResult::warning("SMBv1 enabled", Mitigation::Ips)
            } else {
                CheckResult::ok()
            })
        };
        CheckResult::from_outcome(outcome.await)
    }

    /// Established connections to public addresses in high-risk countries
    pub async fn check_external_comm(&self) -> CheckResult {
        let attempts = [self.ss.as_path(), self.netstat.as_path()];
        let mut listing = None;
        for tool in attempts {
            match self.run(tool, &["-tn"]).await {
                Ok(stdout) => {
                    listing = Some(stdout);
                    break;
                }
                Err(ScanError::ToolNotFound(_)) => continue,
                Err(e) => return CheckResult::unknown(e.to_string()),
            }
        }
        let listing = match listing {
            Some(listing) => listing,
            None => return CheckResult::unknown("no connection listing tool available"),
        };

        let peers = external::external_peers(&listing);
        let countries = match &self.countries {
            Some(countries) => countries,
            None => {
                return CheckResult {
                    details: format!("{} external peers; country information disabled", peers.len()),
                    ..CheckResult::ok()
                }
            }
        };

        let (counts, suspicious) = external::classify_peers(&peers, countries.as_ref(), &DANGER_COUNTRIES);
        if suspicious.is_empty() {
            let summary: Vec<String> = counts.iter().map(|(code, n)| format!("{}={}", code, n)).collect();
            CheckResult {
                details: format!("{} external peers ({})", peers.len(), summary.join(", ")),
                ..CheckResult::ok()
            }
        } else {
            CheckResult::warning(
                format!("Connections to high-risk countries: {}", suspicious.join(", ")),
                Mitigation::WebFilter,
            )
        }
    }

    async fn query_state(&self, tool: &Path, args: &[&str], parse: fn(&str) -> Option<bool>) -> Option<bool> {
        match self.run(tool, args).await {
            Ok(stdout) => parse(&stdout),
            Err(e) => {
                debug!("{} status unavailable: {}", tool.display(), e);
                None
            }
        }
    }

    /// Host firewall state: `netsh` on Windows, `ufw` elsewhere
    pub async fn firewall_enabled(&self) -> Option<bool> {
        if cfg!(windows) {
            self.query_state(
                Path::new("netsh"),
                &["advfirewall", "show", "allprofiles"],
                protection::parse_netsh_firewall,
            )
            .await
        } else {
            self.query_state(&self.ufw, &["status"], protection::parse_ufw_status)
                .await
        }
    }

    /// Defender real-time protection; undetermined off Windows
    pub async fn endpoint_protection_enabled(&self) -> Option<bool> {
        if !cfg!(windows) {
            return None;
        }
        self.query_state(
            Path::new("powershell"),
            &["-Command", "(Get-MpComputerStatus).RealTimeProtectionEnabled"],
            protection::parse_defender_status,
        )
        .await
    }

    pub async fn check_protection(&self) -> HostProtection {
        let (firewall_enabled, endpoint_protection_enabled) =
            tokio::join!(self.firewall_enabled(), self.endpoint_protection_enabled());
        HostProtection {
            firewall_enabled,
            endpoint_protection_enabled,
        }
    }

    /// Run every check concurrently
    pub async fn run_checks(&self, subnet: &str) -> LanCheckReport {
        info!("Running LAN security checks on {}", subnet);
        if find_executable(&self.nmap).is_none() {
            debug!("{} not found; nmap-based checks will report unknown", self.nmap.display());
        }

        let (arp_spoofing, upnp, netbios, dhcp, external_comm, smb_protocol, protection) = tokio::join!(
            self.check_arp_spoofing(),
            self.check_upnp(subnet),
            self.check_netbios(subnet),
            self.check_dhcp(),
            self.check_external_comm(),
            self.check_smb_protocol(subnet),
            self.check_protection(),
        );

        let report = LanCheckReport::new(arp_spoofing, upnp, netbios, dhcp, external_comm, smb_protocol)
            .with_protection(protection);
        info!("LAN checks finished with {} warnings", report.warnings());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arp_table_with_duplicate_ip() {
        let sample = "Interface: 192.168.1.2 --- 0x3\n  \
            Internet Address      Physical Address      Type\n  \
            192.168.1.1           11-22-33-44-55-66     dynamic\n  \
            192.168.1.1           22-33-44-55-66-77     dynamic\n  \
            192.168.1.9           22-33-44-55-66-99     dynamic\n";
        let table = parse_arp_table(sample);
        assert_eq!(table["192.168.1.1"], vec!["11:22:33:44:55:66", "22:33:44:55:66:77"]);
        assert_eq!(spoofed_addresses(&table), vec!["192.168.1.1".to_string()]);
    }

    #[test]
    fn arp_table_unix_format() {
        let sample = "? (10.0.0.1) at aa:bb:cc:dd:ee:ff [ether] on eth0\n? (10.0.0.1) at AA:BB:CC:DD:EE:FF [ether] on eth0\n";
        let table = parse_arp_table(sample);
        assert!(spoofed_addresses(&table).is_empty());
    }

    #[test]
    fn dhcp_server_count() {
        let sample = "| broadcast-dhcp-discover:\n|   Response 1 of 2:\n|     Server Identifier: 192.168.1.1\n\
            |   Response 2 of 2:\n|     Server Identifier: 192.168.1.254\n";
        assert_eq!(parse_dhcp_output(sample), 2);
        assert_eq!(parse_dhcp_output(""), 0);
    }

    #[test]
    fn upnp_and_smb_markers() {
        assert!(parse_upnp_output("Found UPnP devices: desc: http://192.168.1.1:80/desc.xml"));
        assert!(!parse_upnp_output("No IGD found"));
        assert!(parse_smb_protocol_output("|     NT LM 0.12 (SMBv1) [dangerous!]\n"));
        assert!(!parse_smb_protocol_output("|     2.02\n|     3.11\n"));
    }

    #[test]
    fn netbios_hosts_from_grepable_output() {
        let sample = "# Nmap scan\nHost: 192.168.1.5 (nas)\tStatus: Up\n\
            Host: 192.168.1.5 (nas)\tPorts: 445/open/tcp//microsoft-ds///\n";
        assert_eq!(parse_netbios_output(sample), vec!["192.168.1.5".to_string()]);
    }

    #[test]
    fn report_aggregates_warning_mitigations() {
        let report = LanCheckReport::new(
            CheckResult::warning("spoof", Mitigation::Ips),
            CheckResult::warning("upnp", Mitigation::Firewall),
            CheckResult::ok(),
            CheckResult::warning("dhcp", Mitigation::Ips),
            CheckResult::warning("RU peer", Mitigation::WebFilter),
            CheckResult::unknown("nmap missing"),
        )
        .with_protection(HostProtection {
            firewall_enabled: Some(false),
            endpoint_protection_enabled: None,
        });
        let names: Vec<&str> = report.utm_recommendations.iter().map(Mitigation::as_str).collect();
        assert_eq!(names, vec!["firewall", "ips", "web_filter"]);
        assert_eq!(report.warnings(), 4);

        let mut observations = RiskObservations {
            endpoint_protection_enabled: Some(true),
            ..Default::default()
        };
        report.apply_to(&mut observations);
        assert!(observations.upnp);
        assert!(!observations.smbv1);
        assert_eq!(observations.lan_checks.arp_spoofing, Some(CheckStatus::Warning));
        assert_eq!(observations.lan_checks.netbios, Some(CheckStatus::Ok));
        assert_eq!(observations.lan_checks.external_comm, Some(CheckStatus::Warning));
        assert_eq!(observations.firewall_enabled, Some(false));
        assert_eq!(observations.endpoint_protection_enabled, Some(true));
    }

    #[test]
    fn check_result_json_shape() {
        let json = serde_json::to_value(CheckResult::ok()).unwrap();
        assert_eq!(json, serde_json::json!({"status": "ok"}));
        let parsed: CheckResult = serde_json::from_str(r#"{"status": "maybe"}"#).unwrap();
        assert_eq!(parsed.status, CheckStatus::Unknown);
    }

    #[tokio::test]
    async fn missing_tools_report_unknown() {
        let config = ToolConfig {
            nmap_path: PathBuf::from("/nonexistent/nmap"),
            arp_path: PathBuf::from("/nonexistent/arp"),
            upnpc_path: PathBuf::from("/nonexistent/upnpc"),
            ss_path: PathBuf::from("/nonexistent/ss"),
            netstat_path: PathBuf::from("/nonexistent/netstat"),
            ufw_path: PathBuf::from("/nonexistent/ufw"),
            geoip_db: PathBuf::from("/nonexistent/GeoLite2-Country.mmdb"),
            ..ToolConfig::default()
        };
        let report = LanChecker::new(&config).run_checks("10.0.0.0/24").await;
        assert_eq!(report.arp_spoofing.status, CheckStatus::Unknown);
        assert_eq!(report.upnp.status, CheckStatus::Unknown);
        assert_eq!(report.upnp.details, "no UPnP scanner available");
        assert_eq!(report.external_comm.details, "no connection listing tool available");
        assert_eq!(report.protection, HostProtection::default());
        assert!(report.utm_recommendations.is_empty());
    }
}
