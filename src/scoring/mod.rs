//! Security scoring engine
//!
//! Independent risk observations are checked against a fixed rule list. Each
//! rule that fires yields a [`Finding`] of high, medium or low severity and
//! the score is
//!
//! ```text
//! clamp(10 - high*w.high - medium*w.medium - low*w.low + utm_bonus?, 0, 10)
//! ```
//!
//! rounded to one decimal. Scoring never fails: absent or out-of-range
//! fields contribute nothing.

pub mod config;
pub mod exposure;
pub mod mitigation;

use crate::lan_check::CheckStatus;
use crate::scanner::ScanResult;
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

pub use config::{ConfigFormat, ConfigStore, ScoringConfig, Weights};
pub use mitigation::{recommend_mitigations, Mitigation};

/// Countries treated as hostile destinations
pub static DANGER_COUNTRIES: Lazy<HashSet<String>> =
    Lazy::new(|| ["RU", "CN", "KP"].iter().map(|c| c.to_string()).collect());

/// Countries treated as unremarkable destinations
pub static SAFE_COUNTRIES: Lazy<HashSet<String>> = Lazy::new(|| {
    ["JP", "US", "GB", "DE", "FR", "CA", "AU"]
        .iter()
        .map(|c| c.to_string())
        .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// What a finding is about; also the countermeasure key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    DangerPort,
    HostileCountry,
    ForeignCountry,
    InvalidCertificate,
    FirewallDisabled,
    EndpointProtectionDisabled,
    LegacyOs,
    SmbV1,
    Upnp,
    OpenPorts,
    InternationalTraffic,
    IpConflict,
    DnsFailures,
    PlaintextHttp,
    UnknownDevices,
    DeviceCount,
    ArpSpoofing,
    NetbiosExposure,
    SuspiciousExternalComm,
    MultipleDhcp,
}

impl RiskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskKind::DangerPort => "danger_port",
            RiskKind::HostileCountry => "hostile_country",
            RiskKind::ForeignCountry => "foreign_country",
            RiskKind::InvalidCertificate => "invalid_certificate",
            RiskKind::FirewallDisabled => "firewall_disabled",
            RiskKind::EndpointProtectionDisabled => "endpoint_protection_disabled",
            RiskKind::LegacyOs => "legacy_os",
            RiskKind::SmbV1 => "smb_v1",
            RiskKind::Upnp => "upnp",
            RiskKind::OpenPorts => "open_ports",
            RiskKind::InternationalTraffic => "international_traffic",
            RiskKind::IpConflict => "ip_conflict",
            RiskKind::DnsFailures => "dns_failures",
            RiskKind::PlaintextHttp => "plaintext_http",
            RiskKind::UnknownDevices => "unknown_devices",
            RiskKind::DeviceCount => "device_count",
            RiskKind::ArpSpoofing => "arp_spoofing",
            RiskKind::NetbiosExposure => "netbios_exposure",
            RiskKind::SuspiciousExternalComm => "suspicious_external_comm",
            RiskKind::MultipleDhcp => "multiple_dhcp",
        }
    }
}

/// Certificate state of the host's TLS endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TlsStatus {
    Valid,
    Invalid,
    SelfSigned,
    Expired,
    #[serde(other)]
    Unknown,
}

impl TlsStatus {
    pub fn is_untrusted(&self) -> bool {
        matches!(self, TlsStatus::Invalid | TlsStatus::SelfSigned | TlsStatus::Expired)
    }
}

/// Results of earlier LAN security checks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanCheckStatuses {
    pub arp_spoofing: Option<CheckStatus>,
    pub netbios: Option<CheckStatus>,
    pub external_comm: Option<CheckStatus>,
    pub dhcp: Option<CheckStatus>,
}

/// Risk signals for one scoring call. Every field is optional; absent means
/// "not observed" and adds nothing to any counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskObservations {
    /// Ports reported open that may be dangerous; matched against the
    /// configured danger ports
    #[serde(deserialize_with = "port_list")]
    pub danger_ports: Vec<String>,

    /// All open ports, when known. Also matched against danger ports and
    /// used as the open-port count when `open_port_count` is absent.
    #[serde(deserialize_with = "port_list")]
    pub open_ports: Vec<String>,

    /// ISO country code of the remote peer
    #[serde(alias = "geoip")]
    pub geolocation: Option<String>,

    #[serde(alias = "ssl")]
    pub tls_status: Option<TlsStatus>,

    pub firewall_enabled: Option<bool>,

    #[serde(alias = "defender_enabled")]
    pub endpoint_protection_enabled: Option<bool>,

    pub os_version: Option<String>,

    /// Deprecated SMB dialect enabled
    pub smbv1: bool,

    pub upnp: bool,

    pub open_port_count: Option<u32>,

    pub intl_traffic_ratio: Option<f64>,

    pub dns_fail_rate: Option<f64>,

    pub http_ratio: Option<f64>,

    pub unknown_mac_ratio: Option<f64>,

    pub device_count: Option<u32>,

    pub ip_conflict: bool,

    pub utm_active: bool,

    pub lan_checks: LanCheckStatuses,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u64),
    Text(String),
}

fn port_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let values = Vec::<PortValue>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .map(|value| match value {
            PortValue::Number(n) => n.to_string(),
            PortValue::Text(s) => s.trim().to_string(),
        })
        .collect())
}

impl RiskObservations {
    /// Observations derived from a probe: open ports and detected OS
    pub fn from_scan(scan: &ScanResult) -> Self {
        let open_ports = scan.open_port_ids();
        Self {
            open_port_count: Some(open_ports.len() as u32),
            open_ports,
            os_version: Some(scan.os.clone()).filter(|os| !os.is_empty()),
            ..Default::default()
        }
    }

    /// Explicit count, else the number of listed open ports
    pub fn effective_open_port_count(&self) -> u32 {
        self.open_port_count.unwrap_or(self.open_ports.len() as u32)
    }

    /// Distinct listed ports that are configured as dangerous
    pub fn danger_ports_present(&self, config: &ScoringConfig) -> BTreeSet<String> {
        self.danger_ports
            .iter()
            .chain(self.open_ports.iter())
            .map(|p| p.trim())
            .filter(|p| config.is_danger_port(p))
            .map(str::to_string)
            .collect()
    }

    fn country(&self) -> Option<String> {
        self.geolocation
            .as_deref()
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
    }
}

/// One fired rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: RiskKind,
    pub severity: Severity,
    pub detail: String,
}

impl Finding {
    fn new<S: Into<String>>(kind: RiskKind, severity: Severity, detail: S) -> Self {
        Self {
            kind,
            severity,
            detail: detail.into(),
        }
    }
}

/// Bounded score with per-tier tallies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub high_risk: u32,
    pub medium_risk: u32,
    pub low_risk: u32,
}

impl ScoreResult {
    fn from_findings(findings: &[Finding], config: &ScoringConfig, utm_active: bool) -> Self {
        let count = |severity| findings.iter().filter(|f| f.severity == severity).count() as u32;
        let high_risk = count(Severity::High);
        let medium_risk = count(Severity::Medium);
        let low_risk = count(Severity::Low);

        let weights = config.weights.sanitized();
        let mut score = 10.0
            - f64::from(high_risk) * weights.high
            - f64::from(medium_risk) * weights.medium
            - f64::from(low_risk) * weights.low;
        if utm_active {
            score += config::finite_or_zero(config.utm_bonus);
        }

        Self {
            score: round_one_decimal(score.clamp(0.0, 10.0)),
            high_risk,
            medium_risk,
            low_risk,
        }
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// A finding with the configured countermeasure attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessedRisk {
    #[serde(flatten)]
    pub finding: Finding,
    pub countermeasure: Option<String>,
}

/// Full result of [`ScoringEngine::assess`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    #[serde(flatten)]
    pub score: ScoreResult,
    pub risks: Vec<AssessedRisk>,
    pub mitigations: BTreeSet<Mitigation>,
}

/// Band thresholds, each inclusive on its lower edge
#[derive(Debug, Clone, Copy)]
struct Bands {
    high: Option<f64>,
    medium: Option<f64>,
    low: Option<f64>,
}

impl Bands {
    fn classify(&self, value: f64) -> Option<Severity> {
        let reaches = |edge: Option<f64>| edge.map_or(false, |e| value >= e);
        if reaches(self.high) {
            Some(Severity::High)
        } else if reaches(self.medium) {
            Some(Severity::Medium)
        } else if reaches(self.low) {
            Some(Severity::Low)
        } else {
            None
        }
    }
}

const OPEN_PORT_BANDS: Bands = Bands { high: Some(21.0), medium: Some(10.0), low: Some(1.0) };
const INTL_TRAFFIC_BANDS: Bands = Bands { high: Some(0.8), medium: Some(0.5), low: Some(0.2) };
const DNS_FAIL_BANDS: Bands = Bands { high: None, medium: Some(0.5), low: Some(0.1) };
const HTTP_BANDS: Bands = Bands { high: None, medium: Some(0.5), low: Some(0.2) };
const UNKNOWN_MAC_BANDS: Bands = Bands { high: None, medium: Some(0.2), low: Some(0.05) };
const DEVICE_COUNT_BANDS: Bands = Bands { high: None, medium: Some(30.0), low: None };

fn usable_ratio(value: Option<f64>) -> Option<f64> {
    value.filter(|r| r.is_finite() && *r >= 0.0)
}

/// Severity of an end-of-life or near-end-of-life OS version string
pub fn legacy_os_severity(os_version: &str) -> Option<Severity> {
    let lower = os_version.trim().to_ascii_lowercase();
    let rest = lower.strip_prefix("microsoft").map(str::trim_start).unwrap_or(&lower);
    let rest = rest.strip_prefix("windows").map(str::trim_start).unwrap_or(rest);
    let tokens: Vec<&str> = rest.split_whitespace().collect();

    match tokens.as_slice() {
        ["95", ..] | ["98", ..] | ["me", ..] | ["2000", ..] | ["xp", ..] | ["vista", ..] => Some(Severity::High),
        ["7", ..] | ["8", ..] => Some(Severity::High),
        ["server", "2003", ..] => Some(Severity::High),
        ["8.1", ..] => Some(Severity::Medium),
        ["server", "2008", ..] | ["server", "2012", ..] => Some(Severity::Medium),
        _ => None,
    }
}

/// Apply every rule to `observations`
pub fn evaluate(observations: &RiskObservations, config: &ScoringConfig) -> Vec<Finding> {
    use RiskKind::*;
    use Severity::*;

    let mut findings = Vec::new();

    for port in observations.danger_ports_present(config) {
        findings.push(Finding::new(DangerPort, High, format!("dangerous port {} open", port)));
    }

    if let Some(country) = observations.country() {
        if DANGER_COUNTRIES.contains(&country) {
            findings.push(Finding::new(HostileCountry, High, format!("traffic to {}", country)));
        } else if !SAFE_COUNTRIES.contains(&country) {
            findings.push(Finding::new(ForeignCountry, Medium, format!("traffic to {}", country)));
        }
    }

    if let Some(status) = observations.tls_status.filter(TlsStatus::is_untrusted) {
        findings.push(Finding::new(InvalidCertificate, High, format!("certificate {:?}", status)));
    }

    if observations.firewall_enabled == Some(false) {
        findings.push(Finding::new(FirewallDisabled, High, "firewall disabled"));
    }
    if observations.endpoint_protection_enabled == Some(false) {
        findings.push(Finding::new(EndpointProtectionDisabled, High, "endpoint protection disabled"));
    }

    if let Some(os) = observations.os_version.as_deref() {
        if let Some(severity) = legacy_os_severity(os) {
            findings.push(Finding::new(LegacyOs, severity, format!("legacy OS {}", os.trim())));
        }
    }

    if observations.smbv1 {
        findings.push(Finding::new(SmbV1, High, "SMBv1 enabled"));
    }
    if observations.upnp {
        findings.push(Finding::new(Upnp, Medium, "UPnP exposed"));
    }

    let open_ports = observations.effective_open_port_count();
    if let Some(severity) = OPEN_PORT_BANDS.classify(f64::from(open_ports)) {
        findings.push(Finding::new(OpenPorts, severity, format!("{} open ports", open_ports)));
    }

    let ratio_rules = [
        (observations.intl_traffic_ratio, INTL_TRAFFIC_BANDS, InternationalTraffic, "international traffic"),
        (observations.dns_fail_rate, DNS_FAIL_BANDS, DnsFailures, "DNS failures"),
        (observations.http_ratio, HTTP_BANDS, PlaintextHttp, "plaintext HTTP"),
        (observations.unknown_mac_ratio, UNKNOWN_MAC_BANDS, UnknownDevices, "unknown MAC addresses"),
    ];
    for (value, bands, kind, label) in ratio_rules {
        if let Some(ratio) = usable_ratio(value) {
            if let Some(severity) = bands.classify(ratio) {
                findings.push(Finding::new(kind, severity, format!("{} ratio {:.2}", label, ratio)));
            }
        }
    }

    if let Some(count) = observations.device_count {
        if let Some(severity) = DEVICE_COUNT_BANDS.classify(f64::from(count)) {
            findings.push(Finding::new(DeviceCount, severity, format!("{} devices", count)));
        }
    }

    if observations.ip_conflict {
        findings.push(Finding::new(IpConflict, High, "IP address conflict"));
    }

    let checks = &observations.lan_checks;
    let lan_rules = [
        (checks.arp_spoofing, ArpSpoofing, High, "ARP spoofing suspected"),
        (checks.netbios, NetbiosExposure, High, "NetBIOS/SMB exposed"),
        (checks.external_comm, SuspiciousExternalComm, High, "suspicious external communication"),
        (checks.dhcp, MultipleDhcp, Medium, "multiple DHCP servers"),
    ];
    for (status, kind, severity, detail) in lan_rules {
        if status == Some(CheckStatus::Warning) {
            findings.push(Finding::new(kind, severity, detail));
        }
    }

    findings
}

/// Score `observations` under `config`
pub fn score(observations: &RiskObservations, config: &ScoringConfig) -> ScoreResult {
    let findings = evaluate(observations, config);
    ScoreResult::from_findings(&findings, config, observations.utm_active)
}

/// Scoring against the current config of a shared [`ConfigStore`]
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    store: Arc<ConfigStore>,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(Arc::new(ConfigStore::default()))
    }
}

impl ScoringEngine {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn score(&self, observations: &RiskObservations) -> ScoreResult {
        let config = self.store.snapshot();
        score(observations, &config)
    }

    /// Score plus each finding's countermeasure and the recommended UTM set
    pub fn assess(&self, observations: &RiskObservations) -> Assessment {
        let config = self.store.snapshot();
        let findings = evaluate(observations, &config);
        let score = ScoreResult::from_findings(&findings, &config, observations.utm_active);

        let mut open_ports: Vec<&str> = observations
            .open_ports
            .iter()
            .chain(observations.danger_ports.iter())
            .map(String::as_str)
            .collect();
        if open_ports.is_empty() && observations.effective_open_port_count() > 0 {
            open_ports.push("*");
        }
        let countries: Vec<String> = observations.country().into_iter().collect();
        let mitigations = recommend_mitigations(score.score, &open_ports, &countries, &DANGER_COUNTRIES);

        let risks = findings
            .into_iter()
            .map(|finding| AssessedRisk {
                countermeasure: config.countermeasure(finding.kind.as_str()).map(str::to_string),
                finding,
            })
            .collect();

        Assessment {
            score,
            risks,
            mitigations,
        }
    }
}
