//! Network data model shared by discovery, probing and scoring

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Address family of a scan target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Detect the family of a host address or CIDR subnet.
    ///
    /// Falls back to a colon-presence heuristic when the text does not parse.
    pub fn detect(target: &str) -> Self {
        let target = target.trim();
        if let Ok(network) = target.parse::<IpNetwork>() {
            return if network.is_ipv6() { Self::V6 } else { Self::V4 };
        }
        if let Ok(addr) = target.parse::<IpAddr>() {
            return if addr.is_ipv6() { Self::V6 } else { Self::V4 };
        }
        if target.contains(':') {
            Self::V6
        } else {
            Self::V4
        }
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self, Self::V6)
    }

    /// Flag selecting this family on the nmap command line
    pub fn nmap_flag(&self) -> Option<&'static str> {
        match self {
            Self::V4 => None,
            Self::V6 => Some("-6"),
        }
    }
}

/// A live host found by discovery. Identity key is `ip`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub ip: String,
    pub mac: String,
    pub vendor: String,
    pub hostname: String,
}

impl Host {
    pub fn new<S: Into<String>>(ip: S) -> Self {
        Self {
            ip: ip.into(),
            ..Default::default()
        }
    }

    pub fn with_mac<S: Into<String>>(mut self, mac: S) -> Self {
        self.mac = mac.into();
        self
    }

    pub fn with_vendor<S: Into<String>>(mut self, vendor: S) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn with_hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::detect(&self.ip)
    }
}

/// Port state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Unknown,
}

impl PortState {
    /// Map a state string reported by nmap
    pub fn from_nmap(state: &str) -> Self {
        match state.trim() {
            "open" => PortState::Open,
            "closed" => PortState::Closed,
            "filtered" | "open|filtered" | "closed|filtered" => PortState::Filtered,
            _ => PortState::Unknown,
        }
    }
}

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
            PortState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Probe result for a single port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortResult {
    pub port: String,
    pub state: PortState,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub service_info: Option<String>,
}

impl PortResult {
    pub fn new<S: Into<String>>(port: S, state: PortState) -> Self {
        Self {
            port: port.into(),
            state,
            service: String::new(),
            service_info: None,
        }
    }

    pub fn with_service<S: Into<String>>(mut self, service: S) -> Self {
        self.service = service.into();
        self
    }

    pub fn with_service_info<S: Into<String>>(mut self, info: S) -> Self {
        self.service_info = Some(info.into());
        self
    }

    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}
