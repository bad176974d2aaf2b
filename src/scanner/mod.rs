//! Per-host service probing and the worker pool that fans it out

pub mod coordinator;
pub mod prober;

use crate::network::{Host, PortResult};
use crate::{Result, ScanError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use coordinator::{lan_scan, ScanCoordinator, MAX_DEFAULT_WORKERS};
pub use prober::ServiceProber;

/// Result of probing one host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// First OS match, empty when OS detection was off or inconclusive
    pub os: String,

    /// Ports in the order the probing tool reported them
    pub ports: Vec<PortResult>,
}

impl ScanResult {
    pub fn open_ports(&self) -> impl Iterator<Item = &PortResult> {
        self.ports.iter().filter(|p| p.is_open())
    }

    pub fn open_port_ids(&self) -> Vec<String> {
        self.open_ports().map(|p| p.port.clone()).collect()
    }
}

/// Options for a single probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOptions {
    /// Request service/version detection (`-sV`)
    pub service_detection: bool,

    /// Request OS detection (`-O`)
    pub os_detection: bool,

    /// Scripts to run; empty disables scripts
    pub scripts: Vec<String>,

    /// Timing template 0-5
    pub timing_level: Option<u8>,

    /// Maximum gap between output lines before the probe is killed
    pub stall_timeout: Option<Duration>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            service_detection: false,
            os_detection: false,
            scripts: vec!["vuln".to_string()],
            timing_level: None,
            stall_timeout: None,
        }
    }
}

impl ProbeOptions {
    pub fn with_service_detection(mut self, enabled: bool) -> Self {
        self.service_detection = enabled;
        self
    }

    pub fn with_os_detection(mut self, enabled: bool) -> Self {
        self.os_detection = enabled;
        self
    }

    pub fn with_scripts(mut self, scripts: Vec<String>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_timing_level(mut self, level: u8) -> Self {
        self.timing_level = Some(level);
        self
    }

    pub fn with_stall_timeout(mut self, stall: Duration) -> Self {
        self.stall_timeout = Some(stall);
        self
    }
}

/// Anything that can probe a single host
#[async_trait]
pub trait HostProber: Send + Sync {
    async fn probe(&self, host: &str, ports: &[String], options: &ProbeOptions) -> Result<ScanResult>;
}

/// Outcome of probing one host inside a batch.
///
/// A failed probe keeps its error here instead of aborting sibling scans.
#[derive(Debug)]
pub struct HostScan {
    pub host: Host,
    pub result: Result<ScanResult>,
    pub finished_at: DateTime<Utc>,
}

impl HostScan {
    pub fn new(host: Host, result: Result<ScanResult>) -> Self {
        Self {
            host,
            result,
            finished_at: Utc::now(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&ScanError> {
        self.result.as_ref().err()
    }
}

#[derive(Serialize)]
struct HostScanRecord<'a> {
    ip: &'a str,
    mac: &'a str,
    vendor: &'a str,
    hostname: &'a str,
    os: &'a str,
    ports: &'a [PortResult],
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<HostScanError>,
    finished_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct HostScanError {
    kind: &'static str,
    message: String,
}

impl Serialize for HostScan {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let (os, ports, error) = match &self.result {
            Ok(scan) => (scan.os.as_str(), scan.ports.as_slice(), None),
            Err(e) => (
                "",
                &[][..],
                Some(HostScanError {
                    kind: e.kind(),
                    message: e.to_string(),
                }),
            ),
        };
        HostScanRecord {
            ip: &self.host.ip,
            mac: &self.host.mac,
            vendor: &self.host.vendor,
            hostname: &self.host.hostname,
            os,
            ports,
            error,
            finished_at: self.finished_at,
        }
        .serialize(serializer)
    }
}
