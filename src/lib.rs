//! lanscore - LAN discovery, service probing and security scoring
//!
//! Drives nmap to enumerate hosts and probe their services with a stall
//! watchdog, fans probes out over a bounded worker pool, and turns the
//! observations into a 0-10 security score.

pub mod config;
pub mod discovery;
pub mod error;
pub mod lan_check;
pub mod network;
pub mod nmap;
pub mod scanner;
pub mod scoring;

// Re-export commonly used types
pub use config::ToolConfig;
pub use discovery::HostDiscoverer;
pub use error::ScanError;
pub use lan_check::{CheckStatus, LanCheckReport, LanChecker};
pub use network::{AddressFamily, Host, PortResult, PortState};
pub use scanner::{lan_scan, HostProber, HostScan, ProbeOptions, ScanCoordinator, ScanResult, ServiceProber};
pub use scoring::{RiskObservations, ScoreResult, ScoringConfig, ScoringEngine};

pub type Result<T> = std::result::Result<T, ScanError>;
