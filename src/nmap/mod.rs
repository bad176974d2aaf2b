//! nmap integration: command lines, supervised execution and XML parsing

pub mod process;
pub mod xml;

use crate::network::AddressFamily;
use crate::scanner::ProbeOptions;
use crate::{Result, ScanError};
use std::time::Duration;

pub use process::{find_executable, run_supervised, run_with_timeout, ToolOutput};

/// Highest nmap timing template (`-T5`)
pub const MAX_TIMING_LEVEL: u8 = 5;

/// Arguments for a ping-only discovery sweep with reverse-name resolution
pub fn discovery_args(subnet: &str) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(flag) = AddressFamily::detect(subnet).nmap_flag() {
        args.push(flag.to_string());
    }
    args.extend(["-R", "-sn"].iter().map(|s| s.to_string()));
    args.push(subnet.to_string());
    args.push("-oX".to_string());
    args.push("-".to_string()); // Output to stdout
    args
}

/// Interval passed to `--stats-every` while stall supervision is active
pub fn stats_interval(stall: Duration) -> Duration {
    (stall / 2).max(Duration::from_secs(1))
}

/// Arguments for probing one host.
///
/// An empty `ports` slice scans all ports; an empty script list disables
/// scripts entirely.
pub fn probe_args(target: &str, ports: &[String], options: &ProbeOptions) -> Result<Vec<String>> {
    let mut args = Vec::new();

    if let Some(flag) = AddressFamily::detect(target).nmap_flag() {
        args.push(flag.to_string());
    }
    if options.service_detection {
        args.push("-sV".to_string());
    }
    if options.os_detection {
        args.push("-O".to_string());
    }
    if let Some(level) = options.timing_level {
        if level > MAX_TIMING_LEVEL {
            return Err(ScanError::InvalidOption(format!(
                "timing level must be between 0 and {}, got {}",
                MAX_TIMING_LEVEL, level
            )));
        }
        args.push(format!("-T{}", level));
    }
    if !options.scripts.is_empty() {
        args.push("--script".to_string());
        args.push(options.scripts.join(","));
    }
    if let Some(stall) = options.stall_timeout {
        args.push("--stats-every".to_string());
        args.push(format!("{}s", stats_interval(stall).as_secs()));
    }

    if ports.is_empty() {
        args.push("-p-".to_string());
    } else {
        args.push("-p".to_string());
        args.push(ports.join(","));
    }

    args.push("-oX".to_string());
    args.push("-".to_string());
    args.push(target.to_string());
    Ok(args)
}
