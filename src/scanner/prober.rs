//! ServiceProber: runs nmap against a single host and parses the result

use super::{HostProber, ProbeOptions, ScanResult};
use crate::config::ToolConfig;
use crate::nmap::{self, xml};
use crate::Result;
use async_trait::async_trait;
use log::{debug, info};
use std::time::Instant;

/// nmap-backed port, service and OS prober
#[derive(Debug, Clone)]
pub struct ServiceProber {
    config: ToolConfig,
}

impl ServiceProber {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Probe `host` for `ports` (all ports when empty).
    ///
    /// Without a stall timeout the run is bounded by the configured hard
    /// probe timeout. With one, nmap is asked for periodic progress and is
    /// killed as soon as its output goes quiet for longer than the window.
    pub async fn probe(&self, host: &str, ports: &[String], options: &ProbeOptions) -> Result<ScanResult> {
        let args = nmap::probe_args(host, ports, options)?;
        info!(
            "Probing {} ({} ports)",
            host,
            if ports.is_empty() { "all".to_string() } else { ports.len().to_string() }
        );

        let start = Instant::now();
        let output = match options.stall_timeout {
            Some(stall) => nmap::run_supervised(&self.config.nmap_path, &args, host, stall).await?,
            None => {
                nmap::run_with_timeout(&self.config.nmap_path, &args, self.config.probe_timeout_duration())
                    .await?
            }
        };

        let stdout = output.into_stdout()?;
        let result = xml::parse_probe(&stdout, options.os_detection)?;
        debug!(
            "Probe of {} finished in {:?}: {} ports reported",
            host,
            start.elapsed(),
            result.ports.len()
        );
        Ok(result)
    }
}

#[async_trait]
impl HostProber for ServiceProber {
    async fn probe(&self, host: &str, ports: &[String], options: &ProbeOptions) -> Result<ScanResult> {
        ServiceProber::probe(self, host, ports, options).await
    }
}
