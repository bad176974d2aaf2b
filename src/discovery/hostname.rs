//! Hostname resolution through a fallback chain of naming protocols

use crate::config::ToolConfig;
use crate::network::AddressFamily;
use crate::nmap::{find_executable, run_with_timeout, ToolOutput};
use log::debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolves a host's name: discovery output first, then NetBIOS (IPv4 only),
/// then multicast DNS. Each step is skipped when its tool is not installed
/// and any failure counts as "no name".
#[derive(Debug, Clone)]
pub struct NameResolver {
    nbtscan: PathBuf,
    avahi_resolve: PathBuf,
    step_timeout: Duration,
}

impl NameResolver {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            nbtscan: config.nbtscan_path.clone(),
            avahi_resolve: config.avahi_resolve_path.clone(),
            step_timeout: config.name_lookup_timeout_duration(),
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// First non-empty name in the chain, or `""`
    pub async fn resolve(&self, ip: &str, discovered: &str) -> String {
        let discovered = discovered.trim();
        if !discovered.is_empty() {
            return discovered.to_string();
        }

        if !AddressFamily::detect(ip).is_ipv6() {
            if let Some(name) = self.query(&self.nbtscan, &["-q", ip], parse_nbtscan).await {
                return name;
            }
        }

        self.query(&self.avahi_resolve, &["-a", ip], parse_avahi)
            .await
            .unwrap_or_default()
    }

    async fn query(&self, tool: &Path, args: &[&str], parse: fn(&str) -> Option<String>) -> Option<String> {
        let program = find_executable(tool)?;
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();

        match run_with_timeout(&program, &args, self.step_timeout)
            .await
            .and_then(ToolOutput::into_stdout)
        {
            Ok(stdout) => parse(&stdout),
            Err(e) => {
                debug!("{} {:?} failed: {}", program.display(), args, e);
                None
            }
        }
    }
}

fn second_field_of_first_line(output: &str) -> Option<&str> {
    output.trim().lines().next()?.split_whitespace().nth(1)
}

/// Name from `nbtscan -q <ip>` output
pub fn parse_nbtscan(output: &str) -> Option<String> {
    second_field_of_first_line(output).map(str::to_string)
}

/// Name from `avahi-resolve -a <ip>` output, without the trailing root dot
pub fn parse_avahi(output: &str) -> Option<String> {
    second_field_of_first_line(output)
        .map(|name| name.strip_suffix('.').unwrap_or(name))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}
