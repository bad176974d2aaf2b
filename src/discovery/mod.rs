//! Host discovery: nmap ping sweep plus vendor and hostname enrichment

pub mod hostname;
pub mod vendor;

use crate::config::ToolConfig;
use crate::network::Host;
use crate::nmap::{self, xml};
use crate::scanner::MAX_DEFAULT_WORKERS;
use crate::{Result, ScanError};
use futures::stream::{self, StreamExt};
use log::info;
use std::sync::Arc;
use std::time::Instant;

pub use hostname::NameResolver;
pub use vendor::{MacVendorsApi, VendorCache, VendorDirectory, VendorSource};

/// Enumerates live hosts on a subnet
pub struct HostDiscoverer {
    config: ToolConfig,
    vendors: Arc<VendorDirectory>,
    names: NameResolver,
}

impl HostDiscoverer {
    /// Discoverer with vendor and name resolution built from `config`
    pub fn new(config: ToolConfig) -> Self {
        let vendors = Arc::new(VendorDirectory::from_config(&config));
        let names = NameResolver::new(&config);
        Self::with_components(config, vendors, names)
    }

    /// Discoverer sharing an existing vendor directory (and its cache)
    pub fn with_components(config: ToolConfig, vendors: Arc<VendorDirectory>, names: NameResolver) -> Self {
        Self { config, vendors, names }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    pub fn vendors(&self) -> &Arc<VendorDirectory> {
        &self.vendors
    }

    /// Sweep `subnet` (CIDR) and return its live hosts.
    ///
    /// A non-zero exit, a timeout or unparsable output fails the whole call;
    /// no partial host list is returned.
    pub async fn discover(&self, subnet: &str) -> Result<Vec<Host>> {
        let args = nmap::discovery_args(subnet);
        info!("Discovering hosts on {}", subnet);
        let start = Instant::now();

        let output = nmap::run_with_timeout(&self.config.nmap_path, &args, self.config.discovery_timeout_duration())
            .await
            .map_err(|e| match e {
                ScanError::ScanTimeout(_) => ScanError::ScanTimeout(format!(
                    "nmap host discovery of {} timed out after {}s",
                    subnet, self.config.discovery_timeout
                )),
                other => other,
            })?;

        let stdout = output.into_stdout()?;
        let hosts = xml::parse_discovery(&stdout)?;
        let hosts = self.enrich(hosts).await;

        info!("Discovered {} hosts on {} in {:?}", hosts.len(), subnet, start.elapsed());
        Ok(hosts)
    }

    /// Fill missing vendor and hostname fields, keeping host order. At most
    /// [`MAX_DEFAULT_WORKERS`] hosts are enriched at once. Failures leave the
    /// fields empty.
    pub async fn enrich(&self, hosts: Vec<Host>) -> Vec<Host> {
        let limit = hosts.len().clamp(1, MAX_DEFAULT_WORKERS);
        stream::iter(hosts)
            .map(|host| self.enrich_host(host))
            .buffered(limit)
            .collect()
            .await
    }

    async fn enrich_host(&self, mut host: Host) -> Host {
        if host.vendor.is_empty() && !host.mac.is_empty() {
            host.vendor = self.vendors.lookup(&host.mac).await;
        }
        host.hostname = self.names.resolve(&host.ip, &host.hostname).await;
        host
    }
}
