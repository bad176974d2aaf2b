//! ScanCoordinator: bounded worker pool fanning probes out over many hosts

use super::{HostProber, HostScan, ProbeOptions};
use crate::discovery::HostDiscoverer;
use crate::network::Host;
use crate::{Result, ScanError};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Upper bound on workers when the caller does not pick a count
pub const MAX_DEFAULT_WORKERS: usize = 32;

/// Dispatches one probe per host onto at most `W` concurrent workers and
/// collects outcomes in completion order
pub struct ScanCoordinator<P: ?Sized> {
    prober: Arc<P>,
}

impl<P: ?Sized> Clone for ScanCoordinator<P> {
    fn clone(&self) -> Self {
        Self {
            prober: Arc::clone(&self.prober),
        }
    }
}

impl<P> ScanCoordinator<P>
where
    P: HostProber + ?Sized + 'static,
{
    pub fn new(prober: Arc<P>) -> Self {
        Self { prober }
    }

    /// Effective pool size: explicit count coerced to at least one, otherwise
    /// one worker per host capped at [`MAX_DEFAULT_WORKERS`]
    pub fn worker_count(host_count: usize, max_workers: Option<usize>) -> usize {
        match max_workers {
            Some(workers) => workers.max(1),
            None => host_count.clamp(1, MAX_DEFAULT_WORKERS),
        }
    }

    /// Probe every host. Results arrive in completion order; correlate by
    /// `host.ip`. A failing host carries its error and never stops siblings.
    pub async fn scan_all(
        &self,
        hosts: Vec<Host>,
        ports: &[String],
        options: &ProbeOptions,
        max_workers: Option<usize>,
    ) -> Vec<HostScan> {
        self.scan_all_with(hosts, ports, options, max_workers, |_| {}).await
    }

    /// Like [`scan_all`](Self::scan_all), invoking `on_complete` as each host
    /// finishes
    pub async fn scan_all_with<F>(
        &self,
        hosts: Vec<Host>,
        ports: &[String],
        options: &ProbeOptions,
        max_workers: Option<usize>,
        mut on_complete: F,
    ) -> Vec<HostScan>
    where
        F: FnMut(&HostScan),
    {
        if hosts.is_empty() {
            return Vec::new();
        }

        let total = hosts.len();
        let workers = Self::worker_count(total, max_workers);
        info!("Scanning {} hosts with {} workers", total, workers);

        let semaphore = Arc::new(Semaphore::new(workers));
        let ports = Arc::new(ports.to_vec());
        let options = Arc::new(options.clone());
        let mut pending = FuturesUnordered::new();

        for host in hosts {
            let prober = Arc::clone(&self.prober);
            let semaphore = Arc::clone(&semaphore);
            let ports = Arc::clone(&ports);
            let options = Arc::clone(&options);
            let ip = host.ip.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ScanError::WorkerFailed(format!("Failed to acquire semaphore: {}", e)))?;
                prober.probe(&ip, &ports, &options).await
            });

            pending.push(async move { (host, handle.await) });
        }

        let mut results = Vec::with_capacity(total);
        while let Some((host, joined)) = pending.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(ScanError::WorkerFailed(format!("Task join error: {}", e))),
            };
            if let Err(e) = &result {
                warn!("Probe of {} failed: {}", host.ip, e);
            }

            let scan = HostScan::new(host, result);
            on_complete(&scan);
            results.push(scan);
        }

        let failed = results.iter().filter(|r| !r.is_ok()).count();
        info!("Scan finished: {} hosts, {} failed", total, failed);
        results
    }
}

/// Discover hosts on `subnet` and probe each of them.
///
/// `ports` of `None` uses the configured default LAN port list. Discovery
/// failure fails the whole call; individual probe failures stay per host.
/// `on_complete` sees each finished host together with the number of hosts
/// discovered.
pub async fn lan_scan<P, F>(
    discoverer: &HostDiscoverer,
    coordinator: &ScanCoordinator<P>,
    subnet: &str,
    ports: Option<Vec<String>>,
    options: &ProbeOptions,
    max_workers: Option<usize>,
    mut on_complete: F,
) -> Result<Vec<HostScan>>
where
    P: HostProber + ?Sized + 'static,
    F: FnMut(&HostScan, usize),
{
    let hosts = discoverer.discover(subnet).await?;
    let total = hosts.len();
    let ports = ports.unwrap_or_else(|| discoverer.config().default_ports.clone());
    Ok(coordinator
        .scan_all_with(hosts, &ports, options, max_workers, |scan| on_complete(scan, total))
        .await)
}
