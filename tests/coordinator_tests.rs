//! ScanCoordinator worker pool tests
//! A recording prober stands in for nmap so concurrency can be observed

use async_trait::async_trait;
use lanscore::{Host, HostProber, HostScan, ProbeOptions, ScanCoordinator, ScanError, ScanResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingProber {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    ports_seen: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl HostProber for RecordingProber {
    async fn probe(&self, host: &str, ports: &[String], _options: &ProbeOptions) -> lanscore::Result<ScanResult> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ports_seen.lock().unwrap().push(ports.to_vec());

        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if host.ends_with(".13") {
            return Err(ScanError::ToolExecutionError(format!("Failed to resolve \"{}\".", host)));
        }
        if host.ends_with(".66") {
            panic!("prober crashed on {}", host);
        }
        Ok(ScanResult {
            os: String::new(),
            ports: vec![lanscore::PortResult::new("22", lanscore::PortState::Open)],
        })
    }
}

fn hosts(count: usize) -> Vec<Host> {
    (1..=count).map(|i| Host::new(format!("10.0.0.{}", i))).collect()
}

fn ports() -> Vec<String> {
    vec!["22".to_string(), "80".to_string()]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_bound_is_respected() {
    let prober = Arc::new(RecordingProber::default());
    let coordinator = ScanCoordinator::new(Arc::clone(&prober));

    let results = coordinator
        .scan_all(hosts(20), &ports(), &ProbeOptions::default(), Some(3))
        .await;

    assert_eq!(results.len(), 20);
    assert_eq!(prober.calls.load(Ordering::SeqCst), 20);
    let peak = prober.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {}", peak);
    assert!(peak >= 2, "pool never ran in parallel");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_result_per_host() {
    let prober = Arc::new(RecordingProber::default());
    let coordinator = ScanCoordinator::new(prober);

    let results = coordinator
        .scan_all(hosts(12), &ports(), &ProbeOptions::default(), None)
        .await;

    let ips: HashSet<&str> = results.iter().map(|r| r.host.ip.as_str()).collect();
    assert_eq!(ips.len(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_host_does_not_affect_siblings() {
    let prober = Arc::new(RecordingProber::default());
    let coordinator = ScanCoordinator::new(prober);

    let results = coordinator
        .scan_all(hosts(15), &ports(), &ProbeOptions::default(), Some(4))
        .await;

    assert_eq!(results.len(), 15);
    let failed: Vec<&HostScan> = results.iter().filter(|r| !r.is_ok()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].host.ip, "10.0.0.13");
    assert_eq!(failed[0].error().map(ScanError::kind), Some("tool_execution_error"));

    for scan in results.iter().filter(|r| r.is_ok()) {
        assert_eq!(scan.result.as_ref().unwrap().open_port_ids(), vec!["22".to_string()]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_worker_becomes_host_error() {
    let prober = Arc::new(RecordingProber::default());
    let coordinator = ScanCoordinator::new(prober);

    let mut targets = hosts(3);
    targets.push(Host::new("10.0.0.66"));
    let results = coordinator
        .scan_all(targets, &ports(), &ProbeOptions::default(), Some(2))
        .await;

    assert_eq!(results.len(), 4);
    let crashed = results.iter().find(|r| r.host.ip == "10.0.0.66").unwrap();
    assert!(matches!(crashed.error(), Some(ScanError::WorkerFailed(_))));
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
}

#[tokio::test]
async fn test_zero_workers_still_progresses() {
    let prober = Arc::new(RecordingProber::default());
    let coordinator = ScanCoordinator::new(Arc::clone(&prober));

    let results = coordinator
        .scan_all(hosts(3), &ports(), &ProbeOptions::default(), Some(0))
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(prober.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_host_list() {
    let prober = Arc::new(RecordingProber::default());
    let coordinator = ScanCoordinator::new(Arc::clone(&prober));

    let results = coordinator
        .scan_all(Vec::new(), &ports(), &ProbeOptions::default(), None)
        .await;

    assert!(results.is_empty());
    assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_completion_callback_sees_every_host() {
    let prober = Arc::new(RecordingProber::default());
    let coordinator = ScanCoordinator::new(prober);

    let mut seen = Vec::new();
    let results = coordinator
        .scan_all_with(hosts(5), &ports(), &ProbeOptions::default(), Some(2), |scan| {
            seen.push(scan.host.ip.clone())
        })
        .await;

    assert_eq!(seen.len(), 5);
    let order: Vec<String> = results.iter().map(|r| r.host.ip.clone()).collect();
    assert_eq!(seen, order);
}

#[tokio::test]
async fn test_host_scan_serializes_flat_record() {
    let prober = Arc::new(RecordingProber::default());
    let coordinator = ScanCoordinator::new(prober);

    let results = coordinator
        .scan_all(vec![Host::new("10.0.0.13").with_mac("aa:bb:cc:dd:ee:ff")], &ports(), &ProbeOptions::default(), None)
        .await;

    let json = serde_json::to_value(&results[0]).unwrap();
    assert_eq!(json["ip"], "10.0.0.13");
    assert_eq!(json["mac"], "aa:bb:cc:dd:ee:ff");
    assert_eq!(json["error"]["kind"], "tool_execution_error");
    assert!(json["error"]["message"].as_str().unwrap().contains("10.0.0.13"));
}

#[cfg(unix)]
mod pipeline {
    use super::*;
    use lanscore::{lan_scan, HostDiscoverer, ToolConfig};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const TWO_HOSTS: &str = "<?xml version=\"1.0\"?>\n<nmaprun>\n\
        <host><status state=\"up\"/><address addr=\"10.1.0.1\" addrtype=\"ipv4\"/>\
        <hostnames><hostname name=\"a.lan\"/></hostnames></host>\n\
        <host><status state=\"up\"/><address addr=\"10.1.0.2\" addrtype=\"ipv4\"/>\
        <hostnames><hostname name=\"b.lan\"/></hostnames></host>\n</nmaprun>\n";

    #[tokio::test]
    async fn test_lan_scan_uses_default_ports() {
        let dir = TempDir::new().unwrap();
        let nmap = dir.path().join("nmap");
        std::fs::write(&nmap, format!("#!/bin/sh\ncat <<'XML'\n{}XML\n", TWO_HOSTS)).unwrap();
        std::fs::set_permissions(&nmap, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = ToolConfig::default().with_nmap_path(nmap);
        let expected_ports = config.default_ports.clone();
        let discoverer = HostDiscoverer::new(config);
        let prober = Arc::new(RecordingProber::default());
        let coordinator = ScanCoordinator::new(Arc::clone(&prober));

        let mut progress = Vec::new();
        let results = lan_scan(
            &discoverer,
            &coordinator,
            "10.1.0.0/24",
            None,
            &ProbeOptions::default(),
            None,
            |scan, total| progress.push((scan.host.ip.clone(), total)),
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 2);
        progress.sort();
        assert_eq!(
            progress,
            vec![("10.1.0.1".to_string(), 2), ("10.1.0.2".to_string(), 2)]
        );
        let seen = prober.ports_seen.lock().unwrap();
        assert!(seen.iter().all(|p| *p == expected_ports));
    }

    #[tokio::test]
    async fn test_lan_scan_fails_when_discovery_fails() {
        let discoverer = HostDiscoverer::new(ToolConfig::default().with_nmap_path("/nonexistent/nmap"));
        let prober = Arc::new(RecordingProber::default());
        let coordinator = ScanCoordinator::new(Arc::clone(&prober));

        let err = lan_scan(
            &discoverer,
            &coordinator,
            "10.1.0.0/24",
            None,
            &ProbeOptions::default(),
            None,
            |_, _| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::ToolNotFound(_)));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
    }
}
