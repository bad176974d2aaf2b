//! Vendor resolution and cache tests

use async_trait::async_trait;
use lanscore::discovery::{MacVendorsApi, VendorDirectory, VendorSource};
use lanscore::ScanError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct SlowSource {
    answer: Option<&'static str>,
    calls: AtomicUsize,
}

impl SlowSource {
    fn answering(answer: &'static str) -> Arc<Self> {
        Arc::new(Self { answer: Some(answer), calls: AtomicUsize::new(0) })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self { answer: None, calls: AtomicUsize::new(0) })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorSource for SlowSource {
    async fn fetch(&self, mac: &str) -> lanscore::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.answer
            .map(str::to_string)
            .ok_or_else(|| ScanError::LookupFailure(format!("{} not found", mac)))
    }
}

#[tokio::test]
async fn test_lookup_is_idempotent_and_cached() {
    let source = SlowSource::answering("Acme Corp");
    let directory = VendorDirectory::new(None, Some(source.clone()));

    assert_eq!(directory.lookup("aa:bb:cc:00:00:01").await, "Acme Corp");
    assert_eq!(directory.lookup("AA-BB-CC-99-99-99").await, "Acme Corp");
    assert_eq!(directory.lookup("aabbcc123456").await, "Acme Corp");

    assert_eq!(source.calls(), 1);
    assert_eq!(directory.cache().get("AABBCC").as_deref(), Some("Acme Corp"));
    assert_eq!(directory.cache().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups_share_one_fetch() {
    let source = SlowSource::answering("Acme Corp");
    let directory = Arc::new(VendorDirectory::new(None, Some(source.clone())));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let directory = Arc::clone(&directory);
            tokio::spawn(async move { directory.lookup(&format!("aa:bb:cc:00:00:{:02x}", i)).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), "Acme Corp");
    }
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_failed_lookup_is_cached_as_empty() {
    let source = SlowSource::failing();
    let directory = VendorDirectory::new(None, Some(source.clone()));

    assert_eq!(directory.lookup("00:de:ad:be:ef:00").await, "");
    assert_eq!(directory.lookup("00:de:ad:be:ef:01").await, "");
    assert_eq!(source.calls(), 1);
    assert_eq!(directory.cache().get("00DEAD").as_deref(), Some(""));
}

#[tokio::test]
async fn test_local_database_wins_over_remote() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("oui.txt");
    std::fs::write(
        &db,
        "OUI/MA-L                                                    Organization\n\
         00-11-22   (hex)\t\tCIMSYS Inc\n\
         001122     (base 16)\t\tCIMSYS Inc\n\
         F4:F5:D8 Google, Inc.\n",
    )
    .unwrap();

    let source = SlowSource::answering("Remote Name");
    let directory = VendorDirectory::new(Some(db), Some(source.clone()));

    assert_eq!(directory.lookup("00:11:22:33:44:55").await, "CIMSYS Inc");
    assert_eq!(directory.lookup("f4:f5:d8:01:02:03").await, "Google, Inc.");
    assert_eq!(source.calls(), 0);

    assert_eq!(directory.lookup("12:34:56:78:9a:bc").await, "Remote Name");
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_short_mac_is_not_looked_up() {
    let source = SlowSource::answering("Acme Corp");
    let directory = VendorDirectory::new(None, Some(source.clone()));

    assert_eq!(directory.lookup("aa:bb").await, "");
    assert_eq!(directory.lookup("").await, "");
    assert_eq!(source.calls(), 0);
    assert!(directory.cache().is_empty());
}

#[tokio::test]
async fn test_unreachable_vendor_service_fails_lookup() {
    let api = MacVendorsApi::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    let err = api.fetch("aa:bb:cc:dd:ee:ff").await.unwrap_err();
    assert!(matches!(err, ScanError::LookupFailure(_)));

    let directory = VendorDirectory::new(None, Some(Arc::new(api)));
    assert_eq!(directory.lookup("aa:bb:cc:dd:ee:ff").await, "");
}
