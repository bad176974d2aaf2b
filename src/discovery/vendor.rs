//! Hardware vendor resolution from MAC address prefixes
//!
//! Lookups go cache → local OUI database → remote lookup service, and every
//! outcome, including "not found", is cached for the life of the process.

use crate::config::ToolConfig;
use crate::{Result, ScanError};
use async_trait::async_trait;
use log::{debug, warn};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OnceCell;

/// Number of hex digits in an OUI prefix
pub const PREFIX_LEN: usize = 6;

/// Process-wide prefix → vendor cache.
///
/// The map lock is held only long enough to fetch a prefix's cell; the cell
/// then guarantees the vendor is computed once even when many workers ask
/// for the same prefix at the same time.
#[derive(Debug, Default)]
pub struct VendorCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl VendorCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<OnceCell<String>>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached vendor for `prefix`, if one has been computed
    pub fn get(&self, prefix: &str) -> Option<String> {
        self.entries().get(prefix).and_then(|cell| cell.get().cloned())
    }

    /// Return the cached vendor or run `compute` exactly once to fill it
    pub async fn get_or_compute<F, Fut>(&self, prefix: &str, compute: F) -> String
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = String>,
    {
        let cell = {
            let mut entries = self.entries();
            Arc::clone(entries.entry(prefix.to_string()).or_default())
        };
        cell.get_or_init(compute).await.clone()
    }

    /// Number of resolved prefixes
    pub fn len(&self) -> usize {
        self.entries().values().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Remote vendor lookup used when the local database has no entry
#[async_trait]
pub trait VendorSource: Send + Sync {
    async fn fetch(&self, mac: &str) -> Result<String>;
}

/// Client for a `GET <base>/<mac>` plain-text lookup service such as
/// api.macvendors.com
#[derive(Debug, Clone)]
pub struct MacVendorsApi {
    client: reqwest::Client,
    base_url: String,
}

impl MacVendorsApi {
    pub fn new<S: Into<String>>(base_url: S, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::LookupFailure(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl VendorSource for MacVendorsApi {
    async fn fetch(&self, mac: &str) -> Result<String> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), mac);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ScanError::LookupFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScanError::LookupFailure(format!("{} returned {}", url, status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScanError::LookupFailure(e.to_string()))?;
        Ok(body.trim().to_string())
    }
}

/// Resolves MAC addresses to manufacturer names. Never fails; unknown
/// vendors come back as an empty string.
pub struct VendorDirectory {
    cache: VendorCache,
    oui_db: Option<PathBuf>,
    remote: Option<Arc<dyn VendorSource>>,
}

impl VendorDirectory {
    pub fn new(oui_db: Option<PathBuf>, remote: Option<Arc<dyn VendorSource>>) -> Self {
        Self {
            cache: VendorCache::new(),
            oui_db,
            remote,
        }
    }

    /// Local database plus the configured lookup service
    pub fn from_config(config: &ToolConfig) -> Self {
        let remote: Option<Arc<dyn VendorSource>> =
            match MacVendorsApi::new(config.vendor_api_url.clone(), config.vendor_api_timeout_duration()) {
                Ok(api) => Some(Arc::new(api)),
                Err(e) => {
                    warn!("Remote vendor lookup disabled: {}", e);
                    None
                }
            };
        Self::new(Some(config.oui_db.clone()), remote)
    }

    pub fn cache(&self) -> &VendorCache {
        &self.cache
    }

    /// Uppercase 6-hex-digit OUI prefix of `mac`, or `None` when too short
    pub fn prefix(mac: &str) -> Option<String> {
        let hex: String = mac
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .take(PREFIX_LEN)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        (hex.len() == PREFIX_LEN).then_some(hex)
    }

    /// Vendor for `mac`, or `""` when unknown or any lookup step fails
    pub async fn lookup(&self, mac: &str) -> String {
        let prefix = match Self::prefix(mac) {
            Some(prefix) => prefix,
            None => return String::new(),
        };
        self.cache
            .get_or_compute(&prefix, || self.resolve(mac, &prefix))
            .await
    }

    async fn resolve(&self, mac: &str, prefix: &str) -> String {
        if let Some(vendor) = self.lookup_local(prefix).await {
            debug!("Vendor for {} found in local database: {}", prefix, vendor);
            return vendor;
        }

        match &self.remote {
            Some(source) => match source.fetch(mac).await {
                Ok(vendor) => vendor,
                Err(e) => {
                    debug!("Vendor lookup for {} failed: {}", mac, e);
                    String::new()
                }
            },
            None => String::new(),
        }
    }

    async fn lookup_local(&self, prefix: &str) -> Option<String> {
        let path = self.oui_db.as_ref()?;
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("OUI database {} unavailable: {}", path.display(), e);
                return None;
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        text.lines().find_map(|line| parse_oui_line(line, prefix))
    }
}

/// Match one OUI database line against `prefix`.
///
/// Accepts `AABBCC Vendor`, `AA:BB:CC Vendor` and the IEEE
/// `AA-BB-CC   (hex)   Vendor` layouts.
fn parse_oui_line(line: &str, prefix: &str) -> Option<String> {
    let line = line.trim();
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let key: String = head
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if key != prefix {
        return None;
    }

    let rest = rest.trim();
    let vendor = rest
        .strip_prefix("(hex)")
        .or_else(|| rest.strip_prefix("(base 16)"))
        .unwrap_or(rest)
        .trim();
    Some(vendor.to_string())
}
