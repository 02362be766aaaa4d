//! Test support for the asset cache integration tests.
//!
//! [`MockBackend`] is a scripted in-memory catalog. It records every call,
//! can hold fetches behind a gate to create real overlap between requests,
//! and can be told to fail a key a number of times before succeeding.

use std::{
    any::Any,
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use engine_assets::prelude::*;
use tokio::sync::watch;

/// Label entry in the mock catalog.
#[derive(Debug, Clone, Default)]
pub struct MockLabel {
    pub download_size: u64,
    /// `Ok(ok)` returned from the download call; `None` makes it error.
    pub download_result: Option<bool>,
    pub keys: Vec<String>,
}

#[derive(Default)]
struct Calls {
    fetches: Vec<(String, AssetType)>,
    size_queries: Vec<String>,
    downloads: Vec<String>,
    enumerations: Vec<String>,
    released: Vec<AssetHandle>,
}

/// Scripted backend.
pub struct MockBackend {
    assets: HashMap<String, FetchedAsset>,
    labels: HashMap<String, MockLabel>,
    failures: Mutex<HashMap<String, usize>>,
    panics: Vec<String>,
    calls: Mutex<Calls>,
    gate: watch::Sender<bool>,
    next_handle: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        MockBackend {
            assets: HashMap::new(),
            labels: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            panics: Vec::new(),
            calls: Mutex::new(Calls::default()),
            gate,
            next_handle: AtomicUsize::new(1),
        }
    }

    /// Serves `value` for the backend key `key`.
    pub fn with_asset<T: Any + Send + Sync>(self, key: &str, value: T) -> Self {
        self.with_fetched(key, FetchedAsset::new(value))
    }

    pub fn with_fetched(mut self, key: &str, asset: FetchedAsset) -> Self {
        self.assets.insert(key.to_string(), asset);
        self
    }

    pub fn with_label(mut self, label: &str, spec: MockLabel) -> Self {
        self.labels.insert(label.to_string(), spec);
        self
    }

    /// Fails the next `times` fetches of `key` with a transient error.
    pub fn failing(self, key: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(key.to_string(), times);
        self
    }

    /// Panics inside the fetch of `key`.
    pub fn panicking(mut self, key: &str) -> Self {
        self.panics.push(key.to_string());
        self
    }

    /// Holds every fetch until [`open_gate`](Self::open_gate) is called.
    pub fn gated(self) -> Self {
        self.gate.send_replace(false);
        self
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub fn fetch_log(&self) -> Vec<(String, AssetType)> {
        self.calls.lock().unwrap().fetches.clone()
    }

    pub fn fetch_count(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .fetches
            .iter()
            .filter(|(k, _)| k == key)
            .count()
    }

    pub fn total_fetches(&self) -> usize {
        self.calls.lock().unwrap().fetches.len()
    }

    pub fn size_queries(&self) -> usize {
        self.calls.lock().unwrap().size_queries.len()
    }

    pub fn downloads(&self) -> usize {
        self.calls.lock().unwrap().downloads.len()
    }

    pub fn enumerations(&self) -> usize {
        self.calls.lock().unwrap().enumerations.len()
    }

    pub fn released(&self) -> Vec<AssetHandle> {
        self.calls.lock().unwrap().released.clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn download_size(&self, label: &str) -> anyhow::Result<u64> {
        self.calls
            .lock()
            .unwrap()
            .size_queries
            .push(label.to_string());
        self.labels
            .get(label)
            .map(|l| l.download_size)
            .ok_or_else(|| anyhow::anyhow!("unknown label {label}"))
    }

    async fn download_dependencies(&self, label: &str) -> anyhow::Result<bool> {
        self.calls.lock().unwrap().downloads.push(label.to_string());
        match self.labels.get(label).and_then(|l| l.download_result) {
            Some(ok) => Ok(ok),
            None => anyhow::bail!("download of {label} interrupted"),
        }
    }

    async fn enumerate_keys(
        &self,
        label: &str,
        ty: AssetType,
    ) -> anyhow::Result<Vec<(ResourceKey, AssetType)>> {
        self.calls
            .lock()
            .unwrap()
            .enumerations
            .push(label.to_string());
        let spec = self
            .labels
            .get(label)
            .ok_or_else(|| anyhow::anyhow!("unknown label {label}"))?;
        Ok(spec
            .keys
            .iter()
            .map(|k| (ResourceKey::new(k.as_str()), ty))
            .collect())
    }

    async fn fetch(
        &self,
        key: &ResourceKey,
        ty: AssetType,
    ) -> anyhow::Result<Option<FetchedAsset>> {
        self.calls
            .lock()
            .unwrap()
            .fetches
            .push((key.to_string(), ty));

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        if self.panics.iter().any(|k| k == key.as_str()) {
            panic!("scripted panic fetching {key}");
        }
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(key.as_str()) {
                if *left > 0 {
                    *left -= 1;
                    anyhow::bail!("connection reset fetching {key}");
                }
            }
        }

        let handle = AssetHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) as u64);
        Ok(self
            .assets
            .get(key.as_str())
            .cloned()
            .map(|asset| asset.with_handle(handle)))
    }

    fn release(&self, handle: AssetHandle) {
        self.calls.lock().unwrap().released.push(handle);
    }
}

/// Polls `cond` until it holds, failing after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 2s"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Installs a test log writer once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}
