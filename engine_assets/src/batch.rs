//! Label batch loading.
//!
//! A label names a group of keys in the backend catalog. Loading a label is a
//! three step workflow:
//! 1. Download gate: fetch the label's dependencies if there is anything to
//!    download. Nothing else happens if this fails.
//! 2. Enumerate the label's keys (one backend call).
//! 3. Load each key through the [`ResourceCache`], in enumeration order,
//!    reporting progress after each key settles.
//!
//! Per-key failures are recorded in the [`BatchReport`] and do not stop the
//! batch. Once every key has settled the loader raises its `is_loaded` flag
//! and notifies completion listeners.

use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use tracing::{debug, info, warn};

use crate::{
    cache::ResourceCache,
    error::LoadError,
    key::{AssetType, ResourceKey},
};

/// Progress after one key of a batch has settled.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    pub label: String,
    pub key: ResourceKey,
    /// Keys settled so far, including this one.
    pub completed: usize,
    pub total: usize,
    /// Set if this key failed to load.
    pub error: Option<LoadError>,
}

impl BatchProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f32 / self.total as f32
        }
    }
}

/// Outcome of a finished batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub label: String,
    pub total: usize,
    /// Keys that loaded, in enumeration order.
    pub loaded: Vec<ResourceKey>,
    /// Keys that failed, in enumeration order.
    pub failed: Vec<(ResourceKey, LoadError)>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Completion listener.
pub type LoadedListener = Arc<dyn Fn(&BatchReport) + Send + Sync>;

/// Drives label loads through a shared [`ResourceCache`].
pub struct BatchLoader {
    cache: ResourceCache,
    loaded: AtomicBool,
    listeners: Mutex<Vec<LoadedListener>>,
}

impl BatchLoader {
    pub fn new(cache: ResourceCache) -> Self {
        BatchLoader {
            cache,
            loaded: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Whether a batch has run to completion.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Registers a listener called once after every completed batch.
    pub fn on_loaded(&self, listener: impl Fn(&BatchReport) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Downloads the label's dependencies if anything needs downloading.
    ///
    /// Returns the number of bytes downloaded; `0` means nothing was needed
    /// and the backend download was skipped.
    pub async fn download_dependencies(&self, label: &str) -> Result<u64, LoadError> {
        let backend = self.cache.backend();
        let failed = |cause: Option<anyhow::Error>| LoadError::DependencyDownloadFailed {
            label: label.to_string(),
            cause: cause.map(Arc::new),
        };

        let size = backend
            .download_size(label)
            .await
            .map_err(|e| failed(Some(e.context("query download size"))))?;
        if size == 0 {
            debug!(label, "no dependencies to download");
            return Ok(0);
        }

        debug!(label, size, "downloading dependencies");
        match backend.download_dependencies(label).await {
            Ok(true) => Ok(size),
            Ok(false) => {
                warn!(label, size, "dependency download did not succeed");
                Err(failed(None))
            }
            Err(e) => {
                warn!(label, size, error = %e, "dependency download failed");
                Err(failed(Some(e)))
            }
        }
    }

    /// Loads every key under `label`.
    ///
    /// Keys following the sub-asset convention are loaded as `sub_asset_ty`,
    /// everything else as the type the backend enumerated (normally `ty`).
    /// `on_progress` runs after each key settles, in enumeration order.
    pub async fn load_all<F>(
        &self,
        label: &str,
        ty: AssetType,
        sub_asset_ty: AssetType,
        mut on_progress: F,
    ) -> Result<BatchReport, LoadError>
    where
        F: FnMut(&BatchProgress),
    {
        self.download_dependencies(label).await?;

        let entries = self
            .cache
            .backend()
            .enumerate_keys(label, ty)
            .await
            .map_err(|e| LoadError::backend(ResourceKey::new(label), e.context("enumerate keys")))?;

        let total = entries.len();
        let mut report = BatchReport {
            label: label.to_string(),
            total,
            ..Default::default()
        };
        debug!(label, total, "loading label");

        for (completed, (key, entry_ty)) in entries.into_iter().enumerate() {
            let load_ty = if self.cache.is_sub_asset(&key) {
                sub_asset_ty
            } else {
                entry_ty
            };

            let error = match self.cache.load_erased(key.clone(), load_ty).await {
                Ok(_) => {
                    report.loaded.push(key.clone());
                    None
                }
                Err(err) => {
                    warn!(label, key = %key, error = %err, "asset failed to load");
                    report.failed.push((key.clone(), err.clone()));
                    Some(err)
                }
            };

            on_progress(&BatchProgress {
                label: label.to_string(),
                key,
                completed: completed + 1,
                total,
                error,
            });
        }

        self.loaded.store(true, Ordering::Release);
        info!(
            label,
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "label loaded"
        );

        // Snapshot so listeners may register more listeners.
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener(&report);
        }

        Ok(report)
    }

    /// Typed form of [`load_all`](Self::load_all).
    pub async fn load_all_typed<T, S, F>(
        &self,
        label: &str,
        on_progress: F,
    ) -> Result<BatchReport, LoadError>
    where
        T: Any + Send + Sync,
        S: Any + Send + Sync,
        F: FnMut(&BatchProgress),
    {
        self.load_all(label, AssetType::of::<T>(), AssetType::of::<S>(), on_progress)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::backend::{Backend, FetchedAsset};

    /// Label `L` holds `a`, `b.sprite` and `missing`; download size is 10.
    struct LabelBackend {
        download_ok: bool,
    }

    #[async_trait]
    impl Backend for LabelBackend {
        async fn download_size(&self, _label: &str) -> anyhow::Result<u64> {
            Ok(10)
        }

        async fn download_dependencies(&self, _label: &str) -> anyhow::Result<bool> {
            Ok(self.download_ok)
        }

        async fn enumerate_keys(
            &self,
            _label: &str,
            ty: AssetType,
        ) -> anyhow::Result<Vec<(ResourceKey, AssetType)>> {
            Ok(["a", "b.sprite", "missing"]
                .into_iter()
                .map(|k| (ResourceKey::new(k), ty))
                .collect())
        }

        async fn fetch(
            &self,
            key: &ResourceKey,
            ty: AssetType,
        ) -> anyhow::Result<Option<FetchedAsset>> {
            Ok(match key.as_str() {
                "a" if ty.is::<u32>() => Some(FetchedAsset::new(1u32)),
                "b.sprite[b]" if ty.is::<String>() => Some(FetchedAsset::new("b".to_string())),
                _ => None,
            })
        }
    }

    #[tokio::test]
    async fn load_all_records_failures_and_continues() {
        let cache = ResourceCache::new(Arc::new(LabelBackend { download_ok: true }));
        let loader = BatchLoader::new(cache.clone());

        let mut seen = Vec::new();
        let report = loader
            .load_all_typed::<u32, String, _>("L", |p| {
                seen.push((p.key.to_string(), p.completed, p.total, p.error.is_some()))
            })
            .await
            .unwrap();

        assert_eq!(
            seen,
            vec![
                ("a".to_string(), 1, 3, false),
                ("b.sprite".to_string(), 2, 3, false),
                ("missing".to_string(), 3, 3, true),
            ]
        );
        assert!(report.has_failures());
        assert_eq!(report.loaded.len(), 2);
        assert!(loader.is_loaded());
        assert_eq!(cache.try_get_cached::<String>("b.sprite").as_deref().map(String::as_str), Some("b"));
    }

    #[tokio::test]
    async fn failed_download_stops_batch() {
        let cache = ResourceCache::new(Arc::new(LabelBackend { download_ok: false }));
        let loader = BatchLoader::new(cache.clone());

        let mut calls = 0;
        let err = loader
            .load_all_typed::<u32, String, _>("L", |_| calls += 1)
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::DependencyDownloadFailed { .. }));
        assert_eq!(calls, 0);
        assert_eq!(cache.cached_len(), 0);
        assert!(!loader.is_loaded());
    }

    #[test]
    fn progress_fraction() {
        let p = BatchProgress {
            label: "L".into(),
            key: "a".into(),
            completed: 1,
            total: 4,
            error: None,
        };
        assert_eq!(p.fraction(), 0.25);
    }
}
