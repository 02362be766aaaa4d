//! Memoized, de-duplicated asset cache.
//!
//! `ResourceCache` maps raw keys to loaded records and tracks in-flight
//! fetches so that at most one backend fetch per key is outstanding:
//! - A cached key is returned without suspension and never re-fetched.
//! - The first miss for a key spawns one fetch task; later requests for the
//!   same key subscribe to that task's outcome instead of fetching again.
//! - Successes are memoized for the lifetime of the cache. Failures are not,
//!   so the next request for a failed key fetches again.
//!
//! The memo table and in-flight table sit behind one lock, which makes the
//! check-then-insert on a miss atomic. The lock is never held across an
//! `.await`.
//!
//! Fetches run in their own tokio task, so dropping a waiter never cancels
//! the fetch other waiters are attached to. A tokio runtime is required.

use std::{
    any::{type_name, Any},
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::watch;
use tracing::{debug, trace};

use crate::{
    backend::{AssetHandle, Backend, ErasedAsset, FetchedAsset},
    config::CacheConfig,
    error::LoadError,
    key::{AssetType, ResourceKey},
};

type Outcome = Result<Arc<LoadedResource>, LoadError>;

/// A successfully loaded asset. Immutable once created.
pub struct LoadedResource {
    key: ResourceKey,
    ty: AssetType,
    value: ErasedAsset,
    parts: Vec<ErasedAsset>,
    handle: AssetHandle,
}

impl LoadedResource {
    fn new(key: ResourceKey, ty: AssetType, fetched: FetchedAsset) -> Self {
        LoadedResource {
            key,
            ty,
            value: fetched.value,
            parts: fetched.parts,
            handle: fetched.handle,
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Type the record was loaded as.
    pub fn asset_type(&self) -> AssetType {
        self.ty
    }

    pub fn handle(&self) -> AssetHandle {
        self.handle
    }

    pub fn value(&self) -> &ErasedAsset {
        &self.value
    }

    /// Typed view of the value, falling back to the first matching part.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        std::iter::once(&self.value)
            .chain(self.parts.iter())
            .find_map(|asset| asset.clone().downcast::<T>().ok())
    }

    /// Like [`downcast`](Self::downcast), but a miss is a `TypeMismatch`.
    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>, LoadError> {
        self.downcast::<T>().ok_or_else(|| LoadError::TypeMismatch {
            key: self.key.clone(),
            expected: type_name::<T>(),
            found: self.ty.name(),
        })
    }

    fn provides(&self, ty: AssetType) -> bool {
        if self.ty == ty {
            return true;
        }
        std::iter::once(&self.value)
            .chain(self.parts.iter())
            .any(|asset| {
                let asset: &dyn Any = &**asset;
                asset.type_id() == ty.id()
            })
    }

    fn ensure_provides(&self, ty: AssetType) -> Result<(), LoadError> {
        if self.provides(ty) {
            Ok(())
        } else {
            Err(LoadError::TypeMismatch {
                key: self.key.clone(),
                expected: ty.name(),
                found: self.ty.name(),
            })
        }
    }
}

impl std::fmt::Debug for LoadedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedResource")
            .field("key", &self.key)
            .field("ty", &self.ty)
            .field("parts", &self.parts.len())
            .field("handle", &self.handle)
            .finish()
    }
}

#[derive(Default)]
struct CacheState {
    cached: HashMap<ResourceKey, Arc<LoadedResource>>,
    in_flight: HashMap<ResourceKey, watch::Sender<Option<Outcome>>>,
}

struct Inner {
    backend: Arc<dyn Backend>,
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (key, record) in state.cached.drain() {
            trace!(key = %key, handle = record.handle.0, "releasing asset handle");
            self.backend.release(record.handle);
        }
    }
}

/// Shared asset cache.
///
/// Cloning is cheap; all clones share the same tables. Backend handles are
/// released when the last clone is dropped.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<Inner>,
}

impl ResourceCache {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, CacheConfig::default())
    }

    pub fn with_config(backend: Arc<dyn Backend>, config: CacheConfig) -> Self {
        ResourceCache {
            inner: Arc::new(Inner {
                backend,
                config,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    /// Whether `key` uses the sub-asset convention.
    pub fn is_sub_asset(&self, key: &ResourceKey) -> bool {
        key.is_sub_asset(&self.inner.config.sub_asset_marker)
    }

    /// Cached value of `key` as `T`, or `None` if the key is not cached or
    /// holds no `T`. Never suspends and never touches the backend.
    pub fn try_get_cached<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.cached_record(key)?.downcast::<T>()
    }

    /// Strict variant of [`try_get_cached`](Self::try_get_cached):
    /// `NotFound` if the key is not cached, `TypeMismatch` if it holds no `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>, LoadError> {
        self.cached_record(key)
            .ok_or_else(|| LoadError::NotFound { key: key.into() })?
            .require::<T>()
    }

    /// Cached record for `key`, regardless of type.
    pub fn cached_record(&self, key: &str) -> Option<Arc<LoadedResource>> {
        self.inner.lock().cached.get(key).cloned()
    }

    /// Loads `key` as `T`, fetching from the backend on a miss.
    pub async fn load<T: Any + Send + Sync>(
        &self,
        key: impl Into<ResourceKey>,
    ) -> Result<Arc<T>, LoadError> {
        self.load_erased(key, AssetType::of::<T>())
            .await?
            .require::<T>()
    }

    /// Loads `key` as `ty`.
    ///
    /// Concurrent calls for the same key share one backend fetch and all
    /// receive the same record or the same error.
    pub async fn load_erased(
        &self,
        key: impl Into<ResourceKey>,
        ty: AssetType,
    ) -> Result<Arc<LoadedResource>, LoadError> {
        let key = key.into();

        let (mut rx, fetch) = {
            let mut state = self.inner.lock();
            if let Some(record) = state.cached.get(&key) {
                trace!(key = %key, "cache hit");
                record.ensure_provides(ty)?;
                return Ok(record.clone());
            }
            match state.in_flight.get(&key) {
                Some(tx) => {
                    debug!(key = %key, waiters = tx.receiver_count(), "joining in-flight fetch");
                    (tx.subscribe(), None)
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.in_flight.insert(key.clone(), tx);
                    let normalized = key.normalized(&self.inner.config.sub_asset_marker);
                    (rx, Some(normalized))
                }
            }
        };

        if let Some(normalized) = fetch {
            debug!(key = %key, backend_key = %normalized, ty = %ty, "starting fetch");
            let task = FetchTask {
                inner: self.inner.clone(),
                key: key.clone(),
                armed: true,
            };
            tokio::spawn(task.run(normalized, ty));
        }

        let published = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        let record = published.unwrap_or_else(|| Err(LoadError::Aborted { key: key.clone() }))?;
        record.ensure_provides(ty)?;
        Ok(record)
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.inner.lock().cached.contains_key(key)
    }

    /// Whether a backend fetch for `key` is outstanding.
    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.lock().in_flight.contains_key(key)
    }

    /// Number of callers waiting on the outstanding fetch for `key`.
    pub fn waiters(&self, key: &str) -> usize {
        self.inner
            .lock()
            .in_flight
            .get(key)
            .map_or(0, |tx| tx.receiver_count())
    }

    pub fn cached_len(&self) -> usize {
        self.inner.lock().cached.len()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// Cached keys, sorted.
    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.inner.lock().cached.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// One backend fetch. Removes its in-flight entry when dropped, so waiters
/// observe `Aborted` instead of hanging if the fetch panics.
struct FetchTask {
    inner: Arc<Inner>,
    key: ResourceKey,
    armed: bool,
}

impl FetchTask {
    async fn run(mut self, normalized: ResourceKey, ty: AssetType) {
        let outcome = match self.inner.backend.fetch(&normalized, ty).await {
            Ok(Some(fetched)) => Ok(Arc::new(LoadedResource::new(self.key.clone(), ty, fetched))),
            Ok(None) => Err(LoadError::NotFound {
                key: self.key.clone(),
            }),
            Err(cause) => Err(LoadError::backend(self.key.clone(), cause)),
        };

        let tx = {
            let mut state = self.inner.lock();
            if let Ok(record) = &outcome {
                state.cached.insert(self.key.clone(), record.clone());
            }
            state.in_flight.remove(&self.key)
        };
        self.armed = false;

        match &outcome {
            Ok(_) => debug!(key = %self.key, "fetch complete"),
            Err(err) => debug!(key = %self.key, error = %err, "fetch failed"),
        }
        if let Some(tx) = tx {
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for FetchTask {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().in_flight.remove(&self.key);
        }
    }
}
