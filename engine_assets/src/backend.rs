//! Asset backend abstraction.
//!
//! The backend is the catalog/download system that actually produces assets.
//! The cache only ever talks to it through [`Backend`], so engines plug in
//! their own catalog and tests plug in scripted mocks.
//!
//! [`DirectoryBackend`] is a local catalog over a directory tree, used by the
//! `asset-tool` binary.

use std::{
    any::Any,
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{trace, warn};

use crate::key::{AssetType, ResourceKey};

/// Type-erased asset value.
pub type ErasedAsset = Arc<dyn Any + Send + Sync>;

/// Backend-issued handle; released by the cache at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AssetHandle(pub u64);

/// Result of a successful backend fetch.
#[derive(Clone)]
pub struct FetchedAsset {
    /// Primary asset value.
    pub value: ErasedAsset,
    /// Sub-objects reachable from the value (components of a prefab, etc.).
    pub parts: Vec<ErasedAsset>,
    pub handle: AssetHandle,
}

impl FetchedAsset {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_erased(Arc::new(value))
    }

    pub fn from_erased(value: ErasedAsset) -> Self {
        FetchedAsset {
            value,
            parts: Vec::new(),
            handle: AssetHandle::default(),
        }
    }

    /// Adds a sub-object that typed lookups fall back to.
    pub fn with_part<T: Any + Send + Sync>(mut self, part: T) -> Self {
        self.parts.push(Arc::new(part));
        self
    }

    pub fn with_handle(mut self, handle: AssetHandle) -> Self {
        self.handle = handle;
        self
    }
}

impl std::fmt::Debug for FetchedAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedAsset")
            .field("parts", &self.parts.len())
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Catalog/download capability consumed by the cache.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Bytes still to download before assets under `label` can be loaded.
    async fn download_size(&self, label: &str) -> anyhow::Result<u64>;

    /// Downloads everything `label` depends on. `Ok(false)` means the
    /// download finished unsuccessfully.
    async fn download_dependencies(&self, label: &str) -> anyhow::Result<bool>;

    /// Keys under `label` loadable as `ty`, in catalog order.
    async fn enumerate_keys(
        &self,
        label: &str,
        ty: AssetType,
    ) -> anyhow::Result<Vec<(ResourceKey, AssetType)>>;

    /// Fetches one asset. `Ok(None)` means the catalog has no such key;
    /// `Err` is a transient failure.
    async fn fetch(&self, key: &ResourceKey, ty: AssetType)
        -> anyhow::Result<Option<FetchedAsset>>;

    /// Releases a handle previously returned by [`Backend::fetch`].
    fn release(&self, _handle: AssetHandle) {}
}

/// Local catalog over a directory tree.
///
/// Layout: `<root>/<label>/<file>`. Keys are `<label>/<file>`, so a key is
/// also its path relative to the root. Files are served as [`Bytes`] or, if
/// requested, as UTF-8 [`String`].
pub struct DirectoryBackend {
    root: PathBuf,
    next_handle: AtomicU64,
}

impl DirectoryBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryBackend {
            root: root.into(),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a key to a file path, stripping any `[sub]` selector.
    fn resolve(&self, key: &ResourceKey) -> anyhow::Result<PathBuf> {
        let raw = key.as_str();
        let file = match raw.find('[') {
            Some(idx) if raw.ends_with(']') => &raw[..idx],
            _ => raw,
        };
        let rel = Path::new(file);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("key escapes catalog root: {key}");
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl Backend for DirectoryBackend {
    async fn download_size(&self, label: &str) -> anyhow::Result<u64> {
        let dir = self.root.join(label);
        let meta = tokio::fs::metadata(&dir)
            .await
            .with_context(|| format!("label directory {}", dir.display()))?;
        if !meta.is_dir() {
            bail!("label {label} is not a directory");
        }
        // Local files are already present.
        Ok(0)
    }

    async fn download_dependencies(&self, _label: &str) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn enumerate_keys(
        &self,
        label: &str,
        ty: AssetType,
    ) -> anyhow::Result<Vec<(ResourceKey, AssetType)>> {
        let dir = self.root.join(label);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("read label directory {}", dir.display()))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("read dir entry")? {
            if entry.file_type().await.context("file type")?.is_file() {
                match entry.file_name().into_string() {
                    Ok(name) => names.push(name),
                    Err(name) => warn!(label, name = ?name, "skipping non UTF-8 file name"),
                }
            }
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| (ResourceKey::new(format!("{label}/{name}")), ty))
            .collect())
    }

    async fn fetch(
        &self,
        key: &ResourceKey,
        ty: AssetType,
    ) -> anyhow::Result<Option<FetchedAsset>> {
        let path = self.resolve(key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        trace!(key = %key, bytes = data.len(), "read asset file");

        let handle = AssetHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let asset = if ty.is::<Bytes>() {
            FetchedAsset::new(Bytes::from(data))
        } else if ty.is::<String>() {
            let text = String::from_utf8(data).with_context(|| format!("{key} is not UTF-8"))?;
            FetchedAsset::new(text)
        } else {
            bail!("directory catalog cannot produce {ty}");
        };
        Ok(Some(asset.with_handle(handle)))
    }
}
