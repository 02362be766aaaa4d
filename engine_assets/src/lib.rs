//! `engine_assets`
//!
//! Keyed asynchronous asset loading.
//!
//! Design goals:
//! - At most one backend fetch per key, no matter how many callers ask.
//! - Loaded assets are memoized for the lifetime of the cache; failures are not.
//! - Failures are explicit values, never silently defaulted.
//! - The catalog is a trait ([`backend::Backend`]) so engines and tests inject their own.
//! - No `unsafe`.

pub mod backend;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod instantiate;
pub mod key;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::backend::{AssetHandle, Backend, DirectoryBackend, ErasedAsset, FetchedAsset};
    pub use crate::batch::{BatchLoader, BatchProgress, BatchReport};
    pub use crate::cache::{LoadedResource, ResourceCache};
    pub use crate::config::CacheConfig;
    pub use crate::error::LoadError;
    pub use crate::instantiate::{instantiate, Prefab};
    pub use crate::key::{AssetType, ResourceKey};
}
