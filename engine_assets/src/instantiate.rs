//! Prefab instantiation on top of the cache.

use crate::{cache::ResourceCache, error::LoadError};

/// A cached asset that can stamp out instances of itself.
pub trait Prefab: Send + Sync + 'static {
    type Instance;

    fn instantiate(&self) -> Self::Instance;
}

/// Instantiates the prefab cached under `key`.
///
/// The prefab must already be loaded; a missing or mismatched entry is
/// returned as an error rather than an empty instance.
pub fn instantiate<P: Prefab>(cache: &ResourceCache, key: &str) -> Result<P::Instance, LoadError> {
    let prefab = cache.get::<P>(key)?;
    Ok(prefab.instantiate())
}
