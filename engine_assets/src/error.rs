//! Load errors.
//!
//! Every waiter on a shared fetch receives the same outcome, so the error is
//! `Clone` and backend causes are kept behind an `Arc`.

use std::sync::Arc;

use thiserror::Error;

use crate::key::ResourceKey;

/// Errors surfaced by the cache and batch loader.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Backend has no asset for the key, or the key was never loaded.
    #[error("asset not found: {key}")]
    NotFound { key: ResourceKey },

    /// Key exists but holds a different type than requested.
    #[error("asset {key} is {found}, requested {expected}")]
    TypeMismatch {
        key: ResourceKey,
        expected: &'static str,
        found: &'static str,
    },

    /// Download gate for a label failed; no per-key loads were issued.
    #[error("dependency download failed for label {label}")]
    DependencyDownloadFailed {
        label: String,
        cause: Option<Arc<anyhow::Error>>,
    },

    /// Network/IO failure while talking to the backend. Not cached.
    #[error("backend failure for {key}: {cause}")]
    Backend {
        key: ResourceKey,
        cause: Arc<anyhow::Error>,
    },

    /// Fetch task ended without publishing a result.
    #[error("fetch for {key} was aborted")]
    Aborted { key: ResourceKey },
}

impl LoadError {
    pub(crate) fn backend(key: ResourceKey, cause: anyhow::Error) -> Self {
        LoadError::Backend {
            key,
            cause: Arc::new(cause),
        }
    }

    /// Whether calling `load` again for the same key may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoadError::Backend { .. } | LoadError::Aborted { .. })
    }

    /// Key the error refers to, if any.
    pub fn key(&self) -> Option<&ResourceKey> {
        match self {
            LoadError::NotFound { key }
            | LoadError::TypeMismatch { key, .. }
            | LoadError::Backend { key, .. }
            | LoadError::Aborted { key } => Some(key),
            LoadError::DependencyDownloadFailed { .. } => None,
        }
    }
}
