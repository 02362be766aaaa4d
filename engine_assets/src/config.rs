//! Cache configuration.
//!
//! Loads cache configuration from JSON strings (file IO left to app).

use serde::{Deserialize, Serialize};

/// Configuration shared by the cache and batch loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Key fragment marking a sub-asset key, e.g. `icon.sprite`.
    ///
    /// Keys containing the marker are fetched as `{key}[{base}]`, where
    /// `base` is the key with the marker removed.
    #[serde(default = "default_sub_asset_marker")]
    pub sub_asset_marker: String,
}

fn default_sub_asset_marker() -> String {
    ".sprite".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sub_asset_marker: default_sub_asset_marker(),
        }
    }
}

impl CacheConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
