//! Resource keys and type tags.

use std::{
    any::{Any, TypeId},
    borrow::Borrow,
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

/// Identifies a loadable asset in the backend catalog.
///
/// Equality is exact string match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        ResourceKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key addresses a sub-asset under the given marker.
    ///
    /// An empty marker disables the convention.
    pub fn is_sub_asset(&self, marker: &str) -> bool {
        !marker.is_empty() && self.0.contains(marker)
    }

    /// Key passed to the backend.
    ///
    /// Sub-asset keys become `{key}[{base}]` where `base` is the key with every
    /// occurrence of the marker removed (`icon.sprite` -> `icon.sprite[icon]`).
    /// Other keys are returned unchanged.
    pub fn normalized(&self, marker: &str) -> ResourceKey {
        if self.is_sub_asset(marker) {
            ResourceKey(format!("{}[{}]", self.0, self.0.replace(marker, "")))
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceKey {
    fn from(s: &str) -> Self {
        ResourceKey(s.to_string())
    }
}

impl From<String> for ResourceKey {
    fn from(s: String) -> Self {
        ResourceKey(s)
    }
}

/// Runtime type tag for a resource request.
#[derive(Debug, Clone, Copy)]
pub struct AssetType {
    id: TypeId,
    name: &'static str,
}

impl AssetType {
    pub fn of<T: Any>() -> Self {
        AssetType {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for AssetType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AssetType {}

impl Hash for AssetType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprite_key_is_normalized() {
        let key = ResourceKey::new("icon.sprite");
        assert!(key.is_sub_asset(".sprite"));
        assert_eq!(key.normalized(".sprite").as_str(), "icon.sprite[icon]");
    }

    #[test]
    fn plain_key_is_unchanged() {
        let key = ResourceKey::new("hero.prefab");
        assert!(!key.is_sub_asset(".sprite"));
        assert_eq!(key.normalized(".sprite"), key);
    }

    #[test]
    fn marker_in_middle_of_key() {
        let key = ResourceKey::new("ui/button.sprite_pressed");
        assert_eq!(
            key.normalized(".sprite").as_str(),
            "ui/button.sprite_pressed[ui/button_pressed]"
        );
    }

    #[test]
    fn empty_marker_disables_convention() {
        let key = ResourceKey::new("icon.sprite");
        assert!(!key.is_sub_asset(""));
        assert_eq!(key.normalized(""), key);
    }

    #[test]
    fn asset_type_equality_by_type_id() {
        assert_eq!(AssetType::of::<String>(), AssetType::of::<String>());
        assert_ne!(AssetType::of::<String>(), AssetType::of::<u32>());
        assert!(AssetType::of::<u32>().is::<u32>());
        assert!(AssetType::of::<u32>().name().contains("u32"));
    }
}
