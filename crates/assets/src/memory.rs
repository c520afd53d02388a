use crate::{AssetError, AssetResolver};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// In-memory text assets, keyed by sub-path.
///
/// Backs the built-in shader bundle and tests. Entries can be replaced at
/// runtime, which is how hot reload is exercised without a file watcher.
#[derive(Debug, Default)]
pub struct MemoryAssets {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, sub_path: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(sub_path, text);
        self
    }

    /// Add or replace an entry.
    pub fn insert(&self, sub_path: impl Into<String>, text: impl Into<String>) {
        self.entries.write().insert(sub_path.into(), text.into());
    }

    pub fn remove(&self, sub_path: &str) -> Option<String> {
        self.entries.write().remove(sub_path)
    }

    pub fn contains(&self, sub_path: &str) -> bool {
        self.entries.read().contains_key(sub_path)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl AssetResolver for MemoryAssets {
    fn resolve(&self, sub_path: &str, variant: Option<&str>) -> Result<PathBuf, AssetError> {
        if !self.contains(sub_path) {
            return Err(AssetError::NotFound(sub_path.to_string()));
        }
        match variant {
            None => Ok(PathBuf::from("memory").join(sub_path)),
            Some(variant) => Err(AssetError::NoGenerator {
                sub_path: sub_path.to_string(),
                variant: variant.to_string(),
            }),
        }
    }

    fn read_to_string(&self, sub_path: &str) -> Result<String, AssetError> {
        self.entries
            .read()
            .get(sub_path)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(sub_path.to_string()))
    }
}
