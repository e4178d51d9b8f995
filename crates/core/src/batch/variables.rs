//! Per-item variable resolution.

use std::collections::BTreeMap;
use std::path::Path;

use super::error::BatchError;

/// Named values derived from one item identifier.
///
/// Created fresh per item and discarded after expansion; never shared
/// between items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSet {
    values: BTreeMap<String, String>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Turns an opaque item identifier into template variables.
///
/// Implementations declare their keys up front so a template can be checked
/// before any item is processed, even when the item list is empty.
pub trait VariableResolver: Send + Sync {
    /// Keys every resolved set will contain.
    fn keys(&self) -> &[&'static str];

    /// Derives the variable set for one item.
    ///
    /// Fails only for structurally malformed identifiers; an error aborts the
    /// whole stage before any command runs.
    fn resolve(&self, item: &str) -> Result<VariableSet, BatchError>;
}

/// Key for the item identifier as given.
pub const ITEM_PATH: &str = "itemPath";
/// Key for the directory containing the item.
pub const ITEM_DIR: &str = "itemDir";
/// Key for the final path component.
pub const ITEM_NAME: &str = "itemName";
/// Key for the file name without its extension.
pub const ITEM_STEM: &str = "itemStem";
/// Key for the extension without the leading dot.
pub const ITEM_EXT: &str = "itemExt";

const PATH_KEYS: &[&str] = &[ITEM_PATH, ITEM_DIR, ITEM_NAME, ITEM_STEM, ITEM_EXT];

/// Resolves path-like identifiers into location variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver;

impl PathResolver {
    pub fn new() -> Self {
        Self
    }
}

impl VariableResolver for PathResolver {
    fn keys(&self) -> &[&'static str] {
        PATH_KEYS
    }

    fn resolve(&self, item: &str) -> Result<VariableSet, BatchError> {
        if item.is_empty() {
            return Err(BatchError::invalid_item(item, "empty identifier"));
        }

        let path = Path::new(item);

        // A bare file name has an empty parent; the root has none at all.
        let dir = match path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => ".".to_string(),
            Some(parent) => parent.to_string_lossy().into_owned(),
            None => item.to_string(),
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(VariableSet::new()
            .with(ITEM_PATH, item)
            .with(ITEM_DIR, dir)
            .with(ITEM_NAME, name)
            .with(ITEM_STEM, stem)
            .with(ITEM_EXT, ext))
    }
}
