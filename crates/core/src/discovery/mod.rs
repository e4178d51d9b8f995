//! Discovery of the master files a pipeline run works on.
//!
//! Walks a batch folder for files whose name matches a glob (by default
//! `OBJ.*`). Stages either take those files as items or the distinct
//! directories containing them, one directory per page.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::batch::ItemList;

/// What a stage's items are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// The matching files themselves.
    #[default]
    Files,
    /// The distinct directories containing matching files.
    ///
    /// The directory is the item path; templates name it `{itemPath}`.
    Dirs,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Batch folder not found: {0}")]
    RootNotFound(PathBuf),

    #[error("Invalid file pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Finds items under `root`, sorted for deterministic logging.
///
/// Unreadable entries are logged and skipped.
pub fn discover_items(root: &Path, pattern: &str, kind: ItemKind) -> Result<ItemList, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootNotFound(root.to_path_buf()));
    }
    let matcher = Pattern::new(pattern).map_err(|e| DiscoveryError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut found = BTreeSet::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry during discovery: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !matcher.matches(&name) {
            continue;
        }

        let item = match kind {
            ItemKind::Files => entry.path().to_path_buf(),
            ItemKind::Dirs => match entry.path().parent() {
                Some(parent) => parent.to_path_buf(),
                None => continue,
            },
        };
        found.insert(item.to_string_lossy().into_owned());
    }

    tracing::debug!(
        root = %root.display(),
        pattern,
        kind = ?kind,
        count = found.len(),
        "Discovered items"
    );
    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn batch_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for page in ["issue-1/1", "issue-1/2", "issue-2/1"] {
            let page_dir = dir.path().join(page);
            fs::create_dir_all(&page_dir).unwrap();
            fs::write(page_dir.join("OBJ.tif"), b"tiff").unwrap();
            fs::write(page_dir.join("TN.jpg"), b"jpeg").unwrap();
        }
        fs::create_dir_all(dir.path().join("issue-2/OBJ.dir")).unwrap();
        dir
    }

    #[test]
    fn test_discover_files() {
        let dir = batch_tree();
        let items = discover_items(dir.path(), "OBJ.*", ItemKind::Files).unwrap();

        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.ends_with("OBJ.tif")));
        let sorted: Vec<&str> = {
            let mut v: Vec<&str> = items.iter().collect();
            v.sort();
            v
        };
        assert_eq!(items.iter().collect::<Vec<_>>(), sorted);
    }

    #[test]
    fn test_discover_dirs() {
        let dir = batch_tree();
        let items = discover_items(dir.path(), "OBJ.*", ItemKind::Dirs).unwrap();

        assert_eq!(items.len(), 3);
        assert!(items.iter().any(|i| i.ends_with("issue-1/2")));
        assert!(items.iter().all(|i| Path::new(i).join("OBJ.tif").exists()));
    }

    #[test]
    fn test_discover_no_matches_is_empty() {
        let dir = batch_tree();
        let items = discover_items(dir.path(), "MODS.xml", ItemKind::Files).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_missing_root() {
        let err = discover_items(Path::new("/nonexistent/batch"), "OBJ.*", ItemKind::Files)
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::RootNotFound(_)));
    }

    #[test]
    fn test_invalid_pattern() {
        let dir = batch_tree();
        let err = discover_items(dir.path(), "OBJ.[", ItemKind::Files).unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidPattern { .. }));
    }
}
