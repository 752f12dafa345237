//! File-backed persistence for tiered and untiered asset lists.
//!
//! Each asset category keeps two JSON arrays on disk: the tiered file (the
//! curated classification) and the untiered file (detected-but-unclassified
//! entries awaiting triage). Writes go to a `.tmp` sibling and are renamed
//! over the target, so a crash mid-write never leaves a truncated store.

use std::path::Path;

use tracing::debug;

use super::assets::{sort_untiered, TieredAsset, UntieredAsset};
use crate::error::StoreError;

/// Read a tiered asset file.
///
/// An absent or empty file is initialized with an empty array and returned as
/// empty. Malformed JSON is unrecoverable and surfaces as [`StoreError::Parse`].
pub fn read_tiered(path: &Path) -> Result<Vec<TieredAsset>, StoreError> {
    read_assets(path)
}

/// Read an untiered asset file, with the same initialize-if-absent behavior.
pub fn read_untiered(path: &Path) -> Result<Vec<UntieredAsset>, StoreError> {
    read_assets(path)
}

/// Overwrite a tiered asset file with the passed list, pretty-printed.
pub fn write_tiered(path: &Path, assets: &[TieredAsset]) -> Result<(), StoreError> {
    write_assets(path, assets)
}

/// Append newly detected assets to the untiered file.
///
/// Entries whose id is already present are skipped — the untiered list is
/// append-only until a human removes entries. The file is re-sorted by
/// detection date, most recent first. Returns whether anything was added.
pub fn append_untiered(path: &Path, added: Vec<UntieredAsset>) -> Result<bool, StoreError> {
    let mut untiered = read_untiered(path)?;

    let new_assets: Vec<UntieredAsset> = added
        .into_iter()
        .filter(|asset| !untiered.iter().any(|existing| existing.id == asset.id))
        .collect();
    let updated = !new_assets.is_empty();

    untiered.extend(new_assets);
    sort_untiered(&mut untiered);
    write_assets(path, &untiered)?;

    Ok(updated)
}

fn read_assets<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;

        if !contents.trim().is_empty() {
            return serde_json::from_str(&contents).map_err(|e| StoreError::Parse {
                path: path.to_path_buf(),
                source: e,
            });
        }
    }

    debug!("initializing empty store at {}", path.display());
    write_raw(path, "[]")?;
    Ok(Vec::new())
}

fn write_assets<T: serde::Serialize>(path: &Path, assets: &[T]) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(assets).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    write_raw(path, &json)
}

/// Write to `<path>.tmp`, then rename over the target.
fn write_raw(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents).map_err(|e| StoreError::io(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::assets::{ApiEvent, AssetType};
    use tempfile::TempDir;

    fn tiered(id: &str) -> TieredAsset {
        TieredAsset {
            id: id.to_string(),
            asset_name: format!("Role {id}"),
            asset_type: AssetType::BuiltIn,
            assignable_scope: "/".to_string(),
            asset_definition: String::new(),
            documentation_uri: String::new(),
            tier: Some("1".to_string()),
        }
    }

    fn untiered(id: &str, date: &str) -> UntieredAsset {
        UntieredAsset {
            detected_on: date.parse().unwrap(),
            api_event: ApiEvent::Added,
            id: id.to_string(),
            asset_name: format!("Role {id}"),
            asset_type: AssetType::BuiltIn,
            assignable_scope: "/".to_string(),
            asset_definition: String::new(),
            documentation_uri: String::new(),
        }
    }

    #[test]
    fn test_missing_file_initialized_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiered-azure-roles.json");

        let assets = read_tiered(&path).unwrap();
        assert!(assets.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }

    #[test]
    fn test_empty_file_initialized_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiered.json");
        std::fs::write(&path, "  \n").unwrap();

        let assets = read_tiered(&path).unwrap();
        assert!(assets.is_empty());
    }

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiered.json");

        let assets = vec![tiered("a"), tiered("b")];
        write_tiered(&path, &assets).unwrap();
        let loaded = read_tiered(&path).unwrap();
        assert_eq!(loaded, assets);
    }

    #[test]
    fn test_malformed_json_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiered.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = read_tiered(&path).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn test_tmp_file_cleaned_up_after_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiered.json");
        write_tiered(&path, &[tiered("a")]).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_append_untiered_skips_known_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("untiered.json");
        std::fs::write(
            &path,
            serde_json::to_string(&[untiered("a", "2025-01-01")]).unwrap(),
        )
        .unwrap();

        let updated =
            append_untiered(&path, vec![untiered("a", "2025-06-01"), untiered("b", "2025-06-01")])
                .unwrap();
        assert!(updated);

        let assets = read_untiered(&path).unwrap();
        assert_eq!(assets.len(), 2);
        // Existing entry keeps its original detection date.
        let a = assets.iter().find(|x| x.id == "a").unwrap();
        assert_eq!(a.detected_on, "2025-01-01".parse().unwrap());
    }

    #[test]
    fn test_append_untiered_sorts_newest_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("untiered.json");

        append_untiered(&path, vec![untiered("old", "2024-01-01")]).unwrap();
        append_untiered(&path, vec![untiered("new", "2025-01-01")]).unwrap();

        let assets = read_untiered(&path).unwrap();
        assert_eq!(assets[0].id, "new");
        assert_eq!(assets[1].id, "old");
    }

    #[test]
    fn test_append_untiered_no_additions_reports_false() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("untiered.json");
        append_untiered(&path, vec![untiered("a", "2025-01-01")]).unwrap();

        let updated = append_untiered(&path, vec![untiered("a", "2025-02-01")]).unwrap();
        assert!(!updated);
    }
}
