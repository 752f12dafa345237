//! Pure set-reconciliation over id-keyed asset collections.
//!
//! All functions are side-effect free and generic over anything implementing
//! [`Identified`]. `extended` is the newer/larger view, `base` the older one;
//! the Syncer enforces the `extended ⊇ base` count contract before merging.

use std::collections::HashSet;

use super::assets::{Identified, TieredAsset};

/// Assets present in `extended` but absent from `base`.
pub fn find_added<'a, E, B>(extended: &'a [E], base: &[B]) -> Vec<&'a E>
where
    E: Identified,
    B: Identified,
{
    let base_ids: HashSet<&str> = base.iter().map(Identified::id).collect();
    extended
        .iter()
        .filter(|asset| !base_ids.contains(asset.id()))
        .collect()
}

/// Assets present in `base` but absent from `extended`.
pub fn find_removed<'a, E, B>(extended: &[E], base: &'a [B]) -> Vec<&'a B>
where
    E: Identified,
    B: Identified,
{
    let extended_ids: HashSet<&str> = extended.iter().map(Identified::id).collect();
    base.iter()
        .filter(|asset| !extended_ids.contains(asset.id()))
        .collect()
}

/// Assets present in both collections whose fields differ.
///
/// Returns the `extended` (upstream) record — the value the caller should
/// apply, not the stale one it replaces.
pub fn find_modified<'a>(extended: &'a [TieredAsset], base: &[TieredAsset]) -> Vec<&'a TieredAsset> {
    base.iter()
        .filter_map(|base_asset| {
            extended
                .iter()
                .find(|asset| asset.id == base_asset.id)
                .filter(|asset| *asset != base_asset)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::assets::AssetType;

    fn asset(id: &str, name: &str) -> TieredAsset {
        TieredAsset {
            id: id.to_string(),
            asset_name: name.to_string(),
            asset_type: AssetType::BuiltIn,
            assignable_scope: "/".to_string(),
            asset_definition: String::new(),
            documentation_uri: String::new(),
            tier: Some("1".to_string()),
        }
    }

    #[test]
    fn test_added_and_removed_disjoint_sets() {
        let extended = vec![asset("a", "A"), asset("b", "B"), asset("c", "C")];
        let base = vec![asset("a", "A"), asset("d", "D")];

        let added: Vec<_> = find_added(&extended, &base)
            .into_iter()
            .map(|a| a.id.as_str())
            .collect();
        let removed: Vec<_> = find_removed(&extended, &base)
            .into_iter()
            .map(|a| a.id.as_str())
            .collect();

        assert_eq!(added, ["b", "c"]);
        assert_eq!(removed, ["d"]);
    }

    #[test]
    fn test_added_removed_complementarity() {
        // added(E,B) ∪ (B ∩ E) == E and removed(E,B) ∪ (B ∩ E) == B, by id.
        let extended = vec![asset("a", "A"), asset("b", "B"), asset("c", "C")];
        let base = vec![asset("a", "A"), asset("b", "B")];

        let added = find_added(&extended, &base);
        let removed = find_removed(&extended, &base);
        let common: Vec<&str> = base
            .iter()
            .filter(|b| extended.iter().any(|e| e.id == b.id))
            .map(|b| b.id.as_str())
            .collect();

        let mut reconstructed_extended: Vec<&str> =
            added.iter().map(|a| a.id.as_str()).chain(common.clone()).collect();
        reconstructed_extended.sort_unstable();
        assert_eq!(reconstructed_extended, ["a", "b", "c"]);

        let mut reconstructed_base: Vec<&str> =
            removed.iter().map(|r| r.id.as_str()).chain(common).collect();
        reconstructed_base.sort_unstable();
        assert_eq!(reconstructed_base, ["a", "b"]);
    }

    #[test]
    fn test_no_changes_yields_empty_diffs() {
        let extended = vec![asset("a", "A")];
        let base = vec![asset("a", "A")];
        assert!(find_added(&extended, &base).is_empty());
        assert!(find_removed(&extended, &base).is_empty());
        assert!(find_modified(&extended, &base).is_empty());
    }

    #[test]
    fn test_empty_base_everything_added() {
        let extended = vec![asset("a", "A"), asset("b", "B")];
        let base: Vec<TieredAsset> = vec![];
        assert_eq!(find_added(&extended, &base).len(), 2);
        assert!(find_removed(&extended, &base).is_empty());
    }

    #[test]
    fn test_modified_returns_upstream_record() {
        let mut upstream = asset("a", "A");
        upstream.tier = Some("0".to_string());
        let extended = vec![upstream, asset("b", "B")];
        let base = vec![asset("a", "A"), asset("b", "B")];

        let modified = find_modified(&extended, &base);
        assert_eq!(modified.len(), 1);
        // The returned record carries the new (upstream) tier, not the old one.
        assert_eq!(modified[0].tier.as_deref(), Some("0"));
    }

    #[test]
    fn test_modified_ignores_assets_missing_from_extended() {
        let extended = vec![asset("a", "A")];
        let base = vec![asset("a", "A"), asset("gone", "Gone")];
        assert!(find_modified(&extended, &base).is_empty());
    }

    #[test]
    fn test_modified_detects_name_change() {
        let extended = vec![asset("a", "Renamed")];
        let base = vec![asset("a", "A")];
        let modified = find_modified(&extended, &base);
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].asset_name, "Renamed");
    }
}
