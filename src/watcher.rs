//! Drift detection between the tenant and the local tier files.
//!
//! The watcher pulls the current role/permission reality out of the tenant,
//! diffs it against the locally tiered classification, appends newly
//! discovered assets to the untiered triage list and removes tiered built-in
//! entries that are no longer observed. Custom entries are never removed:
//! they are tenant-specific and cannot be recreated from upstream data.
//!
//! Two asset categories are watched: Azure roles (built-in roles in use plus
//! custom roles defined in the tenant) and custom Entra roles.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use crate::arm::batch::BatchClient;
use crate::arm::roles::RoleCollector;
use crate::arm::scopes::ScopeCollector;
use crate::auth::TokenProvider;
use crate::config::Config;
use crate::graph::GraphCollector;
use crate::tier::assets::{DetectedAsset, TieredAsset, UntieredAsset};
use crate::tier::{diff, store};

/// What one watch pass concluded for a category.
#[derive(Debug)]
pub struct DriftResult {
    /// The tiered list with unobserved built-in entries removed.
    pub tiered: Vec<TieredAsset>,
    /// Detected assets that are not yet tiered, ready for the untiered file.
    pub newly_detected: Vec<UntieredAsset>,
    /// Number of tiered entries dropped.
    pub removed: usize,
}

/// Diff detected reality against the tiered list.
///
/// `baseline` selects which tiered entries this category's detection covers
/// (the Azure category observes everything; the Entra category only observes
/// custom roles). Removal only ever applies to built-in entries.
pub fn detect_drift(
    detected: &[DetectedAsset],
    tiered: Vec<TieredAsset>,
    baseline: impl Fn(&TieredAsset) -> bool,
    detected_on: NaiveDate,
) -> DriftResult {
    let covered: Vec<&TieredAsset> = tiered.iter().filter(|asset| baseline(asset)).collect();

    let newly_detected: Vec<UntieredAsset> = diff::find_added(detected, &covered)
        .into_iter()
        .map(|asset| asset.clone().into_untiered(detected_on))
        .collect();

    // Custom assets are never deleted by drift detection.
    let removed_ids: HashSet<String> = diff::find_removed(detected, &covered)
        .into_iter()
        .filter(|asset| asset.is_built_in())
        .map(|asset| asset.id.clone())
        .collect();

    let removed = removed_ids.len();
    let tiered = tiered
        .into_iter()
        .filter(|asset| !removed_ids.contains(&asset.id))
        .collect();

    DriftResult {
        tiered,
        newly_detected,
        removed,
    }
}

/// Deduplicate detected assets by id, keeping first occurrence.
///
/// A custom role that is also in use would otherwise appear twice (once from
/// the usage scan, once from the custom-role listing).
fn dedup_detected(detected: Vec<DetectedAsset>) -> Vec<DetectedAsset> {
    let mut seen = HashSet::new();
    detected
        .into_iter()
        .filter(|asset| seen.insert(asset.id.clone()))
        .collect()
}

/// Run the watch workflow against the tenant and the tier files under `root`.
pub async fn run(config: &Config, root: &Path) -> Result<()> {
    let tokens = TokenProvider::new(config).context("failed to build token provider")?;
    let batch = BatchClient::new(config, &tokens)?;
    let scope_collector = ScopeCollector::new(config, &batch);
    let role_collector = RoleCollector::new(config, &batch, &tokens)?;
    let graph_collector = GraphCollector::new(config, &tokens)?;

    let today = chrono::Local::now().date_naive();

    // Azure roles: built-in roles in use plus every custom role defined.
    let usage = role_collector
        .role_usage(
            &scope_collector,
            config.workflow.include_individual_resource_scope,
        )
        .await
        .context("the Azure roles in use could not be retrieved from ARM")?;

    let mut detected: Vec<DetectedAsset> = usage
        .definitions_in_use
        .iter()
        .map(|definition| definition.to_detected_asset())
        .collect();
    detected.extend(
        role_collector
            .custom_role_definitions()
            .await
            .context("the custom Azure roles could not be retrieved from ARM")?
            .iter()
            .map(|definition| definition.to_detected_asset()),
    );
    let detected = dedup_detected(detected);

    watch_category(
        "Azure roles",
        &detected,
        |_| true,
        &config.files.azure_tiered(root),
        &config.files.azure_untiered(root),
        today,
    )?;

    // Custom Entra roles: compared only against the custom tiered entries.
    let detected: Vec<DetectedAsset> = graph_collector
        .custom_role_definitions()
        .await
        .context("the custom Entra roles could not be retrieved from Graph")?
        .iter()
        .map(|definition| definition.to_detected_asset())
        .collect();

    watch_category(
        "Custom Entra roles",
        &detected,
        TieredAsset::is_custom,
        &config.files.entra_tiered(root),
        &config.files.entra_untiered(root),
        today,
    )?;

    Ok(())
}

/// Diff, persist and report one asset category.
fn watch_category(
    category: &str,
    detected: &[DetectedAsset],
    baseline: impl Fn(&TieredAsset) -> bool,
    tiered_path: &Path,
    untiered_path: &Path,
    today: NaiveDate,
) -> Result<()> {
    let tiered = store::read_tiered(tiered_path)?;
    let result = detect_drift(detected, tiered, baseline, today);

    let additions_detected = store::append_untiered(untiered_path, result.newly_detected)?;
    store::write_tiered(tiered_path, &result.tiered)?;

    info!(
        "{category}: {} tiered entries kept, {} removed",
        result.tiered.len(),
        result.removed
    );

    if result.removed > 0 {
        println!("❌ {category}: unused tiered assets have been detected and removed");
    }
    if additions_detected {
        println!("➕ {category}: untiered assets have been detected");
    }
    if result.removed == 0 && !additions_detected {
        println!("➖ {category}: no changes");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::assets::AssetType;

    fn detected(id: &str, asset_type: AssetType) -> DetectedAsset {
        DetectedAsset {
            id: id.to_string(),
            name: format!("Role {id}"),
            asset_type,
            scope: "/".to_string(),
            definition: String::new(),
            documentation: String::new(),
        }
    }

    fn tiered(id: &str, asset_type: AssetType) -> TieredAsset {
        TieredAsset {
            id: id.to_string(),
            asset_name: format!("Role {id}"),
            asset_type,
            assignable_scope: "/".to_string(),
            asset_definition: String::new(),
            documentation_uri: String::new(),
            tier: Some("1".to_string()),
        }
    }

    fn date() -> NaiveDate {
        "2025-06-01".parse().unwrap()
    }

    #[test]
    fn test_new_asset_lands_in_untiered() {
        let detected = vec![
            detected("known", AssetType::BuiltIn),
            detected("fresh", AssetType::BuiltIn),
        ];
        let tiered = vec![tiered("known", AssetType::BuiltIn)];

        let result = detect_drift(&detected, tiered, |_| true, date());

        assert_eq!(result.newly_detected.len(), 1);
        assert_eq!(result.newly_detected[0].id, "fresh");
        assert_eq!(result.newly_detected[0].detected_on, date());
        assert_eq!(result.removed, 0);
        assert_eq!(result.tiered.len(), 1);
    }

    #[test]
    fn test_unobserved_built_in_is_removed() {
        let detected = vec![detected("still-here", AssetType::BuiltIn)];
        let tiered_list = vec![
            tiered("still-here", AssetType::BuiltIn),
            tiered("gone", AssetType::BuiltIn),
        ];

        let result = detect_drift(&detected, tiered_list, |_| true, date());

        assert_eq!(result.removed, 1);
        assert_eq!(result.tiered.len(), 1);
        assert_eq!(result.tiered[0].id, "still-here");
    }

    #[test]
    fn test_custom_asset_is_never_removed() {
        // The custom asset is absent from the detected set entirely.
        let detected = vec![detected("builtin", AssetType::BuiltIn)];
        let tiered_list = vec![
            tiered("builtin", AssetType::BuiltIn),
            tiered("tenant-custom", AssetType::Custom),
        ];

        let result = detect_drift(&detected, tiered_list, |_| true, date());

        assert_eq!(result.removed, 0);
        assert!(result.tiered.iter().any(|a| a.id == "tenant-custom"));
    }

    #[test]
    fn test_baseline_limits_comparison() {
        // The Entra category only observes custom roles: a built-in tiered
        // entry absent from detection must survive untouched.
        let detected = vec![detected("custom-1", AssetType::Custom)];
        let tiered_list = vec![
            tiered("builtin-1", AssetType::BuiltIn),
            tiered("custom-1", AssetType::Custom),
        ];

        let result = detect_drift(&detected, tiered_list, TieredAsset::is_custom, date());

        assert_eq!(result.removed, 0);
        assert!(result.newly_detected.is_empty());
        assert_eq!(result.tiered.len(), 2);
    }

    #[test]
    fn test_idempotent_when_nothing_changed() {
        let detected_list = vec![detected("a", AssetType::BuiltIn)];
        let tiered_list = vec![tiered("a", AssetType::BuiltIn)];

        let first = detect_drift(&detected_list, tiered_list, |_| true, date());
        let second = detect_drift(&detected_list, first.tiered.clone(), |_| true, date());

        assert_eq!(first.tiered, second.tiered);
        assert!(second.newly_detected.is_empty());
        assert_eq!(second.removed, 0);
    }

    #[test]
    fn test_dedup_detected_keeps_first() {
        let list = vec![
            detected("dup", AssetType::BuiltIn),
            detected("dup", AssetType::Custom),
            detected("other", AssetType::Custom),
        ];
        let deduped = dedup_detected(list);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].asset_type, AssetType::BuiltIn);
    }
}
