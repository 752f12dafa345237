//! Synchronization of the local tier files with the upstream AAT project.
//!
//! For each asset category the syncer pulls the canonical upstream tiered
//! list, merges it with the local file and writes the result back: new
//! upstream built-ins are added (optionally only when currently in use in
//! the tenant), modified built-ins are overwritten with upstream values
//! unless local changes are kept, and built-ins gone upstream or no longer
//! in use are dropped. Custom entries always survive the merge.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::aat::AatClient;
use crate::arm::batch::BatchClient;
use crate::arm::roles::{short_role_id, RoleCollector};
use crate::arm::scopes::ScopeCollector;
use crate::auth::TokenProvider;
use crate::config::Config;
use crate::error::AppError;
use crate::graph::GraphCollector;
use crate::tier::assets::{sort_tiered, AatAsset, TieredAsset};
use crate::tier::{diff, store};

/// Role ids currently in use, gating additions and retention when
/// `includeOnlyRolesInUse` is set.
#[derive(Debug, Default)]
pub struct UsageFilter {
    /// Short ids of every definition observed in use, any type.
    pub in_use_ids: HashSet<String>,
    /// Short ids of the built-in definitions in use; gates additions.
    pub in_use_built_in_ids: HashSet<String>,
}

impl UsageFilter {
    /// Filter where every in-use id gates both additions and retention.
    pub fn uniform(ids: impl IntoIterator<Item = String>) -> Self {
        let in_use_ids: HashSet<String> = ids.into_iter().collect();
        Self {
            in_use_built_in_ids: in_use_ids.clone(),
            in_use_ids,
        }
    }
}

/// Result of merging one category with its upstream list.
#[derive(Debug)]
pub struct SyncMerge {
    pub assets: Vec<TieredAsset>,
    pub added: usize,
    pub modified: usize,
    /// Built-in entries dropped because they are gone from the upstream list.
    pub removed_upstream: usize,
    /// Built-in entries dropped because they are no longer in use.
    pub removed_unused: usize,
}

impl SyncMerge {
    pub fn unchanged(&self) -> bool {
        self.added == 0
            && self.modified == 0
            && self.removed_upstream == 0
            && self.removed_unused == 0
    }
}

/// Merge the upstream list into the local one.
///
/// Pure: no I/O, no clock. The returned list is sorted by `(tier, assetName)`.
pub fn merge_upstream(
    upstream: Vec<AatAsset>,
    local: Vec<TieredAsset>,
    usage: Option<&UsageFilter>,
    keep_local_changes: bool,
) -> Result<SyncMerge, AppError> {
    let upstream: Vec<TieredAsset> = upstream.into_iter().map(AatAsset::into_tiered).collect();
    let local_builtin: Vec<TieredAsset> = local
        .iter()
        .filter(|asset| asset.is_built_in())
        .cloned()
        .collect();

    // Contract: the upstream catalog covers at least as many built-ins as
    // the local file carries.
    if upstream.len() < local_builtin.len() {
        return Err(AppError::Config(
            "improper use of the differ: the upstream list must be at least as large as the \
             local built-in list"
                .to_string(),
        ));
    }

    let mut assets = local;

    // Added upstream entries, optionally gated on being in use.
    let mut added: Vec<TieredAsset> = diff::find_added(&upstream, &local_builtin)
        .into_iter()
        .cloned()
        .collect();
    if let Some(usage) = usage {
        added.retain(|asset| usage.in_use_built_in_ids.contains(&asset.id));
    }
    let added_count = added.len();
    assets.extend(added);

    // Modified entries are overwritten with upstream values unless local
    // changes are configured to be preserved.
    let mut modified_count = 0;
    if !keep_local_changes {
        for upstream_asset in diff::find_modified(&upstream, &local_builtin) {
            if let Some(slot) = assets.iter_mut().find(|asset| asset.id == upstream_asset.id) {
                *slot = upstream_asset.clone();
                modified_count += 1;
            }
        }
    }

    // Built-in entries gone from the upstream list. Custom entries are
    // always preserved.
    let removed_ids: HashSet<&str> = diff::find_removed(&upstream, &local_builtin)
        .into_iter()
        .map(|asset| asset.id.as_str())
        .collect();
    let before = assets.len();
    assets.retain(|asset| asset.is_custom() || !removed_ids.contains(asset.id.as_str()));
    let removed_upstream = before - assets.len();

    // Built-in entries whose role is no longer assigned or eligible.
    let mut removed_unused = 0;
    if let Some(usage) = usage {
        let before = assets.len();
        assets.retain(|asset| asset.is_custom() || usage.in_use_ids.contains(&asset.id));
        removed_unused = before - assets.len();
    }

    sort_tiered(&mut assets);

    Ok(SyncMerge {
        assets,
        added: added_count,
        modified: modified_count,
        removed_upstream,
        removed_unused,
    })
}

/// Run the sync workflow for all three asset categories.
pub async fn run(config: &Config, root: &Path) -> Result<()> {
    let tokens = TokenProvider::new(config).context("failed to build token provider")?;
    let batch = BatchClient::new(config, &tokens)?;
    let scope_collector = ScopeCollector::new(config, &batch);
    let role_collector = RoleCollector::new(config, &batch, &tokens)?;
    let graph_collector = GraphCollector::new(config, &tokens)?;
    let aat = AatClient::new(config)?;

    let keep_local_changes = config.workflow.keep_local_changes;
    let filter_to_in_use = config.workflow.include_only_roles_in_use;

    // Azure roles
    let upstream = aat.tiered_azure_roles().await?;
    let usage = if filter_to_in_use {
        let usage = role_collector
            .role_usage(
                &scope_collector,
                config.workflow.include_individual_resource_scope,
            )
            .await
            .context("the Azure roles in use could not be retrieved from ARM")?;
        Some(UsageFilter {
            in_use_ids: usage.in_use_ids.iter().cloned().collect(),
            in_use_built_in_ids: usage
                .definitions_in_use
                .iter()
                .filter(|definition| definition.is_built_in())
                .map(|definition| definition.role_id.clone())
                .collect(),
        })
    } else {
        None
    };
    sync_category(
        "Built-in Azure roles",
        "roles",
        upstream,
        &config.files.azure_tiered(root),
        usage.as_ref(),
        keep_local_changes,
    )?;

    // Entra roles
    let upstream = aat.tiered_entra_roles().await?;
    let usage = if filter_to_in_use {
        let mut ids = graph_collector
            .active_role_definition_ids()
            .await
            .context("the active Entra role definition Ids could not be retrieved from MS Graph")?;
        if graph_collector.is_pim_enabled().await? {
            ids.extend(graph_collector.eligible_role_definition_ids().await.context(
                "the eligible Entra role definition Ids could not be retrieved from MS Graph",
            )?);
        }
        Some(UsageFilter::uniform(
            ids.iter().map(|id| short_role_id(id).to_string()),
        ))
    } else {
        None
    };
    sync_category(
        "Built-in Entra roles",
        "roles",
        upstream,
        &config.files.entra_tiered(root),
        usage.as_ref(),
        keep_local_changes,
    )?;

    // MS Graph application permissions
    let upstream = aat.tiered_app_permissions().await?;
    let usage = if filter_to_in_use {
        let ids = graph_collector.assigned_app_permission_ids().await.context(
            "the assigned MS Graph application permissions could not be retrieved from MS Graph",
        )?;
        Some(UsageFilter::uniform(ids))
    } else {
        None
    };
    sync_category(
        "Built-in MS Graph app permissions",
        "permissions",
        upstream,
        &config.files.msgraph_tiered(root),
        usage.as_ref(),
        keep_local_changes,
    )?;

    Ok(())
}

/// Merge, persist and report one asset category.
fn sync_category(
    label: &str,
    noun: &str,
    upstream: Vec<AatAsset>,
    tiered_path: &Path,
    usage: Option<&UsageFilter>,
    keep_local_changes: bool,
) -> Result<()> {
    let local = store::read_tiered(tiered_path)?;
    let merge = merge_upstream(upstream, local, usage, keep_local_changes)?;

    info!(
        "{label}: {} added, {} modified, {} removed upstream, {} removed unused",
        merge.added, merge.modified, merge.removed_upstream, merge.removed_unused
    );

    if merge.unchanged() {
        println!("{label}: no change");
        return Ok(());
    }

    store::write_tiered(tiered_path, &merge.assets)?;

    if merge.added > 0 || merge.removed_upstream > 0 {
        println!("{label}: changes have been detected and merged from public AzTier");
    } else if merge.removed_unused > 0 {
        println!(
            "{label}: no change detected in public AzTier, but upstream {noun} are not used \
             locally anymore and have been removed from tiered assets"
        );
    } else {
        println!(
            "{label}: no change detected in public AzTier, but local changes have been \
             overridden with upstream data ('keepLocalChanges' is set to 'false')"
        );
    }

    Ok(())
}
