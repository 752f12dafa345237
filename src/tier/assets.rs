//! Asset models for tiered role/permission classifications.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Documentation base for built-in Azure roles.
const BUILT_IN_ROLE_DOCS: &str =
    "https://learn.microsoft.com/en-us/azure/role-based-access-control/built-in-roles";

/// Anything carrying a stable asset identifier, usable by the differ.
pub trait Identified {
    fn id(&self) -> &str;
}

impl<T: Identified> Identified for &T {
    fn id(&self) -> &str {
        (*self).id()
    }
}

/// Whether an asset ships with the platform or was defined in the tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetType {
    #[serde(rename = "Built-in")]
    BuiltIn,
    Custom,
}

/// API event recorded on a detected asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiEvent {
    Added,
}

/// A role or permission classified into a sensitivity tier.
///
/// This is the persisted shape: one JSON array of these per asset category.
/// `id` is unique within a file. `tier` is absent until a human (or the
/// upstream project) has classified the asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieredAsset {
    pub id: String,

    #[serde(rename = "assetName")]
    pub asset_name: String,

    #[serde(rename = "assetType")]
    pub asset_type: AssetType,

    #[serde(rename = "assignableScope")]
    pub assignable_scope: String,

    #[serde(rename = "assetDefinition")]
    pub asset_definition: String,

    #[serde(rename = "documentationUri")]
    pub documentation_uri: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

impl TieredAsset {
    pub fn is_custom(&self) -> bool {
        self.asset_type == AssetType::Custom
    }

    pub fn is_built_in(&self) -> bool {
        self.asset_type == AssetType::BuiltIn
    }
}

impl Identified for TieredAsset {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A newly detected role or permission awaiting manual classification.
///
/// Appended to the untiered file by the Watcher; never deleted by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UntieredAsset {
    #[serde(rename = "detectedOn")]
    pub detected_on: NaiveDate,

    #[serde(rename = "apiEvent")]
    pub api_event: ApiEvent,

    pub id: String,

    #[serde(rename = "assetName")]
    pub asset_name: String,

    #[serde(rename = "assetType")]
    pub asset_type: AssetType,

    #[serde(rename = "assignableScope")]
    pub assignable_scope: String,

    #[serde(rename = "assetDefinition")]
    pub asset_definition: String,

    #[serde(rename = "documentationUri")]
    pub documentation_uri: String,
}

impl Identified for UntieredAsset {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Transient normalized form of a role/permission observed in the tenant.
///
/// Never persisted directly; converted into an [`UntieredAsset`] when it
/// turns out to be new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedAsset {
    /// Short identifier (last path segment of the definition id).
    pub id: String,
    pub name: String,
    pub asset_type: AssetType,
    /// Assignable scopes joined with `", "`.
    pub scope: String,
    pub definition: String,
    pub documentation: String,
}

impl DetectedAsset {
    /// Convert into an untiered entry, stamped with the detection date.
    pub fn into_untiered(self, detected_on: NaiveDate) -> UntieredAsset {
        UntieredAsset {
            detected_on,
            api_event: ApiEvent::Added,
            id: self.id,
            asset_name: self.name,
            asset_type: self.asset_type,
            assignable_scope: self.scope,
            asset_definition: self.definition,
            documentation_uri: self.documentation,
        }
    }
}

impl Identified for DetectedAsset {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Documentation URI for a built-in Azure role, derived from its name.
pub fn built_in_role_documentation_uri(role_name: &str) -> String {
    format!(
        "{}#{}",
        BUILT_IN_ROLE_DOCS,
        role_name.to_lowercase().replace(' ', "-")
    )
}

/// A tiered record as published by the upstream AAT project.
///
/// Upstream entries only describe built-in assets and omit the type and scope
/// fields; [`AatAsset::into_tiered`] supplies both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AatAsset {
    pub id: String,

    #[serde(rename = "assetName")]
    pub asset_name: String,

    #[serde(rename = "assetDefinition", default)]
    pub asset_definition: String,

    #[serde(rename = "documentationUri", default)]
    pub documentation_uri: String,

    #[serde(default)]
    pub tier: Option<String>,
}

impl AatAsset {
    /// Enrich into the locally persisted shape: upstream records are always
    /// built-in with a tenant-wide assignable scope.
    pub fn into_tiered(self) -> TieredAsset {
        TieredAsset {
            id: self.id,
            asset_name: self.asset_name,
            asset_type: AssetType::BuiltIn,
            assignable_scope: "/".to_string(),
            asset_definition: self.asset_definition,
            documentation_uri: self.documentation_uri,
            tier: self.tier,
        }
    }
}

impl Identified for AatAsset {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Sort tiered assets by `(tier, assetName)`, the order the tier files keep.
pub fn sort_tiered(assets: &mut [TieredAsset]) {
    assets.sort_by(|a, b| {
        (a.tier.as_deref().unwrap_or_default(), &a.asset_name)
            .cmp(&(b.tier.as_deref().unwrap_or_default(), &b.asset_name))
    });
}

/// Sort untiered assets by detection date, most recent first.
pub fn sort_untiered(assets: &mut [UntieredAsset]) {
    assets.sort_by(|a, b| b.detected_on.cmp(&a.detected_on));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tiered(id: &str, name: &str, tier: &str) -> TieredAsset {
        TieredAsset {
            id: id.to_string(),
            asset_name: name.to_string(),
            asset_type: AssetType::BuiltIn,
            assignable_scope: "/".to_string(),
            asset_definition: String::new(),
            documentation_uri: String::new(),
            tier: Some(tier.to_string()),
        }
    }

    #[test]
    fn test_tiered_asset_serde_field_names() {
        let asset = make_tiered("abc", "Reader", "2");
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["assetName"], "Reader");
        assert_eq!(json["assetType"], "Built-in");
        assert_eq!(json["assignableScope"], "/");
        assert_eq!(json["tier"], "2");
    }

    #[test]
    fn test_tier_omitted_when_absent() {
        let mut asset = make_tiered("abc", "Reader", "2");
        asset.tier = None;
        let json = serde_json::to_value(&asset).unwrap();
        assert!(json.get("tier").is_none());
    }

    #[test]
    fn test_built_in_documentation_uri() {
        assert_eq!(
            built_in_role_documentation_uri("Virtual Machine Contributor"),
            "https://learn.microsoft.com/en-us/azure/role-based-access-control/built-in-roles#virtual-machine-contributor"
        );
    }

    #[test]
    fn test_aat_enrichment() {
        let aat = AatAsset {
            id: "abc".to_string(),
            asset_name: "Owner".to_string(),
            asset_definition: "Grants full access".to_string(),
            documentation_uri: String::new(),
            tier: Some("0".to_string()),
        };
        let tiered = aat.into_tiered();
        assert_eq!(tiered.asset_type, AssetType::BuiltIn);
        assert_eq!(tiered.assignable_scope, "/");
        assert_eq!(tiered.tier.as_deref(), Some("0"));
    }

    #[test]
    fn test_sort_tiered_by_tier_then_name() {
        let mut assets = vec![
            make_tiered("c", "Zebra", "0"),
            make_tiered("a", "Alpha", "1"),
            make_tiered("b", "Beta", "0"),
        ];
        sort_tiered(&mut assets);
        let names: Vec<_> = assets.iter().map(|a| a.asset_name.as_str()).collect();
        assert_eq!(names, ["Beta", "Zebra", "Alpha"]);
    }

    #[test]
    fn test_sort_untiered_newest_first() {
        let detected = |id: &str, date: &str| UntieredAsset {
            detected_on: date.parse().unwrap(),
            api_event: ApiEvent::Added,
            id: id.to_string(),
            asset_name: id.to_string(),
            asset_type: AssetType::BuiltIn,
            assignable_scope: "/".to_string(),
            asset_definition: String::new(),
            documentation_uri: String::new(),
        };
        let mut assets = vec![
            detected("old", "2024-01-10"),
            detected("new", "2025-06-01"),
            detected("mid", "2024-12-24"),
        ];
        sort_untiered(&mut assets);
        let ids: Vec<_> = assets.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["new", "mid", "old"]);
    }

    #[test]
    fn test_untiered_serde_shape() {
        let asset = UntieredAsset {
            detected_on: "2025-03-01".parse().unwrap(),
            api_event: ApiEvent::Added,
            id: "abc".to_string(),
            asset_name: "Reader".to_string(),
            asset_type: AssetType::Custom,
            assignable_scope: "/subscriptions/1".to_string(),
            asset_definition: "Read everything".to_string(),
            documentation_uri: String::new(),
        };
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["detectedOn"], "2025-03-01");
        assert_eq!(json["apiEvent"], "added");
        assert_eq!(json["assetType"], "Custom");
    }
}
