//! Azure role collectors.
//!
//! Retrieves the role definitions in use within a set of scopes, going
//! through the batch client for the per-scope fan-out. Tenants with PIM
//! expose active/eligible schedule instances; tenants without it only expose
//! the traditional role-assignment endpoint. The selection is made once per
//! run via [`RoleCollector::is_pim_enabled`] and threaded through by the
//! orchestrators.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use super::batch::{BatchClient, BatchRequest};
use super::scopes::ScopeCollector;
use crate::auth::{Audience, TokenProvider};
use crate::config::Config;
use crate::error::ArmError;
use crate::tier::assets::{built_in_role_documentation_uri, AssetType, DetectedAsset};

/// API version for PIM schedule-instance endpoints.
const API_VERSION_PIM: &str = "2020-10-01";

/// API version for role assignments and definitions.
const API_VERSION_ROLES: &str = "2022-04-01";

/// Role type marker for platform-defined roles.
const ROLE_TYPE_BUILT_IN: &str = "BuiltInRole";

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// An Azure role definition, as hydrated from ARM.
///
/// Owned transiently during a single run; always normalized into a
/// [`DetectedAsset`] before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleDefinition {
    /// Full definition resource path.
    pub role_definition_id: String,
    /// Short id (last path segment).
    pub role_id: String,
    pub assignable_scopes: Vec<String>,
    pub role_name: String,
    /// `BuiltInRole` or `CustomRole`.
    pub role_type: String,
    pub role_description: String,
}

impl RoleDefinition {
    pub fn is_built_in(&self) -> bool {
        self.role_type == ROLE_TYPE_BUILT_IN
    }

    /// Normalize into the transient detected-asset shape.
    pub fn to_detected_asset(&self) -> DetectedAsset {
        let (asset_type, documentation) = if self.is_built_in() {
            (
                AssetType::BuiltIn,
                built_in_role_documentation_uri(&self.role_name),
            )
        } else {
            (AssetType::Custom, String::new())
        };

        DetectedAsset {
            id: self.role_id.clone(),
            name: self.role_name.clone(),
            asset_type,
            scope: self.assignable_scopes.join(", "),
            definition: self.role_description.clone(),
            documentation,
        }
    }
}

/// Wire shape of a role definition resource.
#[derive(Debug, Deserialize)]
struct ArmRoleDefinition {
    id: String,
    name: String,
    properties: ArmRoleDefinitionProperties,
}

#[derive(Debug, Deserialize)]
struct ArmRoleDefinitionProperties {
    #[serde(rename = "roleName")]
    role_name: String,

    #[serde(rename = "type")]
    role_type: String,

    #[serde(default)]
    description: String,

    #[serde(rename = "assignableScopes", default)]
    assignable_scopes: Vec<String>,
}

impl From<ArmRoleDefinition> for RoleDefinition {
    fn from(raw: ArmRoleDefinition) -> Self {
        Self {
            role_definition_id: raw.id,
            role_id: raw.name,
            assignable_scopes: raw.properties.assignable_scopes,
            role_name: raw.properties.role_name,
            role_type: raw.properties.role_type,
            role_description: raw.properties.description,
        }
    }
}

/// Wire shape of an assignment/eligibility listing.
#[derive(Debug, Deserialize)]
struct AssignmentListing {
    #[serde(default)]
    value: Vec<AssignmentEntry>,
}

#[derive(Debug, Deserialize)]
struct AssignmentEntry {
    properties: AssignmentProperties,
}

#[derive(Debug, Deserialize)]
struct AssignmentProperties {
    #[serde(rename = "roleDefinitionId")]
    role_definition_id: String,
}

#[derive(Debug, Deserialize)]
struct RoleDefinitionListing {
    #[serde(default)]
    value: Vec<ArmRoleDefinition>,
}

/// Role usage observed in the tenant, as the orchestrators consume it.
#[derive(Debug, Clone)]
pub struct AzureRoleUsage {
    /// Hydrated definitions of the roles in use (built-in only under PIM).
    pub definitions_in_use: Vec<RoleDefinition>,
    /// Short ids of every role definition observed in use, any type.
    pub in_use_ids: Vec<String>,
}

/// Collects Azure role assignment and definition data from ARM.
pub struct RoleCollector<'a> {
    batch: &'a BatchClient<'a>,
    http_client: reqwest::Client,
    tokens: &'a TokenProvider,
    arm_base_url: String,
}

impl<'a> RoleCollector<'a> {
    pub fn new(
        config: &Config,
        batch: &'a BatchClient<'a>,
        tokens: &'a TokenProvider,
    ) -> Result<Self, ArmError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            batch,
            http_client,
            tokens,
            arm_base_url: config.api.arm_base_url.clone(),
        })
    }

    /// Probe whether the tenant exposes the PIM schedule-instance endpoints.
    ///
    /// A 200 means elevated just-in-time access management is available; any
    /// other status falls back to the binary assigned/not-assigned model.
    pub async fn is_pim_enabled(&self) -> Result<bool, ArmError> {
        let token = self.tokens.token(Audience::Arm).await?;
        let url = format!(
            "{}/providers/Microsoft.Authorization/roleEligibilityScheduleInstances?$filter=asTarget()&api-version={}",
            self.arm_base_url, API_VERSION_PIM
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await?;

        let enabled = response.status().as_u16() == 200;
        info!("PIM capability probe: enabled={enabled}");
        Ok(enabled)
    }

    /// Definition ids of permanently assigned roles within the passed scopes
    /// (the traditional endpoint, for tenants without PIM).
    pub async fn assigned_role_definition_ids(
        &self,
        scopes: &[String],
    ) -> Result<Vec<String>, ArmError> {
        self.role_definition_ids_within(scopes, "roleAssignments", API_VERSION_ROLES)
            .await
    }

    /// Definition ids of actively assigned roles within the passed scopes
    /// (PIM endpoint).
    pub async fn active_role_definition_ids(
        &self,
        scopes: &[String],
    ) -> Result<Vec<String>, ArmError> {
        self.role_definition_ids_within(scopes, "roleAssignmentScheduleInstances", API_VERSION_PIM)
            .await
    }

    /// Definition ids of eligibly assigned roles within the passed scopes
    /// (PIM endpoint).
    pub async fn eligible_role_definition_ids(
        &self,
        scopes: &[String],
    ) -> Result<Vec<String>, ArmError> {
        self.role_definition_ids_within(scopes, "roleEligibilityScheduleInstances", API_VERSION_PIM)
            .await
    }

    /// Fan out one batch item per scope against the passed assignment
    /// endpoint and collect the distinct role definition ids.
    async fn role_definition_ids_within(
        &self,
        scopes: &[String],
        endpoint: &str,
        api_version: &str,
    ) -> Result<Vec<String>, ArmError> {
        let requests: Vec<BatchRequest> = scopes
            .iter()
            .map(|scope| {
                BatchRequest::get(format!(
                    "{}{}/providers/Microsoft.Authorization/{}?api-version={}&$filter=atScope()",
                    self.arm_base_url, scope, endpoint, api_version
                ))
            })
            .collect();

        let responses = self.batch.send(requests).await?;

        let mut definition_ids = Vec::new();
        for response in responses {
            let listing: AssignmentListing = serde_json::from_value(response.content)
                .map_err(|e| ArmError::Parse(format!("malformed assignment listing: {e}")))?;
            definition_ids.extend(
                listing
                    .value
                    .into_iter()
                    .map(|entry| entry.properties.role_definition_id),
            );
        }

        let unique = dedup_by_short_id(definition_ids);
        debug!("collected {} distinct role definition ids via {endpoint}", unique.len());
        Ok(unique)
    }

    /// Hydrate full role definitions for the passed definition ids.
    pub async fn role_definitions(
        &self,
        definition_ids: &[String],
    ) -> Result<Vec<RoleDefinition>, ArmError> {
        let requests: Vec<BatchRequest> = definition_ids
            .iter()
            .map(|id| {
                BatchRequest::get(format!(
                    "{}{}?api-version={}",
                    self.arm_base_url, id, API_VERSION_ROLES
                ))
            })
            .collect();

        let responses = self.batch.send(requests).await?;

        responses
            .into_iter()
            .map(|response| {
                serde_json::from_value::<ArmRoleDefinition>(response.content)
                    .map(RoleDefinition::from)
                    .map_err(|e| ArmError::Parse(format!("malformed role definition: {e}")))
            })
            .collect()
    }

    /// Hydrate definitions and keep only built-in roles.
    pub async fn built_in_role_definitions(
        &self,
        definition_ids: &[String],
    ) -> Result<Vec<RoleDefinition>, ArmError> {
        let definitions = self.role_definitions(definition_ids).await?;
        Ok(definitions
            .into_iter()
            .filter(RoleDefinition::is_built_in)
            .collect())
    }

    /// Collect everything the orchestrators need to know about role usage.
    ///
    /// Probes PIM once, enumerates scopes (optionally down to individual
    /// resources) and hydrates the definitions in use. Under PIM the model is
    /// three-state (active/eligible/not-assigned) and hydration keeps only
    /// built-in roles; without it the binary assigned/not-assigned endpoint
    /// is used and every definition is kept.
    pub async fn role_usage(
        &self,
        scope_collector: &ScopeCollector<'_>,
        include_individual_resources: bool,
    ) -> Result<AzureRoleUsage, ArmError> {
        let pim_enabled = self.is_pim_enabled().await?;
        let scopes = if include_individual_resources {
            scope_collector.all_scopes().await?
        } else {
            scope_collector.higher_scopes().await?
        };

        let (definition_ids, definitions_in_use) = if pim_enabled {
            let mut ids = self.active_role_definition_ids(&scopes).await?;
            ids.extend(self.eligible_role_definition_ids(&scopes).await?);
            let ids = dedup_by_short_id(ids);
            let definitions = self.built_in_role_definitions(&ids).await?;
            (ids, definitions)
        } else {
            let ids = self.assigned_role_definition_ids(&scopes).await?;
            let definitions = self.role_definitions(&ids).await?;
            (ids, definitions)
        };

        Ok(AzureRoleUsage {
            in_use_ids: definition_ids
                .iter()
                .map(|id| short_role_id(id).to_string())
                .collect(),
            definitions_in_use,
        })
    }

    /// All custom role definitions in the tenant (direct call, not batched).
    pub async fn custom_role_definitions(&self) -> Result<Vec<RoleDefinition>, ArmError> {
        let token = self.tokens.token(Audience::Arm).await?;
        let url = format!(
            "{}/providers/Microsoft.Authorization/roleDefinitions?$filter=type+eq+'CustomRole'&api-version={}",
            self.arm_base_url, API_VERSION_ROLES
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {
                let listing: RoleDefinitionListing = response
                    .json()
                    .await
                    .map_err(|e| ArmError::Parse(e.to_string()))?;
                Ok(listing.value.into_iter().map(RoleDefinition::from).collect())
            }
            status => Err(ArmError::RequestFailed {
                status,
                context: "custom role definitions could not be retrieved".to_string(),
            }),
        }
    }
}

/// Short id of a role definition: the last path segment.
pub fn short_role_id(definition_id: &str) -> &str {
    definition_id
        .rsplit('/')
        .next()
        .unwrap_or(definition_id)
}

/// Deduplicate definition ids by their short id, keeping first occurrence.
fn dedup_by_short_id(definition_ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    definition_ids
        .into_iter()
        .filter(|id| seen.insert(short_role_id(id).to_string()))
        .collect()
}
