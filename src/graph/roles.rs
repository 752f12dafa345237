//! Entra role and application-permission collectors.
//!
//! Unlike ARM, the directory graph has no batch surface for these listings;
//! collections are plain GETs following `@odata.nextLink` continuations.

use std::collections::HashSet;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::auth::{Audience, TokenProvider};
use crate::config::Config;
use crate::error::GraphError;
use crate::tier::assets::{AssetType, DetectedAsset};

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Response wrapper for paginated Graph API responses.
#[derive(Debug, Deserialize)]
struct ODataResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,

    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// A directory role definition.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryRoleDefinition {
    pub id: String,

    #[serde(rename = "displayName")]
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "resourceScopes", default)]
    pub resource_scopes: Vec<String>,
}

impl DirectoryRoleDefinition {
    /// Normalize a custom directory role into the detected-asset shape.
    pub fn to_detected_asset(&self) -> DetectedAsset {
        DetectedAsset {
            id: self.id.clone(),
            name: self.display_name.clone(),
            asset_type: AssetType::Custom,
            scope: self.resource_scopes.join(", "),
            definition: self.description.clone(),
            documentation: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoleAssignmentEntry {
    #[serde(rename = "roleDefinitionId")]
    role_definition_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServicePrincipalEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AppRoleAssignmentEntry {
    #[serde(rename = "appRoleId")]
    app_role_id: Option<String>,
}

/// Collects Entra role and app-permission usage from the directory graph.
pub struct GraphCollector<'a> {
    http_client: reqwest::Client,
    tokens: &'a TokenProvider,
    graph_base_url: String,
}

impl<'a> GraphCollector<'a> {
    pub fn new(config: &Config, tokens: &'a TokenProvider) -> Result<Self, GraphError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            tokens,
            graph_base_url: config.api.graph_base_url.clone(),
        })
    }

    /// Probe whether the directory exposes the PIM eligibility endpoint.
    pub async fn is_pim_enabled(&self) -> Result<bool, GraphError> {
        let token = self.tokens.token(Audience::Graph).await?;
        let url = format!(
            "{}/roleManagement/directory/roleEligibilityScheduleInstances",
            self.graph_base_url
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await?;

        let enabled = response.status().as_u16() == 200;
        info!("Graph PIM capability probe: enabled={enabled}");
        Ok(enabled)
    }

    /// All custom Entra role definitions.
    pub async fn custom_role_definitions(
        &self,
    ) -> Result<Vec<DirectoryRoleDefinition>, GraphError> {
        let url = format!(
            "{}/roleManagement/directory/roleDefinitions?$filter=isBuiltIn eq false",
            self.graph_base_url
        );
        self.get_all_pages(url).await
    }

    /// Definition ids of actively assigned Entra roles (non-PIM endpoint).
    pub async fn active_role_definition_ids(&self) -> Result<Vec<String>, GraphError> {
        let url = format!(
            "{}/roleManagement/directory/roleAssignments",
            self.graph_base_url
        );
        let assignments: Vec<RoleAssignmentEntry> = self.get_all_pages(url).await?;
        Ok(dedup_ids(assignments.into_iter().filter_map(|a| a.role_definition_id)))
    }

    /// Definition ids of eligibly assigned Entra roles (PIM endpoint).
    pub async fn eligible_role_definition_ids(&self) -> Result<Vec<String>, GraphError> {
        let url = format!(
            "{}/roleManagement/directory/roleEligibilityScheduleInstances",
            self.graph_base_url
        );
        let eligibles: Vec<RoleAssignmentEntry> = self.get_all_pages(url).await?;
        Ok(dedup_ids(eligibles.into_iter().filter_map(|e| e.role_definition_id)))
    }

    /// Distinct app-permission ids assigned to any service principal.
    ///
    /// Pages through all service principals, then fetches each principal's
    /// app-role assignments. Principals whose assignments cannot be read are
    /// skipped rather than failing the run.
    pub async fn assigned_app_permission_ids(&self) -> Result<Vec<String>, GraphError> {
        let url = format!(
            "{}/servicePrincipals?$select=id,appId",
            self.graph_base_url
        );
        let principals: Vec<ServicePrincipalEntry> = self.get_all_pages(url).await?;
        let token = self.tokens.token(Audience::Graph).await?;

        let mut permission_ids = HashSet::new();
        for principal in &principals {
            let url = format!(
                "{}/servicePrincipals/{}/appRoleAssignments",
                self.graph_base_url, principal.id
            );

            let response = self
                .http_client
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await?;

            if response.status().as_u16() != 200 {
                debug!(
                    "skipping app-role assignments for principal {} (HTTP {})",
                    principal.id,
                    response.status()
                );
                continue;
            }

            let page: ODataResponse<AppRoleAssignmentEntry> = response
                .json()
                .await
                .map_err(|e| GraphError::Parse(e.to_string()))?;
            permission_ids.extend(page.value.into_iter().filter_map(|a| a.app_role_id));
        }

        info!(
            "found {} distinct assigned app permissions across {} service principals",
            permission_ids.len(),
            principals.len()
        );
        Ok(permission_ids.into_iter().collect())
    }

    /// GET every page of a collection, following `@odata.nextLink`.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        url: String,
    ) -> Result<Vec<T>, GraphError> {
        let token = self.tokens.token(Audience::Graph).await?;
        let mut all = Vec::new();
        let mut next = Some(url);

        while let Some(url) = next {
            let response = self
                .http_client
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await?;

            match response.status().as_u16() {
                200 => {
                    let page: ODataResponse<T> = response
                        .json()
                        .await
                        .map_err(|e| GraphError::Parse(e.to_string()))?;
                    all.extend(page.value);
                    next = page.next_link;
                }
                401 => return Err(GraphError::Unauthorized),
                status => {
                    return Err(GraphError::RequestFailed {
                        status,
                        context: url,
                    })
                }
            }
        }

        Ok(all)
    }
}

/// Deduplicate ids, keeping first occurrence.
fn dedup_ids(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}
