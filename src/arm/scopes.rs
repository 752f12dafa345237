//! Scope enumeration over the resource hierarchy.
//!
//! Walks management groups → subscriptions → resource groups → (optionally)
//! individual resources through the batch client and returns the flattened
//! list of scope resource ids in discovery order. Including individual
//! resources multiplies request volume substantially and is therefore gated
//! by configuration.

use serde::Deserialize;
use tracing::info;

use super::batch::{BatchClient, BatchRequest, BatchResponseItem};
use crate::config::Config;
use crate::error::ArmError;

/// API version for scope listings.
const API_VERSION_SCOPES: &str = "2021-04-01";

/// Generic ARM listing: `{"value": [{"id": ...}, ...]}`.
#[derive(Debug, Deserialize)]
struct ResourceListing {
    #[serde(default)]
    value: Vec<ResourceEntry>,
}

#[derive(Debug, Deserialize)]
struct ResourceEntry {
    id: String,
}

/// Enumerates scope resource ids through the batch client.
pub struct ScopeCollector<'a> {
    batch: &'a BatchClient<'a>,
    arm_base_url: String,
}

impl<'a> ScopeCollector<'a> {
    pub fn new(config: &Config, batch: &'a BatchClient<'a>) -> Self {
        Self {
            batch,
            arm_base_url: config.api.arm_base_url.clone(),
        }
    }

    /// Management groups, subscriptions and resource groups.
    pub async fn higher_scopes(&self) -> Result<Vec<String>, ArmError> {
        let (scopes, _) = self.collect_higher_scopes().await?;
        info!("enumerated {} higher scopes", scopes.len());
        Ok(scopes)
    }

    /// Management groups, subscriptions, resource groups and every individual
    /// resource under them.
    pub async fn all_scopes(&self) -> Result<Vec<String>, ArmError> {
        let (mut scopes, resource_groups) = self.collect_higher_scopes().await?;

        let resources = self.children_of(&resource_groups, "resources").await?;
        scopes.extend(resources);

        info!("enumerated {} scopes including individual resources", scopes.len());
        Ok(scopes)
    }

    /// Shared walk for the upper three levels. Returns the flattened scope
    /// list plus the resource-group ids for optional deeper descent.
    async fn collect_higher_scopes(&self) -> Result<(Vec<String>, Vec<String>), ArmError> {
        let (management_groups, subscriptions) =
            self.management_groups_and_subscriptions().await?;
        let resource_groups = self.children_of(&subscriptions, "resourceGroups").await?;

        let mut scopes = Vec::new();
        scopes.extend(management_groups);
        scopes.extend(subscriptions);
        scopes.extend(resource_groups.iter().cloned());

        Ok((scopes, resource_groups))
    }

    /// Management groups and subscriptions in a single combined batch.
    async fn management_groups_and_subscriptions(
        &self,
    ) -> Result<(Vec<String>, Vec<String>), ArmError> {
        let mg_request = BatchRequest::get(format!(
            "{}/providers/Microsoft.Management/managementGroups?api-version={}",
            self.arm_base_url, API_VERSION_SCOPES
        ));
        let sub_request = BatchRequest::get(format!(
            "{}/subscriptions?api-version={}",
            self.arm_base_url, API_VERSION_SCOPES
        ));
        let mg_name = mg_request.name.clone();
        let sub_name = sub_request.name.clone();

        let responses = self.batch.send(vec![mg_request, sub_request]).await?;

        // The API does not guarantee response order; correlate by name.
        let management_groups = listing_ids(find_response(&responses, &mg_name, "management groups")?)?;
        let subscriptions = listing_ids(find_response(&responses, &sub_name, "subscriptions")?)?;

        Ok((management_groups, subscriptions))
    }

    /// One batch item per parent scope, listing the given child segment
    /// (`resourceGroups` or `resources`).
    async fn children_of(
        &self,
        parents: &[String],
        segment: &str,
    ) -> Result<Vec<String>, ArmError> {
        let requests: Vec<BatchRequest> = parents
            .iter()
            .map(|parent| {
                BatchRequest::get(format!(
                    "{}{}/{}?api-version={}",
                    self.arm_base_url, parent, segment, API_VERSION_SCOPES
                ))
            })
            .collect();

        let responses = self.batch.send(requests).await?;

        let mut ids = Vec::new();
        for response in &responses {
            ids.extend(listing_ids(response)?);
        }
        Ok(ids)
    }
}

/// Find the response correlated to a request name.
fn find_response<'r>(
    responses: &'r [BatchResponseItem],
    name: &str,
    what: &str,
) -> Result<&'r BatchResponseItem, ArmError> {
    responses
        .iter()
        .find(|response| response.name == name)
        .ok_or_else(|| ArmError::Parse(format!("the {what} listing is missing from the batch response")))
}

/// Extract the resource ids from a listing response's content.
fn listing_ids(response: &BatchResponseItem) -> Result<Vec<String>, ArmError> {
    let listing: ResourceListing = serde_json::from_value(response.content.clone())
        .map_err(|e| ArmError::Parse(format!("malformed resource listing: {e}")))?;
    Ok(listing.value.into_iter().map(|entry| entry.id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn listing_response(name: &str, ids: &[&str]) -> BatchResponseItem {
        let value: Vec<_> = ids.iter().map(|id| json!({ "id": id })).collect();
        BatchResponseItem {
            name: name.to_string(),
            http_status_code: 200,
            headers: HashMap::new(),
            content: json!({ "value": value }),
        }
    }

    #[test]
    fn test_listing_ids_extraction() {
        let response = listing_response("a", &["/subscriptions/1", "/subscriptions/2"]);
        let ids = listing_ids(&response).unwrap();
        assert_eq!(ids, ["/subscriptions/1", "/subscriptions/2"]);
    }

    #[test]
    fn test_listing_ids_empty_content_defaults() {
        let response = BatchResponseItem {
            name: "a".to_string(),
            http_status_code: 200,
            headers: HashMap::new(),
            content: json!({}),
        };
        assert!(listing_ids(&response).unwrap().is_empty());
    }

    #[test]
    fn test_find_response_by_name_ignores_order() {
        let responses = vec![
            listing_response("second", &["/b"]),
            listing_response("first", &["/a"]),
        ];
        let found = find_response(&responses, "first", "subscriptions").unwrap();
        assert_eq!(listing_ids(found).unwrap(), ["/a"]);
    }

    #[test]
    fn test_find_response_missing_is_error() {
        let responses = vec![listing_response("only", &["/a"])];
        assert!(find_response(&responses, "other", "management groups").is_err());
    }
}
