//! Client for the upstream Azure Administrative Tiering (AAT) project.
//!
//! The AAT project publishes community-maintained tier classifications for
//! built-in Azure roles, Entra roles and MS Graph application permissions as
//! raw JSON documents. The Syncer treats them as the canonical source.
//!
//! References:
//! <https://github.com/emiliensocchi/azure-tiering>

use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::error::AppError;
use crate::tier::assets::AatAsset;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Upstream document paths, relative to the AAT base URL.
const AZURE_ROLES_PATH: &str = "/Azure%20roles/tiered-azure-roles.json";
const ENTRA_ROLES_PATH: &str = "/Entra%20roles/tiered-entra-roles.json";
const APP_PERMISSIONS_PATH: &str =
    "/Microsoft%20Graph%20application%20permissions/tiered-msgraph-app-permissions.json";

/// Fetches the upstream tiered classifications.
pub struct AatClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl AatClient {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            http_client,
            base_url: config.api.aat_base_url.clone(),
        })
    }

    /// Tiered built-in Azure roles from the AAT project.
    pub async fn tiered_azure_roles(&self) -> Result<Vec<AatAsset>, AppError> {
        self.fetch(AZURE_ROLES_PATH, "Azure roles").await
    }

    /// Tiered built-in Entra roles from the AAT project.
    pub async fn tiered_entra_roles(&self) -> Result<Vec<AatAsset>, AppError> {
        self.fetch(ENTRA_ROLES_PATH, "Entra roles").await
    }

    /// Tiered MS Graph application permissions from the AAT project.
    pub async fn tiered_app_permissions(&self) -> Result<Vec<AatAsset>, AppError> {
        self.fetch(APP_PERMISSIONS_PATH, "MS Graph application permissions")
            .await
    }

    async fn fetch(&self, path: &str, what: &str) -> Result<Vec<AatAsset>, AppError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http_client.get(&url).send().await?;

        if response.status().as_u16() != 200 {
            return Err(AppError::Aat(format!(
                "the tiered {what} could not be retrieved from the AAT project (HTTP {})",
                response.status()
            )));
        }

        let assets: Vec<AatAsset> = response
            .json()
            .await
            .map_err(|e| AppError::Aat(format!("malformed tiered {what} from AAT: {e}")))?;

        info!("fetched {} tiered {what} from the AAT project", assets.len());
        Ok(assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_tiered_roles_parsed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": "abc",
                    "assetName": "Owner",
                    "assetDefinition": "Grants full access",
                    "documentationUri": "https://learn.microsoft.com/...",
                    "tier": "0"
                }
            ])))
            .mount(&server)
            .await;

        let mut config = config::test_config();
        config.api.aat_base_url = server.uri();
        let client = AatClient::new(&config).unwrap();

        let roles = client.tiered_azure_roles().await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].asset_name, "Owner");
        assert_eq!(roles[0].tier.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_fatal() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut config = config::test_config();
        config.api.aat_base_url = server.uri();
        let client = AatClient::new(&config).unwrap();

        assert!(client.tiered_entra_roles().await.is_err());
    }
}
