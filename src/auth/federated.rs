//! Bearer token acquisition.
//!
//! Two sources are supported:
//! - static access tokens supplied via `ARM_ACCESS_TOKEN` / `MSGRAPH_ACCESS_TOKEN`
//! - federated exchange: the GitHub-issued OIDC token is swapped for an
//!   audience-scoped access token using a client assertion.
//!
//! Tokens are short-lived, so callers performing long-running work (the batch
//! client in particular) request a fresh token per chunk.

use std::env;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::error::AuthError;

/// Audience for the OIDC token exchange.
const EXCHANGE_AUDIENCE: &str = "api://AzureADTokenExchange";

/// Client assertion type for federated credentials.
const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Target API for a token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Arm,
    Graph,
}

impl Audience {
    /// OAuth scope requested for this audience.
    fn scope(self) -> &'static str {
        match self {
            Audience::Arm => "https://management.azure.com/.default",
            Audience::Graph => "https://graph.microsoft.com/.default",
        }
    }

    /// Environment variable carrying a pre-acquired static token.
    fn static_token_var(self) -> &'static str {
        match self {
            Audience::Arm => "ARM_ACCESS_TOKEN",
            Audience::Graph => "MSGRAPH_ACCESS_TOKEN",
        }
    }
}

/// Supplies bearer tokens per target API.
pub struct TokenProvider {
    http_client: reqwest::Client,
    login_base_url: String,
    tenant_id: Option<String>,
    client_id: Option<String>,
    arm_static_token: Option<String>,
    graph_static_token: Option<String>,
}

impl TokenProvider {
    /// Create a token provider from the loaded configuration and environment.
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            login_base_url: config.api.login_base_url.clone(),
            tenant_id: config.identity.tenant_id.clone(),
            client_id: config.identity.client_id.clone(),
            arm_static_token: env::var(Audience::Arm.static_token_var()).ok(),
            graph_static_token: env::var(Audience::Graph.static_token_var()).ok(),
        })
    }

    /// Acquire a bearer token for the given audience.
    pub async fn token(&self, audience: Audience) -> Result<String, AuthError> {
        let static_token = match audience {
            Audience::Arm => &self.arm_static_token,
            Audience::Graph => &self.graph_static_token,
        };
        if let Some(token) = static_token {
            return Ok(token.clone());
        }

        self.exchange_federated_token(audience).await
    }

    /// Exchange the GitHub-issued OIDC token for an access token.
    async fn exchange_federated_token(&self, audience: Audience) -> Result<String, AuthError> {
        let tenant_id = self
            .tenant_id
            .as_deref()
            .ok_or_else(|| AuthError::MissingEnv("AZURE_TENANT_ID".into()))?;
        let client_id = self
            .client_id
            .as_deref()
            .ok_or_else(|| AuthError::MissingEnv("AZURE_CLIENT_ID".into()))?;
        let request_token = env::var("ACTIONS_ID_TOKEN_REQUEST_TOKEN")
            .map_err(|_| AuthError::MissingEnv("ACTIONS_ID_TOKEN_REQUEST_TOKEN".into()))?;
        let request_url = env::var("ACTIONS_ID_TOKEN_REQUEST_URL")
            .map_err(|_| AuthError::MissingEnv("ACTIONS_ID_TOKEN_REQUEST_URL".into()))?;

        // Get the GitHub OIDC token
        let endpoint = format!("{request_url}&audience={EXCHANGE_AUDIENCE}");
        let response = self
            .http_client
            .get(&endpoint)
            .bearer_auth(&request_token)
            .send()
            .await?;

        if response.status().as_u16() != 200 {
            return Err(AuthError::OidcRequestFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let oidc: OidcTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::OidcRequestFailed(e.to_string()))?;

        // Exchange it for an access token
        let endpoint = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_base_url, tenant_id
        );
        let body = [
            ("client_id", client_id),
            ("scope", audience.scope()),
            ("grant_type", "client_credentials"),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", oidc.value.as_str()),
        ];

        debug!("Exchanging federated credential for {:?} token", audience);

        let response = self.http_client.post(&endpoint).form(&body).send().await?;

        if response.status().as_u16() != 200 {
            return Err(AuthError::TokenExchangeFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(e.to_string()))?;

        Ok(token.access_token)
    }
}

/// GitHub OIDC token endpoint response.
#[derive(Debug, Deserialize)]
struct OidcTokenResponse {
    value: String,
}

/// OAuth token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}
