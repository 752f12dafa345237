//! Configuration loading and management.
//!
//! Loads configuration from the embedded config.toml with environment variable
//! overrides, merges the workflow settings from the project's `config.json`,
//! and validates everything up front. The resulting [`Config`] is built once
//! at process start and passed by reference into every component — no ambient
//! environment lookups happen inside business logic.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub retry: RetryConfig,
    pub files: FilesConfig,
    pub logging: LoggingConfig,

    /// Workflow settings from the project's config.json.
    #[serde(skip)]
    pub workflow: WorkflowConfig,

    /// Identity parameters consumed from the environment.
    #[serde(skip)]
    pub identity: IdentityConfig,
}

/// Base URLs of the external APIs.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub arm_base_url: String,
    pub graph_base_url: String,
    pub login_base_url: String,
    pub aat_base_url: String,
}

/// Retry and backoff tuning for the batch client.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Ceiling on retry rounds per chunk before the run is aborted.
    pub max_rounds: u32,
    pub throttle_fallback_secs: u64,
    pub server_error_backoff_secs: u64,
    pub poll_fallback_secs: u64,
}

impl RetryConfig {
    pub fn throttle_fallback(&self) -> Duration {
        Duration::from_secs(self.throttle_fallback_secs)
    }

    pub fn server_error_backoff(&self) -> Duration {
        Duration::from_secs(self.server_error_backoff_secs)
    }

    pub fn poll_fallback(&self) -> Duration {
        Duration::from_secs(self.poll_fallback_secs)
    }
}

/// Directory names holding the tiered/untiered JSON files, relative to the
/// project root.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    pub azure_dir: String,
    pub entra_dir: String,
    pub msgraph_dir: String,
}

impl FilesConfig {
    pub fn azure_tiered(&self, root: &Path) -> PathBuf {
        root.join(&self.azure_dir).join("tiered-azure-roles.json")
    }

    pub fn azure_untiered(&self, root: &Path) -> PathBuf {
        root.join(&self.azure_dir).join("untiered-azure-roles.json")
    }

    pub fn entra_tiered(&self, root: &Path) -> PathBuf {
        root.join(&self.entra_dir).join("tiered-entra-roles.json")
    }

    pub fn entra_untiered(&self, root: &Path) -> PathBuf {
        root.join(&self.entra_dir).join("untiered-entra-roles.json")
    }

    pub fn msgraph_tiered(&self, root: &Path) -> PathBuf {
        root.join(&self.msgraph_dir)
            .join("tiered-msgraph-app-permissions.json")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Identity parameters for the federated token exchange. Empty when static
/// access tokens are supplied directly via the environment.
#[derive(Debug, Clone, Default)]
pub struct IdentityConfig {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
}

/// The three workflow booleans from the project's config.json.
///
/// The file carries them as `"true"`/`"false"` strings (case-insensitive);
/// any other value is a fatal configuration error.
#[derive(Debug, Clone, Default)]
pub struct WorkflowConfig {
    pub keep_local_changes: bool,
    pub include_only_roles_in_use: bool,
    pub include_individual_resource_scope: bool,
}

/// Raw shape of the project's config.json.
#[derive(Debug, Deserialize)]
struct RawWorkflowConfig {
    #[serde(rename = "keepLocalChanges")]
    keep_local_changes: String,
    #[serde(rename = "includeOnlyRolesInUse")]
    include_only_roles_in_use: String,
    #[serde(rename = "includeIndividualResourceScope")]
    include_individual_resource_scope: String,
}

impl Config {
    /// Load configuration from the embedded config.toml, the project's
    /// config.json and the environment.
    pub fn load(project_config: &Path) -> Result<Self> {
        let mut config: Config =
            toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")?;

        // Apply environment variable overrides
        if let Ok(arm_base_url) = env::var("AZTIER_ARM_BASE_URL") {
            config.api.arm_base_url = arm_base_url;
        }

        if let Ok(graph_base_url) = env::var("AZTIER_GRAPH_BASE_URL") {
            config.api.graph_base_url = graph_base_url;
        }

        if let Ok(aat_base_url) = env::var("AZTIER_AAT_BASE_URL") {
            config.api.aat_base_url = aat_base_url;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.identity = IdentityConfig {
            tenant_id: env::var("AZURE_TENANT_ID").ok(),
            client_id: env::var("AZURE_CLIENT_ID").ok(),
        };

        config.workflow = load_workflow_config(project_config)?;

        Ok(config)
    }
}

/// Parse the project's config.json into a validated [`WorkflowConfig`].
fn load_workflow_config(path: &Path) -> Result<WorkflowConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("The config JSON file could not be retrieved: {}", path.display()))?;
    let raw: RawWorkflowConfig = serde_json::from_str(&contents)
        .with_context(|| format!("The config JSON file could not be parsed: {}", path.display()))?;

    Ok(WorkflowConfig {
        keep_local_changes: parse_bool_setting("keepLocalChanges", &raw.keep_local_changes)?,
        include_only_roles_in_use: parse_bool_setting(
            "includeOnlyRolesInUse",
            &raw.include_only_roles_in_use,
        )?,
        include_individual_resource_scope: parse_bool_setting(
            "includeIndividualResourceScope",
            &raw.include_individual_resource_scope,
        )?,
    })
}

/// Accepts only `"true"`/`"false"`, case-insensitive.
fn parse_bool_setting(name: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => anyhow::bail!(
            "The '{name}' value set in the project's configuration file is invalid. \
             Accepted values are: 'True', 'False'"
        ),
    }
}

/// Embedded defaults with no workflow/identity data, for tests that point
/// clients at a mock server.
#[cfg(test)]
pub fn test_config() -> Config {
    toml::from_str(CONFIG_TOML).expect("embedded config.toml must parse")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_embedded_config_parses() {
        let result = toml::from_str::<Config>(CONFIG_TOML);
        assert!(result.is_ok(), "Config parsing failed: {:?}", result.err());
    }

    #[test]
    fn test_embedded_defaults() {
        let config: Config = toml::from_str(CONFIG_TOML).unwrap();
        assert_eq!(config.api.arm_base_url, "https://management.azure.com");
        assert_eq!(config.retry.max_rounds, 10);
        assert_eq!(config.retry.throttle_fallback(), Duration::from_secs(20));
        assert_eq!(
            config.retry.server_error_backoff(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_bool_setting_case_insensitive() {
        assert!(parse_bool_setting("keepLocalChanges", "True").unwrap());
        assert!(parse_bool_setting("keepLocalChanges", "TRUE").unwrap());
        assert!(!parse_bool_setting("keepLocalChanges", "false").unwrap());
    }

    #[test]
    fn test_bool_setting_rejects_other_values() {
        let err = parse_bool_setting("includeOnlyRolesInUse", "yes").unwrap_err();
        assert!(err.to_string().contains("includeOnlyRolesInUse"));
        assert!(parse_bool_setting("includeOnlyRolesInUse", "").is_err());
        assert!(parse_bool_setting("includeOnlyRolesInUse", "1").is_err());
    }

    #[test]
    fn test_workflow_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"keepLocalChanges": "False", "includeOnlyRolesInUse": "true", "includeIndividualResourceScope": "false"}}"#
        )
        .unwrap();

        let workflow = load_workflow_config(file.path()).unwrap();
        assert!(!workflow.keep_local_changes);
        assert!(workflow.include_only_roles_in_use);
        assert!(!workflow.include_individual_resource_scope);
    }

    #[test]
    fn test_workflow_config_invalid_value_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"keepLocalChanges": "maybe", "includeOnlyRolesInUse": "true", "includeIndividualResourceScope": "false"}}"#
        )
        .unwrap();

        assert!(load_workflow_config(file.path()).is_err());
    }
}
