//! Error types for the aztier application.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("ARM error: {0}")]
    Arm(#[from] ArmError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("AAT error: {0}")]
    Aat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Token acquisition errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    #[error("OIDC token request failed: {0}")]
    OidcRequestFailed(String),

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// ARM (Azure Resource Manager) errors, including the batch endpoint.
#[derive(Error, Debug)]
pub enum ArmError {
    /// Token acquisition failed while preparing a chunk.
    #[error("Token acquisition failed: {0}")]
    Auth(#[from] AuthError),

    /// The top-level batch call returned something other than 200 or 202.
    #[error("Batch call returned unexpected status {status}")]
    UnexpectedBatchStatus { status: u16 },

    /// An asynchronous (202) response never reached 200.
    #[error("Asynchronous batch response failed with status {status}")]
    AsyncResponseFailed { status: u16 },

    /// A 202 response carried no `Location` header to poll.
    #[error("Asynchronous batch response is missing a Location header")]
    MissingLocation,

    /// The per-chunk retry budget ran out while requests were still failing.
    #[error("Retry budget exhausted after {rounds} rounds ({remaining} requests still failing)")]
    RetryRoundsExhausted { rounds: u32, remaining: usize },

    #[error("Request failed with status {status}: {context}")]
    RequestFailed { status: u16, context: String },

    #[error("Failed to parse ARM response: {0}")]
    Parse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Directory-graph (MS Graph) errors.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Token acquisition failed while preparing a request.
    #[error("Token acquisition failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Graph request failed with status {status}: {context}")]
    RequestFailed { status: u16, context: String },

    #[error("Failed to parse Graph response: {0}")]
    Parse(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Tiered/untiered JSON store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON in a local tier file is unrecoverable.
    #[error("{path} does not contain valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
