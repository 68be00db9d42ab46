//! Core error types for vigil-core.
//!
//! This module defines the error hierarchy using thiserror. Task code
//! distinguishes four classes of failure: storage errors that abort a
//! whole task run, storage errors isolated to one subject, transient
//! gateway/provider errors, and audit-log failures which are always
//! swallowed by the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for vigil-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Notification gateway errors
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Activity provider errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A persisted row holds a value the engine cannot interpret
    #[error("Malformed stored value in {entity} row {id}: {message}")]
    MalformedRow {
        entity: &'static str,
        id: i64,
        message: String,
    },

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Notification gateway errors.
///
/// Gateways are fire-and-forget collaborators; these errors are logged by
/// the tasks and never abort a run.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Gateway is missing required configuration (endpoint, token, ...)
    #[error("Gateway '{gateway}' is not configured: {message}")]
    NotConfigured { gateway: String, message: String },

    /// The remote service rejected the request
    #[error("Gateway '{gateway}' returned HTTP {status}: {body}")]
    Rejected {
        gateway: String,
        status: u16,
        body: String,
    },

    /// Transport-level failure
    #[error("Gateway '{gateway}' request failed: {source}")]
    Transport {
        gateway: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Activity provider errors.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The remote service rejected the request
    #[error("Provider '{provider}' returned HTTP {status}")]
    Rejected { provider: String, status: u16 },

    /// Transport-level failure
    #[error("Provider '{provider}' request failed: {source}")]
    Transport {
        provider: String,
        #[source]
        source: reqwest::Error,
    },

    /// The feed payload could not be interpreted
    #[error("Provider '{provider}' returned an unparseable feed: {message}")]
    MalformedFeed { provider: String, message: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    StorageError::Locked
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
