use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

/// Error taxonomy for the federation node.
#[derive(Error, Debug)]
pub enum NodeError {
    // Persistence
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<sea_orm::DbErr>>,
    },

    #[error(transparent)]
    Model(#[from] tpn_model::Error),

    // Container control plane
    #[error("Container command failed in '{container}': {message}")]
    Container { container: String, message: String },

    #[error("Command timed out after {timeout:?}: {command}")]
    CommandTimeout { command: String, timeout: Duration },

    #[error("{what} not ready within {budget:?}")]
    NotReady { what: String, budget: Duration },

    #[error("Dante regeneration timed out for user '{username}'")]
    DanteRegenTimeout { username: String },

    // Lease engine
    #[error("{pool} lease pool exhausted; soonest expiry at {soonest_expiry_ms:?}")]
    LeaseExhausted {
        pool: String,
        soonest_expiry_ms: Option<i64>,
    },

    // Concurrency
    #[error("Timed out acquiring lock '{name}' after {timeout:?}")]
    LockTimeout { name: String, timeout: Duration },

    // Federation
    #[error("Upstream request failed: {url}: {message}")]
    Upstream { url: String, message: String },

    #[error("All fan-out attempts exhausted: {message}")]
    FanOutExhausted { message: String },

    // Parsing
    #[error("WireGuard config parse error: {message}")]
    WireGuardParse { message: String },

    #[error("Validation failed: {field} - {message}")]
    ValidationFailed { field: String, message: String },

    // Access control
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    // Configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl NodeError {
    /// Transient errors are retried with backoff; everything else fails fast.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NodeError::Upstream { .. }
                | NodeError::CommandTimeout { .. }
                | NodeError::NotReady { .. }
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        NodeError::Internal {
            message: message.into(),
        }
    }

    pub fn upstream(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        NodeError::Upstream {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

impl From<sea_orm::DbErr> for NodeError {
    fn from(e: sea_orm::DbErr) -> Self {
        NodeError::Database {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(e: reqwest::Error) -> Self {
        NodeError::Upstream {
            url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            message: e.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {field} - {message}")]
    Invalid { field: String, message: String },

    #[error("Failed to read config file: {0}")]
    Read(String),

    #[error("Failed to parse config file: {0}")]
    Parse(String),
}
