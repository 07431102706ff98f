//! Error types for the discovery daemon

use stack_common::StackError;
use thiserror::Error;

/// Discovery daemon errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Start parameters or configuration file rejected
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    /// The daemon is already running under another pid
    #[error("Discovery daemon is already running (pid {0})")]
    AlreadyRunning(i32),

    /// Database connection or query failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Administrative command could not be run
    #[error("Administrative command error: {0}")]
    Admin(#[from] StackError),

    /// Signal delivery or handler installation failed
    #[error("Signal error: {0}")]
    Signal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoveryError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors that must prevent the daemon from starting
    /// but say nothing about the health of a running instance.
    pub fn is_config_error(&self) -> bool {
        matches!(self, DiscoveryError::InvalidConfig { .. })
    }
}

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;
