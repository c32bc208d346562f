//! Domain error types

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Unknown sync mode name or code
    #[error("Invalid sync mode: {0}")]
    InvalidSyncMode(String),

    /// No configuration with that name
    #[error("No such server configuration: {0}")]
    NoSuchServer(String),

    /// A requested source is not part of the server configuration
    #[error("No such source in {server}: {source_name}")]
    NoSuchSource {
        /// The server configuration
        server: String,
        /// The unknown source
        source_name: String,
    },

    /// A configuration option that cannot be applied
    #[error("Invalid option {key}: {message}")]
    InvalidOption {
        /// Option key, prefixed with the source name for source options
        key: String,
        /// Human-readable explanation
        message: String,
    },

    /// The engine cannot run the sync
    #[error("Sync failed: {0}")]
    SyncFailed(String),
}
