//! Error types for the cluster state store

use thiserror::Error;

/// Cluster state error type
#[derive(Error, Debug)]
pub enum Error {
    /// No record matches the requested cluster
    #[error("Cluster not found: {0}")]
    NotFound(String),

    /// A record with the same identity already exists
    #[error("Cluster already exists: {0}")]
    Conflict(String),

    /// Lookup by name and provider matched clusters in several regions
    #[error("Cluster {name} matches several regions: {}", candidates.join(", "))]
    Ambiguous {
        /// Requested cluster name
        name: String,
        /// Identities that matched
        candidates: Vec<String>,
    },

    /// Identity components are missing or contain reserved characters
    #[error("Invalid cluster identity: {0}")]
    InvalidIdentity(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// File watcher error
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
