//! Error taxonomy shared across the workspace.
//!
//! Transport failures never appear here: the avatar session recovers them
//! internally (log + backoff) and nothing above it needs to see them.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the configuration persistence layer.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config at {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by engine operations. Fatal to the operation that hit
/// them, never to the process: the dialogue loop logs and re-arms.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration cannot support the requested operation
    /// (e.g. picking a topic from an empty topic list).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] ConfigError),
}
