//! Core error types.

use thiserror::Error;

/// Errors from declaration parsing and core bookkeeping.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read declaration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse declaration {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to serialize declaration: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("component {component}: invalid version string {version:?}: {source}")]
    InvalidVersion {
        component: String,
        version: String,
        #[source]
        source: semver::Error,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;
