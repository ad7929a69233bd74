//! State persistence error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O failed at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state document: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("corrupt state document {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type StateResult<T> = Result<T, StateError>;
