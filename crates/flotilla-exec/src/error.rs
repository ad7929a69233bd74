//! Collaborator error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    /// Propagated from the remote executor; the kernel never fabricates
    /// one of these.
    #[error("remote execution failed on {server}: {command}: {message}")]
    RemoteExecution {
        server: String,
        command: String,
        message: String,
    },

    #[error("file transfer failed on {server}: {path}: {message}")]
    Transfer {
        server: String,
        path: String,
        message: String,
    },

    #[error("could not acquire {mode} lock on {name} after {attempts} attempts")]
    LockTimeout {
        name: String,
        mode: &'static str,
        attempts: u32,
    },

    #[error("lock {name}: {message}")]
    Lock { name: String, message: String },
}

pub type ExecResult<T> = Result<T, ExecError>;
