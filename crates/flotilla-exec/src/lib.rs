//! flotilla-exec — collaborator seams the kernel consumes.
//!
//! The kernel drives remote nodes and coordinates with other processes
//! only through the traits here: [`RemoteExecutor`] for commands and
//! file transfer, [`DeployLock`] (behind [`LockManager`]) for
//! cross-process deployment locking.

pub mod error;
pub mod lock;
pub mod remote;

pub use error::{ExecError, ExecResult};
pub use lock::{DeployLock, LockGuard, LockManager, LockMode};
pub use remote::{CommandOutput, RemoteExecutor};
