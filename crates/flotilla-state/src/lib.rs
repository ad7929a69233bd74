//! flotilla-state — on-disk deployment state.
//!
//! One small YAML document per deployment records its status, pending
//! remediation, and per-component bindings; it is read at startup and
//! atomically rewritten on every status transition. A transient upgrade
//! marker alongside it lets an interrupted multi-hop upgrade resume.

pub mod error;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::{ComponentBinding, DeploymentRecord, UpgradeMarker};
