//! flotilla-config — layered configuration resolution.
//!
//! Turns a hierarchical, partially-overridden declaration into a concrete
//! per-server effective view, and classifies the remediation any edit
//! requires.
//!
//! # Architecture
//!
//! ```text
//! ClusterConfig (one per component)
//!   ├── ParamCatalog (shared, read-only; types, defaults, policies)
//!   ├── layered raw config (include < global < zone < server < inner)
//!   └── per-server effective cache (invalidated per mutation)
//! ConfigDiffClassifier
//!   └── DeploymentSnapshot diff → unchanged/reload/restart/redeploy
//! ```

pub mod diff;
pub mod error;
pub mod spec;
pub mod store;

pub use diff::{classify, classify_running, Classification, ComponentSnapshot, DeploymentSnapshot};
pub use error::{ConfigError, ConfigResult};
pub use spec::{ModifyLimit, MutationPolicy, ParamCatalog, ParamType, ParameterSpec};
pub use store::{ClusterConfig, Scope};
