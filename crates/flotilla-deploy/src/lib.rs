//! flotilla-deploy — the deployment aggregate and its lifecycle actions.
//!
//! This crate ties the kernel together: a [`Deployment`] owns the
//! per-component configuration stores, dependency graph, and status
//! machine; an [`ActionRunner`] drives lifecycle actions through the
//! workflow engine under the deployment lock, persisting every status
//! transition and upgrade hop.
//!
//! # Architecture
//!
//! ```text
//! ActionRunner
//!   ├── exclusive DeployLock per action
//!   ├── WorkflowEngine       staged execution per component
//!   ├── upgrade planner      multi-hop routes + resumable marker
//!   └── StateStore           meta.yaml / upgrade.yaml per deployment
//! Deployment
//!   ├── ClusterConfig per component (+ DependencyGraph)
//!   ├── status machine        Configured → Deployed → Running ⇄ Stopped
//!   └── edit classification   snapshot → classify → pending remediation
//! ```

pub mod actions;
pub mod deployment;
pub mod error;

pub use actions::ActionRunner;
pub use deployment::Deployment;
pub use error::{DeployError, DeployResult};
