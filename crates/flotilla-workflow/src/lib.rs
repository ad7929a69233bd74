//! flotilla-workflow — staged lifecycle execution over versioned plugins.
//!
//! An abstract action ("deploy", "start", "upgrade") becomes, per
//! component, a [`WorkflowTemplate`] built by that component's bound
//! [`WorkflowBuilder`]. The [`WorkflowEngine`] then walks the union of
//! stage numbers in ascending order, invoking each [`Capability`] with
//! a mutable view of its component's configuration, the shared
//! cross-component [`Namespaces`], and the remote executor.
//!
//! # Architecture
//!
//! ```text
//! WorkflowEngine
//!   ├── PluginRegistry      which version answers for a capability
//!   ├── CapabilityTable     (component, capability, version) → impl
//!   └── execute()
//!         stage 0..N ascending
//!           component in dependency order
//!             entry in declared order → Capability::invoke
//! ```

pub mod capability;
pub mod engine;
pub mod error;
pub mod namespace;
pub mod template;

pub use capability::{
    Capability, CapabilityTable, InvocationCtx, InvocationOutcome, WorkflowBuilder,
};
pub use engine::{NotFoundPolicy, WorkflowEngine};
pub use error::{WorkflowError, WorkflowResult};
pub use namespace::Namespaces;
pub use template::{FlatTemplate, Kwargs, StageEntry, WorkflowTemplate};
