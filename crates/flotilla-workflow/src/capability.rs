//! Capability interface and dispatch table.
//!
//! A capability is a named function-like unit with a fixed call
//! signature; no per-capability wrapper types exist. Implementations are
//! bound into a dispatch table keyed by the descriptor's
//! `(component, capability, version)` triple.

use std::collections::HashMap;
use std::sync::Arc;

use semver::Version;
use serde_yaml::Value;

use crate::error::WorkflowResult;
use crate::namespace::Namespaces;
use crate::template::{Kwargs, WorkflowTemplate};
use flotilla_config::ClusterConfig;
use flotilla_core::ComponentName;
use flotilla_exec::RemoteExecutor;
use flotilla_plugin::PluginDescriptor;

/// Everything one invocation may touch.
pub struct InvocationCtx<'a> {
    /// The invoking component's configuration view (server list already
    /// narrowed when the entry declared target servers).
    pub config: &'a mut ClusterConfig,
    pub namespaces: &'a mut Namespaces,
    pub kwargs: &'a Kwargs,
    pub executor: &'a dyn RemoteExecutor,
}

/// Result of one invocation: success flag, optional payload, and
/// keyword outputs merged into the component's namespace.
#[derive(Debug, Clone, Default)]
pub struct InvocationOutcome {
    pub success: bool,
    pub payload: Option<Value>,
    pub outputs: Kwargs,
}

impl InvocationOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            payload: None,
            outputs: Kwargs::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Some(Value::String(message.into())),
            outputs: Kwargs::new(),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(key.into(), value);
        self
    }
}

/// A versioned lifecycle operation (e.g. "start", "bootstrap").
pub trait Capability: Send + Sync {
    fn invoke(&self, ctx: &mut InvocationCtx<'_>) -> WorkflowResult<InvocationOutcome>;
}

/// Builds a component's template for one abstract action by appending
/// stage entries.
pub trait WorkflowBuilder: Send + Sync {
    fn build(&self, template: &mut WorkflowTemplate, kwargs: &Kwargs) -> WorkflowResult<()>;
}

type Key = (ComponentName, String, Version);

/// Dispatch table binding descriptors to executable units.
#[derive(Default)]
pub struct CapabilityTable {
    capabilities: HashMap<Key, Arc<dyn Capability>>,
    builders: HashMap<Key, Arc<dyn WorkflowBuilder>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, descriptor: &PluginDescriptor, implementation: Arc<dyn Capability>) {
        self.capabilities.insert(descriptor.key(), implementation);
    }

    pub fn bind_builder(
        &mut self,
        descriptor: &PluginDescriptor,
        builder: Arc<dyn WorkflowBuilder>,
    ) {
        self.builders.insert(descriptor.key(), builder);
    }

    pub fn capability_for(&self, descriptor: &PluginDescriptor) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(&descriptor.key()).cloned()
    }

    pub fn builder_for(&self, descriptor: &PluginDescriptor) -> Option<Arc<dyn WorkflowBuilder>> {
        self.builders.get(&descriptor.key()).cloned()
    }
}

impl std::fmt::Debug for CapabilityTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityTable")
            .field("capabilities", &self.capabilities.len())
            .field("builders", &self.builders.len())
            .finish()
    }
}
