//! Cross-component namespaces.
//!
//! Each component gets a scratch area holding return values from
//! completed invocations, readable by every later invocation in the
//! same action (including other components').

use std::collections::BTreeMap;

use serde_yaml::Value;

use flotilla_core::ComponentName;

/// Per-component scratch areas for one lifecycle action.
#[derive(Debug, Clone, Default)]
pub struct Namespaces {
    inner: BTreeMap<ComponentName, BTreeMap<String, Value>>,
}

impl Namespaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, component: &str, key: impl Into<String>, value: Value) {
        self.inner
            .entry(component.to_string())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn read(&self, component: &str, key: &str) -> Option<&Value> {
        self.inner.get(component)?.get(key)
    }

    /// Everything a component has published so far.
    pub fn component(&self, component: &str) -> Option<&BTreeMap<String, Value>> {
        self.inner.get(component)
    }
}
