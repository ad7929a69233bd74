//! Interned server identities.
//!
//! Every `(address, logical name)` pair in a deployment is interned into a
//! shared [`ServerIdentity`] so that identical servers compare equal and
//! hash consistently everywhere. The registry is owned by the deployment
//! context and passed by reference; there is no process-global cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity of a single remote node within a deployment.
///
/// Immutable after creation. Two identities are equal iff both fields
/// match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub address: String,
    /// Operator-facing name; defaults to the address when the declaration
    /// gives a bare address.
    pub logical_name: String,
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.logical_name == self.address {
            f.write_str(&self.address)
        } else {
            write!(f, "{}({})", self.logical_name, self.address)
        }
    }
}

/// Shared handle to an interned identity.
pub type Server = Arc<ServerIdentity>;

/// Flyweight registry of server identities for one deployment context.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    interned: HashMap<ServerIdentity, Server>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a `(address, logical name)` pair, returning the shared
    /// handle. Repeated calls with the same pair return the same `Arc`.
    pub fn intern(&mut self, address: impl Into<String>, logical_name: impl Into<String>) -> Server {
        let identity = ServerIdentity {
            address: address.into(),
            logical_name: logical_name.into(),
        };
        self.interned
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(identity))
            .clone()
    }

    /// Intern a bare address; the logical name defaults to the address.
    pub fn intern_address(&mut self, address: impl Into<String>) -> Server {
        let address = address.into();
        let name = address.clone();
        self.intern(address, name)
    }

    /// Look up an already-interned identity without creating one.
    pub fn get(&self, address: &str, logical_name: &str) -> Option<Server> {
        let key = ServerIdentity {
            address: address.to_string(),
            logical_name: logical_name.to_string(),
        };
        self.interned.get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.interned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interned.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_pairs_share_one_instance() {
        let mut registry = ServerRegistry::new();
        let a = registry.intern("10.0.0.1", "node-a");
        let b = registry.intern("10.0.0.1", "node-a");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_names_are_distinct_identities() {
        let mut registry = ServerRegistry::new();
        let a = registry.intern("10.0.0.1", "node-a");
        let b = registry.intern("10.0.0.1", "node-b");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn bare_address_uses_address_as_name() {
        let mut registry = ServerRegistry::new();
        let s = registry.intern_address("10.0.0.9");
        assert_eq!(s.logical_name, "10.0.0.9");
        assert_eq!(s.to_string(), "10.0.0.9");
    }

    #[test]
    fn display_includes_both_fields_when_named() {
        let mut registry = ServerRegistry::new();
        let s = registry.intern("10.0.0.1", "node-a");
        assert_eq!(s.to_string(), "node-a(10.0.0.1)");
    }
}
