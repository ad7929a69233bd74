//! Plugin descriptors.

use std::path::PathBuf;

use semver::Version;

use flotilla_core::ComponentName;

/// One versioned implementation of a capability, discovered on disk.
///
/// Immutable once loaded; the registry may hold many descriptors per
/// `(component, capability)`, keyed by version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub component: ComponentName,
    pub capability: String,
    pub version: Version,
    /// Directory holding this version's implementation.
    pub path: PathBuf,
}

impl PluginDescriptor {
    /// Key into the capability dispatch table.
    pub fn key(&self) -> (ComponentName, String, Version) {
        (
            self.component.clone(),
            self.capability.clone(),
            self.version.clone(),
        )
    }
}

/// A resolution result; `fallback` marks a best-effort downgrade to the
/// highest version below the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlugin {
    pub descriptor: PluginDescriptor,
    pub fallback: bool,
}
