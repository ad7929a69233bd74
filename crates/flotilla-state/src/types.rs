//! Persisted state documents.

use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};

use flotilla_core::{ComponentName, ConfigStatus, DeploymentStatus};
use flotilla_upgrade::UpgradeRoute;

/// Concrete build a component is currently bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentBinding {
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// The per-deployment state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub name: String,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub config_status: ConfigStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<ComponentName, ComponentBinding>,
    /// Unix timestamp (seconds) of deployment creation.
    pub create_date: u64,
}

impl DeploymentRecord {
    pub fn new(name: impl Into<String>) -> Self {
        let create_date = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            name: name.into(),
            status: DeploymentStatus::Configured,
            config_status: ConfigStatus::Unchanged,
            bindings: BTreeMap::new(),
            create_date,
        }
    }
}

/// Transient marker recording an in-flight multi-hop upgrade.
///
/// `current_index` points at the next hop to execute within `route`;
/// the marker is removed once the final hop lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeMarker {
    pub component: ComponentName,
    pub route: UpgradeRoute,
    pub current_index: usize,
}
