//! Shared types used across Flotilla crates.

use std::collections::BTreeMap;
use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

/// Name of a deployed component (e.g. "tidepool", "tidepool-proxy").
pub type ComponentName = String;

/// A raw configuration mapping, one layer of the effective view.
///
/// Keys are sorted so that serialization is canonical; values are untyped
/// until a `ParameterSpec` catalog coerces them.
pub type ConfigMap = BTreeMap<String, serde_yaml::Value>;

/// A concrete, installed build of a component.
///
/// Distinct from the desired binding carried in a `ClusterConfig`: the
/// desired binding names what the operator asked for, a `Repository` is
/// what actually exists on disk after acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub component: ComponentName,
    pub version: Version,
    /// Packaging release, when the build channel distinguishes one.
    pub release: Option<String>,
    /// Content digest of the installed package, for drift detection.
    pub content_hash: Option<String>,
}

impl Repository {
    pub fn new(component: impl Into<ComponentName>, version: Version) -> Self {
        Self {
            component: component.into(),
            version,
            release: None,
            content_hash: None,
        }
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.release {
            Some(release) => write!(f, "{}-{}-{}", self.component, self.version, release),
            None => write!(f, "{}-{}", self.component, self.version),
        }
    }
}

/// Remediation required to apply a pending configuration change.
///
/// The ladder is ordered: a more severe remediation subsumes a less severe
/// one, so classification can take the max over all changed keys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ConfigStatus {
    #[default]
    Unchanged,
    NeedsReload,
    NeedsRestart,
    NeedsRedeploy,
}

impl ConfigStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConfigStatus::Unchanged => "unchanged",
            ConfigStatus::NeedsReload => "needs-reload",
            ConfigStatus::NeedsRestart => "needs-restart",
            ConfigStatus::NeedsRedeploy => "needs-redeploy",
        }
    }
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle state of a deployment as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Declaration parsed and validated, nothing on the nodes yet.
    Configured,
    /// Binaries and config pushed to all nodes, services not running.
    Deployed,
    Running,
    Stopped,
    /// A multi-hop upgrade is in flight (resumable via the marker).
    Upgrading,
    Destroyed,
}

impl DeploymentStatus {
    /// Whether a transition to `next` is meaningful.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Configured, Deployed)
                | (Deployed, Running)
                | (Running, Stopped)
                | (Running, Upgrading)
                | (Stopped, Running)
                | (Stopped, Upgrading)
                | (Upgrading, Running)
                | (Upgrading, Stopped)
                | (Deployed, Destroyed)
                | (Stopped, Destroyed)
                | (Running, Destroyed)
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Configured => "configured",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Upgrading => "upgrading",
            DeploymentStatus::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remediation_ladder_is_ordered() {
        assert!(ConfigStatus::NeedsRedeploy > ConfigStatus::NeedsRestart);
        assert!(ConfigStatus::NeedsRestart > ConfigStatus::NeedsReload);
        assert!(ConfigStatus::NeedsReload > ConfigStatus::Unchanged);
    }

    #[test]
    fn status_transitions() {
        assert!(DeploymentStatus::Configured.can_transition_to(DeploymentStatus::Deployed));
        assert!(DeploymentStatus::Running.can_transition_to(DeploymentStatus::Upgrading));
        assert!(!DeploymentStatus::Configured.can_transition_to(DeploymentStatus::Running));
        assert!(!DeploymentStatus::Destroyed.can_transition_to(DeploymentStatus::Running));
    }

    #[test]
    fn repository_display() {
        let repo = Repository::new("tidepool", Version::new(5, 2, 1)).with_release("20240110");
        assert_eq!(repo.to_string(), "tidepool-5.2.1-20240110");
    }
}
