//! Configuration change classification.
//!
//! Compares two deployment snapshots and decides the remediation the
//! change demands. Classification is monotonic over the
//! [`ConfigStatus`] ladder: once a comparison reaches a severity it can
//! only go up, never down.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_yaml::Value;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::spec::{numeric, ModifyLimit, ParamCatalog};
use crate::store::ClusterConfig;
use flotilla_core::topology::RuntimeDependency;
use flotilla_core::{ComponentName, ConfigMap, ConfigStatus, ServerIdentity};

/// Point-in-time view of one component's resolved configuration.
#[derive(Debug, Clone)]
pub struct ComponentSnapshot {
    pub servers: BTreeSet<ServerIdentity>,
    pub global: ConfigMap,
    /// Effective per-server view, keyed by logical name.
    pub per_server: BTreeMap<String, ConfigMap>,
    /// Run-as user/credential, when declared.
    pub user: Option<String>,
    pub runtime_sync: Vec<RuntimeDependency>,
    pub catalog: Arc<ParamCatalog>,
}

/// Point-in-time view of a whole deployment.
#[derive(Debug, Clone, Default)]
pub struct DeploymentSnapshot {
    pub components: BTreeMap<ComponentName, ComponentSnapshot>,
}

/// Outcome of comparing two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: ConfigStatus,
    /// `(component, key)` pairs whose value changed.
    pub changed_keys: BTreeSet<(ComponentName, String)>,
}

impl ClusterConfig {
    /// Capture this component's resolved state for diffing.
    pub fn snapshot(&mut self) -> ConfigResult<ComponentSnapshot> {
        let servers: Vec<_> = self.servers().to_vec();
        let mut per_server = BTreeMap::new();
        for server in &servers {
            per_server.insert(server.logical_name.clone(), self.get_effective(server)?);
        }
        let global = self.get_global_effective()?;
        let user = global.get("user").and_then(value_as_string);
        Ok(ComponentSnapshot {
            servers: servers.iter().map(|s| (**s).clone()).collect(),
            global,
            per_server,
            user,
            runtime_sync: self.runtime_dependencies().to_vec(),
            catalog: self.catalog().clone(),
        })
    }
}

/// Classify the remediation a pending edit requires.
pub fn classify(old: &DeploymentSnapshot, new: &DeploymentSnapshot) -> Classification {
    let old_names: BTreeSet<_> = old.components.keys().collect();
    let new_names: BTreeSet<_> = new.components.keys().collect();
    if old_names != new_names {
        info!("component set changed, redeploy required");
        return Classification {
            status: ConfigStatus::NeedsRedeploy,
            changed_keys: BTreeSet::new(),
        };
    }

    let mut status = ConfigStatus::Unchanged;
    let mut changed_keys = BTreeSet::new();

    for (name, old_comp) in &old.components {
        let new_comp = &new.components[name];

        if old_comp.servers != new_comp.servers {
            info!(component = %name, "server list changed, redeploy required");
            status = status.max(ConfigStatus::NeedsRedeploy);
            continue;
        }
        if old_comp.user != new_comp.user {
            info!(component = %name, "run user changed, redeploy required");
            status = status.max(ConfigStatus::NeedsRedeploy);
        }
        if old_comp.runtime_sync != new_comp.runtime_sync {
            info!(component = %name, "runtime data sync list changed, redeploy required");
            status = status.max(ConfigStatus::NeedsRedeploy);
        }

        for key in changed_between(&old_comp.global, &new_comp.global) {
            status = status.max(key_severity(&new_comp.catalog, &key));
            changed_keys.insert((name.clone(), key));
        }
        for (server, new_map) in &new_comp.per_server {
            let empty = ConfigMap::new();
            let old_map = old_comp.per_server.get(server).unwrap_or(&empty);
            for key in changed_between(old_map, new_map) {
                status = status.max(key_severity(&new_comp.catalog, &key));
                changed_keys.insert((name.clone(), key));
            }
        }
    }

    debug!(status = %status, changed = changed_keys.len(), "classified configuration diff");
    Classification {
        status,
        changed_keys,
    }
}

/// Classify an edit against a running deployment.
///
/// Modify limits are enforced here as well: a violated limit blocks the
/// edit outright instead of being folded into the classification.
pub fn classify_running(
    old: &DeploymentSnapshot,
    new: &DeploymentSnapshot,
) -> ConfigResult<Classification> {
    for (name, new_comp) in &new.components {
        let Some(old_comp) = old.components.get(name) else {
            continue;
        };
        check_limits(name, &old_comp.global, &new_comp.global, &new_comp.catalog)?;
        for (server, new_map) in &new_comp.per_server {
            if let Some(old_map) = old_comp.per_server.get(server) {
                check_limits(name, old_map, new_map, &new_comp.catalog)?;
            }
        }
    }
    Ok(classify(old, new))
}

fn check_limits(
    component: &str,
    old: &ConfigMap,
    new: &ConfigMap,
    catalog: &ParamCatalog,
) -> ConfigResult<()> {
    for key in changed_between(old, new) {
        let Some(spec) = catalog.get(&key) else {
            continue;
        };
        let (Some(prev), Some(req)) = (old.get(&key), new.get(&key)) else {
            // Added or removed keys have no previous value to compare.
            continue;
        };
        let violated = match spec.modify_limit {
            ModifyLimit::None => false,
            ModifyLimit::Fixed => true,
            ModifyLimit::IncreaseOnly => match (numeric(prev), numeric(req)) {
                (Some(p), Some(r)) => r < p,
                _ => true,
            },
            ModifyLimit::DecreaseOnly => match (numeric(prev), numeric(req)) {
                (Some(p), Some(r)) => r > p,
                _ => true,
            },
        };
        if violated {
            return Err(ConfigError::ModifyLimitViolation {
                component: component.to_string(),
                key,
                limit: spec.modify_limit,
                previous: display(prev),
                requested: display(req),
            });
        }
    }
    Ok(())
}

/// A changed key requires at least a reload; the catalog policy can
/// raise that to restart or redeploy.
fn key_severity(catalog: &ParamCatalog, key: &str) -> ConfigStatus {
    let policy = catalog
        .get(key)
        .map(|spec| spec.mutation_policy.remediation())
        .unwrap_or_default();
    policy.max(ConfigStatus::NeedsReload)
}

fn changed_between(old: &ConfigMap, new: &ConfigMap) -> Vec<String> {
    let mut keys: BTreeSet<&String> = old.keys().collect();
    keys.extend(new.keys());
    keys.into_iter()
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect()
}

fn value_as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn display(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| format!("{value:?}"))
}
