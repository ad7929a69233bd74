//! The deployment aggregate.
//!
//! A `Deployment` owns one `ClusterConfig` per declared component, the
//! cross-component dependency graph, the interned server registry, and
//! the current status pair (lifecycle status plus pending remediation).
//! Everything that must stay consistent across components goes through
//! this type; lifecycle actions themselves live in [`crate::actions`].

use std::collections::BTreeMap;
use std::sync::Arc;

use semver::Version;
use tracing::{debug, info};

use crate::error::{DeployError, DeployResult};
use flotilla_config::{
    classify, classify_running, Classification, ClusterConfig, DeploymentSnapshot, ParamCatalog,
};
use flotilla_core::{
    ComponentName, ConfigMap, ConfigStatus, DeploymentStatus, IncludeDoc, Repository, Server,
    ServerRegistry, TopologyDecl,
};
use flotilla_graph::DependencyGraph;
use flotilla_state::{ComponentBinding, DeploymentRecord};

#[derive(Debug)]
pub struct Deployment {
    name: String,
    status: DeploymentStatus,
    config_status: ConfigStatus,
    components: BTreeMap<ComponentName, ClusterConfig>,
    /// Component names in declaration order, for stable tie-breaking.
    declared: Vec<ComponentName>,
    graph: DependencyGraph,
    registry: ServerRegistry,
    /// Installed build per component; absent until first deploy.
    bindings: BTreeMap<ComponentName, Repository>,
    create_date: u64,
}

impl Deployment {
    /// Build a deployment from a parsed topology declaration.
    ///
    /// `includes` holds the resolved include documents (see
    /// [`TopologyDecl::resolve_includes`]); `catalogs` the parameter
    /// catalog per component, defaulting to an empty catalog for
    /// components without one.
    pub fn from_decl(
        name: impl Into<String>,
        decl: &TopologyDecl,
        includes: &BTreeMap<ComponentName, IncludeDoc>,
        catalogs: &BTreeMap<ComponentName, Arc<ParamCatalog>>,
    ) -> DeployResult<Self> {
        let name = name.into();
        let mut registry = ServerRegistry::new();
        let mut components = BTreeMap::new();
        let mut declared = Vec::new();
        let mut graph = DependencyGraph::new();

        for (component, cdecl) in &decl.components {
            let catalog = catalogs
                .get(component)
                .cloned()
                .unwrap_or_else(|| Arc::new(ParamCatalog::default()));
            let config = ClusterConfig::from_decl(
                component,
                cdecl,
                includes.get(component),
                catalog,
                &mut registry,
            )?;
            declared.push(component.clone());
            components.insert(component.clone(), config);
        }

        // Wire the graph first; it rejects declared cycles regardless of
        // declaration order.
        for (component, cdecl) in &decl.components {
            for dep in &cdecl.depends {
                graph.add_edge(component, dep)?;
            }
        }

        // Union config-layer closures dependencies-first, so each
        // component's transitive closure is complete before a dependent
        // absorbs it. Declaration order alone would leave closures stale.
        for component in graph.topo_order(&declared) {
            let Some(cdecl) = decl.components.get(&component) else {
                continue;
            };
            for dep in &cdecl.depends {
                let other = components.remove(dep).ok_or_else(|| {
                    DeployError::UnknownComponent {
                        component: dep.clone(),
                    }
                })?;
                let wired = components
                    .get_mut(&component)
                    .map(|c| c.add_dependency(dep, &other));
                components.insert(dep.clone(), other);
                if let Some(result) = wired {
                    result?;
                }
            }
        }

        let create_date = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        info!(deployment = %name, components = declared.len(), "deployment built");
        Ok(Self {
            name,
            status: DeploymentStatus::Configured,
            config_status: ConfigStatus::Unchanged,
            components,
            declared,
            graph,
            registry,
            bindings: BTreeMap::new(),
            create_date,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    pub fn config_status(&self) -> ConfigStatus {
        self.config_status
    }

    pub fn component_names(&self) -> &[ComponentName] {
        &self.declared
    }

    pub fn component(&self, name: &str) -> DeployResult<&ClusterConfig> {
        self.components
            .get(name)
            .ok_or_else(|| DeployError::UnknownComponent {
                component: name.to_string(),
            })
    }

    pub fn component_mut(&mut self, name: &str) -> DeployResult<&mut ClusterConfig> {
        self.components
            .get_mut(name)
            .ok_or_else(|| DeployError::UnknownComponent {
                component: name.to_string(),
            })
    }

    /// The full component map, for handing to the workflow engine.
    pub fn configs_mut(&mut self) -> &mut BTreeMap<ComponentName, ClusterConfig> {
        &mut self.components
    }

    /// Components ordered dependencies-first, declaration order breaking
    /// ties.
    pub fn execution_order(&self) -> Vec<ComponentName> {
        self.graph.topo_order(&self.declared)
    }

    pub fn intern_server(
        &mut self,
        address: impl Into<String>,
        logical_name: impl Into<String>,
    ) -> Server {
        self.registry.intern(address, logical_name)
    }

    // ── Status machine ─────────────────────────────────────────────

    pub fn check_transition(&self, next: DeploymentStatus) -> DeployResult<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(DeployError::InvalidTransition {
                name: self.name.clone(),
                from: self.status,
                to: next,
            })
        }
    }

    pub fn transition(&mut self, next: DeploymentStatus) -> DeployResult<()> {
        self.check_transition(next)?;
        info!(deployment = %self.name, from = %self.status, to = %next, "status transition");
        self.status = next;
        Ok(())
    }

    // ── Edit classification ────────────────────────────────────────

    /// Capture the resolved state of every component for diffing.
    pub fn snapshot(&mut self) -> DeployResult<DeploymentSnapshot> {
        let mut components = BTreeMap::new();
        for (name, config) in &mut self.components {
            components.insert(name.clone(), config.snapshot()?);
        }
        Ok(DeploymentSnapshot { components })
    }

    /// Classify the edits made since `before` and raise the pending
    /// remediation accordingly.
    ///
    /// Against a running deployment, modify limits are re-checked and a
    /// violation blocks the edit before any classification happens.
    pub fn classify_edit(
        &mut self,
        before: &DeploymentSnapshot,
    ) -> DeployResult<Classification> {
        let after = self.snapshot()?;
        let classification = if self.status == DeploymentStatus::Running {
            classify_running(before, &after)?
        } else {
            classify(before, &after)
        };
        self.config_status = self.config_status.max(classification.status);
        debug!(
            deployment = %self.name,
            status = %classification.status,
            pending = %self.config_status,
            "edit classified"
        );
        Ok(classification)
    }

    /// Mark the pending edit as applied to the nodes.
    pub fn clear_config_status(&mut self) {
        self.config_status = ConfigStatus::Unchanged;
    }

    // ── Scaling ────────────────────────────────────────────────────

    /// Add a server to a component. Duplicate identities are rejected;
    /// a successful scale-out always demands a redeploy.
    pub fn scale_out(
        &mut self,
        component: &str,
        server: Server,
        overrides: Option<ConfigMap>,
    ) -> DeployResult<()> {
        self.component_mut(component)?.add_server(server, overrides)?;
        self.config_status = self.config_status.max(ConfigStatus::NeedsRedeploy);
        Ok(())
    }

    /// Remove a server from a component's list.
    pub fn scale_in(&mut self, component: &str, server: &Server) -> DeployResult<()> {
        self.component_mut(component)?.remove_server(server)?;
        self.config_status = self.config_status.max(ConfigStatus::NeedsRedeploy);
        Ok(())
    }

    // ── Bindings ───────────────────────────────────────────────────

    pub fn bind(&mut self, component: &str, repository: Repository) -> DeployResult<()> {
        if !self.components.contains_key(component) {
            return Err(DeployError::UnknownComponent {
                component: component.to_string(),
            });
        }
        info!(deployment = %self.name, component, build = %repository, "binding updated");
        self.bindings.insert(component.to_string(), repository);
        Ok(())
    }

    pub fn binding(&self, component: &str) -> Option<&Repository> {
        self.bindings.get(component)
    }

    /// The version lifecycle actions should run against: the installed
    /// binding when one exists, otherwise the declared desired version.
    pub fn effective_version(&self, component: &str) -> DeployResult<Version> {
        if let Some(bound) = self.bindings.get(component) {
            return Ok(bound.version.clone());
        }
        self.component(component)?
            .bound_repository()?
            .map(|r| r.version)
            .ok_or_else(|| DeployError::Unbound {
                component: component.to_string(),
            })
    }

    // ── Persistence mapping ────────────────────────────────────────

    pub fn record(&self) -> DeploymentRecord {
        DeploymentRecord {
            name: self.name.clone(),
            status: self.status,
            config_status: self.config_status,
            bindings: self
                .bindings
                .iter()
                .map(|(name, repo)| {
                    (
                        name.clone(),
                        ComponentBinding {
                            version: repo.version.clone(),
                            content_hash: repo.content_hash.clone(),
                        },
                    )
                })
                .collect(),
            create_date: self.create_date,
        }
    }

    /// Restore persisted status and bindings onto a freshly built
    /// deployment (declaration re-parsed, record re-read).
    pub fn hydrate(&mut self, record: &DeploymentRecord) {
        self.status = record.status;
        self.config_status = record.config_status;
        self.create_date = record.create_date;
        self.bindings = record
            .bindings
            .iter()
            .map(|(name, binding)| {
                (
                    name.clone(),
                    Repository {
                        component: name.clone(),
                        version: binding.version.clone(),
                        release: None,
                        content_hash: binding.content_hash.clone(),
                    },
                )
            })
            .collect();
    }
}
