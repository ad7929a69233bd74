//! Layered per-component configuration store.
//!
//! A [`ClusterConfig`] owns one component's declared configuration and
//! resolves the effective per-server view by merging layers, lowest
//! precedence first:
//!
//! ```text
//! catalog defaults < include file < global < zone < server override < inner
//! ```
//!
//! Effective views are computed lazily and cached per server. Every
//! mutation invalidates exactly the caches it can affect: a global (or
//! catalog) mutation clears every server's cache, a single-server
//! mutation clears only that server's entry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_yaml::Value;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::spec::{numeric, ModifyLimit, ParamCatalog};
use flotilla_core::topology::RuntimeDependency;
use flotilla_core::{
    ComponentDecl, ComponentName, ConfigMap, IncludeDoc, Repository, Server, ServerEntry,
    ServerRegistry,
};

/// Which layer an edit targets.
#[derive(Debug, Clone)]
pub enum Scope {
    Global,
    Server(Server),
}

/// One component's layered configuration within a deployment.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    component: ComponentName,
    catalog: Arc<ParamCatalog>,

    // Layers, lowest precedence first (defaults come from the catalog).
    include_layer: ConfigMap,
    global_layer: ConfigMap,
    zone_layers: BTreeMap<String, ConfigMap>,
    server_overrides: HashMap<Server, ConfigMap>,
    inner_layer: ConfigMap,

    servers: Vec<Server>,
    server_zones: HashMap<Server, String>,

    // Desired binding and declaration bookkeeping for round-tripping.
    declared_servers: Vec<ServerEntry>,
    version_raw: Option<String>,
    tag: Option<String>,
    release: Option<String>,
    package_hash: Option<String>,
    include_path: Option<String>,
    env: BTreeMap<String, String>,
    runtime_dependencies: Vec<RuntimeDependency>,

    depends: Vec<ComponentName>,
    dep_closure: BTreeSet<ComponentName>,

    // Lazily filled caches.
    server_cache: HashMap<Server, ConfigMap>,
    global_cache: Option<ConfigMap>,
}

impl ClusterConfig {
    pub fn new(component: impl Into<ComponentName>, catalog: Arc<ParamCatalog>) -> Self {
        Self {
            component: component.into(),
            catalog,
            include_layer: ConfigMap::new(),
            global_layer: ConfigMap::new(),
            zone_layers: BTreeMap::new(),
            server_overrides: HashMap::new(),
            inner_layer: ConfigMap::new(),
            servers: Vec::new(),
            server_zones: HashMap::new(),
            declared_servers: Vec::new(),
            version_raw: None,
            tag: None,
            release: None,
            package_hash: None,
            include_path: None,
            env: BTreeMap::new(),
            runtime_dependencies: Vec::new(),
            depends: Vec::new(),
            dep_closure: BTreeSet::new(),
            server_cache: HashMap::new(),
            global_cache: None,
        }
    }

    /// Build a store from one component's declaration block.
    pub fn from_decl(
        component: &str,
        decl: &ComponentDecl,
        include: Option<&IncludeDoc>,
        catalog: Arc<ParamCatalog>,
        registry: &mut ServerRegistry,
    ) -> ConfigResult<Self> {
        let mut store = Self::new(component, catalog);
        store.declared_servers = decl.servers.clone();
        store.version_raw = decl.version.clone();
        store.tag = decl.tag.clone();
        store.release = decl.release.clone();
        store.package_hash = decl.package_hash.clone();
        store.include_path = decl.include.clone();
        store.env = decl.env.clone();
        store.runtime_dependencies = decl.runtime_dependencies.clone();
        store.global_layer = decl.global.clone();
        store.zone_layers = decl.zone_configs.clone();

        if let Some(doc) = include {
            store.include_layer = doc.config.clone();
            // The include layer fills binding fields the declaration
            // leaves empty, never overrides them.
            if store.version_raw.is_none() {
                store.version_raw = doc.version.clone();
            }
            if store.release.is_none() {
                store.release = doc.release.clone();
            }
            if store.package_hash.is_none() {
                store.package_hash = doc.package_hash.clone();
            }
            for (k, v) in &doc.env {
                store.env.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        for entry in &decl.servers {
            let server = entry.intern(registry);
            if store.servers.contains(&server) {
                return Err(ConfigError::DuplicateServer {
                    component: component.to_string(),
                    server: server.to_string(),
                });
            }
            store.servers.push(server);
        }

        for (name, overrides) in &decl.server_configs {
            let server = store
                .servers
                .iter()
                .find(|s| s.logical_name == *name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownServer {
                    component: component.to_string(),
                    server: name.clone(),
                })?;
            store.server_overrides.insert(server, overrides.clone());
        }

        Ok(store)
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn catalog(&self) -> &Arc<ParamCatalog> {
        &self.catalog
    }

    pub fn depends(&self) -> &[ComponentName] {
        &self.depends
    }

    pub fn dep_closure(&self) -> &BTreeSet<ComponentName> {
        &self.dep_closure
    }

    pub fn version_raw(&self) -> Option<&str> {
        self.version_raw.as_deref()
    }

    pub fn release(&self) -> Option<&str> {
        self.release.as_deref()
    }

    pub fn package_hash(&self) -> Option<&str> {
        self.package_hash.as_deref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn runtime_dependencies(&self) -> &[RuntimeDependency] {
        &self.runtime_dependencies
    }

    /// The desired concrete binding, when the declaration pins a
    /// parseable version.
    pub fn bound_repository(&self) -> ConfigResult<Option<Repository>> {
        let Some(raw) = &self.version_raw else {
            return Ok(None);
        };
        let version = semver::Version::parse(raw.trim_start_matches('v')).map_err(|source| {
            ConfigError::Core(flotilla_core::CoreError::InvalidVersion {
                component: self.component.clone(),
                version: raw.clone(),
                source,
            })
        })?;
        Ok(Some(Repository {
            component: self.component.clone(),
            version,
            release: self.release.clone(),
            content_hash: self.package_hash.clone(),
        }))
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Replace the component-wide layer. Invalidates every server cache.
    pub fn set_global(&mut self, config: ConfigMap) {
        self.global_layer = config;
        self.invalidate_all();
        debug!(component = %self.component, "global layer replaced");
    }

    /// Replace one server's override layer. Invalidates that server only.
    pub fn set_server_override(&mut self, server: &Server, config: ConfigMap) -> ConfigResult<()> {
        self.ensure_known(server)?;
        self.server_overrides.insert(server.clone(), config);
        self.invalidate_server(server);
        Ok(())
    }

    /// Replace a zone's layer. Invalidates the zone's members only.
    pub fn set_zone_override(&mut self, zone: &str, config: ConfigMap) {
        self.zone_layers.insert(zone.to_string(), config);
        let members: Vec<Server> = self
            .server_zones
            .iter()
            .filter(|(_, z)| z.as_str() == zone)
            .map(|(s, _)| s.clone())
            .collect();
        for server in members {
            self.invalidate_server(&server);
        }
    }

    /// Assign a server to a zone. Invalidates that server only.
    pub fn set_server_zone(&mut self, server: &Server, zone: &str) -> ConfigResult<()> {
        self.ensure_known(server)?;
        self.server_zones.insert(server.clone(), zone.to_string());
        self.invalidate_server(server);
        Ok(())
    }

    /// Set a private key visible in effective views but never serialized
    /// back into the declared document.
    pub fn set_inner(&mut self, key: impl Into<String>, value: Value) {
        self.inner_layer.insert(key.into(), value);
        self.invalidate_all();
    }

    /// Swap the parameter catalog (e.g. after an upgrade hop).
    /// Invalidates every cache.
    pub fn set_catalog(&mut self, catalog: Arc<ParamCatalog>) {
        self.catalog = catalog;
        self.invalidate_all();
        debug!(component = %self.component, "parameter catalog replaced");
    }

    /// Update one key, honoring its modify limit against the previous
    /// effective value. A violated limit fails; it never clamps.
    pub fn update_key(&mut self, scope: Scope, key: &str, value: Value) -> ConfigResult<()> {
        let (previous, server_name) = match &scope {
            Scope::Global => (
                self.get_global_effective_with_defaults()?.get(key).cloned(),
                None,
            ),
            Scope::Server(server) => {
                self.ensure_known(server)?;
                (
                    self.get_effective_with_defaults(server)?.get(key).cloned(),
                    Some(server.to_string()),
                )
            }
        };

        let coerced = match self.catalog.get(key) {
            Some(spec) => {
                let coerced =
                    spec.coerce(&value)
                        .map_err(|reason| ConfigError::ParameterValidation {
                            component: self.component.clone(),
                            server: server_name.clone(),
                            key: key.to_string(),
                            reason,
                        })?;
                if let Some(prev) = &previous {
                    self.check_modify_limit(spec.modify_limit, key, prev, &coerced, &server_name)?;
                }
                coerced
            }
            None => value,
        };

        match scope {
            Scope::Global => {
                self.global_layer.insert(key.to_string(), coerced);
                self.invalidate_all();
            }
            Scope::Server(server) => {
                self.server_overrides
                    .entry(server.clone())
                    .or_default()
                    .insert(key.to_string(), coerced);
                self.invalidate_server(&server);
            }
        }
        debug!(component = %self.component, key, "configuration key updated");
        Ok(())
    }

    fn check_modify_limit(
        &self,
        limit: ModifyLimit,
        key: &str,
        previous: &Value,
        requested: &Value,
        server: &Option<String>,
    ) -> ConfigResult<()> {
        let violation = |prev: &Value, req: &Value| ConfigError::ModifyLimitViolation {
            component: self.component.clone(),
            key: key.to_string(),
            limit,
            previous: display_value(prev),
            requested: display_value(req),
        };
        match limit {
            ModifyLimit::None => Ok(()),
            ModifyLimit::Fixed => {
                if previous != requested {
                    Err(violation(previous, requested))
                } else {
                    Ok(())
                }
            }
            ModifyLimit::IncreaseOnly | ModifyLimit::DecreaseOnly => {
                let (Some(prev), Some(req)) = (numeric(previous), numeric(requested)) else {
                    return Err(ConfigError::ParameterValidation {
                        component: self.component.clone(),
                        server: server.clone(),
                        key: key.to_string(),
                        reason: format!("{limit} limit requires a numeric value"),
                    });
                };
                let violated = match limit {
                    ModifyLimit::IncreaseOnly => req < prev,
                    ModifyLimit::DecreaseOnly => req > prev,
                    _ => unreachable!(),
                };
                if violated {
                    Err(violation(previous, requested))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Add a server with optional overrides. Duplicate identities are
    /// rejected; scale-out relies on this.
    pub fn add_server(&mut self, server: Server, overrides: Option<ConfigMap>) -> ConfigResult<()> {
        if self.servers.contains(&server) {
            return Err(ConfigError::DuplicateServer {
                component: self.component.clone(),
                server: server.to_string(),
            });
        }
        self.declared_servers.push(if server.logical_name == server.address {
            ServerEntry::Address(server.address.clone())
        } else {
            ServerEntry::Named {
                name: server.logical_name.clone(),
                ip: server.address.clone(),
            }
        });
        self.servers.push(server.clone());
        if let Some(config) = overrides {
            self.server_overrides.insert(server.clone(), config);
        }
        self.invalidate_server(&server);
        debug!(component = %self.component, server = %server, "server added");
        Ok(())
    }

    /// Remove a server (scale-in). Unknown identities fail.
    pub fn remove_server(&mut self, server: &Server) -> ConfigResult<()> {
        self.ensure_known(server)?;
        self.servers.retain(|s| s != server);
        self.declared_servers
            .retain(|e| e.address() != server.address || e.logical_name() != server.logical_name);
        self.server_overrides.remove(server);
        self.server_zones.remove(server);
        self.invalidate_server(server);
        debug!(component = %self.component, server = %server, "server removed");
        Ok(())
    }

    /// Declare a dependency on another component.
    ///
    /// Fails when `other` already depends on this component, directly or
    /// transitively.
    pub fn add_dependency(&mut self, name: &str, other: &ClusterConfig) -> ConfigResult<()> {
        if name == self.component
            || other.component == self.component
            || other.dep_closure.contains(&self.component)
        {
            return Err(ConfigError::CircularDependency {
                component: self.component.clone(),
                dependency: name.to_string(),
            });
        }
        if !self.depends.iter().any(|d| d == name) {
            self.depends.push(name.to_string());
        }
        self.dep_closure.insert(name.to_string());
        self.dep_closure.extend(other.dep_closure.iter().cloned());
        Ok(())
    }

    // ── Effective views ────────────────────────────────────────────

    /// Effective configuration for one server (declared layers only, no
    /// catalog defaults). Cached until an affecting mutation.
    pub fn get_effective(&mut self, server: &Server) -> ConfigResult<ConfigMap> {
        self.ensure_known(server)?;
        if let Some(cached) = self.server_cache.get(server) {
            return Ok(cached.clone());
        }
        let mut merged = ConfigMap::new();
        merge_into(&mut merged, &self.include_layer);
        merge_into(&mut merged, &self.global_layer);
        if let Some(zone) = self.server_zones.get(server) {
            if let Some(layer) = self.zone_layers.get(zone) {
                merge_into(&mut merged, layer);
            }
        }
        if let Some(overrides) = self.server_overrides.get(server) {
            merge_into(&mut merged, overrides);
        }
        merge_into(&mut merged, &self.inner_layer);

        let coerced = self.coerce_map(merged, Some(server.to_string()))?;
        self.server_cache.insert(server.clone(), coerced.clone());
        Ok(coerced)
    }

    /// Effective configuration including catalog defaults, with required
    /// keys enforced.
    pub fn get_effective_with_defaults(&mut self, server: &Server) -> ConfigResult<ConfigMap> {
        let effective = self.get_effective(server)?;
        let mut merged = self.catalog.defaults();
        merge_into(&mut merged, &effective);
        self.ensure_required(&merged, Some(server.to_string()))?;
        Ok(merged)
    }

    /// Component-wide effective view (no zone or server layers).
    pub fn get_global_effective(&mut self) -> ConfigResult<ConfigMap> {
        if let Some(cached) = &self.global_cache {
            return Ok(cached.clone());
        }
        let mut merged = ConfigMap::new();
        merge_into(&mut merged, &self.include_layer);
        merge_into(&mut merged, &self.global_layer);
        merge_into(&mut merged, &self.inner_layer);
        let coerced = self.coerce_map(merged, None)?;
        self.global_cache = Some(coerced.clone());
        Ok(coerced)
    }

    pub fn get_global_effective_with_defaults(&mut self) -> ConfigResult<ConfigMap> {
        let effective = self.get_global_effective()?;
        let mut merged = self.catalog.defaults();
        merge_into(&mut merged, &effective);
        Ok(merged)
    }

    fn coerce_map(&self, map: ConfigMap, server: Option<String>) -> ConfigResult<ConfigMap> {
        let mut out = ConfigMap::new();
        for (key, value) in map {
            let value = match self.catalog.get(&key) {
                Some(spec) => {
                    spec.coerce(&value)
                        .map_err(|reason| ConfigError::ParameterValidation {
                            component: self.component.clone(),
                            server: server.clone(),
                            key: key.clone(),
                            reason,
                        })?
                }
                // Unrecognized keys pass through untouched.
                None => value,
            };
            out.insert(key, value);
        }
        Ok(out)
    }

    fn ensure_required(&self, merged: &ConfigMap, server: Option<String>) -> ConfigResult<()> {
        if let Some(missing) = self.catalog.missing_required(merged).first() {
            return Err(ConfigError::ParameterValidation {
                component: self.component.clone(),
                server,
                key: missing.to_string(),
                reason: "required parameter is not set".to_string(),
            });
        }
        Ok(())
    }

    // ── Scoped server narrowing (workflow target servers) ──────────

    /// Temporarily narrow the server list to `targets`, returning the
    /// previous list for [`Self::restore_servers`]. Order is preserved.
    pub fn narrow_servers(&mut self, targets: &[Server]) -> ConfigResult<Vec<Server>> {
        for target in targets {
            self.ensure_known(target)?;
        }
        let narrowed: Vec<Server> = self
            .servers
            .iter()
            .filter(|s| targets.contains(s))
            .cloned()
            .collect();
        Ok(std::mem::replace(&mut self.servers, narrowed))
    }

    /// Restore a server list previously taken by [`Self::narrow_servers`].
    pub fn restore_servers(&mut self, saved: Vec<Server>) {
        self.servers = saved;
    }

    // ── Serialization ──────────────────────────────────────────────

    /// Reconstruct the declared block. Inner (private) keys are never
    /// included.
    pub fn to_decl(&self) -> ComponentDecl {
        let server_configs = self
            .servers
            .iter()
            .filter_map(|s| {
                self.server_overrides
                    .get(s)
                    .filter(|m| !m.is_empty())
                    .map(|m| (s.logical_name.clone(), m.clone()))
            })
            .collect();
        ComponentDecl {
            servers: self.declared_servers.clone(),
            global: self.global_layer.clone(),
            server_configs,
            zone_configs: self.zone_layers.clone(),
            version: self.version_raw.clone(),
            tag: self.tag.clone(),
            release: self.release.clone(),
            package_hash: self.package_hash.clone(),
            depends: self.depends.clone(),
            runtime_dependencies: self.runtime_dependencies.clone(),
            env: self.env.clone(),
            include: self.include_path.clone(),
        }
    }

    // ── Cache bookkeeping ──────────────────────────────────────────

    fn invalidate_all(&mut self) {
        self.server_cache.clear();
        self.global_cache = None;
    }

    fn invalidate_server(&mut self, server: &Server) {
        self.server_cache.remove(server);
    }

    fn ensure_known(&self, server: &Server) -> ConfigResult<()> {
        if self.servers.contains(server) {
            Ok(())
        } else {
            Err(ConfigError::UnknownServer {
                component: self.component.clone(),
                server: server.to_string(),
            })
        }
    }
}

fn merge_into(target: &mut ConfigMap, layer: &ConfigMap) {
    for (k, v) in layer {
        target.insert(k.clone(), v.clone());
    }
}

fn display_value(value: &Value) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| format!("{value:?}"))
}
