//! Staged workflow execution.
//!
//! The engine expands an abstract lifecycle action into per-component
//! templates (via each component's versioned workflow builder), then
//! executes the union of stage numbers in ascending order. Within a
//! stage, components run in dependency order; within a component,
//! entries run in the order the builder declared them. Execution is
//! strictly sequential; any fan-out across nodes happens inside an
//! invocation, behind the remote executor.

use std::collections::{BTreeMap, BTreeSet};

use semver::Version;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityTable, InvocationCtx};
use crate::error::{WorkflowError, WorkflowResult};
use crate::namespace::Namespaces;
use crate::template::{FlatTemplate, Kwargs, WorkflowTemplate};
use flotilla_config::ClusterConfig;
use flotilla_core::ComponentName;
use flotilla_exec::RemoteExecutor;
use flotilla_plugin::{PluginError, PluginRegistry, ResolvedPlugin};

/// What to do when no plugin provides a requested capability.
///
/// Supplied per call site; there is no global setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotFoundPolicy {
    #[default]
    Fail,
    Warn,
    Ignore,
}

/// Drives lifecycle actions through versioned plugins.
#[derive(Debug)]
pub struct WorkflowEngine {
    registry: PluginRegistry,
    table: CapabilityTable,
    /// Defaults merged beneath every builder's keyword arguments.
    default_kwargs: Kwargs,
}

impl WorkflowEngine {
    pub fn new(registry: PluginRegistry) -> Self {
        Self {
            registry,
            table: CapabilityTable::new(),
            default_kwargs: Kwargs::new(),
        }
    }

    pub fn with_default_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.default_kwargs = kwargs;
        self
    }

    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    pub fn table_mut(&mut self) -> &mut CapabilityTable {
        &mut self.table
    }

    /// Build one component's template for an abstract action.
    ///
    /// Returns `Ok(None)` when the action has no builder for this
    /// component and the policy tolerates that.
    pub fn build_workflow(
        &mut self,
        component: &str,
        action: &str,
        version: &Version,
        kwargs: Kwargs,
        policy: NotFoundPolicy,
    ) -> WorkflowResult<Option<FlatTemplate>> {
        let Some(resolved) = self.resolve_with_policy(component, action, version, policy)? else {
            return Ok(None);
        };

        let builder = self.table.builder_for(&resolved.descriptor).ok_or_else(|| {
            WorkflowError::NotBound {
                component: component.to_string(),
                capability: action.to_string(),
                version: resolved.descriptor.version.clone(),
            }
        })?;

        let mut merged = self.default_kwargs.clone();
        merged.extend(kwargs);

        let mut template =
            WorkflowTemplate::new(component, resolved.descriptor.version.clone());
        builder.build(&mut template, &merged)?;
        debug!(component, action, version = %resolved.descriptor.version, "workflow built");
        Ok(Some(template.flatten()?))
    }

    /// Execute templates for one action.
    ///
    /// `plans` must already be in dependency order; stages execute in
    /// ascending numeric order across all components.
    pub fn execute(
        &mut self,
        plans: &[FlatTemplate],
        configs: &mut BTreeMap<ComponentName, ClusterConfig>,
        namespaces: &mut Namespaces,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> WorkflowResult<()> {
        let stages: BTreeSet<u32> = plans.iter().flat_map(|p| p.stage_numbers()).collect();

        for stage in stages {
            debug!(stage, "executing stage");
            for plan in plans {
                let Some(entries) = plan.stages.get(&stage) else {
                    continue;
                };
                for entry in entries {
                    let Some(resolved) = self.resolve_with_policy(
                        &plan.component,
                        &entry.capability,
                        &plan.version,
                        policy,
                    )?
                    else {
                        continue;
                    };
                    let handler = self.table.capability_for(&resolved.descriptor).ok_or_else(
                        || WorkflowError::NotBound {
                            component: plan.component.clone(),
                            capability: entry.capability.clone(),
                            version: resolved.descriptor.version.clone(),
                        },
                    )?;

                    let config = configs.get_mut(&plan.component).ok_or_else(|| {
                        WorkflowError::MissingConfig {
                            component: plan.component.clone(),
                        }
                    })?;

                    // Narrow the server list for the duration of the
                    // call; restored below on every path.
                    let saved = match &entry.target_servers {
                        Some(targets) => Some(config.narrow_servers(targets)?),
                        None => None,
                    };

                    let result = {
                        let mut ctx = InvocationCtx {
                            config: &mut *config,
                            namespaces,
                            kwargs: &entry.kwargs,
                            executor,
                        };
                        handler.invoke(&mut ctx)
                    };

                    if let Some(saved) = saved {
                        config.restore_servers(saved);
                    }

                    let outcome = result?;
                    if !outcome.success {
                        let message = outcome
                            .payload
                            .as_ref()
                            .and_then(|v| v.as_str())
                            .unwrap_or("invocation reported failure")
                            .to_string();
                        return Err(WorkflowError::StageFailed {
                            component: plan.component.clone(),
                            capability: entry.capability.clone(),
                            stage,
                            message,
                        });
                    }

                    for (key, value) in outcome.outputs {
                        namespaces.write(&plan.component, key, value);
                    }
                    if let Some(payload) = outcome.payload {
                        namespaces.write(&plan.component, entry.capability.clone(), payload);
                    }
                    info!(
                        component = %plan.component,
                        capability = %entry.capability,
                        stage,
                        "invocation completed"
                    );
                }
            }
        }
        Ok(())
    }

    fn resolve_with_policy(
        &mut self,
        component: &str,
        capability: &str,
        version: &Version,
        policy: NotFoundPolicy,
    ) -> WorkflowResult<Option<ResolvedPlugin>> {
        match self.registry.resolve(component, capability, version) {
            Ok(resolved) => Ok(Some(resolved)),
            Err(err @ PluginError::NotFound { .. }) => match policy {
                NotFoundPolicy::Fail => Err(err.into()),
                NotFoundPolicy::Warn => {
                    warn!(component, capability, %version, "capability missing, skipping");
                    Ok(None)
                }
                NotFoundPolicy::Ignore => {
                    debug!(component, capability, %version, "capability missing, skipping");
                    Ok(None)
                }
            },
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_yaml::Value;

    use super::*;
    use crate::capability::{Capability, InvocationOutcome, WorkflowBuilder};
    use flotilla_config::ParamCatalog;
    use flotilla_core::{Server, ServerRegistry};
    use flotilla_exec::remote::scripted::ScriptedExecutor;
    use flotilla_plugin::PluginDescriptor;

    type CallLog = Arc<Mutex<Vec<String>>>;

    /// Capability that appends "component:name" to a shared log.
    struct Recording {
        name: &'static str,
        log: CallLog,
    }

    impl Capability for Recording {
        fn invoke(&self, ctx: &mut InvocationCtx<'_>) -> WorkflowResult<InvocationOutcome> {
            self.log.lock().unwrap().push(format!(
                "{}:{}:{}",
                ctx.config.component(),
                self.name,
                ctx.config.servers().len()
            ));
            Ok(InvocationOutcome::ok()
                .with_output(format!("{}_done", self.name), Value::Bool(true)))
        }
    }

    struct Failing;

    impl Capability for Failing {
        fn invoke(&self, _ctx: &mut InvocationCtx<'_>) -> WorkflowResult<InvocationOutcome> {
            Ok(InvocationOutcome::failed("simulated fault"))
        }
    }

    /// Reads another component's namespace entry.
    struct ReadsNamespace {
        from: &'static str,
        key: &'static str,
        log: CallLog,
    }

    impl Capability for ReadsNamespace {
        fn invoke(&self, ctx: &mut InvocationCtx<'_>) -> WorkflowResult<InvocationOutcome> {
            let seen = ctx.namespaces.read(self.from, self.key).cloned();
            self.log
                .lock()
                .unwrap()
                .push(format!("saw {}={:?}", self.key, seen.is_some()));
            Ok(InvocationOutcome::ok())
        }
    }

    struct StagedBuilder {
        entries: Vec<(u32, &'static str)>,
        targets: Option<Vec<Server>>,
    }

    impl WorkflowBuilder for StagedBuilder {
        fn build(&self, template: &mut WorkflowTemplate, _kwargs: &Kwargs) -> WorkflowResult<()> {
            for (stage, capability) in &self.entries {
                match &self.targets {
                    Some(targets) => template.add_call_targeting(
                        *stage,
                        *capability,
                        Kwargs::new(),
                        targets.clone(),
                    ),
                    None => template.add_call(*stage, *capability, Kwargs::new()),
                }
            }
            Ok(())
        }
    }

    fn plugin_dir(component: &str, flags: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write_flags(&dir, component, flags);
        dir
    }

    fn write_flags(dir: &tempfile::TempDir, component: &str, flags: &[&str]) {
        let vdir = dir.path().join(component).join("1.0.0");
        std::fs::create_dir_all(&vdir).unwrap();
        for flag in flags {
            std::fs::write(vdir.join(flag), "").unwrap();
        }
    }

    fn descriptor(root: &std::path::Path, component: &str, capability: &str) -> PluginDescriptor {
        PluginDescriptor {
            component: component.to_string(),
            capability: capability.to_string(),
            version: Version::new(1, 0, 0),
            path: root.join(component).join("1.0.0"),
        }
    }

    fn config_with_servers(component: &str, count: usize) -> (ClusterConfig, Vec<Server>) {
        let mut registry = ServerRegistry::new();
        let mut config = ClusterConfig::new(component, Arc::new(ParamCatalog::default()));
        let mut servers = Vec::new();
        for i in 0..count {
            let server = registry.intern(format!("10.0.0.{}", i + 1), format!("node-{i}"));
            config.add_server(server.clone(), None).unwrap();
            servers.push(server);
        }
        (config, servers)
    }

    #[test]
    fn stages_ascend_and_components_follow_given_order() {
        let dir = plugin_dir("db", &["start", "probe", "deploy"]);
        write_flags(&dir, "proxy", &["start", "deploy"]);

        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let mut engine = WorkflowEngine::new(PluginRegistry::new(dir.path()));

        for component in ["db", "proxy"] {
            for capability in ["start", "probe"] {
                engine.table_mut().bind(
                    &descriptor(dir.path(), component, capability),
                    Arc::new(Recording {
                        name: if capability == "start" { "start" } else { "probe" },
                        log: log.clone(),
                    }),
                );
            }
            engine.table_mut().bind_builder(
                &descriptor(dir.path(), component, "deploy"),
                Arc::new(StagedBuilder {
                    entries: if component == "db" {
                        vec![(0, "start"), (2, "probe")]
                    } else {
                        vec![(1, "start")]
                    },
                    targets: None,
                }),
            );
        }

        let db_plan = engine
            .build_workflow("db", "deploy", &Version::new(1, 0, 0), Kwargs::new(), NotFoundPolicy::Fail)
            .unwrap()
            .unwrap();
        let proxy_plan = engine
            .build_workflow("proxy", "deploy", &Version::new(1, 0, 0), Kwargs::new(), NotFoundPolicy::Fail)
            .unwrap()
            .unwrap();

        let (db_cfg, _) = config_with_servers("db", 1);
        let (proxy_cfg, _) = config_with_servers("proxy", 1);
        let mut configs = BTreeMap::from([
            ("db".to_string(), db_cfg),
            ("proxy".to_string(), proxy_cfg),
        ]);

        let mut namespaces = Namespaces::new();
        let executor = ScriptedExecutor::new();
        engine
            .execute(
                &[db_plan, proxy_plan],
                &mut configs,
                &mut namespaces,
                &executor,
                NotFoundPolicy::Fail,
            )
            .unwrap();

        let calls = log.lock().unwrap().clone();
        assert_eq!(calls, vec!["db:start:1", "proxy:start:1", "db:probe:1"]);
        assert_eq!(
            namespaces.read("db", "start_done"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn failure_aborts_remaining_stages() {
        let dir = plugin_dir("db", &["start", "probe", "deploy"]);
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let mut engine = WorkflowEngine::new(PluginRegistry::new(dir.path()));

        engine
            .table_mut()
            .bind(&descriptor(dir.path(), "db", "start"), Arc::new(Failing));
        engine.table_mut().bind(
            &descriptor(dir.path(), "db", "probe"),
            Arc::new(Recording { name: "probe", log: log.clone() }),
        );
        engine.table_mut().bind_builder(
            &descriptor(dir.path(), "db", "deploy"),
            Arc::new(StagedBuilder {
                entries: vec![(0, "start"), (1, "probe")],
                targets: None,
            }),
        );

        let plan = engine
            .build_workflow("db", "deploy", &Version::new(1, 0, 0), Kwargs::new(), NotFoundPolicy::Fail)
            .unwrap()
            .unwrap();
        let (cfg, _) = config_with_servers("db", 1);
        let mut configs = BTreeMap::from([("db".to_string(), cfg)]);

        let err = engine
            .execute(
                &[plan],
                &mut configs,
                &mut Namespaces::new(),
                &ScriptedExecutor::new(),
                NotFoundPolicy::Fail,
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::StageFailed { stage: 0, .. }));
        // The stage-1 probe never ran.
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn target_servers_restored_after_invocation() {
        let dir = plugin_dir("db", &["start", "deploy"]);
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let mut engine = WorkflowEngine::new(PluginRegistry::new(dir.path()));

        let (cfg, servers) = config_with_servers("db", 2);
        engine.table_mut().bind(
            &descriptor(dir.path(), "db", "start"),
            Arc::new(Recording { name: "start", log: log.clone() }),
        );
        engine.table_mut().bind_builder(
            &descriptor(dir.path(), "db", "deploy"),
            Arc::new(StagedBuilder {
                entries: vec![(0, "start")],
                targets: Some(vec![servers[0].clone()]),
            }),
        );

        let plan = engine
            .build_workflow("db", "deploy", &Version::new(1, 0, 0), Kwargs::new(), NotFoundPolicy::Fail)
            .unwrap()
            .unwrap();
        let mut configs = BTreeMap::from([("db".to_string(), cfg)]);
        engine
            .execute(
                &[plan],
                &mut configs,
                &mut Namespaces::new(),
                &ScriptedExecutor::new(),
                NotFoundPolicy::Fail,
            )
            .unwrap();

        // Narrowed to one server during the call...
        assert_eq!(log.lock().unwrap().clone(), vec!["db:start:1"]);
        // ...and restored to the full list afterwards.
        assert_eq!(configs["db"].servers(), servers.as_slice());
    }

    #[test]
    fn target_servers_restored_even_on_failure() {
        let dir = plugin_dir("db", &["start", "deploy"]);
        let mut engine = WorkflowEngine::new(PluginRegistry::new(dir.path()));

        let (cfg, servers) = config_with_servers("db", 2);
        engine
            .table_mut()
            .bind(&descriptor(dir.path(), "db", "start"), Arc::new(Failing));
        engine.table_mut().bind_builder(
            &descriptor(dir.path(), "db", "deploy"),
            Arc::new(StagedBuilder {
                entries: vec![(0, "start")],
                targets: Some(vec![servers[1].clone()]),
            }),
        );

        let plan = engine
            .build_workflow("db", "deploy", &Version::new(1, 0, 0), Kwargs::new(), NotFoundPolicy::Fail)
            .unwrap()
            .unwrap();
        let mut configs = BTreeMap::from([("db".to_string(), cfg)]);
        let result = engine.execute(
            &[plan],
            &mut configs,
            &mut Namespaces::new(),
            &ScriptedExecutor::new(),
            NotFoundPolicy::Fail,
        );
        assert!(result.is_err());
        assert_eq!(configs["db"].servers(), servers.as_slice());
    }

    #[test]
    fn namespaces_flow_between_components() {
        let dir = plugin_dir("db", &["start", "deploy"]);
        write_flags(&dir, "proxy", &["attach", "deploy"]);

        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let mut engine = WorkflowEngine::new(PluginRegistry::new(dir.path()));

        engine.table_mut().bind(
            &descriptor(dir.path(), "db", "start"),
            Arc::new(Recording { name: "start", log: log.clone() }),
        );
        engine.table_mut().bind(
            &descriptor(dir.path(), "proxy", "attach"),
            Arc::new(ReadsNamespace {
                from: "db",
                key: "start_done",
                log: log.clone(),
            }),
        );
        engine.table_mut().bind_builder(
            &descriptor(dir.path(), "db", "deploy"),
            Arc::new(StagedBuilder { entries: vec![(0, "start")], targets: None }),
        );
        engine.table_mut().bind_builder(
            &descriptor(dir.path(), "proxy", "deploy"),
            Arc::new(StagedBuilder { entries: vec![(1, "attach")], targets: None }),
        );

        let db_plan = engine
            .build_workflow("db", "deploy", &Version::new(1, 0, 0), Kwargs::new(), NotFoundPolicy::Fail)
            .unwrap()
            .unwrap();
        let proxy_plan = engine
            .build_workflow("proxy", "deploy", &Version::new(1, 0, 0), Kwargs::new(), NotFoundPolicy::Fail)
            .unwrap()
            .unwrap();

        let (db_cfg, _) = config_with_servers("db", 1);
        let (proxy_cfg, _) = config_with_servers("proxy", 1);
        let mut configs = BTreeMap::from([
            ("db".to_string(), db_cfg),
            ("proxy".to_string(), proxy_cfg),
        ]);
        engine
            .execute(
                &[db_plan, proxy_plan],
                &mut configs,
                &mut Namespaces::new(),
                &ScriptedExecutor::new(),
                NotFoundPolicy::Fail,
            )
            .unwrap();

        let calls = log.lock().unwrap().clone();
        assert_eq!(calls[1], "saw start_done=true");
    }

    #[test]
    fn warn_policy_skips_missing_capability() {
        let dir = plugin_dir("db", &["deploy"]);
        let mut engine = WorkflowEngine::new(PluginRegistry::new(dir.path()));
        engine.table_mut().bind_builder(
            &descriptor(dir.path(), "db", "deploy"),
            Arc::new(StagedBuilder {
                // "start" flag file does not exist for db.
                entries: vec![(0, "start")],
                targets: None,
            }),
        );

        let plan = engine
            .build_workflow("db", "deploy", &Version::new(1, 0, 0), Kwargs::new(), NotFoundPolicy::Fail)
            .unwrap()
            .unwrap();
        let (cfg, _) = config_with_servers("db", 1);
        let mut configs = BTreeMap::from([("db".to_string(), cfg)]);

        // Fail policy surfaces the missing capability...
        let err = engine.execute(
            &[plan.clone()],
            &mut configs,
            &mut Namespaces::new(),
            &ScriptedExecutor::new(),
            NotFoundPolicy::Fail,
        );
        assert!(err.is_err());

        // ...while Warn degrades it to a skip.
        engine
            .execute(
                &[plan],
                &mut configs,
                &mut Namespaces::new(),
                &ScriptedExecutor::new(),
                NotFoundPolicy::Warn,
            )
            .unwrap();
    }

    #[test]
    fn missing_builder_fails_per_policy() {
        let dir = plugin_dir("db", &["deploy"]);
        let mut engine = WorkflowEngine::new(PluginRegistry::new(dir.path()));
        // No builder bound at all: resolution succeeds but binding fails.
        let err = engine
            .build_workflow("db", "deploy", &Version::new(1, 0, 0), Kwargs::new(), NotFoundPolicy::Fail)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotBound { .. }));

        // Missing flag file with Ignore policy yields no template.
        let none = engine
            .build_workflow("db", "scale", &Version::new(1, 0, 0), Kwargs::new(), NotFoundPolicy::Ignore)
            .unwrap();
        assert!(none.is_none());
    }
}
