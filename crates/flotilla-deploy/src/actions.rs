//! Lifecycle actions.
//!
//! Glue between the deployment aggregate, the workflow engine, the
//! upgrade planner, and persisted state. Every public action takes the
//! deployment lock exclusively, runs the per-component workflows in
//! dependency order, and rewrites the state document on success. An
//! interrupted multi-hop upgrade leaves a marker behind and resumes
//! from its recorded hop.

use serde_yaml::Value;
use tracing::{info, warn};

use crate::deployment::Deployment;
use crate::error::{DeployError, DeployResult};
use flotilla_core::{DeploymentStatus, Repository};
use flotilla_exec::lock::DeployLock;
use flotilla_exec::{LockManager, RemoteExecutor};
use flotilla_state::{StateStore, UpgradeMarker};
use flotilla_upgrade::{plan, UpgradeGraph};
use flotilla_workflow::{FlatTemplate, Kwargs, Namespaces, NotFoundPolicy, WorkflowEngine};

/// Runs lifecycle actions against one deployment.
pub struct ActionRunner<'a, L: DeployLock> {
    engine: &'a mut WorkflowEngine,
    store: &'a StateStore,
    locks: &'a LockManager<L>,
}

impl<'a, L: DeployLock> ActionRunner<'a, L> {
    pub fn new(
        engine: &'a mut WorkflowEngine,
        store: &'a StateStore,
        locks: &'a LockManager<L>,
    ) -> Self {
        Self {
            engine,
            store,
            locks,
        }
    }

    /// Push binaries and configuration to every node.
    pub fn deploy(
        &mut self,
        deployment: &mut Deployment,
        kwargs: Kwargs,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        let _guard = self.locks.acquire_exclusive(deployment.name())?;
        self.transition_unlocked(deployment, "deploy", DeploymentStatus::Deployed, kwargs, executor, policy)?;
        // Record what actually landed on the nodes, and treat any
        // pending edit as applied.
        for component in deployment.execution_order() {
            if let Some(repository) = deployment.component(&component)?.bound_repository()? {
                deployment.bind(&component, repository)?;
            }
        }
        deployment.clear_config_status();
        self.persist(deployment)
    }

    pub fn start(
        &mut self,
        deployment: &mut Deployment,
        kwargs: Kwargs,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        self.run_transition(deployment, "start", DeploymentStatus::Running, kwargs, executor, policy)
    }

    pub fn stop(
        &mut self,
        deployment: &mut Deployment,
        kwargs: Kwargs,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        self.run_transition(deployment, "stop", DeploymentStatus::Stopped, kwargs, executor, policy)
    }

    /// Tear the deployment down and drop its state document.
    pub fn destroy(
        &mut self,
        deployment: &mut Deployment,
        kwargs: Kwargs,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        let _guard = self.locks.acquire_exclusive(deployment.name())?;
        deployment.check_transition(DeploymentStatus::Destroyed)?;
        self.run_workflows(deployment, "destroy", kwargs, executor, policy)?;
        deployment.transition(DeploymentStatus::Destroyed)?;
        self.store.delete_deployment(deployment.name())?;
        Ok(())
    }

    /// Restart services, optionally swapping one component's build
    /// first (patch semantics). When the restart fails after a swap,
    /// the previous binding is restored before the error surfaces.
    pub fn restart(
        &mut self,
        deployment: &mut Deployment,
        rebind: Option<Repository>,
        kwargs: Kwargs,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        let _guard = self.locks.acquire_exclusive(deployment.name())?;

        let previous = match rebind {
            Some(repository) => {
                let component = repository.component.clone();
                let previous = deployment.binding(&component).cloned();
                deployment.bind(&component, repository)?;
                Some((component, previous))
            }
            None => None,
        };

        let result = self.run_workflows(deployment, "restart", kwargs, executor, policy);
        if let Err(err) = result {
            if let Some((component, Some(previous))) = previous {
                warn!(
                    deployment = %deployment.name(),
                    component = %component,
                    "restart failed, restoring previous binding"
                );
                deployment.bind(&component, previous)?;
            }
            self.persist(deployment)?;
            return Err(err);
        }

        deployment.clear_config_status();
        self.persist(deployment)
    }

    /// Upgrade one component to `target`, hop by hop along the planned
    /// route. Each completed hop advances the persisted marker, so an
    /// interrupted upgrade resumes where it stopped.
    pub fn upgrade(
        &mut self,
        deployment: &mut Deployment,
        graph: &UpgradeGraph,
        target: &Repository,
        kwargs: Kwargs,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        let _guard = self.locks.acquire_exclusive(deployment.name())?;
        let component = target.component.clone();

        let current = deployment
            .binding(&component)
            .cloned()
            .ok_or_else(|| DeployError::Unbound {
                component: component.clone(),
            })?;
        let route = plan(graph, &current, target)?;
        info!(
            deployment = %deployment.name(),
            component = %component,
            from = %current.version,
            to = %target.version,
            hops = route.steps().len(),
            "upgrade route planned"
        );

        deployment.transition(DeploymentStatus::Upgrading)?;
        self.persist(deployment)?;

        let marker = UpgradeMarker {
            component,
            route,
            current_index: 1,
        };
        self.store.write_marker(deployment.name(), &marker)?;
        self.run_marker(deployment, marker, kwargs, executor, policy)
    }

    /// Pick up an interrupted upgrade from its persisted marker.
    pub fn resume_upgrade(
        &mut self,
        deployment: &mut Deployment,
        kwargs: Kwargs,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        let _guard = self.locks.acquire_exclusive(deployment.name())?;
        let marker = self.store.load_marker(deployment.name())?.ok_or_else(|| {
            DeployError::NoUpgradeInFlight {
                name: deployment.name().to_string(),
            }
        })?;
        info!(
            deployment = %deployment.name(),
            component = %marker.component,
            hop = marker.current_index,
            "resuming upgrade"
        );
        self.run_marker(deployment, marker, kwargs, executor, policy)
    }

    fn run_marker(
        &mut self,
        deployment: &mut Deployment,
        mut marker: UpgradeMarker,
        kwargs: Kwargs,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        while marker.current_index < marker.route.hops.len() {
            let hop = marker.route.hops[marker.current_index].clone();
            let mut hop_kwargs = kwargs.clone();
            hop_kwargs.insert("direct_upgrade".into(), Value::Bool(hop.direct_upgrade));

            if let Some(plan) = self.engine.build_workflow(
                &marker.component,
                "upgrade",
                &hop.version,
                hop_kwargs,
                policy,
            )? {
                self.execute(deployment, &[plan], executor, policy)?;
            }

            deployment.bind(
                &marker.component,
                Repository {
                    component: marker.component.clone(),
                    version: hop.version.clone(),
                    release: hop.release.clone(),
                    content_hash: None,
                },
            )?;
            marker.current_index += 1;
            self.store.write_marker(deployment.name(), &marker)?;
            self.persist(deployment)?;
        }

        self.store.clear_marker(deployment.name())?;
        deployment.transition(DeploymentStatus::Running)?;
        self.persist(deployment)
    }

    fn run_transition(
        &mut self,
        deployment: &mut Deployment,
        action: &str,
        next: DeploymentStatus,
        kwargs: Kwargs,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        let _guard = self.locks.acquire_exclusive(deployment.name())?;
        self.transition_unlocked(deployment, action, next, kwargs, executor, policy)
    }

    /// Caller must hold the deployment's exclusive lock.
    fn transition_unlocked(
        &mut self,
        deployment: &mut Deployment,
        action: &str,
        next: DeploymentStatus,
        kwargs: Kwargs,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        deployment.check_transition(next)?;
        self.run_workflows(deployment, action, kwargs, executor, policy)?;
        deployment.transition(next)?;
        self.persist(deployment)
    }

    fn run_workflows(
        &mut self,
        deployment: &mut Deployment,
        action: &str,
        kwargs: Kwargs,
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        let mut plans = Vec::new();
        for component in deployment.execution_order() {
            let version = deployment.effective_version(&component)?;
            if let Some(plan) =
                self.engine
                    .build_workflow(&component, action, &version, kwargs.clone(), policy)?
            {
                plans.push(plan);
            }
        }
        self.execute(deployment, &plans, executor, policy)
    }

    fn execute(
        &mut self,
        deployment: &mut Deployment,
        plans: &[FlatTemplate],
        executor: &dyn RemoteExecutor,
        policy: NotFoundPolicy,
    ) -> DeployResult<()> {
        let mut namespaces = Namespaces::new();
        self.engine
            .execute(plans, deployment.configs_mut(), &mut namespaces, executor, policy)?;
        Ok(())
    }

    fn persist(&self, deployment: &Deployment) -> DeployResult<()> {
        self.store.save_deployment(&deployment.record())?;
        Ok(())
    }
}
