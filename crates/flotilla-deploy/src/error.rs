//! Deployment error types.

use thiserror::Error;

use flotilla_core::{ComponentName, DeploymentStatus};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Core(#[from] flotilla_core::CoreError),

    #[error(transparent)]
    Config(#[from] flotilla_config::ConfigError),

    #[error(transparent)]
    Graph(#[from] flotilla_graph::GraphError),

    #[error(transparent)]
    Workflow(#[from] flotilla_workflow::WorkflowError),

    #[error(transparent)]
    Upgrade(#[from] flotilla_upgrade::UpgradeError),

    #[error(transparent)]
    State(#[from] flotilla_state::StateError),

    #[error(transparent)]
    Exec(#[from] flotilla_exec::ExecError),

    #[error("deployment {name}: cannot transition from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("deployment has no component named {component}")]
    UnknownComponent { component: ComponentName },

    #[error("component {component} has no version binding")]
    Unbound { component: ComponentName },

    #[error("deployment {name} has no upgrade in flight")]
    NoUpgradeInFlight { name: String },
}

pub type DeployResult<T> = Result<T, DeployError>;
