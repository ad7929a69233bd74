//! Workflow error types.

use semver::Version;
use thiserror::Error;

use flotilla_core::ComponentName;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Plugin(#[from] flotilla_plugin::PluginError),

    #[error(transparent)]
    Config(#[from] flotilla_config::ConfigError),

    #[error(transparent)]
    Exec(#[from] flotilla_exec::ExecError),

    /// A stage holding both a sub-workflow and direct entries has no
    /// defined ordering; rejected when the template is flattened.
    #[error("component {component}: stage {stage} mixes a sub-workflow with direct entries")]
    MixedStage { component: ComponentName, stage: u32 },

    #[error("no configuration present for component {component}")]
    MissingConfig { component: ComponentName },

    #[error("no implementation bound for {component}/{capability} at {version}")]
    NotBound {
        component: ComponentName,
        capability: String,
        version: Version,
    },

    #[error("component {component}: {capability} failed at stage {stage}: {message}")]
    StageFailed {
        component: ComponentName,
        capability: String,
        stage: u32,
        message: String,
    },
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
