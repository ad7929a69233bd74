//! Configuration error types.
//!
//! Every surfaced error names the component and, where it applies, the
//! server and key, so the operator can correct the declaration.

use thiserror::Error;

use crate::spec::ModifyLimit;
use flotilla_core::ComponentName;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("component {component}{}: parameter {key}: {reason}", server_part(.server))]
    ParameterValidation {
        component: ComponentName,
        server: Option<String>,
        key: String,
        reason: String,
    },

    #[error(
        "component {component}: parameter {key} is {limit}: cannot change {previous} -> {requested}"
    )]
    ModifyLimitViolation {
        component: ComponentName,
        key: String,
        limit: ModifyLimit,
        previous: String,
        requested: String,
    },

    #[error("circular dependency: {component} cannot depend on {dependency}")]
    CircularDependency {
        component: ComponentName,
        dependency: ComponentName,
    },

    #[error("component {component}: server {server} is already declared")]
    DuplicateServer {
        component: ComponentName,
        server: String,
    },

    #[error("component {component}: server {server} is not part of this component")]
    UnknownServer {
        component: ComponentName,
        server: String,
    },

    #[error("failed to read parameter catalog {path}: {source}")]
    CatalogIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse parameter catalog {path}: {source}")]
    CatalogParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Core(#[from] flotilla_core::CoreError),
}

fn server_part(server: &Option<String>) -> String {
    match server {
        Some(s) => format!(", server {s}"),
        None => String::new(),
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
