//! Plugin resolution error types.

use semver::Version;
use thiserror::Error;

use flotilla_core::ComponentName;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("no plugin provides {capability} for {component} at or below version {requested}")]
    NotFound {
        component: ComponentName,
        capability: String,
        requested: Version,
    },

    #[error("failed to scan plugin directory {path}: {source}")]
    Scan {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PluginResult<T> = Result<T, PluginError>;
