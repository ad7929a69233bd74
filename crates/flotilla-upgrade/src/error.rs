//! Upgrade planning error types.

use semver::Version;
use thiserror::Error;

use flotilla_core::ComponentName;

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("no upgrade route for {component} from {from} to {to}")]
    NoRoute {
        component: ComponentName,
        from: Version,
        to: Version,
    },

    #[error("upgrade target {version} for {component} is deprecated")]
    DeprecatedTarget {
        component: ComponentName,
        version: Version,
    },

    #[error("failed to read upgrade graph {path}: {source}")]
    DescriptorIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse upgrade graph {path}: {source}")]
    DescriptorParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

pub type UpgradeResult<T> = Result<T, UpgradeError>;
