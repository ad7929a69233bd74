//! flotilla-upgrade — version-compatibility graphs and multi-hop route
//! planning for the "upgrade" lifecycle action.

pub mod error;
pub mod graph;
pub mod planner;

pub use error::{UpgradeError, UpgradeResult};
pub use graph::{UpgradeGraph, UpgradeNode, DEFAULT_OLD_FORMAT_BOUNDARY};
pub use planner::{plan, UpgradeHop, UpgradeRoute};
