//! flotilla-plugin — versioned capability discovery and resolution.
//!
//! Maps `(component, capability, requested version)` to the concrete
//! implementation directory, preferring an exact version and otherwise
//! falling back to the highest version below the request.

pub mod descriptor;
pub mod error;
pub mod registry;

pub use descriptor::{PluginDescriptor, ResolvedPlugin};
pub use error::{PluginError, PluginResult};
pub use registry::PluginRegistry;
