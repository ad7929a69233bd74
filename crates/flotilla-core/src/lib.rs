//! flotilla-core — shared types, server identity interning, and topology
//! declaration parsing.
//!
//! Everything the rest of the kernel agrees on lives here: the interned
//! [`ServerIdentity`] flyweight, the [`Repository`] binding of a concrete
//! installed build, the remediation ladder ([`ConfigStatus`]), and the
//! YAML topology declaration with its include-file layer.

pub mod error;
pub mod registry;
pub mod topology;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use registry::{Server, ServerIdentity, ServerRegistry};
pub use topology::{ComponentDecl, IncludeDoc, ServerEntry, TopologyDecl};
pub use types::*;
