//! flotilla-graph — component dependency tracking.
//!
//! Records "A depends on B" edges for one deployment, refuses any edge
//! that would close a cycle (checked at insertion, not at traversal), and
//! produces a deterministic execution order in which every dependency
//! precedes its dependents. Ties are broken by declaration order.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::debug;

use flotilla_core::ComponentName;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("circular dependency: {component} cannot depend on {dependency}")]
    CircularDependency {
        component: ComponentName,
        dependency: ComponentName,
    },
}

pub type GraphResult<T> = Result<T, GraphError>;

/// Dependency edges for one deployment's components.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// component → set of components it depends on.
    edges: BTreeMap<ComponentName, BTreeSet<ComponentName>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `from` depends on `to`.
    ///
    /// Fails when the edge would close a cycle, including the degenerate
    /// self-edge and any path by which `to` already reaches `from`.
    pub fn add_edge(&mut self, from: &str, to: &str) -> GraphResult<()> {
        if from == to || self.reaches(to, from) {
            return Err(GraphError::CircularDependency {
                component: from.to_string(),
                dependency: to.to_string(),
            });
        }
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        debug!(component = from, dependency = to, "dependency edge added");
        Ok(())
    }

    /// Direct dependencies of a component.
    pub fn dependencies_of(&self, component: &str) -> impl Iterator<Item = &ComponentName> {
        self.edges.get(component).into_iter().flatten()
    }

    /// Whether `from` reaches `to` through dependency edges.
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !seen.insert(node) {
                continue;
            }
            if let Some(deps) = self.edges.get(node) {
                stack.extend(deps.iter().map(String::as_str));
            }
        }
        false
    }

    /// Order `declared` so every dependency precedes its dependents.
    ///
    /// Only edges between declared components are considered. The result
    /// is deterministic: among components whose dependencies are all
    /// satisfied, the earliest-declared wins.
    pub fn topo_order(&self, declared: &[ComponentName]) -> Vec<ComponentName> {
        let declared_set: BTreeSet<&str> = declared.iter().map(String::as_str).collect();
        let mut placed: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::with_capacity(declared.len());

        while order.len() < declared.len() {
            let mut advanced = false;
            for name in declared {
                if placed.contains(name.as_str()) {
                    continue;
                }
                let ready = self
                    .dependencies_of(name)
                    .filter(|dep| declared_set.contains(dep.as_str()))
                    .all(|dep| placed.contains(dep.as_str()));
                if ready {
                    placed.insert(name.as_str());
                    order.push(name.clone());
                    advanced = true;
                    break;
                }
            }
            // Unreachable while add_edge rejects cycles; bail rather than
            // spin if the invariant is ever broken.
            if !advanced {
                for name in declared {
                    if !placed.contains(name.as_str()) {
                        order.push(name.clone());
                    }
                }
                break;
            }
        }
        order
    }
}
