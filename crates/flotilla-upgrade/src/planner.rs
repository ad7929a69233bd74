//! Multi-hop upgrade route planning.
//!
//! Breadth-first search over the compatibility graph from the installed
//! build to the requested one. The resulting route marks every hop as
//! in-place (direct) or requiring a binary swap, then partitions hops so
//! that old-data-format binary swaps run before the rest.

use std::collections::{HashMap, VecDeque};

use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{UpgradeError, UpgradeResult};
use crate::graph::UpgradeGraph;
use flotilla_core::Repository;

/// One step of a planned route. The first element of a route is the
/// current (source) build and is never a real hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeHop {
    pub version: Version,
    pub release: Option<String>,
    /// In-place upgrade from the preceding step; `false` means a full
    /// binary swap.
    pub direct_upgrade: bool,
}

/// Ordered upgrade route, source first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeRoute {
    pub hops: Vec<UpgradeHop>,
}

impl UpgradeRoute {
    /// Steps actually executed (everything after the source). An empty
    /// route, possible in a hand-edited marker document, has none.
    pub fn steps(&self) -> &[UpgradeHop] {
        self.hops.get(1..).unwrap_or_default()
    }
}

/// Plan the shortest valid route from `from` to `to`.
pub fn plan(graph: &UpgradeGraph, from: &Repository, to: &Repository) -> UpgradeResult<UpgradeRoute> {
    let no_route = || UpgradeError::NoRoute {
        component: graph.component.clone(),
        from: from.version.clone(),
        to: to.version.clone(),
    };

    let start = graph
        .find(&from.version, from.release.as_deref())
        .ok_or_else(no_route)?;

    let matches_target = |index: usize| {
        let node = &graph.nodes[index];
        node.version == to.version
            && match (&node.release, &to.release) {
                (Some(node_release), Some(wanted)) => node_release == wanted,
                (Some(_), None) => false,
                (None, _) => true,
            }
    };

    // BFS with precursor pointers; nodes are visited at most once.
    let mut precursor: HashMap<usize, usize> = HashMap::new();
    let mut visited = vec![false; graph.nodes.len()];
    let mut queue = VecDeque::from([start]);
    visited[start] = true;

    let mut destination = None;
    if matches_target(start) {
        destination = Some(start);
    }
    while destination.is_none() {
        let Some(current) = queue.pop_front() else {
            break;
        };
        for next in graph.successors(current) {
            if visited[next] {
                continue;
            }
            visited[next] = true;
            precursor.insert(next, current);
            if matches_target(next) {
                destination = Some(next);
                break;
            }
            queue.push_back(next);
        }
    }
    let destination = destination.ok_or_else(no_route)?;

    if graph.nodes[destination].deprecated {
        return Err(UpgradeError::DeprecatedTarget {
            component: graph.component.clone(),
            version: graph.nodes[destination].version.clone(),
        });
    }

    // Walk precursors back to the source, then reverse.
    let mut indices = vec![destination];
    let mut cursor = destination;
    while let Some(&prev) = precursor.get(&cursor) {
        indices.push(prev);
        cursor = prev;
    }
    indices.reverse();

    let mut hops: Vec<UpgradeHop> = Vec::with_capacity(indices.len());
    for &index in &indices {
        let node = &graph.nodes[index];
        // Collapse consecutive same-version entries (release-only moves).
        if hops.last().is_some_and(|last| last.version == node.version) {
            continue;
        }
        let direct_upgrade = match hops.last() {
            Some(prev) => node.direct_from(&prev.version),
            None => false,
        };
        hops.push(UpgradeHop {
            version: node.version.clone(),
            release: node.release.clone(),
            direct_upgrade,
        });
    }

    let route = UpgradeRoute {
        hops: reorder_for_data_format(hops, &graph.old_format_boundary),
    };
    info!(
        component = %graph.component,
        from = %from.version,
        to = %to.version,
        steps = route.steps().len(),
        "upgrade route planned"
    );
    Ok(route)
}

/// Binary-swap hops below the old-data-format boundary must run before
/// everything else; the remaining hops keep their relative order, each
/// re-checked for a swap against its own predecessor version.
fn reorder_for_data_format(hops: Vec<UpgradeHop>, boundary: &Version) -> Vec<UpgradeHop> {
    if hops.len() <= 1 {
        return hops;
    }
    let mut out = vec![hops[0].clone()];
    let mut rest = Vec::new();
    let mut previous = hops[0].version.clone();

    for hop in &hops[1..] {
        if hop.version < *boundary && !hop.direct_upgrade {
            debug!(version = %hop.version, "old-format binary swap kept in forward sub-route");
            out.push(hop.clone());
        } else {
            let mut hop = hop.clone();
            hop.direct_upgrade = hop.direct_upgrade && hop.version > previous;
            rest.push(hop);
        }
        previous = hop.version.clone();
    }
    out.extend(rest);
    out
}
