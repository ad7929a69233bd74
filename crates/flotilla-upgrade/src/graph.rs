//! Version-compatibility graph.
//!
//! Loaded once per component from a descriptor shipped with the plugin
//! tree, read-only at plan time. Each node lists the versions it can be
//! upgraded to (outgoing edges) and the versions that may upgrade into
//! it in place (its direct upgrade sources).

use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{UpgradeError, UpgradeResult};
use flotilla_core::ComponentName;

/// Versions below this boundary carry the old on-disk data format unless
/// the descriptor says otherwise.
pub const DEFAULT_OLD_FORMAT_BOUNDARY: Version = Version::new(4, 0, 0);

/// One version node in the compatibility graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeNode {
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default)]
    pub deprecated: bool,
    /// Versions reachable from this node in one hop.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgrade_to: Vec<Version>,
    /// Versions that may upgrade into this node in place, without a
    /// binary swap.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub direct_upgrade_from: Vec<Version>,
}

impl UpgradeNode {
    /// Whether arriving from `predecessor` is a direct (in-place) hop.
    pub fn direct_from(&self, predecessor: &Version) -> bool {
        self.direct_upgrade_from.contains(predecessor)
    }
}

/// Per-component compatibility graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeGraph {
    pub component: ComponentName,
    #[serde(default = "default_boundary")]
    pub old_format_boundary: Version,
    pub nodes: Vec<UpgradeNode>,
}

fn default_boundary() -> Version {
    DEFAULT_OLD_FORMAT_BOUNDARY
}

impl UpgradeGraph {
    pub fn parse(text: &str) -> UpgradeResult<Self> {
        serde_yaml::from_str(text).map_err(|source| UpgradeError::DescriptorParse {
            path: "<inline>".to_string(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> UpgradeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| UpgradeError::DescriptorIo {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| UpgradeError::DescriptorParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Indices of nodes reachable from `index` in one hop.
    pub(crate) fn successors(&self, index: usize) -> Vec<usize> {
        let targets = &self.nodes[index].upgrade_to;
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| targets.contains(&node.version))
            .map(|(i, _)| i)
            .collect()
    }

    /// First node matching `version`, honoring a declared release: a node
    /// that pins a release only matches that release; a node without one
    /// matches any.
    pub(crate) fn find(&self, version: &Version, release: Option<&str>) -> Option<usize> {
        self.nodes.iter().position(|node| {
            node.version == *version
                && match (&node.release, release) {
                    (Some(node_release), Some(wanted)) => node_release == wanted,
                    (Some(_), None) => false,
                    (None, _) => true,
                }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_descriptor() {
        let text = r#"
component: tidepool
nodes:
  - version: 1.0.0
    upgrade_to: [2.0.0]
  - version: 2.0.0
    upgrade_to: [3.0.0]
    direct_upgrade_from: [1.0.0]
  - version: 3.0.0
    direct_upgrade_from: [2.0.0]
  - version: 2.5.0
    deprecated: true
"#;
        let graph = UpgradeGraph::parse(text).unwrap();
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.old_format_boundary, DEFAULT_OLD_FORMAT_BOUNDARY);
        assert!(graph.nodes[1].direct_from(&Version::new(1, 0, 0)));
        assert!(graph.nodes[3].deprecated);
    }

    #[test]
    fn release_pinning_on_lookup() {
        let text = r#"
component: tidepool
nodes:
  - version: 2.0.0
    release: "20240101"
  - version: 2.0.0
"#;
        let graph = UpgradeGraph::parse(text).unwrap();
        // A pinned node only matches its release.
        assert_eq!(graph.find(&Version::new(2, 0, 0), Some("20240101")), Some(0));
        // Without a requested release, the unpinned node matches.
        assert_eq!(graph.find(&Version::new(2, 0, 0), None), Some(1));
    }
}
