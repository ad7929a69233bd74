//! Topology declaration parser.
//!
//! The declaration is a YAML document with one top-level entry per
//! component. Component order in the document is preserved (it breaks
//! ties in execution ordering), hence the `IndexMap`. An `include` entry
//! pulls another document in as a lower-precedence configuration layer.

use std::collections::BTreeMap;
use std::path::Path;

use indexmap::IndexMap;
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::registry::{Server, ServerRegistry};
use crate::types::{ComponentName, ConfigMap};

/// A full deployment declaration: component name → component block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct TopologyDecl {
    pub components: IndexMap<ComponentName, ComponentDecl>,
}

/// One component's block in the declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ComponentDecl {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<ServerEntry>,

    /// Component-wide configuration, overridden per server below.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub global: ConfigMap,

    /// Per-server overrides, keyed by the server's logical name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub server_configs: BTreeMap<String, ConfigMap>,

    /// Per-zone overrides, between global and server precedence.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub zone_configs: BTreeMap<String, ConfigMap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<ComponentName>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_dependencies: Vec<RuntimeDependency>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Path to another document merged in as a lower-precedence layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
}

/// A runtime data path synced from another component at start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub src_path: String,
    pub target_path: String,
}

/// A server entry: a bare address, or a named address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerEntry {
    Address(String),
    Named { name: String, ip: String },
}

impl ServerEntry {
    pub fn address(&self) -> &str {
        match self {
            ServerEntry::Address(addr) => addr,
            ServerEntry::Named { ip, .. } => ip,
        }
    }

    pub fn logical_name(&self) -> &str {
        match self {
            ServerEntry::Address(addr) => addr,
            ServerEntry::Named { name, .. } => name,
        }
    }

    /// Intern this entry into the deployment's server registry.
    pub fn intern(&self, registry: &mut ServerRegistry) -> Server {
        registry.intern(self.address(), self.logical_name())
    }
}

/// Document referenced by an `include` entry; merged in beneath the
/// declared global layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct IncludeDoc {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: ConfigMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_hash: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl ComponentDecl {
    /// Parse the declared version, tolerating a leading `v`.
    pub fn parsed_version(&self, component: &str) -> CoreResult<Option<Version>> {
        match &self.version {
            None => Ok(None),
            Some(raw) => {
                let trimmed = raw.trim_start_matches('v');
                Version::parse(trimmed)
                    .map(Some)
                    .map_err(|source| CoreError::InvalidVersion {
                        component: component.to_string(),
                        version: raw.clone(),
                        source,
                    })
            }
        }
    }
}

impl TopologyDecl {
    pub fn parse(text: &str) -> CoreResult<Self> {
        serde_yaml::from_str(text).map_err(|source| CoreError::Parse {
            path: "<inline>".to_string(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let decl: Self = serde_yaml::from_str(&text).map_err(|source| CoreError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        debug!(
            path = %path.display(),
            components = decl.components.len(),
            "topology declaration loaded"
        );
        Ok(decl)
    }

    pub fn to_yaml_string(&self) -> CoreResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Digest of the canonical serialized declaration.
    pub fn content_hash(&self) -> CoreResult<String> {
        let text = self.to_yaml_string()?;
        let digest = Sha256::digest(text.as_bytes());
        Ok(hex::encode(digest))
    }

    /// Load every component's include document, resolved relative to
    /// `base_dir` (normally the declaration file's directory).
    pub fn resolve_includes(&self, base_dir: &Path) -> CoreResult<BTreeMap<ComponentName, IncludeDoc>> {
        let mut resolved = BTreeMap::new();
        for (name, decl) in &self.components {
            let Some(include) = &decl.include else {
                continue;
            };
            let path = base_dir.join(include);
            let text = std::fs::read_to_string(&path).map_err(|source| CoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let doc: IncludeDoc =
                serde_yaml::from_str(&text).map_err(|source| CoreError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            debug!(component = %name, path = %path.display(), "include document resolved");
            resolved.insert(name.clone(), doc);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECL: &str = r#"
tidepool:
  servers:
    - 10.0.0.1
    - name: node-b
      ip: 10.0.0.2
  version: v5.2.1
  global:
    port: 4000
    log_level: info
  server_configs:
    node-b:
      port: 4100
tidepool-proxy:
  servers:
    - 10.0.0.3
  depends:
    - tidepool
  env:
    RUST_LOG: debug
"#;

    #[test]
    fn malformed_declaration_reports_parse_error() {
        let err = TopologyDecl::parse("tidepool:\n  servers: {not: a list}\n").unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
    }

    #[test]
    fn parses_component_blocks_in_order() {
        let decl = TopologyDecl::parse(DECL).unwrap();
        let names: Vec<_> = decl.components.keys().cloned().collect();
        assert_eq!(names, vec!["tidepool", "tidepool-proxy"]);

        let tidepool = &decl.components["tidepool"];
        assert_eq!(tidepool.servers.len(), 2);
        assert_eq!(tidepool.servers[0].address(), "10.0.0.1");
        assert_eq!(tidepool.servers[1].logical_name(), "node-b");
        assert_eq!(
            tidepool.parsed_version("tidepool").unwrap(),
            Some(Version::new(5, 2, 1))
        );

        let proxy = &decl.components["tidepool-proxy"];
        assert_eq!(proxy.depends, vec!["tidepool"]);
    }

    #[test]
    fn round_trips_through_yaml() {
        let decl = TopologyDecl::parse(DECL).unwrap();
        let text = decl.to_yaml_string().unwrap();
        let reparsed = TopologyDecl::parse(&text).unwrap();
        assert_eq!(decl, reparsed);
    }

    #[test]
    fn content_hash_is_stable() {
        let decl = TopologyDecl::parse(DECL).unwrap();
        assert_eq!(decl.content_hash().unwrap(), decl.content_hash().unwrap());
    }

    #[test]
    fn resolves_include_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            "config:\n  log_level: warn\nversion: 5.0.0\n",
        )
        .unwrap();

        let decl = TopologyDecl::parse(
            "tidepool:\n  servers:\n    - 10.0.0.1\n  include: base.yaml\n",
        )
        .unwrap();
        let includes = decl.resolve_includes(dir.path()).unwrap();
        let doc = &includes["tidepool"];
        assert_eq!(doc.version.as_deref(), Some("5.0.0"));
        assert_eq!(
            doc.config["log_level"],
            serde_yaml::Value::String("warn".into())
        );
    }

    #[test]
    fn invalid_version_names_the_component() {
        let decl = TopologyDecl::parse("tidepool:\n  version: not-a-version\n").unwrap();
        let err = decl.components["tidepool"]
            .parsed_version("tidepool")
            .unwrap_err();
        assert!(err.to_string().contains("tidepool"));
        assert!(err.to_string().contains("not-a-version"));
    }
}
