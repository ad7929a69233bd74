//! Versioned plugin registry.
//!
//! Plugins follow a directory convention:
//!
//! ```text
//! <root>/<component>/<version>/<capability-flag-file>
//! ```
//!
//! Presence of the flag file marks that version as providing the
//! capability. Workflow builders use the same convention keyed by action
//! name. Scans are cached per `(component, capability)`; re-resolving
//! reuses the cache until it is explicitly invalidated.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use semver::Version;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::descriptor::{PluginDescriptor, ResolvedPlugin};
use crate::error::{PluginError, PluginResult};
use flotilla_core::ComponentName;

/// Directory-backed catalog of versioned capability implementations.
#[derive(Debug)]
pub struct PluginRegistry {
    root: PathBuf,
    cache: HashMap<(ComponentName, String), BTreeMap<Version, PluginDescriptor>>,
}

impl PluginRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the best implementation of `capability` for `component` at
    /// `requested`.
    ///
    /// An exact version match wins. Otherwise the highest version
    /// strictly below the request is returned with `fallback = true`.
    /// With nothing at or below the request, resolution fails.
    pub fn resolve(
        &mut self,
        component: &str,
        capability: &str,
        requested: &Version,
    ) -> PluginResult<ResolvedPlugin> {
        let catalog = self.catalog(component, capability)?;

        if let Some(descriptor) = catalog.get(requested) {
            return Ok(ResolvedPlugin {
                descriptor: descriptor.clone(),
                fallback: false,
            });
        }

        match catalog.range(..requested.clone()).next_back() {
            Some((version, descriptor)) => {
                warn!(
                    component,
                    capability,
                    requested = %requested,
                    selected = %version,
                    "exact plugin version missing, falling back"
                );
                Ok(ResolvedPlugin {
                    descriptor: descriptor.clone(),
                    fallback: true,
                })
            }
            None => Err(PluginError::NotFound {
                component: component.to_string(),
                capability: capability.to_string(),
                requested: requested.clone(),
            }),
        }
    }

    /// All versions providing `capability`, lowest first.
    pub fn versions(&mut self, component: &str, capability: &str) -> PluginResult<Vec<Version>> {
        Ok(self.catalog(component, capability)?.keys().cloned().collect())
    }

    /// Drop the cached scan for one `(component, capability)` pair.
    pub fn invalidate(&mut self, component: &str, capability: &str) {
        self.cache
            .remove(&(component.to_string(), capability.to_string()));
    }

    /// Drop every cached scan.
    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    fn catalog(
        &mut self,
        component: &str,
        capability: &str,
    ) -> PluginResult<&BTreeMap<Version, PluginDescriptor>> {
        let key = (component.to_string(), capability.to_string());
        if !self.cache.contains_key(&key) {
            let scanned = scan(&self.root, component, capability)?;
            debug!(
                component,
                capability,
                versions = scanned.len(),
                "plugin directory scanned"
            );
            self.cache.insert(key.clone(), scanned);
        }
        Ok(&self.cache[&key])
    }
}

fn scan(
    root: &Path,
    component: &str,
    capability: &str,
) -> PluginResult<BTreeMap<Version, PluginDescriptor>> {
    let component_dir = root.join(component);
    let mut catalog = BTreeMap::new();
    if !component_dir.is_dir() {
        return Ok(catalog);
    }

    for entry in WalkDir::new(&component_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| PluginError::Scan {
            path: component_dir.display().to_string(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walkdir error")),
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir_name = entry.file_name().to_string_lossy().into_owned();
        let Ok(version) = Version::parse(dir_name.trim_start_matches('v')) else {
            debug!(component, dir = %dir_name, "skipping non-version plugin directory");
            continue;
        };
        if entry.path().join(capability).is_file() {
            catalog.insert(
                version.clone(),
                PluginDescriptor {
                    component: component.to_string(),
                    capability: capability.to_string(),
                    version,
                    path: entry.path().to_path_buf(),
                },
            );
        }
    }
    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin_tree(versions: &[&str], capability: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for version in versions {
            let vdir = dir.path().join("tidepool").join(version);
            std::fs::create_dir_all(&vdir).unwrap();
            std::fs::write(vdir.join(capability), "").unwrap();
        }
        dir
    }

    #[test]
    fn exact_version_resolves_without_fallback() {
        let dir = plugin_tree(&["1.0.0", "2.0.0", "3.0.0"], "start");
        let mut registry = PluginRegistry::new(dir.path());
        let resolved = registry
            .resolve("tidepool", "start", &Version::new(2, 0, 0))
            .unwrap();
        assert!(!resolved.fallback);
        assert_eq!(resolved.descriptor.version, Version::new(2, 0, 0));
    }

    #[test]
    fn missing_version_falls_back_to_highest_below() {
        let dir = plugin_tree(&["1.0.0", "2.0.0", "3.0.0"], "start");
        let mut registry = PluginRegistry::new(dir.path());
        let resolved = registry
            .resolve("tidepool", "start", &Version::new(2, 5, 0))
            .unwrap();
        assert!(resolved.fallback);
        assert_eq!(resolved.descriptor.version, Version::new(2, 0, 0));
    }

    #[test]
    fn nothing_at_or_below_fails() {
        let dir = plugin_tree(&["1.0.0", "2.0.0", "3.0.0"], "start");
        let mut registry = PluginRegistry::new(dir.path());
        let err = registry
            .resolve("tidepool", "start", &Version::new(0, 5, 0))
            .unwrap_err();
        assert!(matches!(err, PluginError::NotFound { .. }));
    }

    #[test]
    fn capability_flag_file_gates_discovery() {
        let dir = plugin_tree(&["1.0.0"], "start");
        let mut registry = PluginRegistry::new(dir.path());
        // "stop" flag file was never written.
        assert!(registry
            .resolve("tidepool", "stop", &Version::new(1, 0, 0))
            .is_err());
    }

    #[test]
    fn scan_is_cached_until_invalidated() {
        let dir = plugin_tree(&["1.0.0"], "start");
        let mut registry = PluginRegistry::new(dir.path());
        registry
            .resolve("tidepool", "start", &Version::new(1, 0, 0))
            .unwrap();

        // Add a new version after the first scan: the cache hides it.
        let vdir = dir.path().join("tidepool").join("2.0.0");
        std::fs::create_dir_all(&vdir).unwrap();
        std::fs::write(vdir.join("start"), "").unwrap();
        let resolved = registry
            .resolve("tidepool", "start", &Version::new(2, 0, 0))
            .unwrap();
        assert!(resolved.fallback);

        registry.invalidate("tidepool", "start");
        let resolved = registry
            .resolve("tidepool", "start", &Version::new(2, 0, 0))
            .unwrap();
        assert!(!resolved.fallback);
    }

    #[test]
    fn non_version_directories_are_skipped() {
        let dir = plugin_tree(&["1.0.0"], "start");
        std::fs::create_dir_all(dir.path().join("tidepool").join("scratch")).unwrap();
        let mut registry = PluginRegistry::new(dir.path());
        assert_eq!(
            registry.versions("tidepool", "start").unwrap(),
            vec![Version::new(1, 0, 0)]
        );
    }
}
