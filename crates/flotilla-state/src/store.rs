//! File-backed state store.
//!
//! Layout under the state root:
//!
//! ```text
//! <root>/<deployment>/meta.yaml      # DeploymentRecord
//! <root>/<deployment>/upgrade.yaml   # UpgradeMarker (transient)
//! ```
//!
//! Writes go through a temp file and rename so a crash mid-write never
//! leaves a truncated document behind.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::types::{DeploymentRecord, UpgradeMarker};

const META_FILE: &str = "meta.yaml";
const MARKER_FILE: &str = "upgrade.yaml";

/// Store of persisted deployment documents under one root directory.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn open(root: impl Into<PathBuf>) -> StateResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StateError::Io {
            path: root.display().to_string(),
            source,
        })?;
        debug!(root = %root.display(), "state store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Deployment records ─────────────────────────────────────────

    /// Write (or rewrite) a deployment's record.
    pub fn save_deployment(&self, record: &DeploymentRecord) -> StateResult<()> {
        let dir = self.root.join(&record.name);
        fs::create_dir_all(&dir).map_err(|source| StateError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        write_atomic(&dir.join(META_FILE), record)?;
        debug!(deployment = %record.name, status = %record.status, "deployment record saved");
        Ok(())
    }

    pub fn load_deployment(&self, name: &str) -> StateResult<Option<DeploymentRecord>> {
        read_optional(&self.root.join(name).join(META_FILE))
    }

    /// All persisted records, in name order.
    pub fn list_deployments(&self) -> StateResult<Vec<DeploymentRecord>> {
        let mut records = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(source) => {
                return Err(StateError::Io {
                    path: self.root.display().to_string(),
                    source,
                })
            }
        };
        for entry in entries {
            let entry = entry.map_err(|source| StateError::Io {
                path: self.root.display().to_string(),
                source,
            })?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(record) = read_optional::<DeploymentRecord>(&entry.path().join(META_FILE))?
            {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Remove a deployment's documents. Returns whether it existed.
    pub fn delete_deployment(&self, name: &str) -> StateResult<bool> {
        let dir = self.root.join(name);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).map_err(|source| StateError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        debug!(deployment = name, "deployment record deleted");
        Ok(true)
    }

    // ── Upgrade markers ────────────────────────────────────────────

    pub fn write_marker(&self, deployment: &str, marker: &UpgradeMarker) -> StateResult<()> {
        let dir = self.root.join(deployment);
        fs::create_dir_all(&dir).map_err(|source| StateError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        write_atomic(&dir.join(MARKER_FILE), marker)?;
        debug!(
            deployment,
            component = %marker.component,
            index = marker.current_index,
            "upgrade marker written"
        );
        Ok(())
    }

    pub fn load_marker(&self, deployment: &str) -> StateResult<Option<UpgradeMarker>> {
        read_optional(&self.root.join(deployment).join(MARKER_FILE))
    }

    pub fn clear_marker(&self, deployment: &str) -> StateResult<()> {
        let path = self.root.join(deployment).join(MARKER_FILE);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(deployment, "upgrade marker cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}

fn write_atomic<T: Serialize>(path: &Path, value: &T) -> StateResult<()> {
    let text = serde_yaml::to_string(value)?;
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, text).map_err(|source| StateError::Io {
        path: tmp.display().to_string(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| StateError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> StateResult<Option<T>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StateError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    serde_yaml::from_str(&text)
        .map(Some)
        .map_err(|source| StateError::Corrupt {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ComponentBinding;
    use flotilla_core::{ConfigStatus, DeploymentStatus};
    use semver::Version;

    fn binding(version: &str) -> ComponentBinding {
        ComponentBinding {
            version: Version::parse(version).unwrap(),
            content_hash: None,
        }
    }

    #[test]
    fn save_and_reload_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let mut record = DeploymentRecord::new("prod");
        record.bindings.insert("tidepool".into(), binding("5.2.1"));
        store.save_deployment(&record).unwrap();

        let loaded = store.load_deployment("prod").unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(store.load_deployment("absent").unwrap().is_none());
    }

    #[test]
    fn rewrite_on_status_transition() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let mut record = DeploymentRecord::new("prod");
        store.save_deployment(&record).unwrap();

        record.status = DeploymentStatus::Deployed;
        record.config_status = ConfigStatus::NeedsRestart;
        store.save_deployment(&record).unwrap();

        let loaded = store.load_deployment("prod").unwrap().unwrap();
        assert_eq!(loaded.status, DeploymentStatus::Deployed);
        assert_eq!(loaded.config_status, ConfigStatus::NeedsRestart);
    }

    #[test]
    fn list_is_name_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.save_deployment(&DeploymentRecord::new("staging")).unwrap();
        store.save_deployment(&DeploymentRecord::new("prod")).unwrap();

        let names: Vec<String> = store
            .list_deployments()
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["prod", "staging"]);
    }

    #[test]
    fn delete_reports_existence() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store.save_deployment(&DeploymentRecord::new("prod")).unwrap();
        assert!(store.delete_deployment("prod").unwrap());
        assert!(!store.delete_deployment("prod").unwrap());
    }

    #[test]
    fn marker_round_trip_and_clear() {
        use flotilla_upgrade::{UpgradeHop, UpgradeRoute};

        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        let marker = UpgradeMarker {
            component: "tidepool".into(),
            route: UpgradeRoute {
                hops: vec![
                    UpgradeHop {
                        version: semver::Version::new(1, 0, 0),
                        release: None,
                        direct_upgrade: false,
                    },
                    UpgradeHop {
                        version: semver::Version::new(2, 0, 0),
                        release: None,
                        direct_upgrade: true,
                    },
                ],
            },
            current_index: 1,
        };
        store.write_marker("prod", &marker).unwrap();
        assert_eq!(store.load_marker("prod").unwrap().unwrap(), marker);

        store.clear_marker("prod").unwrap();
        assert!(store.load_marker("prod").unwrap().is_none());
        // Clearing twice is fine.
        store.clear_marker("prod").unwrap();
    }
}
