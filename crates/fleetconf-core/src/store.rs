//! Versioned desired-state persistence (§4.9). Five category directories
//! under a root working tree, git-backed history, snapshots and drift
//! detection against live device state.

use crate::error::FleetConfError;
use crate::git::{CommitInfo, GitManager};
use crate::model::{
    ConfigSource, DesiredState, DriftCategory, DriftItem, DriftReport, DriftType, LastKnownState,
    NormalizedPort, NormalizedVlan, StoredConfig, StoredConfigMeta, DEFAULT_VLAN,
};
use crate::parser;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct ConfigStore {
    base_dir: PathBuf,
    git: Option<GitManager>,
}

impl ConfigStore {
    pub fn new(base_dir: impl Into<PathBuf>, git_enabled: bool) -> Result<Self, FleetConfError> {
        let base_dir = base_dir.into();
        let store = Self {
            base_dir,
            git: None,
        };
        store.ensure_directories()?;

        let git = if git_enabled {
            let manager = GitManager::new(store.configs_dir());
            manager.init()?;
            Some(manager)
        } else {
            None
        };

        Ok(Self { git, ..store })
    }

    pub fn default_base_dir() -> PathBuf {
        dirs_home().join(".fleetconf")
    }

    fn ensure_directories(&self) -> Result<(), FleetConfError> {
        for dir in [
            self.desired_dir(),
            self.profiles_dir(),
            self.network_dir(),
            self.snapshots_dir(),
            self.last_known_dir(),
            self.drift_reports_dir(),
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.base_dir.join("configs")
    }
    pub fn desired_dir(&self) -> PathBuf {
        self.configs_dir().join("desired")
    }
    pub fn profiles_dir(&self) -> PathBuf {
        self.configs_dir().join("profiles")
    }
    pub fn network_dir(&self) -> PathBuf {
        self.configs_dir().join("network")
    }
    pub fn snapshots_dir(&self) -> PathBuf {
        self.configs_dir().join("snapshots")
    }
    pub fn last_known_dir(&self) -> PathBuf {
        self.base_dir.join("state").join("last_known")
    }
    pub fn drift_reports_dir(&self) -> PathBuf {
        self.base_dir.join("state").join("drift_reports")
    }

    fn desired_path(&self, device_id: &str) -> PathBuf {
        self.desired_dir().join(format!("{device_id}.yaml"))
    }

    // === Desired state ===

    pub fn get_desired_config(&self, device_id: &str) -> Result<Option<StoredConfig>, FleetConfError> {
        let path = self.desired_path(device_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_yaml::from_str(&content)?))
    }

    /// Saves `body` as the desired state for `device_id`, bumping the
    /// version, recomputing the checksum, and committing only the one
    /// changed file. Every call produces a new version and a new commit,
    /// even if `body` is identical to what is already stored.
    pub fn save_desired_config(
        &self,
        device_id: &str,
        mut body: DesiredState,
        source: ConfigSource,
        updated_by: Option<String>,
        commit_message: Option<String>,
    ) -> Result<StoredConfig, FleetConfError> {
        let existing = self.get_desired_config(device_id)?;
        let version = existing.map(|c| c.meta.version + 1).unwrap_or(1);

        let checksum = parser::compute_checksum(&serde_json::to_value(&body)?)?;
        body.checksum = Some(checksum.clone());

        let stored = StoredConfig {
            meta: StoredConfigMeta {
                device_id: device_id.to_string(),
                version,
                checksum,
                updated_at: Utc::now(),
                updated_by: updated_by.unwrap_or_else(|| "system".to_string()),
                source,
            },
            body,
        };

        let path = self.desired_path(device_id);
        fs::write(&path, serde_yaml::to_string(&stored)?)?;

        if let Some(git) = &self.git {
            let message = commit_message.unwrap_or_else(|| format!("[{device_id}] config updated (v{version})"));
            git.commit(&message, &[format!("desired/{device_id}.yaml")])?;
        }

        info!(device_id, version, "saved desired config");
        Ok(stored)
    }

    pub fn list_desired_configs(&self) -> Result<Vec<String>, FleetConfError> {
        list_yaml_stems(&self.desired_dir())
    }

    pub fn delete_desired_config(&self, device_id: &str) -> Result<bool, FleetConfError> {
        let path = self.desired_path(device_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    // === Last known state ===

    pub fn save_last_known(
        &self,
        device_id: &str,
        vlans: &[NormalizedVlan],
        ports: &[NormalizedPort],
    ) -> Result<(), FleetConfError> {
        let state = LastKnownState {
            device_id: device_id.to_string(),
            fetched_at: Utc::now(),
            vlans: vlans.iter().map(|v| (v.id, v.clone())).collect(),
            ports: ports.iter().map(|p| (p.id.clone(), p.clone())).collect(),
        };
        let path = self.last_known_dir().join(format!("{device_id}.yaml"));
        fs::write(path, serde_yaml::to_string(&state)?)?;
        Ok(())
    }

    pub fn get_last_known(&self, device_id: &str) -> Result<Option<LastKnownState>, FleetConfError> {
        let path = self.last_known_dir().join(format!("{device_id}.yaml"));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_yaml::from_str(&fs::read_to_string(path)?)?))
    }

    // === Snapshots ===

    pub fn create_snapshot(&self, name: Option<String>, device_ids: Option<Vec<String>>) -> Result<String, FleetConfError> {
        let name = name.unwrap_or_else(|| Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string());
        let snapshot_dir = self.snapshots_dir().join(&name);
        fs::create_dir_all(&snapshot_dir)?;

        let device_ids = match device_ids {
            Some(ids) => ids,
            None => self.list_desired_configs()?,
        };

        for device_id in &device_ids {
            let src = self.desired_path(device_id);
            if src.exists() {
                fs::copy(&src, snapshot_dir.join(format!("{device_id}.yaml")))?;
            }
        }

        info!(snapshot = %name, count = device_ids.len(), "created snapshot");
        Ok(name)
    }

    pub fn list_snapshots(&self) -> Result<Vec<String>, FleetConfError> {
        let mut names: Vec<String> = fs::read_dir(self.snapshots_dir())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort_unstable();
        names.reverse();
        Ok(names)
    }

    pub fn restore_snapshot(&self, name: &str, device_ids: Option<Vec<String>>) -> Result<Vec<String>, FleetConfError> {
        let snapshot_dir = self.snapshots_dir().join(name);
        if !snapshot_dir.exists() {
            return Err(FleetConfError::StoreError(format!("snapshot '{name}' not found")));
        }

        let device_ids = match device_ids {
            Some(ids) => ids,
            None => list_yaml_stems(&snapshot_dir)?,
        };

        let mut restored = Vec::new();
        for device_id in device_ids {
            let src = snapshot_dir.join(format!("{device_id}.yaml"));
            if src.exists() {
                fs::copy(&src, self.desired_path(&device_id))?;
                restored.push(device_id);
            }
        }

        info!(snapshot = %name, count = restored.len(), "restored snapshot");
        Ok(restored)
    }

    // === Drift detection ===

    /// Compares live VLAN/port state against the stored desired state.
    /// VLANs present live but absent from desired never drift if the id is
    /// the protected default VLAN; this suppresses default-VLAN noise on
    /// switches that always carry it.
    pub fn calculate_drift(
        &self,
        device_id: &str,
        actual_vlans: &[NormalizedVlan],
        actual_ports: &[NormalizedPort],
    ) -> Result<DriftReport, FleetConfError> {
        let desired = self.get_desired_config(device_id)?;

        let Some(desired) = desired else {
            return Ok(DriftReport {
                device_id: device_id.to_string(),
                checked_at: Utc::now(),
                in_sync: true,
                items: Vec::new(),
            });
        };

        let actual_vlan_map: BTreeMap<u16, &NormalizedVlan> = actual_vlans.iter().map(|v| (v.id, v)).collect();
        let actual_port_map: BTreeMap<&str, &NormalizedPort> =
            actual_ports.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut items = Vec::new();

        for (&vlan_id, desired_vlan) in &desired.body.vlans {
            match actual_vlan_map.get(&vlan_id) {
                None => items.push(DriftItem {
                    category: DriftCategory::Vlan,
                    item_id: vlan_id.to_string(),
                    drift_type: DriftType::Missing,
                    expected: serde_json::to_value(desired_vlan)?,
                    actual: serde_json::Value::Null,
                    details: format!("VLAN {vlan_id} expected but not found"),
                }),
                Some(actual_vlan) => {
                    items.extend(vlan_drift(vlan_id, &desired_vlan.untagged, &desired_vlan.tagged, actual_vlan));
                }
            }
        }

        for (&vlan_id, actual_vlan) in &actual_vlan_map {
            if !desired.body.vlans.contains_key(&vlan_id) && vlan_id != DEFAULT_VLAN {
                items.push(DriftItem {
                    category: DriftCategory::Vlan,
                    item_id: vlan_id.to_string(),
                    drift_type: DriftType::Extra,
                    expected: serde_json::Value::Null,
                    actual: serde_json::to_value(actual_vlan)?,
                    details: format!("VLAN {vlan_id} exists but not in desired config"),
                });
            }
        }

        for (port_id, desired_port) in &desired.body.ports {
            match actual_port_map.get(port_id.as_str()) {
                None => items.push(DriftItem {
                    category: DriftCategory::Port,
                    item_id: port_id.clone(),
                    drift_type: DriftType::Missing,
                    expected: serde_json::to_value(desired_port)?,
                    actual: serde_json::Value::Null,
                    details: format!("port {port_id} not found"),
                }),
                Some(actual_port) => {
                    if let Some(desired_enabled) = desired_port.enabled {
                        let actual_enabled = actual_port.enabled.unwrap_or(true);
                        if desired_enabled != actual_enabled {
                            items.push(DriftItem {
                                category: DriftCategory::Port,
                                item_id: port_id.clone(),
                                drift_type: DriftType::Modified,
                                expected: serde_json::json!({ "enabled": desired_enabled }),
                                actual: serde_json::json!({ "enabled": actual_enabled }),
                                details: format!(
                                    "port {port_id} enabled: expected {desired_enabled}, actual {actual_enabled}"
                                ),
                            });
                        }
                    }
                }
            }
        }

        self.save_last_known(device_id, actual_vlans, actual_ports)?;

        let report = DriftReport {
            device_id: device_id.to_string(),
            checked_at: Utc::now(),
            in_sync: items.is_empty(),
            items,
        };
        self.save_drift_report(&report)?;

        Ok(report)
    }

    fn save_drift_report(&self, report: &DriftReport) -> Result<(), FleetConfError> {
        let filename = format!(
            "{}_{}.json",
            report.checked_at.format("%Y-%m-%dT%H:%M:%S"),
            report.device_id
        );
        let path = self.drift_reports_dir().join(filename);
        fs::write(path, serde_json::to_string_pretty(report)?)?;
        Ok(())
    }

    // === Profiles ===

    pub fn list_profiles(&self) -> Result<Vec<String>, FleetConfError> {
        list_yaml_stems(&self.profiles_dir())
    }

    pub fn get_profile(&self, name: &str) -> Result<Option<serde_yaml::Value>, FleetConfError> {
        let path = self.profiles_dir().join(format!("{name}.yaml"));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_yaml::from_str(&fs::read_to_string(path)?)?))
    }

    pub fn save_profile(&self, name: &str, config: &serde_yaml::Value) -> Result<(), FleetConfError> {
        let path = self.profiles_dir().join(format!("{name}.yaml"));
        fs::write(path, serde_yaml::to_string(config)?)?;
        Ok(())
    }

    // === Network-wide definitions ===

    pub fn get_network_vlans(&self) -> Result<Option<serde_yaml::Value>, FleetConfError> {
        let path = self.network_dir().join("vlans.yaml");
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_yaml::from_str(&fs::read_to_string(path)?)?))
    }

    pub fn save_network_vlans(&self, config: &serde_yaml::Value) -> Result<(), FleetConfError> {
        let path = self.network_dir().join("vlans.yaml");
        fs::write(path, serde_yaml::to_string(config)?)?;
        Ok(())
    }

    // === History & versioning ===

    pub fn get_config_history(&self, device_id: Option<&str>, limit: u32) -> Result<Vec<CommitInfo>, FleetConfError> {
        let Some(git) = &self.git else { return Ok(Vec::new()) };
        let file_path = device_id.map(|id| format!("desired/{id}.yaml"));
        git.history(file_path.as_deref(), limit)
    }

    pub fn get_config_at_revision(&self, device_id: &str, revision: &str) -> Result<Option<StoredConfig>, FleetConfError> {
        let Some(git) = &self.git else { return Ok(None) };
        let file_path = format!("desired/{device_id}.yaml");
        let Some(content) = git.file_at_revision(&file_path, revision)? else {
            return Ok(None);
        };
        Ok(Some(serde_yaml::from_str(&content)?))
    }

    /// Restores `device_id`'s desired state from `revision`. The restore
    /// itself is saved as a new commit, so history stays strictly
    /// monotonic; it never rewrites or checks out the old commit directly.
    pub fn restore_config_from_revision(&self, device_id: &str, revision: &str) -> Result<Option<StoredConfig>, FleetConfError> {
        let Some(old) = self.get_config_at_revision(device_id, revision)? else {
            return Ok(None);
        };
        let message = format!("[{device_id}] restored from {revision}");
        Ok(Some(self.save_desired_config(
            device_id,
            old.body,
            ConfigSource::Restore,
            Some("git-restore".to_string()),
            Some(message),
        )?))
    }

    pub fn diff_config_revisions(&self, device_id: &str, rev1: &str, rev2: &str) -> Result<String, FleetConfError> {
        let Some(git) = &self.git else { return Ok(String::new()) };
        let file_path = format!("desired/{device_id}.yaml");
        git.diff(Some(&file_path), rev1, rev2)
    }
}

fn vlan_drift(
    vlan_id: u16,
    desired_untagged: &BTreeSet<String>,
    desired_tagged: &BTreeSet<String>,
    actual: &NormalizedVlan,
) -> Vec<DriftItem> {
    let mut items = Vec::new();

    let missing_untagged: BTreeSet<&String> = desired_untagged.difference(&actual.untagged_ports).collect();
    let extra_untagged: BTreeSet<&String> = actual.untagged_ports.difference(desired_untagged).collect();

    if !missing_untagged.is_empty() {
        items.push(DriftItem {
            category: DriftCategory::Vlan,
            item_id: vlan_id.to_string(),
            drift_type: DriftType::Modified,
            expected: serde_json::to_value(desired_untagged).unwrap_or(serde_json::Value::Null),
            actual: serde_json::to_value(&actual.untagged_ports).unwrap_or(serde_json::Value::Null),
            details: format!("missing untagged ports: {}", join(&missing_untagged)),
        });
    }
    if !extra_untagged.is_empty() && !desired_untagged.is_empty() {
        items.push(DriftItem {
            category: DriftCategory::Vlan,
            item_id: vlan_id.to_string(),
            drift_type: DriftType::Modified,
            expected: serde_json::to_value(desired_untagged).unwrap_or(serde_json::Value::Null),
            actual: serde_json::to_value(&actual.untagged_ports).unwrap_or(serde_json::Value::Null),
            details: format!("extra untagged ports: {}", join(&extra_untagged)),
        });
    }

    let missing_tagged: BTreeSet<&String> = desired_tagged.difference(&actual.tagged_ports).collect();
    if !missing_tagged.is_empty() {
        items.push(DriftItem {
            category: DriftCategory::Vlan,
            item_id: vlan_id.to_string(),
            drift_type: DriftType::Modified,
            expected: serde_json::to_value(desired_tagged).unwrap_or(serde_json::Value::Null),
            actual: serde_json::to_value(&actual.tagged_ports).unwrap_or(serde_json::Value::Null),
            details: format!("missing tagged ports: {}", join(&missing_tagged)),
        });
    }

    items
}

fn join(set: &BTreeSet<&String>) -> String {
    let mut items: Vec<&str> = set.iter().map(|s| s.as_str()).collect();
    items.sort_unstable();
    items.join(", ")
}

fn list_yaml_stems(dir: &Path) -> Result<Vec<String>, FleetConfError> {
    let mut stems = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
    }
    stems.sort_unstable();
    Ok(stems)
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VlanIntent;
    use tempfile::tempdir;

    fn git_available() -> bool {
        std::process::Command::new("git").arg("--version").output().is_ok()
    }

    #[test]
    fn save_then_get_roundtrips_and_bumps_version() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path(), git_available()).unwrap();

        let mut body = DesiredState::new("br-a");
        body.vlans.insert(
            100,
            VlanIntent {
                untagged: ["1/1/1".to_string()].into_iter().collect(),
                ..Default::default()
            },
        );

        let stored = store
            .save_desired_config("br-a", body.clone(), ConfigSource::Manual, None, None)
            .unwrap();
        assert_eq!(stored.meta.version, 1);

        let stored_again = store
            .save_desired_config("br-a", body, ConfigSource::Manual, None, None)
            .unwrap();
        assert_eq!(stored_again.meta.version, 2);

        let loaded = store.get_desired_config("br-a").unwrap().unwrap();
        assert_eq!(loaded.meta.version, 2);
    }

    #[test]
    fn drift_suppresses_default_vlan_and_reports_missing_ports() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path(), git_available()).unwrap();

        let mut body = DesiredState::new("br-a");
        body.vlans.insert(
            100,
            VlanIntent {
                untagged: ["1/1/1".to_string(), "1/1/2".to_string()].into_iter().collect(),
                ..Default::default()
            },
        );
        store
            .save_desired_config("br-a", body, ConfigSource::Manual, None, None)
            .unwrap();

        let actual_vlans = vec![
            NormalizedVlan {
                id: 1,
                ..Default::default()
            },
            NormalizedVlan {
                id: 100,
                untagged_ports: ["1/1/1".to_string()].into_iter().collect(),
                ..Default::default()
            },
        ];

        let report = store.calculate_drift("br-a", &actual_vlans, &[]).unwrap();
        assert!(!report.in_sync);
        assert!(report.items.iter().all(|i| i.item_id != "1"));
        assert!(report.items.iter().any(|i| i.details.contains("missing untagged")));
    }

    #[test]
    fn no_desired_config_means_in_sync() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path(), false).unwrap();
        let report = store.calculate_drift("unmanaged", &[], &[]).unwrap();
        assert!(report.in_sync);
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path(), false).unwrap();
        let body = DesiredState::new("br-a");
        store
            .save_desired_config("br-a", body, ConfigSource::Manual, None, None)
            .unwrap();

        let name = store.create_snapshot(Some("snap1".to_string()), None).unwrap();
        store.delete_desired_config("br-a").unwrap();
        assert!(store.get_desired_config("br-a").unwrap().is_none());

        let restored = store.restore_snapshot(&name, None).unwrap();
        assert_eq!(restored, vec!["br-a".to_string()]);
        assert!(store.get_desired_config("br-a").unwrap().is_some());
    }
}
