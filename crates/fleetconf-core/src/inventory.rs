//! Loads the fleet inventory document (§6) from a search path, merges
//! per-device defaults, and resolves `password_env` against the process
//! environment. Constructed once per process and passed by reference; it is
//! never a global.

use crate::device_connection::{DeviceConfig, DeviceType};
use crate::error::FleetConfError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const CONFIG_PATH_ENV: &str = "FLEETCONF_INVENTORY";
const DEFAULT_PASSWORD_ENV: &str = "NETWORK_PASSWORD";

#[derive(Debug, Deserialize)]
struct RawInventory {
    #[serde(default)]
    defaults: serde_yaml::Mapping,
    #[serde(default)]
    devices: BTreeMap<String, serde_yaml::Mapping>,
    #[serde(default)]
    groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    snmp: Option<RawSnmp>,
}

#[derive(Debug, Deserialize)]
struct RawSnmp {
    #[serde(default)]
    communities: BTreeMap<String, Vec<String>>,
}

pub struct DeviceInventory {
    devices: BTreeMap<String, DeviceConfig>,
    groups: BTreeMap<String, Vec<String>>,
    snmp_communities: BTreeMap<String, Vec<String>>,
}

impl DeviceInventory {
    /// Loads from `explicit_path` if given, else `$FLEETCONF_INVENTORY`,
    /// else the first of the default search locations that exists.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, FleetConfError> {
        let path = resolve_path(explicit_path)?;
        let content = std::fs::read_to_string(&path)?;
        let raw: RawInventory = serde_yaml::from_str(&content)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawInventory) -> Result<Self, FleetConfError> {
        let mut devices = BTreeMap::new();
        for (device_id, mut entry) in raw.devices {
            merge_defaults(&mut entry, &raw.defaults);
            let config = parse_device_config(&device_id, &entry)?;
            devices.insert(device_id, config);
        }

        validate_groups(&raw.groups, &devices);

        Ok(Self {
            devices,
            groups: raw.groups,
            snmp_communities: raw.snmp.map(|s| s.communities).unwrap_or_default(),
        })
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub fn get_device(&self, device_id: &str) -> Result<&DeviceConfig, FleetConfError> {
        self.devices
            .get(device_id)
            .ok_or_else(|| FleetConfError::InventoryError(format!("unknown device: {device_id}")))
    }

    pub fn devices_by_type(&self, device_type: DeviceType) -> Vec<&DeviceConfig> {
        self.devices.values().filter(|c| c.device_type == device_type).collect()
    }

    pub fn snmp_community(&self, device_id: &str) -> Option<&str> {
        self.snmp_communities
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == device_id))
            .map(|(community, _)| community.as_str())
    }

    // === Groups ===

    pub fn group_names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn group_members(&self, group_name: &str) -> Result<&[String], FleetConfError> {
        self.groups
            .get(group_name)
            .map(|v| v.as_slice())
            .ok_or_else(|| FleetConfError::InventoryError(format!("unknown group: {group_name}")))
    }

    pub fn devices_in_group(&self, group_name: &str) -> Result<Vec<&DeviceConfig>, FleetConfError> {
        self.group_members(group_name)?
            .iter()
            .map(|id| self.get_device(id))
            .collect()
    }

    pub fn is_device_in_group(&self, device_id: &str, group_name: &str) -> bool {
        self.groups
            .get(group_name)
            .is_some_and(|members| members.iter().any(|m| m == device_id))
    }

    pub fn device_groups(&self, device_id: &str) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m == device_id))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn resolve_path(explicit_path: Option<&Path>) -> Result<PathBuf, FleetConfError> {
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(FleetConfError::InventoryError(format!(
            "inventory file not found at {}",
            path.display()
        )));
    }

    if let Some(env_path) = std::env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
    }

    for candidate in default_search_paths() {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(FleetConfError::InventoryError(
        "could not find devices.yaml; set FLEETCONF_INVENTORY or create ./configs/devices.yaml".to_string(),
    ))
}

fn default_search_paths() -> Vec<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_default();
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    vec![
        cwd.join("configs").join("devices.yaml"),
        cwd.join("devices.yaml"),
        home.join(".config").join("fleetconf").join("devices.yaml"),
        PathBuf::from("/etc/fleetconf/devices.yaml"),
    ]
}

fn merge_defaults(entry: &mut serde_yaml::Mapping, defaults: &serde_yaml::Mapping) {
    for (key, value) in defaults.iter() {
        if !entry.contains_key(key) {
            entry.insert(key.clone(), value.clone());
        }
    }
}

fn validate_groups(groups: &BTreeMap<String, Vec<String>>, devices: &BTreeMap<String, DeviceConfig>) {
    for (group_name, members) in groups {
        for device_id in members {
            if !devices.contains_key(device_id) {
                warn!(group = group_name, device_id, "group references unknown device");
            }
        }
    }
}

fn parse_device_config(device_id: &str, entry: &serde_yaml::Mapping) -> Result<DeviceConfig, FleetConfError> {
    let get_str = |key: &str| -> Option<String> {
        entry
            .get(&serde_yaml::Value::String(key.to_string()))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    let get_u64 = |key: &str| -> Option<u64> {
        entry
            .get(&serde_yaml::Value::String(key.to_string()))
            .and_then(|v| v.as_u64())
    };
    let get_bool = |key: &str| -> Option<bool> {
        entry
            .get(&serde_yaml::Value::String(key.to_string()))
            .and_then(|v| v.as_bool())
    };

    let type_str = get_str("type")
        .ok_or_else(|| FleetConfError::InventoryError(format!("device {device_id}: missing 'type'")))?;
    let device_type = DeviceType::from_str(&type_str)
        .map_err(|e| FleetConfError::InventoryError(format!("device {device_id}: {e}")))?;

    let host = get_str("host")
        .ok_or_else(|| FleetConfError::InventoryError(format!("device {device_id}: missing 'host'")))?;
    let username = get_str("username")
        .ok_or_else(|| FleetConfError::InventoryError(format!("device {device_id}: missing 'username'")))?;
    let port = get_u64("port")
        .ok_or_else(|| FleetConfError::InventoryError(format!("device {device_id}: missing 'port'")))? as u16;

    let password_env = get_str("password_env").unwrap_or_else(|| DEFAULT_PASSWORD_ENV.to_string());
    let password = get_str("password").or_else(|| std::env::var(&password_env).ok());

    let timeout = Duration::from_secs(get_u64("timeout").unwrap_or(30));
    let retries = get_u64("retries").unwrap_or(3) as u32;
    let retry_delay = Duration::from_secs(get_u64("retry_delay").unwrap_or(2));
    let enable_password_required = get_bool("enable_password_required").unwrap_or(false);
    let use_scp_workflow = get_bool("use_scp_workflow").unwrap_or(false);

    let mut config_paths = BTreeMap::new();
    if let Some(serde_yaml::Value::Mapping(paths)) = entry.get(&serde_yaml::Value::String("config_paths".to_string())) {
        for (key, value) in paths.iter() {
            if let (Some(k), Some(v)) = (key.as_str(), value.as_str()) {
                config_paths.insert(k.to_string(), v.to_string());
            }
        }
    }

    Ok(DeviceConfig {
        device_id: device_id.to_string(),
        device_type,
        host,
        port,
        username,
        password,
        secret: None,
        timeout,
        retries,
        retry_delay,
        enable_password_required,
        use_scp_workflow,
        config_paths,
        session_log: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawInventory {
        serde_yaml::from_str(
            r#"
defaults:
  username: admin
  port: 22
devices:
  br-a:
    type: brocade
    host: 10.0.0.1
    port: 23
  onti-1:
    type: onti
    host: 10.0.0.2
groups:
  switches:
    - br-a
  ghosts:
    - nope
"#,
        )
        .unwrap()
    }

    #[test]
    fn merges_defaults_into_devices_missing_the_key() {
        let inv = DeviceInventory::from_raw(sample()).unwrap();
        let onti = inv.get_device("onti-1").unwrap();
        assert_eq!(onti.username, "admin");
        assert_eq!(onti.port, 22);

        let brocade = inv.get_device("br-a").unwrap();
        assert_eq!(brocade.port, 23);
    }

    #[test]
    fn resolves_password_env_at_load_time() {
        std::env::set_var("NETWORK_PASSWORD", "s3cret");
        let inv = DeviceInventory::from_raw(sample()).unwrap();
        let brocade = inv.get_device("br-a").unwrap();
        assert_eq!(brocade.password.as_deref(), Some("s3cret"));
        std::env::remove_var("NETWORK_PASSWORD");
    }

    #[test]
    fn unknown_device_lookup_is_an_error() {
        let inv = DeviceInventory::from_raw(sample()).unwrap();
        assert!(inv.get_device("missing").is_err());
    }

    #[test]
    fn group_membership_queries() {
        let inv = DeviceInventory::from_raw(sample()).unwrap();
        assert!(inv.is_device_in_group("br-a", "switches"));
        assert!(!inv.is_device_in_group("onti-1", "switches"));
        assert_eq!(inv.devices_in_group("switches").unwrap().len(), 1);
        assert!(inv.group_members("nonexistent").is_err());
    }
}
