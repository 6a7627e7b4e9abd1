//! Typed data model for desired state, live state, diffs, plans and stored
//! configuration. Everything past the parser boundary is one of these types;
//! no untyped map is passed between the validator, diff engine, generator,
//! executor or store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const RESERVED_VLANS: [u16; 2] = [0, 4095];
pub const PROTECTED_VLANS: [u16; 1] = [1];
pub const DEFAULT_VLAN: u16 = 1;

/// Optional IP interface bound to a VLAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInterface {
    pub address: String,
    pub mask: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortSpeed {
    Auto,
    #[serde(rename = "100M")]
    Speed100M,
    #[serde(rename = "1G")]
    Speed1G,
    #[serde(rename = "10G")]
    Speed10G,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Duplex {
    Full,
    Half,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortMode {
    Access,
    Trunk,
    Hybrid,
}

/// A VLAN as read from or written to a device, already mapped onto the
/// normalized `unit/module/position`-style port identifiers that driver
/// uses internally. Port identifiers are opaque strings at this layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedVlan {
    pub id: u16,
    pub name: Option<String>,
    pub tagged_ports: BTreeSet<String>,
    pub untagged_ports: BTreeSet<String>,
    pub ip_interface: Option<IpInterface>,
}

/// A port as read from or written to a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPort {
    pub id: String,
    pub enabled: Option<bool>,
    pub speed: Option<PortSpeed>,
    pub duplex: Option<Duplex>,
    pub description: Option<String>,
    pub mode: Option<PortMode>,
    pub native_vlan: Option<u16>,
    pub allowed_vlans: Option<Vec<u16>>,
}

impl NormalizedPort {
    /// Cross-device reporting name only; never used for diffing.
    pub fn canonical_name(&self) -> String {
        self.id.replace('/', "-")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VlanAction {
    Ensure,
    Absent,
}

impl Default for VlanAction {
    fn default() -> Self {
        VlanAction::Ensure
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredStateMode {
    Full,
    Patch,
}

impl Default for DesiredStateMode {
    fn default() -> Self {
        DesiredStateMode::Patch
    }
}

/// The typed intent for a single VLAN entry in a desired-state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanIntent {
    #[serde(default)]
    pub action: VlanAction,
    pub name: Option<String>,
    #[serde(default)]
    pub untagged: BTreeSet<String>,
    #[serde(default)]
    pub tagged: BTreeSet<String>,
    pub ip: Option<IpInterface>,
}

/// The typed intent for a single port entry in a desired-state document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortIntent {
    pub enabled: Option<bool>,
    pub speed: Option<PortSpeed>,
    pub duplex: Option<Duplex>,
    pub description: Option<String>,
    pub mode: Option<PortMode>,
    pub native_vlan: Option<u16>,
    pub allowed_vlans: Option<Vec<u16>>,
}

/// The fully typed desired-state document, as produced by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredState {
    pub device_id: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub checksum: Option<String>,
    #[serde(default)]
    pub mode: DesiredStateMode,
    #[serde(default)]
    pub vlans: BTreeMap<u16, VlanIntent>,
    #[serde(default)]
    pub ports: BTreeMap<String, PortIntent>,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

fn default_schema_version() -> u32 {
    1
}

impl DesiredState {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            schema_version: 1,
            checksum: None,
            mode: DesiredStateMode::Patch,
            vlans: BTreeMap::new(),
            ports: BTreeMap::new(),
            settings: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
    NoChange,
}

/// A single VLAN-level change between desired and live state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VlanChange {
    pub vlan_id: u16,
    pub change_type: Option<ChangeType>,
    pub name: Option<String>,
    pub add_untagged: BTreeSet<String>,
    pub remove_untagged: BTreeSet<String>,
    pub add_tagged: BTreeSet<String>,
    pub remove_tagged: BTreeSet<String>,
}

impl VlanChange {
    pub fn new(vlan_id: u16, change_type: ChangeType) -> Self {
        Self {
            vlan_id,
            change_type: Some(change_type),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.add_untagged.is_empty()
            && self.remove_untagged.is_empty()
            && self.add_tagged.is_empty()
            && self.remove_tagged.is_empty()
    }
}

/// A single port-level change between desired and live state; only fields
/// that actually differ are populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortChange {
    pub port_id: String,
    pub enabled: Option<bool>,
    pub speed: Option<PortSpeed>,
    pub duplex: Option<Duplex>,
    pub description: Option<String>,
    pub mode: Option<PortMode>,
    pub native_vlan: Option<u16>,
    pub allowed_vlans: Option<Vec<u16>>,
}

impl PortChange {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_none()
            && self.speed.is_none()
            && self.duplex.is_none()
            && self.description.is_none()
            && self.mode.is_none()
            && self.native_vlan.is_none()
            && self.allowed_vlans.is_none()
    }
}

/// The minimal change set derived from (desired, live). Introduces no
/// ordering guarantee beyond the iteration order of its inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffResult {
    pub vlan_changes: Vec<VlanChange>,
    pub port_changes: Vec<PortChange>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.vlan_changes.is_empty() && self.port_changes.is_empty()
    }
}

/// An ordered, phased sequence of device commands derived from a diff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandPlan {
    pub pre_commands: Vec<String>,
    pub main_commands: Vec<String>,
    pub post_commands: Vec<String>,
    pub rollback_commands: Vec<String>,
}

impl CommandPlan {
    pub fn is_empty(&self) -> bool {
        self.pre_commands.is_empty()
            && self.main_commands.is_empty()
            && self.post_commands.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    Manual,
    AutoSave,
    Profile,
    Sync,
    Restore,
}

/// Metadata header written alongside a persisted desired-state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConfigMeta {
    pub device_id: String,
    pub version: u64,
    pub checksum: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
    pub source: ConfigSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConfig {
    #[serde(flatten)]
    pub meta: StoredConfigMeta,
    pub body: DesiredState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftCategory {
    Vlan,
    Port,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftType {
    Missing,
    Extra,
    Modified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftItem {
    pub category: DriftCategory,
    pub item_id: String,
    pub drift_type: DriftType,
    pub expected: serde_json::Value,
    pub actual: serde_json::Value,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub device_id: String,
    pub checked_at: DateTime<Utc>,
    pub in_sync: bool,
    pub items: Vec<DriftItem>,
}

impl DriftReport {
    pub fn drift_count(&self) -> usize {
        self.items.len()
    }
}

/// Options controlling a single executor run.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub dry_run: bool,
    pub stop_on_error: bool,
    pub rollback_on_error: bool,
    pub audit_context: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub success: bool,
    pub dry_run: bool,
    pub changes_made: Vec<String>,
    pub commands_executed: Vec<String>,
    pub error: Option<String>,
    pub error_context: Option<String>,
    pub recovery_attempts: Vec<String>,
    pub rollback_performed: bool,
    pub requires_human_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub operation: String,
    pub context: Option<String>,
    pub user: Option<String>,
    pub success: bool,
    pub changes: Vec<String>,
    pub error: Option<String>,
    pub config_checksum: Option<String>,
}

/// A cached dump of a device's actual live state, used for quick drift
/// checks without re-contacting the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastKnownState {
    pub device_id: String,
    pub fetched_at: DateTime<Utc>,
    pub vlans: BTreeMap<u16, NormalizedVlan>,
    pub ports: BTreeMap<String, NormalizedPort>,
}
