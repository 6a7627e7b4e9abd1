//! Pre-flight invariants over a [`DesiredState`]: catches logical errors
//! before any device is contacted.

use crate::device_connection::DeviceType;
use crate::model::{DesiredState, DesiredStateMode, PortSpeed, VlanAction, PROTECTED_VLANS, RESERVED_VLANS};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};

lazy_static! {
    static ref BROCADE_PORT_PATTERN: Regex = Regex::new(r"^\d+/\d+/\d+$").unwrap();
    static ref OPENWRT_PORT_PATTERN: Regex = Regex::new(r"^lan\d+$").unwrap();
    static ref ZYXEL_PORT_PATTERN: Regex = Regex::new(r"^\d+$").unwrap();
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validates `desired` against the invariants in §4.5. `device_type` is
/// optional: when known, port names are checked against that vendor's
/// pattern; when unknown, any pattern from the union is accepted.
pub fn validate(desired: &DesiredState, device_type: Option<DeviceType>) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    validate_mode(desired, &mut errors);
    validate_vlans(desired, device_type, &mut errors, &mut warnings);
    validate_ports(desired, device_type, &mut errors);
    check_port_conflicts(desired, &mut errors);
    check_change_size(desired, &mut warnings);

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn validate_mode(desired: &DesiredState, errors: &mut Vec<String>) {
    if desired.mode == DesiredStateMode::Full {
        errors.push("mode 'full' is not yet supported; only 'patch' semantics are implemented".to_string());
    }
}

fn valid_port_name(port: &str, device_type: Option<DeviceType>) -> bool {
    if port.is_empty() {
        return false;
    }
    match device_type {
        Some(DeviceType::Brocade) => BROCADE_PORT_PATTERN.is_match(port),
        Some(DeviceType::OpenWrt) => OPENWRT_PORT_PATTERN.is_match(port),
        Some(DeviceType::Onti) | Some(DeviceType::Zyxel) | Some(DeviceType::ZyxelCli) => {
            ZYXEL_PORT_PATTERN.is_match(port)
        }
        None => {
            BROCADE_PORT_PATTERN.is_match(port)
                || OPENWRT_PORT_PATTERN.is_match(port)
                || ZYXEL_PORT_PATTERN.is_match(port)
        }
    }
}

fn validate_vlans(
    desired: &DesiredState,
    device_type: Option<DeviceType>,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    for (&vlan_id, vlan) in &desired.vlans {
        if !(1..=4094).contains(&vlan_id) {
            errors.push(format!("invalid VLAN id {vlan_id}: must be between 1 and 4094"));
            continue;
        }
        if RESERVED_VLANS.contains(&vlan_id) {
            errors.push(format!("VLAN {vlan_id} is reserved"));
            continue;
        }
        if PROTECTED_VLANS.contains(&vlan_id) && vlan.action == VlanAction::Absent {
            errors.push(format!("cannot delete VLAN {vlan_id}: protected default VLAN"));
        }
        if vlan.action == VlanAction::Ensure && vlan.untagged.is_empty() && vlan.tagged.is_empty() {
            warnings.push(format!("VLAN {vlan_id} has no ports assigned"));
        }
        for port in vlan.untagged.iter().chain(vlan.tagged.iter()) {
            if !valid_port_name(port, device_type) {
                errors.push(format!("invalid port name '{port}' in VLAN {vlan_id}"));
            }
        }
    }
}

fn validate_ports(desired: &DesiredState, device_type: Option<DeviceType>, errors: &mut Vec<String>) {
    for (port_name, port) in &desired.ports {
        if !valid_port_name(port_name, device_type) {
            errors.push(format!("invalid port name: {port_name}"));
        }
        if port.speed.is_some() {
            // PortSpeed is already a closed enum over {auto, 100M, 1G, 10G};
            // an unrecognized string fails to deserialize upstream in the
            // parser, so no further check is needed here. The comparison
            // below documents the invariant for readers expecting one.
            let _: Option<PortSpeed> = port.speed;
        }
    }
}

fn check_port_conflicts(desired: &DesiredState, errors: &mut Vec<String>) {
    let mut untagged_assignments: HashMap<&str, u16> = HashMap::new();

    for (&vlan_id, vlan) in &desired.vlans {
        if vlan.action == VlanAction::Absent {
            continue;
        }
        for port in &vlan.untagged {
            if let Some(&existing) = untagged_assignments.get(port.as_str()) {
                errors.push(format!(
                    "port {port} assigned untagged to both VLAN {existing} and VLAN {vlan_id}"
                ));
            } else {
                untagged_assignments.insert(port.as_str(), vlan_id);
            }
        }
    }

    for (&vlan_id, vlan) in &desired.vlans {
        if vlan.action == VlanAction::Absent {
            continue;
        }
        let overlap: HashSet<&String> = vlan.untagged.intersection(&vlan.tagged).collect();
        if !overlap.is_empty() {
            let mut ports: Vec<&str> = overlap.into_iter().map(String::as_str).collect();
            ports.sort_unstable();
            errors.push(format!(
                "port(s) {} in VLAN {vlan_id} cannot be both tagged and untagged",
                ports.join(", ")
            ));
        }
    }
}

fn check_change_size(desired: &DesiredState, warnings: &mut Vec<String>) {
    let total_items = desired.vlans.len() + desired.ports.len();
    if total_items > 20 {
        warnings.push(format!("large change set ({total_items} items) - consider staging"));
    }

    let total_ports: usize = desired
        .vlans
        .values()
        .map(|v| v.untagged.len() + v.tagged.len())
        .sum();
    if total_ports > 50 {
        warnings.push(format!("many port changes ({total_ports} ports) - verify before applying"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VlanIntent;

    fn vlan(action: VlanAction, untagged: &[&str], tagged: &[&str]) -> VlanIntent {
        VlanIntent {
            action,
            name: None,
            untagged: untagged.iter().map(|s| s.to_string()).collect(),
            tagged: tagged.iter().map(|s| s.to_string()).collect(),
            ip: None,
        }
    }

    #[test]
    fn rejects_protected_vlan_deletion() {
        let mut desired = DesiredState::new("br-a");
        desired.vlans.insert(1, vlan(VlanAction::Absent, &[], &[]));
        let result = validate(&desired, Some(DeviceType::Brocade));
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("protected")));
    }

    #[test]
    fn rejects_reserved_vlan_id() {
        let mut desired = DesiredState::new("br-a");
        desired.vlans.insert(4095, vlan(VlanAction::Ensure, &["1/1/1"], &[]));
        let result = validate(&desired, Some(DeviceType::Brocade));
        assert!(!result.valid);
    }

    #[test]
    fn detects_duplicate_untagged_assignment() {
        let mut desired = DesiredState::new("br-a");
        desired.vlans.insert(100, vlan(VlanAction::Ensure, &["1/1/1"], &[]));
        desired.vlans.insert(200, vlan(VlanAction::Ensure, &["1/1/1"], &[]));
        let result = validate(&desired, Some(DeviceType::Brocade));
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("1/1/1")));
    }

    #[test]
    fn detects_tagged_untagged_overlap_in_same_vlan() {
        let mut desired = DesiredState::new("br-a");
        desired
            .vlans
            .insert(100, vlan(VlanAction::Ensure, &["1/1/1"], &["1/1/1"]));
        let result = validate(&desired, Some(DeviceType::Brocade));
        assert!(!result.valid);
    }

    #[test]
    fn empty_ensure_vlan_is_warning_only() {
        let mut desired = DesiredState::new("br-a");
        desired.vlans.insert(100, vlan(VlanAction::Ensure, &[], &[]));
        let result = validate(&desired, Some(DeviceType::Brocade));
        assert!(result.valid);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn full_mode_is_rejected() {
        let mut desired = DesiredState::new("br-a");
        desired.mode = DesiredStateMode::Full;
        let result = validate(&desired, None);
        assert!(!result.valid);
    }

    #[test]
    fn unknown_device_type_accepts_union_of_patterns() {
        let mut desired = DesiredState::new("onti-1");
        desired.vlans.insert(100, vlan(VlanAction::Ensure, &["lan1"], &[]));
        let result = validate(&desired, None);
        assert!(result.valid);
    }

    #[test]
    fn onti_accepts_bare_numeric_ports() {
        let mut desired = DesiredState::new("onti-1");
        desired
            .vlans
            .insert(100, vlan(VlanAction::Ensure, &["0", "1"], &["2"]));
        let result = validate(&desired, Some(DeviceType::Onti));
        assert!(result.valid, "{:?}", result.errors);
    }
}
