//! Computes the minimal change set between a [`DesiredState`] and the live
//! VLANs/ports read off a connected device.

use crate::model::{
    ChangeType, DesiredState, DiffResult, NormalizedPort, NormalizedVlan, PortChange, VlanAction,
    VlanChange, VlanIntent,
};
use std::collections::{BTreeMap, BTreeSet};

/// Diffs `desired` against the already-fetched live VLANs and ports of a
/// device. Live VLANs not mentioned in `desired` are ignored (patch
/// semantics); `desired.mode` is assumed already validated as `Patch`.
pub fn calculate(desired: &DesiredState, live_vlans: &[NormalizedVlan], live_ports: &[NormalizedPort]) -> DiffResult {
    let live_vlan_map: BTreeMap<u16, &NormalizedVlan> = live_vlans.iter().map(|v| (v.id, v)).collect();
    let live_port_map: BTreeMap<&str, &NormalizedPort> =
        live_ports.iter().map(|p| (p.id.as_str(), p)).collect();

    let mut result = DiffResult::default();

    for (&vlan_id, desired_vlan) in &desired.vlans {
        if let Some(change) = diff_vlan(vlan_id, desired_vlan, live_vlan_map.get(&vlan_id).copied()) {
            result.vlan_changes.push(change);
        }
    }

    for (port_id, desired_port) in &desired.ports {
        if let Some(change) = diff_port(port_id, desired_port, live_port_map.get(port_id.as_str()).copied()) {
            result.port_changes.push(change);
        }
    }

    result
}

fn diff_vlan(vlan_id: u16, desired: &VlanIntent, live: Option<&NormalizedVlan>) -> Option<VlanChange> {
    if desired.action == VlanAction::Absent {
        return live.map(|current| VlanChange {
            name: current.name.clone(),
            ..VlanChange::new(vlan_id, ChangeType::Delete)
        });
    }

    let Some(current) = live else {
        return Some(VlanChange {
            name: desired.name.clone(),
            add_untagged: desired.untagged.clone(),
            add_tagged: desired.tagged.clone(),
            ..VlanChange::new(vlan_id, ChangeType::Create)
        });
    };

    let add_untagged: BTreeSet<String> = desired.untagged.difference(&current.untagged_ports).cloned().collect();
    let remove_untagged: BTreeSet<String> = current.untagged_ports.difference(&desired.untagged).cloned().collect();
    let add_tagged: BTreeSet<String> = desired.tagged.difference(&current.tagged_ports).cloned().collect();
    let remove_tagged: BTreeSet<String> = current.tagged_ports.difference(&desired.tagged).cloned().collect();

    let name_changed = desired
        .name
        .as_ref()
        .is_some_and(|n| current.name.as_deref() != Some(n.as_str()));

    let mut change = VlanChange::new(vlan_id, ChangeType::Modify);
    change.name = desired.name.clone();
    change.add_untagged = add_untagged;
    change.remove_untagged = remove_untagged;
    change.add_tagged = add_tagged;
    change.remove_tagged = remove_tagged;

    let has_changes = !change.add_untagged.is_empty()
        || !change.remove_untagged.is_empty()
        || !change.add_tagged.is_empty()
        || !change.remove_tagged.is_empty()
        || name_changed;

    has_changes.then_some(change)
}

fn diff_port(port_id: &str, desired: &crate::model::PortIntent, live: Option<&NormalizedPort>) -> Option<PortChange> {
    let mut change = PortChange {
        port_id: port_id.to_string(),
        ..Default::default()
    };

    if let Some(desired_enabled) = desired.enabled {
        let live_enabled = live.and_then(|p| p.enabled).unwrap_or(true);
        if desired_enabled != live_enabled {
            change.enabled = Some(desired_enabled);
        }
    }
    if let Some(ref desired_desc) = desired.description {
        let live_desc = live.and_then(|p| p.description.clone()).unwrap_or_default();
        if *desired_desc != live_desc {
            change.description = Some(desired_desc.clone());
        }
    }
    if let Some(desired_speed) = desired.speed {
        let live_speed = live.and_then(|p| p.speed);
        if Some(desired_speed) != live_speed {
            change.speed = Some(desired_speed);
        }
    }
    if let Some(desired_duplex) = desired.duplex {
        let live_duplex = live.and_then(|p| p.duplex);
        if Some(desired_duplex) != live_duplex {
            change.duplex = Some(desired_duplex);
        }
    }
    if let Some(desired_mode) = desired.mode {
        let live_mode = live.and_then(|p| p.mode);
        if Some(desired_mode) != live_mode {
            change.mode = Some(desired_mode);
        }
    }
    if let Some(desired_native) = desired.native_vlan {
        let live_native = live.and_then(|p| p.native_vlan);
        if Some(desired_native) != live_native {
            change.native_vlan = Some(desired_native);
        }
    }
    if let Some(ref desired_allowed) = desired.allowed_vlans {
        let live_allowed = live.and_then(|p| p.allowed_vlans.clone());
        if live_allowed.as_ref() != Some(desired_allowed) {
            change.allowed_vlans = Some(desired_allowed.clone());
        }
    }

    (!change.is_empty()).then_some(change)
}

/// Human-readable lines describing a diff, used by dry-run output and audit
/// `changes_made` lists.
pub fn summarize(diff: &DiffResult) -> Vec<String> {
    let mut lines = Vec::new();

    for change in &diff.vlan_changes {
        match change.change_type {
            Some(ChangeType::Create) => {
                lines.push(format!("create VLAN {}", change.vlan_id));
                if let Some(name) = &change.name {
                    lines.push(format!("  name: {name}"));
                }
                if !change.add_untagged.is_empty() {
                    lines.push(format!("  untagged: {}", join(&change.add_untagged)));
                }
                if !change.add_tagged.is_empty() {
                    lines.push(format!("  tagged: {}", join(&change.add_tagged)));
                }
            }
            Some(ChangeType::Delete) => {
                lines.push(format!("delete VLAN {}", change.vlan_id));
            }
            Some(ChangeType::Modify) => {
                lines.push(format!("modify VLAN {}", change.vlan_id));
                if !change.remove_untagged.is_empty() {
                    lines.push(format!("  remove untagged: {}", join(&change.remove_untagged)));
                }
                if !change.remove_tagged.is_empty() {
                    lines.push(format!("  remove tagged: {}", join(&change.remove_tagged)));
                }
                if !change.add_untagged.is_empty() {
                    lines.push(format!("  add untagged: {}", join(&change.add_untagged)));
                }
                if !change.add_tagged.is_empty() {
                    lines.push(format!("  add tagged: {}", join(&change.add_tagged)));
                }
            }
            Some(ChangeType::NoChange) | None => {}
        }
    }

    for change in &diff.port_changes {
        lines.push(format!("configure port {}", change.port_id));
        if let Some(enabled) = change.enabled {
            lines.push(format!("  enabled: {enabled}"));
        }
        if let Some(desc) = &change.description {
            lines.push(format!("  description: {desc}"));
        }
    }

    lines
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PortIntent, VlanIntent};

    fn make_desired(vlan_id: u16, action: VlanAction, untagged: &[&str]) -> DesiredState {
        let mut desired = DesiredState::new("br-a");
        desired.vlans.insert(
            vlan_id,
            VlanIntent {
                action,
                name: Some("Prod".into()),
                untagged: untagged.iter().map(|s| s.to_string()).collect(),
                tagged: BTreeSet::new(),
                ip: None,
            },
        );
        desired
    }

    #[test]
    fn create_when_live_absent() {
        let desired = make_desired(100, VlanAction::Ensure, &["1/1/1", "1/1/2"]);
        let diff = calculate(&desired, &[], &[]);
        assert_eq!(diff.vlan_changes.len(), 1);
        assert_eq!(diff.vlan_changes[0].change_type, Some(ChangeType::Create));
    }

    #[test]
    fn empty_diff_when_matching() {
        let desired = make_desired(100, VlanAction::Ensure, &["1/1/1"]);
        let live = vec![NormalizedVlan {
            id: 100,
            name: Some("Prod".into()),
            untagged_ports: ["1/1/1".to_string()].into_iter().collect(),
            tagged_ports: BTreeSet::new(),
            ip_interface: None,
        }];
        let diff = calculate(&desired, &live, &[]);
        assert!(diff.is_empty());
    }

    #[test]
    fn remove_before_add_is_representable() {
        let desired = make_desired(100, VlanAction::Ensure, &["1/1/3", "1/1/4"]);
        let live = vec![NormalizedVlan {
            id: 100,
            name: Some("Prod".into()),
            untagged_ports: ["1/1/1".to_string(), "1/1/2".to_string()].into_iter().collect(),
            tagged_ports: BTreeSet::new(),
            ip_interface: None,
        }];
        let diff = calculate(&desired, &live, &[]);
        let change = &diff.vlan_changes[0];
        assert_eq!(change.change_type, Some(ChangeType::Modify));
        assert!(change.remove_untagged.contains("1/1/1"));
        assert!(change.add_untagged.contains("1/1/3"));
    }

    #[test]
    fn delete_emitted_only_when_live_present() {
        let desired = make_desired(1, VlanAction::Absent, &[]);
        let diff_absent_live = calculate(&desired, &[], &[]);
        assert!(diff_absent_live.is_empty());

        let live = vec![NormalizedVlan {
            id: 1,
            ..Default::default()
        }];
        let diff_present_live = calculate(&desired, &live, &[]);
        assert_eq!(diff_present_live.vlan_changes.len(), 1);
        assert_eq!(diff_present_live.vlan_changes[0].change_type, Some(ChangeType::Delete));
    }

    #[test]
    fn port_change_suppressed_when_no_field_differs() {
        let mut desired = DesiredState::new("br-a");
        desired.ports.insert(
            "1/1/1".into(),
            PortIntent {
                enabled: Some(true),
                ..Default::default()
            },
        );
        let live = vec![NormalizedPort {
            id: "1/1/1".into(),
            enabled: Some(true),
            ..Default::default()
        }];
        let diff = calculate(&desired, &[], &live);
        assert!(diff.port_changes.is_empty());
    }
}
