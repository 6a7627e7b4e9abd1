//! End-to-end scenarios over parse -> validate -> diff -> generate, plus a
//! save/history/restore round trip through the configuration store.

use fleetconf_core::device_connection::DeviceType;
use fleetconf_core::model::{
    ConfigSource, DesiredState, NormalizedPort, NormalizedVlan, PortMode, VlanAction, VlanIntent,
};
use fleetconf_core::{diff, generator, parser, validator};
use serde_json::json;
use std::collections::BTreeSet;

fn untagged_vlan(desired_untagged: &[&str]) -> VlanIntent {
    VlanIntent {
        action: VlanAction::Ensure,
        name: Some("Prod".to_string()),
        untagged: desired_untagged.iter().map(|s| s.to_string()).collect(),
        tagged: BTreeSet::new(),
        ip: None,
    }
}

#[test]
fn scenario_1_create_and_populate() {
    let doc = json!({
        "device_id": "br-a",
        "vlans": {
            "100": {"action": "ensure", "name": "Prod", "untagged_ports": "1/1/1-4"}
        }
    });
    let desired = parser::parse(&doc).unwrap();
    let validation = validator::validate(&desired, Some(DeviceType::Brocade));
    assert!(validation.valid, "{:?}", validation.errors);

    let changes = diff::calculate(&desired, &[], &[]);
    let plan = generator::generate(DeviceType::Brocade, &changes, true);

    assert_eq!(plan.main_commands.first().unwrap(), "vlan 100 name Prod by port");
    assert!(plan.main_commands.contains(&"untagged ethe 1/1/1 to 1/1/4".to_string()));
    assert_eq!(plan.main_commands.last().unwrap(), "exit");
    assert_eq!(plan.post_commands, vec!["write memory".to_string()]);
    assert_eq!(plan.rollback_commands.first().unwrap(), "no vlan 100");
}

#[test]
fn scenario_2_cross_module_union_never_combines_modules() {
    let mut desired = DesiredState {
        device_id: "br-a".to_string(),
        schema_version: 1,
        checksum: None,
        mode: fleetconf_core::model::DesiredStateMode::Patch,
        vlans: Default::default(),
        ports: Default::default(),
        settings: Default::default(),
    };
    desired.vlans.insert(
        100,
        untagged_vlan(&["1/1/1", "1/1/2", "1/2/1", "1/2/2"]),
    );

    let changes = diff::calculate(&desired, &[], &[]);
    let plan = generator::generate(DeviceType::Brocade, &changes, false);

    assert!(plan.main_commands.contains(&"untagged ethe 1/1/1 to 1/1/2".to_string()));
    assert!(plan.main_commands.contains(&"untagged ethe 1/2/1 to 1/2/2".to_string()));
    assert!(!plan.main_commands.iter().any(|c| c.contains("1/1/1 to 1/2/2")));
}

#[test]
fn scenario_3_safe_modify_orders_removal_before_addition() {
    let mut desired = DesiredState {
        device_id: "br-a".to_string(),
        schema_version: 1,
        checksum: None,
        mode: fleetconf_core::model::DesiredStateMode::Patch,
        vlans: Default::default(),
        ports: Default::default(),
        settings: Default::default(),
    };
    desired.vlans.insert(100, untagged_vlan(&["1/1/3", "1/1/4"]));

    let live_vlan = NormalizedVlan {
        id: 100,
        name: Some("Prod".to_string()),
        tagged_ports: BTreeSet::new(),
        untagged_ports: BTreeSet::from(["1/1/1".to_string(), "1/1/2".to_string()]),
        ip_interface: None,
    };

    let changes = diff::calculate(&desired, std::slice::from_ref(&live_vlan), &[]);
    let plan = generator::generate(DeviceType::Brocade, &changes, false);

    let remove_idx = plan
        .main_commands
        .iter()
        .position(|c| c == "no untagged ethe 1/1/1 to 1/1/2")
        .expect("removal command present");
    let add_idx = plan
        .main_commands
        .iter()
        .position(|c| c == "untagged ethe 1/1/3 to 1/1/4")
        .expect("addition command present");
    assert!(remove_idx < add_idx);
}

#[test]
fn scenario_4_protected_delete_is_rejected_before_any_device_contact() {
    let mut desired = DesiredState {
        device_id: "br-a".to_string(),
        schema_version: 1,
        checksum: None,
        mode: fleetconf_core::model::DesiredStateMode::Patch,
        vlans: Default::default(),
        ports: Default::default(),
        settings: Default::default(),
    };
    desired.vlans.insert(
        1,
        VlanIntent {
            action: VlanAction::Absent,
            name: None,
            untagged: BTreeSet::new(),
            tagged: BTreeSet::new(),
            ip: None,
        },
    );

    let validation = validator::validate(&desired, Some(DeviceType::Brocade));
    assert!(!validation.valid);
    assert!(validation.errors.iter().any(|e| e.to_lowercase().contains("default") || e.to_lowercase().contains("protect")));
}

#[test]
fn scenario_5_port_conflict_across_vlans_is_rejected() {
    let mut desired = DesiredState {
        device_id: "br-a".to_string(),
        schema_version: 1,
        checksum: None,
        mode: fleetconf_core::model::DesiredStateMode::Patch,
        vlans: Default::default(),
        ports: Default::default(),
        settings: Default::default(),
    };
    desired.vlans.insert(100, untagged_vlan(&["1/1/1"]));
    desired.vlans.insert(200, untagged_vlan(&["1/1/1"]));

    let validation = validator::validate(&desired, Some(DeviceType::Brocade));
    assert!(!validation.valid);
    assert!(validation.errors.iter().any(|e| e.contains("1/1/1")));
}

#[test]
fn scenario_6_drift_and_history() {
    let tmp = tempfile::tempdir().unwrap();
    let store = fleetconf_core::store::ConfigStore::new(tmp.path(), true).unwrap();

    let mut v1 = DesiredState {
        device_id: "br-a".to_string(),
        schema_version: 1,
        checksum: None,
        mode: fleetconf_core::model::DesiredStateMode::Patch,
        vlans: Default::default(),
        ports: Default::default(),
        settings: Default::default(),
    };
    v1.vlans.insert(100, untagged_vlan(&["1/1/1"]));
    store
        .save_desired_config("br-a", v1.clone(), ConfigSource::Manual, None, None)
        .unwrap();

    let mut v2 = v1.clone();
    v2.vlans.insert(200, untagged_vlan(&["1/1/2"]));
    store
        .save_desired_config("br-a", v2, ConfigSource::Manual, None, None)
        .unwrap();

    let history = store.get_config_history(Some("br-a"), 10).unwrap();
    assert!(history.len() >= 2);

    let at_head_minus_1 = store
        .get_config_at_revision("br-a", "HEAD~1")
        .unwrap()
        .expect("revision exists");
    assert_eq!(at_head_minus_1.body.vlans.len(), 1);

    let restored = store
        .restore_config_from_revision("br-a", "HEAD~1")
        .unwrap()
        .expect("restore produced a config");
    assert_eq!(restored.meta.version, 3);
    assert_eq!(restored.body.vlans.len(), 1);
}

#[test]
fn idempotent_reapply_yields_empty_diff_and_plan() {
    let mut desired = DesiredState {
        device_id: "br-a".to_string(),
        schema_version: 1,
        checksum: None,
        mode: fleetconf_core::model::DesiredStateMode::Patch,
        vlans: Default::default(),
        ports: Default::default(),
        settings: Default::default(),
    };
    desired.vlans.insert(100, untagged_vlan(&["1/1/1", "1/1/2"]));

    let live_vlan = NormalizedVlan {
        id: 100,
        name: Some("Prod".to_string()),
        tagged_ports: BTreeSet::new(),
        untagged_ports: BTreeSet::from(["1/1/1".to_string(), "1/1/2".to_string()]),
        ip_interface: None,
    };

    let changes = diff::calculate(&desired, std::slice::from_ref(&live_vlan), &[]);
    assert!(changes.is_empty());

    let plan = generator::generate(DeviceType::Brocade, &changes, true);
    assert!(plan.is_empty());
}

#[test]
fn port_range_token_expands_to_exact_count() {
    let doc = json!({
        "device_id": "br-a",
        "vlans": {"100": {"untagged_ports": "1/1/5-9"}}
    });
    let desired = parser::parse(&doc).unwrap();
    assert_eq!(desired.vlans.get(&100).unwrap().untagged.len(), 5);
}

#[test]
fn normalized_port_round_trips_through_yaml() {
    let port = NormalizedPort {
        id: "1/1/1".to_string(),
        enabled: Some(true),
        description: Some("uplink".to_string()),
        mode: Some(PortMode::Trunk),
        native_vlan: Some(1),
        allowed_vlans: Some(vec![1, 100]),
        speed: None,
        duplex: None,
    };
    let yaml = serde_yaml::to_string(&port).unwrap();
    let back: NormalizedPort = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(back.id, port.id);
    assert_eq!(back.allowed_vlans, port.allowed_vlans);
}
