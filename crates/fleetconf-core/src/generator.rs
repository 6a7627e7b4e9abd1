//! Turns a [`DiffResult`] into a four-phase [`CommandPlan`] in the target
//! device's command dialect. This is the one place per-vendor branching on
//! [`DeviceType`] is sanctioned (§9).

use crate::device_connection::DeviceType;
use crate::model::{ChangeType, CommandPlan, DiffResult, PortSpeed, VlanChange};
use std::collections::BTreeMap;

/// Generates the command plan for `diff` in `device_type`'s dialect.
/// `save_config` controls whether the post-phase save directive is emitted.
pub fn generate(device_type: DeviceType, diff: &DiffResult, save_config: bool) -> CommandPlan {
    match device_type {
        DeviceType::Brocade => generate_brocade(diff, save_config),
        DeviceType::Onti | DeviceType::OpenWrt => generate_openwrt(diff, save_config),
        DeviceType::ZyxelCli => generate_zyxel_cli(diff, save_config),
        DeviceType::Zyxel => generate_zyxel_web(diff),
    }
}

/// Partitions ports by `(unit, module)`, sorts within each partition, and
/// collapses consecutive runs into `start to end` tokens. One command is
/// returned per `(unit, module)` pair; a single command never spans modules.
fn group_ports_by_module(ports: &std::collections::BTreeSet<String>) -> Vec<String> {
    if ports.is_empty() {
        return Vec::new();
    }

    let mut parsed: Vec<(u32, u32, u32, &str)> = Vec::new();
    for p in ports {
        let parts: Vec<&str> = p.split('/').collect();
        if parts.len() == 3 {
            if let (Ok(unit), Ok(module), Ok(pos)) =
                (parts[0].parse(), parts[1].parse(), parts[2].parse())
            {
                parsed.push((unit, module, pos, p.as_str()));
                continue;
            }
        }
        parsed.push((0, 0, 0, p.as_str()));
    }
    parsed.sort();

    let mut module_groups: BTreeMap<(u32, u32), Vec<(u32, &str)>> = BTreeMap::new();
    for (unit, module, pos, port_str) in parsed {
        module_groups.entry((unit, module)).or_default().push((pos, port_str));
    }

    let mut result = Vec::new();
    for ((_unit, _module), port_list) in module_groups {
        let mut ranges = Vec::new();
        let mut i = 0;
        while i < port_list.len() {
            let (start_num, start_str) = port_list[i];
            let mut end_str = start_str;
            let mut j = i + 1;
            while j < port_list.len() {
                let (next_num, next_str) = port_list[j];
                let (prev_num, _) = port_list[j - 1];
                if next_num == prev_num + 1 {
                    end_str = next_str;
                    j += 1;
                } else {
                    break;
                }
            }
            let _ = start_num;
            ranges.push(format!("{start_str} to {end_str}"));
            i = j;
        }
        result.push(ranges.join(" "));
    }
    result
}

// ---------------------------------------------------------------- Brocade

fn generate_brocade(diff: &DiffResult, save_config: bool) -> CommandPlan {
    let mut plan = CommandPlan::default();

    for change in &diff.vlan_changes {
        if change.change_type == Some(ChangeType::Modify) {
            for port in &change.remove_tagged {
                plan.pre_commands.push(format!("interface ethe {port}"));
                plan.pre_commands.push("no dual-mode".to_string());
                plan.pre_commands.push("exit".to_string());
            }
        }
    }

    for change in &diff.vlan_changes {
        plan.main_commands.extend(brocade_vlan_commands(change));
    }
    for change in &diff.port_changes {
        plan.main_commands.extend(brocade_port_commands(change));
    }

    if save_config && !plan.main_commands.is_empty() {
        plan.post_commands.push("write memory".to_string());
    }

    plan.rollback_commands = brocade_rollback(diff);
    plan
}

fn brocade_vlan_commands(change: &VlanChange) -> Vec<String> {
    let mut commands = Vec::new();
    match change.change_type {
        Some(ChangeType::Create) => {
            let name = change.name.clone().unwrap_or_else(|| format!("VLAN{}", change.vlan_id));
            commands.push(format!("vlan {} name {} by port", change.vlan_id, name));
            for spec in group_ports_by_module(&change.add_untagged) {
                commands.push(format!("untagged ethe {spec}"));
            }
            for spec in group_ports_by_module(&change.add_tagged) {
                commands.push(format!("tagged ethe {spec}"));
            }
            commands.push("exit".to_string());
        }
        Some(ChangeType::Delete) => {
            commands.push(format!("no vlan {}", change.vlan_id));
        }
        Some(ChangeType::Modify) => {
            commands.push(format!("vlan {}", change.vlan_id));
            for spec in group_ports_by_module(&change.remove_untagged) {
                commands.push(format!("no untagged ethe {spec}"));
            }
            for spec in group_ports_by_module(&change.remove_tagged) {
                commands.push(format!("no tagged ethe {spec}"));
            }
            for spec in group_ports_by_module(&change.add_untagged) {
                commands.push(format!("untagged ethe {spec}"));
            }
            for spec in group_ports_by_module(&change.add_tagged) {
                commands.push(format!("tagged ethe {spec}"));
            }
            commands.push("exit".to_string());
        }
        Some(ChangeType::NoChange) | None => {}
    }
    commands
}

fn brocade_speed_command(speed: PortSpeed) -> &'static str {
    match speed {
        PortSpeed::Auto => "speed-duplex auto",
        PortSpeed::Speed10G => "speed-duplex 10g-full",
        PortSpeed::Speed1G => "speed-duplex 1000-full",
        PortSpeed::Speed100M => "speed-duplex 100-full",
    }
}

fn brocade_port_commands(change: &crate::model::PortChange) -> Vec<String> {
    let mut commands = vec![format!("interface ethe {}", change.port_id)];
    if let Some(enabled) = change.enabled {
        commands.push(if enabled { "enable".to_string() } else { "disable".to_string() });
    }
    if let Some(desc) = &change.description {
        commands.push(format!("port-name \"{desc}\""));
    }
    if let Some(speed) = change.speed {
        commands.push(brocade_speed_command(speed).to_string());
    }
    commands.push("exit".to_string());
    commands
}

fn brocade_rollback(diff: &DiffResult) -> Vec<String> {
    let mut commands = Vec::new();
    for change in diff.vlan_changes.iter().rev() {
        match change.change_type {
            Some(ChangeType::Create) => commands.push(format!("no vlan {}", change.vlan_id)),
            Some(ChangeType::Delete) => {
                commands.push(format!("! cannot rollback VLAN {} deletion: prior membership unknown", change.vlan_id));
            }
            Some(ChangeType::Modify) => {
                commands.push(format!("vlan {}", change.vlan_id));
                for spec in group_ports_by_module(&change.add_untagged) {
                    commands.push(format!("no untagged ethe {spec}"));
                }
                for spec in group_ports_by_module(&change.add_tagged) {
                    commands.push(format!("no tagged ethe {spec}"));
                }
                for spec in group_ports_by_module(&change.remove_untagged) {
                    commands.push(format!("untagged ethe {spec}"));
                }
                for spec in group_ports_by_module(&change.remove_tagged) {
                    commands.push(format!("tagged ethe {spec}"));
                }
                commands.push("exit".to_string());
            }
            Some(ChangeType::NoChange) | None => {}
        }
    }
    commands
}

// ---------------------------------------------------------------- OpenWrt / ONTI

/// UCI idiom section name for a VLAN: `vlan<id>`, matching the shape the
/// source sketched but never implemented (`network.vlan100=bridge-vlan`).
fn uci_section(vlan_id: u16) -> String {
    format!("vlan{vlan_id}")
}

fn uci_port_token(port: &str, tagged: bool, pvid: bool) -> String {
    if tagged {
        format!("{port}:t")
    } else if pvid {
        format!("{port}:u*")
    } else {
        format!("{port}:u")
    }
}

fn generate_openwrt(diff: &DiffResult, save_config: bool) -> CommandPlan {
    let mut plan = CommandPlan::default();

    for change in &diff.vlan_changes {
        let section = uci_section(change.vlan_id);
        match change.change_type {
            Some(ChangeType::Create) => {
                plan.main_commands.push(format!("uci set network.{section}=bridge-vlan"));
                plan.main_commands.push(format!("uci set network.{section}.vlan='{}'", change.vlan_id));
                for port in &change.add_untagged {
                    plan.main_commands
                        .push(format!("uci add_list network.{section}.ports='{}'", uci_port_token(port, false, true)));
                }
                for port in &change.add_tagged {
                    plan.main_commands
                        .push(format!("uci add_list network.{section}.ports='{}'", uci_port_token(port, true, false)));
                }
            }
            Some(ChangeType::Delete) => {
                plan.main_commands.push(format!("uci delete network.{section}"));
            }
            Some(ChangeType::Modify) => {
                for port in &change.remove_untagged {
                    plan.main_commands
                        .push(format!("uci del_list network.{section}.ports='{}'", uci_port_token(port, false, true)));
                }
                for port in &change.remove_tagged {
                    plan.main_commands
                        .push(format!("uci del_list network.{section}.ports='{}'", uci_port_token(port, true, false)));
                }
                for port in &change.add_untagged {
                    plan.main_commands
                        .push(format!("uci add_list network.{section}.ports='{}'", uci_port_token(port, false, true)));
                }
                for port in &change.add_tagged {
                    plan.main_commands
                        .push(format!("uci add_list network.{section}.ports='{}'", uci_port_token(port, true, false)));
                }
            }
            Some(ChangeType::NoChange) | None => {}
        }
    }

    if !plan.main_commands.is_empty() {
        plan.main_commands.push("uci commit network".to_string());
    }

    if save_config && !plan.main_commands.is_empty() {
        plan.post_commands.push("/etc/init.d/network reload".to_string());
    }

    for change in diff.vlan_changes.iter().rev() {
        let section = uci_section(change.vlan_id);
        match change.change_type {
            Some(ChangeType::Create) => plan.rollback_commands.push(format!("uci delete network.{section}")),
            Some(ChangeType::Delete) => plan
                .rollback_commands
                .push(format!("! cannot rollback VLAN {} deletion: prior membership unknown", change.vlan_id)),
            Some(ChangeType::Modify) => {
                for port in &change.add_untagged {
                    plan.rollback_commands
                        .push(format!("uci del_list network.{section}.ports='{}'", uci_port_token(port, false, true)));
                }
                for port in &change.add_tagged {
                    plan.rollback_commands
                        .push(format!("uci del_list network.{section}.ports='{}'", uci_port_token(port, true, false)));
                }
                for port in &change.remove_untagged {
                    plan.rollback_commands
                        .push(format!("uci add_list network.{section}.ports='{}'", uci_port_token(port, false, true)));
                }
                for port in &change.remove_tagged {
                    plan.rollback_commands
                        .push(format!("uci add_list network.{section}.ports='{}'", uci_port_token(port, true, false)));
                }
            }
            Some(ChangeType::NoChange) | None => {}
        }
    }
    if !plan.rollback_commands.is_empty() {
        plan.rollback_commands.push("uci commit network".to_string());
    }

    plan
}

// ---------------------------------------------------------------- Zyxel CLI

fn generate_zyxel_cli(diff: &DiffResult, save_config: bool) -> CommandPlan {
    let mut plan = CommandPlan::default();

    for change in &diff.vlan_changes {
        match change.change_type {
            Some(ChangeType::Create) => {
                plan.main_commands.push(format!("vlan {}", change.vlan_id));
                if let Some(name) = &change.name {
                    plan.main_commands.push(format!("name {name}"));
                }
                for port in &change.add_untagged {
                    plan.main_commands.push(format!("untagged {port}"));
                }
                for port in &change.add_tagged {
                    plan.main_commands.push(format!("tagged {port}"));
                }
                plan.main_commands.push("exit".to_string());
            }
            Some(ChangeType::Delete) => {
                plan.main_commands.push(format!("no vlan {}", change.vlan_id));
            }
            Some(ChangeType::Modify) => {
                plan.main_commands.push(format!("vlan {}", change.vlan_id));
                for port in &change.remove_untagged {
                    plan.main_commands.push(format!("no untagged {port}"));
                }
                for port in &change.remove_tagged {
                    plan.main_commands.push(format!("no tagged {port}"));
                }
                for port in &change.add_untagged {
                    plan.main_commands.push(format!("untagged {port}"));
                }
                for port in &change.add_tagged {
                    plan.main_commands.push(format!("tagged {port}"));
                }
                plan.main_commands.push("exit".to_string());
            }
            Some(ChangeType::NoChange) | None => {}
        }
    }

    if save_config && !plan.main_commands.is_empty() {
        plan.post_commands.push("copy running-config startup-config".to_string());
    }

    for change in diff.vlan_changes.iter().rev() {
        match change.change_type {
            Some(ChangeType::Create) => plan.rollback_commands.push(format!("no vlan {}", change.vlan_id)),
            Some(ChangeType::Delete) => plan
                .rollback_commands
                .push(format!("! cannot rollback VLAN {} deletion: prior membership unknown", change.vlan_id)),
            Some(ChangeType::Modify) => {
                plan.rollback_commands.push(format!("vlan {}", change.vlan_id));
                for port in &change.add_untagged {
                    plan.rollback_commands.push(format!("no untagged {port}"));
                }
                for port in &change.add_tagged {
                    plan.rollback_commands.push(format!("no tagged {port}"));
                }
                for port in &change.remove_untagged {
                    plan.rollback_commands.push(format!("untagged {port}"));
                }
                for port in &change.remove_tagged {
                    plan.rollback_commands.push(format!("tagged {port}"));
                }
                plan.rollback_commands.push("exit".to_string());
            }
            Some(ChangeType::NoChange) | None => {}
        }
    }

    plan
}

// ---------------------------------------------------------------- Zyxel legacy web

/// The legacy web driver has no command-line "commands" at all; each entry
/// here is a human-readable description of one field being set through a
/// form POST, so dry-run and audit output stay uniform across vendors.
fn generate_zyxel_web(diff: &DiffResult) -> CommandPlan {
    let mut plan = CommandPlan::default();

    for change in &diff.vlan_changes {
        match change.change_type {
            Some(ChangeType::Create) => {
                plan.main_commands
                    .push(format!("web form: create VLAN {} ({})", change.vlan_id, change.name.clone().unwrap_or_default()));
                if !change.add_untagged.is_empty() {
                    plan.main_commands
                        .push(format!("web form: set untagged members of VLAN {}: {}", change.vlan_id, join(&change.add_untagged)));
                }
            }
            Some(ChangeType::Delete) => {
                plan.main_commands.push(format!("web form: delete VLAN {}", change.vlan_id));
            }
            Some(ChangeType::Modify) => {
                if !change.remove_untagged.is_empty() || !change.add_untagged.is_empty() {
                    plan.main_commands.push(format!(
                        "web form: update untagged membership of VLAN {} (remove {}, add {})",
                        change.vlan_id,
                        join(&change.remove_untagged),
                        join(&change.add_untagged)
                    ));
                }
            }
            Some(ChangeType::NoChange) | None => {}
        }
    }

    for change in &diff.port_changes {
        if let Some(desc) = &change.description {
            plan.main_commands.push(format!("web form: set port {} description to '{desc}'", change.port_id));
        }
        if let Some(enabled) = change.enabled {
            plan.main_commands.push(format!("web form: set port {} state to {}", change.port_id, if enabled { "enabled" } else { "disabled" }));
        }
    }

    plan
}

fn join(set: &std::collections::BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VlanChange;
    use std::collections::BTreeSet;

    fn ports(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn create_and_populate_scenario() {
        let mut change = VlanChange::new(100, ChangeType::Create);
        change.name = Some("Prod".to_string());
        change.add_untagged = ports(&["1/1/1", "1/1/2", "1/1/3", "1/1/4"]);
        let diff = DiffResult {
            vlan_changes: vec![change],
            port_changes: vec![],
        };

        let plan = generate_brocade(&diff, true);
        assert_eq!(plan.main_commands[0], "vlan 100 name Prod by port");
        assert!(plan.main_commands.contains(&"untagged ethe 1/1/1 to 1/1/4".to_string()));
        assert_eq!(plan.main_commands.last().unwrap(), "exit");
        assert_eq!(plan.post_commands, vec!["write memory".to_string()]);
        assert_eq!(plan.rollback_commands[0], "no vlan 100");
    }

    #[test]
    fn cross_module_union_never_combines_modules() {
        let spec = group_ports_by_module(&ports(&["1/1/1", "1/1/2", "1/2/1", "1/2/2"]));
        assert_eq!(spec, vec!["1/1/1 to 1/1/2".to_string(), "1/2/1 to 1/2/2".to_string()]);
    }

    #[test]
    fn modify_removes_before_adds() {
        let mut change = VlanChange::new(100, ChangeType::Modify);
        change.remove_untagged = ports(&["1/1/1", "1/1/2"]);
        change.add_untagged = ports(&["1/1/3", "1/1/4"]);
        let diff = DiffResult {
            vlan_changes: vec![change],
            port_changes: vec![],
        };
        let plan = generate_brocade(&diff, false);
        let remove_idx = plan.main_commands.iter().position(|c| c.starts_with("no untagged")).unwrap();
        let add_idx = plan.main_commands.iter().position(|c| c.starts_with("untagged")).unwrap();
        assert!(remove_idx < add_idx);
    }

    #[test]
    fn openwrt_generator_emits_uci_plan() {
        let mut change = VlanChange::new(100, ChangeType::Create);
        change.add_untagged = ports(&["lan1"]);
        let diff = DiffResult {
            vlan_changes: vec![change],
            port_changes: vec![],
        };
        let plan = generate(DeviceType::OpenWrt, &diff, true);
        assert!(plan.main_commands.iter().any(|c| c.contains("bridge-vlan")));
        assert_eq!(plan.post_commands, vec!["/etc/init.d/network reload".to_string()]);
    }

    #[test]
    fn zyxel_web_generator_produces_opaque_entries() {
        let mut change = VlanChange::new(100, ChangeType::Create);
        change.name = Some("Prod".to_string());
        let diff = DiffResult {
            vlan_changes: vec![change],
            port_changes: vec![],
        };
        let plan = generate(DeviceType::Zyxel, &diff, true);
        assert!(plan.main_commands[0].starts_with("web form:"));
        assert!(plan.post_commands.is_empty());
    }
}
