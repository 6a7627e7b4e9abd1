//! OpenWrt/ONTI driver (§4.4): both vendors run UCI on OpenWrt, so one
//! driver covers them, branching on `device_type()` wherever the VLAN model
//! actually differs — DSA bridge-vlan sections for plain OpenWrt, legacy
//! `switch_vlan` sections for ONTI. ONTI additionally prefers an SCP
//! download/edit/upload workflow over granular UCI commands, selected by
//! `use_scp_workflow` in the inventory entry.

use crate::device_connection::{DeviceConfig, DeviceType, NetworkDevice};
use crate::error::FleetConfError;
use crate::model::{NormalizedPort, NormalizedVlan};
use crate::retry::{with_retry, RetryPolicy};
use lazy_static::lazy_static;
use regex::Regex;
use ssh2::Session;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use tracing::{debug, info, warn};

lazy_static! {
    static ref UCI_VLAN_KV: Regex = Regex::new(r"network\.(\S+)\.(\w+)='?([^']*)'?").unwrap();
    static ref SWITCH_VLAN_SECTION: Regex = Regex::new(r"network\.(\S+)\.vlan").unwrap();
}

pub struct OpenWrtDevice {
    config: DeviceConfig,
    session: Option<Session>,
    system_info: BTreeMap<String, String>,
    ports: Vec<String>,
    bridge: String,
    vlan_filtering: i32,
}

impl OpenWrtDevice {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            session: None,
            system_info: BTreeMap::new(),
            ports: Vec::new(),
            bridge: "switch".to_string(),
            vlan_filtering: -1,
        }
    }

    fn is_onti(&self) -> bool {
        self.config.device_type == DeviceType::Onti
    }

    fn session_mut(&mut self) -> Result<&mut Session, FleetConfError> {
        self.session
            .as_mut()
            .ok_or_else(|| FleetConfError::ConnectionError("not connected".into()))
    }

    /// Runs a single non-interactive command over a fresh SSH channel and
    /// returns `(exit_status == 0, combined stdout+stderr)`, mirroring
    /// paramiko's `exec_command` semantics.
    fn exec_raw(&mut self, command: &str) -> Result<(bool, String), FleetConfError> {
        let session = self.session_mut()?;
        let mut channel = session.channel_session()?;
        channel.exec(command)?;

        let mut out = String::new();
        let mut err = String::new();
        channel.read_to_string(&mut out).ok();
        channel.stderr().read_to_string(&mut err).ok();
        channel.wait_close()?;
        let status = channel.exit_status()?;

        if status != 0 {
            Ok((false, format!("{}\n{}", out, err).trim().to_string()))
        } else {
            Ok((true, out.trim().to_string()))
        }
    }

    fn cache_system_info(&mut self) -> Result<(), FleetConfError> {
        if let Ok((true, out)) = self.exec_raw("ls -1 /sys/class/net/ | grep -E '^lan[0-9]+$'") {
            self.ports = out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect();
        }

        if let Ok((true, out)) = self.exec_raw(
            "uci -q get network.switch.type 2>/dev/null && echo 'switch' || \
             ls /sys/class/net/br-lan/bridge 2>/dev/null && echo 'br-lan' || echo 'switch'",
        ) {
            self.bridge = out.lines().last().unwrap_or("switch").to_string();
        }

        if let Ok((true, out)) = self.exec_raw(&format!(
            "cat /sys/class/net/{}/bridge/vlan_filtering 2>/dev/null || echo '-1'",
            self.bridge
        )) {
            self.vlan_filtering = out.trim().parse().unwrap_or(-1);
        }
        Ok(())
    }

    fn uci_set(&mut self, key: &str, value: &str) -> Result<(), FleetConfError> {
        let escaped = value.replace('\'', "'\\''");
        self.execute(&format!("uci set {key}='{escaped}'")).map(|_| ())
    }

    fn uci_commit(&mut self, config: &str) -> Result<(), FleetConfError> {
        self.execute(&format!("uci commit {config}")).map(|_| ())
    }

    fn config_remote_path(&self, name: &str) -> String {
        self.config
            .config_paths
            .get(name)
            .cloned()
            .unwrap_or_else(|| format!("/etc/config/{name}"))
    }
}

impl NetworkDevice for OpenWrtDevice {
    fn connect(&mut self) -> Result<(), FleetConfError> {
        let host = self.config.host.clone();
        let port = self.config.port;
        let username = self.config.username.clone();
        let password = self.config.password.clone();
        let timeout = self.config.timeout;

        with_retry(RetryPolicy::connect(), "openwrt connect", || {
            info!(device_id = %self.config.device_id, %host, "connecting to openwrt/onti device");
            let addr = format!("{host}:{port}");
            let tcp = TcpStream::connect(&addr).map_err(|e| FleetConfError::connection_failed(&addr, e))?;
            tcp.set_read_timeout(Some(timeout)).ok();
            tcp.set_write_timeout(Some(timeout)).ok();

            let mut session = Session::new()?;
            session.set_tcp_stream(tcp);
            session.handshake()?;
            session
                .userauth_password(&username, password.as_deref().unwrap_or(""))
                .map_err(|e| FleetConfError::authentication_failed(&username, e.to_string()))?;
            session.set_keepalive(true, 60);

            self.session = Some(session);
            Ok(())
        })?;

        if !self.is_onti() {
            self.cache_system_info()?;
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), FleetConfError> {
        self.session = None;
        self.system_info.clear();
        Ok(())
    }

    fn health_check(&mut self) -> Result<bool, FleetConfError> {
        self.execute("uptime").map(|_| true)
    }

    fn execute(&mut self, command: &str) -> Result<String, FleetConfError> {
        with_retry(RetryPolicy::command(), "openwrt execute", || {
            let (ok, output) = self.exec_raw(command)?;
            if !ok {
                return Err(FleetConfError::protocol(command, output));
            }
            Ok(output)
        })
    }

    fn get_vlans(&mut self) -> Result<Vec<NormalizedVlan>, FleetConfError> {
        if self.is_onti() {
            return self.get_vlans_onti();
        }
        self.get_vlans_dsa()
    }

    fn get_ports(&mut self) -> Result<Vec<NormalizedPort>, FleetConfError> {
        if self.is_onti() {
            return self.get_ports_onti();
        }
        self.get_ports_dsa()
    }

    fn create_vlan(&mut self, vlan: &NormalizedVlan) -> Result<(), FleetConfError> {
        if self.is_onti() {
            return self.create_vlan_onti(vlan);
        }
        self.create_vlan_dsa(vlan)
    }

    fn delete_vlan(&mut self, vlan_id: u16) -> Result<(), FleetConfError> {
        if self.is_onti() {
            return self.delete_vlan_onti(vlan_id);
        }
        self.delete_vlan_dsa(vlan_id)
    }

    fn configure_port(&mut self, port: &NormalizedPort) -> Result<(), FleetConfError> {
        if self.is_onti() {
            return Err(FleetConfError::UnsupportedOperation(
                "port configuration is not implemented for ONTI switches".into(),
            ));
        }

        if port.enabled == Some(false) {
            self.execute(&format!("ip link set {} down", port.id))?;
        } else {
            self.execute(&format!("ip link set {} up", port.id))?;
        }

        if let Some(description) = &port.description {
            self.uci_set(&format!("network.{}.description", port.id), description)?;
            self.uci_commit("network")?;
        }
        Ok(())
    }

    fn save_config(&mut self) -> Result<(), FleetConfError> {
        self.execute("uci commit").map(|_| ())
    }

    fn get_config_file(&mut self, remote_name: &str) -> Result<Vec<u8>, FleetConfError> {
        if !self.config.use_scp_workflow {
            return Err(FleetConfError::UnsupportedOperation(
                "this device is not configured for the SCP config workflow".into(),
            ));
        }
        let remote_path = self.config_remote_path(remote_name);
        let session = self.session_mut()?;
        let (mut remote_file, _) = session.scp_recv(std::path::Path::new(&remote_path))?;
        let mut contents = Vec::new();
        remote_file.read_to_end(&mut contents)?;
        debug!(remote_path, bytes = contents.len(), "downloaded config file via scp");
        Ok(contents)
    }

    fn put_config_file(&mut self, remote_name: &str, contents: &[u8]) -> Result<(), FleetConfError> {
        if !self.config.use_scp_workflow {
            return Err(FleetConfError::UnsupportedOperation(
                "this device is not configured for the SCP config workflow".into(),
            ));
        }
        let remote_path = self.config_remote_path(remote_name);
        let session = self.session_mut()?;
        let mut remote_file = session.scp_send(std::path::Path::new(&remote_path), 0o644, contents.len() as u64, None)?;
        remote_file.write_all(contents)?;
        remote_file.send_eof()?;
        remote_file.wait_eof()?;
        remote_file.close()?;
        remote_file.wait_close()?;
        info!(remote_path, bytes = contents.len(), "uploaded config file via scp");
        Ok(())
    }

    fn reload_config(&mut self) -> Result<(), FleetConfError> {
        self.execute("/etc/init.d/network reload 2>&1").map(|_| ())
    }

    fn device_id(&self) -> &str {
        &self.config.device_id
    }

    fn device_type(&self) -> DeviceType {
        self.config.device_type
    }

    fn supports_scp_workflow(&self) -> bool {
        self.config.use_scp_workflow
    }
}

// === DSA bridge-vlan flavor (plain OpenWrt) ===

impl OpenWrtDevice {
    fn get_vlans_dsa(&mut self) -> Result<Vec<NormalizedVlan>, FleetConfError> {
        let mut vlans: BTreeMap<u16, NormalizedVlan> = BTreeMap::new();
        let (ok, output) = self.exec_raw("uci show network | grep -E 'bridge-vlan|vlan'")?;

        if ok {
            let mut section = String::new();
            let mut ports_spec = String::new();
            let mut current_id: Option<u16> = None;

            for line in output.lines() {
                let Some(caps) = UCI_VLAN_KV.captures(line) else { continue };
                let (sect, key, value) = (caps[1].to_string(), caps[2].to_string(), caps[3].to_string());
                if key == "vlan" {
                    if let Some(id) = current_id.take() {
                        vlans.insert(id, dsa_section_to_vlan(id, &section, &ports_spec));
                    }
                    current_id = value.parse().ok();
                    section = sect;
                    ports_spec.clear();
                } else if key == "ports" {
                    ports_spec = value;
                }
            }
            if let Some(id) = current_id {
                vlans.insert(id, dsa_section_to_vlan(id, &section, &ports_spec));
            }
        }

        // Strategy 2: tagged sub-interfaces (lan1.100 style), merging in any VLAN
        // not already discovered via bridge-vlan sections.
        let (ok, output) = self.exec_raw("ls -1 /sys/class/net/ | grep -E '\\.[0-9]+$'")?;
        if ok {
            for iface in output.lines().filter(|l| !l.is_empty()) {
                let Some((base, vid)) = iface.rsplit_once('.') else { continue };
                let Ok(vlan_id) = vid.parse::<u16>() else { continue };
                vlans.entry(vlan_id).or_insert_with(|| NormalizedVlan {
                    id: vlan_id,
                    name: Some(format!("VLAN{vlan_id}")),
                    tagged_ports: std::collections::BTreeSet::from([base.to_string()]),
                    untagged_ports: std::collections::BTreeSet::new(),
                    ip_interface: None,
                });
            }
        }

        if vlans.is_empty() {
            vlans.insert(
                1,
                NormalizedVlan {
                    id: 1,
                    name: Some("default".to_string()),
                    untagged_ports: self.ports.iter().cloned().collect(),
                    ..Default::default()
                },
            );
        }

        Ok(vlans.into_values().collect())
    }

    fn get_ports_dsa(&mut self) -> Result<Vec<NormalizedPort>, FleetConfError> {
        let names = if self.ports.is_empty() {
            let (ok, out) = self.exec_raw("ls -1 /sys/class/net/ | grep -E '^lan[0-9]+$'")?;
            if ok {
                out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect()
            } else {
                Vec::new()
            }
        } else {
            self.ports.clone()
        };

        let mut ports = Vec::with_capacity(names.len());
        for name in names {
            let enabled = self
                .exec_raw(&format!("cat /sys/class/net/{name}/operstate"))
                .map(|(ok, out)| ok && out.trim() == "up")
                .unwrap_or(false);
            let description = self
                .exec_raw(&format!("uci get network.{name}.description 2>/dev/null"))
                .map(|(ok, out)| if ok { Some(out.trim().to_string()) } else { None })
                .unwrap_or(None);

            ports.push(NormalizedPort {
                id: name,
                enabled: Some(enabled),
                description,
                ..Default::default()
            });
        }
        Ok(ports)
    }

    fn create_vlan_dsa(&mut self, vlan: &NormalizedVlan) -> Result<(), FleetConfError> {
        if vlan.id == 0 || vlan.id > 4094 {
            return Err(FleetConfError::protocol(
                "vlan create",
                format!("invalid VLAN ID {} - must be between 1 and 4094", vlan.id),
            ));
        }

        let bridge = self.bridge.clone();
        let section = format!("vlan{}", vlan.id);

        if self.vlan_filtering == 0 {
            info!(bridge = %bridge, "enabling vlan filtering on bridge");
            self.uci_set(&format!("network.{bridge}.vlan_filtering"), "1")?;
        }

        self.uci_set(&format!("network.{section}"), "bridge-vlan")?;
        self.uci_set(&format!("network.{section}.device"), &bridge)?;
        self.uci_set(&format!("network.{section}.vlan"), &vlan.id.to_string())?;

        let mut ports_spec: Vec<String> = vlan.tagged_ports.iter().map(|p| format!("{p}:t")).collect();
        ports_spec.extend(vlan.untagged_ports.iter().map(|p| format!("{p}:u*")));
        self.uci_set(&format!("network.{section}.ports"), &ports_spec.join(" "))?;

        self.uci_commit("network")?;
        if self.vlan_filtering == 0 {
            self.vlan_filtering = 1;
        }

        if let Err(e) = self.execute("/etc/init.d/network reload 2>&1") {
            warn!(error = %e, "network reload after vlan create failed, uci change is committed");
        }
        Ok(())
    }

    fn delete_vlan_dsa(&mut self, vlan_id: u16) -> Result<(), FleetConfError> {
        if vlan_id == 1 {
            return Err(FleetConfError::protocol("vlan delete", "cannot delete default VLAN 1"));
        }
        let mut section = format!("vlan{vlan_id}");
        let (found, _) = self.exec_raw(&format!("uci get network.{section} 2>/dev/null"))?;
        if !found {
            let (ok, out) = self.exec_raw(&format!(
                "uci show network | grep -E \"\\.vlan='?{vlan_id}'?\" | head -1"
            ))?;
            if !ok || out.is_empty() {
                return Err(FleetConfError::protocol("vlan delete", format!("VLAN {vlan_id} not found")));
            }
            section = SWITCH_VLAN_SECTION
                .captures(&out)
                .map(|c| c[1].to_string())
                .ok_or_else(|| FleetConfError::protocol("vlan delete", format!("VLAN {vlan_id} not found")))?;
        }

        self.execute(&format!("uci delete network.{section}"))?;
        self.uci_commit("network")?;
        if let Err(e) = self.execute("/etc/init.d/network reload 2>&1") {
            warn!(error = %e, "network reload after vlan delete failed, uci change is committed");
        }
        Ok(())
    }
}

fn dsa_section_to_vlan(id: u16, section: &str, ports_spec: &str) -> NormalizedVlan {
    let mut tagged = std::collections::BTreeSet::new();
    let mut untagged = std::collections::BTreeSet::new();
    for spec in ports_spec.split_whitespace() {
        if let Some(port) = spec.strip_suffix(":t") {
            tagged.insert(port.to_string());
        } else if !spec.is_empty() {
            untagged.insert(spec.trim_end_matches(":u*").to_string());
        }
    }
    NormalizedVlan {
        id,
        name: Some(section.to_string()),
        tagged_ports: tagged,
        untagged_ports: untagged,
        ip_interface: None,
    }
}

// === switch_vlan flavor (ONTI) ===

impl OpenWrtDevice {
    fn get_vlans_onti(&mut self) -> Result<Vec<NormalizedVlan>, FleetConfError> {
        let (ok, output) = self.exec_raw("uci show network")?;
        if !ok {
            return Ok(Vec::new());
        }

        let mut vlans = Vec::new();
        let mut current: BTreeMap<String, String> = BTreeMap::new();

        for line in output.lines() {
            if !line.contains("switch_vlan") {
                continue;
            }
            let Some(caps) = UCI_VLAN_KV.captures(line) else { continue };
            let (key, value) = (caps[2].to_string(), caps[3].to_string());
            if key == "vlan" {
                if !current.is_empty() {
                    vlans.push(switch_vlan_dict_to_vlan(&current));
                }
                current = BTreeMap::new();
                current.insert("vlan".to_string(), value);
            } else {
                current.insert(key, value);
            }
        }
        if !current.is_empty() {
            vlans.push(switch_vlan_dict_to_vlan(&current));
        }
        Ok(vlans)
    }

    fn get_ports_onti(&mut self) -> Result<Vec<NormalizedPort>, FleetConfError> {
        let (ok, output) = self.exec_raw("swconfig dev switch0 show")?;
        if !ok {
            return Ok(Vec::new());
        }
        lazy_static! {
            static ref PORT_NUM: Regex = Regex::new(r"Port (\d+):").unwrap();
        }
        let mut ports = Vec::new();
        for line in output.lines() {
            if !line.to_lowercase().contains("link:") {
                continue;
            }
            if let Some(caps) = PORT_NUM.captures(line) {
                ports.push(NormalizedPort {
                    id: format!("port{}", &caps[1]),
                    enabled: Some(line.to_lowercase().contains("up")),
                    ..Default::default()
                });
            }
        }
        Ok(ports)
    }

    fn create_vlan_onti(&mut self, vlan: &NormalizedVlan) -> Result<(), FleetConfError> {
        self.execute("uci add network switch_vlan")?;
        self.uci_set("network.@switch_vlan[-1].device", "switch0")?;
        self.uci_set("network.@switch_vlan[-1].vlan", &vlan.id.to_string())?;

        let mut ports: Vec<String> = vlan.untagged_ports.iter().cloned().collect();
        ports.extend(vlan.tagged_ports.iter().map(|p| format!("{p}t")));
        if !ports.is_empty() {
            self.uci_set("network.@switch_vlan[-1].ports", &ports.join(" "))?;
        }
        self.uci_commit("network")
    }

    fn delete_vlan_onti(&mut self, vlan_id: u16) -> Result<(), FleetConfError> {
        let (ok, output) = self.exec_raw("uci show network | grep switch_vlan")?;
        if !ok {
            return Err(FleetConfError::protocol("vlan delete", "failed to list VLANs"));
        }

        for line in output.lines() {
            if line.contains(&format!(".vlan='{vlan_id}'")) || line.contains(&format!(".vlan={vlan_id}")) {
                if let Some(caps) = SWITCH_VLAN_SECTION.captures(line) {
                    let section = caps[1].to_string();
                    self.execute(&format!("uci delete network.{section}"))?;
                    self.uci_commit("network")?;
                    return Ok(());
                }
            }
        }
        Err(FleetConfError::protocol("vlan delete", format!("VLAN {vlan_id} not found")))
    }
}

fn switch_vlan_dict_to_vlan(d: &BTreeMap<String, String>) -> NormalizedVlan {
    let id: u16 = d.get("vlan").and_then(|v| v.parse().ok()).unwrap_or(0);
    let ports_str = d.get("ports").cloned().unwrap_or_default();
    let mut tagged = std::collections::BTreeSet::new();
    let mut untagged = std::collections::BTreeSet::new();
    for p in ports_str.split_whitespace() {
        if let Some(base) = p.strip_suffix('t') {
            tagged.insert(base.to_string());
        } else {
            untagged.insert(p.to_string());
        }
    }
    NormalizedVlan {
        id,
        name: d.get("description").cloned().or_else(|| Some(format!("VLAN{id}"))),
        tagged_ports: tagged,
        untagged_ports: untagged,
        ip_interface: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsa_section_parses_tagged_and_untagged_ports() {
        let vlan = dsa_section_to_vlan(100, "vlan100", "lan1:t lan2:u*");
        assert!(vlan.tagged_ports.contains("lan1"));
        assert!(vlan.untagged_ports.contains("lan2"));
    }

    #[test]
    fn switch_vlan_dict_parses_trailing_t_suffix() {
        let mut d = BTreeMap::new();
        d.insert("vlan".to_string(), "254".to_string());
        d.insert("ports".to_string(), "0 1 2t 3t".to_string());
        let vlan = switch_vlan_dict_to_vlan(&d);
        assert_eq!(vlan.id, 254);
        assert!(vlan.tagged_ports.contains("2"));
        assert!(vlan.untagged_ports.contains("0"));
    }
}
