//! Zyxel GS1900 driver (§4.4): an interactive SSH shell transport plus the
//! `NetworkDevice` implementation that drives it. The GS1900 CLI only
//! accepts commands typed into an interactive shell (no non-interactive
//! exec), so every command goes through the same prompt-synchronized read
//! loop the shell itself would present to a human operator.

use crate::channel::SSHChannel;
use crate::device_connection::{DeviceConfig, DeviceType, NetworkDevice};
use crate::error::FleetConfError;
use crate::model::{NormalizedPort, NormalizedVlan, PortSpeed};
use crate::retry::{with_retry, RetryPolicy};
use crate::vendor_error_patterns::zyxel_cli_find_error;
use lazy_static::lazy_static;
use regex::Regex;
use ssh2::Session;
use std::net::TcpStream;
use std::time::Duration;
use tracing::info;

lazy_static! {
    static ref PROMPT_PATTERN: Regex = Regex::new(r"GS1900[^\r\n#>]*[#>]\s*$").unwrap();
    static ref MORE_PATTERN: Regex = Regex::new(r"--More--").unwrap();
    static ref CURSOR_CONTROL_PATTERN: Regex = Regex::new(r"\x1b\[\??\d+[hl]").unwrap();
    static ref VLAN_ROW: Regex = Regex::new(r"^\s*(\d+)\s*\|").unwrap();
    static ref PORT_HEADER: Regex = Regex::new(r"GigabitEthernet(\d+) is (\w+)").unwrap();
    static ref SPEED_PATTERN: Regex = Regex::new(r"(\d+[MG]?)-speed").unwrap();
    static ref LAG_SUFFIX: Regex = Regex::new(r",?lag\d+-?\d*").unwrap();
}

/// Interactive SSH shell to a GS1900. The session is kept alive for the
/// lifetime of the channel even though it is never read from directly
/// again once the shell channel is open.
struct ZyxelShell {
    #[allow(dead_code)]
    session: Session,
    channel: SSHChannel,
}

impl ZyxelShell {
    fn connect(host: &str, port: u16, username: &str, password: &str, timeout: Duration) -> Result<Self, FleetConfError> {
        let addr = format!("{host}:{port}");
        let tcp = TcpStream::connect(&addr).map_err(|e| FleetConfError::connection_failed(addr, e))?;
        tcp.set_read_timeout(Some(Duration::from_millis(1500))).ok();
        tcp.set_nodelay(true).ok();

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        // The GS1900's OpenSSH 6.2 server doesn't speak rsa-sha2-256/512;
        // restrict the host-key algorithm preference to what it accepts.
        session
            .method_pref(
                ssh2::MethodType::HostKey,
                "ssh-rsa,ssh-dss,ecdsa-sha2-nistp256,ecdsa-sha2-nistp384,ecdsa-sha2-nistp521",
            )
            .ok();
        session.handshake()?;
        session
            .userauth_password(username, password)
            .map_err(|e| FleetConfError::authentication_failed(username, e.to_string()))?;
        if !session.authenticated() {
            return Err(FleetConfError::authentication_failed(username, "ssh authentication rejected"));
        }

        let mut ssh_channel = session.channel_session()?;
        ssh_channel.request_pty("xterm", None, None)?;
        ssh_channel.shell()?;
        session.set_keepalive(true, 60);
        session.set_blocking(true);

        let channel = SSHChannel::new(Some(ssh_channel));
        let mut shell = Self { session, channel };

        std::thread::sleep(Duration::from_millis(500));
        shell.read_until_prompt(timeout)?;
        Ok(shell)
    }

    fn strip_control_sequences(text: &str) -> String {
        let stripped = crate::patterns::ANSI_ESCAPE_PATTERN.replace_all(text, "");
        CURSOR_CONTROL_PATTERN.replace_all(&stripped, "").into_owned()
    }

    fn read_until_prompt(&mut self, timeout: Duration) -> Result<String, FleetConfError> {
        let start = std::time::Instant::now();
        let mut output = String::new();

        loop {
            let elapsed = start.elapsed();
            if elapsed > timeout {
                return Err(FleetConfError::timeout("waiting for GS1900 prompt"));
            }
            let chunk = self.channel.read_buffer(Some(&PROMPT_PATTERN))?;
            if chunk.is_empty() {
                if PROMPT_PATTERN.is_match(&output) {
                    break;
                }
                continue;
            }
            output.push_str(&chunk);

            if MORE_PATTERN.is_match(&output) {
                self.channel.write_channel(" ")?;
                output = MORE_PATTERN.replace_all(&output, "").into_owned();
                std::thread::sleep(Duration::from_millis(300));
                continue;
            }
            if PROMPT_PATTERN.is_match(&output) {
                break;
            }
        }

        Ok(Self::strip_control_sequences(&output))
    }

    fn send_command(&mut self, command: &str, timeout: Duration) -> Result<String, FleetConfError> {
        self.channel.write_channel(command)?;
        self.channel.write_channel("\n")?;
        let output = self.read_until_prompt(timeout)?;

        let mut lines: Vec<&str> = output.split('\n').collect();
        if lines.first().is_some_and(|l| l.contains(command)) {
            lines.remove(0);
        }
        if lines.last().is_some_and(|l| PROMPT_PATTERN.is_match(l)) {
            lines.pop();
        }
        Ok(lines.join("\n").trim().to_string())
    }

    fn close(&mut self) {
        self.channel.close().ok();
    }
}

/// Compresses a sorted list of port numbers into the GS1900's
/// `"1-5,7,10-12"` range syntax.
fn format_port_list(ports: &[u32]) -> String {
    let mut sorted = ports.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut ranges = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let start = sorted[i];
        let mut end = start;
        let mut j = i + 1;
        while j < sorted.len() && sorted[j] == end + 1 {
            end = sorted[j];
            j += 1;
        }
        if start == end {
            ranges.push(start.to_string());
        } else {
            ranges.push(format!("{start}-{end}"));
        }
        i = j;
    }
    ranges.join(",")
}

/// Expands a GS1900 port-list expression (`"1-5,7,10-12,lag1-8"`) into
/// individual port numbers, dropping any LAG pseudo-ports.
fn parse_port_list(spec: &str) -> Vec<u32> {
    let cleaned = LAG_SUFFIX.replace_all(spec, "");
    let mut ports = Vec::new();
    for part in cleaned.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<u32>(), hi.trim().parse::<u32>()) {
                ports.extend(lo..=hi);
            }
        } else if let Ok(p) = part.parse::<u32>() {
            ports.push(p);
        }
    }
    ports
}

pub struct ZyxelCliDevice {
    config: DeviceConfig,
    shell: Option<ZyxelShell>,
}

impl ZyxelCliDevice {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config, shell: None }
    }

    fn shell_mut(&mut self) -> Result<&mut ZyxelShell, FleetConfError> {
        self.shell
            .as_mut()
            .ok_or_else(|| FleetConfError::ConnectionError("not connected".into()))
    }

    /// Enters `configure`, runs `commands` stopping at the first failure,
    /// and always leaves configuration mode via `exit` regardless of
    /// whether a command failed.
    fn execute_config_mode(&mut self, commands: &[String]) -> Result<(), FleetConfError> {
        let timeout = self.config.timeout;
        let shell = self.shell_mut()?;
        shell.send_command("configure", timeout)?;

        let mut failure: Option<FleetConfError> = None;
        for command in commands {
            match shell.send_command(command, timeout) {
                Ok(output) => {
                    if let Some(error_line) = zyxel_cli_find_error(&output) {
                        failure = Some(FleetConfError::protocol(command, error_line));
                        break;
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        shell.send_command("exit", timeout).ok();
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl NetworkDevice for ZyxelCliDevice {
    fn connect(&mut self) -> Result<(), FleetConfError> {
        let host = self.config.host.clone();
        let port = self.config.port;
        let username = self.config.username.clone();
        let password = self.config.password.clone().unwrap_or_default();
        let timeout = self.config.timeout;

        with_retry(RetryPolicy::connect(), "zyxel-cli connect", || {
            info!(device_id = %self.config.device_id, %host, "connecting to GS1900 over ssh");
            let mut shell = ZyxelShell::connect(&host, port, &username, &password, timeout)?;
            // Disable pagination so multi-page output doesn't need --More-- handling.
            shell.send_command("terminal length 0", Duration::from_secs(5)).ok();
            self.shell = Some(shell);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Result<(), FleetConfError> {
        if let Some(mut shell) = self.shell.take() {
            shell.close();
        }
        Ok(())
    }

    fn health_check(&mut self) -> Result<bool, FleetConfError> {
        self.execute("show system-info").map(|_| true)
    }

    fn execute(&mut self, command: &str) -> Result<String, FleetConfError> {
        let timeout = self.config.timeout;
        with_retry(RetryPolicy::command(), "zyxel-cli execute", || {
            let shell = self.shell_mut()?;
            let output = shell.send_command(command, timeout)?;
            if let Some(error_line) = zyxel_cli_find_error(&output) {
                return Err(FleetConfError::protocol(command, error_line));
            }
            Ok(output)
        })
    }

    fn get_vlans(&mut self) -> Result<Vec<NormalizedVlan>, FleetConfError> {
        let output = self.execute("show vlan")?;
        let mut vlans = Vec::new();

        for line in output.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("---") || trimmed.contains("VID") {
                continue;
            }
            if !VLAN_ROW.is_match(trimmed) {
                continue;
            }
            let cols: Vec<&str> = trimmed.split('|').map(str::trim).collect();
            if cols.len() < 4 {
                continue;
            }
            let id: u16 = match cols[0].parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            let name = if cols[1].is_empty() { None } else { Some(cols[1].to_string()) };
            let untagged: std::collections::BTreeSet<String> =
                parse_port_list(cols[2]).into_iter().map(|p| p.to_string()).collect();
            let tagged: std::collections::BTreeSet<String> =
                parse_port_list(cols[3]).into_iter().map(|p| p.to_string()).collect();

            vlans.push(NormalizedVlan {
                id,
                name,
                tagged_ports: tagged,
                untagged_ports: untagged,
                ip_interface: None,
            });
        }
        Ok(vlans)
    }

    fn get_ports(&mut self) -> Result<Vec<NormalizedPort>, FleetConfError> {
        let output = self.execute("show interfaces 1-26")?;
        let mut ports = Vec::new();
        let mut current: Option<NormalizedPort> = None;

        for line in output.lines() {
            if let Some(caps) = PORT_HEADER.captures(line) {
                if let Some(p) = current.take() {
                    ports.push(p);
                }
                let enabled = caps[2].eq_ignore_ascii_case("up");
                current = Some(NormalizedPort {
                    id: caps[1].to_string(),
                    enabled: Some(enabled),
                    ..Default::default()
                });
                continue;
            }
            let Some(port) = current.as_mut() else { continue };
            if let Some(caps) = SPEED_PATTERN.captures(line) {
                port.speed = normalize_speed(&caps[1]);
            }
        }
        if let Some(p) = current {
            ports.push(p);
        }
        Ok(ports)
    }

    fn create_vlan(&mut self, vlan: &NormalizedVlan) -> Result<(), FleetConfError> {
        if vlan.id == 0 || vlan.id > 4094 {
            return Err(FleetConfError::protocol(
                "vlan create",
                format!("invalid VLAN ID {} - must be between 1 and 4094", vlan.id),
            ));
        }

        let vlan_name = vlan.name.clone().unwrap_or_else(|| format!("VLAN{}", vlan.id));
        let mut all_ports: Vec<u32> = vlan
            .tagged_ports
            .iter()
            .chain(vlan.untagged_ports.iter())
            .filter_map(|p| p.parse().ok())
            .collect();
        all_ports.sort_unstable();
        all_ports.dedup();

        let mut commands = vec![format!("vlan {}", vlan.id), format!("name \"{}\"", vlan_name)];
        if !all_ports.is_empty() {
            commands.push(format!("fixed {}", format_port_list(&all_ports)));
        }
        if !vlan.untagged_ports.is_empty() {
            let untagged: Vec<u32> = vlan.untagged_ports.iter().filter_map(|p| p.parse().ok()).collect();
            commands.push(format!("untagged {}", format_port_list(&untagged)));
        }
        commands.push("exit".to_string());

        self.execute_config_mode(&commands)
    }

    fn delete_vlan(&mut self, vlan_id: u16) -> Result<(), FleetConfError> {
        if vlan_id == 1 {
            return Err(FleetConfError::protocol(
                "vlan delete",
                "cannot delete VLAN 1 (default VLAN is protected)",
            ));
        }
        if vlan_id == 0 || vlan_id > 4094 {
            return Err(FleetConfError::protocol(
                "vlan delete",
                format!("invalid VLAN ID {vlan_id} - must be between 1 and 4094"),
            ));
        }
        self.execute_config_mode(&[format!("no vlan {vlan_id}")])
    }

    fn configure_port(&mut self, port: &NormalizedPort) -> Result<(), FleetConfError> {
        let mut commands = vec![format!("interface port {}", port.id)];
        match port.enabled {
            Some(false) => commands.push("inactive".to_string()),
            _ => commands.push("no inactive".to_string()),
        }
        if let Some(description) = &port.description {
            commands.push(format!("name \"{description}\""));
        }
        commands.push("exit".to_string());
        self.execute_config_mode(&commands)
    }

    fn save_config(&mut self) -> Result<(), FleetConfError> {
        self.execute("copy running-config startup-config").map(|_| ())
    }

    fn device_id(&self) -> &str {
        &self.config.device_id
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::ZyxelCli
    }
}

fn normalize_speed(raw: &str) -> Option<PortSpeed> {
    let upper = raw.to_uppercase();
    match upper.as_str() {
        "10G" => Some(PortSpeed::Speed10G),
        "1000" | "1G" => Some(PortSpeed::Speed1G),
        "100" | "100M" => Some(PortSpeed::Speed100M),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_port_list_compresses_contiguous_ranges() {
        assert_eq!(format_port_list(&[1, 2, 3, 4, 5, 7, 10, 11, 12]), "1-5,7,10-12");
    }

    #[test]
    fn parse_port_list_expands_ranges_and_drops_lag() {
        assert_eq!(
            parse_port_list("1-5,7,10-12,lag1-8"),
            vec![1, 2, 3, 4, 5, 7, 10, 11, 12]
        );
    }

    #[test]
    fn normalize_speed_maps_known_values() {
        assert_eq!(normalize_speed("1000"), Some(PortSpeed::Speed1G));
        assert_eq!(normalize_speed("10G"), Some(PortSpeed::Speed10G));
        assert_eq!(normalize_speed("100"), Some(PortSpeed::Speed100M));
        assert_eq!(normalize_speed("unknown"), None);
    }

    #[test]
    fn delete_vlan_rejects_protected_vlan() {
        let config = DeviceConfig {
            device_id: "zx-a".to_string(),
            device_type: DeviceType::ZyxelCli,
            ..Default::default()
        };
        let mut device = ZyxelCliDevice::new(config);
        assert!(device.delete_vlan(1).is_err());
        assert!(device.delete_vlan(0).is_err());
    }
}
