//! Brocade FCX driver (§4.3): a raw telnet transport plus the `NetworkDevice`
//! implementation that drives it. FCX telnet sessions are notoriously
//! unstable, so every command goes through a prompt-synchronized read loop
//! rather than trusting a fixed read size or a single `read()` call.

use crate::device_connection::{DeviceConfig, DeviceType, NetworkDevice};
use crate::error::FleetConfError;
use crate::model::{NormalizedPort, NormalizedVlan, PortMode};
use crate::retry::{with_retry, RetryPolicy};
use crate::vendor_error_patterns::brocade_find_error;
use lazy_static::lazy_static;
use regex::Regex;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

lazy_static! {
    static ref PROMPT_PATTERN: Regex = Regex::new(r"(?i)[\r\n].*?(Router[>#]|[^\r\n]*\)#)\s*$").unwrap();
    static ref MORE_PATTERN: Regex = Regex::new(r"(?i)--More--").unwrap();
    static ref VLAN_HEADER: Regex = Regex::new(r"PORT-VLAN\s+(\d+)(?:,\s*Name\s+(\S+))?").unwrap();
    static ref MODULE_PREFIX: Regex = Regex::new(r"\(U\d+/M(\d+)\)").unwrap();
    static ref PAREN_GROUP: Regex = Regex::new(r"\([^)]+\)").unwrap();
    static ref PORT_NAME: Regex = Regex::new(r"^(\d+/\d+/\d+)").unwrap();
}

/// Raw telnet connection to a Brocade FCX switch. Every read is bounded by
/// `timeout` and polls in small slices so a stalled device degrades to a
/// timeout error instead of hanging the caller forever.
struct BrocadeTelnet {
    stream: TcpStream,
    timeout: Duration,
}

impl BrocadeTelnet {
    fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, FleetConfError> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr).map_err(|e| FleetConfError::connection_failed(addr, e))?;
        stream.set_read_timeout(Some(Duration::from_millis(1500)))?;
        stream.set_nodelay(true).ok();
        let mut telnet = Self { stream, timeout };

        // Let the banner arrive before we start polling for a prompt.
        std::thread::sleep(Duration::from_secs(2));
        telnet.read_until_prompt(Duration::from_secs(10))?;
        Ok(telnet)
    }

    fn send_raw(&mut self, data: &[u8]) -> Result<(), FleetConfError> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_available(&mut self, timeout: Duration) -> Result<Vec<u8>, FleetConfError> {
        self.stream.set_read_timeout(Some(timeout)).ok();
        let mut buf = [0u8; 8192];
        match self.stream.read(&mut buf) {
            Ok(0) => Ok(Vec::new()),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(Vec::new())
            }
            Err(e) => Err(FleetConfError::IoError(e)),
        }
    }

    fn read_until_prompt(&mut self, timeout: Duration) -> Result<String, FleetConfError> {
        let start = Instant::now();
        let mut output: Vec<u8> = Vec::new();

        loop {
            let elapsed = start.elapsed();
            if elapsed > timeout {
                break;
            }
            let slice_timeout = std::cmp::min(Duration::from_secs(2), timeout - elapsed);
            let chunk = self.read_available(slice_timeout)?;
            if !chunk.is_empty() {
                output.extend_from_slice(&chunk);
                let decoded = String::from_utf8_lossy(&output);

                if PROMPT_PATTERN.is_match(&decoded) {
                    break;
                }
                if MORE_PATTERN.is_match(&decoded) {
                    self.send_raw(b" ")?;
                    std::thread::sleep(Duration::from_millis(300));
                }
            }
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// Sends `command` and returns its output with the command echo and the
    /// trailing prompt line stripped.
    fn send_command(&mut self, command: &str) -> Result<String, FleetConfError> {
        self.send_raw(format!("{command}\r\n").as_bytes())?;
        std::thread::sleep(Duration::from_millis(500));
        let output = self.read_until_prompt(self.timeout)?;

        let mut lines: Vec<&str> = output.split('\n').collect();
        if lines.first().is_some_and(|l| l.contains(command)) {
            lines.remove(0);
        }
        if lines.last().is_some_and(|l| PROMPT_PATTERN.is_match(l)) {
            lines.pop();
        }
        Ok(lines.join("\n").trim().to_string())
    }

    /// Enters enable mode, handling both password-protected and open
    /// enable-mode devices via a polling read loop over the raw socket.
    fn enable(&mut self, password: &str) -> Result<bool, FleetConfError> {
        self.send_raw(b"enable\r\n")?;

        let start = Instant::now();
        let deadline = Duration::from_secs(5);
        let mut output: Vec<u8> = Vec::new();

        loop {
            let elapsed = start.elapsed();
            if elapsed > deadline {
                warn!(elapsed_ms = elapsed.as_millis() as u64, "enable mode timed out");
                break;
            }
            let chunk = self.read_available(std::cmp::min(Duration::from_secs(1), deadline - elapsed))?;
            if !chunk.is_empty() {
                output.extend_from_slice(&chunk);
                let decoded = String::from_utf8_lossy(&output);

                if decoded.to_lowercase().contains("password:") {
                    debug!("enable password prompt detected");
                    self.send_raw(format!("{password}\r\n").as_bytes())?;
                    std::thread::sleep(Duration::from_millis(500));
                    let prompt_output = self.read_until_prompt(Duration::from_secs(5))?;
                    return Ok(prompt_output.contains('#'));
                }
                if decoded.contains('#') {
                    info!("enable mode already active, no password required");
                    return Ok(true);
                }
                if decoded.contains("Error") || decoded.to_lowercase().contains("incorrect") {
                    warn!(output = %decoded, "enable mode rejected");
                    return Ok(false);
                }
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        Ok(String::from_utf8_lossy(&output).contains('#'))
    }

    fn close(&mut self) {
        self.stream.shutdown(std::net::Shutdown::Both).ok();
    }
}

/// Per-command result inside a batch, mirroring the per-command detail the
/// generator and executor attach to a `CommandResult`.
struct BatchItem {
    success: bool,
    error: Option<String>,
}

pub struct BrocadeDevice {
    config: DeviceConfig,
    telnet: Option<BrocadeTelnet>,
}

impl BrocadeDevice {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config, telnet: None }
    }

    fn telnet_mut(&mut self) -> Result<&mut BrocadeTelnet, FleetConfError> {
        self.telnet
            .as_mut()
            .ok_or_else(|| FleetConfError::ConnectionError("not connected".into()))
    }

    /// Sends `commands` as a single transmission and splits the combined
    /// output back into per-command results by looking for each command's
    /// echo in turn. Brocade happily accepts a batch of commands separated
    /// by newlines, processing them sequentially.
    fn execute_batch_raw(&mut self, commands: &[String]) -> Result<(bool, String, Vec<BatchItem>), FleetConfError> {
        if commands.is_empty() {
            return Ok((true, String::new(), Vec::new()));
        }

        let batch = commands.join("\n");
        let telnet = self.telnet_mut()?;
        let output = telnet.send_command(&batch)?;

        let mut results = Vec::with_capacity(commands.len());
        let mut current_idx = 0usize;
        let mut current_lines: Vec<String> = Vec::new();

        for raw_line in output.split('\n') {
            let line = raw_line.trim();
            if current_idx < commands.len() {
                let cmd = &commands[current_idx];
                if line.contains(cmd.as_str()) || line.ends_with(cmd.as_str()) {
                    if current_idx > 0 && !current_lines.is_empty() {
                        let cmd_output = current_lines.join("\n");
                        let error = brocade_find_error(&cmd_output);
                        let failed = error.is_some();
                        results.push(BatchItem {
                            success: !failed,
                            error,
                        });
                        if failed {
                            for _ in current_idx..commands.len() {
                                results.push(BatchItem {
                                    success: false,
                                    error: Some("not executed: previous command failed".to_string()),
                                });
                            }
                            return Ok((false, output, results));
                        }
                    }
                    current_lines.clear();
                    current_idx += 1;
                    continue;
                }
            }
            if !line.is_empty() && !line.to_lowercase().contains("router") {
                current_lines.push(line.to_string());
            }
        }

        if current_idx > 0 {
            let cmd_output = current_lines.join("\n");
            let error = brocade_find_error(&cmd_output);
            results.push(BatchItem {
                success: error.is_none(),
                error,
            });
        }
        while results.len() < commands.len() {
            results.push(BatchItem { success: true, error: None });
        }

        let overall_success = results.iter().all(|r| r.success);
        Ok((overall_success, output, results))
    }

    /// Wraps `commands` with `conf t` / `exit` and runs them as one batch.
    fn execute_config_mode(&mut self, commands: &[String]) -> Result<(), FleetConfError> {
        let mut full = vec!["conf t".to_string()];
        full.extend(commands.iter().cloned());
        full.push("exit".to_string());

        let (success, output, results) = self.execute_batch_raw(&full)?;
        if !success {
            let detail = results
                .iter()
                .find(|r| !r.success)
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "command failed".to_string());
            return Err(FleetConfError::protocol(full.join("; "), format!("{detail}\n{output}")));
        }
        Ok(())
    }

    /// Groups sorted `unit/module/port` identifiers into Brocade's
    /// `X to Y` range syntax, splitting whenever the module changes or the
    /// port numbers are not contiguous.
    fn format_port_range(ports: &[String]) -> String {
        let mut parsed: Vec<(u32, u32, u32, &str)> = ports
            .iter()
            .filter_map(|p| {
                let parts: Vec<&str> = p.split('/').collect();
                if parts.len() == 3 {
                    let unit = parts[0].parse().ok()?;
                    let module = parts[1].parse().ok()?;
                    let port = parts[2].parse().ok()?;
                    Some((unit, module, port, p.as_str()))
                } else {
                    Some((0, 0, 0, p.as_str()))
                }
            })
            .collect();
        parsed.sort();

        let mut ranges = Vec::new();
        let mut i = 0;
        while i < parsed.len() {
            let (unit, module, port, start) = parsed[i];
            let mut end = start;
            let mut prev = port;
            let mut j = i + 1;
            while j < parsed.len() {
                let (next_unit, next_module, next_port, next_str) = parsed[j];
                if next_unit == unit && next_module == module && next_port == prev + 1 {
                    end = next_str;
                    prev = next_port;
                    j += 1;
                } else {
                    break;
                }
            }
            ranges.push(format!("{start} to {end}"));
            i = j;
        }
        ranges.join(" ")
    }

    fn parse_port_line(line: &str, prefix: &str) -> Vec<String> {
        let text = match line.split(prefix).last() {
            Some(t) => t.trim(),
            None => return Vec::new(),
        };
        if text.is_empty() || text.eq_ignore_ascii_case("none") {
            return Vec::new();
        }

        let module = MODULE_PREFIX
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(1);
        let stripped = PAREN_GROUP.replace_all(text, "");

        stripped
            .split_whitespace()
            .filter(|p| p.chars().all(|c| c.is_ascii_digit()))
            .map(|p| format!("1/{module}/{p}"))
            .collect()
    }
}

impl NetworkDevice for BrocadeDevice {
    fn connect(&mut self) -> Result<(), FleetConfError> {
        let host = self.config.host.clone();
        let port = self.config.port;
        let timeout = self.config.timeout;
        let enable_required = self.config.enable_password_required;
        let secret = self.config.secret.clone().or_else(|| self.config.password.clone()).unwrap_or_default();

        with_retry(RetryPolicy::connect(), "brocade connect", || {
            info!(device_id = %self.config.device_id, %host, "connecting to brocade switch");
            let mut telnet = BrocadeTelnet::connect(&host, port, timeout)?;

            if enable_required {
                if !telnet.enable(&secret)? {
                    return Err(FleetConfError::authentication_failed(
                        &self.config.username,
                        "failed to enter enable mode",
                    ));
                }
            }

            telnet.send_command("skip-page-display")?;
            self.telnet = Some(telnet);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Result<(), FleetConfError> {
        if let Some(mut telnet) = self.telnet.take() {
            telnet.close();
        }
        Ok(())
    }

    fn health_check(&mut self) -> Result<bool, FleetConfError> {
        self.execute("show version").map(|_| true)
    }

    fn execute(&mut self, command: &str) -> Result<String, FleetConfError> {
        with_retry(RetryPolicy::command(), "brocade execute", || {
            let telnet = self.telnet_mut()?;
            let output = telnet.send_command(command)?;
            if let Some(error_line) = brocade_find_error(&output) {
                return Err(FleetConfError::protocol(command, error_line));
            }
            Ok(output)
        })
    }

    fn get_vlans(&mut self) -> Result<Vec<NormalizedVlan>, FleetConfError> {
        let output = self.execute("show vlan")?;
        let mut vlans = Vec::new();
        let mut current: Option<NormalizedVlan> = None;

        for line in output.lines() {
            if let Some(caps) = VLAN_HEADER.captures(line) {
                if let Some(v) = current.take() {
                    vlans.push(v);
                }
                let id: u16 = caps[1].parse().unwrap_or(0);
                let name = caps.get(2).map(|m| m.as_str().to_string());
                current = Some(NormalizedVlan {
                    id,
                    name,
                    ..Default::default()
                });
                continue;
            }
            let Some(vlan) = current.as_mut() else { continue };
            if line.contains("Tagged Ports:") {
                vlan.tagged_ports.extend(Self::parse_port_line(line, "Tagged Ports:"));
            } else if line.contains("Untagged Ports:") {
                vlan.untagged_ports.extend(Self::parse_port_line(line, "Untagged Ports:"));
            }
        }
        if let Some(v) = current {
            vlans.push(v);
        }
        Ok(vlans)
    }

    fn get_ports(&mut self) -> Result<Vec<NormalizedPort>, FleetConfError> {
        let output = self.execute("show interfaces brief")?;
        let mut ports = Vec::new();

        for raw_line in output.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with("Port") || line.starts_with('=') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 8 || !PORT_NAME.is_match(parts[0]) {
                continue;
            }
            let is_tagged = parts[6].eq_ignore_ascii_case("yes");
            let pvid = parts[7];

            ports.push(NormalizedPort {
                id: parts[0].to_string(),
                enabled: Some(parts[1].to_lowercase() != "disabled"),
                duplex: None,
                speed: None,
                description: None,
                mode: Some(if is_tagged { PortMode::Trunk } else { PortMode::Access }),
                native_vlan: pvid.parse().ok(),
                allowed_vlans: None,
            });
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
        let mut commands = vec![format!("vlan {} name {} by port", vlan.id, vlan_name)];

        if !vlan.untagged_ports.is_empty() {
            let ports: Vec<String> = vlan.untagged_ports.iter().cloned().collect();
            commands.push(format!("untagged ethe {}", Self::format_port_range(&ports)));
        }
        if !vlan.tagged_ports.is_empty() {
            let ports: Vec<String> = vlan.tagged_ports.iter().cloned().collect();
            commands.push(format!("tagged ethe {}", Self::format_port_range(&ports)));
        }
        if vlan.ip_interface.is_some() {
            commands.push(format!("router-interface ve {}", vlan.id));
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
        if vlan_id == 0 {
            return Err(FleetConfError::protocol(
                "vlan delete",
                "cannot delete VLAN 0 (reserved for internal use)",
            ));
        }
        self.execute_config_mode(&[format!("no vlan {vlan_id}")])
    }

    fn configure_port(&mut self, port: &NormalizedPort) -> Result<(), FleetConfError> {
        let mut commands = vec![format!("interface ethernet {}", port.id)];
        match port.enabled {
            Some(false) => commands.push("disable".to_string()),
            _ => commands.push("enable".to_string()),
        }
        if let Some(description) = &port.description {
            commands.push(format!("port-name {description}"));
        }
        commands.push("exit".to_string());
        self.execute_config_mode(&commands)
    }

    fn save_config(&mut self) -> Result<(), FleetConfError> {
        self.execute("write memory").map(|_| ())
    }

    fn device_id(&self) -> &str {
        &self.config.device_id
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Brocade
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn execute_batch(
        &mut self,
        commands: &[String],
        stop_on_error: bool,
    ) -> Result<Vec<crate::command_result::CommandResult>, FleetConfError> {
        let (_, _, items) = self.execute_batch_raw(commands)?;
        let mut results = Vec::with_capacity(items.len());
        for (command, item) in commands.iter().zip(items.into_iter()) {
            let now = chrono::Utc::now();
            if item.success {
                results.push(crate::command_result::CommandResult::success(
                    self.config.device_id.clone(),
                    DeviceType::Brocade.to_string(),
                    command.clone(),
                    String::new(),
                    now,
                    now,
                ));
            } else if stop_on_error {
                results.push(crate::command_result::CommandResult::from_error(
                    self.config.device_id.clone(),
                    DeviceType::Brocade.to_string(),
                    command.clone(),
                    FleetConfError::protocol(command, item.error.unwrap_or_default()),
                    now,
                    None,
                ));
            } else {
                results.push(crate::command_result::CommandResult::skipped(
                    self.config.device_id.clone(),
                    DeviceType::Brocade.to_string(),
                    command.clone(),
                ));
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_port_range_groups_contiguous_ports() {
        let ports = vec!["1/1/1".to_string(), "1/1/2".to_string(), "1/1/3".to_string(), "1/1/4".to_string()];
        assert_eq!(BrocadeDevice::format_port_range(&ports), "1/1/1 to 1/1/4");
    }

    #[test]
    fn format_port_range_splits_non_contiguous_ports() {
        let ports = vec!["1/1/1".to_string(), "1/1/3".to_string(), "1/1/5".to_string()];
        assert_eq!(
            BrocadeDevice::format_port_range(&ports),
            "1/1/1 to 1/1/1 1/1/3 to 1/1/3 1/1/5 to 1/1/5"
        );
    }

    #[test]
    fn parse_port_line_extracts_module_and_ports() {
        let ports = BrocadeDevice::parse_port_line(" Untagged Ports: (U1/M1)   1   2   3   4", "Untagged Ports:");
        assert_eq!(ports, vec!["1/1/1", "1/1/2", "1/1/3", "1/1/4"]);
    }

    #[test]
    fn parse_port_line_handles_none() {
        let ports = BrocadeDevice::parse_port_line(" Tagged Ports: None", "Tagged Ports:");
        assert!(ports.is_empty());
    }

    #[test]
    fn delete_vlan_rejects_protected_vlans() {
        let config = DeviceConfig {
            device_id: "br-a".to_string(),
            device_type: DeviceType::Brocade,
            ..Default::default()
        };
        let mut device = BrocadeDevice::new(config);
        assert!(device.delete_vlan(1).is_err());
        assert!(device.delete_vlan(0).is_err());
    }

    #[test]
    fn create_vlan_rejects_out_of_range_id() {
        let config = DeviceConfig {
            device_id: "br-a".to_string(),
            device_type: DeviceType::Brocade,
            ..Default::default()
        };
        let mut device = BrocadeDevice::new(config);
        let vlan = NormalizedVlan {
            id: 4095,
            ..Default::default()
        };
        assert!(device.create_vlan(&vlan).is_err());
    }
}
