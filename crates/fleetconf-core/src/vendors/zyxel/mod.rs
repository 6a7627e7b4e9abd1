//! Zyxel GS1900 legacy web driver (§4.5): a hybrid transport that reads
//! state over SSH (fast, read-only) and writes it through the device's web
//! CGI forms (the only place configuration changes can actually be made on
//! this firmware generation).

use crate::device_connection::{DeviceConfig, DeviceType, NetworkDevice};
use crate::error::FleetConfError;
use crate::model::{NormalizedPort, NormalizedVlan, PortMode, PortSpeed};
use crate::retry::{with_retry, RetryPolicy};
use lazy_static::lazy_static;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use reqwest::blocking::Client;
use ssh2::Session;
use std::collections::BTreeMap;
use std::net::TcpStream;
use std::time::Duration;
use tracing::{debug, info, warn};

const CMD_VLAN_ADD: u32 = 1284;
const CMD_VLAN_ADD_SUBMIT: u32 = 1285;
const CMD_PORT_VLAN: u32 = 1290;
const CMD_PORT_VLAN_SUBMIT: u32 = 1291;
const CMD_VLAN_MEMBERSHIP: u32 = 1293;
const CMD_VLAN_MEMBERSHIP_SUBMIT: u32 = 1294;

const MEMBERSHIP_TAGGED: u8 = 2;
const MEMBERSHIP_UNTAGGED: u8 = 3;

/// Number of addressable port+LAG slots on the VLAN membership page: 26
/// physical ports plus 8 link aggregation groups.
const MEMBERSHIP_SLOTS: usize = 34;

lazy_static! {
    static ref XSSID_PATTERN: Regex = Regex::new(r#"name="XSSID"\s+value="([^"]+)""#).unwrap();
    static ref VLAN_MODE_PATTERN: Regex = Regex::new(r#"name="vlanMode_(\d+)"\s+value="(\d+)""#).unwrap();
    static ref MEMBERSHIP_CHECKED_PATTERN: Regex =
        Regex::new(r#"(?i)name="membership_(\d+)"[^>]*value="(\d+)"[^>]*checked"#).unwrap();
    static ref PORT_HEADER: Regex = Regex::new(r"is (up|down)").unwrap();
    static ref SPEED_PATTERN: Regex = Regex::new(r"(\d+G?)-speed|speed.*?(\d+G?)").unwrap();
    static ref LAG_RANGE: Regex = Regex::new(r"^lag(\d+)-(\d+)$").unwrap();
}

/// Zyxel's login-page password obfuscation: the password is embedded in
/// reverse at every 5th output position, with the password's length
/// encoded in decimal at positions 123 and 289.
fn encode_password(password: &str) -> String {
    let pwd_bytes: Vec<char> = password.chars().collect();
    let pwd_len = pwd_bytes.len();
    let mut char_idx = pwd_len;
    let mut rng = rand::thread_rng();
    let mut text = String::with_capacity(322usize.saturating_sub(pwd_len));

    for i in 1..322usize.saturating_sub(pwd_len).max(1) {
        if i % 5 == 0 && char_idx > 0 {
            char_idx -= 1;
            text.push(pwd_bytes[char_idx]);
        } else if i == 123 {
            text.push_str(&(if pwd_len < 10 { 0 } else { pwd_len / 10 }).to_string());
        } else if i == 289 {
            text.push_str(&(pwd_len % 10).to_string());
        } else {
            text.push(rng.sample(Alphanumeric) as char);
        }
    }
    text
}

/// Expands a Zyxel port-list expression, keeping LAG entries as distinct
/// string members (`"lag1"`, `"lag2"`, ...) rather than dropping them.
fn parse_port_list(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || text == "---" {
        return Vec::new();
    }

    let mut ports = Vec::new();
    for part in text.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(caps) = LAG_RANGE.captures(part) {
            let start: u32 = caps[1].parse().unwrap_or(0);
            let end: u32 = caps[2].parse().unwrap_or(0);
            for i in start..=end {
                ports.push(format!("lag{i}"));
            }
        } else if let Some((lo, hi)) = part.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<u32>(), hi.trim().parse::<u32>()) {
                for i in lo..=hi {
                    ports.push(i.to_string());
                }
            } else {
                ports.push(part.to_string());
            }
        } else {
            ports.push(part.to_string());
        }
    }
    ports
}

/// Maps a `NormalizedPort::id` onto the Zyxel web UI's 0-based port index:
/// physical ports 1-26 occupy indices 0-25, `lagN` occupies index `25+N`.
fn port_index(port_id: &str) -> Option<usize> {
    if let Some(lag) = port_id.strip_prefix("lag") {
        let lag_num: usize = lag.parse().ok()?;
        return Some(25 + lag_num);
    }
    let num: usize = port_id.parse().ok()?;
    if num == 0 || num > 26 {
        return None;
    }
    Some(num - 1)
}

/// Read-only SSH transport. The GS1900 web interface requires a fresh
/// interactive shell per command rather than a persistent one, so a new
/// channel is opened, used, and torn down for every `exec` call.
struct ZyxelSsh {
    session: Session,
}

/// Per-read timeout on the underlying socket. Generous enough for the SSH
/// handshake's round trips, short enough that the `recv_ready()`-style
/// drain loop below never stalls an `exec` call for long once real output
/// stops arriving.
const SOCKET_READ_TIMEOUT: Duration = Duration::from_secs(2);

impl ZyxelSsh {
    fn connect(host: &str, port: u16, username: &str, password: &str) -> Result<Self, FleetConfError> {
        let addr = format!("{host}:{port}");
        let tcp = TcpStream::connect(&addr).map_err(|e| FleetConfError::connection_failed(addr, e))?;
        tcp.set_read_timeout(Some(SOCKET_READ_TIMEOUT)).ok();

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session
            .userauth_password(username, password)
            .map_err(|e| FleetConfError::authentication_failed(username, e.to_string()))?;
        if !session.authenticated() {
            return Err(FleetConfError::authentication_failed(username, "ssh authentication rejected"));
        }
        session.set_blocking(true);
        Ok(Self { session })
    }

    /// Opens a fresh shell channel, presses enter to clear the
    /// "Press Any Key" banner, sends `command`, and returns the cleaned
    /// output with the echoed command and trailing prompt line removed.
    fn exec(&self, command: &str) -> Result<String, FleetConfError> {
        let mut channel = self.session.channel_session()?;
        channel.request_pty("xterm", None, None)?;
        channel.shell()?;

        std::thread::sleep(Duration::from_secs(1));
        drain(&mut channel);

        write_all(&mut channel, b"\n")?;
        std::thread::sleep(Duration::from_millis(500));
        drain(&mut channel);

        write_all(&mut channel, format!("{command}\n").as_bytes())?;
        std::thread::sleep(Duration::from_secs(2));
        let output = drain(&mut channel);

        channel.close().ok();

        let clean: Vec<&str> = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("GS1900#") && *line != command)
            .collect();
        Ok(clean.join("\n"))
    }
}

fn write_all(channel: &mut ssh2::Channel, data: &[u8]) -> Result<(), FleetConfError> {
    use std::io::Write;
    channel.write_all(data)?;
    channel.flush()?;
    Ok(())
}

/// Reads whatever is currently available without blocking for new data,
/// mirroring paramiko's `recv_ready()` polling loop.
fn drain(channel: &mut ssh2::Channel) -> String {
    use std::io::Read;
    let mut output = Vec::new();
    loop {
        let mut buf = [0u8; 8192];
        match channel.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                output.extend_from_slice(&buf[..n]);
                std::thread::sleep(Duration::from_millis(200));
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&output).into_owned()
}

pub struct ZyxelWebDevice {
    config: DeviceConfig,
    ssh: Option<ZyxelSsh>,
    http: Option<Client>,
    base_url: String,
}

impl ZyxelWebDevice {
    pub fn new(config: DeviceConfig) -> Self {
        let base_url = format!("http://{}", config.host);
        Self {
            config,
            ssh: None,
            http: None,
            base_url,
        }
    }

    fn ssh(&self) -> Result<&ZyxelSsh, FleetConfError> {
        self.ssh.as_ref().ok_or_else(|| FleetConfError::ConnectionError("not connected".into()))
    }

    fn http(&self) -> Result<&Client, FleetConfError> {
        self.http.as_ref().ok_or_else(|| FleetConfError::ConnectionError("web session not established".into()))
    }

    /// Logs into the web UI and confirms the `auth_id` it returns via a
    /// follow-up `login_chk` request.
    fn web_login(&self) -> Result<(), FleetConfError> {
        let client = self.http()?;
        let password = self.config.password.clone().unwrap_or_default();
        let encoded = encode_password(&password);
        let login_body = format!("username={}&password={}&login=true;", self.config.username, encoded);

        let resp = client
            .post(format!("{}/cgi-bin/dispatcher.cgi", self.base_url))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(login_body)
            .send()?;
        let auth_id = resp.text()?.trim().to_string();

        std::thread::sleep(Duration::from_millis(500));
        let check = client
            .post(format!("{}/cgi-bin/dispatcher.cgi", self.base_url))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(format!("authId={auth_id}&login_chk=true"))
            .send()?;
        let check_text = check.text()?;
        if !check_text.contains("OK") {
            return Err(FleetConfError::authentication_failed(&self.config.username, "web login failed"));
        }
        info!(device_id = %self.config.device_id, "web session established for GS1900");
        Ok(())
    }

    /// Fetches the XSSID CSRF token embedded in the form page for `cmd`.
    fn get_xssid(&self, cmd: u32) -> Result<String, FleetConfError> {
        let client = self.http()?;
        let resp = client.get(format!("{}/cgi-bin/dispatcher.cgi?cmd={cmd}", self.base_url)).send()?;
        let body = resp.text()?;
        XSSID_PATTERN
            .captures(&body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| FleetConfError::protocol(format!("cmd={cmd}"), "could not find XSSID token"))
    }

    /// Sets a single port's membership for `vlan_id`, preserving every
    /// other port's current membership read off the same form page.
    fn set_port_vlan_membership(&self, port_idx: usize, vlan_id: u16, membership: u8) -> Result<(), FleetConfError> {
        let client = self.http()?;
        let resp = client
            .get(format!("{}/cgi-bin/dispatcher.cgi?cmd={CMD_VLAN_MEMBERSHIP}&vid={vlan_id}", self.base_url))
            .send()?;
        let page = resp.text()?;

        let xssid = XSSID_PATTERN
            .captures(&page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| FleetConfError::protocol("vlan membership", "could not find XSSID token"))?;

        let mut current: BTreeMap<usize, String> = BTreeMap::new();
        for caps in VLAN_MODE_PATTERN.captures_iter(&page) {
            if let Ok(idx) = caps[1].parse::<usize>() {
                current.insert(idx, caps[2].to_string());
            }
        }
        for caps in MEMBERSHIP_CHECKED_PATTERN.captures_iter(&page) {
            if let Ok(idx) = caps[1].parse::<usize>() {
                current.insert(idx, caps[2].to_string());
            }
        }

        let mut form: Vec<(String, String)> = vec![
            ("XSSID".to_string(), xssid),
            ("cmd".to_string(), CMD_VLAN_MEMBERSHIP_SUBMIT.to_string()),
            ("vid".to_string(), vlan_id.to_string()),
        ];
        for idx in 0..MEMBERSHIP_SLOTS {
            let value = if idx == port_idx {
                membership.to_string()
            } else {
                current.get(&idx).cloned().unwrap_or_else(|| "0".to_string())
            };
            form.push((format!("vlanMode_{idx}"), value.clone()));
            form.push((format!("membership_{idx}"), value));
        }

        let resp = client.post(format!("{}/cgi-bin/dispatcher.cgi", self.base_url)).form(&form).send()?;
        if !resp.status().is_success() {
            return Err(FleetConfError::protocol(
                "vlan membership",
                format!("HTTP {}", resp.status()),
            ));
        }
        Ok(())
    }
}

impl NetworkDevice for ZyxelWebDevice {
    fn connect(&mut self) -> Result<(), FleetConfError> {
        let host = self.config.host.clone();
        let port = self.config.port;
        let username = self.config.username.clone();
        let password = self.config.password.clone().unwrap_or_default();
        let timeout = self.config.timeout;

        with_retry(RetryPolicy::connect(), "zyxel-web connect", || {
            info!(device_id = %self.config.device_id, %host, "connecting to GS1900 (ssh reads, web writes)");
            let ssh = ZyxelSsh::connect(&host, port, &username, &password)?;
            let client = Client::builder().timeout(timeout).cookie_store(true).build()?;
            self.ssh = Some(ssh);
            self.http = Some(client);
            self.web_login()?;
            Ok(())
        })
    }

    fn disconnect(&mut self) -> Result<(), FleetConfError> {
        self.ssh = None;
        self.http = None;
        Ok(())
    }

    fn health_check(&mut self) -> Result<bool, FleetConfError> {
        self.execute("show version").map(|_| true)
    }

    fn execute(&mut self, command: &str) -> Result<String, FleetConfError> {
        with_retry(RetryPolicy::command(), "zyxel-web execute", || self.ssh()?.exec(command))
    }

    fn execute_batch(
        &mut self,
        _commands: &[String],
        _stop_on_error: bool,
    ) -> Result<Vec<crate::command_result::CommandResult>, FleetConfError> {
        Err(FleetConfError::UnsupportedOperation(
            "the Zyxel web driver only accepts the single-purpose VLAN/port operations, not raw batches".into(),
        ))
    }

    fn get_vlans(&mut self) -> Result<Vec<NormalizedVlan>, FleetConfError> {
        let output = self.execute("show vlan")?;
        let mut vlans = Vec::new();

        for raw_line in output.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with("VID") || line.starts_with("---") {
                continue;
            }
            let parts: Vec<&str> = line.split('|').map(str::trim).collect();
            if parts.len() < 4 {
                continue;
            }
            let Ok(id) = parts[0].parse::<u16>() else { continue };
            let name = if parts[1].is_empty() { None } else { Some(parts[1].to_string()) };
            let untagged: std::collections::BTreeSet<String> = parse_port_list(parts[2]).into_iter().collect();
            let tagged: std::collections::BTreeSet<String> = parse_port_list(parts[3]).into_iter().collect();

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
        let mut ports = Vec::new();
        for port_num in 1..=26 {
            let output = match self.execute(&format!("show interfaces {port_num}")) {
                Ok(o) => o,
                Err(e) => {
                    warn!(port_num, error = %e, "failed to read GS1900 port status");
                    continue;
                }
            };
            let enabled = PORT_HEADER
                .captures(&output)
                .map(|c| c[1].eq_ignore_ascii_case("up"));
            let speed = SPEED_PATTERN
                .captures(&output)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .and_then(|m| normalize_speed(m.as_str()));

            ports.push(NormalizedPort {
                id: port_num.to_string(),
                enabled,
                speed,
                ..Default::default()
            });
        }
        Ok(ports)
    }

    fn create_vlan(&mut self, vlan: &NormalizedVlan) -> Result<(), FleetConfError> {
        let xssid = self.get_xssid(CMD_VLAN_ADD)?;
        let vlan_name = vlan.name.clone().unwrap_or_else(|| format!("VLAN{}", vlan.id));
        let form = [
            ("XSSID", xssid),
            ("vlanlist", vlan.id.to_string()),
            ("vlanAction", "0".to_string()),
            ("name", vlan_name),
            ("cmd", CMD_VLAN_ADD_SUBMIT.to_string()),
            ("sysSubmit", "Apply".to_string()),
        ];
        let resp = self.http()?.post(format!("{}/cgi-bin/dispatcher.cgi", self.base_url)).form(&form).send()?;
        if !resp.status().is_success() {
            return Err(FleetConfError::protocol("vlan create", format!("HTTP {}", resp.status())));
        }
        Ok(())
    }

    fn delete_vlan(&mut self, _vlan_id: u16) -> Result<(), FleetConfError> {
        Err(FleetConfError::UnsupportedOperation(
            "VLAN deletion is not implemented for the Zyxel web CGI driver".into(),
        ))
    }

    fn configure_port(&mut self, port: &NormalizedPort) -> Result<(), FleetConfError> {
        let port_idx = port_index(&port.id)
            .ok_or_else(|| FleetConfError::protocol("configure port", format!("invalid port id: {}", port.id)))?;

        if port.native_vlan.is_some() || port.mode.is_some() {
            let xssid = self.get_xssid(CMD_PORT_VLAN)?;
            let mut form: Vec<(String, String)> = vec![
                ("XSSID".to_string(), xssid),
                ("cmd".to_string(), CMD_PORT_VLAN_SUBMIT.to_string()),
                ("port".to_string(), port.id.clone()),
            ];
            if let Some(pvid) = port.native_vlan {
                form.push(("pvid".to_string(), pvid.to_string()));
            }
            match port.mode {
                Some(PortMode::Trunk) => form.push(("trunk".to_string(), "1".to_string())),
                Some(PortMode::Access) => form.push(("trunk".to_string(), "0".to_string())),
                _ => {}
            }
            let resp = self.http()?.post(format!("{}/cgi-bin/dispatcher.cgi", self.base_url)).form(&form).send()?;
            if !resp.status().is_success() {
                return Err(FleetConfError::protocol("configure port", format!("HTTP {}", resp.status())));
            }
        }

        match (port.mode, port.native_vlan) {
            (Some(PortMode::Access), Some(native_vlan)) => {
                self.set_port_vlan_membership(port_idx, native_vlan, MEMBERSHIP_UNTAGGED)?;
            }
            _ => {
                if let Some(allowed) = &port.allowed_vlans {
                    let membership = if port.mode == Some(PortMode::Trunk) {
                        MEMBERSHIP_TAGGED
                    } else {
                        MEMBERSHIP_UNTAGGED
                    };
                    for vlan_id in allowed {
                        self.set_port_vlan_membership(port_idx, *vlan_id, membership)?;
                    }
                }
            }
        }

        if port.enabled.is_some() {
            debug!(port_id = %port.id, "port enable/disable has no web CGI equivalent on this firmware; ignored");
        }
        Ok(())
    }

    fn save_config(&mut self) -> Result<(), FleetConfError> {
        // The GS1900 web UI auto-persists every successful form submission;
        // there is no separate save step.
        Ok(())
    }

    fn device_id(&self) -> &str {
        &self.config.device_id
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Zyxel
    }
}

fn normalize_speed(raw: &str) -> Option<PortSpeed> {
    match raw.to_uppercase().as_str() {
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
    fn parse_port_list_expands_ranges_and_keeps_lag_entries() {
        assert_eq!(
            parse_port_list("1-4,7,10-12,lag1-2"),
            vec!["1", "2", "3", "4", "7", "10", "11", "12", "lag1", "lag2"]
        );
    }

    #[test]
    fn parse_port_list_handles_dash_placeholder() {
        assert!(parse_port_list("---").is_empty());
    }

    #[test]
    fn port_index_maps_physical_and_lag_ports() {
        assert_eq!(port_index("1"), Some(0));
        assert_eq!(port_index("26"), Some(25));
        assert_eq!(port_index("lag1"), Some(26));
        assert_eq!(port_index("lag8"), Some(33));
        assert_eq!(port_index("27"), None);
    }

    #[test]
    fn encode_password_preserves_length() {
        let encoded = encode_password("hunter2");
        assert_eq!(encoded.len(), 322usize.saturating_sub(7) - 1);
    }

    #[test]
    fn delete_vlan_is_unsupported() {
        let config = DeviceConfig {
            device_id: "zx-web".to_string(),
            device_type: DeviceType::Zyxel,
            ..Default::default()
        };
        let mut device = ZyxelWebDevice::new(config);
        assert!(device.delete_vlan(5).is_err());
    }
}
