use crate::command_result::CommandResult;
use crate::error::FleetConfError;
use crate::model::{NormalizedPort, NormalizedVlan};
use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::str::FromStr;
use std::time::Duration;

/// Device types understood by the factory and the command generator. This
/// is the union the inventory schema accepts for a device's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Brocade,
    Onti,
    OpenWrt,
    Zyxel,
    ZyxelCli,
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "brocade" => Ok(DeviceType::Brocade),
            "onti" => Ok(DeviceType::Onti),
            "openwrt" => Ok(DeviceType::OpenWrt),
            "zyxel" => Ok(DeviceType::Zyxel),
            "zyxel-cli" | "zyxel_cli" => Ok(DeviceType::ZyxelCli),
            _ => Err(format!("unknown device type: {}", s)),
        }
    }
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceType::Brocade => "brocade",
            DeviceType::Onti => "onti",
            DeviceType::OpenWrt => "openwrt",
            DeviceType::Zyxel => "zyxel",
            DeviceType::ZyxelCli => "zyxel-cli",
        };
        write!(f, "{}", s)
    }
}

/// One inventory entry (§6): everything needed to dial a device and
/// authenticate against it. `password`/`secret` are resolved by the
/// inventory loader from `password_env` before this struct is built; this
/// type never reads the environment itself.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub device_id: String,
    pub device_type: DeviceType,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub secret: Option<String>,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub enable_password_required: bool,
    pub use_scp_workflow: bool,
    pub config_paths: BTreeMap<String, String>,
    pub session_log: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            device_type: DeviceType::Brocade,
            host: String::new(),
            port: 23,
            username: String::new(),
            password: None,
            secret: None,
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_delay: Duration::from_secs(2),
            enable_password_required: false,
            use_scp_workflow: false,
            config_paths: BTreeMap::new(),
            session_log: None,
        }
    }
}

/// The uniform operation set exposed by every device driver (§4.2). A
/// device is a scoped resource: use [`DeviceHandle::acquire`] rather than
/// calling `connect` directly so the connection is always released.
///
/// Callers test capability (`supports_batch`, `supports_scp_workflow`)
/// rather than branching on `device_type()`; the command generator is the
/// one place per-vendor branching is acceptable.
pub trait NetworkDevice: Send {
    fn connect(&mut self) -> Result<(), FleetConfError>;
    fn disconnect(&mut self) -> Result<(), FleetConfError>;

    /// Cheap liveness probe; does not imply the device is ready for
    /// configuration commands.
    fn health_check(&mut self) -> Result<bool, FleetConfError>;

    fn execute(&mut self, command: &str) -> Result<String, FleetConfError>;

    /// Execute a batch of commands. The default implementation falls back
    /// to sequential single-command execution for drivers that do not
    /// support batch transmission; `supports_batch` should be checked by
    /// callers that care about the distinction (e.g. to decide whether a
    /// stop-on-error batch failure leaves later commands unexecuted vs.
    /// simply not attempted).
    fn execute_batch(
        &mut self,
        commands: &[String],
        stop_on_error: bool,
    ) -> Result<Vec<CommandResult>, FleetConfError> {
        let mut results = Vec::with_capacity(commands.len());
        let mut failed = false;
        for command in commands {
            if failed && stop_on_error {
                results.push(CommandResult::skipped(
                    self.device_id().to_string(),
                    self.device_type().to_string(),
                    command.clone(),
                ));
                continue;
            }
            let start = chrono::Utc::now();
            match self.execute(command) {
                Ok(output) => {
                    results.push(CommandResult::success(
                        self.device_id().to_string(),
                        self.device_type().to_string(),
                        command.clone(),
                        output,
                        start,
                        chrono::Utc::now(),
                    ));
                }
                Err(e) => {
                    failed = true;
                    results.push(CommandResult::from_error(
                        self.device_id().to_string(),
                        self.device_type().to_string(),
                        command.clone(),
                        e,
                        start,
                        None,
                    ));
                }
            }
        }
        Ok(results)
    }

    fn get_vlans(&mut self) -> Result<Vec<NormalizedVlan>, FleetConfError>;
    fn get_ports(&mut self) -> Result<Vec<NormalizedPort>, FleetConfError>;
    fn create_vlan(&mut self, vlan: &NormalizedVlan) -> Result<(), FleetConfError>;
    fn delete_vlan(&mut self, vlan_id: u16) -> Result<(), FleetConfError>;
    fn configure_port(&mut self, port: &NormalizedPort) -> Result<(), FleetConfError>;
    fn save_config(&mut self) -> Result<(), FleetConfError>;

    fn get_config_file(&mut self, _remote_path: &str) -> Result<Vec<u8>, FleetConfError> {
        Err(FleetConfError::UnsupportedOperation(
            "get_config_file is not supported by this device".into(),
        ))
    }

    fn put_config_file(
        &mut self,
        _remote_path: &str,
        _contents: &[u8],
    ) -> Result<(), FleetConfError> {
        Err(FleetConfError::UnsupportedOperation(
            "put_config_file is not supported by this device".into(),
        ))
    }

    fn reload_config(&mut self) -> Result<(), FleetConfError> {
        Err(FleetConfError::UnsupportedOperation(
            "reload_config is not supported by this device".into(),
        ))
    }

    fn device_id(&self) -> &str;
    fn device_type(&self) -> DeviceType;

    fn supports_batch(&self) -> bool {
        false
    }

    fn supports_scp_workflow(&self) -> bool {
        false
    }
}

/// Acquire-on-entry, release-on-every-exit wrapper around a device. This is
/// the only sanctioned way to use a [`NetworkDevice`]: the connection is
/// established on acquisition and closed when the handle is dropped,
/// including on every error or panic unwind path.
pub struct DeviceHandle {
    inner: Box<dyn NetworkDevice>,
}

impl DeviceHandle {
    pub fn acquire(mut device: Box<dyn NetworkDevice>) -> Result<Self, FleetConfError> {
        device.connect()?;
        Ok(Self { inner: device })
    }
}

impl std::ops::Deref for DeviceHandle {
    type Target = dyn NetworkDevice;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl std::ops::DerefMut for DeviceHandle {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Err(e) = self.inner.disconnect() {
            tracing::warn!("error disconnecting from {}: {}", self.inner.device_id(), e);
        }
    }
}
