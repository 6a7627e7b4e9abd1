use std::io;
use thiserror::Error;

/// Single error type shared across transports, drivers, the config engine and
/// the configuration store. Variants map onto the error taxonomy of the
/// declarative config engine: parse and validation errors never touch a
/// device; transient transport errors are retried by callers; protocol and
/// connection failures are terminal for a single device but never abort a
/// fleet-wide fan-out.
#[derive(Error, Debug)]
pub enum FleetConfError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("SSH error: {0}")]
    SshError(#[from] ssh2::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("System time error: {0}")]
    SystemTimeError(#[from] std::time::SystemTimeError),

    // --- desired-state parsing / validation ---
    #[error("failed to parse desired state: {0}")]
    ParseError(String),

    #[error("desired state failed validation: {}", .0.join("; "))]
    ValidationError(Vec<String>),

    // --- transport / connection ---
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("connection error: failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("authentication failed for user {username}: {reason}")]
    AuthenticationFailed { username: String, reason: String },

    #[error("channel operation failed: {message}")]
    ChannelFailed {
        message: String,
        #[source]
        source: Option<ssh2::Error>,
    },

    #[error("timeout while {action}")]
    Timeout { action: String },

    #[error("a transient transport failure was retried past its attempt budget: {0}")]
    TransientExhausted(String),

    #[error("prompt pattern never matched: {0}")]
    PromptError(String),

    #[error("disconnect error: {0}")]
    DisconnectError(String),

    #[error("write error: {0}")]
    WriteError(String),

    #[error("read error: {0}")]
    ReadError(String),

    #[error("command error: {0}")]
    CommandError(String),

    // --- device protocol / command execution ---
    #[error("device reported a protocol-level error on `{command}`: {output}")]
    ProtocolError { command: String, output: String },

    #[error("device error: {0}")]
    DeviceError(String),

    #[error("unsupported device type: {0}")]
    UnsupportedDevice(String),

    #[error("operation not supported by this device's capability set: {0}")]
    UnsupportedOperation(String),

    #[error("operation was cancelled: {0}")]
    Cancelled(String),

    // --- configuration store ---
    #[error("configuration store error: {0}")]
    StoreError(String),

    #[error("version-control command failed: {0}")]
    GitError(String),

    #[error("no such revision: {0}")]
    RevisionNotFound(String),

    #[error("no desired state saved for device: {0}")]
    NoSuchConfig(String),

    // --- inventory / settings ---
    #[error("inventory error: {0}")]
    InventoryError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("session log error: {0}")]
    SessionLogError(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl FleetConfError {
    pub fn connection_failed(addr: impl Into<String>, err: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source: err,
        }
    }

    pub fn authentication_failed(username: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            username: username.into(),
            reason: reason.into(),
        }
    }

    pub fn channel_failed(message: impl Into<String>, source: Option<ssh2::Error>) -> Self {
        Self::ChannelFailed {
            message: message.into(),
            source,
        }
    }

    pub fn timeout(action: impl Into<String>) -> Self {
        Self::Timeout {
            action: action.into(),
        }
    }

    pub fn protocol(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::ProtocolError {
            command: command.into(),
            output: output.into(),
        }
    }

    /// True for the retryable set defined by the transport failure
    /// classification: connection reset, timeout, EOF, OS-level socket
    /// error. Protocol-level errors are explicitly excluded.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IoError(_)
                | Self::ConnectionError(_)
                | Self::ConnectionFailed { .. }
                | Self::Timeout { .. }
                | Self::ChannelFailed { .. }
        )
    }
}
