pub mod audit;
pub mod buffer_pool;
pub mod channel;
pub mod command_result;
pub mod device_connection;
pub mod device_factory;
pub mod diff;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod generator;
pub mod git;
pub mod inventory;
pub mod logging;
pub mod model;
pub mod parser;
pub mod retry;
pub mod semaphore;
pub mod session_log;
pub mod settings;
pub mod store;
pub mod validator;
pub mod vendor_error_patterns;
pub mod vendors;

// Import lazy_static for common regex patterns
#[macro_use]
extern crate lazy_static;

// Common regex patterns module
pub mod patterns {
    use regex::Regex;

    lazy_static! {
        // Common network device prompt patterns
        pub static ref PROMPT_PATTERN: Regex = Regex::new(r"[>#]$").unwrap();
        pub static ref CONFIG_PROMPT_PATTERN: Regex = Regex::new(r"\(config[^)]*\)#$").unwrap();

        // Common ANSI escape code pattern
        pub static ref ANSI_ESCAPE_PATTERN: Regex = Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").unwrap();

        // Common line ending normalization pattern
        pub static ref CRLF_PATTERN: Regex = Regex::new(r"\r\n").unwrap();

        // Common patterns for parsing command outputs
        pub static ref IP_ADDRESS_PATTERN: Regex = Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap();
        pub static ref MAC_ADDRESS_PATTERN: Regex = Regex::new(r"\b([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})\b").unwrap();

        // Common error patterns
        pub static ref ERROR_PATTERN: Regex = Regex::new(r"(?i)error|invalid|failed|denied|timeout").unwrap();
    }
}

// Re-export core types
pub use audit::AuditSink;
pub use buffer_pool::{BorrowedBuffer, BufferPool};
pub use command_result::{BatchCommandResults, CommandResult, CommandStatus};
pub use device_connection::{DeviceConfig, DeviceHandle, DeviceType, NetworkDevice};
pub use device_factory::DeviceFactory;
pub use error::FleetConfError;
pub use fanout::{FailureStrategy, FanOutConfig, FanOutDispatcher};
pub use inventory::DeviceInventory;
pub use logging::init_logging;
pub use retry::{with_retry, RetryPolicy};
pub use semaphore::{SemaphoreError, SemaphorePermit, TimeoutSemaphore};
pub use settings::{
    get_buffer_setting, get_concurrency_setting, get_network_timeout, get_ssh_timeout, Settings,
};
pub use store::ConfigStore;

// Re-export vendor-specific types
pub use vendors::{BrocadeDevice, OpenWrtDevice, ZyxelCliDevice, ZyxelWebDevice};
