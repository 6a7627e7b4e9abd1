//! Fleet-wide command fan-out (§5): one logical task per device, run in
//! parallel, bounded by a concurrency semaphore. A single device connection
//! is never shared across threads — each task owns its device end to end.

use crate::command_result::{BatchCommandResults, CommandResult};
use crate::device_connection::{DeviceConfig, DeviceHandle};
use crate::device_factory::DeviceFactory;
use crate::semaphore::TimeoutSemaphore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// How a per-device failure affects the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStrategy {
    /// Keep sending the device's remaining commands even after one fails.
    ContinueOnDevice,
    /// Stop sending further commands to the device where the failure
    /// occurred; other devices are unaffected.
    SkipDevice,
    /// Stop the whole batch: devices not yet started are not dispatched,
    /// and in-flight devices stop after their current command.
    AbortBatch,
}

#[derive(Debug, Clone)]
pub struct FanOutConfig {
    /// Maximum number of device connections open at once.
    pub max_concurrent_devices: usize,
    pub failure_strategy: FailureStrategy,
    /// Fallback command timeout used when a device's own config carries none.
    pub command_timeout: Duration,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrent_devices: 10,
            failure_strategy: FailureStrategy::SkipDevice,
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Dispatches commands across many devices concurrently, one thread per
/// device gated by a shared semaphore (§5's fan-out concurrency cap).
pub struct FanOutDispatcher {
    config: FanOutConfig,
    semaphore: Arc<TimeoutSemaphore>,
}

impl FanOutDispatcher {
    pub fn new() -> Self {
        Self::with_config(FanOutConfig::default())
    }

    pub fn with_config(config: FanOutConfig) -> Self {
        let semaphore = Arc::new(TimeoutSemaphore::new(config.max_concurrent_devices));
        Self { config, semaphore }
    }

    /// Run the same command on every device.
    pub fn execute_command_on_all(
        &self,
        devices: Vec<DeviceConfig>,
        command: &str,
    ) -> BatchCommandResults {
        let device_commands = devices
            .into_iter()
            .map(|d| (d, vec![command.to_string()]))
            .collect();
        self.execute_commands(device_commands)
    }

    /// Run the same ordered list of commands on every device.
    pub fn execute_commands_on_all(
        &self,
        devices: Vec<DeviceConfig>,
        commands: Vec<String>,
    ) -> BatchCommandResults {
        let device_commands = devices.into_iter().map(|d| (d, commands.clone())).collect();
        self.execute_commands(device_commands)
    }

    /// Run a distinct command list per device, in parallel, bounded by the
    /// dispatcher's concurrency cap.
    #[instrument(skip(self, device_commands), level = "debug")]
    pub fn execute_commands(&self, device_commands: Vec<(DeviceConfig, Vec<String>)>) -> BatchCommandResults {
        let mut batch_results = BatchCommandResults::new();
        let abort = Arc::new(AtomicBool::new(false));
        let failed_devices: Arc<Mutex<HashMap<String, ()>>> = Arc::new(Mutex::new(HashMap::new()));
        let mut handles = Vec::with_capacity(device_commands.len());

        for (device_config, commands) in device_commands {
            if self.config.failure_strategy == FailureStrategy::AbortBatch && abort.load(Ordering::SeqCst) {
                debug!(host = %device_config.host, "batch aborted, not dispatching remaining devices");
                continue;
            }

            let semaphore = Arc::clone(&self.semaphore);
            let abort = Arc::clone(&abort);
            let failed_devices = Arc::clone(&failed_devices);
            let failure_strategy = self.config.failure_strategy;
            let command_timeout = self.config.command_timeout;

            let handle = thread::spawn(move || {
                run_device(
                    device_config,
                    commands,
                    semaphore,
                    abort,
                    failed_devices,
                    failure_strategy,
                    command_timeout,
                )
            });
            handles.push(handle);
        }

        for handle in handles {
            match handle.join() {
                Ok(results) => {
                    for result in results {
                        batch_results.add_result(result);
                    }
                }
                Err(panic) => {
                    error!(?panic, "fan-out device task panicked");
                }
            }
        }

        batch_results.complete();
        batch_results
    }
}

impl Default for FanOutDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::too_many_arguments)]
fn run_device(
    device_config: DeviceConfig,
    commands: Vec<String>,
    semaphore: Arc<TimeoutSemaphore>,
    abort: Arc<AtomicBool>,
    failed_devices: Arc<Mutex<HashMap<String, ()>>>,
    failure_strategy: FailureStrategy,
    command_timeout: Duration,
) -> Vec<CommandResult> {
    let host = device_config.host.clone();
    let device_type = device_config.device_type;
    let mut results = Vec::with_capacity(commands.len());

    let permit = match semaphore.acquire_timeout(Some(command_timeout)) {
        Ok(permit) => permit,
        Err(e) => {
            warn!(%host, error = %e, "could not acquire fan-out slot");
            for cmd in commands {
                results.push(CommandResult::failure(
                    host.clone(),
                    device_type.to_string(),
                    cmd,
                    String::new(),
                    Utc::now(),
                    Utc::now(),
                    format!("could not acquire fan-out slot: {e}"),
                ));
            }
            return results;
        }
    };

    let device = DeviceFactory::create_device(device_config);
    let mut handle = match DeviceHandle::acquire(device) {
        Ok(handle) => handle,
        Err(e) => {
            error!(%host, error = %e, "failed to connect to device");
            mark_failed(&failed_devices, &host);
            for cmd in commands {
                results.push(CommandResult::failure(
                    host.clone(),
                    device_type.to_string(),
                    cmd,
                    String::new(),
                    Utc::now(),
                    Utc::now(),
                    format!("failed to connect: {e}"),
                ));
            }
            drop(permit);
            return results;
        }
    };

    let mut device_failed = false;
    for cmd in commands {
        if abort.load(Ordering::SeqCst) {
            results.push(CommandResult::skipped(host.clone(), device_type.to_string(), cmd));
            continue;
        }
        if device_failed && failure_strategy != FailureStrategy::ContinueOnDevice {
            results.push(CommandResult::skipped(host.clone(), device_type.to_string(), cmd));
            continue;
        }

        let start = Utc::now();
        match handle.execute(&cmd) {
            Ok(output) => {
                results.push(CommandResult::success(
                    host.clone(),
                    device_type.to_string(),
                    cmd,
                    output,
                    start,
                    Utc::now(),
                ));
            }
            Err(e) => {
                device_failed = true;
                results.push(CommandResult::from_error(
                    host.clone(),
                    device_type.to_string(),
                    cmd,
                    e,
                    start,
                    None,
                ));
                if failure_strategy == FailureStrategy::AbortBatch {
                    abort.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    if device_failed {
        mark_failed(&failed_devices, &host);
    }

    drop(permit);
    results
}

fn mark_failed(failed_devices: &Arc<Mutex<HashMap<String, ()>>>, host: &str) {
    if let Ok(mut guard) = failed_devices.lock() {
        guard.insert(host.to_string(), ());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = FanOutConfig::default();
        assert_eq!(config.max_concurrent_devices, 10);
        assert_eq!(config.failure_strategy, FailureStrategy::SkipDevice);
        assert_eq!(config.command_timeout, Duration::from_secs(30));
    }

    #[test]
    fn dispatcher_with_no_devices_returns_empty_batch() {
        let dispatcher = FanOutDispatcher::new();
        let results = dispatcher.execute_commands(Vec::new());
        assert_eq!(results.device_count, 0);
        assert_eq!(results.command_count, 0);
    }

    #[test]
    fn dispatcher_reports_connect_failure_as_command_failures() {
        let dispatcher = FanOutDispatcher::with_config(FanOutConfig {
            max_concurrent_devices: 2,
            failure_strategy: FailureStrategy::SkipDevice,
            command_timeout: Duration::from_millis(50),
        });
        let device = DeviceConfig {
            host: "203.0.113.1".to_string(),
            port: 1,
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let results = dispatcher.execute_command_on_all(vec![device], "show version");
        assert_eq!(results.device_count, 1);
        assert_eq!(results.failure_count, 1);
    }
}
