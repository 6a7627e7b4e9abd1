//! Executes a [`CommandPlan`] against a connected device, classifying
//! failures, attempting best-effort rollback, and writing one audit entry
//! per terminal outcome.

use crate::audit::AuditSink;
use crate::device_connection::NetworkDevice;
use crate::diff;
use crate::model::{AuditEntry, CommandPlan, DiffResult, ExecuteOptions, ExecuteResult};
use chrono::Utc;
use tracing::{info, warn};

/// Executes `plan` against `device`. `diff` is used only to build the
/// human-readable `changes_made`/audit descriptions; the plan itself
/// carries every command actually sent. `config_checksum` is the desired
/// state's checksum, recorded on the audit entry for this run.
pub fn execute(
    device: &mut dyn NetworkDevice,
    plan: &CommandPlan,
    diff: &DiffResult,
    options: &ExecuteOptions,
    audit: Option<&AuditSink>,
    config_checksum: Option<String>,
) -> ExecuteResult {
    if options.dry_run {
        return dry_run(plan, diff);
    }

    let mut result = ExecuteResult {
        dry_run: false,
        ..Default::default()
    };

    let outcome = run_phases(device, plan, options, &mut result);
    if let Err(err) = outcome {
        result.success = false;
        result.error = Some(err);
    }

    if result.error.is_none() {
        result.changes_made = diff::summarize(diff);
        result.success = true;
    }

    write_audit(audit, device.device_id(), options, &result, config_checksum);
    result
}

fn run_phases(
    device: &mut dyn NetworkDevice,
    plan: &CommandPlan,
    options: &ExecuteOptions,
    result: &mut ExecuteResult,
) -> Result<(), String> {
    if !plan.pre_commands.is_empty() {
        info!(count = plan.pre_commands.len(), "executing pre-commands");
        for cmd in &plan.pre_commands {
            result.commands_executed.push(cmd.clone());
            device.execute(cmd).map_err(|e| {
                result.error_context = Some(e.to_string());
                format!("pre-command '{cmd}' failed: {e}")
            })?;
        }
    }

    if !plan.main_commands.is_empty() {
        info!(count = plan.main_commands.len(), "executing main commands");
        result.commands_executed.extend(plan.main_commands.iter().cloned());
        let batch = device.execute_batch(&plan.main_commands, options.stop_on_error);
        match batch {
            Ok(results) => {
                if let Some(failure) = results.iter().find(|r| r.status != crate::command_result::CommandStatus::Success) {
                    result.requires_human_review = results.iter().any(|r| r.status == crate::command_result::CommandStatus::Success);
                    let detail = failure.error.clone().or_else(|| failure.output.clone()).unwrap_or_default();
                    result.error_context = Some(detail.clone());
                    if options.rollback_on_error && !plan.rollback_commands.is_empty() {
                        attempt_rollback(device, plan, result);
                    }
                    return Err(format!("main command batch failed on '{}': {}", failure.command, detail));
                }
            }
            Err(e) => {
                result.requires_human_review = true;
                result.error_context = Some(e.to_string());
                if options.rollback_on_error && !plan.rollback_commands.is_empty() {
                    attempt_rollback(device, plan, result);
                }
                return Err(format!("main command batch failed: {e}"));
            }
        }
    }

    if !plan.post_commands.is_empty() {
        info!(count = plan.post_commands.len(), "executing post-commands");
        for cmd in &plan.post_commands {
            result.commands_executed.push(cmd.clone());
            if let Err(e) = device.execute(cmd) {
                warn!(command = %cmd, error = %e, "post-command failed; downgraded to warning");
            }
        }
    }

    Ok(())
}

fn attempt_rollback(device: &mut dyn NetworkDevice, plan: &CommandPlan, result: &mut ExecuteResult) {
    warn!("attempting rollback after main-command failure");
    match device.execute_batch(&plan.rollback_commands, false) {
        Ok(_) => {
            result.rollback_performed = true;
            result.recovery_attempts.push("rollback successful".to_string());
        }
        Err(e) => {
            result.recovery_attempts.push(format!("rollback failed: {e}"));
        }
    }
}

fn dry_run(plan: &CommandPlan, diff: &DiffResult) -> ExecuteResult {
    let mut commands_executed: Vec<String> = Vec::new();
    for cmd in plan.pre_commands.iter().chain(&plan.main_commands).chain(&plan.post_commands) {
        commands_executed.push(format!("[DRY-RUN] {cmd}"));
    }
    let changes_made = diff::summarize(diff).into_iter().map(|c| format!("[PREVIEW] {c}")).collect();

    ExecuteResult {
        success: true,
        dry_run: true,
        changes_made,
        commands_executed,
        ..Default::default()
    }
}

fn write_audit(
    audit: Option<&AuditSink>,
    device_id: &str,
    options: &ExecuteOptions,
    result: &ExecuteResult,
    config_checksum: Option<String>,
) {
    let Some(audit) = audit else { return };
    let entry = AuditEntry {
        timestamp: Utc::now(),
        device_id: device_id.to_string(),
        operation: "apply_config".to_string(),
        context: options.audit_context.clone(),
        user: options.user.clone().or_else(|| Some("system".to_string())),
        success: result.success,
        changes: result.changes_made.clone(),
        error: result.error.clone(),
        config_checksum,
    };
    if let Err(e) = audit.write(&entry) {
        warn!(error = %e, "failed to write audit entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_result::CommandResult;
    use crate::device_connection::DeviceType;
    use crate::error::FleetConfError;
    use crate::model::{NormalizedPort, NormalizedVlan};

    struct FakeDevice {
        id: String,
        fail_on: Option<String>,
    }

    impl NetworkDevice for FakeDevice {
        fn connect(&mut self) -> Result<(), FleetConfError> {
            Ok(())
        }
        fn disconnect(&mut self) -> Result<(), FleetConfError> {
            Ok(())
        }
        fn health_check(&mut self) -> Result<bool, FleetConfError> {
            Ok(true)
        }
        fn execute(&mut self, command: &str) -> Result<String, FleetConfError> {
            if self.fail_on.as_deref() == Some(command) {
                return Err(FleetConfError::protocol(command, "Invalid input"));
            }
            Ok(String::new())
        }
        fn execute_batch(&mut self, commands: &[String], stop_on_error: bool) -> Result<Vec<CommandResult>, FleetConfError> {
            let mut results = Vec::new();
            let mut failed = false;
            for cmd in commands {
                if failed && stop_on_error {
                    results.push(CommandResult::skipped(self.id.clone(), "brocade".to_string(), cmd.clone()));
                    continue;
                }
                if self.fail_on.as_deref() == Some(cmd.as_str()) {
                    failed = true;
                    results.push(CommandResult::failure(
                        self.id.clone(),
                        "brocade".to_string(),
                        cmd.clone(),
                        "Invalid input".to_string(),
                        Utc::now(),
                        Utc::now(),
                        "Invalid input".to_string(),
                    ));
                } else {
                    results.push(CommandResult::success(self.id.clone(), "brocade".to_string(), cmd.clone(), String::new(), Utc::now(), Utc::now()));
                }
            }
            Ok(results)
        }
        fn get_vlans(&mut self) -> Result<Vec<NormalizedVlan>, FleetConfError> {
            Ok(vec![])
        }
        fn get_ports(&mut self) -> Result<Vec<NormalizedPort>, FleetConfError> {
            Ok(vec![])
        }
        fn create_vlan(&mut self, _vlan: &NormalizedVlan) -> Result<(), FleetConfError> {
            Ok(())
        }
        fn delete_vlan(&mut self, _vlan_id: u16) -> Result<(), FleetConfError> {
            Ok(())
        }
        fn configure_port(&mut self, _port: &NormalizedPort) -> Result<(), FleetConfError> {
            Ok(())
        }
        fn save_config(&mut self) -> Result<(), FleetConfError> {
            Ok(())
        }
        fn device_id(&self) -> &str {
            &self.id
        }
        fn device_type(&self) -> DeviceType {
            DeviceType::Brocade
        }
        fn supports_batch(&self) -> bool {
            true
        }
    }

    #[test]
    fn dry_run_never_touches_device() {
        let plan = CommandPlan {
            main_commands: vec!["vlan 100".to_string()],
            ..Default::default()
        };
        let diff = DiffResult::default();
        let options = ExecuteOptions {
            dry_run: true,
            ..Default::default()
        };
        let result = execute(&mut FakeDevice { id: "br-a".into(), fail_on: None }, &plan, &diff, &options, None, None);
        assert!(result.success);
        assert!(result.dry_run);
        assert_eq!(result.commands_executed, vec!["[DRY-RUN] vlan 100".to_string()]);
    }

    #[test]
    fn main_command_failure_marks_requires_human_review() {
        let plan = CommandPlan {
            main_commands: vec!["vlan 100".to_string(), "bad command".to_string()],
            ..Default::default()
        };
        let diff = DiffResult::default();
        let options = ExecuteOptions::default();
        let mut device = FakeDevice { id: "br-a".into(), fail_on: Some("bad command".to_string()) };
        let result = execute(&mut device, &plan, &diff, &options, None, None);
        assert!(!result.success);
        assert!(result.requires_human_review);
    }

    #[test]
    fn post_command_failure_is_downgraded_to_success() {
        let plan = CommandPlan {
            main_commands: vec!["vlan 100".to_string()],
            post_commands: vec!["write memory".to_string()],
            ..Default::default()
        };
        let diff = DiffResult::default();
        let options = ExecuteOptions::default();
        let mut device = FakeDevice { id: "br-a".into(), fail_on: Some("write memory".to_string()) };
        let result = execute(&mut device, &plan, &diff, &options, None, None);
        assert!(result.success);
    }
}
