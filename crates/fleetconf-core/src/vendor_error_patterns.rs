use crate::device_connection::DeviceType;
use crate::error::FleetConfError;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

lazy_static! {
    /// Brocade FCX error-pattern set (§4.3). A line matching any of these
    /// is an error UNLESS the same line also matches one of
    /// `BROCADE_INFO_PATTERNS` below.
    pub static ref BROCADE_ERROR_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"Invalid input").unwrap(),
        Regex::new(r"Error:").unwrap(),
        Regex::new(r"Error -").unwrap(),
        Regex::new(r"not found").unwrap(),
        Regex::new(r"Please disable").unwrap(),
        Regex::new(r"Please use a different").unwrap(),
        Regex::new(r"cannot ").unwrap(),
        Regex::new(r"denied").unwrap(),
        Regex::new(r"failed").unwrap(),
        Regex::new(r"Incomplete command").unwrap(),
        Regex::new(r"is currently reserved").unwrap(),
    ];

    /// Lines matching one of these are success confirmations that happen
    /// to share keywords with the error set above; they suppress the error
    /// classification only for the line in which they appear.
    pub static ref BROCADE_INFO_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"already a member").unwrap(),
        Regex::new(r"Added (?:un)?tagged port").unwrap(),
        Regex::new(r"Removed (?:un)?tagged port").unwrap(),
    ];

    /// Zyxel GS1900 CLI error patterns, anchored at line start like the
    /// device's own CLI help text is.
    pub static ref ZYXEL_CLI_ERROR_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"^Invalid").unwrap(),
        Regex::new(r"^Unknown command").unwrap(),
        Regex::new(r"^Error[:\s]").unwrap(),
        Regex::new(r"^Incomplete command").unwrap(),
        Regex::new(r"^.*not found").unwrap(),
    ];

    /// Interface-counter lines that share the word "errors" with the error
    /// set above but are not failures.
    pub static ref ZYXEL_CLI_INFO_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"\d+\s+(input\s+)?errors").unwrap(),
        Regex::new(r"errors,").unwrap(),
    ];
}

/// True if `line` is a Zyxel GS1900 CLI error line: it matches an error
/// pattern and does not also match an info pattern (e.g. an interface
/// error counter).
pub fn zyxel_cli_line_is_error(line: &str) -> bool {
    let matches_error = ZYXEL_CLI_ERROR_PATTERNS.iter().any(|p| p.is_match(line));
    if !matches_error {
        return false;
    }
    !ZYXEL_CLI_INFO_PATTERNS.iter().any(|p| p.is_match(line))
}

/// Scans `output` line by line for a Zyxel GS1900 CLI error, returning the
/// first offending line if one is found.
pub fn zyxel_cli_find_error(output: &str) -> Option<String> {
    for line in output.lines() {
        if zyxel_cli_line_is_error(line) {
            return Some(line.trim().to_string());
        }
    }
    None
}

/// True if `line` is a Brocade error line under the rules of §4.3: it
/// matches an error pattern and does not also match an info pattern.
pub fn brocade_line_is_error(line: &str) -> bool {
    let matches_error = BROCADE_ERROR_PATTERNS.iter().any(|p| p.is_match(line));
    if !matches_error {
        return false;
    }
    !BROCADE_INFO_PATTERNS.iter().any(|p| p.is_match(line))
}

/// Scans `output` line by line for a Brocade error, returning the first
/// offending line if one is found.
pub fn brocade_find_error(output: &str) -> Option<String> {
    for line in output.lines() {
        if brocade_line_is_error(line) {
            return Some(line.trim().to_string());
        }
    }
    None
}

/// Checks raw command output against the error patterns for `device_type`
/// and returns the first matching error text, if any. Brocade is scanned
/// line-by-line (to honor the info-pattern suppression rule); other
/// vendors are scanned as a whole block.
pub fn check_for_errors(output: &str, device_type: DeviceType) -> Option<String> {
    match device_type {
        DeviceType::Brocade | DeviceType::Onti => brocade_find_error(output),
        DeviceType::ZyxelCli => zyxel_cli_find_error(output),
        // OpenWrt/ONTI exec and the Zyxel web driver classify failure via
        // exit status / HTTP status instead of scraping text.
        DeviceType::OpenWrt | DeviceType::Zyxel => None,
    }
}

/// Checks command output against device-specific error patterns and
/// converts a match into a protocol-level [`FleetConfError`].
pub fn check_command_output(
    command: &str,
    output: &str,
    device_type: DeviceType,
) -> Result<(), FleetConfError> {
    if let Some(error_match) = check_for_errors(output, device_type) {
        debug!(command, error = %error_match, "device reported a protocol error");
        Err(FleetConfError::protocol(command, error_match))
    } else {
        Ok(())
    }
}
