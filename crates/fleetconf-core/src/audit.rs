//! Append-only newline-delimited-JSON audit sink (§4.11), rotated at 10 MB
//! with up to 10 numbered backups. Constructed once per process and passed
//! by reference; it retains no global state beyond its open file handle.

use crate::error::FleetConfError;
use crate::model::AuditEntry;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const MAX_BYTES: u64 = 10 * 1024 * 1024;
const MAX_BACKUPS: u32 = 10;

pub struct AuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FleetConfError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Writes `entry` as one NDJSON line, rotating the file first if it has
    /// grown past [`MAX_BYTES`].
    pub fn write(&self, entry: &AuditEntry) -> Result<(), FleetConfError> {
        let mut guard = self.file.lock();
        if guard.metadata()?.len() >= MAX_BYTES {
            drop(guard);
            self.rotate()?;
            guard = self.file.lock();
        }
        let line = serde_json::to_string(entry)?;
        writeln!(guard, "{line}")?;
        guard.flush()?;
        Ok(())
    }

    fn rotate(&self) -> Result<(), FleetConfError> {
        for n in (1..MAX_BACKUPS).rev() {
            let src = self.backup_path(n);
            let dst = self.backup_path(n + 1);
            if src.exists() {
                fs::rename(&src, &dst)?;
            }
        }
        let newest_backup = self.backup_path(1);
        if self.path.exists() {
            fs::rename(&self.path, &newest_backup)?;
        }
        let oldest = self.backup_path(MAX_BACKUPS + 1);
        if oldest.exists() {
            if let Err(e) = fs::remove_file(&oldest) {
                warn!(?e, path = %oldest.display(), "failed to discard oldest audit backup");
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        *self.file.lock() = file;
        Ok(())
    }

    fn backup_path(&self, n: u32) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{n}"));
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn sample_entry(device_id: &str) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            device_id: device_id.to_string(),
            operation: "apply_config".to_string(),
            context: None,
            user: Some("system".to_string()),
            success: true,
            changes: vec!["created VLAN 100".to_string()],
            error: None,
            config_checksum: None,
        }
    }

    #[test]
    fn writes_ndjson_line_per_entry() {
        let dir = tempdir().unwrap();
        let sink = AuditSink::open(dir.path().join("audit.log")).unwrap();
        sink.write(&sample_entry("br-a")).unwrap();
        sink.write(&sample_entry("br-b")).unwrap();

        let contents = fs::read_to_string(dir.path().join("audit.log")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(serde_json::from_str::<AuditEntry>(lines[0]).is_ok());
    }

    #[test]
    fn creates_parent_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested").join("audit.log");
        let sink = AuditSink::open(&nested).unwrap();
        sink.write(&sample_entry("br-a")).unwrap();
        assert!(nested.exists());
    }
}
