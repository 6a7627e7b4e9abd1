//! Version control for the configuration store, reached entirely through the
//! `git` binary via subprocess (§9 decision: never link against a library
//! that embeds repository semantics, so the store stays portable and the
//! subprocess boundary stays easy to mock in tests).

use crate::error::FleetConfError;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub author: String,
    pub date: DateTime<Utc>,
    pub message: String,
}

/// Manages git operations for one configuration store's working tree. The
/// repository root is the store's `configs/` directory.
pub struct GitManager {
    repo_path: PathBuf,
}

impl GitManager {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Output, FleetConfError> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.repo_path).args(args);
        debug!(args = ?args, "running git command");
        cmd.output().map_err(FleetConfError::IoError)
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output, FleetConfError> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(FleetConfError::GitError(stderr));
        }
        Ok(output)
    }

    pub fn is_initialized(&self) -> bool {
        self.repo_path.join(".git").exists()
    }

    /// Initializes the repository if it does not already exist, with a
    /// deterministic principal identity and an empty initial commit so the
    /// first real save produces a proper, non-initial commit.
    pub fn init(&self) -> Result<bool, FleetConfError> {
        if self.is_initialized() {
            return Ok(false);
        }

        self.run_checked(&["init"])?;
        self.run_checked(&["config", "user.name", "fleetconf"])?;
        self.run_checked(&["config", "user.email", "fleetconf@local"])?;

        let gitignore = self.repo_path.join(".gitignore");
        std::fs::write(&gitignore, "*.tmp\n*.bak\n")?;

        self.run_checked(&["add", "."])?;
        self.run_checked(&["commit", "-m", "Initial config repository", "--allow-empty"])?;

        info!(path = %self.repo_path.display(), "initialized configuration store repository");
        Ok(true)
    }

    /// Stages `files` (or everything, if empty) and commits. Returns `None`
    /// when there was nothing staged to commit.
    pub fn commit(&self, message: &str, files: &[String]) -> Result<Option<String>, FleetConfError> {
        if !self.is_initialized() {
            self.init()?;
        }

        if files.is_empty() {
            self.run_checked(&["add", "."])?;
        } else {
            for f in files {
                self.run_checked(&["add", f])?;
            }
        }

        let staged = self.run(&["diff", "--cached", "--quiet"])?;
        if staged.status.success() {
            debug!("no staged changes, skipping commit");
            return Ok(None);
        }

        self.run_checked(&["commit", "-m", message])?;
        let rev = self.run_checked(&["rev-parse", "HEAD"])?;
        let hash = String::from_utf8_lossy(&rev.stdout).trim().to_string();
        info!(commit = %hash, "committed configuration change");
        Ok(Some(hash))
    }

    /// Commit history, optionally scoped to a single file, newest first.
    pub fn history(&self, file_path: Option<&str>, limit: u32) -> Result<Vec<CommitInfo>, FleetConfError> {
        if !self.is_initialized() {
            return Ok(Vec::new());
        }

        let format = "%H|%h|%an|%aI|%s";
        let n = format!("-n{limit}");
        let mut args = vec!["log", "--format", format, n.as_str()];
        if let Some(path) = file_path {
            args.push("--");
            args.push(path);
        }

        let output = self.run(&args)?;
        if !output.status.success() {
            return Ok(Vec::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut commits = Vec::new();
        for line in stdout.lines() {
            let parts: Vec<&str> = line.splitn(5, '|').collect();
            if parts.len() < 5 {
                continue;
            }
            match DateTime::parse_from_rfc3339(parts[3]) {
                Ok(date) => commits.push(CommitInfo {
                    hash: parts[0].to_string(),
                    short_hash: parts[1].to_string(),
                    author: parts[2].to_string(),
                    date: date.with_timezone(&Utc),
                    message: parts[4].to_string(),
                }),
                Err(e) => warn!(error = %e, line, "failed to parse commit date"),
            }
        }
        Ok(commits)
    }

    /// Reads a file's contents as of `revision`, or `None` if it did not
    /// exist there.
    pub fn file_at_revision(&self, file_path: &str, revision: &str) -> Result<Option<String>, FleetConfError> {
        if !self.is_initialized() {
            return Ok(None);
        }
        let spec = format!("{revision}:{file_path}");
        let output = self.run(&["show", &spec])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    /// Unified diff between two revisions, optionally scoped to one file.
    pub fn diff(&self, file_path: Option<&str>, rev1: &str, rev2: &str) -> Result<String, FleetConfError> {
        if !self.is_initialized() {
            return Ok(String::new());
        }
        let mut args = vec!["diff", rev1, rev2];
        if let Some(path) = file_path {
            args.push("--");
            args.push(path);
        }
        let output = self.run(&args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub fn default_repo_root(base_dir: &Path) -> PathBuf {
    base_dir.join("configs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    #[test]
    fn init_is_idempotent() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let git = GitManager::new(dir.path());
        assert!(git.init().unwrap());
        assert!(!git.init().unwrap());
        assert!(git.is_initialized());
    }

    #[test]
    fn commit_with_no_staged_changes_is_a_no_op() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let git = GitManager::new(dir.path());
        git.init().unwrap();
        let result = git.commit("nothing to see", &[]).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn commit_and_read_history() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let git = GitManager::new(dir.path());
        git.init().unwrap();

        std::fs::write(dir.path().join("desired-a.yaml"), "device_id: a\n").unwrap();
        let hash = git.commit("[a] test (v1)", &["desired-a.yaml".to_string()]).unwrap();
        assert!(hash.is_some());

        let history = git.history(Some("desired-a.yaml"), 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "[a] test (v1)");

        let content = git.file_at_revision("desired-a.yaml", "HEAD").unwrap();
        assert_eq!(content.as_deref(), Some("device_id: a\n"));
    }
}
