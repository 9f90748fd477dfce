//! Job-wide status, log and error files
//!
//! Three append-only files accompany every job:
//!
//! - `<job>.status`: one timestamped line per event, read by the front end
//! - `<job>.log`: detailed diagnostics, tool command lines included
//! - `<job>.err`: short, user-safe failure and warning summaries
//!
//! Writes are best-effort. A failing write is reported through `tracing`
//! and never interrupts the job.

use crate::error::{JobError, Result};
use crate::query::Warning;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Paths of the job-wide files under the job root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFiles {
    pub status: PathBuf,
    pub log: PathBuf,
    pub err: PathBuf,
    pub summary: PathBuf,
    pub manifest: PathBuf,
    pub archive: PathBuf,
}

impl JobFiles {
    pub fn new(job_root: &Path, job_name: &str) -> Self {
        let file = |suffix: &str| job_root.join(format!("{}{}", job_name, suffix));
        Self {
            status: file(".status"),
            log: file(".log"),
            err: file(".err"),
            summary: file(".summary.json"),
            manifest: file(".manifest"),
            archive: file(".tar.gz"),
        }
    }

    /// Auxiliary files appended to the archive after the primary entries
    pub fn auxiliary(&self) -> [&Path; 4] {
        [&self.status, &self.log, &self.err, &self.summary]
    }
}

/// Writer for the job's status, log and error files
pub struct StatusChannel {
    status: Option<Mutex<File>>,
    log: Option<Mutex<File>>,
    err: Option<Mutex<File>>,
}

impl StatusChannel {
    /// Open (or create) the three files for appending
    pub fn open(files: &JobFiles) -> Result<Self> {
        let open = |path: &Path| -> Result<Mutex<File>> {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(Mutex::new)
                .map_err(|e| JobError::setup(path, e))
        };

        Ok(Self {
            status: Some(open(&files.status)?),
            log: Some(open(&files.log)?),
            err: Some(open(&files.err)?),
        })
    }

    /// A channel that drops every message
    pub fn discard() -> Self {
        Self {
            status: None,
            log: None,
            err: None,
        }
    }

    /// Record a status event
    pub fn event(&self, message: &str) {
        Self::append(&self.status, message);
    }

    /// Record a detailed diagnostic in the job log
    pub fn detail(&self, message: &str) {
        Self::append(&self.log, message);
    }

    /// Record a user-facing message in the error file
    pub fn user_error(&self, message: &str) {
        Self::append(&self.err, message);
    }

    /// Record a unit failure in the log and error files
    pub fn unit_failed(&self, index: usize, diagnostic: &str, summary: &str) {
        self.detail(&format!("Query {} failed: {}", index, diagnostic));
        self.user_error(&format!("Query {}: {}", index, summary));
    }

    pub fn unit_warning(&self, index: usize, warning: &Warning) {
        self.detail(&format!("Query {} warning: {}", index, warning.detail));
        self.user_error(&format!("Query {} (warning): {}", index, warning.summary));
    }

    /// Record a job-level warning in the log and error files
    pub fn job_warning(&self, message: &str) {
        self.detail(&format!("Warning: {}", message));
        self.user_error(&format!("Warning: {}", message));
    }

    fn append(target: &Option<Mutex<File>>, message: &str) {
        let Some(file) = target else {
            return;
        };
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let written = match file.lock() {
            Ok(mut file) => writeln!(file, "[{}] {}", timestamp, message),
            Err(_) => return,
        };
        if let Err(e) = written {
            warn!(error = %e, "Failed to write job status line");
        }
    }
}

impl std::fmt::Debug for StatusChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusChannel")
            .field("enabled", &self.status.is_some())
            .finish()
    }
}
