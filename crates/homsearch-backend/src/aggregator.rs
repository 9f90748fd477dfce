//! Manifest and archive assembly
//!
//! The manifest lists one row per succeeded query. The archive holds the
//! manifest, the files it references and the query logs, followed by the
//! job-wide status, log, error and summary files. Failing to add a primary
//! entry aborts archiving; a missing job-wide file is only recorded.

use crate::error::ArchiveError;
use crate::query::{QueryTable, QueryUnit, UnitStatus};
use crate::status::{JobFiles, StatusChannel};
use flate2::write::GzEncoder;
use flate2::Compression;
use homsearch_common::ArtifactKind;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Header line of the manifest
pub const MANIFEST_HEADER: &str = "# Search_results Profile MSA Query neff_file logfile";

/// What the aggregator delivered
#[derive(Debug, Clone)]
pub struct AggregateReport {
    pub manifest_path: PathBuf,
    pub archive_path: PathBuf,
    pub manifest_rows: usize,
    pub archived_files: usize,
    /// Job-wide files that could not be archived
    pub secondary_errors: Vec<String>,
}

/// Builds the manifest and the delivery archive of a job
pub struct ResultAggregator<'a> {
    files: &'a JobFiles,
    status: &'a StatusChannel,
}

impl<'a> ResultAggregator<'a> {
    pub fn new(files: &'a JobFiles, status: &'a StatusChannel) -> Self {
        Self { files, status }
    }

    /// Manifest text for the succeeded units of `table`
    pub fn manifest(table: &QueryTable) -> String {
        let mut text = String::from(MANIFEST_HEADER);
        text.push('\n');
        for unit in table.succeeded() {
            let root = table.job_root();
            let optional = |kind: ArtifactKind| {
                unit.artifact(kind)
                    .map(|path| relative(root, path))
                    .unwrap_or_default()
            };
            let columns = [
                optional(ArtifactKind::Output),
                optional(ArtifactKind::Profile),
                optional(ArtifactKind::Msa),
                relative(root, &unit.input_path),
                optional(ArtifactKind::Neff),
                relative(root, &unit.log_path),
            ];
            let row: Vec<String> = columns.iter().map(|c| format!("\"{}\"", c)).collect();
            text.push_str(&row.join("\t"));
            text.push('\n');
        }
        text
    }

    /// Write the manifest and the archive
    pub fn aggregate(&self, table: &QueryTable) -> Result<AggregateReport, ArchiveError> {
        let manifest = Self::manifest(table);
        fs::write(&self.files.manifest, &manifest).map_err(|source| ArchiveError::Manifest {
            path: self.files.manifest.clone(),
            source,
        })?;
        let manifest_rows = table.succeeded().count();

        let archive_path = self.files.archive.clone();
        let finish_error = |source| ArchiveError::Finish {
            path: archive_path.clone(),
            source,
        };

        let file = File::create(&archive_path).map_err(finish_error)?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let root = table.job_root();
        let prefix = PathBuf::from(table.job_name());
        let mut archived_files = 0;

        let mut add = |builder: &mut tar::Builder<GzEncoder<File>>,
                       path: &Path|
         -> Result<(), ArchiveError> {
            let name = prefix.join(relative(root, path));
            builder
                .append_path_with_name(path, &name)
                .map_err(|source| ArchiveError::Entry {
                    path: path.to_path_buf(),
                    source,
                })?;
            debug!(entry = %name.display(), "Archived");
            archived_files += 1;
            Ok(())
        };

        add(&mut builder, &self.files.manifest)?;
        for unit in table.succeeded() {
            for path in primary_entries(unit) {
                add(&mut builder, &path)?;
            }
        }

        let mut secondary_errors = Vec::new();
        for unit in table.iter().filter(|u| u.status != UnitStatus::Succeeded) {
            if unit.log_path.exists() {
                if let Err(e) = add(&mut builder, &unit.log_path) {
                    secondary_errors.push(e.to_string());
                }
            }
        }
        for path in self.files.auxiliary() {
            if let Err(e) = add(&mut builder, path) {
                secondary_errors.push(e.to_string());
            }
        }

        let encoder = builder.into_inner().map_err(finish_error)?;
        encoder.finish().map_err(finish_error)?;

        for error in &secondary_errors {
            warn!(error = %error, "Job file missing from archive");
            self.status.detail(&format!("Archive: {}", error));
        }

        info!(
            manifest_rows,
            archived_files,
            archive = %archive_path.display(),
            "Results archived"
        );

        Ok(AggregateReport {
            manifest_path: self.files.manifest.clone(),
            archive_path,
            manifest_rows,
            archived_files,
            secondary_errors,
        })
    }
}

/// Files archived for a succeeded unit: artifacts, query input, log
fn primary_entries(unit: &QueryUnit) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = Vec::new();
    for kind in ArtifactKind::all() {
        if let Some(path) = unit.artifact(kind) {
            if !entries.iter().any(|p| p == path) {
                entries.push(path.to_path_buf());
            }
        }
    }
    for path in [&unit.input_path, &unit.log_path] {
        if !entries.contains(path) {
            entries.push(path.clone());
        }
    }
    entries
}

/// `path` relative to `root`, unchanged when outside it
fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
