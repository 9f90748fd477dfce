//! Query units and the per-job query table
//!
//! The [`QueryTable`] is a dense arena of [`QueryUnit`]s indexed by their
//! ordinal. Units are created by the segmenter and afterwards change only
//! through [`QueryTable::apply`], which folds a pipeline's [`UnitOutcome`]
//! into the owning unit.

use crate::config::SearchEngine;
use homsearch_common::{ArtifactKind, QueryFormat};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lifecycle state of a query unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Running => "running",
            UnitStatus::Succeeded => "succeeded",
            UnitStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Succeeded | UnitStatus::Failed)
    }

    /// Whether moving to `next` keeps the status monotone
    pub fn can_advance_to(&self, next: UnitStatus) -> bool {
        matches!(
            (*self, next),
            (UnitStatus::Pending, UnitStatus::Running | UnitStatus::Failed)
                | (UnitStatus::Running, UnitStatus::Succeeded | UnitStatus::Failed)
        )
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Non-fatal problem recorded for a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    /// Detailed text for the job log
    pub detail: String,
    /// Short text for the user-facing error file
    pub summary: String,
}

impl Warning {
    pub fn new(detail: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
            summary: summary.into(),
        }
    }
}

/// Error and warning texts accumulated for a unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub error: Option<String>,
    pub error_summary: Option<String>,
    pub warnings: Vec<String>,
    pub warning_summaries: Vec<String>,
}

impl Diagnostics {
    /// Record the failure; the first recorded failure wins
    pub fn set_failure(&mut self, detail: impl Into<String>, summary: impl Into<String>) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(detail.into());
        self.error_summary = Some(summary.into());
        true
    }

    pub fn push_warning(&mut self, warning: Warning) {
        self.warnings.push(warning.detail);
        self.warning_summaries.push(warning.summary);
    }
}

/// Engines that produced output for a unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineFlags {
    pub hhblits: bool,
    pub hmmer: bool,
}

impl EngineFlags {
    pub fn get(&self, engine: SearchEngine) -> bool {
        match engine {
            SearchEngine::Hhblits => self.hhblits,
            SearchEngine::Hmmer => self.hmmer,
        }
    }

    pub fn set(&mut self, engine: SearchEngine) {
        match engine {
            SearchEngine::Hhblits => self.hhblits = true,
            SearchEngine::Hmmer => self.hmmer = true,
        }
    }

    pub fn both(&self) -> bool {
        self.hhblits && self.hmmer
    }

    pub fn merge(&mut self, other: EngineFlags) {
        self.hhblits |= other.hhblits;
        self.hmmer |= other.hmmer;
    }
}

/// Time spent in the two pipeline phases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTiming {
    /// Engine searches, merging and profile-database search
    pub search: Duration,
    /// Reformatting, Neff, profile and covariance construction
    pub construction: Duration,
}

impl PhaseTiming {
    pub fn add(&mut self, other: PhaseTiming) {
        self.search += other.search;
        self.construction += other.construction;
    }

    pub fn total(&self) -> Duration {
        self.search + self.construction
    }

    /// Percentage of the total spent searching, 0 when nothing was timed
    pub fn search_share(&self) -> f64 {
        let total = self.total().as_secs_f64();
        if total > 0.0 {
            self.search.as_secs_f64() * 100.0 / total
        } else {
            0.0
        }
    }
}

/// One independently processed query
#[derive(Debug, Clone)]
pub struct QueryUnit {
    pub index: usize,
    /// `<job>__<index>`, shared by the directory and every file in it
    pub name: String,
    pub format: QueryFormat,
    pub workdir: PathBuf,
    pub input_path: PathBuf,
    /// `<workdir>/<name>` without extension; artifact names derive from it
    pub base_path: PathBuf,
    pub log_path: PathBuf,
    pub size_bytes: u64,
    pub query_length: usize,
    pub status: UnitStatus,
    pub artifacts: BTreeMap<ArtifactKind, PathBuf>,
    pub diagnostics: Diagnostics,
    pub engine_flags: EngineFlags,
    pub timing: PhaseTiming,
}

impl QueryUnit {
    pub fn new(
        job_root: &Path,
        job_name: &str,
        index: usize,
        format: QueryFormat,
        size_bytes: u64,
        query_length: usize,
    ) -> Self {
        let name = unit_name(job_name, index);
        let workdir = job_root.join(&name);
        let base_path = workdir.join(&name);
        let input_path = with_suffix(&base_path, &format!(".{}", format.extension()));
        let log_path = with_suffix(&base_path, ".log");

        Self {
            index,
            name,
            format,
            workdir,
            input_path,
            base_path,
            log_path,
            size_bytes,
            query_length,
            status: UnitStatus::Pending,
            artifacts: BTreeMap::new(),
            diagnostics: Diagnostics::default(),
            engine_flags: EngineFlags::default(),
            timing: PhaseTiming::default(),
        }
    }

    /// Path formed by appending `suffix` to the base path
    pub fn artifact_path(&self, suffix: &str) -> PathBuf {
        with_suffix(&self.base_path, suffix)
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&Path> {
        self.artifacts.get(&kind).map(PathBuf::as_path)
    }
}

/// Directory and file stem of a unit
pub fn unit_name(job_name: &str, index: usize) -> String {
    format!("{}__{}", job_name, index)
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

/// What a pipeline run produced, successful or not
#[derive(Debug, Clone, Default)]
pub struct UnitReport {
    pub artifacts: BTreeMap<ArtifactKind, PathBuf>,
    pub timing: PhaseTiming,
    pub warnings: Vec<Warning>,
    pub engine_flags: EngineFlags,
}

/// Result of one pipeline execution
#[derive(Debug, Clone)]
pub enum UnitOutcome {
    Succeeded(UnitReport),
    Failed {
        /// Artifacts and timing gathered before the failure
        report: UnitReport,
        diagnostic: String,
        summary: String,
    },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Succeeded(_))
    }

    pub fn report(&self) -> &UnitReport {
        match self {
            UnitOutcome::Succeeded(report) | UnitOutcome::Failed { report, .. } => report,
        }
    }
}

/// Dense arena of the job's query units
#[derive(Debug, Clone)]
pub struct QueryTable {
    job_name: String,
    job_root: PathBuf,
    units: Vec<QueryUnit>,
}

impl QueryTable {
    pub fn new(job_name: impl Into<String>, job_root: impl Into<PathBuf>) -> Self {
        Self {
            job_name: job_name.into(),
            job_root: job_root.into(),
            units: Vec::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn job_root(&self) -> &Path {
        &self.job_root
    }

    /// Register the next unit; its index is the current table length
    pub fn push_unit(
        &mut self,
        format: QueryFormat,
        size_bytes: u64,
        query_length: usize,
    ) -> &QueryUnit {
        let index = self.units.len();
        let unit = QueryUnit::new(
            &self.job_root,
            &self.job_name,
            index,
            format,
            size_bytes,
            query_length,
        );
        self.units.push(unit);
        &self.units[index]
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QueryUnit> {
        self.units.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryUnit> {
        self.units.iter()
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status == status).count()
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &QueryUnit> {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Succeeded)
    }

    pub fn all_terminal(&self) -> bool {
        self.units.iter().all(|u| u.status.is_terminal())
    }

    /// Pending unit indices, largest record first, ties by index
    pub fn dispatch_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = self
            .units
            .iter()
            .filter(|u| u.status == UnitStatus::Pending)
            .map(|u| u.index)
            .collect();
        order.sort_by(|&a, &b| {
            self.units[b]
                .size_bytes
                .cmp(&self.units[a].size_bytes)
                .then(a.cmp(&b))
        });
        order
    }

    /// Move a pending unit to Running
    pub fn mark_running(&mut self, index: usize) -> bool {
        self.transition(index, UnitStatus::Running)
    }

    /// Fail a unit outside its pipeline (launch failure, crashed task)
    pub fn mark_failed(&mut self, index: usize, diagnostic: &str, summary: &str) -> bool {
        if !self.transition(index, UnitStatus::Failed) {
            return false;
        }
        if let Some(unit) = self.units.get_mut(index) {
            unit.diagnostics.set_failure(diagnostic, summary);
        }
        true
    }

    /// Fold a pipeline outcome into its unit
    ///
    /// Returns the unit's new status, or `None` if the index is unknown or the
    /// move is not allowed from the unit's current status (a terminal unit, or
    /// a success reported for a unit that never ran).
    pub fn apply(&mut self, index: usize, outcome: UnitOutcome) -> Option<UnitStatus> {
        let unit = self.units.get_mut(index)?;
        let next = if outcome.is_success() {
            UnitStatus::Succeeded
        } else {
            UnitStatus::Failed
        };
        if !unit.status.can_advance_to(next) {
            return None;
        }

        let report = match outcome {
            UnitOutcome::Succeeded(report) => report,
            UnitOutcome::Failed {
                report,
                diagnostic,
                summary,
            } => {
                unit.diagnostics.set_failure(diagnostic, summary);
                report
            },
        };

        unit.artifacts.extend(report.artifacts);
        unit.timing.add(report.timing);
        unit.engine_flags.merge(report.engine_flags);
        for warning in report.warnings {
            unit.diagnostics.push_warning(warning);
        }
        unit.status = next;
        Some(next)
    }

    fn transition(&mut self, index: usize, next: UnitStatus) -> bool {
        match self.units.get_mut(index) {
            Some(unit) if unit.status.can_advance_to(next) => {
                unit.status = next;
                true
            },
            _ => false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn table_with_sizes(sizes: &[u64]) -> QueryTable {
        let mut table = QueryTable::new("job", "/jobs/job");
        for &size in sizes {
            table.push_unit(QueryFormat::PlainFasta, size, 10);
        }
        table
    }

    #[test]
    fn test_unit_paths() {
        let unit = QueryUnit::new(Path::new("/jobs/j1"), "j1", 3, QueryFormat::A3m, 100, 50);
        assert_eq!(unit.name, "j1__3");
        assert_eq!(unit.workdir, PathBuf::from("/jobs/j1/j1__3"));
        assert_eq!(unit.input_path, PathBuf::from("/jobs/j1/j1__3/j1__3.a3m"));
        assert_eq!(unit.log_path, PathBuf::from("/jobs/j1/j1__3/j1__3.log"));
        assert_eq!(
            unit.artifact_path("_resulthhs.afa"),
            PathBuf::from("/jobs/j1/j1__3/j1__3_resulthhs.afa")
        );
    }

    #[test]
    fn test_dispatch_order_largest_first_ties_by_index() {
        let table = table_with_sizes(&[10, 50, 10, 50, 30]);
        assert_eq!(table.dispatch_order(), vec![1, 3, 4, 0, 2]);
    }

    #[test]
    fn test_status_is_monotone() {
        let mut table = table_with_sizes(&[1]);
        assert!(table.mark_running(0));
        assert!(!table.mark_running(0));

        let status = table.apply(0, UnitOutcome::Succeeded(UnitReport::default()));
        assert_eq!(status, Some(UnitStatus::Succeeded));

        assert!(!table.mark_failed(0, "late", "late"));
        assert!(table.apply(0, UnitOutcome::Succeeded(UnitReport::default())).is_none());
        assert_eq!(table.get(0).unwrap().status, UnitStatus::Succeeded);
    }

    #[test]
    fn test_failure_diagnostic_set_once() {
        let mut diagnostics = Diagnostics::default();
        assert!(diagnostics.set_failure("first detail", "first"));
        assert!(!diagnostics.set_failure("second detail", "second"));
        assert_eq!(diagnostics.error_summary.as_deref(), Some("first"));
    }

    #[test]
    fn test_apply_failure_keeps_partial_artifacts_and_warnings() {
        let mut table = table_with_sizes(&[1]);
        table.mark_running(0);

        let mut report = UnitReport::default();
        report
            .artifacts
            .insert(ArtifactKind::Msa, PathBuf::from("/jobs/job/job__0/job__0.afa"));
        report.warnings.push(Warning::new("neff failed", "Neff unavailable"));

        table.apply(
            0,
            UnitOutcome::Failed {
                report,
                diagnostic: "makepro exited with status 1".into(),
                summary: "makepro failed to process the query".into(),
            },
        );

        let unit = table.get(0).unwrap();
        assert_eq!(unit.status, UnitStatus::Failed);
        assert!(unit.artifact(ArtifactKind::Msa).is_some());
        assert_eq!(unit.diagnostics.warnings.len(), 1);
        assert_eq!(
            unit.diagnostics.error_summary.as_deref(),
            Some("makepro failed to process the query")
        );
        assert!(table.all_terminal());
        assert_eq!(table.count(UnitStatus::Failed), 1);
    }

    #[test]
    fn test_pending_unit_can_fail_without_running() {
        let mut table = table_with_sizes(&[1, 2]);
        assert!(table.mark_failed(1, "workdir missing", "Query could not be started"));
        assert_eq!(table.dispatch_order(), vec![0]);
    }

    #[test]
    fn test_apply_success_requires_running() {
        let mut table = table_with_sizes(&[1]);
        assert!(table
            .apply(0, UnitOutcome::Succeeded(UnitReport::default()))
            .is_none());
        assert_eq!(table.get(0).unwrap().status, UnitStatus::Pending);

        let failed = UnitOutcome::Failed {
            report: UnitReport::default(),
            diagnostic: "log could not be opened".to_string(),
            summary: "Query could not be started".to_string(),
        };
        assert_eq!(table.apply(0, failed), Some(UnitStatus::Failed));
    }

    #[test]
    fn test_search_share() {
        let timing = PhaseTiming {
            search: Duration::from_secs(3),
            construction: Duration::from_secs(1),
        };
        assert_eq!(timing.search_share(), 75.0);
        assert_eq!(PhaseTiming::default().search_share(), 0.0);
    }
}
