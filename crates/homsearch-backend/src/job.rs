//! Job driver
//!
//! A job segments its batch, schedules every query, writes the summary file
//! and always assembles the manifest and archive before judging the outcome.

use crate::aggregator::{AggregateReport, ResultAggregator};
use crate::config::JobConfig;
use crate::error::{JobError, Result};
use crate::input::InputSegmenter;
use crate::pipeline::{ProcessRunner, ToolRunner};
use crate::progress;
use crate::query::QueryTable;
use crate::scheduler::{ScheduleReport, Scheduler};
use crate::status::{JobFiles, StatusChannel};
use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything a finished job produced
#[derive(Debug)]
pub struct JobReport {
    pub table: QueryTable,
    pub schedule: ScheduleReport,
    pub aggregate: AggregateReport,
    /// Non-fatal job-level warnings, e.g. batch truncation
    pub warnings: Vec<String>,
}

/// Machine-readable summary written to `<job>.summary.json`
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job: String,
    pub finished_at: DateTime<Utc>,
    pub queries: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub truncated: bool,
    pub workers: usize,
    pub cpus_per_worker: usize,
    pub elapsed_secs: f64,
    pub search_secs: f64,
    pub construction_secs: f64,
    pub units: Vec<UnitSummary>,
}

#[derive(Debug, Serialize)]
pub struct UnitSummary {
    pub index: usize,
    pub format: homsearch_common::QueryFormat,
    pub status: crate::query::UnitStatus,
    pub query_length: usize,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl JobSummary {
    fn new(table: &QueryTable, schedule: &ScheduleReport, truncated: bool) -> Self {
        let units = table
            .iter()
            .map(|unit| UnitSummary {
                index: unit.index,
                format: unit.format,
                status: unit.status,
                query_length: unit.query_length,
                error: unit.diagnostics.error_summary.clone(),
                warnings: unit.diagnostics.warning_summaries.clone(),
            })
            .collect();

        Self {
            job: table.job_name().to_string(),
            finished_at: Utc::now(),
            queries: schedule.total,
            succeeded: schedule.succeeded,
            failed: schedule.failed,
            truncated,
            workers: schedule.plan.workers,
            cpus_per_worker: schedule.plan.cpus_per_worker,
            elapsed_secs: schedule.elapsed.as_secs_f64(),
            search_secs: schedule.timing.search.as_secs_f64(),
            construction_secs: schedule.timing.construction.as_secs_f64(),
            units,
        }
    }
}

/// One batch of queries processed under one configuration
pub struct Job {
    name: String,
    root: PathBuf,
    config: Arc<JobConfig>,
    runner: Arc<dyn ToolRunner>,
    progress: ProgressBar,
}

impl Job {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, config: JobConfig) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            config: Arc::new(config),
            runner: Arc::new(ProcessRunner),
            progress: progress::hidden(),
        }
    }

    /// Replace the subprocess runner
    pub fn with_runner(mut self, runner: Arc<dyn ToolRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn files(&self) -> JobFiles {
        JobFiles::new(&self.root, &self.name)
    }

    /// Run the whole job on the batch file at `input`
    pub async fn run(&self, input: &Path) -> Result<JobReport> {
        fs::create_dir_all(&self.root).map_err(|e| JobError::setup(&self.root, e))?;
        let files = self.files();
        let status = Arc::new(StatusChannel::open(&files)?);
        status.event(&format!("Job {} started", self.name));
        info!(job = %self.name, root = %self.root.display(), "Starting job");

        let segmentation = match InputSegmenter::new(&self.config, self.name.as_str(), self.root.as_path())
            .segment_file(input)
        {
            Ok(segmentation) => segmentation,
            Err(e) => {
                error!(error = %e, "Job failed during input processing");
                status.detail(&e.to_string());
                status.user_error(&e.to_string());
                status.event("Job failed");
                return Err(e);
            },
        };
        for warning in &segmentation.warnings {
            status.job_warning(warning);
        }

        let mut table = segmentation.table;
        let schedule = Scheduler::new(self.config.clone(), self.runner.clone(), status.clone())
            .with_progress(self.progress.clone())
            .run(&mut table)
            .await;

        let summary = JobSummary::new(&table, &schedule, segmentation.truncated);
        if let Err(e) = write_summary(&files.summary, &summary) {
            warn!(error = %e, "Failed to write job summary");
            status.detail(&format!("Failed to write job summary: {}", e));
        }

        // The archive carries the status and error files, final lines included
        let all_failed = schedule.succeeded == 0;
        if all_failed {
            status.event("Job failed: no query succeeded");
            status.user_error("None of the queries could be processed");
        } else {
            status.event(&format!(
                "Job finished: {} of {} queries succeeded",
                schedule.succeeded, schedule.total
            ));
        }

        let aggregate = ResultAggregator::new(&files, &status).aggregate(&table)?;

        if all_failed {
            error!(job = %self.name, queries = schedule.total, "No query succeeded");
            return Err(JobError::NoSuccessfulQueries(schedule.total));
        }
        info!(
            job = %self.name,
            succeeded = schedule.succeeded,
            failed = schedule.failed,
            "Job complete"
        );

        Ok(JobReport {
            table,
            schedule,
            aggregate,
            warnings: segmentation.warnings,
        })
    }
}

fn write_summary(path: &Path, summary: &JobSummary) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json)
}
