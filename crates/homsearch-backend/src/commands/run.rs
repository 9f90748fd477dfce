//! `homsearch run` command implementation
//!
//! Processes a whole batch: segmentation, scheduling and archiving.

use crate::config::JobConfig;
use crate::error::Result;
use crate::job::Job;
use crate::progress::{self, format_duration};
use colored::Colorize;
use homsearch_common::Method;
use std::path::PathBuf;

/// Options of a `run` invocation
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub job_root: PathBuf,
    pub name: String,
    pub config: Option<PathBuf>,
    pub cpus: Option<usize>,
    pub method: Option<Method>,
    pub show_progress: bool,
}

/// Load the job configuration and apply command-line overrides
pub fn load_config(
    file: Option<&std::path::Path>,
    cpus: Option<usize>,
    method: Option<Method>,
) -> Result<JobConfig> {
    let mut config = JobConfig::load(file)?;
    if let Some(cpus) = cpus {
        config.cpus = cpus;
    }
    if let Some(method) = method {
        config.method = method;
    }
    config.validate()?;
    Ok(config)
}

/// Run a job
pub async fn run(options: RunOptions) -> Result<()> {
    let config = load_config(options.config.as_deref(), options.cpus, options.method)?;

    let bar = if options.show_progress {
        progress::create_query_progress(0, &format!("Job {}", options.name))
    } else {
        progress::hidden()
    };

    let job = Job::new(options.name.clone(), options.job_root.clone(), config).with_progress(bar);
    let report = job.run(&options.input).await?;

    println!();
    println!("{}", format!("Job {} finished", options.name).green().bold());
    println!(
        "  Queries:   {} succeeded, {} failed",
        report.schedule.succeeded, report.schedule.failed
    );
    println!(
        "  Workers:   {} x {} CPU(s)",
        report.schedule.plan.workers, report.schedule.plan.cpus_per_worker
    );
    println!("  Elapsed:   {}", format_duration(report.schedule.elapsed));
    println!("  Manifest:  {}", report.aggregate.manifest_path.display());
    println!("  Archive:   {}", report.aggregate.archive_path.display());

    for warning in &report.warnings {
        println!("{} {}", "Warning:".yellow(), warning);
    }
    if report.schedule.has_failures() {
        println!(
            "{}",
            "Some queries failed; see the job error file for details".yellow()
        );
    }

    Ok(())
}
