//! Homsearch Backend Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Multi-query job distribution and execution for the homology-search service.
//!
//! # Overview
//!
//! A job turns one batch file of queries into one delivery archive:
//!
//! - **Input** ([`input`]): split the batch on `//`, sniff each record's format
//!   and give it its own working directory
//! - **Scheduling** ([`scheduler`]): run query pipelines on a bounded worker
//!   pool under a global CPU budget, largest query first
//! - **Pipeline** ([`pipeline`]): per query, drive the external search and
//!   profile tools through a resumable stage sequence
//! - **Aggregation** ([`aggregator`]): list the succeeded queries in a manifest
//!   and pack everything into `<job>.tar.gz`
//!
//! A failing query never stops its siblings. The job itself fails only when no
//! query could be read, the working directories cannot be created, or no query
//! succeeded.
//!
//! # Example
//!
//! ```no_run
//! use homsearch_backend::{Job, JobConfig};
//! use std::path::Path;
//!
//! # async fn example() -> homsearch_backend::Result<()> {
//! let config = JobConfig::load(None)?;
//! let report = Job::new("job42", "/srv/jobs/job42", config)
//!     .run(Path::new("/srv/uploads/job42.fa"))
//!     .await?;
//! println!("{} queries succeeded", report.schedule.succeeded);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod commands;
pub mod config;
pub mod error;
pub mod input;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod scheduler;
pub mod status;

// Re-export commonly used types
pub use config::JobConfig;
pub use error::{JobError, Result, StageError};
pub use job::{Job, JobReport};
pub use query::{QueryTable, QueryUnit, UnitOutcome, UnitStatus};

use clap::{Parser, Subcommand};
use homsearch_common::Method;
use std::path::PathBuf;

/// Homsearch - homology search job backend
#[derive(Parser, Debug)]
#[command(name = "homsearch")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a batch of queries and archive the results
    Run {
        /// Batch file with queries separated by `//` lines
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving the job's files
        #[arg(short, long)]
        job_root: PathBuf,

        /// Job name, used as the prefix of every file
        #[arg(short, long)]
        name: String,

        /// TOML configuration file
        #[arg(short, long, env = "HOMSEARCH_CONFIG")]
        config: Option<PathBuf>,

        /// CPU budget (overrides the configuration)
        #[arg(long)]
        cpus: Option<usize>,

        /// Profile-construction method: comer or cother
        #[arg(short, long)]
        method: Option<Method>,

        /// Do not draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Split a batch into query directories and list them
    Split {
        /// Batch file with queries separated by `//` lines
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving the query directories
        #[arg(short, long)]
        job_root: PathBuf,

        /// Job name, used as the prefix of every file
        #[arg(short, long)]
        name: String,

        /// TOML configuration file
        #[arg(short, long, env = "HOMSEARCH_CONFIG")]
        config: Option<PathBuf>,

        /// Maximum number of queries to accept
        #[arg(long)]
        max_queries: Option<usize>,
    },
}
