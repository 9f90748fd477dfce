//! Common test utilities for homsearch backend integration tests
//!
//! Provides a scripted [`FakeRunner`] standing in for the external tools and a
//! [`TestJob`] fixture owning a temporary job root and batch file.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{FakeRunner, TestJob};
//!
//! #[tokio::test]
//! async fn test_job() {
//!     let fixture = TestJob::new(">q\nMKVL\n");
//!     let runner = FakeRunner::new();
//!     let report = fixture.job(fixture.config(), &runner).run(&fixture.input).await.unwrap();
//!     assert_eq!(report.schedule.succeeded, 1);
//! }
//! ```

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use homsearch_backend::pipeline::{Tool, ToolExit, ToolInvocation, ToolRunner};
use homsearch_backend::{Job, JobConfig};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Name of every test job
pub const JOB_NAME: &str = "job";

/// One recorded tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub tool: Tool,
    /// Unit name derived from the log file (`job__<index>`)
    pub unit: String,
}

/// Tool runner that writes every declared output unless scripted to fail
#[derive(Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<Call>>,
    /// `(tool, unit)` pairs that exit non-zero; `None` fails the tool for every unit
    failures: Vec<(Tool, Option<String>)>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(failures: Vec<(Tool, Option<&str>)>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failures: failures
                .into_iter()
                .map(|(tool, unit)| (tool, unit.map(str::to_string)))
                .collect(),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tools_for(&self, unit: &str) -> Vec<Tool> {
        self.calls()
            .into_iter()
            .filter(|c| c.unit == unit)
            .map(|c| c.tool)
            .collect()
    }

    fn should_fail(&self, tool: Tool, unit: &str) -> bool {
        self.failures
            .iter()
            .any(|(t, u)| *t == tool && u.as_deref().map_or(true, |u| u == unit))
    }
}

#[async_trait]
impl ToolRunner for FakeRunner {
    async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolExit> {
        let unit = invocation
            .log_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.calls.lock().unwrap().push(Call {
            tool: invocation.tool,
            unit: unit.clone(),
        });

        if self.should_fail(invocation.tool, &unit) {
            return Ok(ToolExit::failure(1));
        }
        for output in &invocation.outputs {
            std::fs::write(output, format!("{} output\n", invocation.tool))?;
        }
        Ok(ToolExit::success())
    }
}

/// Temporary job root with a batch file
pub struct TestJob {
    pub dir: TempDir,
    pub root: PathBuf,
    pub input: PathBuf,
}

impl TestJob {
    pub fn new(batch: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("batch.txt");
        std::fs::write(&input, batch).unwrap();
        let root = dir.path().join(JOB_NAME);
        Self { dir, root, input }
    }

    /// Default configuration with a small CPU budget
    pub fn config(&self) -> JobConfig {
        JobConfig {
            cpus: 2,
            ..Default::default()
        }
    }

    pub fn job(&self, config: JobConfig, runner: &Arc<FakeRunner>) -> Job {
        Job::new(JOB_NAME, &self.root, config).with_runner(runner.clone())
    }

    pub fn unit_dir(&self, index: usize) -> PathBuf {
        self.root.join(format!("{}__{}", JOB_NAME, index))
    }

    pub fn job_file(&self, suffix: &str) -> PathBuf {
        self.root.join(format!("{}{}", JOB_NAME, suffix))
    }

    pub fn read(&self, path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }
}

/// Configuration with both search engines enabled
pub fn two_engine_config(mut config: JobConfig) -> JobConfig {
    config.engines.hhblits.enabled = true;
    config.engines.hhblits.database = PathBuf::from("/db/uniclust30");
    config.engines.hmmer.enabled = true;
    config.engines.hmmer.database = PathBuf::from("/db/uniref50");
    config
}

/// Names of the entries in a `.tar.gz` archive
pub fn archive_entries(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}

/// Text of the entry `name` inside a `.tar.gz` archive
pub fn archive_text(path: &Path, name: &str) -> String {
    use std::io::Read;

    let file = std::fs::File::open(path).unwrap();
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.path().unwrap().to_string_lossy() == name {
            let mut text = String::new();
            entry.read_to_string(&mut text).unwrap();
            return text;
        }
    }
    panic!("{} not found in {}", name, path.display());
}
