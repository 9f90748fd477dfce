//! External tool invocations
//!
//! A [`ToolInvocation`] is a fully resolved command line plus the outputs the
//! tool must produce. Execution goes through the [`ToolRunner`] trait so the
//! pipeline can be driven by a scripted runner in tests.

use crate::config::{JobConfig, SearchEngine};
use async_trait::async_trait;
use homsearch_common::Method;
use std::ffi::{OsStr, OsString};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// External programs driven by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Hhblits,
    Jackhmmer,
    Merge,
    Neff,
    MakePro,
    MakeCother,
    MakeCov,
    Comer,
    Cother,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Hhblits => "hhblits",
            Tool::Jackhmmer => "jackhmmer",
            Tool::Merge => "merge",
            Tool::Neff => "neff",
            Tool::MakePro => "makepro",
            Tool::MakeCother => "makecother",
            Tool::MakeCov => "makecov",
            Tool::Comer => "comer",
            Tool::Cother => "cother",
        }
    }

    pub fn for_engine(engine: SearchEngine) -> Self {
        match engine {
            SearchEngine::Hhblits => Tool::Hhblits,
            SearchEngine::Hmmer => Tool::Jackhmmer,
        }
    }

    pub fn profile_builder(method: Method) -> Self {
        match method {
            Method::Comer => Tool::MakePro,
            Method::Cother => Tool::MakeCother,
        }
    }

    pub fn profile_search(method: Method) -> Self {
        match method {
            Method::Comer => Tool::Comer,
            Method::Cother => Tool::Cother,
        }
    }

    fn program(&self, config: &JobConfig) -> PathBuf {
        let tools = &config.tools;
        match self {
            Tool::Hhblits => tools.hhblits.clone(),
            Tool::Jackhmmer => tools.jackhmmer.clone(),
            Tool::Merge => tools.merge.clone(),
            Tool::Neff => tools.neff.clone(),
            Tool::MakePro => tools.makepro.clone(),
            Tool::MakeCother => tools.makecother.clone(),
            Tool::MakeCov => tools.makecov.clone(),
            Tool::Comer => tools.comer.clone(),
            Tool::Cother => tools.cother.clone(),
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A resolved command line and its declared outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool: Tool,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Files that must exist after a successful run
    pub outputs: Vec<PathBuf>,
    /// Log file receiving the tool's stdout and stderr
    pub log_path: PathBuf,
}

impl ToolInvocation {
    pub fn new(tool: Tool, config: &JobConfig, log_path: &Path) -> Self {
        Self {
            tool,
            program: tool.program(config),
            args: Vec::new(),
            outputs: Vec::new(),
            log_path: log_path.to_path_buf(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn flag(self, flag: &str, value: impl AsRef<OsStr>) -> Self {
        self.arg(flag).arg(value)
    }

    pub fn output(mut self, path: &Path) -> Self {
        self.outputs.push(path.to_path_buf());
        self
    }

    /// Command line as written to logs
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Engine search of `input` against the engine's database
    pub fn engine_search(
        config: &JobConfig,
        engine: SearchEngine,
        input: &Path,
        output: &Path,
        cpus: usize,
        log_path: &Path,
    ) -> Self {
        let settings = config.engines.get(engine);
        let invocation = Self::new(Tool::for_engine(engine), config, log_path);
        match engine {
            SearchEngine::Hhblits => invocation
                .flag("-i", input)
                .flag("-d", &settings.database)
                .flag("-n", settings.iterations.to_string())
                .flag("-e", settings.evalue.to_string())
                .flag("-maxseq", settings.max_sequences.to_string())
                .flag("-cpu", cpus.to_string())
                .flag("-oa3m", output)
                .flag("-o", "/dev/null")
                .output(output),
            SearchEngine::Hmmer => invocation
                .flag("--cpu", cpus.to_string())
                .flag("-N", settings.iterations.to_string())
                .flag("--incE", settings.evalue.to_string())
                .arg("--noali")
                .flag("-o", "/dev/null")
                .flag("-A", output)
                .arg(input)
                .arg(&settings.database)
                .output(output),
        }
    }

    /// Merge of the two engines' combined alignments
    pub fn merge(config: &JobConfig, combined: &Path, output: &Path, log_path: &Path) -> Self {
        Self::new(Tool::Merge, config, log_path)
            .flag("-i", combined)
            .flag("-o", output)
            .flag("-e", config.merge_evalue().to_string())
            .flag("-N", config.merge_max_sequences().to_string())
            .output(output)
    }

    pub fn neff(config: &JobConfig, msa: &Path, output: &Path, log_path: &Path) -> Self {
        Self::new(Tool::Neff, config, log_path)
            .flag("-i", msa)
            .flag("-o", output)
            .output(output)
    }

    /// Profile construction for the job's method
    pub fn profile(
        config: &JobConfig,
        msa: &Path,
        output: &Path,
        cpus: usize,
        log_path: &Path,
    ) -> Self {
        Self::new(Tool::profile_builder(config.method), config, log_path)
            .flag("-i", msa)
            .flag("-o", output)
            .flag("--cpus", cpus.to_string())
            .output(output)
    }

    pub fn covariance(
        config: &JobConfig,
        msa: &Path,
        output: &Path,
        cpus: usize,
        log_path: &Path,
    ) -> Self {
        Self::new(Tool::MakeCov, config, log_path)
            .flag("-i", msa)
            .flag("-o", output)
            .flag("--cpus", cpus.to_string())
            .output(output)
    }

    /// Search of a profile against the configured profile database
    pub fn profile_search(
        config: &JobConfig,
        profile: &Path,
        database: &Path,
        output: &Path,
        cpus: usize,
        log_path: &Path,
    ) -> Self {
        Self::new(Tool::profile_search(config.method), config, log_path)
            .flag("-i", profile)
            .flag("-d", database)
            .flag("-o", output)
            .flag("-e", config.profile_search.evalue.to_string())
            .flag("--cpus", cpus.to_string())
            .output(output)
    }
}

/// Exit of a finished tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
}

impl ToolExit {
    pub fn success() -> Self {
        Self { code: Some(0) }
    }

    pub fn failure(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match self.code {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        }
    }
}

/// Executes tool invocations
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run the invocation to completion
    ///
    /// An `Err` means the tool could not be started at all.
    async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolExit>;
}

/// Runs tools as subprocesses, appending their output to the unit log
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolExit> {
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&invocation.log_path)?;
        writeln!(log, "$ {}", invocation.command_line())?;

        let stdout = log.try_clone()?;
        let stderr = log;

        let status = tokio::process::Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .status()
            .await?;

        Ok(ToolExit {
            code: status.code(),
        })
    }
}
