//! Per-query pipeline state machine
//!
//! Stages run strictly in order and each one is skipped when it does not
//! apply to the query or when its output already exists on disk, so a rerun
//! over a partially processed directory picks up where the last run stopped.
//!
//! ```text
//! Reformat? -> Search? -> Merge? -> ProfileConstruct -> AuxConstruct? -> ProfileSearch? -> Done
//! ```

use crate::config::{JobConfig, SearchEngine};
use crate::error::StageError;
use crate::input::reformat::a3m_to_aligned_fasta;
use crate::pipeline::tools::{ToolInvocation, ToolRunner};
use crate::query::{QueryUnit, UnitOutcome, UnitReport, Warning};
use crate::status::StatusChannel;
use homsearch_common::{ArtifactKind, QueryFormat};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Reformat,
    Search,
    Merge,
    ProfileConstruct,
    AuxConstruct,
    ProfileSearch,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reformat => "reformat",
            Stage::Search => "search",
            Stage::Merge => "merge",
            Stage::ProfileConstruct => "profile construction",
            Stage::AuxConstruct => "covariance construction",
            Stage::ProfileSearch => "profile search",
            Stage::Done => "done",
        }
    }

    pub fn next(&self) -> Stage {
        match self {
            Stage::Reformat => Stage::Search,
            Stage::Search => Stage::Merge,
            Stage::Merge => Stage::ProfileConstruct,
            Stage::ProfileConstruct => Stage::AuxConstruct,
            Stage::AuxConstruct => Stage::ProfileSearch,
            Stage::ProfileSearch | Stage::Done => Stage::Done,
        }
    }

    /// Whether time spent in the stage counts as search time
    pub fn is_search_phase(&self) -> bool {
        matches!(self, Stage::Search | Stage::Merge | Stage::ProfileSearch)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mutable state of one pipeline execution
struct UnitRun<'a> {
    unit: &'a QueryUnit,
    cpus: usize,
    /// Query fed to the search engines
    working_query: PathBuf,
    /// Alignment profiles are built from
    msa: PathBuf,
    report: UnitReport,
}

/// Executes the stages of a single query
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<JobConfig>,
    runner: Arc<dyn ToolRunner>,
    status: Arc<StatusChannel>,
}

impl Pipeline {
    pub fn new(
        config: Arc<JobConfig>,
        runner: Arc<dyn ToolRunner>,
        status: Arc<StatusChannel>,
    ) -> Self {
        Self {
            config,
            runner,
            status,
        }
    }

    /// Run every applicable stage for `unit` using `cpus` CPUs
    ///
    /// Never returns an error: failures are folded into the outcome.
    #[instrument(skip(self, unit), fields(unit = unit.index, format = %unit.format))]
    pub async fn run(&self, unit: &QueryUnit, cpus: usize) -> UnitOutcome {
        let mut run = UnitRun {
            unit,
            cpus: cpus.max(1),
            working_query: unit.input_path.clone(),
            msa: unit.input_path.clone(),
            report: UnitReport::default(),
        };

        match self.drive(&mut run).await {
            Ok(()) => {
                info!(
                    search_secs = run.report.timing.search.as_secs_f64(),
                    construction_secs = run.report.timing.construction.as_secs_f64(),
                    "Query finished"
                );
                UnitOutcome::Succeeded(run.report)
            },
            Err(e) => {
                warn!(error = %e, "Query failed");
                UnitOutcome::Failed {
                    report: run.report,
                    diagnostic: e.to_string(),
                    summary: e.summary(),
                }
            },
        }
    }

    async fn drive(&self, run: &mut UnitRun<'_>) -> Result<(), StageError> {
        if self.applies(Stage::AuxConstruct, run) {
            let limit = self.config.max_covariance_length;
            if run.unit.query_length > limit {
                return Err(StageError::QueryTooLong {
                    length: run.unit.query_length,
                    limit,
                });
            }
        }

        let mut stage = Stage::Reformat;
        while stage != Stage::Done {
            if self.applies(stage, run) {
                self.status
                    .event(&format!("Query {}: {}", run.unit.index, stage));

                let started = Instant::now();
                let result = self.run_stage(stage, run).await;
                let elapsed = started.elapsed();
                if stage.is_search_phase() {
                    run.report.timing.search += elapsed;
                } else {
                    run.report.timing.construction += elapsed;
                }
                result?;
            }
            stage = stage.next();
        }
        Ok(())
    }

    fn applies(&self, stage: Stage, run: &UnitRun<'_>) -> bool {
        let format = run.unit.format;
        match stage {
            Stage::Reformat => format == QueryFormat::A3m,
            Stage::Search => !format.is_profile() && !self.config.engines.enabled().is_empty(),
            Stage::Merge => !format.is_profile() && run.report.engine_flags.both(),
            Stage::ProfileConstruct => true,
            Stage::AuxConstruct => self.config.method.needs_covariance() && !format.is_profile(),
            Stage::ProfileSearch => self.config.profile_search.database.is_some(),
            Stage::Done => false,
        }
    }

    async fn run_stage(&self, stage: Stage, run: &mut UnitRun<'_>) -> Result<(), StageError> {
        match stage {
            Stage::Reformat => self.reformat(run).await,
            Stage::Search => self.search(run).await,
            Stage::Merge => self.merge(run).await,
            Stage::ProfileConstruct => self.construct_profile(run).await,
            Stage::AuxConstruct => self.construct_covariance(run).await,
            Stage::ProfileSearch => self.search_profile(run).await,
            Stage::Done => Ok(()),
        }
    }

    async fn reformat(&self, run: &mut UnitRun<'_>) -> Result<(), StageError> {
        let output = run.unit.artifact_path(".afa");
        run.working_query = output.clone();
        run.msa = output.clone();

        if output.exists() {
            debug!(path = %output.display(), "Reformatted query exists, skipping");
            return Ok(());
        }

        let text = tokio::fs::read_to_string(&run.unit.input_path)
            .await
            .map_err(|e| StageError::io("Failed to read A3M query", e))?;
        let reformatted = a3m_to_aligned_fasta(&text)?;

        if !reformatted.dropped.is_empty() {
            let count = reformatted.dropped.len();
            run.report.warnings.push(Warning::new(
                format!(
                    "Dropped {} alignment rows with a mismatched column count: {}",
                    count,
                    reformatted.dropped.join(", ")
                ),
                format!(
                    "{} sequences were removed from the input alignment",
                    count
                ),
            ));
        }

        tokio::fs::write(&output, reformatted.fasta)
            .await
            .map_err(|e| StageError::io("Failed to write reformatted query", e))
    }

    async fn search(&self, run: &mut UnitRun<'_>) -> Result<(), StageError> {
        let engines = self.config.engines.enabled();
        let paired = engines.len() > 1;

        for engine in engines {
            let output = engine_output(run.unit, engine, paired);
            if !paired {
                run.msa = output.clone();
            }

            if output.exists() {
                debug!(engine = %engine, "Engine output exists, skipping");
                run.report.engine_flags.set(engine);
                continue;
            }

            let invocation = ToolInvocation::engine_search(
                &self.config,
                engine,
                &run.working_query,
                &output,
                run.cpus,
                &run.unit.log_path,
            );
            self.invoke(&invocation).await?;
            run.report.engine_flags.set(engine);
        }
        Ok(())
    }

    async fn merge(&self, run: &mut UnitRun<'_>) -> Result<(), StageError> {
        let output = run.unit.artifact_path("_result.afa");
        run.msa = output.clone();

        if output.exists() {
            debug!("Merged alignment exists, skipping");
            return Ok(());
        }

        let combined = run.unit.artifact_path("_resultcombined.pwfa");
        let mut contents = Vec::new();
        for engine in SearchEngine::all() {
            let part = engine_output(run.unit, engine, true);
            let bytes = tokio::fs::read(&part)
                .await
                .map_err(|e| StageError::io(format!("Failed to read {} results", engine), e))?;
            contents.extend_from_slice(&bytes);
            if !contents.ends_with(b"\n") {
                contents.push(b'\n');
            }
        }
        tokio::fs::write(&combined, contents)
            .await
            .map_err(|e| StageError::io("Failed to write combined alignments", e))?;

        let invocation =
            ToolInvocation::merge(&self.config, &combined, &output, &run.unit.log_path);
        self.invoke(&invocation).await
    }

    async fn construct_profile(&self, run: &mut UnitRun<'_>) -> Result<(), StageError> {
        if run.unit.format.is_profile() {
            return self.adopt_profile(run).await;
        }

        run.report
            .artifacts
            .insert(ArtifactKind::Msa, run.msa.clone());

        let neff = run.unit.artifact_path(".neff");
        if neff.exists() {
            run.report.artifacts.insert(ArtifactKind::Neff, neff);
        } else {
            let invocation =
                ToolInvocation::neff(&self.config, &run.msa, &neff, &run.unit.log_path);
            match self.invoke(&invocation).await {
                Ok(()) => {
                    run.report.artifacts.insert(ArtifactKind::Neff, neff);
                },
                Err(e) => {
                    warn!(error = %e, "Neff calculation failed");
                    run.report.warnings.push(Warning::new(
                        e.to_string(),
                        "Effective number of sequences could not be calculated",
                    ));
                },
            }
        }

        let profile = run
            .unit
            .artifact_path(&format!(".{}", self.config.method.profile_extension()));
        if !profile.exists() {
            let invocation = ToolInvocation::profile(
                &self.config,
                &run.msa,
                &profile,
                run.cpus,
                &run.unit.log_path,
            );
            self.invoke(&invocation).await?;
        } else {
            debug!("Profile exists, skipping");
        }
        run.report.artifacts.insert(ArtifactKind::Profile, profile);
        Ok(())
    }

    /// Use an uploaded profile, pointing its provenance at the query file
    async fn adopt_profile(&self, run: &mut UnitRun<'_>) -> Result<(), StageError> {
        let method = self.config.method;
        if run.unit.format.profile_method() != Some(method) {
            return Err(StageError::MethodMismatch {
                format: run.unit.format.to_string(),
                method: method.to_string(),
            });
        }

        let input = &run.unit.input_path;
        let output = run
            .unit
            .artifact_path(&format!(".{}", method.profile_extension()));

        let text = tokio::fs::read_to_string(input)
            .await
            .map_err(|e| StageError::io("Failed to read query profile", e))?;
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tokio::fs::write(&output, rewrite_provenance(&text, &file_name))
            .await
            .map_err(|e| StageError::io("Failed to write query profile", e))?;

        run.report.artifacts.insert(ArtifactKind::Profile, output);
        Ok(())
    }

    async fn construct_covariance(&self, run: &mut UnitRun<'_>) -> Result<(), StageError> {
        let output = run.unit.artifact_path(".cov");
        if !output.exists() {
            let invocation = ToolInvocation::covariance(
                &self.config,
                &run.msa,
                &output,
                run.cpus,
                &run.unit.log_path,
            );
            self.invoke(&invocation).await?;
        } else {
            debug!("Covariance file exists, skipping");
        }
        run.report.artifacts.insert(ArtifactKind::Covariance, output);
        Ok(())
    }

    async fn search_profile(&self, run: &mut UnitRun<'_>) -> Result<(), StageError> {
        let Some(database) = self.config.profile_search.database.as_deref() else {
            return Ok(());
        };
        let Some(profile) = run.report.artifacts.get(&ArtifactKind::Profile).cloned() else {
            return Err(StageError::InvalidInput(
                "no profile available for the database search".to_string(),
            ));
        };

        let output = run.unit.artifact_path(".out");
        if !output.exists() {
            let invocation = ToolInvocation::profile_search(
                &self.config,
                &profile,
                database,
                &output,
                run.cpus,
                &run.unit.log_path,
            );
            self.config
                .retry
                .run(invocation.tool.name(), |_| self.invoke(&invocation))
                .await?;
        } else {
            debug!("Profile search results exist, skipping");
        }
        run.report.artifacts.insert(ArtifactKind::Output, output);
        Ok(())
    }

    /// Run a tool and check that it succeeded and produced its outputs
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<(), StageError> {
        let tool = invocation.tool.name();
        debug!(tool, command = %invocation.command_line(), "Running tool");
        self.status.detail(&invocation.command_line());

        let exit = self
            .runner
            .run(invocation)
            .await
            .map_err(|source| StageError::ToolLaunch { tool, source })?;

        if !exit.is_success() {
            return Err(StageError::ToolFailed {
                tool,
                status: exit.describe(),
                command: invocation.command_line(),
            });
        }

        if let Some(missing) = invocation.outputs.iter().find(|p| !p.exists()) {
            return Err(StageError::MissingOutput {
                tool,
                path: missing.clone(),
            });
        }
        Ok(())
    }
}

/// Result file of one engine
fn engine_output(unit: &QueryUnit, engine: SearchEngine, paired: bool) -> PathBuf {
    let extension = if paired { "pwfa" } else { "afa" };
    unit.artifact_path(&format!("_result{}.{}", engine.result_tag(), extension))
}

/// Replace the value of every `FILE:` line with `file_name`
fn rewrite_provenance(profile: &str, file_name: &str) -> String {
    let mut out = String::with_capacity(profile.len());
    for line in profile.lines() {
        if line.trim_start().starts_with("FILE:") {
            out.push_str("FILE: ");
            out.push_str(file_name);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pipeline::tools::{Tool, ToolExit};
    use async_trait::async_trait;
    use homsearch_common::Method;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Creates every declared output unless the tool is scripted to fail
    #[derive(Default)]
    struct ScriptedRunner {
        failing: Vec<Tool>,
        calls: Mutex<Vec<Tool>>,
    }

    #[async_trait]
    impl ToolRunner for ScriptedRunner {
        async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolExit> {
            self.calls.lock().unwrap().push(invocation.tool);
            if self.failing.contains(&invocation.tool) {
                return Ok(ToolExit::failure(1));
            }
            for output in &invocation.outputs {
                std::fs::write(output, format!("{}\n", invocation.tool))?;
            }
            Ok(ToolExit::success())
        }
    }

    fn setup_unit(temp: &TempDir, format: QueryFormat, contents: &str) -> QueryUnit {
        let unit = QueryUnit::new(temp.path(), "job", 0, format, contents.len() as u64, 8);
        std::fs::create_dir_all(&unit.workdir).unwrap();
        std::fs::write(&unit.input_path, contents).unwrap();
        unit
    }

    fn pipeline(config: JobConfig, runner: Arc<ScriptedRunner>) -> Pipeline {
        Pipeline::new(Arc::new(config), runner, Arc::new(StatusChannel::discard()))
    }

    fn config_with_engines(hhblits: bool, hmmer: bool) -> JobConfig {
        let mut config = JobConfig::default();
        config.engines.hhblits.enabled = hhblits;
        config.engines.hhblits.database = PathBuf::from("/db/uc30");
        config.engines.hmmer.enabled = hmmer;
        config.engines.hmmer.database = PathBuf::from("/db/ur50");
        config
    }

    #[test]
    fn test_stage_order() {
        let mut stage = Stage::Reformat;
        let mut seen = vec![stage];
        while stage != Stage::Done {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                Stage::Reformat,
                Stage::Search,
                Stage::Merge,
                Stage::ProfileConstruct,
                Stage::AuxConstruct,
                Stage::ProfileSearch,
                Stage::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_plain_sequence_without_engines() {
        let temp = TempDir::new().unwrap();
        let unit = setup_unit(&temp, QueryFormat::PlainFasta, ">Query_0\nMKVLAAGI\n");
        let runner = Arc::new(ScriptedRunner::default());

        let outcome = pipeline(JobConfig::default(), runner.clone())
            .run(&unit, 2)
            .await;

        assert!(outcome.is_success());
        assert_eq!(*runner.calls.lock().unwrap(), vec![Tool::Neff, Tool::MakePro]);
        let report = outcome.report();
        assert_eq!(report.artifacts[&ArtifactKind::Msa], unit.input_path);
        assert_eq!(
            report.artifacts[&ArtifactKind::Profile],
            unit.artifact_path(".pro")
        );
    }

    #[tokio::test]
    async fn test_two_engines_merge() {
        let temp = TempDir::new().unwrap();
        let unit = setup_unit(&temp, QueryFormat::PlainFasta, ">q\nMKVLAAGI\n");
        let runner = Arc::new(ScriptedRunner::default());

        let outcome = pipeline(config_with_engines(true, true), runner.clone())
            .run(&unit, 1)
            .await;

        assert!(outcome.is_success());
        assert_eq!(
            *runner.calls.lock().unwrap(),
            vec![Tool::Hhblits, Tool::Jackhmmer, Tool::Merge, Tool::Neff, Tool::MakePro]
        );
        assert!(unit.artifact_path("_resultcombined.pwfa").exists());
        assert_eq!(
            outcome.report().artifacts[&ArtifactKind::Msa],
            unit.artifact_path("_result.afa")
        );
        assert!(outcome.report().engine_flags.both());
    }

    #[tokio::test]
    async fn test_existing_engine_output_is_reused() {
        let temp = TempDir::new().unwrap();
        let unit = setup_unit(&temp, QueryFormat::PlainFasta, ">q\nMKVLAAGI\n");
        std::fs::write(unit.artifact_path("_resulthhs.pwfa"), ">q\nMKVLAAGI\n").unwrap();
        let runner = Arc::new(ScriptedRunner::default());

        let outcome = pipeline(config_with_engines(true, true), runner.clone())
            .run(&unit, 1)
            .await;

        assert!(outcome.is_success());
        let calls = runner.calls.lock().unwrap().clone();
        assert!(!calls.contains(&Tool::Hhblits));
        assert_eq!(calls[0], Tool::Jackhmmer);
        assert_eq!(calls[1], Tool::Merge);
    }

    #[tokio::test]
    async fn test_rerun_invokes_nothing() {
        let temp = TempDir::new().unwrap();
        let unit = setup_unit(&temp, QueryFormat::PlainFasta, ">q\nMKVLAAGI\n");
        let mut config = config_with_engines(true, false);
        config.method = Method::Cother;

        let first = Arc::new(ScriptedRunner::default());
        assert!(pipeline(config.clone(), first.clone()).run(&unit, 1).await.is_success());
        assert!(!first.calls.lock().unwrap().is_empty());

        let second = Arc::new(ScriptedRunner::default());
        let outcome = pipeline(config, second.clone()).run(&unit, 1).await;
        assert!(outcome.is_success());
        assert!(second.calls.lock().unwrap().is_empty());
        assert!(outcome.report().artifacts.contains_key(&ArtifactKind::Covariance));
    }

    #[tokio::test]
    async fn test_neff_failure_is_a_warning() {
        let temp = TempDir::new().unwrap();
        let unit = setup_unit(&temp, QueryFormat::PlainFasta, ">q\nMKVLAAGI\n");
        let runner = Arc::new(ScriptedRunner {
            failing: vec![Tool::Neff],
            ..Default::default()
        });

        let outcome = pipeline(JobConfig::default(), runner).run(&unit, 1).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.report().warnings.len(), 1);
        assert!(!outcome.report().artifacts.contains_key(&ArtifactKind::Neff));
    }

    #[tokio::test]
    async fn test_profile_failure_fails_unit() {
        let temp = TempDir::new().unwrap();
        let unit = setup_unit(&temp, QueryFormat::PlainFasta, ">q\nMKVLAAGI\n");
        let runner = Arc::new(ScriptedRunner {
            failing: vec![Tool::MakePro],
            ..Default::default()
        });

        let outcome = pipeline(JobConfig::default(), runner).run(&unit, 1).await;

        match outcome {
            UnitOutcome::Failed {
                report,
                diagnostic,
                summary,
            } => {
                assert!(diagnostic.contains("makepro -i"));
                assert_eq!(summary, "makepro failed to process the query");
                assert!(report.artifacts.contains_key(&ArtifactKind::Neff));
            },
            UnitOutcome::Succeeded(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_covariance_length_limit() {
        let temp = TempDir::new().unwrap();
        let unit = setup_unit(&temp, QueryFormat::PlainFasta, ">q\nMKVLAAGI\n");
        let mut config = JobConfig::default();
        config.method = Method::Cother;
        config.max_covariance_length = 4;
        let runner = Arc::new(ScriptedRunner::default());

        let outcome = pipeline(config, runner.clone()).run(&unit, 1).await;

        assert!(!outcome.is_success());
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_a3m_query_is_reformatted() {
        let temp = TempDir::new().unwrap();
        let unit = setup_unit(
            &temp,
            QueryFormat::A3m,
            ">ss_pred\nCCHH\n>q\nMKVL\n>h1\nMKabVL\n>bad\nMK\n",
        );
        let runner = Arc::new(ScriptedRunner::default());

        let outcome = pipeline(JobConfig::default(), runner).run(&unit, 1).await;

        assert!(outcome.is_success());
        let afa = std::fs::read_to_string(unit.artifact_path(".afa")).unwrap();
        assert_eq!(afa, ">q\nMK--VL\n>h1\nMKabVL\n");
        assert_eq!(outcome.report().warnings.len(), 1);
        assert_eq!(
            outcome.report().artifacts[&ArtifactKind::Msa],
            unit.artifact_path(".afa")
        );
    }

    #[tokio::test]
    async fn test_profile_input_is_adopted() {
        let temp = TempDir::new().unwrap();
        let unit = setup_unit(
            &temp,
            QueryFormat::ComerProfile,
            "COMER profile v2.3\nFILE: /tmp/upload.afa\nLEN: 8\n",
        );
        let runner = Arc::new(ScriptedRunner::default());

        let outcome = pipeline(config_with_engines(true, true), runner.clone())
            .run(&unit, 1)
            .await;

        assert!(outcome.is_success());
        assert!(runner.calls.lock().unwrap().is_empty());
        let profile = std::fs::read_to_string(unit.artifact_path(".pro")).unwrap();
        assert!(profile.contains("FILE: job__0.pro"));
        assert!(!outcome.report().artifacts.contains_key(&ArtifactKind::Msa));
    }

    #[tokio::test]
    async fn test_profile_method_mismatch() {
        let temp = TempDir::new().unwrap();
        let unit = setup_unit(&temp, QueryFormat::CotherProfile, "COTHER profile\nLEN: 8\n");
        let runner = Arc::new(ScriptedRunner::default());

        let outcome = pipeline(JobConfig::default(), runner).run(&unit, 1).await;
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_profile_search_retries() {
        let temp = TempDir::new().unwrap();
        let unit = setup_unit(&temp, QueryFormat::PlainFasta, ">q\nMKVLAAGI\n");
        let mut config = JobConfig::default();
        config.profile_search.database = Some(PathBuf::from("/db/pdb70"));
        config.retry.backoff_ms = 0;
        let runner = Arc::new(ScriptedRunner {
            failing: vec![Tool::Comer],
            ..Default::default()
        });

        let outcome = pipeline(config, runner.clone()).run(&unit, 1).await;

        assert!(!outcome.is_success());
        let comer_calls = runner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|t| **t == Tool::Comer)
            .count();
        assert_eq!(comer_calls, 3);
    }
}
