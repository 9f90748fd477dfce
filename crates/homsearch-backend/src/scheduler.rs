//! Worker-pool scheduling of query pipelines
//!
//! The job's CPU budget is split either into one worker using every CPU (few
//! queries) or into one single-CPU worker per CPU (many queries). Queries are
//! launched largest first and a new one starts as soon as any running query
//! finishes. Outcomes are folded into the [`QueryTable`] by a single harvesting
//! loop, which is the only place the table and the counters change.

use crate::config::JobConfig;
use crate::error::StageError;
use crate::pipeline::{Pipeline, ToolRunner};
use crate::progress;
use crate::query::{PhaseTiming, QueryTable, UnitOutcome, UnitReport, UnitStatus};
use crate::status::StatusChannel;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::ProgressBar;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{error, info, warn};

/// Split of the CPU budget into concurrent workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPlan {
    pub workers: usize,
    pub cpus_per_worker: usize,
}

impl WorkerPlan {
    /// `(1, cpus)` for up to `multicore_threshold` queries, else `(cpus, 1)`
    pub fn for_units(units: usize, cpus: usize, multicore_threshold: usize) -> Self {
        let cpus = cpus.max(1);
        if units <= multicore_threshold {
            Self {
                workers: 1,
                cpus_per_worker: cpus,
            }
        } else {
            Self {
                workers: cpus,
                cpus_per_worker: 1,
            }
        }
    }
}

/// Summary of a scheduling run
#[derive(Debug, Clone)]
pub struct ScheduleReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub plan: WorkerPlan,
    /// Pipeline time summed over all queries
    pub timing: PhaseTiming,
    pub elapsed: Duration,
}

impl ScheduleReport {
    /// At least one query failed
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

type Completion = (usize, Result<UnitOutcome, JoinError>);

/// Runs every pending query of a table through the pipeline
pub struct Scheduler {
    config: Arc<JobConfig>,
    pipeline: Pipeline,
    status: Arc<StatusChannel>,
    progress: ProgressBar,
}

impl Scheduler {
    pub fn new(
        config: Arc<JobConfig>,
        runner: Arc<dyn ToolRunner>,
        status: Arc<StatusChannel>,
    ) -> Self {
        let pipeline = Pipeline::new(config.clone(), runner, status.clone());
        Self {
            config,
            pipeline,
            status,
            progress: progress::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Process every pending unit; afterwards every unit is terminal
    ///
    /// Unit failures are recorded in the table and reported through
    /// [`ScheduleReport::has_failures`]; they never abort scheduling.
    pub async fn run(&self, table: &mut QueryTable) -> ScheduleReport {
        let started = Instant::now();
        let total = table.len();
        let plan = WorkerPlan::for_units(total, self.config.cpus, self.config.multicore_threshold);

        info!(
            queries = total,
            workers = plan.workers,
            cpus_per_worker = plan.cpus_per_worker,
            "Scheduling queries"
        );
        self.status.event(&format!(
            "Queued {} queries: {} worker(s) with {} CPU(s) each",
            total, plan.workers, plan.cpus_per_worker
        ));
        self.progress.set_length(total as u64);

        let mut tally = Tally::new(total);
        let mut queue = table.dispatch_order().into_iter();
        let mut running: FuturesUnordered<BoxFuture<'static, Completion>> = FuturesUnordered::new();

        loop {
            while running.len() < plan.workers {
                let Some(index) = queue.next() else {
                    break;
                };
                match self.launch(table, index, plan.cpus_per_worker) {
                    Ok(Some(task)) => running.push(task),
                    Ok(None) => {},
                    Err(e) => {
                        let diagnostic = format!("Query could not be started: {}", e);
                        let outcome = UnitOutcome::Failed {
                            report: UnitReport::default(),
                            diagnostic,
                            summary: "Query could not be started".to_string(),
                        };
                        self.harvest(table, index, outcome, &mut tally);
                    },
                }
            }

            let Some((index, joined)) = running.next().await else {
                break;
            };
            let outcome = joined.unwrap_or_else(|e| {
                error!(unit = index, error = %e, "Query task terminated abnormally");
                UnitOutcome::Failed {
                    report: UnitReport::default(),
                    diagnostic: format!("Query task terminated abnormally: {}", e),
                    summary: "Query processing was interrupted".to_string(),
                }
            });
            self.harvest(table, index, outcome, &mut tally);
        }

        self.fail_stragglers(table, &mut tally);
        self.progress.finish_with_message("Queries finished");

        let elapsed = started.elapsed();
        info!(
            "Scheduling complete: {} / {} successful in {}",
            tally.succeeded,
            total,
            progress::format_duration(elapsed)
        );
        self.status.event(&format!(
            "Finished: {} of {} queries succeeded",
            tally.succeeded, total
        ));

        ScheduleReport {
            total,
            succeeded: tally.succeeded,
            failed: tally.failed,
            plan,
            timing: tally.timing,
            elapsed,
        }
    }

    /// Prepare the unit's log and spawn its pipeline
    ///
    /// Returns `None` when the unit is no longer pending.
    fn launch(
        &self,
        table: &mut QueryTable,
        index: usize,
        cpus: usize,
    ) -> Result<Option<BoxFuture<'static, Completion>>, StageError> {
        let Some(unit) = table.get(index).cloned() else {
            return Err(StageError::InvalidInput(format!("unknown query {}", index)));
        };

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&unit.log_path)
            .map_err(|e| {
                StageError::io(format!("Failed to open '{}'", unit.log_path.display()), e)
            })?;

        if !table.mark_running(index) {
            warn!(unit = index, status = %unit.status, "Query is not pending, not launching");
            return Ok(None);
        }
        self.status.event(&format!("Query {}: started", index));

        let pipeline = self.pipeline.clone();
        let handle = tokio::spawn(async move { pipeline.run(&unit, cpus).await });
        Ok(Some(async move { (index, handle.await) }.boxed()))
    }

    fn harvest(&self, table: &mut QueryTable, index: usize, outcome: UnitOutcome, tally: &mut Tally) {
        let warnings = outcome.report().warnings.clone();
        let timing = outcome.report().timing;
        let failure = match &outcome {
            UnitOutcome::Failed {
                diagnostic,
                summary,
                ..
            } => Some((diagnostic.clone(), summary.clone())),
            UnitOutcome::Succeeded(_) => None,
        };

        match table.apply(index, outcome) {
            Some(UnitStatus::Succeeded) => tally.succeeded += 1,
            Some(_) => tally.failed += 1,
            None => {
                warn!(unit = index, "Discarding outcome for a query that cannot take it");
                return;
            },
        }
        tally.timing.add(timing);

        for warning in &warnings {
            self.status.unit_warning(index, warning);
        }
        if let Some((diagnostic, summary)) = &failure {
            warn!(unit = index, error = %diagnostic, "Query failed");
            self.status.unit_failed(index, diagnostic, summary);
        }
        self.status
            .event(&format!("Query {}: {}", index, table.get(index).map_or("unknown", |u| u.status.as_str())));

        self.progress.inc(1);
        if let Some(percent) = tally.crossed_boundary() {
            let line = format!(
                "{}% done: {} of {} queries finished ({} succeeded); search {:.0}% / construction {:.0}% of compute time",
                percent,
                tally.finished(),
                tally.total,
                tally.succeeded,
                tally.timing.search_share(),
                100.0 - tally.timing.search_share()
            );
            info!("{}", line);
            self.status.event(&line);
        }
    }

    fn fail_stragglers(&self, table: &mut QueryTable, tally: &mut Tally) {
        let stragglers: Vec<usize> = table
            .iter()
            .filter(|u| !u.status.is_terminal())
            .map(|u| u.index)
            .collect();
        for index in stragglers {
            let diagnostic = "Query was never completed by a worker";
            if table.mark_failed(index, diagnostic, "Query could not be processed") {
                self.status
                    .unit_failed(index, diagnostic, "Query could not be processed");
                tally.failed += 1;
            }
        }
    }
}

/// Counters owned by the harvesting loop
struct Tally {
    total: usize,
    succeeded: usize,
    failed: usize,
    timing: PhaseTiming,
    /// Next 10 % boundary to report
    next_decile: usize,
}

impl Tally {
    fn new(total: usize) -> Self {
        Self {
            total,
            succeeded: 0,
            failed: 0,
            timing: PhaseTiming::default(),
            next_decile: 1,
        }
    }

    fn finished(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Percentage done when one or more 10 % boundaries were crossed
    fn crossed_boundary(&mut self) -> Option<usize> {
        if self.total == 0 {
            return None;
        }
        let percent = self.finished() * 100 / self.total;
        let mut crossed = false;
        while self.next_decile <= 10 && self.next_decile * 10 <= percent {
            self.next_decile += 1;
            crossed = true;
        }
        crossed.then_some(percent)
    }
}
