//! Periodic benchmark round scheduler
//!
//! One round:
//!
//! 1. decide from the results artifact's age whether the benchmark must run,
//! 2. if so, run it to completion (state `Running`), streaming its output,
//! 3. take the artifact's modification time as the round timestamp,
//! 4. recover the raw results, obtain overall scores and ingest both.
//!
//! A failed round is logged and dropped; the loop keeps ticking. The first
//! round after construction always runs the benchmark.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::artifact;
use crate::config::{Config, ScoreSource};
use crate::ingest::{ingest, IngestSummary};
use crate::inventory::Inventory;
use crate::recover::{read_results_file, RawResults};
use crate::runner::{BenchmarkRunner, OutputSink, RunReport};
use crate::scoring::{score, RankedScores};
use crate::store::RecordStore;
use crate::{Error, Result};

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next round, or ingesting
    Idle,
    /// The external benchmark is running
    Running,
}

/// Whether a round runs the benchmark, and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDecision {
    /// First round since start
    ColdStart,
    /// No results artifact on disk
    ArtifactMissing,
    /// Artifact older than the staleness threshold
    ArtifactStale {
        /// Artifact age
        age: Duration,
    },
    /// Artifact recent enough; the benchmark is skipped
    Fresh {
        /// Artifact age
        age: Duration,
    },
}

impl RunDecision {
    /// Whether the benchmark runs.
    #[must_use]
    pub const fn should_run(&self) -> bool {
        !matches!(self, Self::Fresh { .. })
    }
}

/// Decide whether to run the benchmark given the artifact's modification time.
///
/// An artifact dated in the future counts as zero age.
#[must_use]
pub fn staleness_decision(
    modified: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: Duration,
    cold_start: bool,
) -> RunDecision {
    if cold_start {
        return RunDecision::ColdStart;
    }
    let Some(modified) = modified else {
        return RunDecision::ArtifactMissing;
    };
    let age = (now - modified).to_std().unwrap_or(Duration::ZERO);
    if age > threshold {
        RunDecision::ArtifactStale { age }
    } else {
        RunDecision::Fresh { age }
    }
}

/// Inputs of every round.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Inventory file
    pub inventory_path: PathBuf,
    /// Results artifact
    pub results_path: PathBuf,
    /// Where overall scores come from
    pub score_source: ScoreSource,
    /// Computed scores are also written here
    pub score_output_dir: Option<PathBuf>,
    /// Artifact age that triggers a run
    pub staleness_threshold: Duration,
    /// Time between rounds
    pub run_interval: Duration,
    /// Interval check granularity
    pub poll_interval: Duration,
}

impl SchedulerSettings {
    /// Settings taken from a loaded [`Config`].
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            inventory_path: config.inventory_path.clone(),
            results_path: config.results_path.clone(),
            score_source: config.score_source.clone(),
            score_output_dir: config.score_output_dir.clone(),
            staleness_threshold: config.staleness_threshold,
            run_interval: config.run_interval,
            poll_interval: config.poll_interval,
        }
    }
}

/// What one successful round did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Staleness decision
    pub decision: RunDecision,
    /// Benchmark outcome, if it ran
    pub run: Option<RunReport>,
    /// Round timestamp (artifact modification time)
    pub timestamp: DateTime<Utc>,
    /// Rows written
    pub ingest: IngestSummary,
}

/// Drives benchmark rounds against a store.
pub struct Scheduler<R, S> {
    settings: SchedulerSettings,
    runner: R,
    store: S,
    sink: OutputSink,
    state: SchedulerState,
    cold_start: bool,
}

impl<R, S> Scheduler<R, S>
where
    R: BenchmarkRunner,
    S: RecordStore,
{
    /// Create an idle scheduler; its first round is a cold start.
    pub const fn new(settings: SchedulerSettings, runner: R, store: S, sink: OutputSink) -> Self {
        Self {
            settings,
            runner,
            store,
            sink,
            state: SchedulerState::Idle,
            cold_start: true,
        }
    }

    /// Current state.
    pub const fn state(&self) -> SchedulerState {
        self.state
    }

    /// Whether the next round is the cold start.
    pub const fn cold_start(&self) -> bool {
        self.cold_start
    }

    /// The store rounds are ingested into.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Round settings.
    pub const fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Run one round.
    ///
    /// Computed scores are written to the score output directory only after
    /// the round is ingested. The cold-start flag is consumed whether or not the round succeeds.
    ///
    /// # Errors
    ///
    /// Any error before ingestion aborts the round with the store untouched.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let results_path = &self.settings.results_path;
        let decision = staleness_decision(
            artifact::modified_at(results_path)?,
            Utc::now(),
            self.settings.staleness_threshold,
            self.cold_start,
        );
        self.cold_start = false;

        let run = if decision.should_run() {
            info!(?decision, "running benchmark");
            self.state = SchedulerState::Running;
            let outcome = self.runner.run(&self.sink).await;
            self.state = SchedulerState::Idle;
            let report = outcome?;
            if !report.success() {
                warn!(exit_code = ?report.exit_code, "benchmark exited unsuccessfully, ingesting anyway");
            }
            Some(report)
        } else {
            info!(?decision, "results are fresh, skipping benchmark run");
            None
        };

        let timestamp = artifact::modified_at(results_path)?.ok_or_else(|| {
            Error::MissingArtifact(format!("results artifact {} not found", results_path.display()))
        })?;
        let raw = read_results_file(results_path)?;
        let inventory = Inventory::load(&self.settings.inventory_path)?;
        let scores = self.round_scores(&raw)?;

        let summary = ingest(&self.store, &raw, &scores, timestamp, &inventory).await?;
        if let (ScoreSource::Computed(_), Some(dir)) =
            (&self.settings.score_source, &self.settings.score_output_dir)
        {
            artifact::write_score_file(dir, &scores, Utc::now())?;
        }
        Ok(CycleReport {
            decision,
            run,
            timestamp,
            ingest: summary,
        })
    }

    fn round_scores(&self, raw: &RawResults) -> Result<RankedScores> {
        match &self.settings.score_source {
            ScoreSource::Computed(weighting) => score(raw, weighting),
            ScoreSource::Directory(dir) => artifact::read_latest_scores(dir),
        }
    }

    /// Run one round, logging instead of returning its error.
    pub async fn tick(&mut self) -> Option<CycleReport> {
        match self.run_cycle().await {
            Ok(report) => {
                info!(
                    timestamp = %report.timestamp,
                    hosts = report.ingest.hosts(),
                    "round completed"
                );
                Some(report)
            }
            Err(e) if e.is_recoverable() => {
                warn!(error = %e, "round skipped");
                None
            }
            Err(e) => {
                error!(error = %e, "round aborted");
                None
            }
        }
    }

    /// Run a round immediately, then one per run interval, until `shutdown`
    /// resolves. A round in progress always completes.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            interval = ?self.settings.run_interval,
            poll = ?self.settings.poll_interval,
            "scheduler started"
        );

        self.tick().await;
        let mut last_round = Instant::now();

        let mut poll = tokio::time::interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("scheduler stopping");
                    break;
                }
                _ = poll.tick() => {
                    if last_round.elapsed() >= self.settings.run_interval {
                        self.tick().await;
                        last_round = Instant::now();
                    }
                }
            }
        }
    }
}
