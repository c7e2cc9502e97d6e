//! Run orchestration: unit discovery, worker pool, progress, summary.

use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::PlannerConfig;
use crate::distance::{DistanceProvider, DistanceStats};
use crate::error::{FailureKind, StoreError, UnitError, UnitFailure, UnitStage};
use crate::model::UnitKey;
use crate::processor::{UnitProcessor, UnitReport, UnitScenario};
use crate::prospect::AdmissionRegistry;
use crate::traits::{RouteStore, StoreConnection};

/// Distributor → agent → dates, in key order.
pub type UnitHierarchy = BTreeMap<String, BTreeMap<String, Vec<chrono::NaiveDate>>>;

pub fn group_units(keys: impl IntoIterator<Item = UnitKey>) -> UnitHierarchy {
    let mut hierarchy = UnitHierarchy::new();
    for key in keys {
        hierarchy
            .entry(key.distributor_id)
            .or_default()
            .entry(key.agent_id)
            .or_default()
            .push(key.date);
    }
    for agents in hierarchy.values_mut() {
        for dates in agents.values_mut() {
            dates.sort();
            dates.dedup();
        }
    }
    hierarchy
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedUnit {
    pub unit: UnitKey,
    pub stage: String,
    pub kind: FailureKind,
    pub error: String,
}

impl From<&UnitError> for FailedUnit {
    fn from(err: &UnitError) -> Self {
        Self {
            unit: err.unit.clone(),
            stage: err.stage.to_string(),
            kind: err.kind(),
            error: err.cause.to_string(),
        }
    }
}

/// End-of-run totals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    pub failures: Vec<FailedUnit>,
    /// Successful units by how they were filled.
    pub scenarios: BTreeMap<UnitScenario, usize>,
    pub prospects_admitted: usize,
    pub stops_written: usize,
    pub distance: DistanceStats,
    pub elapsed_secs: f64,
    #[serde(skip)]
    pub reports: Vec<UnitReport>,
}

impl RunSummary {
    fn record(&mut self, outcome: &Result<UnitReport, UnitError>) {
        self.attempted += 1;
        match outcome {
            Ok(report) => {
                self.succeeded += 1;
                *self.scenarios.entry(report.scenario).or_default() += 1;
                self.prospects_admitted += report.admitted;
                if report.written {
                    self.stops_written += report.rows.len();
                }
            }
            Err(err) => {
                self.failed += 1;
                *self.failures_by_kind.entry(err.kind()).or_default() += 1;
                self.failures.push(FailedUnit::from(err));
            }
        }
    }

    pub fn log(&self) {
        info!(
            attempted = self.attempted,
            succeeded = self.succeeded,
            failed = self.failed,
            prospects_admitted = self.prospects_admitted,
            stops_written = self.stops_written,
            primary_matrices = self.distance.primary,
            fallback_matrices = self.distance.fallback,
            cache_hits = self.distance.cache_hits,
            elapsed_secs = self.elapsed_secs,
            "run finished"
        );
        for (scenario, count) in &self.scenarios {
            info!(?scenario, count, "units by scenario");
        }
        for (kind, count) in &self.failures_by_kind {
            warn!(%kind, count, "failed units");
        }
    }
}

struct Progress {
    total: usize,
    done: usize,
    interval: usize,
    started: Instant,
}

impl Progress {
    fn new(total: usize, interval: usize) -> Self {
        Self {
            total,
            done: 0,
            interval: interval.max(1),
            started: Instant::now(),
        }
    }

    fn tick(&mut self) {
        self.done += 1;
        if self.done % self.interval != 0 && self.done != self.total {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { self.done as f64 / elapsed } else { 0.0 };
        let eta = if rate > 0.0 {
            Duration::from_secs_f64((self.total - self.done) as f64 / rate)
        } else {
            Duration::ZERO
        };
        let percent = (self.done as f64 * 1000.0 / self.total as f64).round() / 10.0;
        info!(
            done = self.done,
            total = self.total,
            percent,
            units_per_sec = (rate * 100.0).round() / 100.0,
            eta_secs = eta.as_secs(),
            "progress"
        );
    }
}

/// Drives a whole run over one store.
pub struct Orchestrator<S: RouteStore + 'static> {
    store: S,
    config: PlannerConfig,
    distances: Arc<DistanceProvider>,
    registry: Arc<AdmissionRegistry>,
}

impl<S: RouteStore + 'static> Orchestrator<S> {
    pub fn new(store: S, config: PlannerConfig, distances: Arc<DistanceProvider>) -> Self {
        Self {
            store,
            config,
            distances,
            registry: Arc::new(AdmissionRegistry::new()),
        }
    }

    pub fn registry(&self) -> Arc<AdmissionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Processes every unit matching the configured filter.
    ///
    /// Only a failure to list units aborts the run; unit failures are counted
    /// in the summary.
    pub fn run(self) -> Result<RunSummary, StoreError> {
        let started = Instant::now();

        let (keys, visited) = {
            let mut conn = self.store.connect()?;
            let keys = conn.unit_keys(&self.config.filter)?;
            let visited = if self.config.exclude_visited {
                conn.visited_prospects()?
            } else {
                HashSet::new()
            };
            (keys, visited)
        };

        let hierarchy = group_units(keys);
        let units: Vec<UnitKey> = hierarchy
            .iter()
            .flat_map(|(distributor, agents)| {
                agents.iter().flat_map(move |(agent, dates)| {
                    dates
                        .iter()
                        .map(move |date| UnitKey::new(distributor.clone(), agent.clone(), *date))
                })
            })
            .collect();
        info!(
            distributors = hierarchy.len(),
            units = units.len(),
            workers = self.config.workers,
            dry_run = self.config.dry_run,
            "starting run"
        );

        let mut summary = RunSummary::default();
        let mut progress = Progress::new(units.len(), self.config.progress_interval);
        let workers = self.config.workers.max(1);
        let processor = Arc::new(UnitProcessor::new(
            self.store,
            &self.config,
            Arc::clone(&self.distances),
            Arc::clone(&self.registry),
            Arc::new(visited),
        ));

        let pool = if workers > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("route-worker-{i}"))
                .build()
                .map_err(|err| {
                    warn!(error = %err, "cannot start worker pool, running sequentially")
                })
                .ok()
        } else {
            None
        };

        match pool {
            None => {
                for unit in &units {
                    let outcome = process_guarded(&processor, unit);
                    summary.record(&outcome);
                    if let Ok(report) = outcome {
                        summary.reports.push(report);
                    }
                    progress.tick();
                }
            }
            Some(pool) => {
                let (tx, rx) = mpsc::channel();
                for unit in units {
                    let tx = tx.clone();
                    let processor = Arc::clone(&processor);
                    pool.spawn(move || {
                        let outcome = process_guarded(&processor, &unit);
                        // The receiver outlives every task.
                        let _ = tx.send(outcome);
                    });
                }
                drop(tx);

                for outcome in rx {
                    summary.record(&outcome);
                    if let Ok(report) = outcome {
                        summary.reports.push(report);
                    }
                    progress.tick();
                }
            }
        }

        summary.reports.sort_by(|a, b| a.unit.cmp(&b.unit));
        summary.failures.sort_by(|a, b| a.unit.cmp(&b.unit));
        summary.distance = self.distances.stats();
        summary.elapsed_secs = started.elapsed().as_secs_f64();
        Ok(summary)
    }
}

/// Turns a panic inside one unit into a failure of that unit only.
fn process_guarded<S: RouteStore>(
    processor: &UnitProcessor<S>,
    unit: &UnitKey,
) -> Result<UnitReport, UnitError> {
    panic::catch_unwind(AssertUnwindSafe(|| processor.process(unit))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(unit = %unit, %message, "unit panicked");
        Err(UnitError::new(unit.clone(), UnitStage::Loaded, UnitFailure::Panic(message)))
    })
}
