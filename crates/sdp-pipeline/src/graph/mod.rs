//! Task graph runner
//!
//! A [`TaskGraph`] holds named units of work, each with its upstream
//! dependencies and a [`RetryPolicy`]. [`TaskGraph::run_once`] executes every
//! unit whose dependencies have succeeded, concurrently up to a limit, and
//! skips the dependents of any unit that exhausted its retries.
//!
//! Registration rejects duplicate ids and dependencies on ids that are not
//! registered yet, so every graph is acyclic by construction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::stats::UnitStats;

pub mod trigger;

pub use trigger::Trigger;

/// One executable body of work
#[async_trait]
pub trait Stage: Send + Sync {
    async fn run(&self) -> PipelineResult<UnitStats>;
}

struct FnStage<F>(F);

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn() -> BoxFuture<'static, PipelineResult<UnitStats>> + Send + Sync,
{
    async fn run(&self) -> PipelineResult<UnitStats> {
        (self.0)().await
    }
}

/// Wrap a closure returning a boxed future as a [`Stage`]
pub fn stage_fn<F>(f: F) -> Arc<dyn Stage>
where
    F: Fn() -> BoxFuture<'static, PipelineResult<UnitStats>> + Send + Sync + 'static,
{
    Arc::new(FnStage(f))
}

/// Fixed-delay retry budget for a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Single attempt, no retry
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1, Duration::from_secs(60))
    }
}

/// A registered unit
#[derive(Clone)]
pub struct TaskUnit {
    id: String,
    stage: Arc<dyn Stage>,
    depends_on: Vec<String>,
    retry: RetryPolicy,
}

impl TaskUnit {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }
}

impl std::fmt::Debug for TaskUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskUnit")
            .field("id", &self.id)
            .field("depends_on", &self.depends_on)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Final state of a unit within one run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    Succeeded { attempts: u32, stats: UnitStats },
    Failed { attempts: u32, kind: String, error: String },
    /// Not run because an upstream unit did not succeed
    Skipped { blocked_by: String },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            UnitOutcome::Succeeded { .. } => "succeeded",
            UnitOutcome::Failed { .. } => "failed",
            UnitOutcome::Skipped { .. } => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub id: String,
    pub outcome: UnitOutcome,
}

/// Result of one pass over the graph
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Units in registration order
    pub units: Vec<UnitReport>,
}

impl RunReport {
    /// Every unit succeeded
    pub fn is_success(&self) -> bool {
        self.units.iter().all(|u| u.outcome.is_success())
    }

    pub fn outcome(&self, id: &str) -> Option<&UnitOutcome> {
        self.units.iter().find(|u| u.id == id).map(|u| &u.outcome)
    }

    pub fn count(&self, label: &str) -> usize {
        self.units.iter().filter(|u| u.outcome.label() == label).count()
    }

    /// Stats of every succeeded unit folded together
    pub fn total_stats(&self) -> UnitStats {
        let mut total = UnitStats::default();
        for unit in &self.units {
            if let UnitOutcome::Succeeded { stats, .. } = &unit.outcome {
                total.merge(stats);
            }
        }
        total
    }
}

/// Units plus the trigger that fires them
pub struct TaskGraph {
    units: Vec<TaskUnit>,
    trigger: Option<Trigger>,
    max_concurrent_units: usize,
}

impl TaskGraph {
    pub fn new(max_concurrent_units: usize) -> Self {
        Self {
            units: Vec::new(),
            trigger: None,
            max_concurrent_units: max_concurrent_units.max(1),
        }
    }

    /// Register a unit; dependencies must already be registered
    pub fn register_unit(
        &mut self,
        id: impl Into<String>,
        stage: Arc<dyn Stage>,
        depends_on: &[&str],
        retry: RetryPolicy,
    ) -> PipelineResult<()> {
        let id = id.into();
        if self.unit(&id).is_some() {
            return Err(PipelineError::graph(format!("unit '{}' is already registered", id)));
        }

        for dep in depends_on {
            if *dep == id {
                return Err(PipelineError::graph(format!("unit '{}' depends on itself", id)));
            }
            if self.unit(dep).is_none() {
                return Err(PipelineError::graph(format!(
                    "unit '{}' depends on unknown unit '{}'",
                    id, dep
                )));
            }
        }

        self.units.push(TaskUnit {
            id,
            stage,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            retry,
        });
        Ok(())
    }

    /// Attach a cron trigger
    pub fn set_trigger(&mut self, schedule: &str, catchup: bool) -> PipelineResult<()> {
        self.trigger = Some(Trigger::parse(schedule, catchup)?);
        Ok(())
    }

    pub fn trigger(&self) -> Option<&Trigger> {
        self.trigger.as_ref()
    }

    pub fn units(&self) -> &[TaskUnit] {
        &self.units
    }

    pub fn unit(&self, id: &str) -> Option<&TaskUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Execute the whole graph once
    pub async fn run_once(&self) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, units = self.units.len(), "Starting pipeline run");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_units));
        let mut outcomes: HashMap<String, UnitOutcome> = HashMap::new();
        let mut started: HashSet<String> = HashSet::new();
        let mut in_flight: HashMap<Id, String> = HashMap::new();
        let mut running = JoinSet::new();

        loop {
            // Resolve every unit whose dependencies are settled
            let mut progressed = true;
            while progressed {
                progressed = false;
                for unit in &self.units {
                    if started.contains(&unit.id) || outcomes.contains_key(&unit.id) {
                        continue;
                    }
                    if !unit.depends_on.iter().all(|d| outcomes.contains_key(d)) {
                        continue;
                    }

                    if let Some(blocker) = unit
                        .depends_on
                        .iter()
                        .find(|d| !outcomes.get(*d).is_some_and(UnitOutcome::is_success))
                    {
                        warn!(%run_id, unit = %unit.id, blocked_by = %blocker, "Skipping unit, upstream did not succeed");
                        outcomes.insert(
                            unit.id.clone(),
                            UnitOutcome::Skipped {
                                blocked_by: blocker.clone(),
                            },
                        );
                        progressed = true;
                        continue;
                    }

                    started.insert(unit.id.clone());
                    let unit = unit.clone();
                    let semaphore = Arc::clone(&semaphore);
                    let span = info_span!("unit", %run_id, unit = %unit.id);
                    let id = unit.id.clone();
                    let handle = running.spawn(
                        async move {
                            let _permit = semaphore.acquire_owned().await;
                            let outcome = execute_with_retry(&unit).await;
                            (unit.id, outcome)
                        }
                        .instrument(span),
                    );
                    in_flight.insert(handle.id(), id);
                }
            }

            match running.join_next().await {
                Some(joined) => record_joined(&mut outcomes, &mut in_flight, run_id, joined),
                None => break,
            }
        }

        let units = self
            .units
            .iter()
            .map(|u| UnitReport {
                id: u.id.clone(),
                outcome: outcomes.remove(&u.id).unwrap_or_else(|| UnitOutcome::Failed {
                    attempts: 0,
                    kind: "unexpected".to_string(),
                    error: "unit task did not complete".to_string(),
                }),
            })
            .collect();

        let report = RunReport {
            run_id,
            started_at,
            completed_at: Utc::now(),
            units,
        };

        info!(
            %run_id,
            succeeded = report.count("succeeded"),
            failed = report.count("failed"),
            skipped = report.count("skipped"),
            "Pipeline run finished"
        );
        report
    }

    /// Execute a single unit without its dependencies
    pub async fn run_unit(&self, id: &str) -> PipelineResult<UnitReport> {
        let unit = self
            .unit(id)
            .ok_or_else(|| PipelineError::graph(format!("unknown unit '{}'", id)))?;

        let run_id = Uuid::new_v4();
        let span = info_span!("unit", %run_id, unit = %unit.id);
        let outcome = execute_with_retry(unit).instrument(span).await;

        Ok(UnitReport {
            id: unit.id.clone(),
            outcome,
        })
    }
}

/// Record the outcome of a finished unit task.
///
/// A task that died before reporting fails its unit, so dependents are
/// skipped on the next resolution pass.
fn record_joined(
    outcomes: &mut HashMap<String, UnitOutcome>,
    in_flight: &mut HashMap<Id, String>,
    run_id: Uuid,
    joined: Result<(String, UnitOutcome), JoinError>,
) {
    match joined {
        Ok((id, outcome)) => {
            in_flight.retain(|_, unit| *unit != id);
            outcomes.insert(id, outcome);
        },
        Err(e) => {
            let Some(id) = in_flight.remove(&e.id()) else {
                error!(%run_id, error = %e, "Unknown unit task aborted");
                return;
            };
            error!(%run_id, unit = %id, error = %e, "Unit task aborted");
            outcomes.insert(
                id,
                UnitOutcome::Failed {
                    attempts: 0,
                    kind: "unexpected".to_string(),
                    error: e.to_string(),
                },
            );
        },
    }
}

async fn execute_with_retry(unit: &TaskUnit) -> UnitOutcome {
    let attempts = unit.retry.attempts();
    let mut last_error = None;

    for attempt in 1..=attempts {
        info!(attempt, attempts, "Running unit");

        // Panics inside a stage surface as a JoinError and count as a failed attempt.
        // The attempt task stays inside the unit span.
        let stage = Arc::clone(&unit.stage);
        let attempt_task = async move { stage.run().await }.in_current_span();
        let result = match tokio::spawn(attempt_task).await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::from(e)),
        };

        match result {
            Ok(mut stats) => {
                if stats.completed_at.is_none() {
                    stats.complete();
                }
                info!(
                    attempt,
                    rows_extracted = stats.rows_extracted,
                    rows_loaded = stats.rows_loaded,
                    "Unit succeeded"
                );
                return UnitOutcome::Succeeded { attempts: attempt, stats };
            },
            Err(e) => {
                error!(attempt, attempts, kind = e.kind(), error = %e, "Unit attempt failed");
                last_error = Some(e);
                if attempt < attempts {
                    warn!(delay_secs = unit.retry.delay.as_secs_f64(), "Retrying unit");
                    tokio::time::sleep(unit.retry.delay).await;
                }
            },
        }
    }

    let (kind, error) = last_error
        .map(|e| (e.kind().to_string(), e.to_string()))
        .unwrap_or_else(|| ("unexpected".to_string(), "no attempt made".to_string()));
    UnitOutcome::Failed {
        attempts,
        kind,
        error,
    }
}
