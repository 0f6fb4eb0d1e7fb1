//! Cron trigger
//!
//! Expressions use the six or seven field form of the `cron` crate
//! (`sec min hour day-of-month month day-of-week [year]`), evaluated in UTC.
//! The aliases `@hourly`, `@daily`, `@weekly` and `@monthly` are accepted.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};

/// Upper bound on fire times replayed by one catch-up pass
pub const MAX_CATCHUP_RUNS: usize = 1_000;

fn expand_alias(expression: &str) -> &str {
    match expression {
        "@hourly" => "0 0 * * * *",
        "@daily" | "@midnight" => "0 0 0 * * *",
        "@weekly" => "0 0 0 * * SUN",
        "@monthly" => "0 0 0 1 * *",
        "@yearly" | "@annually" => "0 0 0 1 1 *",
        other => other,
    }
}

/// Recurring schedule plus its catch-up policy
#[derive(Debug, Clone)]
pub struct Trigger {
    expression: String,
    schedule: Schedule,
    catchup: bool,
}

impl Trigger {
    pub fn parse(expression: &str, catchup: bool) -> PipelineResult<Self> {
        let expression = expression.trim();
        let schedule = Schedule::from_str(expand_alias(expression)).map_err(|e| {
            PipelineError::config(format!("invalid schedule '{}': {}", expression, e))
        })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
            catchup,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn catchup(&self) -> bool {
        self.catchup
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Fire times in `(last, now]` that should produce a run.
    ///
    /// Without catch-up, missed fire times collapse into the latest one.
    pub fn due_runs(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let missed: Vec<_> = self
            .schedule
            .after(&last)
            .take_while(|t| *t <= now)
            .take(MAX_CATCHUP_RUNS)
            .collect();

        if self.catchup {
            missed
        } else {
            missed.last().copied().into_iter().collect()
        }
    }

    /// Fire `on_fire` on schedule until `cancel` is triggered.
    ///
    /// The first fire time is the first one after `start`. When a run
    /// overruns one or more fire times, those are replayed (catch-up) or
    /// collapsed into one run.
    pub async fn run<F, Fut>(&self, start: DateTime<Utc>, cancel: CancellationToken, mut on_fire: F)
    where
        F: FnMut(DateTime<Utc>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut last = start;
        info!(schedule = %self.expression, catchup = self.catchup, "Trigger started");

        loop {
            let Some(next) = self.next_after(last) else {
                warn!(schedule = %self.expression, "Schedule has no further fire times");
                break;
            };

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            debug!(next = %next, wait_secs = wait.as_secs(), "Waiting for next fire time");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Trigger cancelled");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let due = self.due_runs(last, Utc::now().max(next));
            for fire_time in &due {
                if cancel.is_cancelled() {
                    break;
                }
                info!(fire_time = %fire_time, "Trigger fired");
                on_fire(*fire_time).await;
            }
            last = due.last().copied().unwrap_or(next);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_daily_fires_at_midnight_utc() {
        let trigger = Trigger::parse("@daily", false).unwrap();
        let next = trigger.next_after(at(2024, 1, 1, 13, 45)).unwrap();
        assert_eq!(next, at(2024, 1, 2, 0, 0));
    }

    #[test]
    fn test_aliases_and_explicit_expressions() {
        assert!(Trigger::parse("@hourly", false).is_ok());
        assert!(Trigger::parse("@weekly", false).is_ok());
        assert!(Trigger::parse("@monthly", true).is_ok());
        assert!(Trigger::parse("0 30 2 * * *", false).is_ok());
        assert!(Trigger::parse("every day", false).is_err());
    }

    #[test]
    fn test_missed_ticks_collapse_without_catchup() {
        let trigger = Trigger::parse("@daily", false).unwrap();
        let due = trigger.due_runs(at(2024, 1, 1, 0, 0), at(2024, 1, 4, 12, 0));
        assert_eq!(due, vec![at(2024, 1, 4, 0, 0)]);
    }

    #[test]
    fn test_missed_ticks_replayed_with_catchup() {
        let trigger = Trigger::parse("@daily", true).unwrap();
        let due = trigger.due_runs(at(2024, 1, 1, 0, 0), at(2024, 1, 4, 12, 0));
        assert_eq!(
            due,
            vec![at(2024, 1, 2, 0, 0), at(2024, 1, 3, 0, 0), at(2024, 1, 4, 0, 0)]
        );
    }

    #[test]
    fn test_nothing_due_before_next_tick() {
        let trigger = Trigger::parse("@daily", true).unwrap();
        assert!(trigger
            .due_runs(at(2024, 1, 1, 0, 0), at(2024, 1, 1, 23, 59))
            .is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let trigger = Trigger::parse("@daily", false).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut fired = 0;
        trigger
            .run(Utc::now(), cancel, |_| {
                fired += 1;
                async {}
            })
            .await;
        assert_eq!(fired, 0);
    }
}
