//! Recurring scheduler.
//!
//! Runs the ingestion cycle on a fixed start-to-start grid: the first
//! cycle fires immediately, then every `interval_minutes`, regardless of
//! how long each cycle took (as long as it finished before the next slot;
//! overrun slots are skipped, never queued). Between cycles the loop
//! sleeps in short polls so a shutdown signal is observed within the poll
//! period rather than at the next cycle boundary.
//!
//! Nothing inside a cycle is fatal: cycle errors are logged and the loop
//! keeps ticking until the shutdown token fires.

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Config, SchedulerConfig};
use crate::coordinator;
use crate::ingest;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct Scheduler {
    interval: Duration,
    poll: std::time::Duration,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Scheduler {
            interval: Duration::minutes(config.interval_minutes as i64),
            poll: std::time::Duration::from_secs(config.poll_seconds),
        }
    }

    /// Runs cycles until the shutdown token fires. In-flight station
    /// tasks of a started cycle run to completion; only new cycles are
    /// prevented.
    pub async fn run(&self, config: &Config, shutdown: CancellationToken) -> Result<(), BoxError> {
        let http = ingest::build_client()?;
        info!(
            interval_minutes = self.interval.num_minutes(),
            "scheduler started"
        );

        let mut next_cycle = Utc::now();
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if Utc::now() >= next_cycle {
                let scheduled_for = next_cycle;
                self.run_one_cycle(config, &http).await;
                next_cycle = next_cycle_start(scheduled_for, self.interval, Utc::now());
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll) => {}
            }
        }

        info!("scheduler stopped");
        Ok(())
    }

    async fn run_one_cycle(&self, config: &Config, http: &reqwest::Client) {
        info!("starting scheduled data update");
        match coordinator::run_cycle(config, http).await {
            Ok(summary) => info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                inserted = summary.inserted,
                "scheduled data update completed"
            ),
            Err(err) => error!(error = %err, "error during scheduled data update"),
        }
    }
}

/// Next start on the grid anchored at `scheduled_for`. Slots that elapsed
/// while the previous cycle overran are skipped so starts stay on the
/// original grid.
pub fn next_cycle_start(
    scheduled_for: DateTime<Utc>,
    interval: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let mut next = scheduled_for + interval;
    while next <= now {
        next = next + interval;
    }
    next
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_cycle_starts_stay_on_the_grid() {
        let interval = Duration::minutes(1);
        // A 30-second cycle does not shift the next start.
        let next = next_cycle_start(t0(), interval, t0() + Duration::seconds(30));
        assert_eq!(next, t0() + Duration::minutes(1));

        // Nor does a near-instant one.
        let next = next_cycle_start(t0() + Duration::minutes(1), interval, t0() + Duration::minutes(1));
        assert_eq!(next, t0() + Duration::minutes(2));
    }

    #[test]
    fn test_overrunning_cycle_skips_elapsed_slots() {
        let interval = Duration::minutes(1);
        let next = next_cycle_start(t0(), interval, t0() + Duration::seconds(150));
        assert_eq!(next, t0() + Duration::minutes(3));
    }

    #[tokio::test]
    async fn test_cancelled_scheduler_exits_before_first_cycle() {
        let config = Config {
            database: DatabaseConfig {
                host: "localhost".into(),
                port: 5432,
                user: "unused".into(),
                password: "unused".into(),
                dbname: "unused".into(),
            },
            scheduler: SchedulerConfig::default(),
            scrape: Default::default(),
        };
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // Pre-cancelled token: the loop must exit without touching the
        // database or the network.
        let scheduler = Scheduler::new(&config.scheduler);
        scheduler
            .run(&config, shutdown)
            .await
            .expect("run returns cleanly");
    }
}
