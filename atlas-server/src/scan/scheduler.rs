//! Interval-based triggering of registered scans.
//!
//! A single tick loop checks every scan kind once per second and starts a
//! run whenever the configured interval has elapsed since the last start.
//! Manual runs count: they reset the clock exactly like scheduled ones, so
//! a scan never fires twice in quick succession just because someone
//! triggered it by hand. A kind that is still running when it comes due is
//! simply skipped; the next due check happens after that run's start time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::scan::intervals::IntervalStore;
use crate::scan::registry::ScanKind;
use crate::scan::runner::{ScanRunner, StartOutcome, TriggerSource};

/// How often due-ness is evaluated.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Drives scheduled starts of every registered scan kind.
pub struct Scheduler {
    runner: Arc<ScanRunner>,
    intervals: Arc<IntervalStore>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        runner: Arc<ScanRunner>,
        intervals: Arc<IntervalStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            runner,
            intervals,
            shutdown,
        }
    }

    /// Run the tick loop until shutdown is requested.
    ///
    /// Ticks that fall behind (e.g. after suspend) are skipped rather than
    /// replayed in a burst.
    pub async fn run(self) {
        info!("Scan scheduler started");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Scan scheduler stopping");
                    return;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    /// Start every scan that has come due.
    async fn tick(&self) {
        for kind in ScanKind::ALL {
            if !self.is_due(kind) {
                continue;
            }
            match self
                .runner
                .try_start(kind, TriggerSource::Scheduled)
                .await
            {
                Ok(StartOutcome::Started { run_id, .. }) => {
                    debug!(scan = %kind, run_id = %run_id, "Scheduled scan started");
                }
                Ok(StartOutcome::Busy) => {
                    // Still in flight from a previous trigger; not an error.
                    debug!(scan = %kind, "Scan due but still running; skipping");
                }
                Err(e) => {
                    warn!(scan = %kind, error = %e, "Scheduled scan failed to start");
                }
            }
        }
    }

    /// A scan is due when its interval has elapsed since its last start, or
    /// when it has never run in this process.
    fn is_due(&self, kind: ScanKind) -> bool {
        match self.runner.last_started_at(kind) {
            Some(started_at) => {
                let interval = self.intervals.get(kind);
                let elapsed = (Utc::now() - started_at).num_seconds();
                elapsed >= 0 && elapsed as u64 >= interval
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::hub::StreamHub;
    use std::collections::BTreeMap;

    fn test_runner(script: &str) -> Arc<ScanRunner> {
        let dir = tempfile::tempdir().unwrap();
        let commands: BTreeMap<_, _> = ScanKind::ALL
            .into_iter()
            .map(|kind| (kind, script.to_string()))
            .collect();
        Arc::new(ScanRunner::with_commands(
            dir.keep(),
            commands,
            Arc::new(StreamHub::new()),
        ))
    }

    #[tokio::test]
    async fn never_run_scan_is_due_immediately() {
        let runner = test_runner("true");
        let scheduler = Scheduler::new(
            runner,
            Arc::new(IntervalStore::with_defaults()),
            CancellationToken::new(),
        );
        assert!(scheduler.is_due(ScanKind::HostsFast));
    }

    #[tokio::test]
    async fn recent_start_is_not_due() {
        let runner = test_runner("echo done");
        let events = match runner
            .try_start(ScanKind::HostsFast, TriggerSource::Manual)
            .await
            .unwrap()
        {
            StartOutcome::Started { events, .. } => events,
            StartOutcome::Busy => panic!("unexpected busy"),
        };
        drop(events);

        let scheduler = Scheduler::new(
            runner,
            Arc::new(IntervalStore::with_defaults()),
            CancellationToken::new(),
        );
        // Default fast interval is 300s; a run started moments ago is not due.
        assert!(!scheduler.is_due(ScanKind::HostsFast));
    }

    #[tokio::test]
    async fn tick_starts_due_scans() {
        let runner = test_runner("echo line");
        let scheduler = Scheduler::new(
            Arc::clone(&runner),
            Arc::new(IntervalStore::with_defaults()),
            CancellationToken::new(),
        );

        scheduler.tick().await;

        // Every kind had never run, so every kind was started.
        for kind in ScanKind::ALL {
            assert!(scheduler.runner.last_started_at(kind).is_some());
        }
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let runner = test_runner("true");
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::new(
            runner,
            Arc::new(IntervalStore::with_defaults()),
            shutdown.clone(),
        );

        let handle = tokio::spawn(scheduler.run());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
