//! Single-flight execution of external scan commands.
//!
//! The runner owns the per-scan-type state machine (`Idle`/`Running`). A
//! start attempt atomically reserves the slot for its kind, spawns the shell
//! command with merged output, and tees every line into the append-only log
//! file before publishing it to the stream hub. At most one run per kind is
//! in flight at any time; attempts against a busy kind observe
//! [`StartOutcome::Busy`] with no side effects. Different kinds run fully
//! concurrently.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::scan::hub::{StreamEvent, StreamHub};
use crate::scan::registry::ScanKind;

/// What caused a run to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Scheduled,
    Manual,
}

/// Per-scan-type execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
}

/// Bookkeeping for one execution of a scan job.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub kind: ScanKind,
    pub source: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl RunRecord {
    fn new(kind: ScanKind, source: TriggerSource) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            source,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
        }
    }
}

/// Outcome of a start attempt.
pub enum StartOutcome {
    /// A new run was started. `events` was subscribed before the process
    /// spawned, so it observes every line of the run.
    Started {
        run_id: Uuid,
        events: broadcast::Receiver<StreamEvent>,
    },
    /// Another run of this kind is still in flight. Not a failure; callers
    /// retry later or attach to the in-flight run via the hub.
    Busy,
}

/// Point-in-time view of one scan type.
#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    pub kind: ScanKind,
    pub state: RunState,
    pub current: Option<RunRecord>,
    pub last: Option<RunRecord>,
}

#[derive(Default)]
struct ScanSlot {
    running: Option<ActiveRun>,
    last_run: Option<RunRecord>,
}

struct ActiveRun {
    record: RunRecord,
    cancel: CancellationToken,
}

/// Spawns scan commands and tees their output to log files and the hub.
pub struct ScanRunner {
    logs_dir: PathBuf,
    commands: BTreeMap<ScanKind, String>,
    hub: Arc<StreamHub>,
    slots: DashMap<ScanKind, ScanSlot>,
}

impl ScanRunner {
    /// Create a runner whose commands come from the static registry.
    pub fn new(config: &AppConfig, hub: Arc<StreamHub>) -> Self {
        let commands = ScanKind::ALL
            .into_iter()
            .map(|kind| (kind, kind.spec().command(&config.scan_bin)))
            .collect();
        Self::with_commands(config.logs_dir.clone(), commands, hub)
    }

    /// Create a runner with an explicit command table.
    pub fn with_commands(
        logs_dir: PathBuf,
        commands: BTreeMap<ScanKind, String>,
        hub: Arc<StreamHub>,
    ) -> Self {
        Self {
            logs_dir,
            commands,
            hub,
            slots: DashMap::new(),
        }
    }

    /// Attempt to start a run of `kind`.
    ///
    /// The `Idle -> Running` transition is a check-and-set under the slot's
    /// entry lock, so two concurrent attempts can never both observe `Idle`.
    /// If the command cannot be launched the slot reverts to `Idle` and the
    /// error is returned; nothing is left running.
    pub async fn try_start(
        self: &Arc<Self>,
        kind: ScanKind,
        source: TriggerSource,
    ) -> Result<StartOutcome> {
        // Reserve the slot first; no awaits while the entry lock is held.
        let (record, cancel, tx, events) = {
            let mut slot = self.slots.entry(kind).or_default();
            if slot.running.is_some() {
                return Ok(StartOutcome::Busy);
            }
            let record = RunRecord::new(kind, source);
            let cancel = CancellationToken::new();
            let tx = self.hub.open(kind);
            let events = tx.subscribe();
            slot.running = Some(ActiveRun {
                record: record.clone(),
                cancel: cancel.clone(),
            });
            (record, cancel, tx, events)
        };

        match self.launch(kind).await {
            Ok((child, log_file)) => {
                info!(scan = %kind, run_id = %record.run_id, source = ?source, "Scan started");
                let runner = Arc::clone(self);
                let run = record.clone();
                tokio::spawn(async move {
                    runner.drive(kind, run, child, log_file, tx, cancel).await;
                });
                Ok(StartOutcome::Started {
                    run_id: record.run_id,
                    events,
                })
            }
            Err(e) => {
                self.hub.close(kind);
                if let Some(mut slot) = self.slots.get_mut(&kind) {
                    slot.running = None;
                }
                warn!(scan = %kind, error = %e, "Failed to launch scan command");
                Err(e)
            }
        }
    }

    /// Request termination of the in-flight run of `kind`.
    ///
    /// Killing is always explicit: subscribers coming and going never affects
    /// the process. The killed run records its exit and closes its log like
    /// any other.
    pub fn stop(&self, kind: ScanKind) -> Result<Uuid> {
        let slot = self.slots.get(&kind);
        match slot.as_ref().and_then(|s| s.running.as_ref()) {
            Some(active) => {
                active.cancel.cancel();
                Ok(active.record.run_id)
            }
            None => Err(Error::NotRunning(kind)),
        }
    }

    pub fn is_running(&self, kind: ScanKind) -> bool {
        self.slots
            .get(&kind)
            .map(|slot| slot.running.is_some())
            .unwrap_or(false)
    }

    /// Start time of the most recent run of `kind`, in flight or finished.
    ///
    /// The scheduler measures intervals from run start to run start, and a
    /// manual run resets the clock the same way a scheduled one does.
    pub fn last_started_at(&self, kind: ScanKind) -> Option<DateTime<Utc>> {
        let slot = self.slots.get(&kind)?;
        slot.running
            .as_ref()
            .map(|active| active.record.started_at)
            .or_else(|| slot.last_run.as_ref().map(|run| run.started_at))
    }

    pub fn status(&self, kind: ScanKind) -> ScanStatus {
        match self.slots.get(&kind) {
            Some(slot) => ScanStatus {
                kind,
                state: if slot.running.is_some() {
                    RunState::Running
                } else {
                    RunState::Idle
                },
                current: slot.running.as_ref().map(|active| active.record.clone()),
                last: slot.last_run.clone(),
            },
            None => ScanStatus {
                kind,
                state: RunState::Idle,
                current: None,
                last: None,
            },
        }
    }

    /// Open the log file and spawn the scan process.
    async fn launch(&self, kind: ScanKind) -> Result<(tokio::process::Child, tokio::fs::File)> {
        tokio::fs::create_dir_all(&self.logs_dir).await?;
        let log_path = kind.spec().log_path(&self.logs_dir);
        let log_file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .await?;

        let script = self
            .commands
            .get(&kind)
            .ok_or_else(|| Error::Other(format!("no command registered for {kind}")))?;
        let child = process_utils::merged_shell(script)
            .spawn()
            .map_err(Error::SpawnFailure)?;

        Ok((child, log_file))
    }

    /// Own the run from first output line to the `Idle` transition.
    ///
    /// Tee ordering: each line reaches the log file before it is published,
    /// so a viewer replaying the file tail never sees an in-memory line
    /// before it is durable. The terminal marker is appended and published
    /// exactly once, after the last output line.
    async fn drive(
        self: Arc<Self>,
        kind: ScanKind,
        run: RunRecord,
        mut child: tokio::process::Child,
        mut log_file: tokio::fs::File,
        tx: broadcast::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let mut killed = false;
        match child.stdout.take() {
            Some(stdout) => {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled(), if !killed => {
                            killed = true;
                            warn!(scan = %kind, run_id = %run.run_id, "Stop requested; killing scan process");
                            let _ = child.start_kill();
                            // Keep draining the pipe so output produced before
                            // the kill still lands in the log.
                        }
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => {
                                if let Err(e) = log_file.write_all(format!("{line}\n").as_bytes()).await {
                                    error!(scan = %kind, error = %e, "Failed to append scan output to log file");
                                }
                                let _ = tx.send(StreamEvent::Line(line));
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!(scan = %kind, error = %e, "Error reading scan output");
                                break;
                            }
                        }
                    }
                }
            }
            None => error!(scan = %kind, "Scan process has no captured stdout"),
        }

        let exit_code = match process_utils::wait_with_cancel(&mut child, &cancel).await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                error!(scan = %kind, error = %e, "Error waiting for scan process");
                -1
            }
        };

        let marker = StreamEvent::Exit(exit_code);
        if let Err(e) = log_file
            .write_all(format!("{}\n", marker.frame()).as_bytes())
            .await
        {
            error!(scan = %kind, error = %e, "Failed to append terminal marker to log file");
        }
        let _ = log_file.flush().await;
        let _ = tx.send(marker);
        self.hub.close(kind);
        drop(tx);

        // Single exit path back to Idle: whatever happened above, the slot is
        // released here and can never stay stuck Running.
        {
            let mut slot = self.slots.entry(kind).or_default();
            if let Some(active) = slot.running.take() {
                let mut record = active.record;
                record.finished_at = Some(Utc::now());
                record.exit_code = Some(exit_code);
                slot.last_run = Some(record);
            }
        }

        if exit_code == 0 {
            info!(scan = %kind, run_id = %run.run_id, "Scan completed");
        } else {
            warn!(scan = %kind, run_id = %run.run_id, exit_code, "Scan exited with non-zero status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn runner_with(script: &str) -> (Arc<ScanRunner>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let commands = ScanKind::ALL
            .into_iter()
            .map(|kind| (kind, script.to_string()))
            .collect();
        let runner = Arc::new(ScanRunner::with_commands(
            dir.path().to_path_buf(),
            commands,
            Arc::new(StreamHub::new()),
        ));
        (runner, dir)
    }

    async fn collect_until_exit(mut rx: broadcast::Receiver<StreamEvent>) -> (Vec<String>, i32) {
        let mut lines = Vec::new();
        loop {
            match rx.recv().await {
                Ok(StreamEvent::Line(line)) => lines.push(line),
                Ok(StreamEvent::Exit(code)) => return (lines, code),
                Err(e) => panic!("stream ended without terminal marker: {e}"),
            }
        }
    }

    async fn wait_until_idle(runner: &ScanRunner, kind: ScanKind) {
        for _ in 0..100 {
            if !runner.is_running(kind) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scan {kind} did not return to idle");
    }

    #[tokio::test]
    async fn run_publishes_lines_then_terminal_marker() {
        let (runner, dir) = runner_with("printf 'a\\nb\\n'");
        let outcome = runner
            .try_start(ScanKind::HostsFast, TriggerSource::Manual)
            .await
            .unwrap();
        let events = match outcome {
            StartOutcome::Started { events, .. } => events,
            StartOutcome::Busy => panic!("unexpected busy"),
        };

        let (lines, code) = collect_until_exit(events).await;
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(code, 0);

        wait_until_idle(&runner, ScanKind::HostsFast).await;
        let log = std::fs::read_to_string(dir.path().join("scan-hosts-fast.log")).unwrap();
        assert_eq!(log, "a\nb\n[exit 0]\n");
    }

    #[tokio::test]
    async fn second_start_while_running_is_busy() {
        let (runner, _dir) = runner_with("sleep 1");
        let first = runner
            .try_start(ScanKind::Docker, TriggerSource::Manual)
            .await
            .unwrap();
        assert!(matches!(first, StartOutcome::Started { .. }));

        let second = runner
            .try_start(ScanKind::Docker, TriggerSource::Scheduled)
            .await
            .unwrap();
        assert!(matches!(second, StartOutcome::Busy));

        runner.stop(ScanKind::Docker).unwrap();
        wait_until_idle(&runner, ScanKind::Docker).await;
    }

    #[tokio::test]
    async fn stop_kills_run_and_records_nonzero_exit() {
        let (runner, _dir) = runner_with("sleep 30");
        let events = match runner
            .try_start(ScanKind::HostsDeep, TriggerSource::Manual)
            .await
            .unwrap()
        {
            StartOutcome::Started { events, .. } => events,
            StartOutcome::Busy => panic!("unexpected busy"),
        };

        runner.stop(ScanKind::HostsDeep).unwrap();
        let (_, code) = collect_until_exit(events).await;
        assert_ne!(code, 0);

        wait_until_idle(&runner, ScanKind::HostsDeep).await;
        let status = runner.status(ScanKind::HostsDeep);
        assert_eq!(status.state, RunState::Idle);
        assert_eq!(status.last.unwrap().exit_code, Some(code));
    }

    #[tokio::test]
    async fn stop_on_idle_scan_is_rejected() {
        let (runner, _dir) = runner_with("true");
        let err = runner.stop(ScanKind::HostsFast).unwrap_err();
        assert!(matches!(err, Error::NotRunning(ScanKind::HostsFast)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_captured_not_fatal() {
        let (runner, _dir) = runner_with("echo oops; exit 2");
        let events = match runner
            .try_start(ScanKind::HostsFast, TriggerSource::Scheduled)
            .await
            .unwrap()
        {
            StartOutcome::Started { events, .. } => events,
            StartOutcome::Busy => panic!("unexpected busy"),
        };

        let (lines, code) = collect_until_exit(events).await;
        assert_eq!(lines, vec!["oops"]);
        assert_eq!(code, 2);
    }

    #[tokio::test]
    async fn launch_failure_reverts_to_idle() {
        // Point the logs dir at an existing file so the log open fails.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let commands = ScanKind::ALL
            .into_iter()
            .map(|kind| (kind, "true".to_string()))
            .collect();
        let runner = Arc::new(ScanRunner::with_commands(
            blocker,
            commands,
            Arc::new(StreamHub::new()),
        ));

        let err = runner
            .try_start(ScanKind::HostsFast, TriggerSource::Manual)
            .await;
        assert!(err.is_err());
        assert!(!runner.is_running(ScanKind::HostsFast));
    }

    #[tokio::test]
    async fn different_kinds_run_concurrently() {
        let (runner, _dir) = runner_with("sleep 1");
        let first = runner
            .try_start(ScanKind::HostsFast, TriggerSource::Manual)
            .await
            .unwrap();
        let second = runner
            .try_start(ScanKind::Docker, TriggerSource::Manual)
            .await
            .unwrap();
        assert!(matches!(first, StartOutcome::Started { .. }));
        assert!(matches!(second, StartOutcome::Started { .. }));

        runner.stop(ScanKind::HostsFast).unwrap();
        runner.stop(ScanKind::Docker).unwrap();
        wait_until_idle(&runner, ScanKind::HostsFast).await;
        wait_until_idle(&runner, ScanKind::Docker).await;
    }
}
