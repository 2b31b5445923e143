//! Fan-out of a running scan's output lines to live subscribers.
//!
//! Each in-flight run owns one broadcast channel. The runner publishes every
//! output line and a final exit event; any number of viewers subscribe and
//! receive events in publish order. Publishing never blocks on subscribers:
//! a viewer that falls more than the channel capacity behind observes
//! `RecvError::Lagged` and is disconnected by its transport task.

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::scan::registry::ScanKind;

/// Broadcast capacity per run. A subscriber lagging behind by more than this
/// many events is disconnected rather than allowed to stall the scan.
pub const STREAM_CHANNEL_CAPACITY: usize = 1024;

/// One unit delivered to live subscribers of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One output line, without its trailing newline.
    Line(String),
    /// Terminal marker: the process exited with this code. Always the last
    /// event of a run.
    Exit(i32),
}

impl StreamEvent {
    /// The text frame sent over the wire for this event.
    pub fn frame(&self) -> String {
        match self {
            StreamEvent::Line(line) => line.clone(),
            StreamEvent::Exit(code) => format!("[exit {code}]"),
        }
    }
}

/// Registry of live per-run broadcast channels, keyed by scan kind.
///
/// Single-flight means at most one run (and therefore one channel) exists
/// per kind at any time.
#[derive(Default)]
pub struct StreamHub {
    channels: DashMap<ScanKind, broadcast::Sender<StreamEvent>>,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the channel for a new run of `kind`, returning the publish side.
    ///
    /// Called by the runner while it holds the state slot for `kind`.
    pub(crate) fn open(&self, kind: ScanKind) -> broadcast::Sender<StreamEvent> {
        let (tx, _) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
        self.channels.insert(kind, tx.clone());
        tx
    }

    /// Remove the channel for a completed run.
    ///
    /// Receivers drain buffered events (ending with [`StreamEvent::Exit`])
    /// and then observe `RecvError::Closed` once the last sender is dropped.
    pub(crate) fn close(&self, kind: ScanKind) {
        self.channels.remove(&kind);
    }

    /// Subscribe to the in-flight run of `kind`.
    ///
    /// Returns `None` when no run is active. A late joiner receives only
    /// events published from this point forward; replaying history is the
    /// caller's business (read the log file first, then subscribe).
    pub fn subscribe(&self, kind: ScanKind) -> Option<broadcast::Receiver<StreamEvent>> {
        self.channels.get(&kind).map(|tx| tx.subscribe())
    }

    /// Whether a run of `kind` currently has an open channel.
    pub fn is_open(&self, kind: ScanKind) -> bool {
        self.channels.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() {
        let hub = StreamHub::new();
        let tx = hub.open(ScanKind::HostsFast);

        let mut rx_a = hub.subscribe(ScanKind::HostsFast).unwrap();
        let mut rx_b = hub.subscribe(ScanKind::HostsFast).unwrap();

        tx.send(StreamEvent::Line("a".into())).unwrap();
        tx.send(StreamEvent::Line("b".into())).unwrap();
        tx.send(StreamEvent::Exit(0)).unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await.unwrap(), StreamEvent::Line("a".into()));
            assert_eq!(rx.recv().await.unwrap(), StreamEvent::Line("b".into()));
            assert_eq!(rx.recv().await.unwrap(), StreamEvent::Exit(0));
        }
    }

    #[tokio::test]
    async fn close_ends_subscribers_after_drain() {
        let hub = StreamHub::new();
        let tx = hub.open(ScanKind::Docker);
        let mut rx = hub.subscribe(ScanKind::Docker).unwrap();

        tx.send(StreamEvent::Exit(1)).unwrap();
        hub.close(ScanKind::Docker);
        drop(tx);

        assert_eq!(rx.recv().await.unwrap(), StreamEvent::Exit(1));
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(hub.subscribe(ScanKind::Docker).is_none());
    }

    #[test]
    fn exit_frame_encodes_code() {
        assert_eq!(StreamEvent::Exit(0).frame(), "[exit 0]");
        assert_eq!(StreamEvent::Exit(137).frame(), "[exit 137]");
        assert_eq!(StreamEvent::Line("x".into()).frame(), "x");
    }

    #[tokio::test]
    async fn dropping_one_subscriber_leaves_others_attached() {
        let hub = StreamHub::new();
        let tx = hub.open(ScanKind::HostsDeep);

        let rx_gone = hub.subscribe(ScanKind::HostsDeep).unwrap();
        let mut rx_kept = hub.subscribe(ScanKind::HostsDeep).unwrap();
        drop(rx_gone);

        tx.send(StreamEvent::Line("still here".into())).unwrap();
        assert_eq!(
            rx_kept.recv().await.unwrap(),
            StreamEvent::Line("still here".into())
        );
    }
}
