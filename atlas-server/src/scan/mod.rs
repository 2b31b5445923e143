//! Scan scheduling, execution, and log streaming.

pub mod docker;
pub mod hub;
pub mod intervals;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod tailer;

pub use hub::{StreamEvent, StreamHub};
pub use intervals::IntervalStore;
pub use registry::{ScanJobSpec, ScanKind};
pub use runner::{RunRecord, RunState, ScanRunner, ScanStatus, StartOutcome, TriggerSource};
pub use scheduler::Scheduler;
