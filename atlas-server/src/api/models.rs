//! API request/response models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scan::{ScanKind, ScanStatus};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub scheduler_running: bool,
}

/// Current interval mapping, keyed by scan id.
#[derive(Debug, Serialize)]
pub struct IntervalsResponse {
    pub intervals: BTreeMap<ScanKind, u64>,
}

/// Request to change one scan's trigger interval.
#[derive(Debug, Deserialize)]
pub struct UpdateIntervalRequest {
    /// New interval in seconds; must be at least 1.
    pub interval: u64,
}

/// Scheduler status: loop liveness plus the interval mapping.
#[derive(Debug, Serialize)]
pub struct SchedulerStatusResponse {
    pub running: bool,
    pub intervals: BTreeMap<ScanKind, u64>,
}

/// Result of a synchronous manual scan run.
#[derive(Debug, Serialize)]
pub struct RunScanResponse {
    pub status: String,
    pub exit_code: i32,
    pub output: String,
}

/// Acknowledgement of a stop request.
#[derive(Debug, Serialize)]
pub struct StopScanResponse {
    pub status: String,
    pub run_id: Uuid,
}

/// Per-kind run state for status listings.
#[derive(Debug, Serialize)]
pub struct ScansStatusResponse {
    pub scans: Vec<ScanStatus>,
}

/// Available log names: scan log files plus `container:<name>` entries.
#[derive(Debug, Serialize)]
pub struct LogListResponse {
    pub logs: Vec<String>,
}

/// Running container names.
#[derive(Debug, Serialize)]
pub struct ContainersResponse {
    pub containers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervals_serialize_with_wire_ids() {
        let mut intervals = BTreeMap::new();
        intervals.insert(ScanKind::HostsFast, 300u64);
        let json = serde_json::to_string(&IntervalsResponse { intervals }).unwrap();
        assert_eq!(json, r#"{"intervals":{"scan-hosts-fast":300}}"#);
    }

    #[test]
    fn update_request_deserializes() {
        let request: UpdateIntervalRequest = serde_json::from_str(r#"{"interval":60}"#).unwrap();
        assert_eq!(request.interval, 60);
    }
}
