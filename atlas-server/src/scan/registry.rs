//! Static registry of schedulable scan jobs.
//!
//! Every scan the service can trigger is declared here: its identifier, the
//! `atlas` subcommand it runs, the log file its output is teed into, and the
//! default trigger interval. The set is fixed for the life of the process;
//! only intervals are mutable (through the interval store).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identifier of one schedulable external scan command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScanKind {
    /// Fast host discovery sweep.
    #[serde(rename = "scan-hosts-fast")]
    HostsFast,
    /// Deep per-host port and service scan.
    #[serde(rename = "scan-hosts-deep")]
    HostsDeep,
    /// Container discovery scan.
    #[serde(rename = "scan-docker")]
    Docker,
}

impl ScanKind {
    /// All registered scan kinds, in a stable order.
    pub const ALL: [ScanKind; 3] = [ScanKind::HostsFast, ScanKind::HostsDeep, ScanKind::Docker];

    /// The wire identifier of this scan kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::HostsFast => "scan-hosts-fast",
            ScanKind::HostsDeep => "scan-hosts-deep",
            ScanKind::Docker => "scan-docker",
        }
    }

    /// The immutable job definition for this kind.
    pub fn spec(&self) -> &'static ScanJobSpec {
        match self {
            ScanKind::HostsFast => &REGISTRY[0],
            ScanKind::HostsDeep => &REGISTRY[1],
            ScanKind::Docker => &REGISTRY[2],
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan-hosts-fast" => Ok(ScanKind::HostsFast),
            "scan-hosts-deep" => Ok(ScanKind::HostsDeep),
            "scan-docker" => Ok(ScanKind::Docker),
            other => Err(Error::InvalidScanType(other.to_string())),
        }
    }
}

/// Immutable definition of one scan job.
#[derive(Debug)]
pub struct ScanJobSpec {
    pub kind: ScanKind,
    /// Subcommand of the scan binary (e.g. `fastscan`).
    pub subcommand: &'static str,
    /// Fixed log file name under the logs directory.
    pub log_file: &'static str,
    /// Default trigger interval in seconds.
    pub default_interval_secs: u64,
}

static REGISTRY: [ScanJobSpec; 3] = [
    ScanJobSpec {
        kind: ScanKind::HostsFast,
        subcommand: "fastscan",
        log_file: "scan-hosts-fast.log",
        default_interval_secs: 300,
    },
    ScanJobSpec {
        kind: ScanKind::HostsDeep,
        subcommand: "deepscan",
        log_file: "scan-hosts-deep.log",
        default_interval_secs: 3600,
    },
    ScanJobSpec {
        kind: ScanKind::Docker,
        subcommand: "dockerscan",
        log_file: "scan-docker.log",
        default_interval_secs: 600,
    },
];

impl ScanJobSpec {
    /// Full shell invocation for this job, given the scan binary path.
    pub fn command(&self, scan_bin: &Path) -> String {
        format!("{} {}", scan_bin.display(), self.subcommand)
    }

    /// Path of this job's append-only log file.
    pub fn log_path(&self, logs_dir: &Path) -> PathBuf {
        logs_dir.join(self.log_file)
    }
}
