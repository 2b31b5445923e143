//! Mutable per-scan-type interval configuration.
//!
//! Intervals start at the registry defaults and can be changed at runtime
//! through [`IntervalStore::update`]. Updates are persisted to a JSON file so
//! they survive restarts; a missing or unreadable file simply falls back to
//! the defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::scan::registry::ScanKind;

/// Shared store of trigger intervals, keyed by scan kind.
pub struct IntervalStore {
    inner: RwLock<BTreeMap<ScanKind, u64>>,
    path: Option<PathBuf>,
}

impl IntervalStore {
    /// Create a store with registry defaults and no persistence.
    pub fn with_defaults() -> Self {
        Self {
            inner: RwLock::new(default_intervals()),
            path: None,
        }
    }

    /// Create a store backed by `path`, loading any persisted overrides.
    ///
    /// A missing or corrupt file is not an error; the store starts from the
    /// registry defaults and overwrites the file on the next update.
    pub fn load_or_default(path: PathBuf) -> Self {
        let mut intervals = default_intervals();

        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<ScanKind, u64>>(&raw) {
                Ok(saved) => {
                    for (kind, secs) in saved {
                        if secs >= 1 {
                            intervals.insert(kind, secs);
                        }
                    }
                    info!(path = %path.display(), "Loaded persisted scan intervals");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring corrupt intervals file");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read intervals file");
            }
        }

        Self {
            inner: RwLock::new(intervals),
            path: Some(path),
        }
    }

    /// Snapshot of the current interval mapping.
    pub fn get_all(&self) -> BTreeMap<ScanKind, u64> {
        self.inner.read().clone()
    }

    /// Current interval for one scan kind, in seconds.
    pub fn get(&self, kind: ScanKind) -> u64 {
        self.inner
            .read()
            .get(&kind)
            .copied()
            .unwrap_or(kind.spec().default_interval_secs)
    }

    /// Update the interval for the scan type named by `kind_id`.
    ///
    /// Fails without touching the store if the id is unknown or the value is
    /// below one second. The new value is visible to the scheduler's next
    /// tick; persistence failures are logged but do not undo the update.
    pub fn update(&self, kind_id: &str, interval_secs: u64) -> Result<ScanKind> {
        let kind: ScanKind = kind_id.parse()?;
        if interval_secs < 1 {
            return Err(Error::IntervalOutOfRange(interval_secs));
        }

        let snapshot = {
            let mut inner = self.inner.write();
            inner.insert(kind, interval_secs);
            inner.clone()
        };
        info!(scan = %kind, interval_secs, "Scan interval updated");

        if let Some(path) = &self.path {
            if let Err(e) = persist(path, &snapshot) {
                warn!(path = %path.display(), error = %e, "Failed to persist scan intervals");
            }
        }

        Ok(kind)
    }
}

fn default_intervals() -> BTreeMap<ScanKind, u64> {
    ScanKind::ALL
        .into_iter()
        .map(|kind| (kind, kind.spec().default_interval_secs))
        .collect()
}

fn persist(path: &std::path::Path, intervals: &BTreeMap<ScanKind, u64>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(intervals)?;
    std::fs::write(path, raw)?;
    Ok(())
}
