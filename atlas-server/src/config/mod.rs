//! Service configuration loaded from the environment.

use std::path::PathBuf;

/// Filesystem and scan-binary configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding scan output logs (and the service's own log files).
    pub logs_dir: PathBuf,
    /// Directory holding mutable service state (interval overrides).
    pub state_dir: PathBuf,
    /// Path of the scan binary whose subcommands are scheduled.
    pub scan_bin: PathBuf,
    /// Number of recent lines emitted before a log follow switches to live mode.
    pub tail_window: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logs_dir: PathBuf::from("/config/logs"),
            state_dir: PathBuf::from("/config/db"),
            scan_bin: PathBuf::from("/config/bin/atlas"),
            tail_window: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `ATLAS_LOGS_DIR` (e.g. "/config/logs")
    /// - `ATLAS_STATE_DIR` (e.g. "/config/db")
    /// - `ATLAS_SCAN_BIN` (e.g. "/config/bin/atlas")
    /// - `ATLAS_TAIL_WINDOW` (e.g. "10")
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("ATLAS_LOGS_DIR") {
            if !dir.trim().is_empty() {
                config.logs_dir = PathBuf::from(dir);
            }
        }

        if let Ok(dir) = std::env::var("ATLAS_STATE_DIR") {
            if !dir.trim().is_empty() {
                config.state_dir = PathBuf::from(dir);
            }
        }

        if let Ok(bin) = std::env::var("ATLAS_SCAN_BIN") {
            if !bin.trim().is_empty() {
                config.scan_bin = PathBuf::from(bin);
            }
        }

        if let Ok(window) = std::env::var("ATLAS_TAIL_WINDOW") {
            if let Ok(parsed) = window.parse::<usize>() {
                config.tail_window = parsed.max(1);
            }
        }

        config
    }

    /// Path of the persisted interval overrides file.
    pub fn intervals_path(&self) -> PathBuf {
        self.state_dir.join("intervals.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_container_layout() {
        let config = AppConfig::default();
        assert_eq!(config.logs_dir, PathBuf::from("/config/logs"));
        assert_eq!(config.scan_bin, PathBuf::from("/config/bin/atlas"));
        assert_eq!(config.tail_window, 10);
    }

    #[test]
    fn intervals_path_is_under_state_dir() {
        let config = AppConfig::default();
        assert_eq!(
            config.intervals_path(),
            PathBuf::from("/config/db/intervals.json")
        );
    }
}
