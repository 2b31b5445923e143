//! Tail-and-follow access to scan log files.
//!
//! A follower emits the last few lines of a log file and then keeps
//! delivering lines as they are appended, surviving truncation and rotation
//! the way `tail -F` does: a file that shrinks is re-read from the start,
//! and a path whose inode changes is reopened. Following stops when the
//! receiver is dropped or the cancellation token fires.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How often the follower polls for appended data.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How far back the initial window scan reads. Logs lines are short; this
/// comfortably covers any sane window.
const WINDOW_SCAN_BYTES: u64 = 64 * 1024;

/// Buffered line count between the follower task and its consumer.
const FOLLOW_CHANNEL_CAPACITY: usize = 256;

/// Log file names that are internal working files, hidden from listings.
const HIDDEN_PREFIXES: [&str; 2] = ["nmap_tcp_", "nmap_udp_"];

/// List the visible log files in `dir`, sorted by name.
///
/// Internal per-host scratch files are filtered out; only `.log` files
/// appear.
pub fn list_log_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.ends_with(".log") {
            continue;
        }
        if HIDDEN_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        names.push(name.to_string());
    }

    names.sort();
    Ok(names)
}

/// Resolve a client-supplied log name to a path under `dir`.
///
/// Rejects anything that is not a plain `.log` file name, so a name can
/// never escape the logs directory. The file must already exist.
pub fn resolve_log_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let valid = name.ends_with(".log")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.starts_with('.');
    if !valid {
        return Err(Error::FileNotFound(name.to_string()));
    }

    let path = dir.join(name);
    if !path.is_file() {
        return Err(Error::FileNotFound(name.to_string()));
    }
    Ok(path)
}

/// Read a whole log file as text.
pub async fn read_log(dir: &Path, name: &str) -> Result<String> {
    let path = resolve_log_path(dir, name)?;
    Ok(tokio::fs::read_to_string(path).await?)
}

/// Start following `path`, emitting the last `window` lines first.
///
/// The file must exist when the follow starts. The returned receiver yields
/// lines without trailing newlines; it closes when following stops.
pub async fn follow(
    path: PathBuf,
    window: usize,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<String>> {
    let file = File::open(&path)
        .await
        .map_err(|_| Error::FileNotFound(path.display().to_string()))?;

    let (tx, rx) = mpsc::channel(FOLLOW_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        if let Err(e) = follow_loop(path.clone(), file, window, tx, cancel).await {
            warn!(path = %path.display(), error = %e, "Log follow ended with error");
        }
    });
    Ok(rx)
}

async fn follow_loop(
    path: PathBuf,
    mut file: File,
    window: usize,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> Result<()> {
    // Emit the initial window, then start following from the end.
    let mut position = emit_tail_window(&mut file, window, &tx).await?;
    let mut opened_ino = inode(&file).await?;
    let mut partial = String::new();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(path = %path.display(), "Log follow cancelled");
                return Ok(());
            }
            _ = tx.closed() => {
                debug!(path = %path.display(), "Log follow consumer went away");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        // Rotation: the name now points at a different file. Pick up the new
        // one from its beginning.
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            let current_ino = unix_ino(&meta);
            if current_ino != opened_ino {
                debug!(path = %path.display(), "Log file rotated; reopening");
                match File::open(&path).await {
                    Ok(reopened) => {
                        file = reopened;
                        opened_ino = current_ino;
                        position = 0;
                        partial.clear();
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to reopen rotated log");
                        continue;
                    }
                }
            }
        }

        // Truncation: the file shrank in place. Start over from byte zero.
        let len = file.metadata().await?.len();
        if len < position {
            debug!(path = %path.display(), "Log file truncated; rereading");
            position = 0;
            partial.clear();
        }
        if len == position {
            continue;
        }

        file.seek(SeekFrom::Start(position)).await?;
        let mut chunk = vec![0u8; (len - position) as usize];
        file.read_exact(&mut chunk).await?;
        position = len;

        partial.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(newline) = partial.find('\n') {
            let line = partial[..newline].trim_end_matches('\r').to_string();
            partial.drain(..=newline);
            if tx.send(line).await.is_err() {
                return Ok(());
            }
        }
    }
}

/// Send the last `window` complete lines of `file`; returns the byte offset
/// at which following should resume.
async fn emit_tail_window(
    file: &mut File,
    window: usize,
    tx: &mpsc::Sender<String>,
) -> Result<u64> {
    let len = file.metadata().await?.len();
    let start = len.saturating_sub(WINDOW_SCAN_BYTES);

    file.seek(SeekFrom::Start(start)).await?;
    let mut buf = vec![0u8; (len - start) as usize];
    file.read_exact(&mut buf).await?;

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    // When the scan started mid-file the first entry is a partial line.
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    let skip = lines.len().saturating_sub(window);
    for line in &lines[skip..] {
        if tx.send(line.trim_end_matches('\r').to_string()).await.is_err() {
            return Ok(len);
        }
    }

    Ok(len)
}

async fn inode(file: &File) -> Result<u64> {
    Ok(unix_ino(&file.metadata().await?))
}

#[cfg(unix)]
fn unix_ino(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn unix_ino(_meta: &std::fs::Metadata) -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    async fn recv_line(rx: &mut mpsc::Receiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for line")
            .expect("follow channel closed")
    }

    #[test]
    fn listing_hides_internal_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "scan-hosts-fast.log",
            "scan-docker.log",
            "nmap_tcp_10.0.0.5.log",
            "nmap_udp_10.0.0.5.log",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let names = list_log_files(dir.path()).unwrap();
        assert_eq!(names, vec!["scan-docker.log", "scan-hosts-fast.log"]);
    }

    #[test]
    fn listing_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let names = list_log_files(&dir.path().join("nope")).unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn resolve_rejects_traversal_and_non_log_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.log"), "x").unwrap();

        assert!(resolve_log_path(dir.path(), "a.log").is_ok());
        for bad in ["../a.log", "a/../b.log", "a.txt", ".hidden.log", "missing.log"] {
            assert!(
                matches!(resolve_log_path(dir.path(), bad), Err(Error::FileNotFound(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn follow_emits_window_then_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.log");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let cancel = CancellationToken::new();
        let mut rx = follow(path.clone(), 2, cancel.clone()).await.unwrap();
        assert_eq!(recv_line(&mut rx).await, "two");
        assert_eq!(recv_line(&mut rx).await, "three");

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "four").unwrap();
        assert_eq!(recv_line(&mut rx).await, "four");

        cancel.cancel();
    }

    #[tokio::test]
    async fn follow_of_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = follow(
            dir.path().join("missing.log"),
            10,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(err, Err(Error::FileNotFound(_))));
    }

    #[tokio::test]
    async fn truncation_restarts_from_the_top() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.log");
        std::fs::write(&path, "old-1\nold-2\n").unwrap();

        let cancel = CancellationToken::new();
        let mut rx = follow(path.clone(), 10, cancel.clone()).await.unwrap();
        assert_eq!(recv_line(&mut rx).await, "old-1");
        assert_eq!(recv_line(&mut rx).await, "old-2");

        // Truncate in place, as a fresh scan run would.
        std::fs::write(&path, "new-1\n").unwrap();
        assert_eq!(recv_line(&mut rx).await, "new-1");

        cancel.cancel();
    }

    #[tokio::test]
    async fn rotation_switches_to_the_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.log");
        std::fs::write(&path, "before\n").unwrap();

        let cancel = CancellationToken::new();
        let mut rx = follow(path.clone(), 10, cancel.clone()).await.unwrap();
        assert_eq!(recv_line(&mut rx).await, "before");

        // Rotate: move the old file aside and create a fresh one at the name.
        std::fs::rename(&path, dir.path().join("scan.log.1")).unwrap();
        std::fs::write(&path, "after\n").unwrap();
        assert_eq!(recv_line(&mut rx).await, "after");

        cancel.cancel();
    }
}
