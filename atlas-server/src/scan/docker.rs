//! Read-only access to container logs via the `docker` CLI.
//!
//! The service never manages containers; it only lists running ones and
//! exposes their logs next to the scan log files. Log names of the form
//! `container:<name>` route here. A docker daemon that is absent or
//! unreachable degrades to empty listings rather than errors.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Prefix marking a log name as a container log rather than a file.
pub const CONTAINER_PREFIX: &str = "container:";

/// Line count for one-shot container log reads.
const CONTAINER_READ_TAIL: usize = 500;

/// Buffered line count between the follower task and its consumer.
const FOLLOW_CHANNEL_CAPACITY: usize = 256;

/// Container names may only contain what docker itself allows. Anything else
/// is rejected before it reaches a shell line.
fn validate_name(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid {
        return Err(Error::FileNotFound(format!("{CONTAINER_PREFIX}{name}")));
    }
    Ok(name)
}

/// Names of currently running containers, sorted.
///
/// A failing or missing docker CLI yields an empty list.
pub async fn running_containers() -> Vec<String> {
    let output = process_utils::command("docker")
        .args(["ps", "--format", "{{.Names}}"])
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let mut names: Vec<String> = String::from_utf8_lossy(&out.stdout)
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            names.sort();
            names
        }
        Ok(out) => {
            debug!(code = ?out.status.code(), "docker ps exited non-zero");
            Vec::new()
        }
        Err(e) => {
            debug!(error = %e, "docker ps unavailable");
            Vec::new()
        }
    }
}

/// Recent log content of one container, as text.
pub async fn read_logs(name: &str) -> Result<String> {
    let name = validate_name(name)?;
    let output = process_utils::command("docker")
        .args(["logs", "--tail", &CONTAINER_READ_TAIL.to_string(), name])
        .output()
        .await
        .map_err(Error::SpawnFailure)?;

    if !output.status.success() {
        return Err(Error::FileNotFound(format!("{CONTAINER_PREFIX}{name}")));
    }

    // docker splits container output across both pipes.
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}

/// Follow one container's logs, starting `window` lines back.
///
/// Runs `docker logs -f` and forwards its merged output. The child is killed
/// when the consumer drops the receiver or the token is cancelled.
pub fn follow_logs(
    name: &str,
    window: usize,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<String>> {
    let name = validate_name(name)?.to_string();
    let mut child = process_utils::merged_shell(&format!(
        "docker logs -f --tail {window} {name}"
    ))
    .spawn()
    .map_err(Error::SpawnFailure)?;

    let (tx, rx) = mpsc::channel(FOLLOW_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let Some(stdout) = child.stdout.take() else {
            warn!(container = %name, "docker logs child has no captured stdout");
            return;
        };
        let mut lines = BufReader::new(stdout).lines();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tx.closed() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(container = %name, error = %e, "Error reading container log stream");
                        break;
                    }
                }
            }
        }

        let _ = child.start_kill();
        if let Err(e) = process_utils::wait_with_cancel(&mut child, &cancel).await {
            warn!(container = %name, error = %e, "Error reaping docker logs child");
        }
        debug!(container = %name, "Container log follow ended");
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_names_that_could_break_the_shell_line() {
        for bad in ["", "a b", "a;rm", "a$(x)", "a/b", "a'b"] {
            assert!(
                matches!(validate_name(bad), Err(Error::FileNotFound(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn accepts_typical_container_names() {
        for ok in ["atlas", "atlas-db_1", "web.2", "A1-b_c.d"] {
            assert_eq!(validate_name(ok).unwrap(), ok);
        }
    }
}
