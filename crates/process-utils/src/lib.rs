//! Helpers for spawning external scan commands.
//!
//! The service drives long-running shell commands (network scans, `docker
//! logs`) whose stdout and stderr must be observed as one ordered line
//! stream. These helpers centralize how such children are built, merged,
//! and reaped.

use std::ffi::OsStr;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.no_window();
    cmd
}

/// Build a shell command whose stdout and stderr are merged into one pipe.
///
/// The script runs under `bash -lc` with stderr redirected into stdout, so a
/// single reader observes every output line in the order the process wrote
/// it. The child is killed if its handle is dropped before it exits.
pub fn merged_shell(script: &str) -> Command {
    let mut cmd = command("bash");
    cmd.arg("-lc")
        .arg(format!("{script} 2>&1"))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Wait for a child to exit, killing it first if `cancel` fires.
///
/// A cancelled child is still reaped and its real exit status returned, so
/// callers record a kill the same way as a natural exit.
pub async fn wait_with_cancel(
    child: &mut Child,
    cancel: &CancellationToken,
) -> std::io::Result<std::process::ExitStatus> {
    tokio::select! {
        _ = cancel.cancelled() => {
            let _ = child.start_kill();
            child.wait().await
        }
        status = child.wait() => status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn merged_shell_interleaves_stdout_and_stderr() {
        let mut child = merged_shell("echo out; echo err 1>&2; echo late")
            .spawn()
            .expect("spawn bash");
        let stdout = child.stdout.take().expect("piped stdout");
        let mut lines = BufReader::new(stdout).lines();

        let mut seen = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            seen.push(line);
        }
        assert_eq!(seen, vec!["out", "err", "late"]);

        let status = child.wait().await.expect("wait");
        assert_eq!(status.code(), Some(0));
    }

    #[tokio::test]
    async fn wait_with_cancel_kills_and_reaps() {
        let mut child = merged_shell("sleep 30").spawn().expect("spawn bash");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let status = wait_with_cancel(&mut child, &cancel).await.expect("wait");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn wait_with_cancel_returns_natural_exit() {
        let mut child = merged_shell("exit 3").spawn().expect("spawn bash");
        let cancel = CancellationToken::new();

        let status = wait_with_cancel(&mut child, &cancel).await.expect("wait");
        assert_eq!(status.code(), Some(3));
    }
}
