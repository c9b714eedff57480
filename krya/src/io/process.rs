//! Async child process runner with timeout, cancellation and bounded output.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    /// `None` when the child was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self) -> String {
        truncated_notice("stdout", self.stdout_truncated)
    }

    pub fn stderr_truncated_notice(&self) -> String {
        truncated_notice("stderr", self.stderr_truncated)
    }
}

fn truncated_notice(stream: &str, bytes: usize) -> String {
    if bytes > 0 {
        format!("\n[{stream} truncated {bytes} bytes]\n")
    } else {
        String::new()
    }
}

/// Limits applied to one child run.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits {
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL when tearing the process group down.
    pub kill_grace: Duration,
    pub output_limit_bytes: usize,
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Run a command until it exits, times out, or `cancel` fires.
///
/// The child is placed in its own process group so that a timeout or
/// cancellation takes down everything it spawned. Output is drained
/// concurrently; bytes beyond `output_limit_bytes` are counted and dropped.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), output_limit_bytes = limits.output_limit_bytes))]
pub async fn run_command(
    mut cmd: Command,
    limits: RunLimits,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    // Equal to the pid because of `process_group(0)`; captured now since
    // `Child::id` is cleared once the child has been reaped.
    let group = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_handle = tokio::spawn(read_stream_limited(stdout, limits.output_limit_bytes));
    let stderr_handle = tokio::spawn(read_stream_limited(stderr, limits.output_limit_bytes));

    let outcome = tokio::select! {
        status = child.wait() => WaitOutcome::Exited(status.context("wait for command")?),
        () = tokio::time::sleep(limits.timeout) => WaitOutcome::TimedOut,
        () = cancel.cancelled() => WaitOutcome::Cancelled,
    };

    let (status, timed_out, cancelled) = match outcome {
        WaitOutcome::Exited(status) => (status, false, false),
        WaitOutcome::TimedOut => {
            warn!(timeout_secs = limits.timeout.as_secs(), "command timed out, killing");
            (terminate(&mut child, group, limits.kill_grace).await?, true, false)
        }
        WaitOutcome::Cancelled => {
            warn!("command cancelled, killing");
            (terminate(&mut child, group, limits.kill_grace).await?, false, true)
        }
    };

    // Descendants that outlive the child keep the pipes open.
    let (stdout, stdout_truncated) =
        join_output(group, stdout_handle, limits.kill_grace).await.context("join stdout")?;
    let (stderr, stderr_truncated) =
        join_output(group, stderr_handle, limits.kill_grace).await.context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
    })
}

/// SIGTERM the group, give it `grace` to exit, then SIGKILL. Best effort.
async fn terminate(
    child: &mut Child,
    group: Option<u32>,
    grace: Duration,
) -> Result<std::process::ExitStatus> {
    signal_group(group, GroupSignal::Terminate);
    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        let status = status.context("wait command after SIGTERM")?;
        // The leader is gone; stragglers in its group are not.
        signal_group(group, GroupSignal::Kill);
        return Ok(status);
    }
    debug!(grace_ms = grace.as_millis() as u64, "grace period elapsed, sending SIGKILL");
    signal_group(group, GroupSignal::Kill);
    if let Err(e) = child.start_kill() {
        debug!(err = %e, "child kill failed");
    }
    child.wait().await.context("wait command after kill")
}

async fn join_output(
    group: Option<u32>,
    mut handle: JoinHandle<Result<(Vec<u8>, usize)>>,
    grace: Duration,
) -> Result<(Vec<u8>, usize)> {
    let joined = match tokio::time::timeout(grace, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!("output still open after exit, killing process group");
            signal_group(group, GroupSignal::Kill);
            handle.await
        }
    };
    joined.map_err(|_| anyhow!("output reader task panicked"))?
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await.context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(group: Option<u32>, signal: GroupSignal) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(group) = group.and_then(|g| i32::try_from(g).ok()) else {
        return;
    };
    let sig = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    if let Err(e) = killpg(Pid::from_raw(group), sig) {
        debug!(pgid = group, signal = ?sig, err = %e, "signal process group failed");
    }
}

#[cfg(not(unix))]
fn signal_group(_group: Option<u32>, _signal: GroupSignal) {}
