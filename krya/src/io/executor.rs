//! Script execution abstraction.
//!
//! The [`ScriptExecutor`] trait decouples the retry loop from actually
//! spawning an interpreter. Tests use scripted executors that return
//! predetermined outcomes without touching the desktop.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::types::ExecutionOutcome;
use crate::io::config::ConfigHandle;
use crate::io::lock::{ExecutionSlots, LockError, LockMarker};
use crate::io::process::{CommandOutput, RunLimits, run_command};

/// Environment variable carrying the attempt's run token into the script.
pub const EXECUTION_ID_ENV: &str = "KRYA_EXECUTION_ID";

/// Parameters for one script launch.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub script_path: PathBuf,
    /// Unique per attempt; exported to the child as [`EXECUTION_ID_ENV`].
    pub run_token: String,
    pub workdir: PathBuf,
}

/// Outcome of a launch plus where its output was archived.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Script not found: {}", .path.display())]
    ScriptNotFound { path: PathBuf },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("execution cancelled before launch")]
    Cancelled,

    #[error(transparent)]
    Launch(#[from] anyhow::Error),
}

/// Runs a persisted script to completion, timeout, or cancellation.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ExecError>;
}

/// Launches scripts with the configured interpreter.
pub struct InterpreterExecutor {
    config: ConfigHandle,
    slots: Arc<ExecutionSlots>,
    lock_path: PathBuf,
    log_dir: PathBuf,
}

impl InterpreterExecutor {
    pub fn new(config: ConfigHandle, lock_path: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            slots: Arc::new(ExecutionSlots::new()),
            lock_path: lock_path.into(),
            log_dir: log_dir.into(),
        }
    }
}

#[async_trait]
impl ScriptExecutor for InterpreterExecutor {
    #[instrument(skip_all, fields(script = %request.script_path.display(), token = %request.run_token))]
    async fn execute(
        &self,
        request: &ExecRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ExecError> {
        let cfg = self.config.snapshot().execution;
        if !request.script_path.is_file() {
            return Err(ExecError::ScriptNotFound {
                path: request.script_path.clone(),
            });
        }

        // Both guards live until the end of this scope.
        let (_slot, _marker) = if cfg.guarded {
            let slot = self
                .slots
                .acquire(&request.script_path, cancel)
                .await
                .ok_or(ExecError::Cancelled)?;
            let marker = LockMarker::new(&self.lock_path, Duration::from_secs(cfg.lock_stale_secs))
                .acquire(&request.run_token)?;
            (Some(slot), Some(marker))
        } else {
            (None, None)
        };

        let mut cmd = Command::new(&cfg.interpreter);
        cmd.arg(&request.script_path)
            .current_dir(&request.workdir)
            .env(EXECUTION_ID_ENV, &request.run_token);

        info!(interpreter = %cfg.interpreter, guarded = cfg.guarded, "launching script");
        let limits = RunLimits {
            timeout: Duration::from_secs(cfg.timeout_secs),
            kill_grace: Duration::from_millis(cfg.kill_grace_ms),
            output_limit_bytes: cfg.output_limit_bytes,
        };
        let output = run_command(cmd, limits, cancel)
            .await
            .with_context(|| format!("run {} {}", cfg.interpreter, request.script_path.display()))?;

        let log_path = self.log_dir.join(log_file_name(&request.run_token));
        let log_path = match write_execution_log(&log_path, &output) {
            Ok(()) => Some(log_path),
            Err(e) => {
                warn!(err = %format!("{e:#}"), "failed to write execution log");
                None
            }
        };

        debug!(exit_code = ?output.exit_code, timed_out = output.timed_out, "script finished");
        Ok(ExecutionReport {
            outcome: outcome_from(&output, cfg.timeout_secs),
            log_path,
        })
    }
}

fn outcome_from(output: &CommandOutput, timeout_secs: u64) -> ExecutionOutcome {
    let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    stdout.push_str(output.stdout_truncated_notice().trim_end());
    let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    stderr.push_str(output.stderr_truncated_notice().trim_end());
    ExecutionOutcome {
        exit_code: output.exit_code,
        stdout,
        stderr,
        timed_out: output.timed_out,
        cancelled: output.cancelled,
        timeout_secs,
    }
}

/// `script_<YYYYmmdd_HHMMSS>_<first 8 chars of token>.log`
fn log_file_name(run_token: &str) -> String {
    let short: String = run_token.chars().filter(|c| *c != '-').take(8).collect();
    format!("script_{}_{short}.log", Local::now().format("%Y%m%d_%H%M%S"))
}

fn write_execution_log(path: &Path, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create execution log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str(&output.stdout_truncated_notice());
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    buf.push_str(&output.stderr_truncated_notice());
    if output.timed_out {
        buf.push_str("\n[timed out]\n");
    }
    if output.cancelled {
        buf.push_str("\n[cancelled]\n");
    }
    fs::write(path, buf).with_context(|| format!("write execution log {}", path.display()))
}
