//! Shared deterministic types for the automation core.
//!
//! These types are the contract between the coordinator, the job store and the
//! outer surfaces (CLI, HTTP API). They serialize to the stable JSON shapes the
//! API returns.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque job identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The attempt currently holding a live child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRun {
    /// Unique token for this attempt's launch (also exported to the child).
    pub token: String,
    /// 1-indexed attempt ordinal.
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

/// One user-submitted automation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub prompt: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub max_attempts: u32,
    /// Number of attempts started so far.
    #[serde(default)]
    pub attempts: u32,
    /// Most recently generated script source.
    #[serde(default)]
    pub code: Option<String>,
    /// Formatted result text of the most recent execution.
    #[serde(default)]
    pub last_result: Option<String>,
    #[serde(default)]
    pub active_run: Option<ActiveRun>,
}

impl Job {
    /// A freshly submitted job, not yet picked up by the coordinator.
    pub fn new(prompt: impl Into<String>, max_attempts: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            id: JobId::generate(),
            prompt: prompt.into(),
            status: JobStatus::Pending,
            started_at,
            finished_at: None,
            max_attempts,
            attempts: 0,
            code: None,
            last_result: None,
            active_run: None,
        }
    }
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Structured log entry emitted at each coordinator phase transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub job_id: JobId,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Captured result of launching one generated script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Process exit code; `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Timeout the launch ran under, reported in the result text.
    pub timeout_secs: u64,
}

/// Classifier judgment for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failure,
}

impl Verdict {
    pub fn is_success(self) -> bool {
        self == Verdict::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Completed).expect("serialize");
        assert_eq!(json, "\"completed\"");
    }

    #[test]
    fn log_level_serializes_uppercase() {
        let json = serde_json::to_string(&LogLevel::Warning).expect("serialize");
        assert_eq!(json, "\"WARNING\"");
        assert_eq!(LogLevel::Warning.as_str(), "WARNING");
    }

    #[test]
    fn only_final_statuses_are_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
    }

    #[test]
    fn new_job_starts_pending_without_attempts() {
        let job = Job::new("open calculator", 3, Utc::now());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(job.code.is_none());
        assert!(job.active_run.is_none());
    }
}
