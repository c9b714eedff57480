//! Job status transitions.
//!
//! `pending → running → {completed, failed, stopped}`. A stop request is
//! accepted from any non-terminal status and wins over every later event:
//! once a job is stopped, success or exhaustion reports are ignored.

use crate::core::types::JobStatus;

/// Events that drive a job through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// The coordinator picked the job up.
    Started,
    /// An attempt was classified as successful.
    Succeeded,
    /// The last attempt in the budget failed.
    Exhausted,
    /// An external stop request arrived.
    StopRequested,
}

/// Apply `event` to `current`.
///
/// Returns the new status, or `None` if the event does not apply (terminal
/// statuses absorb everything, and results are only accepted while running).
pub fn transition(current: JobStatus, event: JobEvent) -> Option<JobStatus> {
    match (current, event) {
        (JobStatus::Pending, JobEvent::Started) => Some(JobStatus::Running),
        (JobStatus::Pending | JobStatus::Running, JobEvent::StopRequested) => {
            Some(JobStatus::Stopped)
        }
        (JobStatus::Running, JobEvent::Succeeded) => Some(JobStatus::Completed),
        (JobStatus::Running, JobEvent::Exhausted) => Some(JobStatus::Failed),
        _ => None,
    }
}
