//! Retry coordinator: generate → write → launch → classify, per job.
//!
//! Each submitted job runs as its own background task. Attempts within a job
//! are strictly sequential; stop requests are observed before generation,
//! after generation, during execution (through the job's cancellation token)
//! and after execution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::budget::{InvalidBudget, resolve_max_attempts};
use crate::core::classifier::classify;
use crate::core::cleaning::uses_interactive_apis;
use crate::core::cooldown::PromptCooldown;
use crate::core::report::{format_execution_result, format_launch_failure, reported_exit_code};
use crate::core::status::{JobEvent, transition};
use crate::core::types::{ActiveRun, Job, JobId, JobStatus, LogEntry};
use crate::io::config::ConfigHandle;
use crate::io::executor::{ExecError, ExecRequest, ScriptExecutor};
use crate::io::generator::{CodeGenerator, GenerationRequest};
use crate::io::init::KryaPaths;
use crate::io::job_store::JobStore;
use crate::io::lock::LockMarker;
use crate::io::script::write_script;
use crate::job_log::JobLog;

/// Why a submission was refused.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error(transparent)]
    InvalidBudget(#[from] InvalidBudget),

    #[error("API key not configured. Please set up your API key first.")]
    MissingCredential,

    #[error("This prompt was executed too recently. Please wait a few seconds before trying again.")]
    Cooldown,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: JobId,
    pub status: JobStatus,
    /// `true` when an identical running job was returned instead of a new one.
    pub duplicate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveJob {
    pub job_id: JobId,
    pub prompt: String,
    pub status: JobStatus,
    pub started_at: chrono::DateTime<Utc>,
}

/// Snapshot returned by the status interface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub job_counts: JobCounts,
    pub active_jobs: Vec<ActiveJob>,
    pub recent_logs: Vec<LogEntry>,
}

/// Handle to a job task that has not finished yet.
struct RunningJob {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

enum AttemptResult {
    Succeeded,
    Failed,
    Stopped,
}

pub struct Coordinator {
    config: ConfigHandle,
    paths: KryaPaths,
    store: Arc<dyn JobStore>,
    generator: Arc<dyn CodeGenerator>,
    executor: Arc<dyn ScriptExecutor>,
    log: JobLog,
    /// Serializes admission (duplicate and cooldown checks).
    admission: Mutex<PromptCooldown>,
    running: Mutex<HashMap<JobId, RunningJob>>,
}

impl Coordinator {
    pub fn new(
        config: ConfigHandle,
        paths: KryaPaths,
        store: Arc<dyn JobStore>,
        generator: Arc<dyn CodeGenerator>,
        executor: Arc<dyn ScriptExecutor>,
    ) -> Arc<Self> {
        let jobs = config.snapshot().jobs;
        Arc::new(Self {
            config,
            paths,
            store,
            generator,
            executor,
            log: JobLog::new(jobs.log_window),
            admission: Mutex::new(PromptCooldown::new(Duration::from_secs(jobs.prompt_cooldown_secs))),
            running: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn log(&self) -> &JobLog {
        &self.log
    }

    /// Remove a lock marker abandoned by an earlier process.
    pub fn startup(&self) -> Result<()> {
        let cfg = self.config.snapshot().execution;
        let marker = LockMarker::new(&self.paths.lock_path, Duration::from_secs(cfg.lock_stale_secs));
        if marker.path().exists() && marker.remove_if_stale()? {
            info!(path = %marker.path().display(), "removed stale lock marker");
        }
        Ok(())
    }

    /// Accept a prompt and start working on it in the background.
    ///
    /// Returns immediately with the job id and its initial status.
    #[instrument(skip_all, fields(max_attempts = ?max_attempts))]
    pub fn submit(
        self: &Arc<Self>,
        prompt: &str,
        max_attempts: Option<u32>,
    ) -> Result<Submission, SubmitError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SubmitError::EmptyPrompt);
        }
        let cfg = self.config.snapshot();
        let max_attempts = resolve_max_attempts(
            max_attempts,
            cfg.jobs.default_max_attempts,
            cfg.jobs.max_attempts_limit,
        )?;
        if cfg.generation.resolve_api_key().is_none() {
            return Err(SubmitError::MissingCredential);
        }

        let mut cooldown = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        let window = i64::try_from(cfg.jobs.duplicate_window_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .unwrap_or(chrono::TimeDelta::MAX);
        let now = Utc::now();
        if let Some(existing) = self
            .store
            .list()?
            .into_iter()
            .find(|job| job.prompt == prompt && job.status == JobStatus::Running && now - job.started_at < window)
        {
            info!(job_id = %existing.id, "prompt already being processed");
            return Ok(Submission {
                job_id: existing.id,
                status: existing.status,
                duplicate: true,
            });
        }
        if !cooldown.check_and_record(prompt, Instant::now()) {
            return Err(SubmitError::Cooldown);
        }

        let mut job = Job::new(prompt, max_attempts, now);
        if let Some(next) = transition(job.status, JobEvent::Started) {
            job.status = next;
        }
        let job_id = job.id.clone();
        let status = job.status;
        self.store.insert(job).context("insert job")?;
        drop(cooldown);

        self.log
            .info(&job_id, format!("Starting automation job with prompt: {prompt}"));

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.lock_running().insert(
            job_id.clone(),
            RunningJob {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let this = Arc::clone(self);
        let task_id = job_id.clone();
        let task_prompt = prompt.to_string();
        tokio::spawn(async move {
            this.run_job(&task_id, &task_prompt, max_attempts, &cancel).await;
            this.lock_running().remove(&task_id);
            let _ = done_tx.send(true);
        });

        Ok(Submission {
            job_id,
            status,
            duplicate: false,
        })
    }

    /// Request a stop. Returns `None` for unknown ids.
    ///
    /// Terminal jobs are returned unchanged.
    pub fn stop(&self, job_id: &JobId) -> Result<Option<Job>> {
        let Some(job) = self.store.get(job_id)? else {
            return Ok(None);
        };
        if job.status.is_terminal() {
            return Ok(Some(job));
        }

        self.log.info(job_id, "Stopping job by user request...");
        // Cancel first: the child must die even if recording the status fails.
        let cancel = self.lock_running().get(job_id).map(|r| r.cancel.clone());
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        let updated = self.store.update(job_id, &mut |job| {
            if let Some(next) = transition(job.status, JobEvent::StopRequested) {
                job.status = next;
                job.finished_at = Some(Utc::now());
            }
        })?;

        if job.active_run.is_some() {
            self.log.success(job_id, "Job terminated successfully");
        } else {
            self.log.info(job_id, "No active process found to terminate");
        }
        Ok(Some(updated))
    }

    pub fn job(&self, job_id: &JobId) -> Result<Option<Job>> {
        self.store.get(job_id)
    }

    pub fn jobs(&self) -> Result<Vec<Job>> {
        self.store.list()
    }

    /// Wait for a job's background task to finish and return the job.
    pub async fn wait(&self, job_id: &JobId) -> Result<Option<Job>> {
        let done = self.lock_running().get(job_id).map(|r| r.done.clone());
        if let Some(mut done) = done {
            // A dropped sender also means the task is gone.
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.store.get(job_id)
    }

    pub fn status(&self) -> Result<StatusSummary> {
        let jobs = self.store.list()?;
        let mut counts = JobCounts::default();
        let mut active_jobs = Vec::new();
        for job in jobs {
            match job.status {
                JobStatus::Pending => {}
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Stopped => counts.stopped += 1,
            }
            if job.status == JobStatus::Running {
                active_jobs.push(ActiveJob {
                    job_id: job.id,
                    prompt: job.prompt,
                    status: job.status,
                    started_at: job.started_at,
                });
            }
        }
        let count = self.config.snapshot().jobs.status_log_count;
        Ok(StatusSummary {
            job_counts: counts,
            active_jobs,
            recent_logs: self.log.recent(count),
        })
    }

    /// Cancel every running job, wait for the tasks, and clear the lock marker.
    pub async fn shutdown(&self) -> Result<()> {
        let running: Vec<(JobId, CancellationToken, watch::Receiver<bool>)> = self
            .lock_running()
            .iter()
            .map(|(id, r)| (id.clone(), r.cancel.clone(), r.done.clone()))
            .collect();
        info!(jobs = running.len(), "shutting down coordinator");
        for (job_id, cancel, _) in &running {
            if let Err(e) = self.stop(job_id) {
                warn!(job_id = %job_id, err = %format!("{e:#}"), "failed to stop job");
            }
            cancel.cancel();
        }
        for (_, _, mut done) in running {
            let _ = done.wait_for(|finished| *finished).await;
        }
        let marker = LockMarker::new(&self.paths.lock_path, Duration::ZERO);
        if marker.clear()? {
            debug!(path = %marker.path().display(), "removed lock marker on shutdown");
        }
        Ok(())
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, RunningJob>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self, job_id: &JobId, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        matches!(self.store.get(job_id), Ok(Some(job)) if job.status == JobStatus::Stopped)
    }

    #[instrument(skip_all, fields(job_id = %job_id, max_attempts = max_attempts))]
    async fn run_job(&self, job_id: &JobId, prompt: &str, max_attempts: u32, cancel: &CancellationToken) {
        for attempt in 1..=max_attempts {
            match self.run_attempt(job_id, prompt, attempt, max_attempts, cancel).await {
                AttemptResult::Stopped => {
                    debug!(attempt, "job stopped");
                    return;
                }
                AttemptResult::Succeeded => {
                    self.apply(job_id, JobEvent::Succeeded);
                    return;
                }
                AttemptResult::Failed => {
                    if self.is_stopped(job_id, cancel) {
                        return;
                    }
                    if attempt < max_attempts {
                        self.log.info(job_id, "Will retry with improved code...");
                    } else {
                        self.log
                            .error(job_id, "Max retries reached. Please check the code manually.");
                        self.apply(job_id, JobEvent::Exhausted);
                    }
                }
            }
        }
    }

    /// One generate → write → launch → classify cycle.
    ///
    /// Every error is absorbed here and reported as a failed attempt.
    async fn run_attempt(
        &self,
        job_id: &JobId,
        prompt: &str,
        attempt: u32,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> AttemptResult {
        if self.is_stopped(job_id, cancel) {
            return AttemptResult::Stopped;
        }
        self.log.info(
            job_id,
            format!("Attempt {attempt}/{max_attempts}: Generating code..."),
        );

        let job = match self.store.update(job_id, &mut |job| job.attempts = attempt) {
            Ok(job) => job,
            Err(e) => return self.attempt_error(job_id, attempt, &format!("{e:#}")),
        };
        let request = match job.last_result.filter(|_| attempt > 1) {
            Some(feedback) => GenerationRequest::with_feedback(prompt, feedback),
            None => GenerationRequest::initial(prompt),
        };

        let generated = tokio::select! {
            biased;
            () = cancel.cancelled() => return AttemptResult::Stopped,
            generated = self.generator.generate(&request) => generated,
        };
        let code = match generated {
            Ok(code) => code,
            Err(e) => return self.attempt_error(job_id, attempt, &e.to_string()),
        };
        self.log.success(job_id, "Code generated successfully!");
        if uses_interactive_apis(&code) {
            self.log.info(
                job_id,
                "Generated script controls the desktop directly",
            );
        }
        if let Err(e) = self.store.update(job_id, &mut |job| job.code = Some(code.clone())) {
            return self.attempt_error(job_id, attempt, &format!("{e:#}"));
        }
        if self.is_stopped(job_id, cancel) {
            return AttemptResult::Stopped;
        }

        if let Err(e) = write_script(&self.paths.script_path, &code) {
            return self.attempt_error(job_id, attempt, &format!("{e:#}"));
        }

        let run_token = Uuid::new_v4().to_string();
        let mut refused = false;
        let claimed = self.store.update(job_id, &mut |job| {
            refused = job.active_run.is_some();
            if !refused {
                job.active_run = Some(ActiveRun {
                    token: run_token.clone(),
                    attempt,
                    started_at: Utc::now(),
                });
            }
        });
        if let Err(e) = claimed {
            self.release_run(job_id, &run_token);
            return self.attempt_error(job_id, attempt, &format!("{e:#}"));
        }
        if refused {
            return self.attempt_error(job_id, attempt, "previous run is still active");
        }

        let guarded = self.config.snapshot().execution.guarded;
        let mode = if guarded { "guarded" } else { "direct" };
        self.log
            .info(job_id, format!("Running script with {mode} execution..."));
        let exec_request = ExecRequest {
            script_path: self.paths.script_path.clone(),
            run_token,
            workdir: self.paths.root.clone(),
        };
        let executed = self.executor.execute(&exec_request, cancel).await;
        self.release_run(job_id, &exec_request.run_token);

        let report = match executed {
            Ok(report) => report,
            Err(ExecError::Cancelled) => return AttemptResult::Stopped,
            Err(e) => {
                let text = format_launch_failure(&e.to_string());
                self.record_result(job_id, text);
                return self.attempt_error(job_id, attempt, &e.to_string());
            }
        };
        if let Some(path) = &report.log_path {
            debug!(log = %path.display(), "execution log written");
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let text = format_execution_result(&report.outcome, &timestamp);
        self.record_result(job_id, text.clone());
        if report.outcome.cancelled || self.is_stopped(job_id, cancel) {
            return AttemptResult::Stopped;
        }

        if classify(Some(reported_exit_code(&report.outcome)), &text).is_success() {
            self.log.success(job_id, "Execution completed successfully!");
            AttemptResult::Succeeded
        } else {
            self.log
                .warning(job_id, format!("Execution failed on attempt {attempt}"));
            AttemptResult::Failed
        }
    }

    /// Clear the job's active run if it still belongs to `run_token`.
    fn release_run(&self, job_id: &JobId, run_token: &str) {
        let result = self.store.update(job_id, &mut |job| {
            if job.active_run.as_ref().is_some_and(|run| run.token == run_token) {
                job.active_run = None;
            }
        });
        if let Err(e) = result {
            warn!(job_id = %job_id, err = %format!("{e:#}"), "failed to clear active run");
        }
    }

    fn attempt_error(&self, job_id: &JobId, attempt: u32, message: &str) -> AttemptResult {
        self.log
            .error(job_id, format!("Error on attempt {attempt}: {message}"));
        AttemptResult::Failed
    }

    fn record_result(&self, job_id: &JobId, text: String) {
        if let Err(e) = self
            .store
            .update(job_id, &mut |job| job.last_result = Some(text.clone()))
        {
            warn!(job_id = %job_id, err = %format!("{e:#}"), "failed to record result");
        }
    }

    /// Apply a lifecycle event; ignored when the job has already moved on.
    fn apply(&self, job_id: &JobId, event: JobEvent) {
        let result = self.store.update(job_id, &mut |job| {
            if let Some(next) = transition(job.status, event) {
                job.status = next;
                job.finished_at = Some(Utc::now());
            }
        });
        match result {
            Ok(job) => debug!(job_id = %job_id, status = %job.status, ?event, "job status"),
            Err(e) => warn!(job_id = %job_id, err = %format!("{e:#}"), "failed to update job status"),
        }
    }
}
