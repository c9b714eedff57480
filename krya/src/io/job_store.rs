//! Job persistence behind a small store interface.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{debug, warn};

use crate::core::types::{Job, JobId, JobStatus};

/// Result text recorded for jobs that were running when the process exited.
pub const INTERRUPTED_RESULT: &str = "❌ Job interrupted by a restart before it finished";

/// Insert/get/update/list over jobs.
///
/// Implementations must not hold internal locks across calls; `update`
/// applies the closure under the store's lock and returns the new value.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: Job) -> Result<()>;
    fn get(&self, id: &JobId) -> Result<Option<Job>>;
    fn update(&self, id: &JobId, apply: &mut dyn FnMut(&mut Job)) -> Result<Job>;
    /// All jobs ordered by start time.
    fn list(&self) -> Result<Vec<Job>>;
}

/// Process-local store; contents vanish on restart.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) -> Result<()> {
        self.lock().insert(job.id.clone(), job);
        Ok(())
    }

    fn get(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.lock().get(id).cloned())
    }

    fn update(&self, id: &JobId, apply: &mut dyn FnMut(&mut Job)) -> Result<Job> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(id).ok_or_else(|| anyhow!("unknown job {id}"))?;
        apply(job);
        Ok(job.clone())
    }

    fn list(&self) -> Result<Vec<Job>> {
        Ok(sorted(self.lock().values().cloned().collect()))
    }
}

/// Store backed by a JSON file, rewritten atomically after every change.
#[derive(Debug)]
pub struct FileJobStore {
    path: PathBuf,
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl FileJobStore {
    /// Open (or create) the store at `path`.
    ///
    /// Jobs persisted as running cannot still be running; they are marked
    /// failed with [`INTERRUPTED_RESULT`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut jobs = load_jobs(&path)?;
        let mut interrupted = 0usize;
        for job in jobs.values_mut() {
            if matches!(job.status, JobStatus::Running | JobStatus::Pending) {
                job.status = JobStatus::Failed;
                job.finished_at = Some(Utc::now());
                job.active_run = None;
                job.last_result = Some(INTERRUPTED_RESULT.to_string());
                interrupted += 1;
            }
        }
        let store = Self {
            path,
            jobs: Mutex::new(jobs),
        };
        if interrupted > 0 {
            warn!(interrupted, "marked interrupted jobs as failed");
            store.persist(&store.lock())?;
        }
        debug!(path = %store.path.display(), "job store opened");
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, jobs: &HashMap<JobId, Job>) -> Result<()> {
        let ordered = sorted(jobs.values().cloned().collect());
        let mut buf = serde_json::to_string_pretty(&ordered).context("serialize jobs")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

impl JobStore for FileJobStore {
    fn insert(&self, job: Job) -> Result<()> {
        let mut jobs = self.lock();
        jobs.insert(job.id.clone(), job);
        self.persist(&jobs)
    }

    fn get(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.lock().get(id).cloned())
    }

    fn update(&self, id: &JobId, apply: &mut dyn FnMut(&mut Job)) -> Result<Job> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(id).ok_or_else(|| anyhow!("unknown job {id}"))?;
        apply(job);
        let updated = job.clone();
        self.persist(&jobs)?;
        Ok(updated)
    }

    fn list(&self) -> Result<Vec<Job>> {
        Ok(sorted(self.lock().values().cloned().collect()))
    }
}

fn sorted(mut jobs: Vec<Job>) -> Vec<Job> {
    jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.as_str().cmp(b.id.as_str())));
    jobs
}

fn load_jobs(path: &Path) -> Result<HashMap<JobId, Job>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let jobs: Vec<Job> =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(jobs.into_iter().map(|job| (job.id.clone(), job)).collect())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("job store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp job store {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace job store {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(prompt: &str, offset_secs: i64) -> Job {
        Job::new(prompt, 3, Utc::now() + Duration::seconds(offset_secs))
    }

    fn exercise(store: &dyn JobStore) {
        let first = job("open calculator", 0);
        let second = job("open notes", 1);
        store.insert(second.clone()).expect("insert");
        store.insert(first.clone()).expect("insert");

        let fetched = store.get(&first.id).expect("get").expect("present");
        assert_eq!(fetched.prompt, "open calculator");
        assert!(store.get(&JobId::from("missing")).expect("get").is_none());

        let updated = store
            .update(&first.id, &mut |job| {
                job.status = JobStatus::Running;
                job.attempts = 1;
            })
            .expect("update");
        assert_eq!(updated.status, JobStatus::Running);
        assert_eq!(store.get(&first.id).expect("get").expect("present").attempts, 1);

        let listed: Vec<_> = store.list().expect("list").into_iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![first.id.clone(), second.id.clone()]);

        assert!(store.update(&JobId::from("missing"), &mut |_| {}).is_err());
    }

    #[test]
    fn in_memory_store_behaves() {
        exercise(&InMemoryJobStore::new());
    }

    #[test]
    fn file_store_behaves_and_persists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".krya").join("jobs.json");
        let store = FileJobStore::open(&path).expect("open");
        exercise(&store);

        let mut done = job("finished", 5);
        done.status = JobStatus::Completed;
        store.insert(done.clone()).expect("insert");

        let reopened = FileJobStore::open(&path).expect("reopen");
        assert_eq!(reopened.list().expect("list").len(), 3);
        assert_eq!(
            reopened.get(&done.id).expect("get").expect("present").status,
            JobStatus::Completed
        );
    }

    #[test]
    fn reopening_fails_jobs_left_running() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("jobs.json");
        let store = FileJobStore::open(&path).expect("open");
        let mut running = job("open calculator", 0);
        running.status = JobStatus::Running;
        store.insert(running.clone()).expect("insert");
        drop(store);

        let reopened = FileJobStore::open(&path).expect("reopen");
        let job = reopened.get(&running.id).expect("get").expect("present");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.last_result.as_deref(), Some(INTERRUPTED_RESULT));
        assert!(job.finished_at.is_some());

        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"failed\""));
    }
}
