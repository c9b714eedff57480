//! Product job log: a bounded window plus live fan-out.
//!
//! Separate from `tracing` diagnostics; every entry is mirrored there too.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::core::log_window::LogWindow;
use crate::core::types::{JobId, LogEntry, LogLevel};

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct JobLog {
    window: Mutex<LogWindow>,
    tx: broadcast::Sender<LogEntry>,
}

impl JobLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            window: Mutex::new(LogWindow::new(capacity)),
            tx,
        }
    }

    pub fn emit(&self, job_id: &JobId, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            job_id: job_id.clone(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };
        match level {
            LogLevel::Info | LogLevel::Success => info!(job_id = %job_id, "{}", entry.message),
            LogLevel::Warning => warn!(job_id = %job_id, "{}", entry.message),
            LogLevel::Error => error!(job_id = %job_id, "{}", entry.message),
        }
        // Push and send under one lock so subscribers never miss or repeat an entry.
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.push(entry.clone());
        // No receivers is fine.
        let _ = self.tx.send(entry);
    }

    pub fn info(&self, job_id: &JobId, message: impl Into<String>) {
        self.emit(job_id, LogLevel::Info, message);
    }

    pub fn success(&self, job_id: &JobId, message: impl Into<String>) {
        self.emit(job_id, LogLevel::Success, message);
    }

    pub fn warning(&self, job_id: &JobId, message: impl Into<String>) {
        self.emit(job_id, LogLevel::Warning, message);
    }

    pub fn error(&self, job_id: &JobId, message: impl Into<String>) {
        self.emit(job_id, LogLevel::Error, message);
    }

    /// The last `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        self.window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent(count)
    }

    /// Backlog of the last `backlog` entries plus a receiver for everything after.
    pub fn subscribe(&self, backlog: usize) -> (Vec<LogEntry>, broadcast::Receiver<LogEntry>) {
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        (window.recent(backlog), self.tx.subscribe())
    }
}
