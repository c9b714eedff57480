//! Bounded rolling window of job log entries.

use std::collections::VecDeque;

use crate::core::types::LogEntry;

/// Keeps the most recent `capacity` entries, oldest first.
#[derive(Debug, Clone)]
pub struct LogWindow {
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl LogWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The last `count` entries in chronological order.
    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{JobId, LogLevel};
    use chrono::Utc;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            job_id: JobId::from("job-1"),
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.to_string(),
        }
    }

    #[test]
    fn drops_oldest_beyond_capacity() {
        let mut window = LogWindow::new(2);
        window.push(entry("a"));
        window.push(entry("b"));
        window.push(entry("c"));

        let messages: Vec<String> = window.recent(10).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut window = LogWindow::new(10);
        for message in ["a", "b", "c", "d"] {
            window.push(entry(message));
        }
        let messages: Vec<String> = window.recent(2).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["c", "d"]);
        assert_eq!(window.len(), 4);
    }
}
