//! Bounded activity log of operation summaries.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default number of entries retained.
pub const DEFAULT_LOG_CAPACITY: usize = 100;

/// Append-only log that evicts its oldest entries once `capacity` is exceeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLog {
    capacity: usize,
    entries: VecDeque<String>,
}

impl ActivityLog {
    /// Creates an empty log. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    /// Rebuilds a log from persisted lines, keeping only the newest `capacity`.
    pub fn from_entries(capacity: usize, lines: Vec<String>) -> Self {
        let mut log = Self::new(capacity);
        let skip = lines.len().saturating_sub(log.capacity);
        log.entries.extend(lines.into_iter().skip(skip));
        log
    }

    /// Appends an entry, dropping the oldest one if the log is full.
    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        debug!(target: "vdisk::activity", "{}", line);
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line);
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Newest entry, if any.
    pub fn last(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    /// Copies entries oldest first.
    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
