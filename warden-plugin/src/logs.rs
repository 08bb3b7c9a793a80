//! Bounded per-plugin log buffer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use warden_ipc::LogSink;

/// Default number of retained lines
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// One captured log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Ring buffer of the most recent log lines for one plugin
#[derive(Debug)]
pub struct PluginLogBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl PluginLogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a line, evicting the oldest one when full
    pub fn push(&self, level: impl Into<String>, message: impl Into<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(LogEntry {
            timestamp: Utc::now(),
            level: level.into(),
            message: message.into(),
        });
    }

    /// The last `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PluginLogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogSink for PluginLogBuffer {
    fn log_line(&self, _plugin_id: &str, line: &str) {
        self.push("info", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_evicts_oldest() {
        let buffer = PluginLogBuffer::new(3);
        for i in 0..5 {
            buffer.push("info", format!("line {}", i));
        }

        assert_eq!(buffer.len(), 3);
        let messages: Vec<String> = buffer.recent(10).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_recent_returns_tail() {
        let buffer = PluginLogBuffer::default();
        buffer.push("warn", "first");
        buffer.log_line("camera", "second");

        let tail = buffer.recent(1);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, "second");
        assert_eq!(tail[0].level, "info");
        assert!(buffer.recent(0).is_empty());
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let buffer = PluginLogBuffer::new(0);
        buffer.push("info", "kept");
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.len(), 1);
    }
}
