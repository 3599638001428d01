//! Operator-visible event log

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::updates::{Resource, UpdateBroadcaster, UpdateCmd};

/// Severity of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Alert,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Alert => "alert",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "alert" => Ok(LogLevel::Alert),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// A single logged event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Sequence number, unique for the lifetime of the log
    pub id: u64,

    pub level: LogLevel,

    pub message: String,

    pub timestamp: DateTime<Utc>,
}

struct Entries {
    items: VecDeque<LogEntry>,
    next_id: u64,
}

/// Bounded, append-only event log. The oldest entries are dropped once
/// `capacity` is reached.
pub struct EventLog {
    entries: Mutex<Entries>,
    capacity: usize,
    updates: Arc<UpdateBroadcaster>,
}

impl EventLog {
    pub fn new(capacity: usize, updates: Arc<UpdateBroadcaster>) -> Self {
        Self {
            entries: Mutex::new(Entries {
                items: VecDeque::new(),
                next_id: 1,
            }),
            capacity: capacity.max(1),
            updates,
        }
    }

    /// Append an event, mirror it to tracing and push it to observers
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let message = message.into();
        match level {
            LogLevel::Error => tracing::error!(target: "eventlog", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "eventlog", "{}", message),
            LogLevel::Info | LogLevel::Alert => tracing::info!(target: "eventlog", level = %level, "{}", message),
            LogLevel::Debug => tracing::debug!(target: "eventlog", "{}", message),
        }

        let mut entries = self.entries.lock();
        let entry = LogEntry {
            id: entries.next_id,
            level,
            message,
            timestamp: Utc::now(),
        };
        entries.next_id += 1;
        entries.items.push_back(entry.clone());
        while entries.items.len() > self.capacity {
            entries.items.pop_front();
        }
        // published under the lock so observers see log order
        self.updates
            .publish(Resource::Events, UpdateCmd::Add, entry_to_json(&entry));
        entry
    }

    pub fn info(&self, message: impl Into<String>) -> LogEntry {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: impl Into<String>) -> LogEntry {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: impl Into<String>) -> LogEntry {
        self.log(LogLevel::Error, message)
    }

    /// Snapshot of all retained entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().items.is_empty()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.items.clear();
        self.updates
            .publish(Resource::Events, UpdateCmd::Reset, Value::Null);
    }
}

/// Observer representation of an entry
pub fn entry_to_json(entry: &LogEntry) -> Value {
    serde_json::json!({
        "id": entry.id.to_string(),
        "level": entry.level,
        "message": entry.message,
        "timestamp": crate::flow::epoch_secs(&entry.timestamp),
    })
}
