//! Append-only per-job progress and diagnostic trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Severity of a [`JobLogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<LogLevel> {
        match value {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable line in a job's execution trail.
///
/// Entries are owned by their job and removed with it at the schema level;
/// the queue core itself never deletes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    /// Store-assigned sequence id.
    pub id: i64,
    pub job_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    /// Structured detail; `Value::Null` when the line carries none.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// A log line waiting to be appended; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub job_id: Uuid,
    pub level: LogLevel,
    pub message: String,
    pub metadata: Value,
}

impl NewLogEntry {
    pub fn new(job_id: Uuid, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            job_id,
            level,
            message: message.into(),
            metadata: Value::Null,
        }
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}
