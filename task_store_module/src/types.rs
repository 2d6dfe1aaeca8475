use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;
use crate::timestamps::{deserialize_optional_timestamp, deserialize_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

impl Criticality {
    pub const ALL: [Criticality; 4] = [
        Criticality::Critical,
        Criticality::High,
        Criticality::Medium,
        Criticality::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Criticality::Low => "LOW",
            Criticality::Medium => "MEDIUM",
            Criticality::High => "HIGH",
            Criticality::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Criticality {
    type Err = BackendError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Criticality::Low),
            "MEDIUM" => Ok(Criticality::Medium),
            "HIGH" => Ok(Criticality::High),
            "CRITICAL" => Ok(Criticality::Critical),
            _ => Err(BackendError::InvalidField {
                field: "criticality",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Open,
    Fixed,
    Closed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "OPEN",
            TaskStatus::Fixed => "FIXED",
            TaskStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = BackendError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(TaskStatus::Open),
            "FIXED" => Ok(TaskStatus::Fixed),
            "CLOSED" => Ok(TaskStatus::Closed),
            _ => Err(BackendError::InvalidField {
                field: "status",
                value: value.to_string(),
            }),
        }
    }
}

/// A task record as the backend returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub creator_name: String,
    #[serde(rename = "assigner_name")]
    pub assignee_name: String,
    pub subject: String,
    pub criticality: Criticality,
    pub status: TaskStatus,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub html_file: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_time: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub last_reminder_sent_time: Option<DateTime<Utc>>,
}

impl Task {
    /// Reminder clock start: the last reminder, else creation.
    pub fn reminder_baseline(&self) -> DateTime<Utc> {
        self.last_reminder_sent_time.unwrap_or(self.created_time)
    }
}

/// Fields for a task that does not exist yet. The body travels separately as a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub creator_name: String,
    pub assignee_name: String,
    pub subject: String,
    pub criticality: Criticality,
    pub status: TaskStatus,
    pub thread_id: String,
}

impl NewTask {
    /// New tasks start at MEDIUM / OPEN.
    pub fn open(
        creator_name: impl Into<String>,
        assignee_name: impl Into<String>,
        subject: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> Self {
        Self {
            creator_name: creator_name.into(),
            assignee_name: assignee_name.into(),
            subject: subject.into(),
            criticality: Criticality::Medium,
            status: TaskStatus::Open,
            thread_id: thread_id.into(),
        }
    }
}
