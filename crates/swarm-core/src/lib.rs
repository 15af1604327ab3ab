use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod reconcile;
pub mod view;
pub mod wire;

pub use reconcile::{Reconciled, Reconciler};
pub use view::{ProgressView, TaskRow};
pub use wire::{decode_snapshot, encode_snapshot, SnapshotError};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "pending" | "queued" => Ok(TaskStatus::Pending),
            "running" | "in-progress" | "in_progress" | "active" => Ok(TaskStatus::Running),
            "completed" | "done" | "success" => Ok(TaskStatus::Completed),
            "failed" | "error" => Ok(TaskStatus::Failed),
            other => Err(format!("Unknown task status: {other}")),
        }
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            status,
            progress: 0,
            error: None,
        }
    }

    pub fn running(id: impl Into<String>, progress: u8) -> Self {
        Self {
            progress: progress.min(100),
            ..Self::new(id, TaskStatus::Running)
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(id, TaskStatus::Failed)
        }
    }

    /// Progress as shown to the operator: completed tasks read as 100 and
    /// pending tasks as 0 regardless of what the backend reported.
    pub fn effective_progress(&self) -> u8 {
        match self.status {
            TaskStatus::Pending => 0,
            TaskStatus::Running | TaskStatus::Failed => self.progress.min(100),
            TaskStatus::Completed => 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub tasks: BTreeMap<String, TaskRecord>,
}

impl AggregateSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_counts(total: u32, completed: u32, failed: u32) -> Self {
        Self {
            total,
            completed,
            failed,
            ..Self::default()
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    pub fn with_task(mut self, task: TaskRecord) -> Self {
        self.tasks.insert(task.id.clone(), task);
        self
    }

    pub fn settled(&self) -> u32 {
        self.completed.saturating_add(self.failed)
    }

    pub fn pending(&self) -> u32 {
        self.total.saturating_sub(self.settled())
    }

    pub fn is_done(&self) -> bool {
        self.total > 0 && self.settled() == self.total
    }

    pub fn percent_settled(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let percent = u64::from(self.settled().min(self.total)) * 100 / u64::from(self.total);
        percent as u8
    }

    pub fn count_status(&self, status: TaskStatus) -> u32 {
        self.tasks
            .values()
            .filter(|task| task.status == status)
            .count() as u32
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Idle,
    Processing,
    Completed,
}

impl Default for ProcessState {
    fn default() -> Self {
        Self::Idle
    }
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Idle => "idle",
            ProcessState::Processing => "processing",
            ProcessState::Completed => "completed",
        }
    }

    pub fn accepts_start(&self) -> bool {
        !matches!(self, ProcessState::Processing)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    TriggerFailed,
    TransportFailed,
    Info,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::TriggerFailed => "trigger_failed",
            NoticeKind::TransportFailed => "transport_failed",
            NoticeKind::Info => "info",
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, NoticeKind::Info)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}
