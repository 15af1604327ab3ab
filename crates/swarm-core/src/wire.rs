use crate::{AggregateSnapshot, TaskRecord, TaskStatus};
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;
pub const MAX_PROGRESS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("snapshot decode failed: {0}")]
    Decode(String),
    #[error("snapshot encode failed: {0}")]
    Encode(String),
    #[error("snapshot counts exceed total: completed={completed} failed={failed} total={total}")]
    CountsExceedTotal {
        completed: u32,
        failed: u32,
        total: u32,
    },
    #[error("task {task_id} progress out of range: {progress}")]
    ProgressOutOfRange { task_id: String, progress: u32 },
}

/// Snapshot as it travels over the push channel. Per-task entries live under
/// `individual`, keyed by task id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct WireSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
    total: u32,
    completed: u32,
    failed: u32,
    #[serde(default)]
    individual: BTreeMap<String, WireTask>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct WireTask {
    status: TaskStatus,
    progress: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireTaskObject {
    status: TaskStatus,
    #[serde(default)]
    progress: u32,
    #[serde(default)]
    error: Option<String>,
}

impl WireTask {
    /// Older backends publish a bare status string per task, with failures
    /// spelled as `"failed: <reason>"`.
    fn from_legacy(raw: &str) -> Result<Self, String> {
        let (status, reason) = match raw.split_once(':') {
            Some((status, reason)) => (status, Some(reason.trim())),
            None => (raw, None),
        };
        let status = status.parse::<TaskStatus>()?;
        let error = match (status, reason) {
            (TaskStatus::Failed, Some(reason)) if !reason.is_empty() => Some(reason.to_string()),
            _ => None,
        };
        Ok(Self {
            status,
            progress: 0,
            error,
        })
    }
}

impl<'de> Deserialize<'de> for WireTask {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct WireTaskVisitor;

        impl<'de> Visitor<'de> for WireTaskVisitor {
            type Value = WireTask;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a task status string or task object")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                WireTask::from_legacy(value).map_err(E::custom)
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let object = WireTaskObject::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(WireTask {
                    status: object.status,
                    progress: object.progress,
                    error: object.error,
                })
            }
        }

        deserializer.deserialize_any(WireTaskVisitor)
    }
}

impl WireSnapshot {
    fn into_snapshot(self) -> Result<AggregateSnapshot, SnapshotError> {
        let settled = self.completed.checked_add(self.failed);
        if settled.map(|settled| settled > self.total).unwrap_or(true) {
            return Err(SnapshotError::CountsExceedTotal {
                completed: self.completed,
                failed: self.failed,
                total: self.total,
            });
        }

        let mut tasks = BTreeMap::new();
        for (task_id, task) in self.individual {
            // Progress only carries meaning while a task runs.
            if task.status == TaskStatus::Running && task.progress > MAX_PROGRESS {
                return Err(SnapshotError::ProgressOutOfRange {
                    task_id,
                    progress: task.progress,
                });
            }
            let error = if task.status == TaskStatus::Failed {
                task.error
            } else {
                None
            };
            let record = TaskRecord {
                id: task_id.clone(),
                status: task.status,
                progress: task.progress.min(MAX_PROGRESS) as u8,
                error,
            };
            tasks.insert(task_id, record);
        }

        Ok(AggregateSnapshot {
            seq: self.seq,
            total: self.total,
            completed: self.completed,
            failed: self.failed,
            tasks,
        })
    }

    fn from_snapshot(snapshot: &AggregateSnapshot) -> Self {
        let individual = snapshot
            .tasks
            .iter()
            .map(|(task_id, task)| {
                (
                    task_id.clone(),
                    WireTask {
                        status: task.status,
                        progress: u32::from(task.progress),
                        error: task.error.clone(),
                    },
                )
            })
            .collect();
        Self {
            seq: snapshot.seq,
            total: snapshot.total,
            completed: snapshot.completed,
            failed: snapshot.failed,
            individual,
        }
    }
}

pub fn decode_snapshot(text: &str) -> Result<AggregateSnapshot, SnapshotError> {
    decode_snapshot_with_limit(text, DEFAULT_MAX_FRAME_BYTES)
}

/// Parses and validates one pushed message. A message that fails any check
/// is rejected whole.
pub fn decode_snapshot_with_limit(
    text: &str,
    max_frame_bytes: usize,
) -> Result<AggregateSnapshot, SnapshotError> {
    let raw = text.trim_end_matches(['\n', '\r']);
    if raw.len() > max_frame_bytes {
        return Err(SnapshotError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    let wire: WireSnapshot =
        serde_json::from_str(raw).map_err(|err| SnapshotError::Decode(err.to_string()))?;
    wire.into_snapshot()
}

pub fn encode_snapshot(snapshot: &AggregateSnapshot) -> Result<String, SnapshotError> {
    serde_json::to_string(&WireSnapshot::from_snapshot(snapshot))
        .map_err(|err| SnapshotError::Encode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_object_form_tasks() {
        let text = r#"{
            "total": 3,
            "completed": 1,
            "failed": 1,
            "individual": {
                "0": {"status": "completed", "progress": 100},
                "1": {"status": "failed", "progress": 40, "error": "disk full"},
                "2": {"status": "running", "progress": 65}
            }
        }"#;

        let snapshot = decode_snapshot(text).unwrap();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.seq, None);
        assert_eq!(snapshot.tasks.len(), 3);
        assert_eq!(snapshot.tasks["1"].error.as_deref(), Some("disk full"));
        assert_eq!(snapshot.tasks["2"].status, TaskStatus::Running);
        assert_eq!(snapshot.tasks["2"].progress, 65);
    }

    #[test]
    fn decodes_legacy_string_tasks() {
        let text = r#"{
            "total": 3, "completed": 1, "failed": 1,
            "individual": {
                "0": "completed",
                "1": "failed: Simulated failure for task 1",
                "2": {"status": "pending"}
            }
        }"#;

        let snapshot = decode_snapshot(text).unwrap();
        assert_eq!(snapshot.tasks["0"].status, TaskStatus::Completed);
        assert_eq!(snapshot.tasks["1"].status, TaskStatus::Failed);
        assert_eq!(
            snapshot.tasks["1"].error.as_deref(),
            Some("Simulated failure for task 1")
        );
        assert_eq!(snapshot.tasks["2"].status, TaskStatus::Pending);
        assert_eq!(snapshot.tasks["2"].progress, 0);
    }

    #[test]
    fn missing_individual_defaults_to_empty() {
        let snapshot = decode_snapshot(r#"{"total": 0, "completed": 0, "failed": 0}"#).unwrap();
        assert!(snapshot.tasks.is_empty());
        assert!(!snapshot.is_done());
    }

    #[test]
    fn sequence_number_is_optional() {
        let snapshot =
            decode_snapshot(r#"{"seq": 42, "total": 1, "completed": 0, "failed": 0}"#).unwrap();
        assert_eq!(snapshot.seq, Some(42));
    }

    #[test]
    fn error_is_dropped_unless_failed() {
        let text = r#"{"total": 1, "completed": 0, "failed": 0,
            "individual": {"7": {"status": "running", "progress": 5, "error": "stale"}}}"#;
        let snapshot = decode_snapshot(text).unwrap();
        assert_eq!(snapshot.tasks["7"].error, None);
    }

    #[test]
    fn rejects_counts_exceeding_total() {
        let err = decode_snapshot(r#"{"total": 10, "completed": 8, "failed": 3}"#).unwrap_err();
        assert_eq!(
            err,
            SnapshotError::CountsExceedTotal {
                completed: 8,
                failed: 3,
                total: 10
            }
        );
    }

    #[test]
    fn rejects_counts_that_overflow() {
        let text = format!(
            r#"{{"total": 10, "completed": {}, "failed": 1}}"#,
            u32::MAX
        );
        assert!(matches!(
            decode_snapshot(&text),
            Err(SnapshotError::CountsExceedTotal { .. })
        ));
    }

    #[test]
    fn rejects_progress_above_hundred() {
        let text = r#"{"total": 1, "completed": 0, "failed": 0,
            "individual": {"a": {"status": "running", "progress": 140}}}"#;
        assert_eq!(
            decode_snapshot(text).unwrap_err(),
            SnapshotError::ProgressOutOfRange {
                task_id: "a".to_string(),
                progress: 140
            }
        );
    }

    #[test]
    fn ignores_stray_progress_on_settled_tasks() {
        let text = r#"{"total": 2, "completed": 1, "failed": 1,
            "individual": {
                "a": {"status": "completed", "progress": 250},
                "b": {"status": "failed", "progress": 101, "error": "x"}
            }}"#;

        let snapshot = decode_snapshot(text).unwrap();
        assert!(snapshot.is_done());
        assert_eq!(snapshot.tasks["a"].progress, 100);
        assert_eq!(snapshot.tasks["a"].effective_progress(), 100);
        assert_eq!(snapshot.tasks["b"].progress, 100);
        assert_eq!(snapshot.tasks["b"].error.as_deref(), Some("x"));
    }

    #[test]
    fn rejects_negative_counts_and_garbage() {
        assert!(matches!(
            decode_snapshot(r#"{"total": -1, "completed": 0, "failed": 0}"#),
            Err(SnapshotError::Decode(_))
        ));
        assert!(matches!(
            decode_snapshot("not json"),
            Err(SnapshotError::Decode(_))
        ));
        assert!(matches!(
            decode_snapshot(r#"{"total": 1, "completed": 0, "failed": 0, "individual": {"x": "exploded"}}"#),
            Err(SnapshotError::Decode(_))
        ));
    }

    #[test]
    fn rejects_oversized_frames() {
        let text = r#"{"total": 0, "completed": 0, "failed": 0}"#;
        assert!(matches!(
            decode_snapshot_with_limit(text, 8),
            Err(SnapshotError::OversizedFrame { max: 8, .. })
        ));
    }

    #[test]
    fn encoded_snapshot_uses_individual_key() {
        let snapshot = AggregateSnapshot::from_counts(2, 1, 0)
            .with_seq(3)
            .with_task(TaskRecord::new("0", TaskStatus::Completed))
            .with_task(TaskRecord::running("1", 20));

        let text = encode_snapshot(&snapshot).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["individual"]["1"]["status"], "running");
        assert_eq!(value["individual"]["1"]["progress"], 20);
        assert_eq!(decode_snapshot(&text).unwrap(), snapshot);
    }
}
