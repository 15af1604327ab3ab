use crate::{AggregateSnapshot, Notice, ProcessState, TaskStatus};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub error: Option<String>,
}

/// Read-only projection of the monitor state for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressView {
    pub state: ProcessState,
    pub seq: Option<u64>,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub running: u32,
    pub pending: u32,
    pub percent: u8,
    pub notice: Option<Notice>,
    pub rows: Vec<TaskRow>,
}

impl ProgressView {
    pub fn project(
        snapshot: &AggregateSnapshot,
        state: ProcessState,
        notice: Option<&Notice>,
    ) -> Self {
        let mut rows: Vec<TaskRow> = snapshot
            .tasks
            .values()
            .map(|task| TaskRow {
                id: task.id.clone(),
                status: task.status,
                progress: task.effective_progress(),
                error: task.error.clone(),
            })
            .collect();
        rows.sort_by(|left, right| compare_task_ids(&left.id, &right.id));
        let running = snapshot.count_status(TaskStatus::Running);

        Self {
            state,
            seq: snapshot.seq,
            total: snapshot.total,
            completed: snapshot.completed,
            failed: snapshot.failed,
            running,
            pending: snapshot.pending().saturating_sub(running),
            percent: snapshot.percent_settled(),
            notice: notice.cloned(),
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.rows.is_empty()
    }
}

/// Numeric ids sort numerically and ahead of non-numeric ones.
pub fn compare_task_ids(left: &str, right: &str) -> Ordering {
    match (left.parse::<u64>(), right.parse::<u64>()) {
        (Ok(left), Ok(right)) => left.cmp(&right),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => left.cmp(right),
    }
}
