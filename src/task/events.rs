use crate::config::{Platform, TaskType};
use crate::task::progress::ProgressStage;
use crate::task::types::{TaskId, TaskStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Events that can occur during a task's lifetime
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    TaskCreated {
        task_id: TaskId,
        platform: Platform,
        task_type: TaskType,
    },
    TaskQueued {
        task_id: TaskId,
        position: usize,
    },
    TaskStatusChanged {
        task_id: TaskId,
        old_status: TaskStatus,
        new_status: TaskStatus,
    },
    ProgressUpdated {
        task_id: TaskId,
        stage: ProgressStage,
        completed: u64,
        failed: u64,
        total: Option<u64>,
    },
    ItemFailed {
        task_id: TaskId,
        item: Option<String>,
        error: String,
    },
    TaskCompleted {
        task_id: TaskId,
        result_count: u64,
        error_count: u64,
    },
    TaskFailed {
        task_id: TaskId,
        error: String,
    },
    TaskCancelled {
        task_id: TaskId,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::TaskCreated { task_id, .. }
            | TaskEvent::TaskQueued { task_id, .. }
            | TaskEvent::TaskStatusChanged { task_id, .. }
            | TaskEvent::ProgressUpdated { task_id, .. }
            | TaskEvent::ItemFailed { task_id, .. }
            | TaskEvent::TaskCompleted { task_id, .. }
            | TaskEvent::TaskFailed { task_id, .. }
            | TaskEvent::TaskCancelled { task_id } => *task_id,
        }
    }

    pub fn level(&self) -> EventLevel {
        match self {
            TaskEvent::ItemFailed { .. } => EventLevel::Warning,
            TaskEvent::TaskFailed { .. } => EventLevel::Error,
            _ => EventLevel::Info,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TaskEvent::TaskCreated {
                platform, task_type, ..
            } => format!("created {} task on {}", task_type, platform),
            TaskEvent::TaskQueued { position, .. } => {
                format!("waiting for a free slot (queue position {})", position)
            }
            TaskEvent::TaskStatusChanged {
                old_status,
                new_status,
                ..
            } => format!("status {} -> {}", old_status, new_status),
            TaskEvent::ProgressUpdated {
                stage,
                completed,
                failed,
                total,
                ..
            } => match total {
                Some(total) => format!(
                    "{}: {}/{} collected, {} failed",
                    stage, completed, total, failed
                ),
                None => format!("{}: {} collected, {} failed", stage, completed, failed),
            },
            TaskEvent::ItemFailed { item, error, .. } => match item {
                Some(item) => format!("{} failed: {}", item, error),
                None => format!("batch failed: {}", error),
            },
            TaskEvent::TaskCompleted {
                result_count,
                error_count,
                ..
            } => format!(
                "completed with {} results and {} errors",
                result_count, error_count
            ),
            TaskEvent::TaskFailed { error, .. } => format!("failed: {}", error),
            TaskEvent::TaskCancelled { .. } => "cancelled".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

/// Entry of a task's event history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEventRecord {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
}

impl From<&TaskEvent> for TaskEventRecord {
    fn from(event: &TaskEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            level: event.level(),
            message: event.describe(),
        }
    }
}

/// Handler for task events
pub trait TaskEventHandler {
    fn handle_event(&self, event: &TaskEvent) -> Result<()>;
}

/// Default event handler that logs events
pub struct LoggingEventHandler;

impl TaskEventHandler for LoggingEventHandler {
    fn handle_event(&self, event: &TaskEvent) -> Result<()> {
        let task_id = event.task_id();
        if let TaskEvent::ProgressUpdated { .. } = event {
            debug!("Task {}: {}", task_id, event.describe());
            return Ok(());
        }
        match event.level() {
            EventLevel::Info => info!("Task {}: {}", task_id, event.describe()),
            EventLevel::Warning => warn!("Task {}: {}", task_id, event.describe()),
            EventLevel::Error => error!("Task {}: {}", task_id, event.describe()),
        }
        Ok(())
    }
}
