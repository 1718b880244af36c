use crate::config::{ConfigLayer, CrawlerConfig, Platform, TaskType};
use crate::task::progress::{ProgressSnapshot, ProgressStage, ProgressTracker};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for tasks
pub type TaskId = Uuid;

/// Harvesting request as received from a client. Values are kept raw so
/// that every violation can be reported at once during resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRequest {
    pub platform: String,
    pub task_type: String,
    pub keywords: Option<Vec<String>>,
    pub content_ids: Option<Vec<String>>,
    pub creator_ids: Option<Vec<String>>,
    pub max_count: Option<i64>,
    pub max_comments: Option<i64>,
    pub start_page: Option<i64>,
    pub enable_proxy: Option<bool>,
    pub headless: Option<bool>,
    pub enable_comments: Option<bool>,
    pub enable_sub_comments: Option<bool>,
    pub save_data_option: Option<String>,
    /// Nested overrides, applied above the top-level fields
    pub config: Option<ConfigLayer>,
    /// Drop cached cookies of the platform before running
    pub clear_cookies: bool,
}

impl TaskRequest {
    fn new(platform: &str, task_type: TaskType) -> Self {
        Self {
            platform: platform.to_string(),
            task_type: task_type.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn search<S: Into<String>>(platform: &str, keywords: impl IntoIterator<Item = S>) -> Self {
        Self {
            keywords: Some(keywords.into_iter().map(Into::into).collect()),
            ..Self::new(platform, TaskType::Search)
        }
    }

    pub fn detail<S: Into<String>>(platform: &str, content_ids: impl IntoIterator<Item = S>) -> Self {
        Self {
            content_ids: Some(content_ids.into_iter().map(Into::into).collect()),
            ..Self::new(platform, TaskType::Detail)
        }
    }

    pub fn creator<S: Into<String>>(platform: &str, creator_ids: impl IntoIterator<Item = S>) -> Self {
        Self {
            creator_ids: Some(creator_ids.into_iter().map(Into::into).collect()),
            ..Self::new(platform, TaskType::Creator)
        }
    }

    pub fn with_max_count(mut self, max_count: i64) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub fn with_config(mut self, config: ConfigLayer) -> Self {
        self.config = Some(config);
        self
    }

    /// Configuration fields set directly on the request
    pub fn top_level_layer(&self) -> ConfigLayer {
        ConfigLayer {
            max_count: self.max_count,
            max_comments: self.max_comments,
            start_page: self.start_page,
            enable_proxy: self.enable_proxy,
            headless: self.headless,
            enable_comments: self.enable_comments,
            enable_sub_comments: self.enable_sub_comments,
            save_data_option: self.save_data_option.clone(),
            ..Default::default()
        }
    }
}

/// Validated task inputs with the frozen crawl configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskParameters {
    pub task_type: TaskType,
    pub keywords: Vec<String>,
    pub content_ids: Vec<String>,
    pub creator_ids: Vec<String>,
    pub config: CrawlerConfig,
    pub clear_cookies: bool,
}

impl TaskParameters {
    pub fn platform(&self) -> Platform {
        self.config.platform
    }

    /// Identifiers driving this task's collection
    pub fn identifiers(&self) -> &[String] {
        match self.task_type {
            TaskType::Search => &self.keywords,
            TaskType::Detail => &self.content_ids,
            TaskType::Creator => &self.creator_ids,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Forward-only lifecycle
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry record of one task, owned by the orchestrator
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub parameters: Arc<TaskParameters>,
    pub status: TaskStatus,
    pub progress: ProgressTracker,
    pub result_count: u64,
    pub error_count: u64,
    pub errors: Vec<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(parameters: TaskParameters) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            parameters: Arc::new(parameters),
            status: TaskStatus::Pending,
            progress: ProgressTracker::new(),
            result_count: 0,
            error_count: 0,
            errors: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn platform(&self) -> Platform {
        self.parameters.platform()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Move to `next` if the lifecycle allows it. Returns the previous
    /// status on success.
    pub fn transition(&mut self, next: TaskStatus) -> Option<TaskStatus> {
        if !self.status.can_transition_to(next) {
            return None;
        }
        let previous = self.status;
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        match next {
            TaskStatus::Running => {
                self.started_at = Some(now);
                self.progress.set_stage(ProgressStage::Initializing);
            }
            status if status.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        Some(previous)
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_count += 1;
        self.errors.push(message.into());
        self.touch();
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.id,
            platform: self.platform(),
            task_type: self.parameters.task_type,
            status: self.status,
            progress: self.progress.snapshot(),
            result_count: self.result_count,
            error_count: self.error_count,
            error_message: self.error_message.clone(),
            parameters: (*self.parameters).clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Consistent point-in-time copy of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub platform: Platform,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub progress: ProgressSnapshot,
    pub result_count: u64,
    pub error_count: u64,
    pub error_message: Option<String>,
    pub parameters: TaskParameters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub success: bool,
    pub message: String,
    pub data_count: u64,
    pub error_count: u64,
    pub data: Vec<serde_json::Value>,
    pub errors: Vec<String>,
}

/// Answer of a result query: results exist only once a task is terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskOutcome {
    NotReady {
        status: TaskStatus,
        progress: ProgressSnapshot,
    },
    Ready(TaskResult),
}

impl TaskOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, TaskOutcome::Ready(_))
    }

    pub fn into_result(self) -> Option<TaskResult> {
        match self {
            TaskOutcome::Ready(result) => Some(result),
            TaskOutcome::NotReady { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub platform: Option<Platform>,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn platform(platform: Platform) -> Self {
        Self {
            platform: Some(platform),
            ..Default::default()
        }
    }

    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.platform.is_none_or(|p| p == task.platform())
            && self.status.is_none_or(|s| s == task.status)
    }
}

/// Aggregate view of the task registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total_tasks: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub max_concurrent_tasks: usize,
    pub total_results: u64,
    pub total_errors: u64,
    pub tasks_by_platform: BTreeMap<Platform, usize>,
}
