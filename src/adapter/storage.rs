use crate::adapter::platform::{Comment, Record};
use crate::config::{Platform, SaveDataOption};
use crate::error::StorageError;
use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// A persisted content record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredContent {
    pub task_id: TaskId,
    pub platform: Platform,
    pub content_id: String,
    pub payload: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredComment {
    pub task_id: TaskId,
    pub platform: Platform,
    pub content_id: String,
    pub comment_id: String,
    pub parent_id: Option<String>,
    pub payload: serde_json::Value,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageQuery {
    pub task_id: Option<TaskId>,
    pub platform: Option<Platform>,
    pub limit: Option<usize>,
}

impl StorageQuery {
    pub fn for_task(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            ..Default::default()
        }
    }

    fn matches(&self, content: &StoredContent) -> bool {
        self.task_id.is_none_or(|id| id == content.task_id)
            && self.platform.is_none_or(|p| p == content.platform)
    }
}

/// Persistence of harvested records
#[async_trait::async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn save_content(
        &self,
        task_id: TaskId,
        platform: Platform,
        record: &Record,
    ) -> Result<(), StorageError>;

    async fn save_comment(
        &self,
        task_id: TaskId,
        platform: Platform,
        content_id: &str,
        comment: &Comment,
    ) -> Result<(), StorageError>;

    async fn query(&self, query: &StorageQuery) -> Result<Vec<StoredContent>, StorageError>;

    /// Render matching content in the given format
    async fn export(
        &self,
        query: &StorageQuery,
        format: SaveDataOption,
    ) -> Result<String, StorageError>;
}

/// Process-local storage backend
#[derive(Debug, Default)]
pub struct MemoryStorage {
    contents: RwLock<Vec<StoredContent>>,
    comments: RwLock<Vec<StoredComment>>,
    failing: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError("storage unavailable".to_string()));
        }
        Ok(())
    }

    pub async fn content_count(&self) -> usize {
        self.contents.read().await.len()
    }

    pub async fn comments_for(&self, content_id: &str) -> Vec<StoredComment> {
        self.comments
            .read()
            .await
            .iter()
            .filter(|c| c.content_id == content_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl StorageAdapter for MemoryStorage {
    async fn save_content(
        &self,
        task_id: TaskId,
        platform: Platform,
        record: &Record,
    ) -> Result<(), StorageError> {
        self.check_available()?;
        let mut contents = self.contents.write().await;
        contents.push(StoredContent {
            task_id,
            platform,
            content_id: record.id.clone(),
            payload: record.payload.clone(),
            saved_at: Utc::now(),
        });
        debug!("Stored content {} for task {}", record.id, task_id);
        Ok(())
    }

    async fn save_comment(
        &self,
        task_id: TaskId,
        platform: Platform,
        content_id: &str,
        comment: &Comment,
    ) -> Result<(), StorageError> {
        self.check_available()?;
        self.comments.write().await.push(StoredComment {
            task_id,
            platform,
            content_id: content_id.to_string(),
            comment_id: comment.id.clone(),
            parent_id: comment.parent_id.clone(),
            payload: comment.payload.clone(),
            saved_at: Utc::now(),
        });
        Ok(())
    }

    async fn query(&self, query: &StorageQuery) -> Result<Vec<StoredContent>, StorageError> {
        let contents = self.contents.read().await;
        let matching = contents.iter().filter(|c| query.matches(c)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn export(
        &self,
        query: &StorageQuery,
        format: SaveDataOption,
    ) -> Result<String, StorageError> {
        let contents = self.query(query).await?;
        match format {
            SaveDataOption::Json => serde_json::to_string_pretty(&contents)
                .map_err(|e| StorageError(format!("failed to encode export: {}", e))),
            SaveDataOption::Csv => {
                let mut out = String::from("task_id,platform,content_id,saved_at,payload\n");
                for content in &contents {
                    out.push_str(&format!(
                        "{},{},{},{},{}\n",
                        content.task_id,
                        content.platform,
                        csv_field(&content.content_id),
                        content.saved_at.to_rfc3339(),
                        csv_field(&content.payload.to_string())
                    ));
                }
                Ok(out)
            }
            SaveDataOption::Db => Err(StorageError(
                "memory storage cannot export to a database".to_string(),
            )),
        }
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
