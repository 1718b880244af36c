//! Platform collector capability
//!
//! A [`PlatformAdapter`] performs the actual network work for one platform:
//! login handshakes and batch collection. The orchestrator and the login
//! manager only talk to platforms through this trait.

use crate::config::{CrawlerConfig, Platform};
use crate::error::AdapterError;
use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// One login step requested from a platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginParams {
    RequestQrCode,
    PollQrCode { token: String },
    SubmitPhone { phone: String },
    SubmitCode { phone: String, code: String },
    Cookie { cookies: String },
}

/// Platform response to a [`LoginParams`] step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoginResult {
    /// A fresh QR code; `token` identifies it in later polls
    QrCode { image: String, token: String },
    /// Nothing happened yet
    Pending,
    Scanned,
    CodeSent,
    Authenticated { cookies: String },
    Rejected { reason: String },
}

/// Context shared by every collection call of one task
#[derive(Debug, Clone)]
pub struct CollectContext {
    pub task_id: TaskId,
    pub config: Arc<CrawlerConfig>,
    pub cookies: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    pub keyword: String,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailBatch {
    pub content_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatorPage {
    pub creator_id: String,
    pub page: u32,
    pub page_size: u32,
}

/// A harvested content item with its comments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Record {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
            comments: Vec::new(),
        }
    }

    pub fn with_comments(mut self, comments: Vec<Comment>) -> Self {
        self.comments = comments;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    /// Set for replies to another comment
    pub parent_id: Option<String>,
    pub payload: serde_json::Value,
}

impl Comment {
    pub fn is_sub_comment(&self) -> bool {
        self.parent_id.is_some()
    }
}

/// An item the platform could not deliver within an otherwise successful batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_id: Option<String>,
    pub error: AdapterError,
}

/// Result of one adapter collection call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectedBatch {
    pub records: Vec<Record>,
    pub failures: Vec<ItemFailure>,
    /// Whether a further page exists after this one
    pub has_more: bool,
    /// Platform-reported total, when known
    pub total_hint: Option<u32>,
}

#[async_trait::async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    async fn login(&self, params: LoginParams) -> Result<LoginResult, AdapterError>;

    async fn search(
        &self,
        context: &CollectContext,
        request: &SearchPage,
    ) -> Result<CollectedBatch, AdapterError>;

    async fn get_detail(
        &self,
        context: &CollectContext,
        request: &DetailBatch,
    ) -> Result<CollectedBatch, AdapterError>;

    async fn get_creator_data(
        &self,
        context: &CollectContext,
        request: &CreatorPage,
    ) -> Result<CollectedBatch, AdapterError>;
}

/// Adapters keyed by the platform they serve
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` for the platform it reports, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.adapters.contains_key(&platform)
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<_> = self.adapters.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("platforms", &self.platforms())
            .finish()
    }
}
