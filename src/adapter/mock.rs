//! Scriptable in-process collector
//!
//! Generates deterministic records and answers login steps without touching
//! the network. Used by the `simulate` command and throughout the tests.

use crate::adapter::platform::*;
use crate::config::Platform;
use crate::error::AdapterError;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Verification code the mock accepts in phone logins
pub const MOCK_VERIFICATION_CODE: &str = "123456";

pub struct MockPlatformAdapter {
    platform: Platform,
    items_per_source: u32,
    comments_per_item: u32,
    latency: Duration,
    missing_ids: HashSet<String>,
    failure: Option<AdapterError>,
    collect_script: Mutex<VecDeque<Result<CollectedBatch, AdapterError>>>,
    poll_script: Mutex<VecDeque<LoginResult>>,
    collect_calls: AtomicUsize,
    active_calls: AtomicUsize,
    peak_active_calls: AtomicUsize,
}

impl MockPlatformAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            items_per_source: 30,
            comments_per_item: 0,
            latency: Duration::ZERO,
            missing_ids: HashSet::new(),
            failure: None,
            collect_script: Mutex::new(VecDeque::new()),
            poll_script: Mutex::new(VecDeque::new()),
            collect_calls: AtomicUsize::new(0),
            active_calls: AtomicUsize::new(0),
            peak_active_calls: AtomicUsize::new(0),
        }
    }

    /// Records available per keyword or creator
    pub fn with_items_per_source(mut self, items: u32) -> Self {
        self.items_per_source = items;
        self
    }

    /// Comments attached to every record; every third one is a reply
    pub fn with_comments(mut self, comments: u32) -> Self {
        self.comments_per_item = comments;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Content ids reported as item failures by `get_detail`
    pub fn with_missing_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.missing_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Fail every collection call with `error`
    pub fn with_failure(mut self, error: AdapterError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Responses returned by the next collection calls, in order, before
    /// generated data resumes
    pub fn with_collect_script(
        self,
        script: Vec<Result<CollectedBatch, AdapterError>>,
    ) -> Self {
        Self {
            collect_script: Mutex::new(script.into()),
            ..self
        }
    }

    /// Answers to QR code polls, in order; `Pending` once exhausted
    pub fn with_poll_script(self, script: Vec<LoginResult>) -> Self {
        Self {
            poll_script: Mutex::new(script.into()),
            ..self
        }
    }

    pub async fn push_poll_result(&self, result: LoginResult) {
        self.poll_script.lock().await.push_back(result);
    }

    pub fn collect_calls(&self) -> usize {
        self.collect_calls.load(Ordering::SeqCst)
    }

    /// Highest number of collection calls observed in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active_calls.load(Ordering::SeqCst)
    }

    fn record(&self, id: String, source: &str, context: &CollectContext) -> Record {
        let comments = (0..self.comments_per_item)
            .map(|n| Comment {
                id: format!("{}-c{}", id, n),
                parent_id: (n % 3 == 2).then(|| format!("{}-c{}", id, n - 1)),
                payload: json!({ "text": format!("comment {} on {}", n, id) }),
            })
            .collect();

        Record::new(
            id.clone(),
            json!({
                "id": id,
                "platform": self.platform.as_str(),
                "source": source,
                "task_id": context.task_id.to_string(),
            }),
        )
        .with_comments(comments)
    }

    fn page(&self, source: &str, page: u32, page_size: u32, context: &CollectContext) -> CollectedBatch {
        let first = (page.saturating_sub(1) as u64) * page_size as u64;
        let total = self.items_per_source as u64;
        let last = (first + page_size as u64).min(total);

        let records = (first..last)
            .map(|n| self.record(format!("{}-{}", source, n), source, context))
            .collect();

        CollectedBatch {
            records,
            failures: Vec::new(),
            has_more: last < total,
            total_hint: Some(self.items_per_source),
        }
    }

    async fn begin_call(&self) -> Option<Result<CollectedBatch, AdapterError>> {
        self.collect_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active_calls.fetch_max(active, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(error) = &self.failure {
            return Some(Err(error.clone()));
        }
        self.collect_script.lock().await.pop_front()
    }

    fn end_call(&self) {
        self.active_calls.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl PlatformAdapter for MockPlatformAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn login(&self, params: LoginParams) -> Result<LoginResult, AdapterError> {
        let result = match params {
            LoginParams::RequestQrCode => LoginResult::QrCode {
                image: format!("data:image/png;base64,{}", Uuid::new_v4().simple()),
                token: Uuid::new_v4().to_string(),
            },
            LoginParams::PollQrCode { .. } => self
                .poll_script
                .lock()
                .await
                .pop_front()
                .unwrap_or(LoginResult::Pending),
            LoginParams::SubmitPhone { phone } => {
                if !phone.is_empty() && phone.chars().all(|c| c.is_ascii_digit()) {
                    LoginResult::CodeSent
                } else {
                    LoginResult::Rejected {
                        reason: format!("invalid phone number '{}'", phone),
                    }
                }
            }
            LoginParams::SubmitCode { phone, code } => {
                if code == MOCK_VERIFICATION_CODE {
                    LoginResult::Authenticated {
                        cookies: format!("session={}; phone={}", Uuid::new_v4().simple(), phone),
                    }
                } else {
                    LoginResult::Rejected {
                        reason: "verification code mismatch".to_string(),
                    }
                }
            }
            LoginParams::Cookie { cookies } => {
                if cookies.contains('=') {
                    LoginResult::Authenticated { cookies }
                } else {
                    LoginResult::Rejected {
                        reason: "cookie string is malformed".to_string(),
                    }
                }
            }
        };
        Ok(result)
    }

    async fn search(
        &self,
        context: &CollectContext,
        request: &SearchPage,
    ) -> Result<CollectedBatch, AdapterError> {
        let scripted = self.begin_call().await;
        let result = scripted
            .unwrap_or_else(|| Ok(self.page(&request.keyword, request.page, request.page_size, context)));
        self.end_call();
        result
    }

    async fn get_detail(
        &self,
        context: &CollectContext,
        request: &DetailBatch,
    ) -> Result<CollectedBatch, AdapterError> {
        let scripted = self.begin_call().await;
        let result = scripted.unwrap_or_else(|| {
            let mut batch = CollectedBatch::default();
            for id in &request.content_ids {
                if self.missing_ids.contains(id) {
                    batch.failures.push(ItemFailure {
                        item_id: Some(id.clone()),
                        error: AdapterError::permanent(format!("content {} not found", id)),
                    });
                } else {
                    batch.records.push(self.record(id.clone(), "detail", context));
                }
            }
            Ok(batch)
        });
        self.end_call();
        result
    }

    async fn get_creator_data(
        &self,
        context: &CollectContext,
        request: &CreatorPage,
    ) -> Result<CollectedBatch, AdapterError> {
        let scripted = self.begin_call().await;
        let result = scripted.unwrap_or_else(|| {
            Ok(self.page(&request.creator_id, request.page, request.page_size, context))
        });
        self.end_call();
        result
    }
}
