//! Execution of one admitted task
//!
//! A worker walks the task's identifiers in bounded batches. Between batches
//! it pauses for a random delay and checks its cancellation token, so a
//! cancelled task stops within one batch.

use crate::adapter::{
    CollectContext, CollectedBatch, CreatorPage, DetailBatch, PlatformAdapter, Record, SearchPage,
};
use crate::config::TaskType;
use crate::error::{AdapterError, HarvestError};
use crate::task::events::TaskEvent;
use crate::task::orchestrator::OrchestratorInner;
use crate::task::progress::ProgressStage;
use crate::task::types::{TaskId, TaskParameters};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a worker left its task
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkerOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// The source has a further page
    More,
    /// The source or the quota is used up
    Exhausted,
    Cancelled,
}

enum BatchRequest {
    Search(SearchPage),
    Detail(DetailBatch),
    Creator(CreatorPage),
}

impl BatchRequest {
    fn label(&self) -> String {
        match self {
            BatchRequest::Search(p) => format!("search '{}' page {}", p.keyword, p.page),
            BatchRequest::Detail(d) => match (d.content_ids.first(), d.content_ids.len()) {
                (Some(first), 1) => format!("detail {}", first),
                (Some(first), n) => format!("detail {} (+{} more)", first, n - 1),
                (None, _) => "detail".to_string(),
            },
            BatchRequest::Creator(p) => format!("creator {} page {}", p.creator_id, p.page),
        }
    }

    fn item_count(&self) -> u64 {
        match self {
            BatchRequest::Detail(d) => d.content_ids.len() as u64,
            _ => 1,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub(crate) struct TaskWorker {
    inner: Arc<OrchestratorInner>,
    task_id: TaskId,
    parameters: Arc<TaskParameters>,
    adapter: Arc<dyn PlatformAdapter>,
    cancel: CancellationToken,
    context: CollectContext,
    collected: u64,
    batches: u64,
    consecutive_failures: u32,
    total_failures: u32,
    last_error: Option<AdapterError>,
}

impl TaskWorker {
    pub(crate) fn new(
        inner: Arc<OrchestratorInner>,
        task_id: TaskId,
        parameters: Arc<TaskParameters>,
        adapter: Arc<dyn PlatformAdapter>,
        cancel: CancellationToken,
    ) -> Self {
        let context = CollectContext {
            task_id,
            config: Arc::new(parameters.config.clone()),
            cookies: None,
        };
        Self {
            inner,
            task_id,
            parameters,
            adapter,
            cancel,
            context,
            collected: 0,
            batches: 0,
            consecutive_failures: 0,
            total_failures: 0,
            last_error: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let inner = self.inner.clone();
        let task_id = self.task_id;
        let limit_secs = inner.config.task_timeout_secs;

        // A panicking collector must still release the task's slot
        let bounded = tokio::time::timeout(Duration::from_secs(limit_secs), self.collect());
        let outcome = match AssertUnwindSafe(bounded).catch_unwind().await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(e))) => WorkerOutcome::Failed(e.to_string()),
            Ok(Err(_)) => WorkerOutcome::Failed(
                HarvestError::Timeout {
                    operation: format!("task {}", task_id),
                    elapsed_secs: limit_secs,
                }
                .to_string(),
            ),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!("Worker for task {} panicked: {}", task_id, reason);
                WorkerOutcome::Failed(format!("collector panicked: {}", reason))
            }
        };

        debug!("Worker for task {} finished: {:?}", task_id, outcome);
        inner.finish_task(task_id, outcome).await;
    }

    async fn collect(&mut self) -> Result<WorkerOutcome, HarvestError> {
        self.context.cookies = self.load_cookies().await;
        self.set_stage(ProgressStage::Crawling).await;

        let parameters = self.parameters.clone();
        let step = match parameters.task_type {
            TaskType::Search => self.collect_sources(&parameters.keywords, false).await?,
            TaskType::Creator => self.collect_sources(&parameters.creator_ids, true).await?,
            TaskType::Detail => self.collect_details(&parameters.content_ids).await?,
        };

        Ok(match step {
            Step::Cancelled => WorkerOutcome::Cancelled,
            _ => WorkerOutcome::Completed,
        })
    }

    async fn load_cookies(&self) -> Option<String> {
        let cache = self.inner.cookies.as_ref()?;
        let platform = self.parameters.platform();
        match cache.load(platform).await {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!("Ignoring unreadable cookie cache for {}: {}", platform, e);
                None
            }
        }
    }

    fn remaining(&self) -> u64 {
        (self.parameters.config.max_count as u64).saturating_sub(self.collected)
    }

    /// Page through each keyword or creator until its pages or the quota run out
    async fn collect_sources(&mut self, sources: &[String], creator: bool) -> Result<Step, HarvestError> {
        let page_size = self.inner.config.page_size.max(1);

        for source in sources {
            let mut page = self.parameters.config.start_page;
            loop {
                if self.remaining() == 0 {
                    return Ok(Step::Exhausted);
                }
                let request = if creator {
                    BatchRequest::Creator(CreatorPage {
                        creator_id: source.clone(),
                        page,
                        page_size,
                    })
                } else {
                    BatchRequest::Search(SearchPage {
                        keyword: source.clone(),
                        page,
                        page_size,
                    })
                };

                match self.run_batch(request).await? {
                    Step::More => page += 1,
                    Step::Exhausted => break,
                    Step::Cancelled => return Ok(Step::Cancelled),
                }
            }
        }
        Ok(Step::Exhausted)
    }

    async fn collect_details(&mut self, content_ids: &[String]) -> Result<Step, HarvestError> {
        let quota = self.parameters.config.max_count as usize;
        let ids = &content_ids[..content_ids.len().min(quota)];
        let chunk_size = self.inner.config.detail_batch_size.max(1);
        let chunks = ids.len().div_ceil(chunk_size) as u64;

        self.inner
            .update_task(self.task_id, |task, _| {
                task.progress.set_items_total(ids.len() as u64);
                task.progress.set_batches_total(chunks);
            })
            .await;

        for chunk in ids.chunks(chunk_size) {
            let request = BatchRequest::Detail(DetailBatch {
                content_ids: chunk.to_vec(),
            });
            if self.run_batch(request).await? == Step::Cancelled {
                return Ok(Step::Cancelled);
            }
        }
        Ok(Step::Exhausted)
    }

    async fn run_batch(&mut self, request: BatchRequest) -> Result<Step, HarvestError> {
        if self.batches > 0 && self.pause().await {
            return Ok(Step::Cancelled);
        }
        if self.cancel.is_cancelled() {
            return Ok(Step::Cancelled);
        }

        let label = request.label();
        self.inner
            .update_task(self.task_id, |task, _| task.progress.begin_batch(label.clone()))
            .await;
        self.batches += 1;

        match self.call_with_retry(&request).await {
            Ok(batch) => self.absorb(batch).await,
            Err(_) if self.cancel.is_cancelled() => Ok(Step::Cancelled),
            Err(error) => {
                warn!("Task {}: {} failed: {}", self.task_id, label, error);
                let failed = request.item_count();
                self.consecutive_failures += 1;
                self.total_failures += 1;
                let message = error.to_string();
                self.last_error = Some(error);

                let task_id = self.task_id;
                self.inner
                    .update_task(task_id, |task, events| {
                        task.progress.complete_batch(0, failed);
                        task.record_error(format!("{}: {}", label, message));
                        events.push(TaskEvent::ItemFailed {
                            task_id,
                            item: Some(label),
                            error: message,
                        });
                    })
                    .await;

                self.check_thresholds()?;
                Ok(Step::Exhausted)
            }
        }
    }

    /// Store a batch, count it and report progress
    async fn absorb(&mut self, batch: CollectedBatch) -> Result<Step, HarvestError> {
        let remaining = self.remaining() as usize;
        let received = batch.records.len();
        let take = received.min(remaining);

        // Search and creator totals are unknown until the first page answers
        let resolved_total = (self.parameters.task_type != TaskType::Detail).then(|| {
            let max = self.parameters.config.max_count as u64;
            let sources = self.parameters.identifiers().len().max(1) as u64;
            batch
                .total_hint
                .map(|hint| (hint as u64 * sources).min(max))
                .unwrap_or(max)
        });

        self.set_stage(ProgressStage::Saving).await;
        let mut saved = 0;
        let mut storage_errors = Vec::new();
        for record in batch.records.iter().take(take) {
            if self.persist(record, &mut storage_errors).await {
                saved += 1;
            }
        }
        self.collected += take as u64;

        if take > 0 {
            self.consecutive_failures = 0;
        }
        for failure in &batch.failures {
            self.consecutive_failures += 1;
            self.total_failures += 1;
            self.last_error = Some(failure.error.clone());
        }

        let task_id = self.task_id;
        let failures = batch.failures;
        self.inner
            .update_task(task_id, |task, events| {
                if let Some(total) = resolved_total
                    && task.progress.items_total().is_none()
                {
                    task.progress.set_items_total(total);
                }
                task.progress.complete_batch(take as u64, failures.len() as u64);
                task.progress.set_stage(ProgressStage::Crawling);
                task.result_count += saved;
                for error in storage_errors {
                    task.record_error(error);
                }
                for failure in failures {
                    let item = failure.item_id.clone();
                    let message = failure.error.to_string();
                    task.record_error(match &item {
                        Some(id) => format!("{}: {}", id, message),
                        None => message.clone(),
                    });
                    events.push(TaskEvent::ItemFailed {
                        task_id,
                        item,
                        error: message,
                    });
                }
                events.push(TaskEvent::ProgressUpdated {
                    task_id,
                    stage: task.progress.stage(),
                    completed: task.progress.items_completed(),
                    failed: task.progress.items_failed(),
                    total: task.progress.items_total(),
                });
            })
            .await;

        self.check_thresholds()?;

        if take < received || self.remaining() == 0 || received == 0 || !batch.has_more {
            Ok(Step::Exhausted)
        } else {
            Ok(Step::More)
        }
    }

    /// Save one record with its comments. Storage failures become task
    /// errors and never count toward the abort thresholds.
    async fn persist(&self, record: &Record, errors: &mut Vec<String>) -> bool {
        let storage = &self.inner.storage;
        let config = &self.parameters.config;
        let platform = config.platform;

        if let Err(e) = storage.save_content(self.task_id, platform, record).await {
            errors.push(format!("failed to save {}: {}", record.id, e));
            return false;
        }

        if config.enable_comments {
            let comments = record
                .comments
                .iter()
                .filter(|c| config.enable_sub_comments || !c.is_sub_comment())
                .take(config.max_comments as usize);
            for comment in comments {
                if let Err(e) = storage
                    .save_comment(self.task_id, platform, &record.id, comment)
                    .await
                {
                    errors.push(format!("failed to save comment {}: {}", comment.id, e));
                }
            }
        }
        true
    }

    fn check_thresholds(&self) -> Result<(), HarvestError> {
        let Some(error) = &self.last_error else {
            return Ok(());
        };
        let config = &self.inner.config;
        if self.consecutive_failures >= config.consecutive_failure_threshold
            || self.total_failures >= config.total_failure_threshold
        {
            info!(
                "Task {} reached its failure limit ({} consecutive, {} total)",
                self.task_id, self.consecutive_failures, self.total_failures
            );
            return Err(HarvestError::Adapter(error.clone()));
        }
        Ok(())
    }

    async fn dispatch(&self, request: &BatchRequest) -> Result<CollectedBatch, AdapterError> {
        match request {
            BatchRequest::Search(page) => self.adapter.search(&self.context, page).await,
            BatchRequest::Detail(batch) => self.adapter.get_detail(&self.context, batch).await,
            BatchRequest::Creator(page) => self.adapter.get_creator_data(&self.context, page).await,
        }
    }

    /// One adapter call bounded by the configured timeout; transient errors
    /// are retried with exponential backoff up to `max_retries` times
    async fn call_with_retry(&self, request: &BatchRequest) -> Result<CollectedBatch, AdapterError> {
        let config = &self.parameters.config;
        let call_timeout = config.request_timeout();
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(call_timeout, self.dispatch(request)).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::transient(format!(
                    "{} timed out after {}s",
                    request.label(),
                    config.timeout_secs
                ))),
            };

            match result {
                Err(error) if error.is_retryable() && attempt < config.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    debug!(
                        "Task {}: retry {}/{} of {} in {:?}: {}",
                        self.task_id,
                        attempt,
                        config.max_retries,
                        request.label(),
                        delay,
                        error
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(error),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return other,
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let config = &self.inner.config;
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let millis = config
            .retry_base_delay_ms
            .saturating_mul(factor)
            .min(config.max_retry_delay_ms);
        Duration::from_millis(millis)
    }

    /// Random pause between batches. Returns true when cancelled meanwhile.
    async fn pause(&self) -> bool {
        let delay = self.parameters.config.delay_range.sample();
        if delay.is_zero() {
            return self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    async fn set_stage(&self, stage: ProgressStage) {
        self.inner
            .update_task(self.task_id, |task, _| task.progress.set_stage(stage))
            .await;
    }
}
