use crate::adapter::{AdapterRegistry, MemoryStorage, PlatformAdapter, StorageAdapter, StorageQuery};
use crate::config::{ConfigResolver, ServiceSettings};
use crate::cookies::CookieCache;
use crate::error::{HarvestError, ResourceKind, Result, ValidationErrors};
use crate::task::events::*;
use crate::task::progress::ProgressStage;
use crate::task::types::*;
use crate::task::worker::{TaskWorker, WorkerOutcome};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the task orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_tasks: usize,
    /// Failures in a row that abort a task
    pub consecutive_failure_threshold: u32,
    pub total_failure_threshold: u32,
    /// Wall-clock ceiling of one task
    pub task_timeout_secs: u64,
    /// Records requested per search or creator page
    pub page_size: u32,
    /// Content ids sent per detail call
    pub detail_batch_size: usize,
    pub retry_base_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Terminal tasks older than this are swept
    pub retention_hours: u32,
    /// Terminal tasks kept by the sweep, newest first
    pub max_retained_tasks: usize,
    pub event_history_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            consecutive_failure_threshold: 5,
            total_failure_threshold: 20,
            task_timeout_secs: 3600,
            page_size: 20,
            detail_batch_size: 10,
            retry_base_delay_ms: 500,
            max_retry_delay_ms: 30_000,
            retention_hours: 24,
            max_retained_tasks: 100,
            event_history_limit: 200,
        }
    }
}

pub(crate) struct TaskEntry {
    task: Task,
    cancel: CancellationToken,
    events: VecDeque<TaskEventRecord>,
}

impl TaskEntry {
    fn new(task: Task) -> Self {
        Self {
            task,
            cancel: CancellationToken::new(),
            events: VecDeque::new(),
        }
    }
}

/// Task records plus the admission state. Only touched under the registry
/// write lock, so admission and slot release never race.
#[derive(Default)]
pub(crate) struct TaskRegistry {
    tasks: HashMap<TaskId, TaskEntry>,
    queue: VecDeque<TaskId>,
    running: usize,
    workers: HashMap<TaskId, JoinHandle<()>>,
}

impl TaskRegistry {
    fn record(&mut self, event: &TaskEvent, limit: usize) {
        if limit == 0 {
            return;
        }
        if let Some(entry) = self.tasks.get_mut(&event.task_id()) {
            while entry.events.len() >= limit {
                entry.events.pop_front();
            }
            entry.events.push_back(event.into());
        }
    }

    /// Oldest queued task that is still pending. Cancelled entries are dropped.
    fn next_admissible(&mut self) -> Option<TaskId> {
        while let Some(id) = self.queue.pop_front() {
            if self
                .tasks
                .get(&id)
                .is_some_and(|e| e.task.status == TaskStatus::Pending)
            {
                return Some(id);
            }
        }
        None
    }
}

pub(crate) struct OrchestratorInner {
    pub(crate) config: OrchestratorConfig,
    resolver: ConfigResolver,
    adapters: AdapterRegistry,
    pub(crate) storage: Arc<dyn StorageAdapter>,
    pub(crate) cookies: Option<Arc<CookieCache>>,
    registry: RwLock<TaskRegistry>,
    event_handlers: Vec<Box<dyn TaskEventHandler + Send + Sync>>,
}

impl OrchestratorInner {
    /// Run `f` under the registry write lock, then deliver the events it produced
    async fn mutate<R>(&self, f: impl FnOnce(&mut TaskRegistry, &mut Vec<TaskEvent>) -> R) -> R {
        let mut events = Vec::new();
        let result = {
            let mut registry = self.registry.write().await;
            let result = f(&mut registry, &mut events);
            for event in &events {
                registry.record(event, self.config.event_history_limit);
            }
            result
        };
        self.emit_events(&events);
        result
    }

    fn emit_events(&self, events: &[TaskEvent]) {
        for event in events {
            for handler in &self.event_handlers {
                if let Err(e) = handler.handle_event(event) {
                    error!("Event handler error: {}", e);
                }
            }
        }
    }

    /// Mutate one task record. `None` if the task no longer exists.
    pub(crate) async fn update_task<R>(
        &self,
        task_id: TaskId,
        f: impl FnOnce(&mut Task, &mut Vec<TaskEvent>) -> R,
    ) -> Option<R> {
        self.mutate(|registry, events| {
            registry
                .tasks
                .get_mut(&task_id)
                .map(|entry| f(&mut entry.task, events))
        })
        .await
    }

    /// Start queued tasks while slots are free
    fn admit_queued(self: &Arc<Self>, registry: &mut TaskRegistry, events: &mut Vec<TaskEvent>) {
        while registry.running < self.config.max_concurrent_tasks {
            let Some(task_id) = registry.next_admissible() else {
                break;
            };
            self.start_task(registry, task_id, events);
        }
    }

    fn start_task(
        self: &Arc<Self>,
        registry: &mut TaskRegistry,
        task_id: TaskId,
        events: &mut Vec<TaskEvent>,
    ) {
        let Some(entry) = registry.tasks.get_mut(&task_id) else {
            return;
        };
        let Some(old_status) = entry.task.transition(TaskStatus::Running) else {
            return;
        };
        events.push(TaskEvent::TaskStatusChanged {
            task_id,
            old_status,
            new_status: TaskStatus::Running,
        });

        let Some(adapter) = self.adapters.get(entry.task.platform()) else {
            let error = format!("no collector registered for {}", entry.task.platform());
            entry.task.transition(TaskStatus::Failed);
            entry.task.error_message = Some(error.clone());
            events.push(TaskEvent::TaskStatusChanged {
                task_id,
                old_status: TaskStatus::Running,
                new_status: TaskStatus::Failed,
            });
            events.push(TaskEvent::TaskFailed { task_id, error });
            return;
        };

        let worker = TaskWorker::new(
            self.clone(),
            task_id,
            entry.task.parameters.clone(),
            adapter,
            entry.cancel.clone(),
        );
        registry.running += 1;
        registry.workers.insert(task_id, tokio::spawn(worker.run()));
        debug!(
            "Admitted task {} ({} of {} slots in use)",
            task_id, registry.running, self.config.max_concurrent_tasks
        );
    }

    /// Settle a task after its worker exits, release its slot and admit the
    /// next queued task. A task cancelled meanwhile stays cancelled.
    pub(crate) async fn finish_task(self: &Arc<Self>, task_id: TaskId, outcome: WorkerOutcome) {
        self.mutate(|registry, events| {
            registry.workers.remove(&task_id);
            registry.running = registry.running.saturating_sub(1);

            if let Some(entry) = registry.tasks.get_mut(&task_id) {
                let task = &mut entry.task;
                match outcome {
                    WorkerOutcome::Completed => {
                        if let Some(old_status) = task.transition(TaskStatus::Completed) {
                            task.progress.finish();
                            events.push(TaskEvent::TaskStatusChanged {
                                task_id,
                                old_status,
                                new_status: TaskStatus::Completed,
                            });
                            events.push(TaskEvent::TaskCompleted {
                                task_id,
                                result_count: task.result_count,
                                error_count: task.error_count,
                            });
                        }
                    }
                    WorkerOutcome::Failed(error) => {
                        if let Some(old_status) = task.transition(TaskStatus::Failed) {
                            task.error_message = Some(error.clone());
                            events.push(TaskEvent::TaskStatusChanged {
                                task_id,
                                old_status,
                                new_status: TaskStatus::Failed,
                            });
                            events.push(TaskEvent::TaskFailed { task_id, error });
                        }
                    }
                    WorkerOutcome::Cancelled => {
                        if let Some(old_status) = task.transition(TaskStatus::Cancelled) {
                            events.push(TaskEvent::TaskStatusChanged {
                                task_id,
                                old_status,
                                new_status: TaskStatus::Cancelled,
                            });
                            events.push(TaskEvent::TaskCancelled { task_id });
                        }
                    }
                }
                if task.progress.stage() != ProgressStage::Finished {
                    task.progress.set_stage(ProgressStage::Finished);
                }
            }

            self.admit_queued(registry, events);
        })
        .await;
    }
}

/// Top-level coordinator of harvesting tasks
///
/// Status, result and cancellation calls only touch the shared registry and
/// never wait on a running worker. Workers pick up cancellation at their next
/// batch boundary or during the pause between batches.
#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl TaskOrchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.inner.resolver
    }

    pub fn storage(&self) -> Arc<dyn StorageAdapter> {
        self.inner.storage.clone()
    }

    /// Validate and admit a task. Returns as soon as the task is registered;
    /// it starts immediately when a slot is free and waits in FIFO order
    /// otherwise.
    pub async fn create_task(&self, request: TaskRequest) -> Result<TaskId> {
        let parameters = self.inner.resolver.resolve_task(&request)?;
        let platform = parameters.platform();
        if !self.inner.adapters.contains(platform) {
            return Err(ValidationErrors::single(
                "platform",
                format!("no collector registered for {}", platform),
            )
            .into());
        }

        if parameters.clear_cookies
            && let Some(cache) = &self.inner.cookies
            && let Err(e) = cache.clear(Some(platform)).await
        {
            warn!("Failed to clear cached cookies for {}: {}", platform, e);
        }

        let task = Task::new(parameters);
        let task_id = task.id;
        let task_type = task.parameters.task_type;
        let inner = self.inner.clone();

        self.inner
            .mutate(move |registry, events| {
                registry.tasks.insert(task_id, TaskEntry::new(task));
                events.push(TaskEvent::TaskCreated {
                    task_id,
                    platform,
                    task_type,
                });
                registry.queue.push_back(task_id);
                inner.admit_queued(registry, events);

                if let Some(index) = registry.queue.iter().position(|id| *id == task_id) {
                    events.push(TaskEvent::TaskQueued {
                        task_id,
                        position: index + 1,
                    });
                }
            })
            .await;

        info!("Created {} task {} on {}", task_type, task_id, platform);
        Ok(task_id)
    }

    pub async fn get_status(&self, task_id: TaskId) -> Result<TaskSnapshot> {
        let registry = self.inner.registry.read().await;
        registry
            .tasks
            .get(&task_id)
            .map(|entry| entry.task.snapshot())
            .ok_or_else(|| HarvestError::not_found(ResourceKind::Task, task_id))
    }

    /// Results of a terminal task; `NotReady` while it is still pending or
    /// running
    pub async fn get_result(&self, task_id: TaskId) -> Result<TaskOutcome> {
        let (status, result_count, error_count, mut errors, error_message) = {
            let registry = self.inner.registry.read().await;
            let task = &registry
                .tasks
                .get(&task_id)
                .ok_or_else(|| HarvestError::not_found(ResourceKind::Task, task_id))?
                .task;

            if !task.status.is_terminal() {
                return Ok(TaskOutcome::NotReady {
                    status: task.status,
                    progress: task.progress.snapshot(),
                });
            }
            (
                task.status,
                task.result_count,
                task.error_count,
                task.errors.clone(),
                task.error_message.clone(),
            )
        };

        let data = match self.inner.storage.query(&StorageQuery::for_task(task_id)).await {
            Ok(contents) => contents.into_iter().map(|c| c.payload).collect(),
            Err(e) => {
                warn!("Failed to load results of task {}: {}", task_id, e);
                errors.push(format!("failed to load results: {}", e));
                Vec::new()
            }
        };

        let message = match status {
            TaskStatus::Completed => format!("collected {} records", result_count),
            TaskStatus::Cancelled => "task was cancelled".to_string(),
            _ => error_message.unwrap_or_else(|| "task failed".to_string()),
        };

        Ok(TaskOutcome::Ready(TaskResult {
            task_id,
            status,
            success: status == TaskStatus::Completed,
            message,
            data_count: result_count,
            error_count,
            data,
            errors,
        }))
    }

    /// Cancel a pending or running task. Cancelling a terminal task changes
    /// nothing and succeeds. Returns the status after the call.
    pub async fn cancel_task(&self, task_id: TaskId) -> Result<TaskStatus> {
        self.inner
            .mutate(|registry, events| {
                let entry = registry
                    .tasks
                    .get_mut(&task_id)
                    .ok_or_else(|| HarvestError::not_found(ResourceKind::Task, task_id))?;

                let old_status = entry.task.status;
                if old_status.is_terminal() {
                    debug!("Task {} already {}, nothing to cancel", task_id, old_status);
                    return Ok(old_status);
                }

                if entry.task.transition(TaskStatus::Cancelled).is_some() {
                    entry.cancel.cancel();
                    if old_status == TaskStatus::Pending {
                        entry.task.progress.set_stage(ProgressStage::Finished);
                    }
                    events.push(TaskEvent::TaskStatusChanged {
                        task_id,
                        old_status,
                        new_status: TaskStatus::Cancelled,
                    });
                    events.push(TaskEvent::TaskCancelled { task_id });
                }
                registry.queue.retain(|id| *id != task_id);
                Ok(TaskStatus::Cancelled)
            })
            .await
    }

    /// Snapshots of matching tasks, oldest first
    pub async fn list_tasks(&self, filter: TaskFilter) -> Vec<TaskSnapshot> {
        let registry = self.inner.registry.read().await;
        let mut snapshots: Vec<TaskSnapshot> = registry
            .tasks
            .values()
            .filter(|entry| filter.matches(&entry.task))
            .map(|entry| entry.task.snapshot())
            .collect();
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    /// Most recent `limit` history entries of a task, oldest first
    pub async fn get_task_events(
        &self,
        task_id: TaskId,
        limit: usize,
    ) -> Result<Vec<TaskEventRecord>> {
        let registry = self.inner.registry.read().await;
        let entry = registry
            .tasks
            .get(&task_id)
            .ok_or_else(|| HarvestError::not_found(ResourceKind::Task, task_id))?;
        let skip = entry.events.len().saturating_sub(limit);
        Ok(entry.events.iter().skip(skip).cloned().collect())
    }

    pub async fn statistics(&self) -> TaskStatistics {
        let registry = self.inner.registry.read().await;
        let mut stats = TaskStatistics {
            total_tasks: registry.tasks.len(),
            max_concurrent_tasks: self.inner.config.max_concurrent_tasks,
            ..Default::default()
        };

        for entry in registry.tasks.values() {
            let task = &entry.task;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
            stats.total_results += task.result_count;
            stats.total_errors += task.error_count;
            *stats.tasks_by_platform.entry(task.platform()).or_default() += 1;
        }
        stats
    }

    /// Drop terminal tasks past the retention window, then trim the remaining
    /// terminal tasks to the newest `max_retained_tasks`
    pub async fn cleanup_completed_tasks(&self) -> Vec<TaskId> {
        let config = &self.inner.config;
        let cutoff = Utc::now() - ChronoDuration::hours(config.retention_hours as i64);
        let keep = config.max_retained_tasks;

        let removed = self
            .inner
            .mutate(|registry, _| {
                let mut terminal: Vec<(TaskId, DateTime<Utc>)> = registry
                    .tasks
                    .values()
                    .filter(|e| e.task.status.is_terminal())
                    .map(|e| (e.task.id, e.task.completed_at.unwrap_or(e.task.updated_at)))
                    .collect();
                terminal.sort_by(|a, b| b.1.cmp(&a.1));

                let removed: Vec<TaskId> = terminal
                    .iter()
                    .enumerate()
                    .filter(|(index, (_, finished_at))| *finished_at < cutoff || *index >= keep)
                    .map(|(_, (id, _))| *id)
                    .collect();

                for id in &removed {
                    registry.tasks.remove(id);
                }
                removed
            })
            .await;

        if !removed.is_empty() {
            info!("Cleaned up {} finished tasks", removed.len());
        }
        removed
    }

    /// Poll until the task is terminal or `timeout` elapses
    pub async fn wait_for_completion(
        &self,
        task_id: TaskId,
        timeout: Duration,
    ) -> Result<TaskSnapshot> {
        let deadline = Instant::now() + timeout;
        loop {
            let snapshot = self.get_status(task_id).await?;
            if snapshot.status.is_terminal() {
                return Ok(snapshot);
            }
            if Instant::now() >= deadline {
                return Err(HarvestError::Timeout {
                    operation: format!("waiting for task {}", task_id),
                    elapsed_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Cancel every unfinished task and wait for all workers to exit
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .inner
            .mutate(|registry, events| {
                for entry in registry.tasks.values_mut() {
                    let old_status = entry.task.status;
                    if entry.task.transition(TaskStatus::Cancelled).is_some() {
                        entry.cancel.cancel();
                        events.push(TaskEvent::TaskStatusChanged {
                            task_id: entry.task.id,
                            old_status,
                            new_status: TaskStatus::Cancelled,
                        });
                        events.push(TaskEvent::TaskCancelled {
                            task_id: entry.task.id,
                        });
                    }
                }
                registry.queue.clear();
                registry.workers.drain().map(|(_, handle)| handle).collect()
            })
            .await;

        info!("Shutting down, waiting for {} workers", handles.len());
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Worker ended abnormally: {}", e);
            }
        }
    }
}

/// Assembles a [`TaskOrchestrator`] from its collaborators
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    resolver: ConfigResolver,
    adapters: AdapterRegistry,
    storage: Option<Arc<dyn StorageAdapter>>,
    cookies: Option<Arc<CookieCache>>,
    event_handlers: Vec<Box<dyn TaskEventHandler + Send + Sync>>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: ConfigResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Orchestrator config, resolver environment layer and cookie cache
    /// taken from service settings
    pub fn settings(mut self, settings: &ServiceSettings) -> Self {
        self.config = settings.orchestrator.clone();
        self.resolver = ConfigResolver::from_settings(settings);
        self.cookies = CookieCache::from_config(&settings.cookies).map(Arc::new);
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.register(adapter);
        self
    }

    pub fn adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn cookie_cache(mut self, cache: Arc<CookieCache>) -> Self {
        self.cookies = Some(cache);
        self
    }

    pub fn event_handler(mut self, handler: Box<dyn TaskEventHandler + Send + Sync>) -> Self {
        self.event_handlers.push(handler);
        self
    }

    pub fn build(mut self) -> TaskOrchestrator {
        if self.config.max_concurrent_tasks == 0 {
            warn!("max_concurrent_tasks is 0, running one task at a time");
            self.config.max_concurrent_tasks = 1;
        }
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));

        TaskOrchestrator {
            inner: Arc::new(OrchestratorInner {
                config: self.config,
                resolver: self.resolver,
                adapters: self.adapters,
                storage,
                cookies: self.cookies,
                registry: RwLock::new(TaskRegistry::default()),
                event_handlers: self.event_handlers,
            }),
        }
    }
}
