#[cfg(test)]
mod tests {
    use crate::adapter::*;
    use crate::config::{ConfigLayer, Platform};
    use crate::cookies::CookieCache;
    use crate::error::{AdapterError, HarvestError};
    use crate::task::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    /// Request overrides that drop the pause between batches
    fn no_delay() -> ConfigLayer {
        ConfigLayer {
            delay_range: Some(vec![0, 0]),
            ..Default::default()
        }
    }

    fn build(
        adapter: MockPlatformAdapter,
        config: OrchestratorConfig,
    ) -> (TaskOrchestrator, Arc<MockPlatformAdapter>, Arc<MemoryStorage>) {
        let adapter = Arc::new(adapter);
        let storage = Arc::new(MemoryStorage::new());
        let orchestrator = TaskOrchestrator::builder()
            .config(config)
            .adapter(adapter.clone())
            .storage(storage.clone())
            .build();
        (orchestrator, adapter, storage)
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            retry_base_delay_ms: 1,
            max_retry_delay_ms: 5,
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Arc<Mutex<Vec<TaskEvent>>>,
    }

    impl TaskEventHandler for RecordingHandler {
        fn handle_event(&self, event: &TaskEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn test_status_transitions_only_forward() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Cancelled));

        assert!(!Running.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        for terminal in [Completed, Failed, Cancelled] {
            for next in [Pending, Running, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[tokio::test]
    async fn test_search_task_result_not_ready_then_completed() {
        let adapter = MockPlatformAdapter::new(Platform::Xhs)
            .with_items_per_source(80)
            .with_latency(Duration::from_millis(50));
        let (orchestrator, _, _) = build(adapter, fast_config());

        let request = TaskRequest::search("xhs", ["美食"])
            .with_max_count(50)
            .with_config(no_delay());
        let task_id = orchestrator.create_task(request).await.unwrap();

        let outcome = orchestrator.get_result(task_id).await.unwrap();
        assert!(!outcome.is_ready());

        let snapshot = orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.progress.percent, Some(100.0));

        let result = orchestrator
            .get_result(task_id)
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert!(result.success);
        assert_eq!(result.status, TaskStatus::Completed);
        assert!(result.data_count <= 50);
        assert_eq!(result.data_count, 50);
        assert_eq!(result.data.len(), 50);
        assert_eq!(result.error_count, 0);
    }

    #[tokio::test]
    async fn test_running_tasks_never_exceed_ceiling() {
        let adapter = MockPlatformAdapter::new(Platform::Douyin)
            .with_items_per_source(40)
            .with_latency(Duration::from_millis(30));
        let config = OrchestratorConfig {
            max_concurrent_tasks: 2,
            ..fast_config()
        };
        let (orchestrator, adapter, _) = build(adapter, config);

        let mut ids = Vec::new();
        for i in 0..5 {
            let request = TaskRequest::search("douyin", [format!("kw{}", i)])
                .with_max_count(40)
                .with_config(no_delay());
            ids.push(orchestrator.create_task(request).await.unwrap());
        }

        loop {
            let stats = orchestrator.statistics().await;
            assert!(stats.running <= 2, "running = {}", stats.running);
            if stats.completed == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(adapter.peak_concurrency() <= 2);
        for id in ids {
            let snapshot = orchestrator.get_status(id).await.unwrap();
            assert_eq!(snapshot.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_queued_tasks_start_in_fifo_order() {
        let adapter = MockPlatformAdapter::new(Platform::Weibo)
            .with_items_per_source(5)
            .with_latency(Duration::from_millis(20));
        let config = OrchestratorConfig {
            max_concurrent_tasks: 1,
            ..fast_config()
        };
        let (orchestrator, _, _) = build(adapter, config);

        let mut ids = Vec::new();
        for i in 0..3 {
            let request = TaskRequest::search("weibo", [format!("kw{}", i)]).with_config(no_delay());
            ids.push(orchestrator.create_task(request).await.unwrap());
        }

        let second = orchestrator.get_status(ids[1]).await.unwrap();
        assert_eq!(second.status, TaskStatus::Pending);

        let mut started = Vec::new();
        for id in &ids {
            let snapshot = orchestrator.wait_for_completion(*id, WAIT).await.unwrap();
            started.push(snapshot.started_at.unwrap());
        }
        assert!(started.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_cancel_running_task_is_idempotent() {
        let adapter = MockPlatformAdapter::new(Platform::Bilibili)
            .with_items_per_source(1000)
            .with_latency(Duration::from_millis(50));
        let (orchestrator, _, _) = build(adapter, fast_config());

        let request = TaskRequest::search("bilibili", ["rust"])
            .with_max_count(1000)
            .with_config(no_delay());
        let task_id = orchestrator.create_task(request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(
            orchestrator.cancel_task(task_id).await.unwrap(),
            TaskStatus::Cancelled
        );
        let snapshot = orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);

        // Once the worker exits nothing changes any more
        tokio::time::sleep(Duration::from_millis(120)).await;
        let settled = orchestrator.get_status(task_id).await.unwrap();
        assert_eq!(settled.status, TaskStatus::Cancelled);
        assert!(settled.result_count < 1000);

        assert_eq!(
            orchestrator.cancel_task(task_id).await.unwrap(),
            TaskStatus::Cancelled
        );

        let result = orchestrator
            .get_result(task_id)
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_completed_task_is_noop() {
        let adapter = MockPlatformAdapter::new(Platform::Zhihu).with_items_per_source(3);
        let (orchestrator, _, _) = build(adapter, fast_config());

        let task_id = orchestrator
            .create_task(TaskRequest::search("zhihu", ["q"]).with_config(no_delay()))
            .await
            .unwrap();
        orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();

        assert_eq!(
            orchestrator.cancel_task(task_id).await.unwrap(),
            TaskStatus::Completed
        );
        let snapshot = orchestrator.get_status(task_id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_pending_task_never_runs() {
        let adapter = MockPlatformAdapter::new(Platform::Tieba)
            .with_items_per_source(10)
            .with_latency(Duration::from_millis(100));
        let config = OrchestratorConfig {
            max_concurrent_tasks: 1,
            ..fast_config()
        };
        let (orchestrator, _, _) = build(adapter, config);

        let first = orchestrator
            .create_task(TaskRequest::search("tieba", ["a"]).with_config(no_delay()))
            .await
            .unwrap();
        let second = orchestrator
            .create_task(TaskRequest::search("tieba", ["b"]).with_config(no_delay()))
            .await
            .unwrap();

        orchestrator.cancel_task(second).await.unwrap();
        orchestrator.wait_for_completion(first, WAIT).await.unwrap();

        let snapshot = orchestrator.get_status(second).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert!(snapshot.started_at.is_none());
        assert!(snapshot.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_consecutive_failures_fail_task_with_last_error() {
        let adapter = MockPlatformAdapter::new(Platform::Kuaishou)
            .with_failure(AdapterError::permanent("account banned"));
        let config = OrchestratorConfig {
            consecutive_failure_threshold: 3,
            detail_batch_size: 1,
            ..fast_config()
        };
        let (orchestrator, adapter, _) = build(adapter, config);

        let ids: Vec<String> = (0..10).map(|i| format!("v{}", i)).collect();
        let task_id = orchestrator
            .create_task(TaskRequest::detail("kuaishou", ids).with_config(no_delay()))
            .await
            .unwrap();

        let snapshot = orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert!(
            snapshot
                .error_message
                .as_deref()
                .unwrap()
                .contains("account banned")
        );
        assert_eq!(snapshot.error_count, 3);
        assert_eq!(adapter.collect_calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let adapter = MockPlatformAdapter::new(Platform::Xhs)
            .with_items_per_source(5)
            .with_collect_script(vec![
                Err(AdapterError::transient("rate limited")),
                Err(AdapterError::transient("rate limited")),
            ]);
        let (orchestrator, adapter, _) = build(adapter, fast_config());

        let config = ConfigLayer {
            max_retries: Some(2),
            ..no_delay()
        };
        let task_id = orchestrator
            .create_task(TaskRequest::search("xhs", ["tea"]).with_config(config))
            .await
            .unwrap();

        let snapshot = orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result_count, 5);
        assert_eq!(snapshot.error_count, 0);
        assert_eq!(adapter.collect_calls(), 3);
    }

    #[tokio::test]
    async fn test_item_failures_are_recorded_without_abort() {
        let adapter =
            MockPlatformAdapter::new(Platform::Douyin).with_missing_ids(["gone-1", "gone-2"]);
        let (orchestrator, _, _) = build(adapter, fast_config());

        let ids = ["a", "gone-1", "b", "c", "gone-2", "d"];
        let task_id = orchestrator
            .create_task(TaskRequest::detail("douyin", ids).with_config(no_delay()))
            .await
            .unwrap();

        let snapshot = orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result_count, 4);
        assert_eq!(snapshot.error_count, 2);
        assert_eq!(snapshot.progress.items_failed, 2);

        let result = orchestrator
            .get_result(task_id)
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().any(|e| e.starts_with("gone-1")));
    }

    #[tokio::test]
    async fn test_storage_failures_are_task_errors() {
        let adapter = MockPlatformAdapter::new(Platform::Weibo).with_items_per_source(3);
        let (orchestrator, _, storage) = build(adapter, fast_config());
        storage.set_failing(true);

        let task_id = orchestrator
            .create_task(TaskRequest::search("weibo", ["x"]).with_config(no_delay()))
            .await
            .unwrap();

        let snapshot = orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result_count, 0);
        assert_eq!(snapshot.error_count, 3);
    }

    #[tokio::test]
    async fn test_comment_limits_follow_config() {
        let adapter = MockPlatformAdapter::new(Platform::Bilibili).with_comments(6);
        let (orchestrator, _, storage) = build(adapter, fast_config());

        let config = ConfigLayer {
            max_comments: Some(3),
            enable_sub_comments: Some(false),
            ..no_delay()
        };
        let task_id = orchestrator
            .create_task(TaskRequest::detail("bilibili", ["BV1"]).with_config(config))
            .await
            .unwrap();
        orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();

        let comments = storage.comments_for("BV1").await;
        assert_eq!(comments.len(), 3);
        assert!(comments.iter().all(|c| c.parent_id.is_none()));
    }

    #[tokio::test]
    async fn test_task_wall_clock_timeout() {
        let adapter = MockPlatformAdapter::new(Platform::Zhihu).with_latency(Duration::from_secs(3));
        let config = OrchestratorConfig {
            task_timeout_secs: 1,
            ..fast_config()
        };
        let (orchestrator, _, _) = build(adapter, config);

        let task_id = orchestrator
            .create_task(TaskRequest::search("zhihu", ["slow"]).with_config(no_delay()))
            .await
            .unwrap();

        let snapshot = orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert!(snapshot.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_create_task_reports_all_violations() {
        let (orchestrator, _, _) = build(MockPlatformAdapter::new(Platform::Xhs), fast_config());

        let request = TaskRequest::search("xhs", ["a"])
            .with_max_count(2000)
            .with_config(ConfigLayer {
                delay_range: Some(vec![5, 2]),
                timeout: Some(5),
                ..Default::default()
            });
        let err = orchestrator.create_task(request).await.unwrap_err();

        let HarvestError::Validation(errors) = &err else {
            panic!("expected validation error, got {:?}", err);
        };
        assert!(errors.contains_field("max_count"));
        assert!(errors.contains_field("config.delay_range"));
        assert!(errors.contains_field("config.timeout"));
        assert!(orchestrator.list_tasks(TaskFilter::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_platform_without_collector_is_rejected() {
        let (orchestrator, _, _) = build(MockPlatformAdapter::new(Platform::Xhs), fast_config());

        let err = orchestrator
            .create_task(TaskRequest::search("douyin", ["a"]))
            .await
            .unwrap_err();
        assert!(err.field_errors().iter().any(|e| e.field == "platform"));
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let (orchestrator, _, _) = build(MockPlatformAdapter::new(Platform::Xhs), fast_config());
        let unknown = uuid::Uuid::new_v4();

        assert!(matches!(
            orchestrator.get_status(unknown).await,
            Err(HarvestError::NotFound { .. })
        ));
        assert!(matches!(
            orchestrator.get_result(unknown).await,
            Err(HarvestError::NotFound { .. })
        ));
        assert!(matches!(
            orchestrator.cancel_task(unknown).await,
            Err(HarvestError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_changes_observed_in_forward_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let handler = RecordingHandler {
            events: events.clone(),
        };
        let adapter = Arc::new(MockPlatformAdapter::new(Platform::Xhs).with_items_per_source(45));
        let orchestrator = TaskOrchestrator::builder()
            .config(OrchestratorConfig {
                max_concurrent_tasks: 1,
                ..fast_config()
            })
            .adapter(adapter)
            .event_handler(Box::new(handler))
            .build();

        let mut ids = Vec::new();
        for i in 0..3 {
            let request = TaskRequest::search("xhs", [format!("k{}", i)]).with_config(no_delay());
            ids.push(orchestrator.create_task(request).await.unwrap());
        }
        for id in &ids {
            orchestrator.wait_for_completion(*id, WAIT).await.unwrap();
        }

        let events = events.lock().unwrap();
        for id in ids {
            let statuses: Vec<TaskStatus> = events
                .iter()
                .filter_map(|e| match e {
                    TaskEvent::TaskStatusChanged {
                        task_id,
                        old_status,
                        new_status,
                    } if *task_id == id => {
                        assert!(old_status.can_transition_to(*new_status));
                        Some(*new_status)
                    }
                    _ => None,
                })
                .collect();
            assert_eq!(statuses, vec![TaskStatus::Running, TaskStatus::Completed]);
        }
    }

    #[tokio::test]
    async fn test_event_history_respects_limits() {
        let adapter = MockPlatformAdapter::new(Platform::Douyin).with_items_per_source(100);
        let config = OrchestratorConfig {
            event_history_limit: 4,
            page_size: 10,
            ..fast_config()
        };
        let (orchestrator, _, _) = build(adapter, config);

        let task_id = orchestrator
            .create_task(TaskRequest::search("douyin", ["a"]).with_config(no_delay()))
            .await
            .unwrap();
        orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();

        let all = orchestrator.get_task_events(task_id, 50).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.last().unwrap().message.starts_with("completed"));

        let last_two = orchestrator.get_task_events(task_id, 2).await.unwrap();
        assert_eq!(last_two.as_slice(), &all[2..]);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_newest_finished_tasks() {
        let adapter = MockPlatformAdapter::new(Platform::Xhs).with_items_per_source(2);
        let config = OrchestratorConfig {
            max_retained_tasks: 1,
            ..fast_config()
        };
        let (orchestrator, _, _) = build(adapter, config);

        let older = orchestrator
            .create_task(TaskRequest::search("xhs", ["a"]).with_config(no_delay()))
            .await
            .unwrap();
        orchestrator.wait_for_completion(older, WAIT).await.unwrap();
        let newer = orchestrator
            .create_task(TaskRequest::search("xhs", ["b"]).with_config(no_delay()))
            .await
            .unwrap();
        orchestrator.wait_for_completion(newer, WAIT).await.unwrap();

        let removed = orchestrator.cleanup_completed_tasks().await;
        assert_eq!(removed, vec![older]);
        assert!(orchestrator.get_status(older).await.is_err());
        assert!(orchestrator.get_status(newer).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_tasks_and_statistics() {
        let adapters = AdapterRegistry::new()
            .with(Arc::new(MockPlatformAdapter::new(Platform::Xhs).with_items_per_source(2)))
            .with(Arc::new(MockPlatformAdapter::new(Platform::Weibo).with_items_per_source(3)));
        let orchestrator = TaskOrchestrator::builder()
            .config(fast_config())
            .adapters(adapters)
            .build();

        let a = orchestrator
            .create_task(TaskRequest::search("xhs", ["a"]).with_config(no_delay()))
            .await
            .unwrap();
        let b = orchestrator
            .create_task(TaskRequest::creator("weibo", ["u1"]).with_config(no_delay()))
            .await
            .unwrap();
        orchestrator.wait_for_completion(a, WAIT).await.unwrap();
        orchestrator.wait_for_completion(b, WAIT).await.unwrap();

        let weibo = orchestrator.list_tasks(TaskFilter::platform(Platform::Weibo)).await;
        assert_eq!(weibo.len(), 1);
        assert_eq!(weibo[0].task_id, b);

        let completed = orchestrator
            .list_tasks(TaskFilter::status(TaskStatus::Completed))
            .await;
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].task_id, a);

        let stats = orchestrator.statistics().await;
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.total_results, 5);
        assert_eq!(stats.tasks_by_platform.get(&Platform::Xhs), Some(&1));
    }

    #[tokio::test]
    async fn test_clear_cookies_request_drops_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(CookieCache::new(dir.path(), 7));
        cache.save(Platform::Xhs, "a=1").await.unwrap();

        let orchestrator = TaskOrchestrator::builder()
            .config(fast_config())
            .adapter(Arc::new(MockPlatformAdapter::new(Platform::Xhs).with_items_per_source(1)))
            .cookie_cache(cache.clone())
            .build();

        let mut request = TaskRequest::search("xhs", ["a"]).with_config(no_delay());
        request.clear_cookies = true;
        let task_id = orchestrator.create_task(request).await.unwrap();
        orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();

        assert_eq!(cache.load(Platform::Xhs).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_unfinished_tasks() {
        let adapter = MockPlatformAdapter::new(Platform::Xhs)
            .with_items_per_source(1000)
            .with_latency(Duration::from_millis(30));
        let config = OrchestratorConfig {
            max_concurrent_tasks: 1,
            ..fast_config()
        };
        let (orchestrator, _, _) = build(adapter, config);

        let running = orchestrator
            .create_task(TaskRequest::search("xhs", ["a"]).with_config(no_delay()))
            .await
            .unwrap();
        let queued = orchestrator
            .create_task(TaskRequest::search("xhs", ["b"]).with_config(no_delay()))
            .await
            .unwrap();

        orchestrator.shutdown().await;

        for id in [running, queued] {
            let snapshot = orchestrator.get_status(id).await.unwrap();
            assert_eq!(snapshot.status, TaskStatus::Cancelled);
        }
        assert_eq!(orchestrator.statistics().await.running, 0);
    }

    #[tokio::test]
    async fn test_total_failures_fail_task_with_last_error() {
        let ids: Vec<String> = (0..10).map(|i| format!("v{}", i)).collect();
        let missing: Vec<String> = ids.iter().skip(1).step_by(2).cloned().collect();
        let adapter = MockPlatformAdapter::new(Platform::Bilibili).with_missing_ids(missing);
        let config = OrchestratorConfig {
            consecutive_failure_threshold: 2,
            total_failure_threshold: 3,
            detail_batch_size: 1,
            ..fast_config()
        };
        let (orchestrator, adapter, _) = build(adapter, config);

        let task_id = orchestrator
            .create_task(TaskRequest::detail("bili", ids).with_config(no_delay()))
            .await
            .unwrap();

        // Failures alternate with successes, so only the total limit trips
        let snapshot = orchestrator.wait_for_completion(task_id, WAIT).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert!(
            snapshot
                .error_message
                .as_deref()
                .unwrap()
                .contains("content v5 not found")
        );
        assert_eq!(snapshot.error_count, 3);
        assert_eq!(snapshot.result_count, 3);
        assert_eq!(adapter.collect_calls(), 6);
    }

    struct PanickingAdapter;

    #[async_trait::async_trait]
    impl PlatformAdapter for PanickingAdapter {
        fn platform(&self) -> Platform {
            Platform::Tieba
        }

        async fn login(&self, _params: LoginParams) -> Result<LoginResult, AdapterError> {
            Ok(LoginResult::Pending)
        }

        async fn search(
            &self,
            _context: &CollectContext,
            _request: &SearchPage,
        ) -> Result<CollectedBatch, AdapterError> {
            panic!("search page layout changed");
        }

        async fn get_detail(
            &self,
            _context: &CollectContext,
            _request: &DetailBatch,
        ) -> Result<CollectedBatch, AdapterError> {
            panic!("detail page layout changed");
        }

        async fn get_creator_data(
            &self,
            _context: &CollectContext,
            _request: &CreatorPage,
        ) -> Result<CollectedBatch, AdapterError> {
            panic!("creator page layout changed");
        }
    }

    #[tokio::test]
    async fn test_panicking_collector_fails_task_and_frees_slot() {
        let orchestrator = TaskOrchestrator::builder()
            .config(OrchestratorConfig {
                max_concurrent_tasks: 1,
                ..fast_config()
            })
            .adapter(Arc::new(PanickingAdapter))
            .build();

        let first = orchestrator
            .create_task(TaskRequest::search("tieba", ["a"]).with_config(no_delay()))
            .await
            .unwrap();
        let second = orchestrator
            .create_task(TaskRequest::search("tieba", ["b"]).with_config(no_delay()))
            .await
            .unwrap();

        for id in [first, second] {
            let snapshot = orchestrator.wait_for_completion(id, WAIT).await.unwrap();
            assert_eq!(snapshot.status, TaskStatus::Failed);
            assert!(
                snapshot
                    .error_message
                    .as_deref()
                    .unwrap()
                    .contains("search page layout changed")
            );
        }

        let stats = orchestrator.statistics().await;
        assert_eq!(stats.running, 0);
        assert_eq!(stats.failed, 2);
        assert!(orchestrator.get_result(first).await.unwrap().is_ready());
    }
}
