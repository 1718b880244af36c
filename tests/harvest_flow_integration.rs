use media_harvester::adapter::{
    CollectContext, CollectedBatch, CreatorPage, DetailBatch, LoginParams, LoginResult,
    SearchPage, StorageQuery,
};
use media_harvester::config::{ConfigLayer, SaveDataOption};
use media_harvester::task::TaskFilter;
use media_harvester::{
    AdapterError, CookieCache, MemoryStorage, MockPlatformAdapter, OrchestratorConfig,
    Platform, PlatformAdapter, StorageAdapter, TaskOrchestrator, TaskOutcome, TaskRequest,
    TaskStatus,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(15);

fn no_delay() -> ConfigLayer {
    ConfigLayer {
        delay_range: Some(vec![0, 0]),
        ..Default::default()
    }
}

/// Collector that records the cookies handed to every call
struct CookieRecorder {
    platform: Platform,
    seen: Arc<Mutex<Vec<Option<String>>>>,
}

impl CookieRecorder {
    fn batch(&self, context: &CollectContext, id: &str) -> CollectedBatch {
        self.seen
            .lock()
            .expect("Should lock recorder")
            .push(context.cookies.clone());
        CollectedBatch {
            records: vec![media_harvester::adapter::Record::new(
                id,
                serde_json::json!({ "id": id }),
            )],
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl PlatformAdapter for CookieRecorder {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn login(&self, _params: LoginParams) -> Result<LoginResult, AdapterError> {
        Ok(LoginResult::Pending)
    }

    async fn search(
        &self,
        context: &CollectContext,
        request: &SearchPage,
    ) -> Result<CollectedBatch, AdapterError> {
        Ok(self.batch(context, &request.keyword))
    }

    async fn get_detail(
        &self,
        context: &CollectContext,
        request: &DetailBatch,
    ) -> Result<CollectedBatch, AdapterError> {
        Ok(self.batch(context, &request.content_ids.join("+")))
    }

    async fn get_creator_data(
        &self,
        context: &CollectContext,
        request: &CreatorPage,
    ) -> Result<CollectedBatch, AdapterError> {
        Ok(self.batch(context, &request.creator_id))
    }
}

#[tokio::test]
async fn test_search_task_end_to_end() {
    let storage = Arc::new(MemoryStorage::new());
    let orchestrator = TaskOrchestrator::builder()
        .adapter(Arc::new(
            MockPlatformAdapter::new(Platform::Xhs)
                .with_items_per_source(80)
                .with_comments(2),
        ))
        .storage(storage.clone())
        .build();

    let request = TaskRequest::search("xhs", ["美食"])
        .with_max_count(50)
        .with_config(no_delay());
    let task_id = orchestrator
        .create_task(request)
        .await
        .expect("Should accept a valid search request");

    let snapshot = orchestrator
        .wait_for_completion(task_id, WAIT)
        .await
        .expect("Should finish within the wait limit");
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.result_count, 50);
    assert_eq!(snapshot.parameters.config.platform, Platform::Xhs);

    let result = orchestrator
        .get_result(task_id)
        .await
        .expect("Should find the task")
        .into_result()
        .expect("Should have a result once terminal");
    assert!(result.success);
    assert_eq!(result.data_count, 50);
    assert_eq!(result.data.len(), 50);
    assert_eq!(storage.content_count().await, 50);

    let exported = storage
        .export(&StorageQuery::for_task(task_id), SaveDataOption::Json)
        .await
        .expect("Should export stored records");
    let parsed: serde_json::Value =
        serde_json::from_str(&exported).expect("Should export valid JSON");
    assert_eq!(parsed.as_array().map(Vec::len), Some(50));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_result_is_withheld_until_terminal() {
    let orchestrator = TaskOrchestrator::builder()
        .adapter(Arc::new(
            MockPlatformAdapter::new(Platform::Douyin).with_latency(Duration::from_millis(200)),
        ))
        .build();

    let task_id = orchestrator
        .create_task(TaskRequest::detail("dy", ["v1", "v2"]).with_config(no_delay()))
        .await
        .expect("Should accept the detail request");

    match orchestrator.get_result(task_id).await.expect("Should find the task") {
        TaskOutcome::NotReady { status, .. } => assert!(!status.is_terminal()),
        TaskOutcome::Ready(result) => panic!("result served early: {:?}", result),
    }

    orchestrator
        .wait_for_completion(task_id, WAIT)
        .await
        .expect("Should finish");
    assert!(
        orchestrator
            .get_result(task_id)
            .await
            .expect("Should find the task")
            .is_ready()
    );
}

#[tokio::test]
async fn test_mixed_platforms_respect_capacity() {
    let xhs = Arc::new(
        MockPlatformAdapter::new(Platform::Xhs)
            .with_items_per_source(5)
            .with_latency(Duration::from_millis(30)),
    );
    let weibo = Arc::new(
        MockPlatformAdapter::new(Platform::Weibo)
            .with_items_per_source(5)
            .with_latency(Duration::from_millis(30)),
    );
    let orchestrator = TaskOrchestrator::builder()
        .config(OrchestratorConfig {
            max_concurrent_tasks: 2,
            ..Default::default()
        })
        .adapter(xhs.clone())
        .adapter(weibo.clone())
        .build();

    let mut ids = Vec::new();
    for n in 0..6 {
        let platform = if n % 2 == 0 { "xhs" } else { "wb" };
        let request = TaskRequest::search(platform, [format!("kw{}", n)])
            .with_max_count(5)
            .with_config(no_delay());
        ids.push(
            orchestrator
                .create_task(request)
                .await
                .expect("Should accept the request"),
        );
    }

    let running = orchestrator
        .list_tasks(TaskFilter::status(TaskStatus::Running))
        .await;
    assert!(running.len() <= 2);

    for id in &ids {
        let snapshot = orchestrator
            .wait_for_completion(*id, WAIT)
            .await
            .expect("Should finish");
        assert_eq!(snapshot.status, TaskStatus::Completed);
    }
    assert!(xhs.peak_concurrency() + weibo.peak_concurrency() <= 4);

    let stats = orchestrator.statistics().await;
    assert_eq!(stats.total_tasks, 6);
    assert_eq!(stats.completed, 6);
    assert_eq!(
        orchestrator
            .list_tasks(TaskFilter::platform(Platform::Weibo))
            .await
            .len(),
        3
    );
}

#[tokio::test]
async fn test_cached_cookies_reach_the_collector() {
    let dir = tempfile::tempdir().expect("Should create temp directory");
    let cache = Arc::new(CookieCache::new(dir.path().join("cookies"), 7));
    cache
        .save(Platform::Zhihu, "z_c0=token")
        .await
        .expect("Should save cookies");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let orchestrator = TaskOrchestrator::builder()
        .adapter(Arc::new(CookieRecorder {
            platform: Platform::Zhihu,
            seen: seen.clone(),
        }))
        .cookie_cache(cache.clone())
        .build();

    let task_id = orchestrator
        .create_task(TaskRequest::creator("zhihu", ["author-1"]).with_config(no_delay()))
        .await
        .expect("Should accept the creator request");
    let snapshot = orchestrator
        .wait_for_completion(task_id, WAIT)
        .await
        .expect("Should finish");
    assert_eq!(snapshot.status, TaskStatus::Completed);

    let seen = seen.lock().expect("Should lock recorder").clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|c| c.as_deref() == Some("z_c0=token")));
}

#[tokio::test]
async fn test_cancel_running_task_keeps_partial_results() {
    let storage = Arc::new(MemoryStorage::new());
    let orchestrator = TaskOrchestrator::builder()
        .adapter(Arc::new(
            MockPlatformAdapter::new(Platform::Bilibili)
                .with_items_per_source(1000)
                .with_latency(Duration::from_millis(50)),
        ))
        .storage(storage.clone())
        .build();

    let task_id = orchestrator
        .create_task(
            TaskRequest::search("bili", ["长视频"])
                .with_max_count(1000)
                .with_config(no_delay()),
        )
        .await
        .expect("Should accept the request");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = orchestrator
        .cancel_task(task_id)
        .await
        .expect("Should cancel");
    assert_eq!(status, TaskStatus::Cancelled);

    let snapshot = orchestrator
        .wait_for_completion(task_id, WAIT)
        .await
        .expect("Should settle");
    assert_eq!(snapshot.status, TaskStatus::Cancelled);
    assert!(snapshot.result_count < 1000);
    assert!(storage.content_count().await < 1000);
}
