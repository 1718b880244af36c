use media_harvester::adapter::{AdapterRegistry, LoginResult, MOCK_VERIFICATION_CODE};
use media_harvester::config::ConfigLayer;
use media_harvester::login::{LoginConfig, LoginPayload};
use media_harvester::{
    CookieCache, HarvestError, LoginRequest, LoginSessionManager, LoginState, LoginType,
    MockPlatformAdapter, Platform, TaskOrchestrator, TaskRequest, TaskStatus,
};
use std::sync::Arc;
use std::time::Duration;

fn quiet_config() -> LoginConfig {
    LoginConfig {
        monitor_qrcode: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_phone_login_then_harvest_with_cached_cookies() {
    let dir = tempfile::tempdir().expect("Should create temp directory");
    let cache = Arc::new(CookieCache::new(dir.path().join("cookies"), 7));
    let adapter = Arc::new(MockPlatformAdapter::new(Platform::Kuaishou).with_items_per_source(10));

    let manager = LoginSessionManager::new(
        quiet_config(),
        AdapterRegistry::new().with(adapter.clone()),
        Some(cache.clone()),
    );

    let session = manager
        .create_session(LoginRequest::new("ks-login", "ks", LoginType::Phone))
        .await
        .expect("Should open a phone session");
    assert_eq!(session.state, LoginState::InputRequired);
    assert!(matches!(session.payload, Some(LoginPayload::Input(_))));

    let session = manager
        .submit_input("ks-login", "13800000000")
        .await
        .expect("Should accept the phone number");
    assert_eq!(session.state, LoginState::InputRequired);

    let session = manager
        .submit_input("ks-login", MOCK_VERIFICATION_CODE)
        .await
        .expect("Should accept the verification code");
    assert_eq!(session.state, LoginState::Success);

    let cookies = cache
        .load(Platform::Kuaishou)
        .await
        .expect("Should read the cookie cache")
        .expect("Should have cached cookies after login");
    assert!(cookies.contains("phone=13800000000"));

    let orchestrator = TaskOrchestrator::builder()
        .adapter(adapter)
        .cookie_cache(cache)
        .build();
    let task_id = orchestrator
        .create_task(
            TaskRequest::search("ks", ["旅行"])
                .with_max_count(10)
                .with_config(ConfigLayer {
                    delay_range: Some(vec![0, 0]),
                    ..Default::default()
                }),
        )
        .await
        .expect("Should accept the search request");
    let snapshot = orchestrator
        .wait_for_completion(task_id, Duration::from_secs(10))
        .await
        .expect("Should finish");
    assert_eq!(snapshot.status, TaskStatus::Completed);
    assert_eq!(snapshot.result_count, 10);
}

#[tokio::test]
async fn test_qrcode_monitor_caches_cookies() {
    let dir = tempfile::tempdir().expect("Should create temp directory");
    let cache = Arc::new(CookieCache::new(dir.path().join("cookies"), 7));
    let adapter = MockPlatformAdapter::new(Platform::Tieba).with_poll_script(vec![
        LoginResult::Pending,
        LoginResult::Scanned,
        LoginResult::Authenticated {
            cookies: "BDUSS=abc".to_string(),
        },
    ]);

    let manager = LoginSessionManager::new(
        LoginConfig {
            poll_interval_ms: 10,
            ..Default::default()
        },
        AdapterRegistry::new().with(Arc::new(adapter)),
        Some(cache.clone()),
    );

    let session = manager
        .create_session(LoginRequest::new("tieba-qr", "tieba", LoginType::Qrcode))
        .await
        .expect("Should open a QR code session");
    assert_eq!(session.state, LoginState::QrcodeGenerated);

    let mut last = session;
    for _ in 0..200 {
        last = manager
            .get_status("tieba-qr")
            .await
            .expect("Should read the session");
        if last.state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last.state, LoginState::Success);

    // Terminal state was delivered once; the session is gone now
    assert!(matches!(
        manager.get_status("tieba-qr").await,
        Err(HarvestError::NotFound { .. })
    ));

    let cookies = cache
        .load(Platform::Tieba)
        .await
        .expect("Should read the cookie cache");
    assert_eq!(cookies.as_deref(), Some("BDUSS=abc"));
}

#[tokio::test]
async fn test_sessions_of_different_tasks_are_independent() {
    let manager = Arc::new(LoginSessionManager::new(
        quiet_config(),
        AdapterRegistry::new()
            .with(Arc::new(MockPlatformAdapter::new(Platform::Xhs)))
            .with(Arc::new(MockPlatformAdapter::new(Platform::Weibo))),
        None,
    ));

    let mut handles = Vec::new();
    for n in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            let (platform, login_type) = if n % 2 == 0 {
                ("xhs", LoginType::Qrcode)
            } else {
                ("weibo", LoginType::Phone)
            };
            manager
                .create_session(LoginRequest::new(format!("task-{}", n), platform, login_type))
                .await
        }));
    }
    for handle in handles {
        handle
            .await
            .expect("Should join")
            .expect("Should open the session");
    }

    let sessions = manager.list_sessions().await;
    assert_eq!(sessions.len(), 8);

    manager
        .delete_session("task-0")
        .await
        .expect("Should delete the session");
    let session = manager
        .submit_input("task-1", "13900000000")
        .await
        .expect("Should accept input for another task");
    assert_eq!(session.state, LoginState::InputRequired);
    assert_eq!(manager.list_sessions().await.len(), 7);
}
