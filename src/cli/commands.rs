//! Implementations of the `harvester` subcommands

use crate::adapter::{AdapterRegistry, LoginResult, MOCK_VERIFICATION_CODE, MockPlatformAdapter};
use crate::cli::args::*;
use crate::config::{ConfigLayer, ConfigResolver, Platform, ServiceSettings, SettingsDiscovery};
use crate::cookies::CookieCache;
use crate::env;
use crate::login::{
    LoginRequest, LoginSession, LoginSessionManager, LoginSignal, LoginState, LoginType,
};
use crate::task::{LoggingEventHandler, TaskOrchestrator, TaskRequest, TaskStatus};
use anyhow::{Context, Result, anyhow, bail};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Load settings from an explicit file or the discovery hierarchy
pub fn load_settings(path: Option<&Path>) -> Result<ServiceSettings> {
    match path {
        Some(path) => {
            info!("Loading settings from: {:?}", path);
            let mut settings = ServiceSettings::from_toml_file(path)?;
            settings.apply_process_env()?;
            Ok(settings)
        }
        None => SettingsDiscovery::discover(),
    }
}

pub async fn run(args: Args) -> Result<()> {
    let explicit = args.config.as_deref();
    match args.command {
        Commands::Config { action } => run_config(action, explicit),
        Commands::Platforms { json } => list_platforms(&load_settings(explicit)?, json),
        Commands::Resolve { file } => resolve_request(&load_settings(explicit)?, &file),
        Commands::Simulate {
            platform,
            task_type,
            ids,
            max_count,
            items,
            comments,
            latency_ms,
            with_delay,
        } => {
            let mut request = match task_type {
                SimulatedTaskType::Search => TaskRequest::search(&platform, ids),
                SimulatedTaskType::Detail => TaskRequest::detail(&platform, ids),
                SimulatedTaskType::Creator => TaskRequest::creator(&platform, ids),
            };
            request.max_count = max_count;
            if !with_delay {
                request.config = Some(ConfigLayer {
                    delay_range: Some(vec![0, 0]),
                    ..Default::default()
                });
            }
            let collector = SimulatedCollector {
                items,
                comments,
                latency: Duration::from_millis(latency_ms),
            };
            simulate_task(&load_settings(explicit)?, request, collector).await
        }
        Commands::Login {
            platform,
            login_type,
            phone,
            code,
            cookie,
        } => {
            let inputs = LoginInputs {
                phone,
                code,
                cookie,
            };
            simulate_login(&load_settings(explicit)?, platform, login_type, inputs).await
        }
        Commands::Cookies { action } => manage_cookies(&load_settings(explicit)?, action).await,
    }
}

fn run_config(action: ConfigAction, explicit: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Init { path } => {
            let path = match path {
                Some(path) => path,
                None => env::local_config_file_path(
                    &std::env::current_dir().context("Failed to read current directory")?,
                ),
            };
            if SettingsDiscovery::write_default(&path)? {
                println!("Created settings file: {}", path.display());
            } else {
                println!("Settings file already exists: {}", path.display());
            }
            Ok(())
        }
        ConfigAction::Show => {
            SettingsDiscovery::show_discovery_info();
            let settings = load_settings(explicit)?;
            println!();
            println!("{}", settings.to_toml_string()?);
            Ok(())
        }
    }
}

fn list_platforms(settings: &ServiceSettings, json: bool) -> Result<()> {
    let platforms = ConfigResolver::from_settings(settings).platforms();
    if json {
        println!("{}", serde_json::to_string_pretty(&platforms)?);
        return Ok(());
    }

    println!("{:<10} {:<10} {:<8} {:<12} timeout", "code", "name", "delay", "max_comments");
    for profile in platforms {
        println!(
            "{:<10} {:<10} {:<8} {:<12} {}s",
            profile.platform.as_str(),
            profile.name,
            format!("{}-{}s", profile.delay_range[0], profile.delay_range[1]),
            profile.max_comments,
            profile.timeout_secs
        );
    }
    Ok(())
}

fn resolve_request(settings: &ServiceSettings, file: &Path) -> Result<()> {
    let content = if file == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read request from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read request file {:?}", file))?
    };
    let request: TaskRequest =
        serde_json::from_str(&content).context("Failed to parse task request JSON")?;

    match ConfigResolver::from_settings(settings).resolve_task(&request) {
        Ok(parameters) => {
            println!("{}", serde_json::to_string_pretty(&parameters)?);
            Ok(())
        }
        Err(errors) => {
            for error in errors.as_slice() {
                eprintln!("  {}", error);
            }
            bail!("request is invalid ({} violations)", errors.len())
        }
    }
}

struct SimulatedCollector {
    items: u32,
    comments: u32,
    latency: Duration,
}

async fn simulate_task(
    settings: &ServiceSettings,
    request: TaskRequest,
    collector: SimulatedCollector,
) -> Result<()> {
    let platform: Platform = request.platform.parse().map_err(|e: String| anyhow!(e))?;
    let adapter = MockPlatformAdapter::new(platform)
        .with_items_per_source(collector.items)
        .with_comments(collector.comments)
        .with_latency(collector.latency);

    let orchestrator = TaskOrchestrator::builder()
        .settings(settings)
        .adapter(Arc::new(adapter))
        .event_handler(Box::new(LoggingEventHandler))
        .build();

    let task_id = match orchestrator.create_task(request).await {
        Ok(id) => id,
        Err(e) => {
            for error in e.field_errors() {
                eprintln!("  {}", error);
            }
            return Err(e.into());
        }
    };
    println!("Task {} created", task_id);

    let limit = Duration::from_secs(orchestrator.config().task_timeout_secs + 5);
    let snapshot = orchestrator.wait_for_completion(task_id, limit).await?;

    let result = orchestrator
        .get_result(task_id)
        .await?
        .into_result()
        .ok_or_else(|| anyhow!("task {} has no result", task_id))?;
    println!(
        "Task {} {}: {} records, {} errors",
        task_id, snapshot.status, result.data_count, result.error_count
    );
    for error in &result.errors {
        println!("  error: {}", error);
    }

    orchestrator.shutdown().await;
    if snapshot.status != TaskStatus::Completed {
        bail!("{}", result.message);
    }
    Ok(())
}

struct LoginInputs {
    phone: Option<String>,
    code: Option<String>,
    cookie: Option<String>,
}

async fn simulate_login(
    settings: &ServiceSettings,
    platform: Platform,
    login_type: LoginType,
    inputs: LoginInputs,
) -> Result<()> {
    let adapter = MockPlatformAdapter::new(platform).with_poll_script(vec![
        LoginResult::Pending,
        LoginResult::Scanned,
        LoginResult::Authenticated {
            cookies: format!("{}_session=simulated", platform.short_code()),
        },
    ]);
    let cookies = CookieCache::from_config(&settings.cookies).map(Arc::new);
    let manager = LoginSessionManager::new(
        settings.login.clone(),
        AdapterRegistry::new().with(Arc::new(adapter)),
        cookies,
    );

    let task_id = format!("cli-{}", uuid::Uuid::new_v4().simple());
    let mut request = LoginRequest::new(task_id.clone(), platform.as_str(), login_type);
    request.cookie = inputs.cookie;

    let session = manager.create_session(request).await?;
    print_session(&session);

    let last = match login_type {
        LoginType::Cookie => session,
        LoginType::Phone => {
            let phone = inputs
                .phone
                .ok_or_else(|| anyhow!("phone logins need --phone"))?;
            let session = manager.submit_input(&task_id, &phone).await?;
            print_session(&session);
            let code = inputs
                .code
                .unwrap_or_else(|| MOCK_VERIFICATION_CODE.to_string());
            manager.submit_input(&task_id, &code).await?
        }
        LoginType::Qrcode => {
            if !settings.login.monitor_qrcode {
                manager.apply_signal(&task_id, LoginSignal::Scanned).await?;
            }
            wait_for_terminal(&manager, &task_id).await?
        }
    };
    print_session(&last);

    if last.state.is_terminal() && last.state != LoginState::Success {
        bail!("login ended in {}: {}", last.state, last.message);
    }
    Ok(())
}

async fn wait_for_terminal(manager: &LoginSessionManager, task_id: &str) -> Result<LoginSession> {
    let mut last_state = None;
    loop {
        let session = manager.get_status(task_id).await?;
        if last_state != Some(session.state) {
            print_session(&session);
            last_state = Some(session.state);
        }
        if session.state.is_terminal() {
            return Ok(session);
        }
        if !manager.config().monitor_qrcode {
            return manager
                .apply_signal(
                    task_id,
                    LoginSignal::Authenticated {
                        cookies: "session=simulated".to_string(),
                    },
                )
                .await
                .map_err(Into::into);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn print_session(session: &LoginSession) {
    println!(
        "[{}] {} ({}s left): {}",
        session.task_id,
        session.state,
        session.remaining_secs(),
        session.message
    );
}

async fn manage_cookies(settings: &ServiceSettings, action: CookieAction) -> Result<()> {
    let cache = CookieCache::from_config(&settings.cookies)
        .ok_or_else(|| anyhow!("the cookie cache is disabled in the settings"))?;

    match action {
        CookieAction::List => {
            println!("Cookie cache: {}", cache.dir().display());
            for status in cache.status().await? {
                let saved = status
                    .saved_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {:<10} cached={:<5} valid={:<5} saved_at={}",
                    status.platform.as_str(),
                    status.cached,
                    status.valid,
                    saved
                );
            }
        }
        CookieAction::Clear { platform } => {
            let removed = cache.clear(platform).await?;
            println!("Removed {} cookie files", removed);
        }
    }
    Ok(())
}
