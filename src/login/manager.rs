use crate::adapter::{AdapterRegistry, LoginParams, LoginResult, PlatformAdapter};
use crate::config::Platform;
use crate::cookies::CookieCache;
use crate::error::{AdapterError, HarvestError, ResourceKind, Result, ValidationErrors};
use crate::login::machine::{LoginAction, next_state};
use crate::login::types::*;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One login session plus its synchronisation
///
/// `session` is only locked for short, await-free updates so status reads
/// never wait on the platform. `writer` is held across adapter calls and
/// serialises the transitions they drive; every writer re-checks the state
/// after its call returns.
struct SessionEntry {
    session: RwLock<LoginSession>,
    terminal: AtomicBool,
    writer: Mutex<()>,
    monitor: CancellationToken,
    ttl: Duration,
}

impl SessionEntry {
    fn new(session: LoginSession, ttl: Duration) -> Self {
        Self {
            session: RwLock::new(session),
            terminal: AtomicBool::new(false),
            writer: Mutex::new(()),
            monitor: CancellationToken::new(),
            ttl,
        }
    }

    fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }

    async fn snapshot(&self) -> LoginSession {
        self.session.read().await.clone()
    }

    /// Apply `action` if the transition table allows it from the current
    /// state, then let `update` fill in payload and message
    async fn apply(
        &self,
        action: LoginAction,
        update: impl FnOnce(&mut LoginSession),
    ) -> Result<LoginSession> {
        let mut session = self.session.write().await;
        self.transition(&mut *session, action, update)
    }

    /// Transition table check plus bookkeeping, under the held state lock
    fn transition(
        &self,
        session: &mut LoginSession,
        action: LoginAction,
        update: impl FnOnce(&mut LoginSession),
    ) -> Result<LoginSession> {
        let Some(next) = next_state(session.login_type, session.state, action) else {
            return Err(HarvestError::invalid_transition(session.state, action.as_str()));
        };

        let previous = session.state;
        session.state = next;
        session.updated_at = Utc::now();
        update(session);

        if next.is_terminal() {
            session.qr_token = None;
            self.terminal.store(true, Ordering::SeqCst);
            self.monitor.cancel();
        }
        debug!(
            "Login session {}: {} -> {} ({})",
            session.task_id, previous, next, session.message
        );
        Ok(session.clone())
    }

    /// Move an overdue session to `timeout`. Returns true if the session is
    /// terminal afterwards.
    async fn expire_if_due(&self) -> bool {
        if self.is_terminal() {
            return true;
        }
        let mut session = self.session.write().await;
        if !session.is_expired_at(Utc::now()) {
            return false;
        }
        let expired = self.transition(&mut *session, LoginAction::Expire, |s| {
            s.message = "login session expired".to_string();
        });
        match expired {
            Ok(_) => {
                info!("Login session {} expired", session.task_id);
                true
            }
            Err(e) => {
                warn!("Login session {} could not expire: {}", session.task_id, e);
                self.is_terminal()
            }
        }
    }
}

struct ManagerInner {
    config: LoginConfig,
    adapters: AdapterRegistry,
    cookies: Option<Arc<CookieCache>>,
    sessions: DashMap<String, Arc<SessionEntry>>,
}

/// Drives the authentication handshake of every login session, keyed by the
/// client-supplied task id
///
/// At most one non-terminal session exists per task id. A terminal session
/// is handed out by exactly one more status read and then dropped; the
/// [`sweep`](Self::sweep) reclaims the ones nobody reads.
#[derive(Clone)]
pub struct LoginSessionManager {
    inner: Arc<ManagerInner>,
}

impl LoginSessionManager {
    /// Cookies of successful logins are saved into `cookies` when given
    pub fn new(
        config: LoginConfig,
        adapters: AdapterRegistry,
        cookies: Option<Arc<CookieCache>>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                adapters,
                cookies,
                sessions: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &LoginConfig {
        &self.inner.config
    }

    /// Open a session and perform its first step
    ///
    /// QR logins come back in `qrcode_generated` with the image in the
    /// payload, phone logins in `input_required` asking for the number, and
    /// cookie logins already settled. An adapter error settles the session
    /// as `failed` rather than failing the call.
    pub async fn create_session(&self, request: LoginRequest) -> Result<LoginSession> {
        let (task_id, platform, login_type, ttl) = self.validate(&request)?;
        let adapter = self.adapter(platform)?;

        if let Some(existing) = self.lookup(&task_id) {
            existing.expire_if_due().await;
        }

        let entry = Arc::new(SessionEntry::new(
            LoginSession::new(task_id.clone(), platform, login_type, ttl),
            ttl,
        ));
        match self.inner.sessions.entry(task_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_terminal() {
                    return Err(HarvestError::SessionConflict(task_id));
                }
                occupied.get().monitor.cancel();
                occupied.insert(entry.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry.clone());
            }
        }
        info!(
            "Created {} login session for task {} on {}",
            login_type, task_id, platform
        );

        let _writer = entry.writer.lock().await;
        match login_type {
            LoginType::Qrcode => self.start_qrcode(&entry, &adapter).await,
            LoginType::Phone => {
                entry
                    .apply(LoginAction::RequestInput, |s| {
                        s.payload = Some(LoginPayload::Input(InputPrompt::phone_number()));
                        s.message = "waiting for phone number".to_string();
                    })
                    .await
            }
            LoginType::Cookie => {
                let cookies = request.cookie.unwrap_or_default();
                let result = self
                    .call_adapter(&adapter, LoginParams::Cookie { cookies })
                    .await;
                self.settle(&entry, result).await
            }
        }
    }

    async fn start_qrcode(
        &self,
        entry: &Arc<SessionEntry>,
        adapter: &Arc<dyn PlatformAdapter>,
    ) -> Result<LoginSession> {
        match self.call_adapter(adapter, LoginParams::RequestQrCode).await {
            Ok(LoginResult::QrCode { image, token }) => {
                let ttl = entry.ttl;
                let session = entry
                    .apply(LoginAction::GenerateQrCode, |s| {
                        s.payload = Some(LoginPayload::QrCode { image });
                        s.qr_token = Some(token);
                        s.expires_at = Utc::now() + ttl;
                        s.message = "scan the QR code with the platform app".to_string();
                    })
                    .await?;
                if self.inner.config.monitor_qrcode {
                    self.spawn_monitor(entry.clone(), adapter.clone());
                }
                Ok(session)
            }
            other => self.settle(entry, other).await,
        }
    }

    /// Current view of a session
    ///
    /// An overdue session turns into `timeout` here. Once terminal, the
    /// session is returned by this call and removed.
    pub async fn get_status(&self, task_id: &str) -> Result<LoginSession> {
        let entry = self.entry(task_id)?;
        entry.expire_if_due().await;
        let session = entry.snapshot().await;

        if session.state.is_terminal() {
            let removed = self
                .inner
                .sessions
                .remove_if(task_id, |_, current| Arc::ptr_eq(current, &entry));
            if removed.is_none() {
                return Err(HarvestError::not_found(ResourceKind::LoginSession, task_id));
            }
            debug!("Reclaimed {} login session {}", session.state, task_id);
        }
        Ok(session)
    }

    /// Answer the prompt of a session in `input_required`
    ///
    /// The first answer of a phone login is the phone number; the second is
    /// the verification code. Any other state rejects the call and is left
    /// as it was.
    pub async fn submit_input(&self, task_id: &str, value: &str) -> Result<LoginSession> {
        let entry = self.entry(task_id)?;
        entry.expire_if_due().await;
        let _writer = entry.writer.lock().await;

        let session = entry.snapshot().await;
        if next_state(session.login_type, session.state, LoginAction::SubmitInput).is_none() {
            return Err(HarvestError::invalid_transition(
                session.state,
                LoginAction::SubmitInput.as_str(),
            ));
        }
        let value = value.trim();
        if value.is_empty() {
            return Err(ValidationErrors::single("value", "must not be empty").into());
        }
        let adapter = self.adapter(session.platform)?;

        match session.phone {
            None => {
                let phone = value.to_string();
                let result = self
                    .call_adapter(
                        &adapter,
                        LoginParams::SubmitPhone {
                            phone: phone.clone(),
                        },
                    )
                    .await;
                match result {
                    Ok(LoginResult::CodeSent) => {
                        entry
                            .apply(LoginAction::SubmitInput, |s| {
                                s.phone = Some(phone);
                                s.payload =
                                    Some(LoginPayload::Input(InputPrompt::verification_code()));
                                s.message = "verification code sent".to_string();
                            })
                            .await
                    }
                    other => self.settle(&entry, other).await,
                }
            }
            Some(phone) => {
                let result = self
                    .call_adapter(
                        &adapter,
                        LoginParams::SubmitCode {
                            phone,
                            code: value.to_string(),
                        },
                    )
                    .await;
                self.settle(&entry, result).await
            }
        }
    }

    /// Replace the QR code of a session that is still waiting for a scan and
    /// restart its expiry window. An adapter failure leaves the session as
    /// it was.
    pub async fn refresh_qrcode(&self, task_id: &str) -> Result<LoginSession> {
        let entry = self.entry(task_id)?;
        entry.expire_if_due().await;
        let _writer = entry.writer.lock().await;

        let session = entry.snapshot().await;
        if next_state(session.login_type, session.state, LoginAction::RefreshQrCode).is_none() {
            return Err(HarvestError::invalid_transition(
                session.state,
                LoginAction::RefreshQrCode.as_str(),
            ));
        }
        let adapter = self.adapter(session.platform)?;

        match self.call_adapter(&adapter, LoginParams::RequestQrCode).await? {
            LoginResult::QrCode { image, token } => {
                let ttl = entry.ttl;
                entry
                    .apply(LoginAction::RefreshQrCode, |s| {
                        s.payload = Some(LoginPayload::QrCode { image });
                        s.qr_token = Some(token);
                        s.expires_at = Utc::now() + ttl;
                        s.message = "QR code refreshed".to_string();
                    })
                    .await
            }
            other => Err(AdapterError::permanent(format!(
                "expected a QR code, got {:?}",
                other
            ))
            .into()),
        }
    }

    /// Drop a session in any state and stop its monitor
    pub async fn delete_session(&self, task_id: &str) -> Result<()> {
        let (_, entry) = self
            .inner
            .sessions
            .remove(task_id)
            .ok_or_else(|| HarvestError::not_found(ResourceKind::LoginSession, task_id))?;
        entry.monitor.cancel();
        info!("Deleted login session {}", task_id);
        Ok(())
    }

    /// Feed a scan outcome reported by the platform into a session
    pub async fn apply_signal(&self, task_id: &str, signal: LoginSignal) -> Result<LoginSession> {
        let entry = self.entry(task_id)?;
        if entry.expire_if_due().await {
            return Err(HarvestError::invalid_transition(
                entry.snapshot().await.state,
                "apply a login signal",
            ));
        }
        let _writer = entry.writer.lock().await;
        self.apply_signal_locked(&entry, signal).await
    }

    async fn apply_signal_locked(
        &self,
        entry: &Arc<SessionEntry>,
        signal: LoginSignal,
    ) -> Result<LoginSession> {
        let state = entry.snapshot().await.state;
        match signal {
            LoginSignal::Waiting if state == LoginState::QrcodeGenerated => {
                entry
                    .apply(LoginAction::BeginPolling, |s| {
                        s.message = "waiting for scan".to_string();
                    })
                    .await
            }
            LoginSignal::Waiting => Ok(entry.snapshot().await),
            LoginSignal::Scanned if state == LoginState::ScanConfirmed => Ok(entry.snapshot().await),
            LoginSignal::Scanned => {
                entry
                    .apply(LoginAction::ConfirmScan, |s| {
                        s.message = "scan confirmed, waiting for approval".to_string();
                    })
                    .await
            }
            LoginSignal::Authenticated { cookies } => {
                if state == LoginState::QrcodeGenerated {
                    entry
                        .apply(LoginAction::ConfirmScan, |s| {
                            s.message = "scan confirmed".to_string();
                        })
                        .await?;
                }
                self.settle(entry, Ok(LoginResult::Authenticated { cookies }))
                    .await
            }
            LoginSignal::Rejected { reason } => {
                self.settle(entry, Ok(LoginResult::Rejected { reason }))
                    .await
            }
        }
    }

    /// All known sessions, oldest first. Reading them here does not reclaim
    /// terminal ones.
    pub async fn list_sessions(&self) -> Vec<LoginSession> {
        let entries: Vec<Arc<SessionEntry>> = self
            .inner
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .collect();

        let mut sessions = Vec::with_capacity(entries.len());
        for entry in entries {
            entry.expire_if_due().await;
            sessions.push(entry.snapshot().await);
        }
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Expire overdue sessions and drop terminal ones left unread past the
    /// retention window. Returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        let retention = Duration::seconds(self.inner.config.terminal_retention_secs as i64);
        let entries: Vec<(String, Arc<SessionEntry>)> = self
            .inner
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let now = Utc::now();
        let mut removed = 0;
        for (task_id, entry) in entries {
            if !entry.expire_if_due().await {
                continue;
            }
            let settled_at = entry.snapshot().await.updated_at;
            if now - settled_at < retention {
                continue;
            }
            if self
                .inner
                .sessions
                .remove_if(&task_id, |_, current| Arc::ptr_eq(current, &entry))
                .is_some()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Swept {} finished login sessions", removed);
        }
        removed
    }

    /// Settle a session from an adapter answer. Only final answers are
    /// accepted here; anything else fails the session.
    async fn settle(
        &self,
        entry: &Arc<SessionEntry>,
        result: std::result::Result<LoginResult, AdapterError>,
    ) -> Result<LoginSession> {
        match result {
            Ok(LoginResult::Authenticated { cookies }) => {
                let session = entry
                    .apply(LoginAction::Authenticate, |s| {
                        s.payload = None;
                        s.message = "login succeeded".to_string();
                    })
                    .await?;
                self.store_cookies(session.platform, &cookies).await;
                info!("Login session {} succeeded", session.task_id);
                Ok(session)
            }
            Ok(LoginResult::Rejected { reason }) => {
                entry
                    .apply(LoginAction::Fail, |s| s.message = reason)
                    .await
            }
            Ok(other) => {
                entry
                    .apply(LoginAction::Fail, |s| {
                        s.message = format!("unexpected platform response: {:?}", other);
                    })
                    .await
            }
            Err(e) => {
                warn!("Login adapter call failed: {}", e);
                entry
                    .apply(LoginAction::Fail, |s| s.message = e.to_string())
                    .await
            }
        }
    }

    async fn store_cookies(&self, platform: Platform, cookies: &str) {
        let Some(cache) = &self.inner.cookies else {
            return;
        };
        if let Err(e) = cache.save(platform, cookies).await {
            warn!("Failed to cache cookies for {}: {}", platform, e);
        }
    }

    fn spawn_monitor(&self, entry: Arc<SessionEntry>, adapter: Arc<dyn PlatformAdapter>) {
        let manager = self.clone();
        let interval = StdDuration::from_millis(self.inner.config.poll_interval_ms.max(1));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = entry.monitor.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if entry.expire_if_due().await {
                    break;
                }

                let _writer = entry.writer.lock().await;
                let session = entry.snapshot().await;
                if session.state.is_terminal() {
                    break;
                }
                let Some(token) = session.qr_token else {
                    continue;
                };

                let signal = match manager
                    .call_adapter(&adapter, LoginParams::PollQrCode { token })
                    .await
                {
                    Ok(LoginResult::Pending) => LoginSignal::Waiting,
                    Ok(LoginResult::Scanned) => LoginSignal::Scanned,
                    Ok(LoginResult::Authenticated { cookies }) => {
                        LoginSignal::Authenticated { cookies }
                    }
                    Ok(LoginResult::Rejected { reason }) => LoginSignal::Rejected { reason },
                    Ok(other) => {
                        debug!("Ignoring poll answer {:?} for {}", other, session.task_id);
                        continue;
                    }
                    Err(e) if e.is_retryable() => {
                        debug!("QR poll for {} failed, retrying: {}", session.task_id, e);
                        continue;
                    }
                    Err(e) => LoginSignal::Rejected {
                        reason: e.to_string(),
                    },
                };

                if let Err(e) = manager.apply_signal_locked(&entry, signal).await {
                    debug!("Monitor of {} stopped: {}", session.task_id, e);
                    break;
                }
            }
        });
    }

    async fn call_adapter(
        &self,
        adapter: &Arc<dyn PlatformAdapter>,
        params: LoginParams,
    ) -> std::result::Result<LoginResult, AdapterError> {
        let limit = StdDuration::from_secs(self.inner.config.adapter_timeout_secs);
        match tokio::time::timeout(limit, adapter.login(params)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::transient(format!(
                "login call timed out after {}s",
                limit.as_secs()
            ))),
        }
    }

    fn validate(&self, request: &LoginRequest) -> Result<(String, Platform, LoginType, Duration)> {
        let mut errors = ValidationErrors::new();

        let task_id = request.task_id.trim().to_string();
        if task_id.is_empty() {
            errors.push("task_id", "must not be empty");
        }
        let platform = request
            .platform
            .parse::<Platform>()
            .map_err(|reason| errors.push("platform", reason))
            .ok();
        let login_type = request
            .login_type
            .parse::<LoginType>()
            .map_err(|reason| errors.push("login_type", reason))
            .ok();

        if login_type == Some(LoginType::Cookie)
            && request.cookie.as_deref().is_none_or(|c| c.trim().is_empty())
        {
            errors.push("cookie", "cookie logins require a cookie string");
        }
        let timeout_secs = request
            .timeout_secs
            .unwrap_or(self.inner.config.default_timeout_secs);
        if timeout_secs == 0 {
            errors.push("timeout_secs", "must be greater than 0");
        }

        match (platform, login_type) {
            (Some(platform), Some(login_type)) if errors.is_empty() => Ok((
                task_id,
                platform,
                login_type,
                Duration::seconds(timeout_secs as i64),
            )),
            _ => Err(errors.into()),
        }
    }

    fn adapter(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>> {
        self.inner.adapters.get(platform).ok_or_else(|| {
            ValidationErrors::single(
                "platform",
                format!("no collector registered for {}", platform),
            )
            .into()
        })
    }

    fn lookup(&self, task_id: &str) -> Option<Arc<SessionEntry>> {
        self.inner.sessions.get(task_id).map(|e| e.value().clone())
    }

    fn entry(&self, task_id: &str) -> Result<Arc<SessionEntry>> {
        self.lookup(task_id)
            .ok_or_else(|| HarvestError::not_found(ResourceKind::LoginSession, task_id))
    }
}
