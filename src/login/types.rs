use crate::config::Platform;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Authentication path chosen by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginType {
    Qrcode,
    Phone,
    Cookie,
}

impl LoginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginType::Qrcode => "qrcode",
            LoginType::Phone => "phone",
            LoginType::Cookie => "cookie",
        }
    }
}

impl fmt::Display for LoginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qrcode" => Ok(LoginType::Qrcode),
            "phone" => Ok(LoginType::Phone),
            "cookie" => Ok(LoginType::Cookie),
            other => Err(format!(
                "unsupported login type '{}', expected one of: qrcode, phone, cookie",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    Created,
    QrcodeGenerated,
    WaitingScan,
    ScanConfirmed,
    InputRequired,
    Success,
    Failed,
    Timeout,
}

impl LoginState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoginState::Success | LoginState::Failed | LoginState::Timeout
        )
    }

    /// States in which the session can still run out of time
    pub fn can_expire(&self) -> bool {
        matches!(
            self,
            LoginState::Created
                | LoginState::QrcodeGenerated
                | LoginState::WaitingScan
                | LoginState::InputRequired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoginState::Created => "created",
            LoginState::QrcodeGenerated => "qrcode_generated",
            LoginState::WaitingScan => "waiting_scan",
            LoginState::ScanConfirmed => "scan_confirmed",
            LoginState::InputRequired => "input_required",
            LoginState::Success => "success",
            LoginState::Failed => "failed",
            LoginState::Timeout => "timeout",
        }
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputField {
    PhoneNumber,
    VerificationCode,
}

/// What the client has to enter next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPrompt {
    pub field: InputField,
    pub placeholder: String,
    pub message: String,
}

impl InputPrompt {
    pub fn phone_number() -> Self {
        Self {
            field: InputField::PhoneNumber,
            placeholder: "13800000000".to_string(),
            message: "Enter the phone number bound to the account".to_string(),
        }
    }

    pub fn verification_code() -> Self {
        Self {
            field: InputField::VerificationCode,
            placeholder: "6-digit code".to_string(),
            message: "Enter the verification code sent by SMS".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoginPayload {
    QrCode { image: String },
    Input(InputPrompt),
}

/// Client-visible state of one login handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginSession {
    pub task_id: String,
    pub platform: Platform,
    pub login_type: LoginType,
    pub state: LoginState,
    pub payload: Option<LoginPayload>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Phone number accepted by the adapter, awaiting its code
    #[serde(skip)]
    pub(crate) phone: Option<String>,
    /// Adapter token identifying the QR code being polled
    #[serde(skip)]
    pub(crate) qr_token: Option<String>,
}

impl LoginSession {
    pub fn new(task_id: impl Into<String>, platform: Platform, login_type: LoginType, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            platform,
            login_type,
            state: LoginState::Created,
            payload: None,
            message: "login session created".to_string(),
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
            phone: None,
            qr_token: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state.can_expire() && now >= self.expires_at
    }

    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

/// Request to open a login session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub task_id: String,
    pub platform: String,
    pub login_type: String,
    /// Required for cookie logins
    pub cookie: Option<String>,
    /// Overrides the configured session lifetime
    pub timeout_secs: Option<u64>,
}

impl LoginRequest {
    pub fn new(task_id: impl Into<String>, platform: &str, login_type: LoginType) -> Self {
        Self {
            task_id: task_id.into(),
            platform: platform.to_string(),
            login_type: login_type.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Outcome of an out-of-band check on a QR code, pushed by an adapter or
/// produced by the session monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum LoginSignal {
    Waiting,
    Scanned,
    Authenticated { cookies: String },
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Session lifetime when the request sets none
    pub default_timeout_secs: u64,
    /// Interval between QR code polls
    pub poll_interval_ms: u64,
    /// How long an unread terminal session is kept before the sweep drops it
    pub terminal_retention_secs: u64,
    /// Ceiling for a single adapter login call
    pub adapter_timeout_secs: u64,
    /// Poll the adapter for QR code scans in the background
    pub monitor_qrcode: bool,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 300,
            poll_interval_ms: 2000,
            terminal_retention_secs: 60,
            adapter_timeout_secs: 30,
            monitor_qrcode: true,
        }
    }
}
