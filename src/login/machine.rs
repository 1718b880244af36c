//! Transition tables of the login handshake
//!
//! Each login type has its own table. The manager asks [`next_state`] before
//! every change and refuses anything the table does not list.

use crate::login::types::{LoginState, LoginType};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginAction {
    GenerateQrCode,
    BeginPolling,
    ConfirmScan,
    Authenticate,
    RequestInput,
    SubmitInput,
    RefreshQrCode,
    Fail,
    Expire,
}

impl LoginAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginAction::GenerateQrCode => "generate a QR code",
            LoginAction::BeginPolling => "wait for a scan",
            LoginAction::ConfirmScan => "confirm a scan",
            LoginAction::Authenticate => "authenticate",
            LoginAction::RequestInput => "request input",
            LoginAction::SubmitInput => "submit input",
            LoginAction::RefreshQrCode => "refresh the QR code",
            LoginAction::Fail => "fail",
            LoginAction::Expire => "expire",
        }
    }
}

impl fmt::Display for LoginAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State reached by applying `action` in `from`, or `None` if the login
/// type forbids it
pub fn next_state(login_type: LoginType, from: LoginState, action: LoginAction) -> Option<LoginState> {
    use LoginAction::*;
    use LoginState::*;

    if from.is_terminal() {
        return None;
    }
    match action {
        Fail => return Some(Failed),
        Expire => return from.can_expire().then_some(Timeout),
        _ => {}
    }

    match login_type {
        LoginType::Qrcode => match (from, action) {
            (Created, GenerateQrCode) => Some(QrcodeGenerated),
            (QrcodeGenerated, BeginPolling) => Some(WaitingScan),
            (QrcodeGenerated | WaitingScan, ConfirmScan) => Some(ScanConfirmed),
            (QrcodeGenerated | WaitingScan, RefreshQrCode) => Some(QrcodeGenerated),
            // Some platforms skip the separate confirmation step
            (WaitingScan | ScanConfirmed, Authenticate) => Some(Success),
            _ => None,
        },
        LoginType::Phone => match (from, action) {
            (Created, RequestInput) => Some(InputRequired),
            (InputRequired, SubmitInput) => Some(InputRequired),
            (InputRequired, Authenticate) => Some(Success),
            _ => None,
        },
        LoginType::Cookie => match (from, action) {
            (Created, Authenticate) => Some(Success),
            _ => None,
        },
    }
}
