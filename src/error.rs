//! Error taxonomy shared by the orchestrator, the configuration resolver and
//! the login session manager.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::login::LoginState;

pub type Result<T, E = HarvestError> = std::result::Result<T, E>;

/// Top-level error surfaced by the public operations of this crate
#[derive(Debug, Clone, thiserror::Error)]
pub enum HarvestError {
    /// One or more request fields failed validation. Never partially applied.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    /// A login operation was attempted from a state that forbids it
    #[error("cannot {action} while login session is {from}")]
    InvalidTransition { from: LoginState, action: String },

    #[error("an active login session already exists for task {0}")]
    SessionConflict(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{operation} timed out after {elapsed_secs}s")]
    Timeout { operation: String, elapsed_secs: u64 },
}

impl HarvestError {
    pub fn not_found(kind: ResourceKind, id: impl ToString) -> Self {
        HarvestError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(from: LoginState, action: impl Into<String>) -> Self {
        HarvestError::InvalidTransition {
            from,
            action: action.into(),
        }
    }

    /// Field-level violations, if this is a validation error
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            HarvestError::Validation(errors) => errors.as_slice(),
            _ => &[],
        }
    }
}

impl From<ValidationErrors> for HarvestError {
    fn from(errors: ValidationErrors) -> Self {
        HarvestError::Validation(errors)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Task,
    LoginSession,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Task => write!(f, "task"),
            ResourceKind::LoginSession => write!(f, "login session"),
        }
    }
}

/// A single violated field, addressed by its dotted path in the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Aggregated validation failures. Every violated field of a request is
/// reported in one value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, reason);
        errors
    }

    pub fn push(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            reason: reason.into(),
        });
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[FieldError] {
        &self.0
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    /// `Ok(value)` when no violation was recorded
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{}", joined)
    }
}

impl std::error::Error for ValidationErrors {}

impl IntoIterator for ValidationErrors {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Failure reported by a platform adapter. The adapter decides whether a
/// retry within the same task can succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum AdapterError {
    #[error("transient adapter error: {0}")]
    Transient(String),
    #[error("permanent adapter error: {0}")]
    Permanent(String),
}

impl AdapterError {
    pub fn transient(message: impl Into<String>) -> Self {
        AdapterError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        AdapterError::Permanent(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            AdapterError::Transient(m) | AdapterError::Permanent(m) => m,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);
