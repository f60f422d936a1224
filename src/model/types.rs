use crate::cancel::Cancellation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// JSON schema the structured response must satisfy.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Raw reply from the provider: unparsed structured content plus usage.
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub content: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Provider answered with a non-success HTTP status.
    Status(u16),
    /// The HTTP client's own deadline fired.
    Timeout,
    /// No response: DNS, connect, TLS or reset.
    Connect,
    /// 2xx, but the response envelope was not decodable.
    Decode,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Status(code),
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: "request timed out".into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connect,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Decode,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Auth,
    Quota,
    Timeout,
    Server,
    SchemaValidation,
    Cancelled,
}

impl ErrorCategory {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorCategory::Validation,
            401 | 403 => ErrorCategory::Auth,
            408 => ErrorCategory::Timeout,
            429 => ErrorCategory::Quota,
            500..=599 => ErrorCategory::Server,
            _ => ErrorCategory::Validation,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Quota | ErrorCategory::Timeout | ErrorCategory::Server
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Auth => "auth",
            ErrorCategory::Quota => "quota",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Server => "server",
            ErrorCategory::SchemaValidation => "schema_validation",
            ErrorCategory::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, Serialize)]
#[error("model call failed: {category} (status {status_code:?}) after {attempts} attempt(s): {message}")]
pub struct ModelFailure {
    pub category: ErrorCategory,
    pub status_code: Option<u16>,
    pub message: String,
    pub duration_ms: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ModelSuccess<T> {
    pub data: T,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub enum ModelCallOutcome<T> {
    Success(ModelSuccess<T>),
    Failure(ModelFailure),
}

impl<T> ModelCallOutcome<T> {
    pub fn into_result(self) -> Result<ModelSuccess<T>, ModelFailure> {
        match self {
            ModelCallOutcome::Success(s) => Ok(s),
            ModelCallOutcome::Failure(f) => Err(f),
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ModelCallOutcome::Success(s) => s.attempts,
            ModelCallOutcome::Failure(f) => f.attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Per-attempt deadline.
    pub timeout: Duration,
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub cancel: Cancellation,
    /// Short name of the call site, for logs.
    pub label: &'static str,
}

impl CallOptions {
    pub fn new(label: &'static str, timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            cancel: Cancellation::never(),
            label,
        }
    }

    pub fn with_cancel(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }
}
