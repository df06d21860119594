use std::time::Duration;

use page_watch_core::contract::ValidationError;
use page_watch_core::retry::Retryable;
use thiserror::Error;

use crate::retry::{AttemptsExhausted, CallTimedOut};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be configured")]
    Missing(&'static str),
    #[error("{name} is invalid: {message}")]
    Invalid { name: &'static str, message: String },
}

/// Failure talking to the content API or the integration endpoint.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },
    #[error("upstream rejected credentials (status {status})")]
    Unauthorized { status: u16 },
    #[error("upstream server error (status {status}): {body}")]
    Server { status: u16, body: String },
    #[error("upstream rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: String) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            401 | 403 => Self::Unauthorized { status },
            500..=599 => Self::Server { status, body },
            _ => Self::Rejected { status, body },
        }
    }
}

impl Retryable for UpstreamError {
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. } | Self::Malformed(_))
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<CallTimedOut> for UpstreamError {
    fn from(value: CallTimedOut) -> Self {
        Self::Timeout(value.0)
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(Duration::ZERO)
        } else if error.is_decode() {
            Self::Malformed(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("state store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("state store backend error: {0}")]
    Backend(String),
    #[error("state store returned a corrupt record: {0}")]
    Corrupt(String),
}

impl From<CallTimedOut> for StoreError {
    fn from(value: CallTimedOut) -> Self {
        Self::Timeout(value.0)
    }
}

/// Failure carrying a request to another component.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to encode invocation payload: {0}")]
    Encode(String),
    #[error("failed to invoke {function}: {message}")]
    Transport { function: String, message: String },
    #[error("{function} reported {kind}: {message}")]
    Function {
        function: String,
        kind: String,
        message: String,
    },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<CallTimedOut> for InvokeError {
    fn from(value: CallTimedOut) -> Self {
        Self::Timeout(value.0)
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to read registrations: {0}")]
    Registrations(#[source] StoreError),
    #[error("tick exceeded its budget of {0:?}")]
    BudgetExceeded(Duration),
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("content query failed: {0}")]
    Content(#[from] AttemptsExhausted<UpstreamError>),
    #[error("failed to read poll watermark: {0}")]
    Store(#[from] StoreError),
    #[error("monitor exceeded its budget of {0:?}")]
    BudgetExceeded(Duration),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("claim check failed: {0}")]
    Store(#[from] StoreError),
    #[error("delivery failed: {0}")]
    Delivery(#[from] AttemptsExhausted<UpstreamError>),
    #[error("dispatch exceeded its budget of {0:?}")]
    BudgetExceeded(Duration),
}
