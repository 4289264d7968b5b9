//! Typed error kinds shared across the engine.
//!
//! Mirrors the proxy's hand-rolled error enum + manual `IntoResponse`
//! rather than pulling in a derive-macro error crate: a handful of named
//! variants, each mapped to one HTTP status and one log line.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

/// Errors that can surface from any engine component.
#[derive(Debug)]
pub enum EngineError {
    /// The caller sent something the engine cannot act on (empty prompt,
    /// oversized payload, malformed session id).
    InvalidInput(String),
    /// A bounded operation (draft call, specialist call, vote) exceeded its
    /// deadline.
    Timeout(String),
    /// The request would exceed a configured budget tier.
    BudgetExceeded(String),
    /// A provider reported itself unhealthy or failed repeatedly.
    ProviderDown(String),
    /// The memory store (durable log or index) is unavailable.
    StoreUnavailable(String),
    /// The operation was cancelled cooperatively (session dropped,
    /// shutdown in progress).
    Cancelled,
    /// Anything else — treated as a bug, logged at error level.
    Internal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Timeout(msg) => write!(f, "timed out: {msg}"),
            EngineError::BudgetExceeded(msg) => write!(f, "budget exceeded: {msg}"),
            EngineError::ProviderDown(msg) => write!(f, "provider unavailable: {msg}"),
            EngineError::StoreUnavailable(msg) => write!(f, "memory store unavailable: {msg}"),
            EngineError::Cancelled => write!(f, "operation cancelled"),
            EngineError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    fn status(&self) -> StatusCode {
        match self {
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EngineError::BudgetExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            EngineError::ProviderDown(_) => StatusCode::BAD_GATEWAY,
            EngineError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind, for SSE `error` events and the JSON
    /// body `IntoResponse` already emits.
    pub fn kind(&self) -> &'static str {
        self.code()
    }

    fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::Timeout(_) => "timeout",
            EngineError::BudgetExceeded(_) => "budget_exceeded",
            EngineError::ProviderDown(_) => "provider_down",
            EngineError::StoreUnavailable(_) => "store_unavailable",
            EngineError::Cancelled => "cancelled",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (status, axum::Json(body)).into_response()
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
