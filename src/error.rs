// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP boundary error type.
//!
//! Core components return typed results; handlers map them onto `ApiError`
//! which renders a JSON body plus any rate-limit metadata headers. Denials
//! (401/429) are expected traffic and are never logged as errors.

use axum::{
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RETRY_AFTER: HeaderName = HeaderName::from_static("retry-after");

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    /// Remaining quota to surface as `X-RateLimit-Remaining` (429 responses).
    pub remaining: Option<u32>,
    /// When the caller may retry, surfaced as `Retry-After` seconds.
    pub retry_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            remaining: None,
            retry_at: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn payment_required(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYMENT_REQUIRED, message)
    }

    pub fn too_many_requests(
        message: impl Into<String>,
        remaining: u32,
        retry_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: message.into(),
            remaining: Some(remaining),
            retry_at,
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<crate::keys::KeyError> for ApiError {
    fn from(err: crate::keys::KeyError) -> Self {
        match err {
            crate::keys::KeyError::InvalidInput(msg) => ApiError::bad_request(msg),
            crate::keys::KeyError::Store(e) => {
                tracing::error!(error = %e, "key store failure");
                ApiError::service_unavailable("key store unavailable")
            }
        }
    }
}

impl From<crate::ledger::LedgerError> for ApiError {
    fn from(err: crate::ledger::LedgerError) -> Self {
        match err {
            crate::ledger::LedgerError::InvalidInput(msg) => ApiError::bad_request(msg),
            crate::ledger::LedgerError::InvalidCursor => ApiError::bad_request("invalid cursor"),
            other => {
                tracing::error!(error = %other, "ledger store failure");
                ApiError::service_unavailable("ledger unavailable")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        let mut response = (self.status, body).into_response();

        if let Some(remaining) = self.remaining {
            if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                response.headers_mut().insert(X_RATELIMIT_REMAINING, value);
            }
        }
        if let Some(retry_at) = self.retry_at {
            let secs = (retry_at - Utc::now()).num_seconds().max(0);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}
