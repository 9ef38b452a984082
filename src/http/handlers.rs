//! HTTP handlers for the Turnstile service.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::gate::{rate_limit_message, MessageResponse};
use super::AppState;
use crate::error::TurnstileError;
use crate::ratelimit::{Decision, LimitSettings, SettingsSource};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Rate limit check request from an external proxy.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub client_id: String,
}

/// Rate limit check response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn message(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
        .into_response()
}

fn error_response(err: &TurnstileError) -> Response {
    let status = match err {
        TurnstileError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    message(status, err.to_string())
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "turnstile",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Check and count a request on behalf of an external proxy.
pub async fn check(State(state): State<Arc<AppState>>, Json(req): Json<CheckRequest>) -> Response {
    if req.client_id.is_empty() {
        warn!("Received rate limit check with empty client_id");
        return message(StatusCode::BAD_REQUEST, "client_id is required");
    }

    match state.limiter.check(&req.client_id).await {
        Ok(Decision::Allow) => {
            debug!(client_id = %req.client_id, "Check allowed");
            Json(CheckResponse {
                allowed: true,
                retry_after_secs: None,
                message: None,
            })
            .into_response()
        }
        Ok(Decision::Reject { retry_after }) => {
            debug!(client_id = %req.client_id, retry_after = retry_after, "Check throttled");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after.to_string())],
                Json(CheckResponse {
                    allowed: false,
                    retry_after_secs: Some(retry_after),
                    message: Some(rate_limit_message(retry_after)),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(client_id = %req.client_id, error = %e, "Rate limit check failed");
            error_response(&e)
        }
    }
}

/// Current thresholds.
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Response {
    match state.settings.current() {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Replace the live thresholds.
pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<LimitSettings>,
) -> Response {
    match state.settings.replace(settings) {
        Ok(previous) => {
            info!(
                old_time_limit = previous.time_limit,
                old_count_limit = previous.count_limit,
                time_limit = settings.time_limit,
                count_limit = settings.count_limit,
                "Rate limit settings updated"
            );
            Json(settings).into_response()
        }
        Err(TurnstileError::InvalidConfiguration(reason)) => message(StatusCode::BAD_REQUEST, reason),
        Err(e) => error_response(&e),
    }
}

/// Stored counter for one client.
pub async fn get_client(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Response {
    match state.limiter.record(&client_id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => message(StatusCode::NOT_FOUND, format!("No counter for {}", client_id)),
        Err(e) => error_response(&e),
    }
}

/// Fallback for unknown routes.
pub async fn not_found() -> Response {
    message(StatusCode::NOT_FOUND, "Not found")
}
