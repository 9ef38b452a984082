//! HTTP surface: the rate limiting gate, the external check endpoint and the
//! admin API for live thresholds.

mod admin;
mod gate;
mod handlers;
mod server;

pub use admin::require_admin;
pub use gate::{gate, rate_limit_message, too_many_requests, GateConfig, MessageResponse};
pub use handlers::{CheckRequest, CheckResponse, HealthResponse};
pub use server::HttpServer;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::ratelimit::{RateLimiterBackend, SharedSettings};

/// Shared application state.
pub struct AppState {
    pub limiter: Arc<dyn RateLimiterBackend>,
    /// Live thresholds; the same instance the limiter reads from
    pub settings: Arc<SharedSettings>,
    pub gate: GateConfig,
    /// Bearer token for the admin API; `None` disables it
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(
        limiter: Arc<dyn RateLimiterBackend>,
        settings: Arc<SharedSettings>,
        gate: GateConfig,
    ) -> Self {
        Self {
            limiter,
            settings,
            gate,
            admin_token: None,
        }
    }

    /// Enable the admin API behind the given bearer token.
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.is_empty());
        self
    }
}

/// Build the service router.
///
/// `/health` and `/check` are never throttled. The admin API and the
/// fallback sit behind [`gate`]; the admin API also needs the admin token.
pub fn router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route(
            "/admin/settings",
            get(handlers::get_settings).put(handlers::put_settings),
        )
        .route("/admin/clients/:client_id", get(handlers::get_client))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let protected = Router::new()
        .merge(admin)
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(state.clone(), gate));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/check", post(handlers::check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
