//! Rate limiting middleware for API requests.
//!
//! Only requests carrying the activation query parameter (`_format` by
//! default) are counted. Everything else passes through untouched.

use axum::{
    extract::{ConnectInfo, Query, Request, State},
    http::{header, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::AppState;
use crate::config::{FailurePolicy, RateLimitingConfig};
use crate::ratelimit::Decision;

/// Caller-side settings for the gate.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Query parameter that marks a request as an API call
    pub activation_param: String,
    /// Take the client address from `X-Forwarded-For` instead of the peer
    pub trust_forwarded_for: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::from(&RateLimitingConfig::default())
    }
}

impl From<&RateLimitingConfig> for GateConfig {
    fn from(config: &RateLimitingConfig) -> Self {
        Self {
            activation_param: config.activation_param.clone(),
            trust_forwarded_for: config.trust_forwarded_for,
            failure_policy: config.failure_policy,
        }
    }
}

impl GateConfig {
    /// Whether a request URI carries the activation marker.
    ///
    /// Empty values and `"0"` do not count.
    pub fn is_activated(&self, uri: &Uri) -> bool {
        let Ok(Query(params)) = Query::<HashMap<String, String>>::try_from_uri(uri) else {
            return false;
        };
        params
            .get(&self.activation_param)
            .is_some_and(|value| !value.is_empty() && value != "0")
    }

    /// Client identifier for a request: the forwarded-for address when trusted,
    /// else the TCP peer address.
    pub fn client_id(&self, request: &Request) -> Option<String> {
        if self.trust_forwarded_for {
            let forwarded = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse::<IpAddr>().ok());
            if let Some(ip) = forwarded {
                return Some(ip.to_string());
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    }
}

/// JSON body of a rejected or failed request.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Message shown to throttled clients.
pub fn rate_limit_message(retry_after: u64) -> String {
    format!(
        "Rate limit exceeded. Please wait for another {} seconds before making more requests.",
        retry_after
    )
}

/// 429 response carrying the wait time in the body and in `Retry-After`.
pub fn too_many_requests(retry_after: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after.to_string())],
        Json(MessageResponse {
            message: rate_limit_message(retry_after),
        }),
    )
        .into_response()
}

fn service_unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(MessageResponse {
            message: "Rate limiting is temporarily unavailable.".to_string(),
        }),
    )
        .into_response()
}

/// Axum middleware enforcing the per-client limit.
pub async fn gate(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let gate = &state.gate;

    if !gate.is_activated(request.uri()) {
        return next.run(request).await;
    }

    let Some(client_id) = gate.client_id(&request) else {
        return match gate.failure_policy {
            FailurePolicy::FailOpen => {
                warn!(path = %request.uri().path(), "No client address, letting request through");
                next.run(request).await
            }
            FailurePolicy::FailClosed => {
                error!(path = %request.uri().path(), "No client address, refusing request");
                service_unavailable()
            }
        };
    };

    match state.limiter.check(&client_id).await {
        Ok(Decision::Allow) => {
            debug!(client_id = %client_id, "Request allowed");
            next.run(request).await
        }
        Ok(Decision::Reject { retry_after }) => {
            debug!(client_id = %client_id, retry_after = retry_after, "Request throttled");
            too_many_requests(retry_after)
        }
        Err(e) => match gate.failure_policy {
            FailurePolicy::FailOpen => {
                warn!(client_id = %client_id, error = %e, "Rate limit check failed, failing open");
                next.run(request).await
            }
            FailurePolicy::FailClosed => {
                error!(client_id = %client_id, error = %e, "Rate limit check failed, failing closed");
                service_unavailable()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(uri: &str) -> Request {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_activation_marker() {
        let gate = GateConfig::default();

        assert!(gate.is_activated(&"/node/1?_format=json".parse().unwrap()));
        assert!(gate.is_activated(&"/node/1?page=2&_format=hal_json".parse().unwrap()));
        assert!(!gate.is_activated(&"/node/1".parse().unwrap()));
        assert!(!gate.is_activated(&"/node/1?_format=".parse().unwrap()));
        assert!(!gate.is_activated(&"/node/1?_format=0".parse().unwrap()));
        assert!(!gate.is_activated(&"/node/1?format=json".parse().unwrap()));
    }

    #[test]
    fn test_custom_activation_param() {
        let gate = GateConfig {
            activation_param: "api".to_string(),
            ..Default::default()
        };
        assert!(gate.is_activated(&"/items?api=1".parse().unwrap()));
        assert!(!gate.is_activated(&"/items?_format=json".parse().unwrap()));
    }

    #[test]
    fn test_client_id_from_peer() {
        let gate = GateConfig::default();
        let mut req = request("/?_format=json");
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 7], 40000))));

        assert_eq!(gate.client_id(&req).as_deref(), Some("192.168.1.7"));
    }

    #[test]
    fn test_forwarded_for_ignored_unless_trusted() {
        let gate = GateConfig::default();
        let mut req = request("/?_format=json");
        req.headers_mut()
            .insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 40000))));

        assert_eq!(gate.client_id(&req).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_forwarded_for_first_hop_when_trusted() {
        let gate = GateConfig {
            trust_forwarded_for: true,
            ..Default::default()
        };
        let mut req = request("/?_format=json");
        req.headers_mut()
            .insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());

        assert_eq!(gate.client_id(&req).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn test_garbage_forwarded_for_falls_back_to_peer() {
        let gate = GateConfig {
            trust_forwarded_for: true,
            ..Default::default()
        };
        let mut req = request("/?_format=json");
        req.headers_mut()
            .insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 2], 40000))));

        assert_eq!(gate.client_id(&req).as_deref(), Some("10.0.0.2"));
    }

    #[test]
    fn test_rate_limit_message() {
        assert_eq!(
            rate_limit_message(30),
            "Rate limit exceeded. Please wait for another 30 seconds before making more requests."
        );
    }
}
