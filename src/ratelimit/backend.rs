//! Object-safe limiter interface for the HTTP layer.

use async_trait::async_trait;

use super::limiter::Decision;
use super::record::RateLimitRecord;
use super::settings::LimitSettings;
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// Hides the store and clock type parameters of
/// [`RateLimiter`](super::RateLimiter) so handlers can hold an
/// `Arc<dyn RateLimiterBackend>`.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Decide whether a request from `client_id` may proceed right now.
    async fn check(&self, client_id: &str) -> Result<Decision>;

    /// Current stored counter for a client.
    async fn record(&self, client_id: &str) -> Result<Option<RateLimitRecord>>;

    /// Thresholds in effect.
    fn settings(&self) -> Result<LimitSettings>;
}
