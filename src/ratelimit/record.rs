//! Stored per-client counter state.

use serde::{Deserialize, Serialize};

/// Counter state for one client identifier.
///
/// At most one record exists per `client_id`; stores replace it on upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// Client identifier, usually the source IP address
    pub client_id: String,
    /// Start of the current window, in seconds since the Unix epoch
    pub window_start: i64,
    /// Requests admitted since `window_start`
    pub count: u64,
}

impl RateLimitRecord {
    /// Start a fresh window for a client at `now` with one admitted request.
    pub fn first(client_id: &str, now: i64) -> Self {
        Self {
            client_id: client_id.to_string(),
            window_start: now,
            count: 1,
        }
    }

    /// Seconds elapsed since the window started.
    ///
    /// Never negative: a clock reading earlier than `window_start` counts as
    /// the very start of the window.
    pub fn elapsed(&self, now: i64) -> u64 {
        now.saturating_sub(self.window_start).max(0) as u64
    }
}
