//! Core rate limiter implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::clock::{Clock, SystemClock};
use super::record::RateLimitRecord;
use super::settings::{LimitSettings, SettingsSource};
use super::store::CounterStore;
use crate::error::Result;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed
    Allow,
    /// The client used up its budget; it should wait `retry_after` seconds
    Reject { retry_after: u64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// How the read-modify-write on a client's record is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessStrategy {
    /// Plain get-then-upsert. Concurrent requests from one client can race
    /// and admit slightly more than `count_limit`.
    Naive,
    /// Checks for the same client run one at a time. Different clients
    /// never wait on each other.
    #[default]
    PerKeyLock,
}

/// Per-client fixed-window request counter.
///
/// Thresholds are read from the settings source on every check. Rejected
/// requests are never written back, so a throttled client neither grows its
/// counter nor pushes its window forward.
pub struct RateLimiter<S, C = SystemClock> {
    store: S,
    clock: C,
    settings: Arc<dyn SettingsSource>,
    strategy: AccessStrategy,
    /// Per-client locks, only populated under `AccessStrategy::PerKeyLock`
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: CounterStore> RateLimiter<S, SystemClock> {
    /// Create a rate limiter driven by the system clock.
    pub fn new(store: S, settings: Arc<dyn SettingsSource>) -> Self {
        Self::with_clock(store, SystemClock, settings)
    }
}

impl<S: CounterStore, C: Clock> RateLimiter<S, C> {
    /// Create a rate limiter with an explicit clock.
    pub fn with_clock(store: S, clock: C, settings: Arc<dyn SettingsSource>) -> Self {
        Self {
            store,
            clock,
            settings,
            strategy: AccessStrategy::default(),
            key_locks: DashMap::new(),
        }
    }

    /// Select the resource-access strategy.
    pub fn with_strategy(mut self, strategy: AccessStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> AccessStrategy {
        self.strategy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Check a request from `client_id` at the clock's current time.
    pub async fn check(&self, client_id: &str) -> Result<Decision> {
        let now = self.clock.now();
        self.check_at(client_id, now).await
    }

    /// Check a request from `client_id` at time `now` (seconds since epoch).
    pub async fn check_at(&self, client_id: &str, now: i64) -> Result<Decision> {
        match self.strategy {
            AccessStrategy::Naive => self.evaluate(client_id, now).await,
            AccessStrategy::PerKeyLock => {
                let lock = self
                    .key_locks
                    .entry(client_id.to_string())
                    .or_default()
                    .clone();

                let decision = {
                    let _guard = lock.lock().await;
                    self.evaluate(client_id, now).await
                };

                drop(lock);
                self.key_locks
                    .remove_if(client_id, |_, lock| Arc::strong_count(lock) == 1);
                decision
            }
        }
    }

    /// Stored counter for a client.
    pub async fn record(&self, client_id: &str) -> Result<Option<RateLimitRecord>> {
        self.store.get(client_id).await
    }

    /// Thresholds currently in effect.
    pub fn settings(&self) -> Result<LimitSettings> {
        self.settings.current()
    }

    /// Fixed-window decision plus the write that goes with it.
    async fn evaluate(&self, client_id: &str, now: i64) -> Result<Decision> {
        let settings = self.settings.current()?;

        trace!(
            client_id = %client_id,
            now = now,
            time_limit = settings.time_limit,
            count_limit = settings.count_limit,
            "Checking rate limit"
        );

        let updated = match self.store.get(client_id).await? {
            None => {
                debug!(client_id = %client_id, "First request from client, opening window");
                RateLimitRecord::first(client_id, now)
            }
            Some(record) => {
                let elapsed = record.elapsed(now);

                if elapsed >= settings.time_limit {
                    trace!(client_id = %client_id, elapsed = elapsed, "Window expired, resetting");
                    RateLimitRecord::first(client_id, now)
                } else if record.count >= settings.count_limit {
                    let retry_after = settings.time_limit - elapsed;
                    debug!(
                        client_id = %client_id,
                        count = record.count,
                        retry_after = retry_after,
                        "Rate limit exceeded"
                    );
                    return Ok(Decision::Reject { retry_after });
                } else {
                    RateLimitRecord {
                        count: record.count + 1,
                        ..record
                    }
                }
            }
        };

        self.store.upsert(updated).await?;
        Ok(Decision::Allow)
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.key_locks.len()
    }
}

#[async_trait]
impl<S: CounterStore, C: Clock> RateLimiterBackend for RateLimiter<S, C> {
    async fn check(&self, client_id: &str) -> Result<Decision> {
        RateLimiter::check(self, client_id).await
    }

    async fn record(&self, client_id: &str) -> Result<Option<RateLimitRecord>> {
        RateLimiter::record(self, client_id).await
    }

    fn settings(&self) -> Result<LimitSettings> {
        RateLimiter::settings(self)
    }
}
