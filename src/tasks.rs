//! Background maintenance run by the service: stale counter sweeps and
//! settings file reloads. The limiter itself never spawns anything.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ratelimit::{Clock, CounterStore, SettingsSource, SharedSettings};

/// Remove counters whose window started more than `retention_secs` before `now`.
///
/// The effective retention is never shorter than the live `time_limit`, so a
/// window that is still open is never swept.
pub async fn sweep_once(
    store: &dyn CounterStore,
    settings: &dyn SettingsSource,
    now: i64,
    retention_secs: u64,
) -> Result<usize> {
    let retention = retention_secs.max(settings.current()?.time_limit);
    let cutoff = now.saturating_sub(retention.min(i64::MAX as u64) as i64);
    let removed = store.purge_older_than(cutoff).await?;
    if removed > 0 {
        info!(removed = removed, cutoff = cutoff, "Swept stale rate limit counters");
    } else {
        debug!(cutoff = cutoff, "No stale rate limit counters");
    }
    Ok(removed)
}

/// Periodically sweep stale counters until the task is aborted.
pub fn spawn_sweeper<C: Clock + 'static>(
    store: Arc<dyn CounterStore>,
    settings: Arc<dyn SettingsSource>,
    clock: C,
    interval: Duration,
    retention_secs: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_once(store.as_ref(), settings.as_ref(), clock.now(), retention_secs).await {
                warn!(error = %e, "Counter sweep failed");
            }
        }
    })
}

/// Periodically re-read the settings file into the live thresholds.
///
/// A broken file is logged and the previous thresholds stay in effect.
pub fn spawn_settings_reloader(
    settings: Arc<SharedSettings>,
    path: PathBuf,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = settings.reload_from_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to reload rate limit settings");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Decision, LimitSettings, ManualClock, MemoryStore, RateLimitRecord, RateLimiter};

    #[tokio::test]
    async fn test_sweep_once_respects_retention() {
        let store = MemoryStore::from_records([
            RateLimitRecord::first("stale", 1_000),
            RateLimitRecord::first("fresh", 4_000),
        ]);

        let settings = LimitSettings::new(60, 3).unwrap();

        let removed = sweep_once(&store, &settings, 5_000, 3_600).await.unwrap();

        assert_eq!(removed, 1);
        assert!(store.get("stale").await.unwrap().is_none());
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sweep_keeps_windows_longer_than_retention() {
        let store = Arc::new(MemoryStore::new());
        let settings = Arc::new(SharedSettings::new(LimitSettings::new(7_200, 1).unwrap()).unwrap());
        let limiter = RateLimiter::with_clock(store.clone(), ManualClock::new(0), settings.clone());

        assert_eq!(limiter.check_at("10.0.0.1", 0).await.unwrap(), Decision::Allow);
        assert_eq!(
            limiter.check_at("10.0.0.1", 4_000).await.unwrap(),
            Decision::Reject { retry_after: 3_200 }
        );

        let removed = sweep_once(store.as_ref(), settings.as_ref(), 4_000, 3_600).await.unwrap();
        assert_eq!(removed, 0);

        assert_eq!(
            limiter.check_at("10.0.0.1", 4_001).await.unwrap(),
            Decision::Reject { retry_after: 3_199 }
        );

        // Once the window has closed the record is fair game
        let removed = sweep_once(store.as_ref(), settings.as_ref(), 7_300, 3_600).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_interval() {
        let store = Arc::new(MemoryStore::from_records([RateLimitRecord::first("stale", 0)]));

        let settings = Arc::new(LimitSettings::new(60, 3).unwrap());

        let handle = spawn_sweeper(
            store.clone(),
            settings,
            ManualClock::new(10_000),
            Duration::from_secs(60),
            3_600,
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert_eq!(store.len().await.unwrap(), 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reloader_keeps_old_settings_on_bad_file() {
        let path = std::env::temp_dir().join(format!("turnstile-reload-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "time_limit: 0\ncount_limit: 3\n").unwrap();
        let settings = Arc::new(SharedSettings::new(LimitSettings::new(60, 3).unwrap()).unwrap());

        let handle = spawn_settings_reloader(settings.clone(), path.clone(), Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        assert_eq!(settings.current().unwrap().time_limit, 60);

        handle.abort();
        std::fs::remove_file(&path).unwrap();
    }
}
