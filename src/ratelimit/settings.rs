//! Rate limit thresholds and the sources that provide them.
//!
//! Thresholds are admin-configurable and may change while the service runs,
//! so the limiter asks its [`SettingsSource`] for them on every check instead
//! of caching a copy.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::error::{Result, TurnstileError};

/// Window length and request budget for the fixed-window limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Window length in seconds
    pub time_limit: u64,
    /// Maximum admitted requests per window
    pub count_limit: u64,
}

impl LimitSettings {
    /// Build settings, rejecting non-positive values.
    pub fn new(time_limit: u64, count_limit: u64) -> Result<Self> {
        let settings = Self {
            time_limit,
            count_limit,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check that both thresholds are positive.
    pub fn validate(&self) -> Result<()> {
        if self.time_limit == 0 {
            return Err(TurnstileError::InvalidConfiguration(
                "time_limit must be a positive number of seconds".to_string(),
            ));
        }
        if self.count_limit == 0 {
            return Err(TurnstileError::InvalidConfiguration(
                "count_limit must be a positive number of requests".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate settings from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: LimitSettings = serde_yaml::from_str(yaml).map_err(|e| {
            TurnstileError::InvalidConfiguration(format!("Failed to parse rate limit settings: {}", e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit settings");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}

/// Provides the current thresholds to the limiter.
pub trait SettingsSource: Send + Sync {
    /// Current, validated thresholds.
    fn current(&self) -> Result<LimitSettings>;
}

impl SettingsSource for LimitSettings {
    fn current(&self) -> Result<LimitSettings> {
        self.validate()?;
        Ok(*self)
    }
}

impl<S: SettingsSource + ?Sized> SettingsSource for Arc<S> {
    fn current(&self) -> Result<LimitSettings> {
        (**self).current()
    }
}

/// Thresholds that can be replaced at runtime.
///
/// Shared between the limiter, the admin endpoint and the reload task.
#[derive(Debug)]
pub struct SharedSettings {
    inner: RwLock<LimitSettings>,
}

impl SharedSettings {
    pub fn new(settings: LimitSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            inner: RwLock::new(settings),
        })
    }

    /// Swap in new thresholds. Invalid values leave the old ones in place.
    pub fn replace(&self, settings: LimitSettings) -> Result<LimitSettings> {
        settings.validate()?;
        let mut current = self.inner.write();
        let previous = *current;
        *current = settings;
        Ok(previous)
    }

    /// Re-read thresholds from a YAML file and apply them if they changed.
    ///
    /// Returns `true` when the live thresholds were updated.
    pub fn reload_from_file<P: AsRef<Path>>(&self, path: P) -> Result<bool> {
        let loaded = LimitSettings::from_file(path)?;
        if *self.inner.read() == loaded {
            return Ok(false);
        }
        let previous = self.replace(loaded)?;
        info!(
            old_time_limit = previous.time_limit,
            old_count_limit = previous.count_limit,
            time_limit = loaded.time_limit,
            count_limit = loaded.count_limit,
            "Rate limit settings reloaded"
        );
        Ok(true)
    }
}

impl SettingsSource for SharedSettings {
    fn current(&self) -> Result<LimitSettings> {
        Ok(*self.inner.read())
    }
}
