//! Configuration management for Turnstile.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `TURNSTILE__`-prefixed environment variables, e.g.
//! `TURNSTILE__RATE_LIMITING__COUNT_LIMIT=100`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{AccessStrategy, LimitSettings};

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Bearer token guarding `/admin/*`. The admin API is off when unset.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            admin_token: None,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// What the HTTP gate does when the limiter itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Answer 503 and drop the request
    #[default]
    FailClosed,
    /// Log and let the request through
    FailOpen,
}

/// Where counters are kept.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process memory, lost on restart
    #[default]
    Memory,
    /// JSON snapshot file
    File { path: PathBuf },
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Window length in seconds
    #[serde(default = "default_time_limit")]
    pub time_limit: u64,

    /// Maximum admitted requests per window
    #[serde(default = "default_count_limit")]
    pub count_limit: u64,

    /// Optional YAML file holding live `time_limit`/`count_limit` values.
    /// Takes precedence over the two fields above and is polled for changes.
    #[serde(default)]
    pub settings_path: Option<PathBuf>,

    /// Settings file poll interval in seconds
    #[serde(default = "default_reload_interval")]
    pub reload_interval_secs: u64,

    #[serde(default)]
    pub strategy: AccessStrategy,

    #[serde(default)]
    pub store: StoreConfig,

    /// How often stale counters are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Counters whose window started longer ago than this are swept
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Query parameter that marks a request as an API call
    #[serde(default = "default_activation_param")]
    pub activation_param: String,

    /// Take the client address from `X-Forwarded-For` instead of the peer
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            time_limit: default_time_limit(),
            count_limit: default_count_limit(),
            settings_path: None,
            reload_interval_secs: default_reload_interval(),
            strategy: AccessStrategy::default(),
            store: StoreConfig::default(),
            sweep_interval_secs: default_sweep_interval(),
            retention_secs: default_retention(),
            failure_policy: FailurePolicy::default(),
            activation_param: default_activation_param(),
            trust_forwarded_for: false,
        }
    }
}

fn default_time_limit() -> u64 {
    60
}

fn default_count_limit() -> u64 {
    60
}

fn default_reload_interval() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_retention() -> u64 {
    3600
}

fn default_activation_param() -> String {
    "_format".to_string()
}

impl RateLimitingConfig {
    /// Thresholds to start with: the settings file if configured, otherwise
    /// the inline values.
    pub fn initial_settings(&self) -> Result<LimitSettings> {
        match &self.settings_path {
            Some(path) => LimitSettings::from_file(path),
            None => LimitSettings::new(self.time_limit, self.count_limit),
        }
    }
}

impl TurnstileConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("TURNSTILE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))
    }

    /// Load configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))
    }
}
