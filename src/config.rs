//! Configuration management for Quota Gate.
//!
//! Values are layered, lowest precedence first: built-in defaults, an optional
//! configuration file, `QUOTA_GATE_<SECTION>__<FIELD>` environment variables, and
//! the flat variables listed in [`FLAT_ENV_OVERRIDES`].

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::HeaderName;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{QuotaError, Result};
use crate::ratelimit::LimiterConfig;

/// Prefix of structured environment variables.
pub const ENV_PREFIX: &str = "QUOTA_GATE";

/// Flat environment variables and the configuration keys they override.
pub const FLAT_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("RATE_LIMIT_TOKEN", "rate_limiting.rate_limit_token"),
    ("RATE_LIMIT_IP", "rate_limiting.rate_limit_ip"),
    ("BLOCK_DURATION", "rate_limiting.block_duration_secs"),
    ("REDIS_ADDR", "store.redis_addr"),
    ("REDIS_PASSWORD", "store.redis_password"),
];

/// Main configuration for the Quota Gate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaGateConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Counting store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Request header carrying the caller's API token
    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Resolve the client IP from proxy headers before the peer address.
    /// Only enable behind a proxy that overwrites those headers.
    #[serde(default = "default_trust_forwarded_for")]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            token_header: default_token_header(),
            trust_forwarded_for: default_trust_forwarded_for(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_token_header() -> String {
    "API_KEY".to_string()
}

fn default_trust_forwarded_for() -> bool {
    false
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Maximum requests per window for token callers
    #[serde(default = "default_rate_limit_token")]
    pub rate_limit_token: u64,

    /// Maximum requests per window for IP callers
    #[serde(default = "default_rate_limit_ip")]
    pub rate_limit_ip: u64,

    /// Window length and block length in seconds
    #[serde(default = "default_block_duration_secs")]
    pub block_duration_secs: u64,

    /// Deadline for a single store call in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rate_limit_token: default_rate_limit_token(),
            rate_limit_ip: default_rate_limit_ip(),
            block_duration_secs: default_block_duration_secs(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_rate_limit_token() -> u64 {
    10
}

fn default_rate_limit_ip() -> u64 {
    5
}

fn default_block_duration_secs() -> u64 {
    60
}

fn default_store_timeout_ms() -> u64 {
    500
}

impl RateLimitingConfig {
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Build the immutable limiter configuration.
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig::new(
            self.rate_limit_token,
            self.rate_limit_ip,
            self.block_duration(),
        )
        .with_store_timeout(self.store_timeout())
    }
}

/// Which counting store implementation to run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    #[default]
    Redis,
    /// Process-local memory, for single-instance deployments
    Memory,
}

/// Counting store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis `host:port`
    #[serde(default = "default_redis_addr")]
    pub redis_addr: String,

    #[serde(default)]
    pub redis_password: Option<String>,

    #[serde(default)]
    pub redis_db: i64,

    /// How often the in-memory store purges expired entries, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_addr: default_redis_addr(),
            redis_password: None,
            redis_db: 0,
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_redis_addr() -> String {
    "127.0.0.1:6379".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    30
}

impl StoreConfig {
    /// Connection URL for the Redis backend.
    pub fn redis_url(&self) -> String {
        match self.redis_password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!("redis://:{}@{}/{}", password, self.redis_addr, self.redis_db),
            None => format!("redis://{}/{}", self.redis_addr, self.redis_db),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl QuotaGateConfig {
    /// Load configuration from an optional file and the process environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Self::build(builder, |name| std::env::var(name).ok())
    }

    /// Load configuration from a YAML document, without consulting the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let builder = Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml));
        Self::build(builder, |_| None)
    }

    /// Apply flat variable overrides from `lookup`, then deserialize and validate.
    fn build<F>(builder: ConfigBuilder<DefaultState>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = builder;
        for &(variable, key) in FLAT_ENV_OVERRIDES {
            let value = lookup(variable).filter(|v| !v.is_empty());
            builder = builder.set_override_option(key, value)?;
        }

        let config: QuotaGateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialize fine but cannot be served.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.block_duration_secs == 0 {
            return Err(QuotaError::Config(
                "block_duration_secs must be greater than zero".to_string(),
            ));
        }
        if self.rate_limiting.store_timeout_ms == 0 {
            return Err(QuotaError::Config(
                "store_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.token_header_name()?;

        match self.store.backend {
            StoreBackend::Redis if self.store.redis_addr.trim().is_empty() => Err(
                QuotaError::Config("redis_addr is required for the redis backend".to_string()),
            ),
            StoreBackend::Memory if self.store.sweep_interval_secs == 0 => Err(QuotaError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Parse the configured token header name.
    pub fn token_header_name(&self) -> Result<HeaderName> {
        HeaderName::from_bytes(self.server.token_header.as_bytes()).map_err(|e| {
            QuotaError::Config(format!(
                "invalid token_header '{}': {}",
                self.server.token_header, e
            ))
        })
    }
}
