//! Core rate limiter implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::identity::{Identity, LimitClass};
use crate::error::{QuotaError, Result};
use crate::store::CountingStore;

/// Default maximum requests per window for token callers.
const DEFAULT_TOKEN_LIMIT: u64 = 10;
/// Default maximum requests per window for IP callers.
const DEFAULT_IP_LIMIT: u64 = 5;
/// Default window and block duration.
const DEFAULT_BLOCK_DURATION: Duration = Duration::from_secs(60);
/// Default deadline for a single store call.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// Immutable limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Maximum requests per window for the token class
    pub token_limit: u64,
    /// Maximum requests per window for the IP class
    pub ip_limit: u64,
    /// TTL of both window counters and block flags
    pub block_duration: Duration,
    /// Deadline for each individual store call
    pub store_timeout: Duration,
}

impl LimiterConfig {
    /// Create a configuration with the default store timeout.
    pub fn new(token_limit: u64, ip_limit: u64, block_duration: Duration) -> Self {
        Self {
            token_limit,
            ip_limit,
            block_duration,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Replace the store call deadline.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Get the limit configured for a class.
    pub fn limit_for(&self, class: LimitClass) -> u64 {
        match class {
            LimitClass::Token => self.token_limit,
            LimitClass::Ip => self.ip_limit,
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_LIMIT, DEFAULT_IP_LIMIT, DEFAULT_BLOCK_DURATION)
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Within the limit; `count` is the post-increment window count
    Allowed { count: u64 },
    /// A block flag is present; the counter was not touched
    Blocked,
    /// This request crossed the limit and a block was requested
    OverLimit { count: u64 },
    /// The store could not be consulted in time
    Unavailable,
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Fixed-window rate limiter with blocking.
///
/// Holds no mutable state of its own; every decision is made against the shared
/// store, so one instance can serve any number of concurrent tasks.
pub struct RateLimiter<S> {
    config: LimiterConfig,
    store: Arc<S>,
}

impl<S: CountingStore> RateLimiter<S> {
    /// Create a new rate limiter over a shared store.
    pub fn new(config: LimiterConfig, store: Arc<S>) -> Self {
        Self { config, store }
    }

    /// Get the limiter configuration.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Get the backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Decide whether a request may proceed.
    ///
    /// The token is used when present, otherwise the IP. With neither, the request
    /// is denied without touching the store.
    pub async fn allow(&self, token: Option<&str>, ip: Option<&str>) -> bool {
        match Identity::select(token, ip) {
            Some(identity) => self.check(identity).await.is_allowed(),
            None => {
                debug!("Denying request without token or ip");
                false
            }
        }
    }

    /// Check the rate limit for an identity under its class's limit.
    pub async fn check(&self, identity: Identity<'_>) -> Decision {
        let limit = self.config.limit_for(identity.class());
        self.check_rate_limit(identity, limit).await
    }

    async fn check_rate_limit(&self, identity: Identity<'_>, limit: u64) -> Decision {
        let key = identity.key();
        let ttl = self.config.block_duration;

        trace!(identity = %identity, limit = limit, "Checking rate limit");

        match self.bounded(self.store.is_blocked(key)).await {
            Ok(true) => {
                trace!(identity = %identity, "Identity is blocked");
                return Decision::Blocked;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(identity = %identity, error = %e, "Failed to read block status, denying");
                return Decision::Unavailable;
            }
        }

        let count = match self.bounded(self.store.increment(key, ttl)).await {
            Ok(count) => count,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Failed to increment window counter, denying");
                return Decision::Unavailable;
            }
        };

        if count > limit {
            if let Err(e) = self.bounded(self.store.block(key, ttl)).await {
                warn!(identity = %identity, error = %e, "Failed to install block");
            }
            debug!(
                identity = %identity,
                count = count,
                limit = limit,
                block_secs = ttl.as_secs(),
                "Rate limit exceeded, identity blocked"
            );
            return Decision::OverLimit { count };
        }

        Decision::Allowed { count }
    }

    /// Run a store call under the configured deadline.
    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.store_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| QuotaError::StoreTimeout(timeout))?
    }
}
