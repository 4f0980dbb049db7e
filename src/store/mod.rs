//! Counting store abstraction shared by every instance of the service.
//!
//! The rate limiter only talks to storage through [`CountingStore`]. Two layouts of
//! state live in a store: a window counter keyed by the raw identity, and a block flag
//! keyed by [`BLOCK_KEY_PREFIX`] followed by the identity. Both expire on their own; the
//! limiter never deletes them.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

mod memory;
mod redis_store;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;

/// Prefix prepended to an identity to form its block flag key.
pub const BLOCK_KEY_PREFIX: &str = "blocked:";

/// Build the block flag key for an identity.
pub fn block_key(key: &str) -> String {
    format!("{}{}", BLOCK_KEY_PREFIX, key)
}

/// Counter-with-expiry and flag-with-expiry primitives.
///
/// Each operation must be atomic on its own. The three operations are not atomic
/// as a group.
#[async_trait]
pub trait CountingStore: Send + Sync {
    /// Increment the window counter for `key` and return the post-increment value.
    ///
    /// The counter is created at zero with `ttl` if and only if it does not exist.
    /// Creation, expiry assignment and the increment happen as one atomic step, and
    /// later increments never refresh the expiry.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Install a block flag for `key`, replacing any existing flag and its expiry.
    async fn block(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Whether a live block flag exists for `key`.
    async fn is_blocked(&self, key: &str) -> Result<bool>;
}
