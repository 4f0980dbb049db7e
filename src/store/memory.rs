//! In-process counting store.
//!
//! Backs single-node deployments and tests. Expiry is tracked with
//! `tokio::time::Instant`, so a paused tokio clock controls it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::CountingStore;
use crate::error::Result;

/// A window counter and the instant its window closes.
#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    expires_at: Instant,
}

impl WindowCounter {
    fn fresh(now: Instant, ttl: Duration) -> Self {
        Self {
            count: 0,
            expires_at: now + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// A counting store held in process memory.
///
/// Per-key atomicity comes from the map's entry lock: concurrent increments of one
/// key observe distinct, consecutive counts.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    /// Window counters indexed by identity
    counters: DashMap<String, WindowCounter>,
    /// Block flag expiry instants indexed by identity
    blocks: DashMap<String, Instant>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the count of the live window for `key`.
    ///
    /// Returns `None` if no window exists or it has expired.
    pub fn current_count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|counter| counter.is_live(now))
            .map(|counter| counter.count)
    }

    /// Drop counters and block flags whose expiry has passed.
    ///
    /// Returns the number of entries removed. Expired entries are already ignored by
    /// every store operation, so this only reclaims memory.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.counters.retain(|_, counter| {
            let live = counter.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        self.blocks.retain(|_, expires_at| {
            let live = now < *expires_at;
            if !live {
                removed += 1;
            }
            live
        });

        removed
    }

    /// Spawn a task that purges expired entries every `period`.
    ///
    /// The task exits once the store has been dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(removed = removed, "Purged expired rate limit entries");
                }
            }
        })
    }
}

#[async_trait]
impl CountingStore for InMemoryStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = Instant::now();

        let count = {
            let mut counter = self
                .counters
                .entry(key.to_owned())
                .or_insert_with(|| WindowCounter::fresh(now, ttl));

            if !counter.is_live(now) {
                *counter = WindowCounter::fresh(now, ttl);
            }

            counter.count += 1;
            counter.count
        };

        trace!(key = %key, count = count, "Incremented window counter");
        Ok(count)
    }

    async fn block(&self, key: &str, ttl: Duration) -> Result<()> {
        self.blocks.insert(key.to_owned(), Instant::now() + ttl);
        Ok(())
    }

    async fn is_blocked(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .blocks
            .get(key)
            .is_some_and(|expires_at| now < *expires_at))
    }
}
