//! Selection result cache.
//!
//! Entries are keyed by `(user_id, area)` and hold the fully assembled
//! [`LayoutPayload`]. They are valid while younger than the TTL and are
//! dropped eagerly by the mutation hooks: a trait or feature change drops one
//! user's entries, a rule or layout change drops everything.
//!
//! The cache is never the source of truth; any entry can be recomputed.
//!
//! ## Stale writes
//!
//! A selection that read traits before an invalidation must not put its result
//! into the cache after it. Callers take a [`CacheTicket`] before reading their
//! inputs and write with [`LayoutCache::put_if_fresh`]; the write is rejected
//! when an invalidation for that user, or a global flush, happened in between.

pub mod layout_cache;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::CacheError;
use crate::layout::LayoutPayload;

pub use layout_cache::InMemoryLayoutCache;

/// Default time-to-live for cached selections.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A cache hit.
#[derive(Debug, Clone)]
pub struct CachedLayout {
    pub payload: Arc<LayoutPayload>,
    /// Time since the entry was written.
    pub age: Duration,
}

/// Taken before computing; a write with it is refused if the user was
/// invalidated after it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTicket {
    pub user_id: String,
    pub(crate) issued_at: u64,
}

/// Cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because they expired.
    pub evictions: u64,
    /// Entries dropped by invalidation.
    pub invalidations: u64,
    /// Writes refused because their ticket was stale.
    pub stale_writes: u64,
}

impl CacheStats {
    /// Hit rate in `[0, 1]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// The cache interface the selector depends on.
pub trait LayoutCache: Send + Sync {
    /// A live entry for `(user_id, area)`, or `None` if absent or expired.
    fn get(&self, user_id: &str, area: &str) -> Option<CachedLayout>;

    /// Unconditional write.
    fn put(&self, user_id: &str, area: &str, payload: Arc<LayoutPayload>) -> Result<(), CacheError>;

    /// Freshness marker for a computation about to start for `user_id`.
    fn ticket(&self, user_id: &str) -> CacheTicket;

    /// Write unless `user_id` was invalidated since `ticket` was taken.
    ///
    /// Returns `Ok(false)` when the write was refused as stale.
    fn put_if_fresh(
        &self,
        ticket: &CacheTicket,
        area: &str,
        payload: Arc<LayoutPayload>,
    ) -> Result<bool, CacheError>;

    /// Drop every entry for one user. Returns the number removed.
    fn invalidate_user(&self, user_id: &str) -> usize;

    /// Drop every entry. Returns the number removed.
    fn invalidate_global(&self) -> usize;

    /// Reclaim expired entries. Returns the number removed.
    fn purge_expired(&self) -> usize;

    fn stats(&self) -> CacheStats;

    fn ttl(&self) -> Duration;
}
