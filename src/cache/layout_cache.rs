//! In-memory TTL cache for layout selections.
//!
//! All entries and invalidation stamps live behind one lock, so a freshness
//! check and the write it guards cannot interleave with an invalidation. Reads
//! only take the shared side of the lock; expired entries are skipped on read
//! and reclaimed by later writes or [`LayoutCache::purge_expired`].
//!
//! Invalidations draw stamps from a single increasing sequence. A ticket
//! remembers the sequence value it was issued at and goes stale once its user
//! is stamped later, or once the floor passes it. Stamps of users with no
//! cached entries are dropped by raising the floor to cover them, which keeps
//! the stamp map bounded without letting an old ticket look fresh again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::{CacheStats, CacheTicket, CachedLayout, LayoutCache, DEFAULT_TTL};
use crate::error::CacheError;
use crate::layout::LayoutPayload;

/// Default entry limit.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Stamp count below which invalidations never prune.
const STAMP_PRUNE_THRESHOLD: usize = 1_024;

#[derive(Debug)]
struct CacheEntry {
    payload: Arc<LayoutPayload>,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() >= ttl
    }
}

#[derive(Debug, Default)]
struct CacheState {
    /// user_id -> area -> entry
    entries: HashMap<String, HashMap<String, CacheEntry>>,
    len: usize,
    /// Last value handed out to an invalidation.
    sequence: u64,
    /// Tickets issued below this value are stale.
    floor: u64,
    /// user_id -> sequence value of the user's latest invalidation
    user_stamps: HashMap<String, u64>,
}

impl CacheState {
    fn next_stamp(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn is_stale(&self, ticket: &CacheTicket) -> bool {
        ticket.issued_at < self.floor
            || self
                .user_stamps
                .get(&ticket.user_id)
                .is_some_and(|&stamp| stamp > ticket.issued_at)
    }

    /// Drops stamps of users with no cached entries, raising the floor past
    /// them. Returns the number of stamps dropped.
    fn prune_stamps(&mut self) -> usize {
        let before = self.user_stamps.len();
        let entries = &self.entries;
        let mut floor = self.floor;
        self.user_stamps.retain(|user_id, stamp| {
            let keep = entries.contains_key(user_id);
            if !keep {
                floor = floor.max(*stamp);
            }
            keep
        });
        self.floor = floor;
        before - self.user_stamps.len()
    }

    fn stamp_limit(&self) -> usize {
        STAMP_PRUNE_THRESHOLD.max(self.entries.len() * 2)
    }

    fn purge(&mut self, ttl: Duration) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, areas| {
            let before = areas.len();
            areas.retain(|_, entry| !entry.is_expired(ttl));
            removed += before - areas.len();
            !areas.is_empty()
        });
        self.len -= removed;
        removed
    }
}

/// Process-local [`LayoutCache`].
#[derive(Debug)]
pub struct InMemoryLayoutCache {
    state: RwLock<CacheState>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
    stale_writes: AtomicU64,
}

impl Default for InMemoryLayoutCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl InMemoryLayoutCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            ttl,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            stale_writes: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(
        &self,
        state: &mut CacheState,
        user_id: &str,
        area: &str,
        payload: Arc<LayoutPayload>,
    ) -> Result<(), CacheError> {
        if self.max_entries == 0 {
            return Err(CacheError::Disabled);
        }
        let exists = state
            .entries
            .get(user_id)
            .is_some_and(|areas| areas.contains_key(area));

        if !exists && state.len >= self.max_entries {
            let purged = state.purge(self.ttl);
            self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
            if state.len >= self.max_entries {
                return Err(CacheError::CapacityExceeded {
                    limit: self.max_entries,
                });
            }
        }

        let areas = state.entries.entry(user_id.to_string()).or_default();
        let previous = areas.insert(
            area.to_string(),
            CacheEntry {
                payload,
                stored_at: Instant::now(),
            },
        );
        if previous.is_none() {
            state.len += 1;
        }
        log::debug!("cache set user={} area={}", user_id, area);
        Ok(())
    }
}

impl LayoutCache for InMemoryLayoutCache {
    fn get(&self, user_id: &str, area: &str) -> Option<CachedLayout> {
        let state = self.state.read();
        match state.entries.get(user_id).and_then(|areas| areas.get(area)) {
            Some(entry) if !entry.is_expired(self.ttl) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("cache hit user={} area={}", user_id, area);
                Some(CachedLayout {
                    payload: Arc::clone(&entry.payload),
                    age: entry.stored_at.elapsed(),
                })
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                log::debug!("cache miss user={} area={}", user_id, area);
                None
            }
        }
    }

    fn put(&self, user_id: &str, area: &str, payload: Arc<LayoutPayload>) -> Result<(), CacheError> {
        let mut state = self.state.write();
        self.insert(&mut state, user_id, area, payload)
    }

    fn ticket(&self, user_id: &str) -> CacheTicket {
        let state = self.state.read();
        CacheTicket {
            user_id: user_id.to_string(),
            issued_at: state.sequence,
        }
    }

    fn put_if_fresh(
        &self,
        ticket: &CacheTicket,
        area: &str,
        payload: Arc<LayoutPayload>,
    ) -> Result<bool, CacheError> {
        let mut state = self.state.write();
        if state.is_stale(ticket) {
            self.stale_writes.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "rejected stale cache write user={} area={}",
                ticket.user_id,
                area
            );
            return Ok(false);
        }
        self.insert(&mut state, &ticket.user_id, area, payload)?;
        Ok(true)
    }

    fn invalidate_user(&self, user_id: &str) -> usize {
        let mut state = self.state.write();
        let stamp = state.next_stamp();
        state.user_stamps.insert(user_id.to_string(), stamp);
        let removed = state.entries.remove(user_id).map_or(0, |areas| areas.len());
        state.len -= removed;
        if state.user_stamps.len() > state.stamp_limit() {
            let pruned = state.prune_stamps();
            log::debug!("pruned {} invalidation stamps", pruned);
        }
        drop(state);

        self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
        log::debug!("invalidated user={} entries={}", user_id, removed);
        removed
    }

    fn invalidate_global(&self) -> usize {
        let mut state = self.state.write();
        // Every ticket issued so far is now below the floor.
        state.floor = state.next_stamp();
        state.user_stamps.clear();
        let removed = state.len;
        state.entries.clear();
        state.len = 0;
        drop(state);

        self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
        log::info!("layout cache flushed, {} entries removed", removed);
        removed
    }

    fn purge_expired(&self) -> usize {
        let removed = {
            let mut state = self.state.write();
            let removed = state.purge(self.ttl);
            state.prune_stamps();
            removed
        };
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            log::debug!("purged {} expired cache entries", removed);
        }
        removed
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
        }
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
