//! Expiring state stores for detectors.
//!
//! [`ExpiringCache`] is a sharded concurrent map whose entries carry a time
//! stamp. Expiry is evaluated lazily on every lookup, so an entry past its TTL
//! is never returned even if it has not been reclaimed yet. Reclamation runs
//! opportunistically every `sweep_interval` operations and whenever an insert
//! hits the capacity bound.

use crate::clock::Clock;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Operations between two opportunistic sweeps.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 1024;

/// TTL policy of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Entry expires a fixed duration after it was written; reads do not
    /// extend it.
    AfterWrite(Duration),
    /// Entry expires a fixed duration after it was last read or written.
    AfterAccess(Duration),
}

impl Expiration {
    /// The time-to-live of this policy.
    pub fn ttl(&self) -> Duration {
        match self {
            Expiration::AfterWrite(ttl) | Expiration::AfterAccess(ttl) => *ttl,
        }
    }

    fn resets_on_read(&self) -> bool {
        matches!(self, Expiration::AfterAccess(_))
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    /// Last write, or last access for [`Expiration::AfterAccess`]
    stamp: Instant,
}

impl<V> Entry<V> {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.stamp) >= ttl
    }
}

/// Concurrent key/value store with per-entry expiry.
pub struct ExpiringCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    entries: DashMap<K, Entry<V>>,
    expiration: Expiration,
    max_capacity: usize,
    sweep_interval: u64,
    operations: AtomicU64,
    clock: Arc<dyn Clock>,
    name: String,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new cache with the given parameters.
    pub fn new(
        name: impl Into<String>,
        expiration: Expiration,
        max_capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            expiration,
            max_capacity: max_capacity.max(1),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            operations: AtomicU64::new(0),
            clock,
            name: name.into(),
        }
    }

    /// Override how many operations run between opportunistic sweeps.
    pub fn with_sweep_interval(mut self, interval: u64) -> Self {
        self.sweep_interval = interval.max(1);
        self
    }

    /// Get a live value. Resets the entry clock under
    /// [`Expiration::AfterAccess`].
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        self.maybe_sweep(now);

        let ttl = self.expiration.ttl();
        if self.expiration.resets_on_read() {
            let mut entry = self.entries.get_mut(key)?;
            if !entry.is_expired(ttl, now) {
                // A concurrent reader may already have stamped a later instant
                entry.stamp = entry.stamp.max(now);
                return Some(entry.value.clone());
            }
        } else {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(ttl, now) {
                return Some(entry.value.clone());
            }
        }

        // A writer may have replaced the entry since the lock was released.
        self.entries
            .remove_if(key, |_, entry| entry.is_expired(ttl, now));
        None
    }

    /// Insert or replace a value, restarting its TTL.
    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        self.maybe_sweep(now);

        if self.entries.len() >= self.max_capacity && !self.entries.contains_key(&key) {
            self.make_room(now);
        }

        match self.entries.entry(key) {
            MapEntry::Occupied(mut occupied) => {
                let stamp = occupied.get().stamp.max(now);
                occupied.insert(Entry { value, stamp });
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry { value, stamp: now });
            }
        }

        // Concurrent inserts can all pass the capacity check above
        while self.entries.len() > self.max_capacity {
            if !self.evict_one() {
                break;
            }
        }
    }

    /// Remove a key.
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Remove every entry.
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    /// Reclaim expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(self.clock.now())
    }

    /// Number of physically stored entries, expired ones included.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Get the cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn maybe_sweep(&self, now: Instant) {
        let count = self.operations.fetch_add(1, Ordering::Relaxed);
        if (count + 1) % self.sweep_interval == 0 {
            self.sweep_at(now);
        }
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let ttl = self.expiration.ttl();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(ttl, now);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            debug!(cache = %self.name, removed, "Swept expired entries");
        }
        removed
    }

    fn make_room(&self, now: Instant) {
        self.sweep_at(now);
        if self.entries.len() < self.max_capacity {
            return;
        }

        // Still full of live entries: drop an arbitrary one
        self.evict_one();
    }

    fn evict_one(&self) -> bool {
        let victim = self.entries.iter().next().map(|entry| entry.key().clone());
        match victim {
            Some(key) => {
                self.entries.remove(&key);
                debug!(cache = %self.name, capacity = self.max_capacity, "Evicted live entry at capacity");
                true
            }
            None => false,
        }
    }
}
