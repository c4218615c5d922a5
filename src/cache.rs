//! Response cache keyed by resource kind and id.
//!
//! Handlers read through this cache; the stores invalidate an entry on every
//! state transition of the record behind it, so a terminal status is never
//! hidden behind a stale entry. TTL only bounds how long an entry lives;
//! the retention sweep purges what has expired.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::observability::metrics;

/// Kind of resource an entry caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Invoice,
    Progress,
    Report,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Invoice => "invoice",
            ResourceKind::Progress => "progress",
            ResourceKind::Report => "report",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

/// One key's entry plus the stamp of its last invalidation.
#[derive(Debug, Default)]
struct Slot {
    stamp: u64,
    entry: Option<CacheEntry>,
}

/// A thread-safe TTL cache of rendered responses.
///
/// Fills are generation-checked: a reader takes [`ResponseCache::generation`]
/// before loading and stores with [`ResponseCache::put_if_current`], which
/// refuses the value if the key was invalidated in between.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<DashMap<(ResourceKind, Uuid), Slot>>,
    /// Source of invalidation stamps.
    stamps: Arc<AtomicU64>,
    /// Highest stamp of any purged slot; the generation of keys with no slot.
    floor: Arc<AtomicU64>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            stamps: Arc::new(AtomicU64::new(0)),
            floor: Arc::new(AtomicU64::new(0)),
            ttl,
        }
    }

    /// Get a live entry.
    pub fn get(&self, kind: ResourceKind, id: Uuid) -> Option<Value> {
        let hit = self.inner.get(&(kind, id)).and_then(|slot| {
            slot.entry
                .as_ref()
                .filter(|e| e.stored_at.elapsed() < self.ttl)
                .map(|e| e.value.clone())
        });
        metrics::record_cache_lookup(kind, hit.is_some());
        hit
    }

    /// Current generation of `kind/id`. Take it before loading the value.
    pub fn generation(&self, kind: ResourceKind, id: Uuid) -> u64 {
        match self.inner.get(&(kind, id)) {
            Some(slot) => slot.stamp,
            None => self.floor.load(Ordering::SeqCst),
        }
    }

    /// Store `value` unless `kind/id` was invalidated since `generation`.
    /// Returns whether the value was stored.
    pub fn put_if_current(&self, kind: ResourceKind, id: Uuid, generation: u64, value: Value) -> bool {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
        };
        match self.inner.entry((kind, id)) {
            MapEntry::Occupied(mut slot) => {
                if slot.get().stamp != generation {
                    return false;
                }
                slot.get_mut().entry = Some(entry);
            }
            MapEntry::Vacant(vacant) => {
                if self.floor.load(Ordering::SeqCst) != generation {
                    return false;
                }
                vacant.insert(Slot {
                    stamp: generation,
                    entry: Some(entry),
                });
            }
        }
        true
    }

    /// Drop the entry for one resource and fence off fills that started before.
    pub fn invalidate(&self, kind: ResourceKind, id: Uuid) {
        let mut slot = self.inner.entry((kind, id)).or_default();
        slot.stamp = self.stamps.fetch_add(1, Ordering::SeqCst) + 1;
        slot.entry = None;
    }

    /// Remove empty and expired slots. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, slot| {
            let live = slot.entry.as_ref().is_some_and(|e| e.stored_at.elapsed() < self.ttl);
            if !live {
                // Raised before the slot disappears, so no stale generation matches.
                self.floor.fetch_max(slot.stamp, Ordering::SeqCst);
            }
            live
        });
        before.saturating_sub(self.inner.len())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner
            .iter()
            .filter(|slot| slot.entry.as_ref().is_some_and(|e| e.stored_at.elapsed() < self.ttl))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fill(cache: &ResponseCache, kind: ResourceKind, id: Uuid, value: Value) -> bool {
        let generation = cache.generation(kind, id);
        cache.put_if_current(kind, id, generation, value)
    }

    #[test]
    fn test_put_get_invalidate() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();

        assert!(cache.get(ResourceKind::Progress, id).is_none());
        assert!(fill(&cache, ResourceKind::Progress, id, json!({"completion_percentage": 50})));
        assert_eq!(
            cache.get(ResourceKind::Progress, id),
            Some(json!({"completion_percentage": 50}))
        );

        // Different kind, same id: separate entry.
        assert!(cache.get(ResourceKind::Invoice, id).is_none());

        cache.invalidate(ResourceKind::Progress, id);
        assert!(cache.get(ResourceKind::Progress, id).is_none());
    }

    #[test]
    fn test_entries_expire() {
        let cache = ResponseCache::new(Duration::from_millis(0));
        let id = Uuid::new_v4();
        fill(&cache, ResourceKind::Invoice, id, json!({"status": "pending"}));
        assert!(cache.get(ResourceKind::Invoice, id).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.purge_expired(), 1);
    }

    #[test]
    fn test_fill_started_before_invalidation_is_refused() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();

        // First reader loads "processing" but is slow to store it.
        let slow = cache.generation(ResourceKind::Progress, id);
        let stale = json!({"status": "processing"});

        // The job completes; a second reader loads and stores the new state.
        cache.invalidate(ResourceKind::Progress, id);
        assert!(fill(&cache, ResourceKind::Progress, id, json!({"status": "completed"})));

        assert!(!cache.put_if_current(ResourceKind::Progress, id, slow, stale));
        assert_eq!(
            cache.get(ResourceKind::Progress, id),
            Some(json!({"status": "completed"}))
        );
    }

    #[test]
    fn test_purge_keeps_fence_for_inflight_fills() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let id = Uuid::new_v4();

        let slow = cache.generation(ResourceKind::Report, id);
        cache.invalidate(ResourceKind::Report, id);
        assert_eq!(cache.purge_expired(), 1);

        assert!(!cache.put_if_current(ResourceKind::Report, id, slow, json!("stale")));
        assert!(fill(&cache, ResourceKind::Report, id, json!("fresh")));
        assert_eq!(cache.get(ResourceKind::Report, id), Some(json!("fresh")));
    }
}
