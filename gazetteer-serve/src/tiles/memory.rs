use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use axum::body::Bytes;
use gazetteer_core::TileCoord;
use lru::LruCache;

/// Bounded in-process tile cache with per-entry expiry.
///
/// Capacity eviction is least-recently-used; expired entries are dropped when
/// they are next looked up. A zero capacity disables the tier.
#[derive(Debug)]
pub(crate) struct MemoryTileCache {
    entries: Option<Mutex<LruCache<TileCoord, (Bytes, i64)>>>,
}

impl MemoryTileCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub(crate) fn get(&self, coord: TileCoord, now: i64) -> Option<Bytes> {
        let mut entries = self.entries.as_ref()?.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&coord) {
            Some((payload, expires_at)) if *expires_at > now => Some(payload.clone()),
            Some(_) => {
                entries.pop(&coord);
                None
            }
            None => None,
        }
    }

    pub(crate) fn insert(&self, coord: TileCoord, payload: Bytes, expires_at: i64) {
        if let Some(entries) = &self.entries {
            entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .put(coord, (payload, expires_at));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| {
            entries.lock().unwrap_or_else(PoisonError::into_inner).len()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tile(x: u32) -> TileCoord {
        TileCoord::new(4, x, 0).expect("tile")
    }

    #[rstest]
    fn expired_entries_miss() {
        let cache = MemoryTileCache::new(4);
        cache.insert(tile(1), Bytes::from_static(b"a"), 100);
        assert_eq!(cache.get(tile(1), 99), Some(Bytes::from_static(b"a")));
        assert_eq!(cache.get(tile(1), 100), None);
        assert_eq!(cache.len(), 0);
    }

    #[rstest]
    fn full_caches_evict_the_least_recently_used() {
        let cache = MemoryTileCache::new(2);
        cache.insert(tile(1), Bytes::from_static(b"a"), 500);
        cache.insert(tile(2), Bytes::from_static(b"b"), 500);
        assert!(cache.get(tile(1), 0).is_some());
        cache.insert(tile(3), Bytes::from_static(b"c"), 500);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(tile(1), 0).is_some());
        assert_eq!(cache.get(tile(2), 0), None);
        assert!(cache.get(tile(3), 0).is_some());
    }

    #[rstest]
    fn reinserting_refreshes_the_entry() {
        let cache = MemoryTileCache::new(2);
        cache.insert(tile(1), Bytes::from_static(b"old"), 10);
        cache.insert(tile(1), Bytes::from_static(b"new"), 500);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(tile(1), 100), Some(Bytes::from_static(b"new")));
    }

    #[rstest]
    fn zero_capacity_disables_caching() {
        let cache = MemoryTileCache::new(0);
        cache.insert(tile(1), Bytes::from_static(b"a"), 50);
        assert_eq!(cache.get(tile(1), 0), None);
        assert_eq!(cache.len(), 0);
    }
}
