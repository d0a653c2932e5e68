//! TTL page cache. Committed page images are kept in memory with a
//! time-to-live counter that every access resets. The container's sweeper
//! thread calls [`PageCache::tick`] on an interval; entries whose counter
//! reaches zero are evicted, so pages idle for roughly
//! `CACHE_TTL * CACHE_SWEEP_INTERVAL_MS` milliseconds fall out.

use std::collections::HashMap;

use crate::config::CACHE_TTL;

struct CacheEntry {
    data: Box<[u8]>,
    ttl: u8,
}

#[derive(Default)]
pub struct PageCache {
    entries: HashMap<u32, CacheEntry>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hit refreshes the entry's TTL.
    pub fn get(&mut self, page_no: u32) -> Option<&[u8]> {
        let entry = self.entries.get_mut(&page_no)?;
        entry.ttl = CACHE_TTL;
        Some(&entry.data)
    }

    pub fn insert(&mut self, page_no: u32, data: Box<[u8]>) {
        self.entries.insert(
            page_no,
            CacheEntry {
                data,
                ttl: CACHE_TTL,
            },
        );
    }

    pub fn remove(&mut self, page_no: u32) {
        self.entries.remove(&page_no);
    }

    /// Ages every entry by one sweep, evicting those that expire.
    pub fn tick(&mut self) {
        self.entries.retain(|_, entry| {
            entry.ttl = entry.ttl.saturating_sub(1);
            entry.ttl > 0
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_ttl_sweeps() {
        let mut cache = PageCache::new();
        cache.insert(1, vec![1u8; 8].into_boxed_slice());

        for _ in 0..CACHE_TTL - 1 {
            cache.tick();
        }
        assert!(cache.get(1).is_some());

        // The access above refreshed the TTL.
        for _ in 0..CACHE_TTL - 1 {
            cache.tick();
        }
        assert_eq!(cache.len(), 1);
        cache.tick();
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_replaces_and_remove_evicts() {
        let mut cache = PageCache::new();
        cache.insert(7, vec![1u8; 4].into_boxed_slice());
        cache.insert(7, vec![2u8; 4].into_boxed_slice());

        assert_eq!(cache.get(7), Some(&[2u8; 4][..]));
        cache.remove(7);
        assert!(cache.get(7).is_none());
    }
}
