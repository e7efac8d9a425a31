//! Block cache (spec §3.3, §4.3): bounded by both entry count and total
//! byte size, evicting least-recently-used blocks first. Built on `lru`,
//! already used by the teacher for its attribute cache, plus a manually
//! tracked byte total since `LruCache` alone only bounds entry count.

use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;

const MAX_ENTRIES: usize = 1024;
const MAX_BYTES: usize = 250 * 1024 * 1024;

pub struct BlockCache {
    entries: LruCache<String, Bytes>,
    bytes_used: usize,
    max_bytes: usize,
}

impl BlockCache {
    pub fn new() -> Self {
        BlockCache::with_limits(MAX_ENTRIES, MAX_BYTES)
    }

    pub fn with_limits(max_entries: usize, max_bytes: usize) -> Self {
        BlockCache {
            entries: LruCache::new(NonZeroUsize::new(max_entries.max(1)).unwrap()),
            bytes_used: 0,
            max_bytes,
        }
    }

    pub fn get(&mut self, name: &str) -> Option<Bytes> {
        self.entries.get(name).cloned()
    }

    pub fn put(&mut self, name: String, block: Bytes) {
        if let Some(old) = self.entries.put(name.clone(), block.clone()) {
            self.bytes_used -= old.len();
        }
        self.bytes_used += block.len();
        self.evict_to_fit();
    }

    pub fn invalidate(&mut self, name: &str) {
        if let Some(old) = self.entries.pop(name) {
            self.bytes_used -= old.len();
        }
    }

    fn evict_to_fit(&mut self) {
        while self.bytes_used > self.max_bytes {
            match self.entries.pop_lru() {
                Some((_, bytes)) => self.bytes_used -= bytes.len(),
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        BlockCache::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let mut cache = BlockCache::new();
        cache.put("a".into(), Bytes::from_static(b"hello"));
        assert_eq!(cache.get("a").unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn entry_count_eviction() {
        let mut cache = BlockCache::with_limits(2, MAX_BYTES);
        cache.put("a".into(), Bytes::from_static(b"1"));
        cache.put("b".into(), Bytes::from_static(b"2"));
        cache.put("c".into(), Bytes::from_static(b"3"));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn byte_budget_eviction() {
        let mut cache = BlockCache::with_limits(100, 10);
        cache.put("a".into(), Bytes::from(vec![0u8; 6]));
        cache.put("b".into(), Bytes::from(vec![0u8; 6]));
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn invalidate_drops_entry_and_accounts_bytes() {
        let mut cache = BlockCache::new();
        cache.put("a".into(), Bytes::from_static(b"hello"));
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert_eq!(cache.bytes_used, 0);
    }
}
