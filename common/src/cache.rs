use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub stored_at_ms: u64,
}

// Expired entries are removed on read and never served.
#[derive(Debug, Clone)]
pub struct TtlCache<T> {
    ttl_ms: u64,
    entries: HashMap<String, CacheEntry<T>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            entries: HashMap::new(),
        }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    pub fn get(&mut self, key: &str, now_ms: u64) -> Option<T> {
        let expired = match self.entries.get(key) {
            Some(entry) => now_ms.saturating_sub(entry.stored_at_ms) > self.ttl_ms,
            None => return None,
        };

        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn peek(&self, key: &str, now_ms: u64) -> Option<&T> {
        self.entries
            .get(key)
            .filter(|entry| now_ms.saturating_sub(entry.stored_at_ms) <= self.ttl_ms)
            .map(|entry| &entry.value)
    }

    pub fn set(&mut self, key: impl Into<String>, value: T, now_ms: u64) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at_ms: now_ms,
            },
        );
    }

    pub fn remove(&mut self, key: &str) -> Option<T> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
