//! Time-bounded cache of query results.
//!
//! Keys are 64-bit hashes of a canonical form of the query, so two queries
//! that differ only in JSON key order or in `0.0` vs `-0.0` share an entry.
//! Entries expire after the configured timeout; mutations do not invalidate
//! them.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

/// Canonical hash of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(pub u64);

/// Types that can be hashed into a [`CacheKey`] independently of field
/// ordering inside property maps.
pub trait CanonicalHash {
    fn canonical_hash<H: Hasher>(&self, state: &mut H);

    fn cache_key(&self) -> CacheKey {
        let mut hasher = DefaultHasher::new();
        self.canonical_hash(&mut hasher);
        CacheKey(hasher.finish())
    }
}

pub fn hash_f64<H: Hasher>(value: f64, state: &mut H) {
    let normalized = if value == 0.0 { 0.0 } else { value };
    normalized.to_bits().hash(state);
}

pub fn hash_f32_slice<H: Hasher>(values: &[f32], state: &mut H) {
    values.len().hash(state);
    for v in values {
        let normalized = if *v == 0.0 { 0.0f32 } else { *v };
        normalized.to_bits().hash(state);
    }
}

/// Hash a JSON value with object keys visited in sorted order.
pub fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Value::Number(n) => {
            2u8.hash(state);
            match n.as_f64() {
                Some(f) => hash_f64(f, state),
                None => n.to_string().hash(state),
            }
        }
        Value::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Value::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Object(map) => {
            5u8.hash(state);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            keys.len().hash(state);
            for key in keys {
                key.hash(state);
                hash_value(&map[key], state);
            }
        }
    }
}

struct CacheEntry<V> {
    inserted_at: Instant,
    value: V,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct QueryCache<V> {
    ttl: Duration,
    entries: HashMap<CacheKey, CacheEntry<V>>,
    hits: u64,
    misses: u64,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up `key`. Expired entries are dropped and count as a miss.
    pub fn get(&mut self, key: &CacheKey) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        self.misses += 1;
        None
    }

    pub fn insert(&mut self, key: CacheKey, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                value,
            },
        );
    }

    /// Drop every expired entry and return how many were removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        before - self.entries.len()
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

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}
