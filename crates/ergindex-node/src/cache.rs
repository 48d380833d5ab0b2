//! In-memory TTL cache for immutable node responses.
//!
//! Blocks and headers are keyed by their content-derived id, so a cached
//! entry can never go stale — only old. Eviction is lazy (on access) plus a
//! sweep when the map grows past its capacity. The cache is opportunistic:
//! it has no failure mode that callers need to handle.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A TTL'd map from id to value.
#[derive(Debug)]
pub struct TtlCache<T> {
    entries: Mutex<HashMap<String, (Instant, T)>>,
    ttl: Duration,
    max_entries: usize,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Returns the cached value for `id` if it hasn't expired.
    pub fn get(&self, id: &str) -> Option<T> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(id) {
            Some((inserted_at, value)) if inserted_at.elapsed() < self.ttl => {
                Some(value.clone())
            }
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    /// Insert a value, evicting expired entries when the map is full.
    pub fn put(&self, id: impl Into<String>, value: T) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, (inserted_at, _)| inserted_at.elapsed() < ttl);
            // Still full after the sweep — drop an arbitrary entry rather
            // than grow without bound.
            if entries.len() >= self.max_entries {
                if let Some(key) = entries.keys().next().cloned() {
                    entries.remove(&key);
                }
            }
        }
        entries.insert(id.into(), (Instant::now(), value));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
