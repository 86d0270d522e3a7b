//! State cache (spec.md §3): last decoded value and timestamp per
//! manifest name. Updated on every successful decode, never evicted
//! during a connection, cleared wholesale on `close`.

use std::collections::HashMap;
use std::time::Instant;

use crate::wire::Value;

/// A cached value and the monotonic instant it was decoded at.
#[derive(Debug, Clone)]
pub struct Cached {
    pub value: Value,
    pub at: Instant,
}

/// Mapping from manifest name to its most recently decoded value.
#[derive(Default)]
pub struct StateCache {
    entries: HashMap<String, Cached>,
}

impl StateCache {
    pub fn new() -> Self {
        StateCache::default()
    }

    pub fn update(&mut self, name: &str, value: Value) {
        self.entries.insert(
            name.to_string(),
            Cached {
                value,
                at: Instant::now(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Cached> {
        self.entries.get(name)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_non_decreasing_across_updates() {
        let mut cache = StateCache::new();
        cache.update("aircraft/0/alt", Value::Float(1.0));
        let first = cache.get("aircraft/0/alt").unwrap().at;
        cache.update("aircraft/0/alt", Value::Float(2.0));
        let second = cache.get("aircraft/0/alt").unwrap().at;
        assert!(second >= first);
    }

    #[test]
    fn clear_empties_the_cache() {
        let mut cache = StateCache::new();
        cache.update("a", Value::Boolean(true));
        cache.clear();
        assert!(cache.is_empty());
    }
}
