use std::{
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

/// An explicit cache with per-entry time-to-live.
///
/// Owned by whichever component needs memoization and passed by reference,
/// rather than hidden behind the functions whose results it stores. Expired
/// entries are dropped lazily on access.
#[derive(Debug)]
pub struct Cache<K, V> {
    entries: HashMap<K, Entry<V>>,
    ttl: Duration,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires: Instant,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash,
{
    /// Create a cache whose entries live for `ttl` by default.
    pub fn new(ttl: Duration) -> Cache<K, V> {
        Cache {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        match self.entries.get(key) {
            Some(entry) if entry.expires > Instant::now() => (),
            Some(_) => {
                self.entries.remove(key);
                return None;
            }
            None => return None,
        }

        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Store a value under the cache's default time-to-live.
    pub fn put(&mut self, key: K, value: V) {
        self.put_for(key, value, self.ttl);
    }

    pub fn put_for(&mut self, key: K, value: V, ttl: Duration) {
        self.entries.insert(key, Entry {
            value,
            expires: Instant::now() + ttl,
        });
    }

    pub fn invalidate(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Look up a key, filling the entry from `load` on a miss.
    pub fn get_or_try_fill<E, F>(&mut self, key: K, load: F) -> Result<&V, E>
    where
        F: FnOnce() -> Result<V, E>,
        K: Clone,
    {
        if self.get(&key).is_none() {
            let value = load()?;
            self.put(key.clone(), value);
        }

        Ok(&self.entries[&key].value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_returns() {
        let mut cache = Cache::new(Duration::from_secs(60));
        cache.put("a", 1);
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.get(&"b"), None);
    }

    #[test]
    fn expired_entries_are_misses() {
        let mut cache = Cache::new(Duration::from_secs(60));
        cache.put_for("a", 1, Duration::from_secs(0));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn invalidate_removes() {
        let mut cache = Cache::new(Duration::from_secs(60));
        cache.put("a", 1);
        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn fills_on_miss_only() {
        let mut cache = Cache::new(Duration::from_secs(60));

        let value = cache.get_or_try_fill::<(), _>("a", || Ok(1)).unwrap();
        assert_eq!(*value, 1);

        // A hit must not invoke the loader again.
        let value = cache
            .get_or_try_fill::<(), _>("a", || panic!("loaded twice"))
            .unwrap();
        assert_eq!(*value, 1);
    }
}
