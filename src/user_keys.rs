//! Remembers recently seen user keys, so that each user gets only one index event.
use moka::{policy::EvictionPolicy, sync::Cache};

use crate::Str;

/// Bounded set of recently seen user keys.
///
/// Least-recently-used keys are evicted once `capacity` is exceeded. The event processor also
/// clears the whole cache on a fixed interval, which bounds how stale the collector's view of a
/// user can get regardless of capacity.
pub struct UserKeyCache {
    // Value is the creation date of the event that last referenced the user.
    cache: Cache<Str, i64>,
}

impl UserKeyCache {
    pub fn new(capacity: u64) -> UserKeyCache {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .build();

        UserKeyCache { cache }
    }

    /// Record a sighting of `user_key`.
    ///
    /// Returns `true` if the key was already known (the user needs no index event) and `false` on
    /// the first sighting since the key was evicted or the cache was cleared.
    pub fn notice_user(&self, user_key: &Str, seen_at: i64) -> bool {
        // `get` also refreshes the key's position in the LRU order.
        let known = self.cache.get(user_key).is_some();
        self.cache.insert(user_key.clone(), seen_at);
        known
    }

    /// Forget all keys.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Apply pending evictions now. moka evicts lazily; tests use this to observe eviction
    /// deterministically.
    #[cfg(test)]
    pub(crate) fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}
