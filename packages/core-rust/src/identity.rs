//! Bounded client-key to identity cache.
//!
//! Each client key gets a random identity the first time it is seen. The
//! identity stays stable while the key is resident; once the key is evicted
//! and seen again it receives a fresh one. Eviction is least-recently-used.
//!
//! Promotion and eviction are constant-time in `LruCache`, and the whole
//! promote-or-insert-and-evict step runs under one mutex so the size bound
//! and the recency order can never be observed half-updated.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;
use uuid::Uuid;

/// Capacity used when none is configured.
pub const DEFAULT_IDENTITY_CAPACITY: NonZeroUsize = match NonZeroUsize::new(100) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// LRU cache mapping client keys to per-process identities.
pub struct IdentityResolver {
    entries: Mutex<LruCache<String, String>>,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("IdentityResolver")
            .field("capacity", &entries.cap())
            .field("len", &entries.len())
            .finish()
    }
}

impl IdentityResolver {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the identity for `key`, creating one on first sighting.
    ///
    /// A hit promotes the key to most-recently-used. A miss inserts a new
    /// random identity and evicts the least-recently-used key when the cache
    /// is full.
    pub fn resolve(&self, key: &str) -> String {
        let mut entries = self.entries.lock();

        if let Some(identity) = entries.get(key) {
            trace!(key, "identity cache hit");
            return identity.clone();
        }

        let identity = Uuid::new_v4().to_string();
        if let Some((evicted, _)) = entries.push(key.to_owned(), identity.clone()) {
            trace!(key, evicted = %evicted, "identity cache eviction");
        }
        trace!(key, "identity cache miss");
        identity
    }

    /// Looks up `key` without touching its recency.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.lock().peek(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> NonZeroUsize {
        self.entries.lock().cap()
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_CAPACITY)
    }
}
