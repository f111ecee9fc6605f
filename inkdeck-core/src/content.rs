//! Content-addressed asset storage
//!
//! Two tiers keep visually identical slide content shared without leaking it:
//! - [`ContentPool`]: one per process (constructed once and passed down),
//!   holding only weak handles keyed by [`ContentHash`]
//! - [`ContentStore`]: one per deck, holding strong handles to the pooled
//!   instances that deck's slides cite
//!
//! A blob lives for as long as at least one overlay owns it. When the last
//! overlay lets go, the pool entry is forgotten.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::ids::ContentHash;
use crate::publisher::{Guarded, LockLevel};

/// Immutable shared asset (image bytes and the like)
#[derive(Debug)]
pub struct ContentBlob {
    hash: ContentHash,
    data: Bytes,
}

impl ContentBlob {
    /// Digest of the bytes
    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    /// Raw content
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Content length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Process-wide pool of weak content handles
pub struct ContentPool {
    entries: Guarded<HashMap<ContentHash, Weak<ContentBlob>>>,
}

impl ContentPool {
    pub fn new() -> Self {
        Self {
            entries: Guarded::new(LockLevel::Pool, HashMap::new()),
        }
    }

    /// Return the live instance for `hash`, creating it from `data` when the
    /// pool has none (never inserted, or already reclaimed).
    pub fn intern(&self, hash: ContentHash, data: Bytes) -> Arc<ContentBlob> {
        let mut entries = self.entries.acquire();
        if let Some(live) = entries.get(&hash).and_then(Weak::upgrade) {
            return live;
        }
        let blob = Arc::new(ContentBlob { hash, data });
        entries.insert(hash, Arc::downgrade(&blob));
        debug!("Pooled content {} ({} bytes)", hash, blob.len());
        blob
    }

    /// Live instance for `hash`, if any overlay still owns it
    pub fn lookup(&self, hash: &ContentHash) -> Option<Arc<ContentBlob>> {
        self.entries.acquire().get(hash).and_then(Weak::upgrade)
    }

    /// Drop the entry for `hash` if no strong holder remains
    fn forget_if_dead(&self, hash: &ContentHash) -> bool {
        let mut entries = self.entries.acquire();
        let dead = entries
            .get(hash)
            .is_some_and(|weak| weak.strong_count() == 0);
        if dead {
            entries.remove(hash);
            debug!("Reclaimed content {}", hash);
        }
        dead
    }

    /// Remove every dead entry, returning how many were reclaimed
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.acquire();
        let before = entries.len();
        entries.retain(|_, weak| weak.strong_count() > 0);
        before - entries.len()
    }

    /// Number of entries with at least one strong holder
    pub fn live_count(&self) -> usize {
        self.entries
            .acquire()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Number of entries, live or not yet swept
    pub fn len(&self) -> usize {
        self.entries.acquire().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContentPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-deck overlay of strong content handles
#[derive(Clone)]
pub struct ContentStore {
    pool: Arc<ContentPool>,
    blobs: HashMap<ContentHash, Arc<ContentBlob>>,
}

impl ContentStore {
    /// Create an empty overlay backed by `pool`
    pub fn new(pool: Arc<ContentPool>) -> Self {
        Self {
            pool,
            blobs: HashMap::new(),
        }
    }

    /// The pool this overlay shares instances through
    pub fn pool(&self) -> &Arc<ContentPool> {
        &self.pool
    }

    /// Store content under `hash`, sharing any live pooled instance
    pub fn put(&mut self, hash: ContentHash, data: Bytes) -> Arc<ContentBlob> {
        let shared = self.pool.intern(hash, data);
        self.blobs.insert(hash, Arc::clone(&shared));
        shared
    }

    /// Take a strong reference to the pooled instance for `hash`, if it is
    /// still alive somewhere. Returns the overlay's instance when present.
    pub fn adopt(&mut self, hash: ContentHash) -> Option<Arc<ContentBlob>> {
        if let Some(blob) = self.blobs.get(&hash) {
            return Some(Arc::clone(blob));
        }
        let shared = self.pool.lookup(&hash)?;
        self.blobs.insert(hash, Arc::clone(&shared));
        Some(shared)
    }

    /// Deck-local strong reference
    pub fn get(&self, hash: &ContentHash) -> Option<Arc<ContentBlob>> {
        self.blobs.get(hash).cloned()
    }

    /// Drop this overlay's reference. Other overlays are unaffected.
    pub fn remove(&mut self, hash: &ContentHash) -> bool {
        match self.blobs.remove(hash) {
            Some(blob) => {
                self.release(blob);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.blobs.contains_key(hash)
    }

    /// Identity check: true only for the exact instance this overlay holds
    pub fn contains_blob(&self, blob: &Arc<ContentBlob>) -> bool {
        self.blobs
            .get(&blob.hash())
            .is_some_and(|held| Arc::ptr_eq(held, blob))
    }

    /// Hashes held by this overlay
    pub fn hashes(&self) -> impl Iterator<Item = &ContentHash> {
        self.blobs.keys()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    fn release(&self, blob: Arc<ContentBlob>) {
        let hash = blob.hash();
        let last = Arc::strong_count(&blob) == 1;
        drop(blob);
        if last {
            self.pool.forget_if_dead(&hash);
        }
    }
}

impl Drop for ContentStore {
    fn drop(&mut self) {
        let blobs: Vec<Arc<ContentBlob>> = self.blobs.drain().map(|(_, b)| b).collect();
        for blob in blobs {
            self.release(blob);
        }
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("blobs", &self.blobs.len())
            .finish()
    }
}
