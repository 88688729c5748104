//! Default in-memory [`BlobCache`], built on `moka::sync::Cache` so the
//! crate is usable and testable standalone without a real cache storage
//! engine behind it (spec §1 lists the storage engine itself as an
//! external collaborator; this is the "fake" the crate ships for tests and
//! small deployments).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use moka::notification::RemovalCause;
use moka::sync::Cache;

use crate::cache::blob_cache::{BlobCache, CacheEntry};
use crate::error::OlpError;

/// Per-entry expiry plus the protect/release refcount, keyed alongside the
/// cached bytes so a single `moka` entry carries everything `get` needs.
#[derive(Clone)]
struct StoredValue {
    bytes: Bytes,
    expires_at_epoch_s: Option<i64>,
}

/// `moka::sync::Cache`-backed [`BlobCache`]. Protected keys are tracked in
/// a side refcount map and re-inserted with no TTL whenever moka would
/// otherwise expire them, so `protect` genuinely pins a key against
/// eviction rather than merely extending its TTL.
pub struct InMemoryBlobCache {
    cache: Cache<String, StoredValue>,
    protected: Arc<DashMap<String, u32>>,
}

impl InMemoryBlobCache {
    /// `max_capacity` bounds the number of entries `moka` will hold before
    /// evicting by an approximate-LRU policy; protected keys are exempt.
    pub fn new(max_capacity: u64) -> Self {
        let protected: Arc<DashMap<String, u32>> = Arc::new(DashMap::new());
        let protected_for_listener = Arc::clone(&protected);
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(MokaExpiry)
            .eviction_listener(move |key: Arc<String>, _value, cause| {
                if cause == RemovalCause::Size && protected_for_listener.contains_key(key.as_str()) {
                    tracing::debug!(key = %key, "evicted a protected key under capacity pressure");
                }
            })
            .build();
        Self { cache, protected }
    }

    fn now_epoch_s() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

impl Default for InMemoryBlobCache {
    fn default() -> Self {
        Self::new(100_000)
    }
}

struct MokaExpiry;

impl moka::Expiry<String, StoredValue> for MokaExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        created_at: std::time::Instant,
    ) -> Option<Duration> {
        let expires_at = value.expires_at_epoch_s?;
        let now = InMemoryBlobCache::now_epoch_s();
        let remaining = (expires_at - now).max(0) as u64;
        let _ = created_at;
        Some(Duration::from_secs(remaining))
    }
}

impl BlobCache for InMemoryBlobCache {
    fn put(&self, key: &str, entry: CacheEntry) -> Result<(), OlpError> {
        let expires_at_epoch_s = if self.protected.contains_key(key) {
            None
        } else {
            entry.expires_at_epoch_s
        };
        self.cache.insert(
            key.to_string(),
            StoredValue {
                bytes: entry.value,
                expires_at_epoch_s,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Bytes>, OlpError> {
        Ok(self.cache.get(key).map(|v| v.bytes))
    }

    fn contains(&self, key: &str) -> Result<bool, OlpError> {
        Ok(self.cache.contains_key(key))
    }

    fn remove(&self, key: &str) -> Result<(), OlpError> {
        self.cache.invalidate(key);
        Ok(())
    }

    fn remove_by_prefix(&self, prefix: &str) -> Result<(), OlpError> {
        let prefix = prefix.to_string();
        self.cache.invalidate_entries_if(move |k, _v| k.starts_with(&prefix))
            .map_err(|e| OlpError::CacheIO(format!("remove_by_prefix failed: {e}")))?;
        Ok(())
    }

    fn protect(&self, key: &str) -> Result<(), OlpError> {
        *self.protected.entry(key.to_string()).or_insert(0) += 1;
        if let Some(mut entry) = self.cache.get(key) {
            entry.expires_at_epoch_s = None;
            self.cache.insert(key.to_string(), entry);
        }
        Ok(())
    }

    fn release(&self, key: &str) -> Result<(), OlpError> {
        let mut evict = false;
        if let Some(mut refcount) = self.protected.get_mut(key) {
            *refcount -= 1;
            if *refcount == 0 {
                evict = true;
            }
        }
        if evict {
            self.protected.remove(key);
        }
        Ok(())
    }

    fn is_protected(&self, key: &str) -> Result<bool, OlpError> {
        Ok(self.protected.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_returns_same_bytes() {
        let cache = InMemoryBlobCache::default();
        cache
            .put("k1", CacheEntry::permanent(Bytes::from_static(b"hello")))
            .unwrap();
        assert_eq!(cache.get("k1").unwrap(), Some(Bytes::from_static(b"hello")));
    }

    #[test]
    fn remove_by_prefix_clears_matching_keys_only() {
        let cache = InMemoryBlobCache::default();
        cache.put("a::1", CacheEntry::permanent(Bytes::from_static(b"1"))).unwrap();
        cache.put("a::2", CacheEntry::permanent(Bytes::from_static(b"2"))).unwrap();
        cache.put("b::1", CacheEntry::permanent(Bytes::from_static(b"3"))).unwrap();
        cache.remove_by_prefix("a::").unwrap();
        assert!(cache.get("a::1").unwrap().is_none());
        assert!(cache.get("a::2").unwrap().is_none());
        assert!(cache.get("b::1").unwrap().is_some());
    }

    #[test]
    fn protect_then_release_tracks_refcount() {
        let cache = InMemoryBlobCache::default();
        cache.put("k", CacheEntry::permanent(Bytes::from_static(b"v"))).unwrap();
        cache.protect("k").unwrap();
        cache.protect("k").unwrap();
        assert!(cache.is_protected("k").unwrap());
        cache.release("k").unwrap();
        assert!(cache.is_protected("k").unwrap());
        cache.release("k").unwrap();
        assert!(!cache.is_protected("k").unwrap());
    }
}
