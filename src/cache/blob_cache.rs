//! The byte-blob cache storage boundary (spec §1 Non-goals: "the key/value
//! cache storage engine itself" is an external collaborator). [`super`]'s
//! typed repositories are built entirely against this trait; swapping the
//! storage engine (disk-backed, distributed, …) never touches them.

use bytes::Bytes;

use crate::error::OlpError;

/// A single cached value: raw bytes plus an absolute expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Bytes,
    /// Absolute expiry, Unix epoch seconds. `None` means "does not expire".
    pub expires_at_epoch_s: Option<i64>,
}

impl CacheEntry {
    pub fn new(value: Bytes, expires_at_epoch_s: Option<i64>) -> Self {
        Self {
            value,
            expires_at_epoch_s,
        }
    }

    pub fn permanent(value: Bytes) -> Self {
        Self {
            value,
            expires_at_epoch_s: None,
        }
    }
}

/// The byte-blob cache contract every typed repository in [`super`] is
/// built on: put/get/contains/remove-by-prefix, plus protect/release for
/// the prefetch dependency resolvers (spec §4.I).
pub trait BlobCache: Send + Sync {
    fn put(&self, key: &str, entry: CacheEntry) -> Result<(), OlpError>;
    fn get(&self, key: &str) -> Result<Option<Bytes>, OlpError>;
    fn contains(&self, key: &str) -> Result<bool, OlpError>;
    fn remove(&self, key: &str) -> Result<(), OlpError>;
    /// Remove every entry whose key starts with `prefix`.
    fn remove_by_prefix(&self, prefix: &str) -> Result<(), OlpError>;

    /// Pin `key` against eviction/expiry until a matching `release`.
    /// Idempotent: protecting an already-protected key is a no-op.
    fn protect(&self, key: &str) -> Result<(), OlpError>;
    /// Undo one `protect` of `key`. A key remains protected as long as any
    /// `protect` call on it is outstanding.
    fn release(&self, key: &str) -> Result<(), OlpError>;
    fn is_protected(&self, key: &str) -> Result<bool, OlpError>;
}
