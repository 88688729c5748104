//! Wire-adjacent data types shared across the SDK: catalog identifiers,
//! tile keys, quad-tree indices, and partitions (spec §3).

pub mod hrn;
pub mod partition;
pub mod quadtree;
pub mod tile_key;

pub use hrn::{Hrn, HrnPartition};
pub use partition::{AdditionalField, Partition};
pub use quadtree::{QuadTreeEntry, QuadTreeIndex};
pub use tile_key::TileKey;

use crate::error::OlpError;

/// A (service name, version) pair identifying an upstream API, e.g.
/// `("blob", "v1")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceReference {
    pub service: String,
    pub version: String,
}

impl ServiceReference {
    pub fn new(service: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            version: version.into(),
        }
    }
}

/// Governs cache/network interplay for every read operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOption {
    /// Only consult the cache; never attempt network access.
    CacheOnly,
    /// Go straight to the network, but still hold any relevant named
    /// mutex and still write the result back into the cache.
    CacheWithUpdate,
    /// Consult the cache first, fall back to the network on a miss.
    OnlineIfNotFound,
    /// Always go to the network; do not consult the cache (results are
    /// still written back unless stated otherwise by the call site).
    OnlineOnly,
}

impl FetchOption {
    /// `true` for the two options that skip the cache *read* step.
    pub fn skips_cache_read(&self) -> bool {
        matches!(self, FetchOption::OnlineOnly | FetchOption::CacheWithUpdate)
    }

    /// `true` for the two options under which duplicate in-flight work is
    /// not worth coalescing via a named mutex (§4.H step 2).
    pub fn skips_named_mutex(&self) -> bool {
        matches!(self, FetchOption::CacheOnly | FetchOption::OnlineOnly)
    }

    /// `true` for the option that must not touch the network at all.
    pub fn is_cache_only(&self) -> bool {
        matches!(self, FetchOption::CacheOnly)
    }

    /// `true` for the two options that never write a fresh cache entry.
    pub fn skips_cache_write(&self) -> bool {
        matches!(self, FetchOption::OnlineOnly)
    }
}

/// A billing/accounting tag: 4-16 alphanumeric ASCII characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingTag(String);

impl BillingTag {
    pub fn new(tag: impl Into<String>) -> Result<Self, OlpError> {
        let tag = tag.into();
        let len_ok = (4..=16).contains(&tag.len());
        let charset_ok = tag.chars().all(|c| c.is_ascii_alphanumeric());
        if !len_ok || !charset_ok {
            return Err(OlpError::InvalidArgument(format!(
                "billing tag '{tag}' must be 4-16 alphanumeric ASCII characters"
            )));
        }
        Ok(Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
