//! The key/value cache facade (spec §4.B): canonical key schema, the
//! `BlobCache` storage boundary, a default in-memory implementation, and
//! the typed repositories built on top of it.

pub mod blob_cache;
pub mod facade;
pub mod keys;
pub mod memory;

pub use blob_cache::{BlobCache, CacheEntry};
pub use facade::{
    ApiCacheRepository, CacheFacade, DataCacheRepository, LayerVersion, LayerVersionsCacheRepository,
    PartitionCacheRepository, QuadTreeCacheRepository, DEFAULT_LOOKUP_TTL_S,
};
pub use memory::InMemoryBlobCache;
