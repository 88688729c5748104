//! Typed repositories over a [`BlobCache`] (spec §4.B): API lookup results,
//! partition metadata, quad-tree indices, blob data, and (supplementing the
//! distilled spec from the original SDK) layer versions.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::cache::blob_cache::{BlobCache, CacheEntry};
use crate::cache::keys;
use crate::error::OlpError;
use crate::model::{AdditionalField, Partition, QuadTreeIndex, TileKey};

fn now_epoch_s() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// The lookup cache's default TTL (spec §3 invariants): 3600 s unless the
/// response carried a `Cache-Control: max-age=` overriding it.
pub const DEFAULT_LOOKUP_TTL_S: i64 = 3600;

/// Caches resolved API base URLs, keyed by (catalog, service, version).
pub struct ApiCacheRepository {
    cache: Arc<dyn BlobCache>,
}

impl ApiCacheRepository {
    pub fn new(cache: Arc<dyn BlobCache>) -> Self {
        Self { cache }
    }

    pub fn put(
        &self,
        catalog: &str,
        service: &str,
        version: &str,
        url: &str,
        ttl_s: i64,
    ) -> Result<(), OlpError> {
        let key = keys::api_key(catalog, service, version);
        let expires_at = now_epoch_s() + ttl_s.max(0);
        self.cache
            .put(&key, CacheEntry::new(Bytes::from(url.to_string()), Some(expires_at)))
    }

    pub fn get(&self, catalog: &str, service: &str, version: &str) -> Result<Option<String>, OlpError> {
        let key = keys::api_key(catalog, service, version);
        match self.cache.get(&key)? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| OlpError::CacheIO(format!("corrupt api cache entry: {e}")))?,
            )),
            None => Ok(None),
        }
    }
}

/// Caches individual partitions (per catalog version) and, separately, the
/// set of partition ids belonging to a layer-metadata query — so a batch
/// read can tell whether *every* requested id is cached before declaring a
/// hit.
pub struct PartitionCacheRepository {
    cache: Arc<dyn BlobCache>,
}

impl PartitionCacheRepository {
    pub fn new(cache: Arc<dyn BlobCache>) -> Self {
        Self { cache }
    }

    pub fn put_partition(
        &self,
        catalog: &str,
        layer: &str,
        version: Option<i64>,
        partition: &Partition,
        ttl_s: Option<i64>,
    ) -> Result<(), OlpError> {
        let key = keys::partition_key(catalog, layer, &partition.partition_id, version);
        let bytes = serde_json::to_vec(partition)
            .map_err(|e| OlpError::CacheIO(format!("failed to encode partition: {e}")))?;
        let expires_at = ttl_s.map(|t| now_epoch_s() + t.max(0));
        self.cache.put(&key, CacheEntry::new(Bytes::from(bytes), expires_at))
    }

    pub fn get_partition(
        &self,
        catalog: &str,
        layer: &str,
        version: Option<i64>,
        partition_id: &str,
    ) -> Result<Option<Partition>, OlpError> {
        let key = keys::partition_key(catalog, layer, partition_id, version);
        match self.cache.get(&key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                OlpError::CacheIO(format!("corrupt partition cache entry: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Stores the set of partition ids returned by a layer-metadata query,
    /// so a later identical request can be served from cache as a whole.
    pub fn put_partitions_list(
        &self,
        catalog: &str,
        layer: &str,
        version: i64,
        partition_ids: &[String],
        ttl_s: Option<i64>,
    ) -> Result<(), OlpError> {
        let key = keys::partitions_list_key(catalog, layer, version);
        let bytes = serde_json::to_vec(partition_ids)
            .map_err(|e| OlpError::CacheIO(format!("failed to encode partitions list: {e}")))?;
        let expires_at = ttl_s.map(|t| now_epoch_s() + t.max(0));
        self.cache.put(&key, CacheEntry::new(Bytes::from(bytes), expires_at))
    }

    /// Returns the requested partitions only if *every one* of them is
    /// present under `version`; otherwise `None` (a partial hit is treated
    /// as a miss, per spec §4.B).
    pub fn get_partitions(
        &self,
        catalog: &str,
        layer: &str,
        version: Option<i64>,
        requested_ids: &[String],
    ) -> Result<Option<Vec<Partition>>, OlpError> {
        let mut out = Vec::with_capacity(requested_ids.len());
        for id in requested_ids {
            match self.get_partition(catalog, layer, version, id)? {
                Some(p) => out.push(p),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }
}

/// Caches quad-tree indices by their raw bytes (spec §4.B: "reads
/// reconstruct the index from bytes without copying").
pub struct QuadTreeCacheRepository {
    cache: Arc<dyn BlobCache>,
}

impl QuadTreeCacheRepository {
    pub fn new(cache: Arc<dyn BlobCache>) -> Self {
        Self { cache }
    }

    pub fn put(
        &self,
        catalog: &str,
        layer: &str,
        root: &TileKey,
        version: i64,
        index: &QuadTreeIndex,
        ttl_s: Option<i64>,
    ) -> Result<(), OlpError> {
        let key = keys::quadtree_key(catalog, layer, &root.to_here_tile_string(), version, index.depth());
        let expires_at = ttl_s.map(|t| now_epoch_s() + t.max(0));
        self.cache
            .put(&key, CacheEntry::new(index.raw_bytes().clone(), expires_at))
    }

    pub fn get(
        &self,
        catalog: &str,
        layer: &str,
        root: &TileKey,
        version: i64,
        depth: u32,
    ) -> Result<Option<QuadTreeIndex>, OlpError> {
        let key = keys::quadtree_key(catalog, layer, &root.to_here_tile_string(), version, depth);
        match self.cache.get(&key)? {
            Some(bytes) => Ok(Some(QuadTreeIndex::parse(*root, depth, bytes)?)),
            None => Ok(None),
        }
    }

    pub fn key_for(&self, catalog: &str, layer: &str, root: &TileKey, version: i64, depth: u32) -> String {
        keys::quadtree_key(catalog, layer, &root.to_here_tile_string(), version, depth)
    }
}

/// Caches the raw blob bytes for a resolved data handle.
pub struct DataCacheRepository {
    cache: Arc<dyn BlobCache>,
    default_expiry_s: i64,
}

impl DataCacheRepository {
    pub fn new(cache: Arc<dyn BlobCache>, default_expiry_s: i64) -> Self {
        Self {
            cache,
            default_expiry_s,
        }
    }

    pub fn put(&self, catalog: &str, layer: &str, data_handle: &str, data: Bytes) -> Result<(), OlpError> {
        let key = keys::data_handle_key(catalog, layer, data_handle);
        let expires_at = now_epoch_s() + self.default_expiry_s.max(0);
        self.cache.put(&key, CacheEntry::new(data, Some(expires_at)))
    }

    pub fn get(&self, catalog: &str, layer: &str, data_handle: &str) -> Result<Option<Bytes>, OlpError> {
        let key = keys::data_handle_key(catalog, layer, data_handle);
        self.cache.get(&key)
    }

    pub fn key_for(&self, catalog: &str, layer: &str, data_handle: &str) -> String {
        keys::data_handle_key(catalog, layer, data_handle)
    }

    /// Evict on HTTP 403: the blob may have been retired from the
    /// underlying store and a stale entry would otherwise serve forever.
    pub fn evict(&self, catalog: &str, layer: &str, data_handle: &str) -> Result<(), OlpError> {
        let key = keys::data_handle_key(catalog, layer, data_handle);
        self.cache.remove(&key)
    }
}

/// Caches the set of layer versions for a catalog version. Supplements the
/// distilled spec: present in the original SDK's metadata repositories,
/// dropped from spec.md's distillation.
pub struct LayerVersionsCacheRepository {
    cache: Arc<dyn BlobCache>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct LayerVersion {
    pub layer: String,
    pub version: i64,
}

impl LayerVersionsCacheRepository {
    pub fn new(cache: Arc<dyn BlobCache>) -> Self {
        Self { cache }
    }

    pub fn put(&self, catalog: &str, catalog_version: i64, layer_versions: &[LayerVersion]) -> Result<(), OlpError> {
        let key = keys::layer_versions_key(catalog, catalog_version);
        let bytes = serde_json::to_vec(layer_versions)
            .map_err(|e| OlpError::CacheIO(format!("failed to encode layer versions: {e}")))?;
        self.cache.put(&key, CacheEntry::permanent(Bytes::from(bytes)))
    }

    pub fn get(&self, catalog: &str, catalog_version: i64) -> Result<Option<Vec<LayerVersion>>, OlpError> {
        let key = keys::layer_versions_key(catalog, catalog_version);
        match self.cache.get(&key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|e| {
                OlpError::CacheIO(format!("corrupt layer versions cache entry: {e}"))
            })?)),
            None => Ok(None),
        }
    }
}

/// The full set of typed repositories bound to one underlying [`BlobCache`].
pub struct CacheFacade {
    pub api: ApiCacheRepository,
    pub partitions: PartitionCacheRepository,
    pub quadtree: QuadTreeCacheRepository,
    pub data: DataCacheRepository,
    pub layer_versions: LayerVersionsCacheRepository,
    raw: Arc<dyn BlobCache>,
}

impl CacheFacade {
    pub fn new(cache: Arc<dyn BlobCache>, default_data_expiry_s: i64) -> Self {
        Self {
            api: ApiCacheRepository::new(Arc::clone(&cache)),
            partitions: PartitionCacheRepository::new(Arc::clone(&cache)),
            quadtree: QuadTreeCacheRepository::new(Arc::clone(&cache)),
            data: DataCacheRepository::new(Arc::clone(&cache), default_data_expiry_s),
            layer_versions: LayerVersionsCacheRepository::new(Arc::clone(&cache)),
            raw: cache,
        }
    }

    /// Direct access to the underlying blob cache, for the prefetch/release
    /// resolvers which operate on keys across repository boundaries.
    pub fn raw(&self) -> &Arc<dyn BlobCache> {
        &self.raw
    }

    pub fn additional_fields_satisfied(requested: &[AdditionalField], partition: &Partition) -> bool {
        partition.has_all_fields(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryBlobCache;

    #[test]
    fn api_cache_put_then_get_round_trips_within_ttl() {
        let facade = CacheFacade::new(Arc::new(InMemoryBlobCache::default()), 3600);
        facade
            .api
            .put("hrn:here:data::x:y", "blob", "v1", "https://example.com", 3600)
            .unwrap();
        assert_eq!(
            facade.api.get("hrn:here:data::x:y", "blob", "v1").unwrap(),
            Some("https://example.com".to_string())
        );
    }

    #[test]
    fn get_partitions_is_none_unless_every_id_present() {
        let facade = CacheFacade::new(Arc::new(InMemoryBlobCache::default()), 3600);
        let p1 = Partition::new("1", "handle-1");
        facade
            .partitions
            .put_partition("cat", "layer", Some(1), &p1, None)
            .unwrap();
        let result = facade
            .partitions
            .get_partitions("cat", "layer", Some(1), &["1".to_string(), "2".to_string()])
            .unwrap();
        assert!(result.is_none());

        let p2 = Partition::new("2", "handle-2");
        facade
            .partitions
            .put_partition("cat", "layer", Some(1), &p2, None)
            .unwrap();
        let result = facade
            .partitions
            .get_partitions("cat", "layer", Some(1), &["1".to_string(), "2".to_string()])
            .unwrap();
        assert_eq!(result.unwrap().len(), 2);
    }
}
