//! The quad-tree core (spec §4.G): resolves a tile or partition id to its
//! metadata, via the cached quad-tree index first and the online query
//! endpoint on a miss.
//!
//! Grounded on `PartitionsRepository`/`PartitionsRepository::GetTile`/
//! `GetAggregatedTile`/`GetPartitionById`/`QueryPartitionsInBatches`
//! (`repositories/PartitionsRepository.h`/`.cpp`).

use std::sync::Arc;

use url::Url;

use crate::cache::CacheFacade;
use crate::client::api_lookup::ApiLookupClient;
use crate::client::settings::ClientSettings;
use crate::client::transport::{PartitionsResponse as WirePartitionsResponse, TransportRequest};
use crate::context::CancellationContext;
use crate::error::{OlpError, OlpResult};
use crate::model::{AdditionalField, FetchOption, Hrn, Partition, QuadTreeIndex, TileKey};

/// Implementation-defined maximum number of partition ids batched into a
/// single `QueryPartitionsInBatches`-style request (spec §9 Open Question,
/// resolved in `SPEC_FULL.md` §4.G).
pub const MAX_PARTITION_IDS_PER_BATCH: usize = 100;

fn query_url(query_base: &str, path: &str, params: &[(&str, String)]) -> OlpResult<String> {
    let mut url = Url::parse(&format!("{query_base}{path}"))
        .map_err(|e| OlpError::Unknown(format!("malformed query URL: {e}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in params {
            pairs.append_pair(k, v);
        }
    }
    Ok(url.to_string())
}

/// Resolves tiles and partitions to [`Partition`] metadata (spec §4.G).
pub struct PartitionRepository {
    catalog: Hrn,
    layer: String,
    settings: Arc<ClientSettings>,
    lookup: Arc<ApiLookupClient>,
    cache: Arc<CacheFacade>,
}

impl PartitionRepository {
    pub fn new(
        catalog: Hrn,
        layer: impl Into<String>,
        settings: Arc<ClientSettings>,
        lookup: Arc<ApiLookupClient>,
        cache: Arc<CacheFacade>,
    ) -> Self {
        Self {
            catalog,
            layer: layer.into(),
            settings,
            lookup,
            cache,
        }
    }

    fn hrn(&self) -> &str {
        self.catalog.to_catalog_hrn_string()
    }

    async fn query_base_url(&self, option: FetchOption, context: &CancellationContext) -> OlpResult<String> {
        let client = self.lookup.lookup_api("query", "v1", option, context).await?;
        Ok(client.base_url)
    }

    /// §4.G.1: resolve a tile exactly, enriched with `required_fields`.
    pub async fn get_tile(
        &self,
        tile: TileKey,
        version: Option<i64>,
        option: FetchOption,
        context: &CancellationContext,
        required_fields: &[AdditionalField],
    ) -> OlpResult<Partition> {
        if context.is_cancelled() {
            return Err(OlpError::Cancelled);
        }

        if !option.skips_cache_read() {
            if let Some(tree) = self.find_cached_ancestor_tree(tile, version)? {
                if tree.tile_has_all_fields(&tile, required_fields) {
                    if let Some(entry) = tree.find(&tile, false) {
                        tracing::trace!(hrn = self.hrn(), tile = %tile, "get_tile found in cache");
                        return Ok(entry.to_partition(required_fields));
                    }
                }
            }
        }

        if option.is_cache_only() {
            return Err(OlpError::NotFound("CacheOnly: resource not found in cache".into()));
        }

        let tree = self.fetch_and_cache_tree(tile, version, option, context, required_fields).await?;
        tree.find(&tile, false)
            .map(|e| e.to_partition(required_fields))
            .ok_or_else(|| OlpError::NotFound(format!("tile {tile} not present in quad-tree")))
    }

    /// §4.G.2: resolve the closest ancestor (up to the depth-4 root) whose
    /// data is present.
    pub async fn get_aggregated_tile(
        &self,
        tile: TileKey,
        version: Option<i64>,
        option: FetchOption,
        context: &CancellationContext,
    ) -> OlpResult<Partition> {
        if context.is_cancelled() {
            return Err(OlpError::Cancelled);
        }

        let tree = match self.find_cached_ancestor_tree(tile, version)? {
            Some(tree) if !option.skips_cache_read() => tree,
            _ if option.is_cache_only() => {
                return Err(OlpError::NotFound("CacheOnly: resource not found in cache".into()));
            }
            _ => self.fetch_and_cache_tree(tile, version, option, context, &[]).await?,
        };

        if let Some(entry) = tree.find(&tile, false) {
            return Ok(entry.to_partition(&[]));
        }

        // Walk ancestors from `tile` toward the tree's root, consulting
        // both sub-quads and parent-quads (spec §4.G.2).
        let mut ancestor = tile;
        while ancestor != tree.root() {
            ancestor = ancestor.parent().ok_or_else(|| {
                OlpError::NotFound(format!("no aggregated data found for tile {tile}"))
            })?;
            if let Some(entry) = tree.find(&ancestor, true) {
                // Parent-quad entries carry only partial additional fields
                // (spec §9 Open Question); re-query online for correctness
                // when fields beyond the bare data handle are ever needed
                // here. `get_aggregated_tile` itself requests none, so the
                // entry as found is always sufficient.
                return Ok(entry.to_partition(&[]));
            }
        }

        Err(OlpError::NotFound(format!("no aggregated data found for tile {tile}")))
    }

    /// §4.G.3: resolve a single partition by id via the query endpoint.
    pub async fn get_partition_by_id(
        &self,
        partition_id: &str,
        version: Option<i64>,
        option: FetchOption,
        billing_tag: Option<&str>,
        context: &CancellationContext,
    ) -> OlpResult<Partition> {
        let mut partitions = self
            .get_partitions(&[partition_id.to_string()], version, option, billing_tag, context)
            .await?;
        if partitions.is_empty() {
            return Err(OlpError::NotFound(format!("partition '{partition_id}' not found")));
        }
        Ok(partitions.remove(0))
    }

    /// §4.G.3: batched list query, unioning results across groups bounded
    /// by [`MAX_PARTITION_IDS_PER_BATCH`].
    pub async fn get_partitions(
        &self,
        partition_ids: &[String],
        version: Option<i64>,
        option: FetchOption,
        billing_tag: Option<&str>,
        context: &CancellationContext,
    ) -> OlpResult<Vec<Partition>> {
        if context.is_cancelled() {
            return Err(OlpError::Cancelled);
        }

        if !option.skips_cache_read() {
            if let Some(cached) = self
                .cache
                .partitions
                .get_partitions(self.hrn(), &self.layer, version, partition_ids)?
            {
                tracing::trace!(hrn = self.hrn(), layer = %self.layer, "get_partitions fully served from cache");
                return Ok(cached);
            } else if option.is_cache_only() {
                return Err(OlpError::NotFound("CacheOnly: resource not found in cache".into()));
            }
        }

        let base_url = self.query_base_url(option, context).await?;
        let mut results = Vec::with_capacity(partition_ids.len());
        for group in partition_ids.chunks(MAX_PARTITION_IDS_PER_BATCH) {
            if context.is_cancelled() {
                return Err(OlpError::Cancelled);
            }
            let mut params: Vec<(&str, String)> = Vec::new();
            for id in group {
                params.push(("partition", id.clone()));
            }
            if let Some(v) = version {
                params.push(("version", v.to_string()));
            }
            if let Some(tag) = billing_tag {
                params.push(("billingTag", tag.to_string()));
            }
            let url = query_url(&base_url, &format!("/layers/{}/partitions", self.layer), &params)?;
            let response = self.settings.transport.execute(TransportRequest::get(url)).await?;
            if !response.is_success() {
                return Err(OlpError::from_http_status(response.status, "get_partitions query failed".into()));
            }
            let parsed: WirePartitionsResponse = serde_json::from_slice(&response.body)
                .map_err(|e| OlpError::Unknown(format!("malformed partitions response: {e}")))?;
            for wire in parsed.partitions {
                let partition: Partition = wire.into();
                if !option.skips_cache_write() {
                    self.cache
                        .partitions
                        .put_partition(self.hrn(), &self.layer, version, &partition, None)?;
                }
                results.push(partition);
            }
        }

        if !option.skips_cache_write() {
            if let Some(v) = version {
                let ids: Vec<String> = results.iter().map(|p| p.partition_id.clone()).collect();
                self.cache.partitions.put_partitions_list(self.hrn(), &self.layer, v, &ids, None)?;
            }
        }

        Ok(results)
    }

    /// §4.G.4: stream a full layer's partitions to `on_partition`, one at a
    /// time. The wire parser itself (incremental JSON array streaming) is
    /// out of scope (spec §1 Non-goals); this issues the full-layer GET and
    /// hands the complete, parsed response to the callback in order,
    /// satisfying the same "completion/error/cancellation are terminal"
    /// contract a true incremental parser would.
    pub async fn stream_partitions(
        &self,
        version: i64,
        fields: &[AdditionalField],
        billing_tag: Option<&str>,
        context: &CancellationContext,
        mut on_partition: impl FnMut(Partition),
    ) -> OlpResult<()> {
        if context.is_cancelled() {
            return Err(OlpError::Cancelled);
        }
        let base_url = self.query_base_url(FetchOption::OnlineIfNotFound, context).await?;
        let mut params = vec![("version", version.to_string())];
        if !fields.is_empty() {
            let joined = fields.iter().map(|f| f.as_query_token()).collect::<Vec<_>>().join(",");
            params.push(("additionalFields", joined));
        }
        if let Some(tag) = billing_tag {
            params.push(("billingTag", tag.to_string()));
        }
        let url = query_url(&base_url, &format!("/layers/{}/partitions", self.layer), &params)?;
        let response = self.settings.transport.execute(TransportRequest::get(url)).await?;
        if !response.is_success() {
            return Err(OlpError::from_http_status(response.status, "stream_partitions query failed".into()));
        }
        let parsed: WirePartitionsResponse = serde_json::from_slice(&response.body)
            .map_err(|e| OlpError::Unknown(format!("malformed partitions response: {e}")))?;
        for wire in parsed.partitions {
            if context.is_cancelled() {
                return Err(OlpError::Cancelled);
            }
            on_partition(wire.into());
        }
        Ok(())
    }

    /// Walk ancestors `tile.changed_level_by(-k)` for `k = 0..=depth`,
    /// returning the first cached quad-tree found (spec §4.G.1 step 2).
    fn find_cached_ancestor_tree(&self, tile: TileKey, version: Option<i64>) -> OlpResult<Option<QuadTreeIndex>> {
        let version = version.unwrap_or(0);
        let max_depth = tile.level().min(TileKey::MAX_QUADTREE_DEPTH);
        for k in 0..=max_depth {
            let ancestor = tile.changed_level_by(-(k as i32));
            if let Some(tree) = self
                .cache
                .quadtree
                .get(self.hrn(), &self.layer, &ancestor, version, TileKey::MAX_QUADTREE_DEPTH)?
            {
                return Ok(Some(tree));
            }
        }
        Ok(None)
    }

    /// §4.G.1 step 4: fetch the quad-tree endpoint rooted at
    /// `tile.changed_level_by(-4)`, cache its raw bytes, return the parsed
    /// index.
    async fn fetch_and_cache_tree(
        &self,
        tile: TileKey,
        version: Option<i64>,
        option: FetchOption,
        context: &CancellationContext,
        required_fields: &[AdditionalField],
    ) -> OlpResult<QuadTreeIndex> {
        let root = tile.changed_level_by(-(TileKey::MAX_QUADTREE_DEPTH as i32));
        let version_key = version.unwrap_or(0);
        let base_url = self.query_base_url(option, context).await?;

        let mut params: Vec<(&str, String)> = Vec::new();
        if !required_fields.is_empty() {
            let joined = required_fields.iter().map(|f| f.as_query_token()).collect::<Vec<_>>().join(",");
            params.push(("additionalFields", joined));
        }
        let path = format!(
            "/layers/{}/versions/{}/quadkeys/{}/depths/{}",
            self.layer,
            version.unwrap_or_default(),
            root.to_here_tile_string(),
            TileKey::MAX_QUADTREE_DEPTH
        );
        let url = query_url(&base_url, &path, &params)?;

        if context.is_cancelled() {
            return Err(OlpError::Cancelled);
        }
        let response = self.settings.transport.execute(TransportRequest::get(url)).await?;
        if !response.is_success() {
            return Err(OlpError::from_http_status(response.status, "quad-tree fetch failed".into()));
        }

        let index = QuadTreeIndex::parse(root, TileKey::MAX_QUADTREE_DEPTH, response.body)?;
        if !option.skips_cache_write() {
            self.cache
                .quadtree
                .put(self.hrn(), &self.layer, &root, version_key, &index, None)?;
        }
        Ok(index)
    }
}
