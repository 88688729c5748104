//! Request builders for the layer clients (spec §4.J): one blob fetch, one
//! batched partition-metadata lookup, and the cache-removal target union
//! type shared by `remove_from_cache`.

use crate::model::{FetchOption, TileKey};

/// A single partition's data fetch, addressed either by partition id
/// (resolved through the partition repository first) or by an already-known
/// data handle (skips that resolution step entirely).
#[derive(Debug, Clone)]
pub struct DataRequest {
    pub(crate) partition_id: Option<String>,
    pub(crate) data_handle: Option<String>,
    pub(crate) fetch_option: FetchOption,
    pub(crate) billing_tag: Option<String>,
}

impl Default for DataRequest {
    fn default() -> Self {
        Self {
            partition_id: None,
            data_handle: None,
            fetch_option: FetchOption::OnlineIfNotFound,
            billing_tag: None,
        }
    }
}

impl DataRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition_id(mut self, partition_id: impl Into<String>) -> Self {
        self.partition_id = Some(partition_id.into());
        self
    }

    pub fn with_data_handle(mut self, data_handle: impl Into<String>) -> Self {
        self.data_handle = Some(data_handle.into());
        self
    }

    pub fn with_fetch_option(mut self, fetch_option: FetchOption) -> Self {
        self.fetch_option = fetch_option;
        self
    }

    pub fn with_billing_tag(mut self, billing_tag: impl Into<String>) -> Self {
        self.billing_tag = Some(billing_tag.into());
        self
    }

    /// A request naming neither a partition id nor a data handle, or both at
    /// once, cannot be resolved (spec §7: `PreconditionFailed` covers "both
    /// data handle and partition id").
    pub(crate) fn validate(&self) -> Result<(), crate::error::OlpError> {
        match (&self.partition_id, &self.data_handle) {
            (Some(_), Some(_)) => Err(crate::error::OlpError::PreconditionFailed(
                "DataRequest must not set both a partition id and a data handle".into(),
            )),
            (None, None) => Err(crate::error::OlpError::PreconditionFailed(
                "DataRequest requires either a partition id or a data handle".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// A batched partition-metadata lookup by id.
#[derive(Debug, Clone)]
pub struct PartitionsRequest {
    pub(crate) partition_ids: Vec<String>,
    pub(crate) fetch_option: FetchOption,
    pub(crate) billing_tag: Option<String>,
}

impl Default for PartitionsRequest {
    fn default() -> Self {
        Self {
            partition_ids: Vec::new(),
            fetch_option: FetchOption::OnlineIfNotFound,
            billing_tag: None,
        }
    }
}

impl PartitionsRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition_ids(mut self, partition_ids: Vec<String>) -> Self {
        self.partition_ids = partition_ids;
        self
    }

    pub fn with_fetch_option(mut self, fetch_option: FetchOption) -> Self {
        self.fetch_option = fetch_option;
        self
    }

    pub fn with_billing_tag(mut self, billing_tag: impl Into<String>) -> Self {
        self.billing_tag = Some(billing_tag.into());
        self
    }
}

/// Tiles to resolve and cache ahead of time (spec §4.J `prefetch_tiles`).
#[derive(Debug, Clone)]
pub struct PrefetchTilesRequest {
    pub(crate) tiles: Vec<TileKey>,
    pub(crate) fetch_option: FetchOption,
    pub(crate) billing_tag: Option<String>,
}

impl Default for PrefetchTilesRequest {
    fn default() -> Self {
        Self {
            tiles: Vec::new(),
            fetch_option: FetchOption::OnlineIfNotFound,
            billing_tag: None,
        }
    }
}

impl PrefetchTilesRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tiles(mut self, tiles: Vec<TileKey>) -> Self {
        self.tiles = tiles;
        self
    }

    pub fn with_fetch_option(mut self, fetch_option: FetchOption) -> Self {
        self.fetch_option = fetch_option;
        self
    }

    pub fn with_billing_tag(mut self, billing_tag: impl Into<String>) -> Self {
        self.billing_tag = Some(billing_tag.into());
        self
    }
}

/// The outcome of resolving one tile from a [`PrefetchTilesRequest`]: tiles
/// are resolved independently, so one failing does not fail the batch.
#[derive(Debug, Clone)]
pub struct PrefetchTileResult {
    pub tile: TileKey,
    pub result: Result<crate::model::Partition, crate::error::OlpError>,
}

/// What `remove_from_cache` evicts: a generic-layer partition id, or a
/// tiled-layer tile key.
#[derive(Debug, Clone)]
pub enum CacheRemovalTarget {
    PartitionId(String),
    Tile(TileKey),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_request_rejects_neither_or_both() {
        assert!(DataRequest::new().validate().is_err());
        assert!(DataRequest::new()
            .with_partition_id("p1")
            .with_data_handle("h1")
            .validate()
            .is_err());
        assert!(DataRequest::new().with_partition_id("p1").validate().is_ok());
        assert!(DataRequest::new().with_data_handle("h1").validate().is_ok());
    }
}
