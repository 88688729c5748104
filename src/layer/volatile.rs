//! A client bound to a layer's current (unversioned, frequently-changing)
//! content (spec §4.J): the same operations as
//! [`super::versioned::VersionedLayerClient`], against the volatile blob
//! service and with no catalog version threaded through cache keys.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use crate::context::{CancellationContext, CancellationToken};
use crate::error::OlpResult;
use crate::model::{Hrn, Partition, TileKey};

use super::core::LayerClientCore;
use super::request::{CacheRemovalTarget, DataRequest, PartitionsRequest, PrefetchTileResult, PrefetchTilesRequest};

#[derive(Clone)]
pub struct VolatileLayerClient {
    core: Arc<LayerClientCore>,
}

impl VolatileLayerClient {
    pub fn new(catalog: Hrn, layer: impl Into<String>, settings: Arc<crate::client::settings::ClientSettings>) -> Self {
        Self {
            core: Arc::new(LayerClientCore::new(catalog, layer, None, "volatile-blob", settings)),
        }
    }

    pub fn get_data_callback(
        &self,
        request: DataRequest,
        context: CancellationContext,
        callback: impl FnOnce(OlpResult<Bytes>) + Send + 'static,
    ) -> CancellationToken {
        self.core.coalesced_get_data(request, context, callback)
    }

    pub fn get_data(&self, request: DataRequest, context: CancellationContext) -> impl Future<Output = OlpResult<Bytes>> {
        self.core.get_data_future(request, context)
    }

    pub fn get_partitions_callback(
        &self,
        request: PartitionsRequest,
        context: CancellationContext,
        callback: impl FnOnce(OlpResult<Vec<Partition>>) + Send + 'static,
    ) -> CancellationToken {
        self.core.coalesced_get_partitions(request, context, callback)
    }

    pub fn get_partitions(&self, request: PartitionsRequest, context: CancellationContext) -> impl Future<Output = OlpResult<Vec<Partition>>> {
        self.core.get_partitions_future(request, context)
    }

    pub fn prefetch_tiles(&self, request: PrefetchTilesRequest, context: CancellationContext) -> impl Future<Output = Vec<PrefetchTileResult>> {
        self.core.prefetch_tiles_future(request, context)
    }

    pub fn protect(&self, tiles: &[TileKey]) -> OlpResult<()> {
        self.core.protect(tiles)
    }

    pub fn release(&self, tiles: &[TileKey]) -> OlpResult<()> {
        self.core.release(tiles)
    }

    pub fn remove_from_cache(&self, target: CacheRemovalTarget) -> OlpResult<()> {
        self.core.remove_from_cache(target)
    }

    pub fn cancel_pending_requests(&self) {
        self.core.cancel_pending_requests();
    }
}
