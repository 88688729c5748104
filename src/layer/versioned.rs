//! A client bound to one immutable catalog version (spec §4.J). Every read
//! sees a consistent snapshot of the layer as of that version.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use crate::context::{CancellationContext, CancellationToken};
use crate::error::OlpResult;
use crate::model::{Hrn, Partition, TileKey};

use super::core::LayerClientCore;
use super::request::{CacheRemovalTarget, DataRequest, PartitionsRequest, PrefetchTileResult, PrefetchTilesRequest};

/// A client for one layer of one catalog at a fixed catalog version.
#[derive(Clone)]
pub struct VersionedLayerClient {
    core: Arc<LayerClientCore>,
}

impl VersionedLayerClient {
    pub fn new(catalog: Hrn, layer: impl Into<String>, catalog_version: i64, settings: Arc<crate::client::settings::ClientSettings>) -> Self {
        Self {
            core: Arc::new(LayerClientCore::new(catalog, layer, Some(catalog_version), "blob", settings)),
        }
    }

    /// Callback form: returns immediately with a token that cancels this
    /// specific call (spec §4.J / §9 design note).
    pub fn get_data_callback(
        &self,
        request: DataRequest,
        context: CancellationContext,
        callback: impl FnOnce(OlpResult<Bytes>) + Send + 'static,
    ) -> CancellationToken {
        self.core.coalesced_get_data(request, context, callback)
    }

    /// Future form, implemented in terms of [`Self::get_data_callback`].
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

    /// Resolves and caches every tile in `request`, returning per-tile
    /// success/failure (spec §4.J `prefetch_tiles`).
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

    /// Cancels every request this client's task sink is currently running.
    pub fn cancel_pending_requests(&self) {
        self.core.cancel_pending_requests();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryBlobCache;
    use crate::client::settings::ClientSettingsBuilder;
    use crate::client::transport::{Transport, TransportRequest, TransportResponse};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct FixedTransport {
        status: u16,
        body: Bytes,
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn execute(&self, request: TransportRequest) -> OlpResult<TransportResponse> {
            if request.url.ends_with("/apis") {
                return Ok(TransportResponse {
                    status: 200,
                    body: Bytes::from_static(
                        br#"[{"api":"blob","version":"v1","baseURL":"https://blob.example.com"},{"api":"query","version":"v1","baseURL":"https://query.example.com"}]"#,
                    ),
                    max_age_s: None,
                });
            }
            if request.url.contains("/partitions") {
                return Ok(TransportResponse {
                    status: 200,
                    body: Bytes::from_static(br#"{"partitions":[{"partition":"p1","dataHandle":"H1"}]}"#),
                    max_age_s: None,
                });
            }
            Ok(TransportResponse {
                status: self.status,
                body: self.body.clone(),
                max_age_s: None,
            })
        }
        fn cancel(&self, _request_id: Uuid) {}
    }

    fn client(status: u16, body: &'static str) -> VersionedLayerClient {
        let transport = Arc::new(FixedTransport { status, body: Bytes::from_static(body.as_bytes()) });
        let settings = Arc::new(
            ClientSettingsBuilder::new()
                .transport(transport)
                .cache(Arc::new(InMemoryBlobCache::default()))
                .task_sink(Arc::new(crate::task::TaskSink::new(2)))
                .build()
                .unwrap(),
        );
        let catalog = Hrn::new("hrn:here:data::olp-here-test:hereos-internal-test-v2").unwrap();
        VersionedLayerClient::new(catalog, "a-layer", 42, settings)
    }

    #[tokio::test]
    async fn get_data_resolves_partition_then_fetches_blob() {
        let client = client(200, "payload-bytes");
        let request = DataRequest::new().with_partition_id("p1");
        let bytes = client.get_data(request, CancellationContext::new()).await.unwrap();
        assert_eq!(bytes, Bytes::from_static(b"payload-bytes"));
    }

    #[tokio::test]
    async fn get_data_with_invalid_request_fails_fast() {
        let client = client(200, "ignored");
        let result = client.get_data(DataRequest::new(), CancellationContext::new()).await;
        assert!(matches!(result, Err(crate::error::OlpError::PreconditionFailed(_))));
    }

    #[tokio::test]
    async fn cancel_before_send_short_circuits_get_data() {
        let client = client(200, "payload-bytes");
        let context = CancellationContext::new();
        context.cancel();
        let request = DataRequest::new().with_partition_id("p1");
        let result = client.get_data(request, context).await;
        assert!(matches!(result, Err(crate::error::OlpError::Cancelled)));
    }
}
