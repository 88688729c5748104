//! Shared machinery behind [`super::versioned::VersionedLayerClient`] and
//! [`super::volatile::VolatileLayerClient`] (spec §4.J): one repository set
//! per (catalog, layer), coalesced `get_data`/`get_partitions` calls, tile
//! prefetch, and cache protect/release/removal.
//!
//! Grounded on the original's three sibling `*LayerClientImpl` classes,
//! which all wrap the same repository set and differ only in which blob
//! service name and catalog version they pass through.
//!
//! The repositories this wraps expose only `async fn`s; the task sink (spec
//! §4.D) runs plain OS threads with no ambient async runtime. Each worker
//! thread gets its own single-threaded `tokio::runtime::Runtime`, lazily
//! built and reused for every task that thread ever runs, and `block_on`
//! drives a repository call to completion on it.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::join_all;

use crate::cache::CacheFacade;
use crate::client::api_lookup::ApiLookupClient;
use crate::client::settings::ClientSettings;
use crate::coalesce::MultiRequestContext;
use crate::context::{CancellationContext, CancellationToken};
use crate::error::{OlpError, OlpResult};
use crate::model::{Hrn, Partition, TileKey};
use crate::prefetch::{ProtectDependencyResolver, ReleaseDependencyResolver};
use crate::repository::{DataRepository, PartitionRepository};
use crate::task::NORMAL_PRIORITY;

use super::request::{CacheRemovalTarget, DataRequest, PartitionsRequest, PrefetchTileResult, PrefetchTilesRequest};

thread_local! {
    static BRIDGE_RUNTIME: RefCell<Option<tokio::runtime::Runtime>> = RefCell::new(None);
}

/// Drives `fut` to completion on this worker thread's single-threaded
/// bridging runtime, building it on first use. Never called from within an
/// already-running Tokio context: the task sink's worker threads are plain
/// OS threads, so there is nothing to conflict with.
pub(crate) fn block_on<F: Future>(fut: F) -> F::Output {
    BRIDGE_RUNTIME.with(|cell| {
        let mut slot = cell.borrow_mut();
        let runtime = slot.get_or_insert_with(|| {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to start layer client bridging runtime")
        });
        runtime.block_on(fut)
    })
}

/// Shared state behind a single (catalog, layer) pair, whether versioned or
/// volatile (spec §4.J: "share a common internal core").
pub(crate) struct LayerClientCore {
    catalog: Hrn,
    layer: String,
    version: Option<i64>,
    blob_service: &'static str,
    settings: Arc<ClientSettings>,
    cache: Arc<CacheFacade>,
    partitions_repo: PartitionRepository,
    data_repo: DataRepository,
    data_mrc: MultiRequestContext<OlpResult<Bytes>>,
    partitions_mrc: MultiRequestContext<OlpResult<Vec<Partition>>>,
}

impl LayerClientCore {
    pub(crate) fn new(catalog: Hrn, layer: impl Into<String>, version: Option<i64>, blob_service: &'static str, settings: Arc<ClientSettings>) -> Self {
        let layer = layer.into();
        let cache = Arc::new(CacheFacade::new(
            Arc::clone(&settings.cache),
            settings.default_cache_expiration.as_secs() as i64,
        ));
        let lookup = Arc::new(ApiLookupClient::new(catalog.clone(), Arc::clone(&settings), Arc::clone(&cache)));
        let partitions_repo = PartitionRepository::new(
            catalog.clone(),
            layer.clone(),
            Arc::clone(&settings),
            Arc::clone(&lookup),
            Arc::clone(&cache),
        );
        let data_repo = DataRepository::new(
            catalog.clone(),
            Arc::clone(&settings),
            lookup,
            Arc::clone(&cache),
            settings.named_mutexes.clone(),
        );

        Self {
            catalog,
            layer,
            version,
            blob_service,
            settings,
            cache,
            partitions_repo,
            data_repo,
            data_mrc: MultiRequestContext::new(),
            partitions_mrc: MultiRequestContext::new(),
        }
    }

    fn hrn(&self) -> &str {
        self.catalog.to_catalog_hrn_string()
    }

    fn version_part(&self) -> String {
        self.version.map(|v| v.to_string()).unwrap_or_default()
    }

    async fn run_get_data(&self, request: DataRequest, ctx: &CancellationContext) -> OlpResult<Bytes> {
        let partition = match (&request.partition_id, &request.data_handle) {
            (_, Some(handle)) => Partition::new(request.partition_id.clone().unwrap_or_default(), handle.clone()),
            (Some(id), None) => {
                self.partitions_repo
                    .get_partition_by_id(id, self.version, request.fetch_option, request.billing_tag.as_deref(), ctx)
                    .await?
            }
            (None, None) => unreachable!("DataRequest::validate rejects this combination"),
        };
        self.data_repo
            .get_blob(&self.layer, self.blob_service, &partition, request.fetch_option, request.billing_tag.as_deref(), ctx)
            .await
    }

    /// Callback form of `get_data`: coalesces concurrent callers asking for
    /// the same partition/data handle into one underlying fetch (spec
    /// §4.E), itself run through the task sink (spec §4.D).
    pub(crate) fn coalesced_get_data(
        self: &Arc<Self>,
        request: DataRequest,
        context: CancellationContext,
        callback: impl FnOnce(OlpResult<Bytes>) + Send + 'static,
    ) -> CancellationToken {
        if let Err(e) = request.validate() {
            callback(Err(e));
            return CancellationToken::new(CancellationContext::new());
        }

        let fingerprint = crate::coalesce::fingerprint(&[
            "get_data",
            self.hrn(),
            &self.layer,
            request.partition_id.as_deref().unwrap_or(""),
            request.data_handle.as_deref().unwrap_or(""),
            &self.version_part(),
        ]);

        let core = Arc::clone(self);
        self.data_mrc.execute_or_associate(
            fingerprint,
            move |finish| {
                let task_sink = Arc::clone(&core.settings.task_sink);
                task_sink.submit(
                    move |ctx: &CancellationContext| block_on(core.run_get_data(request, ctx)),
                    finish,
                    NORMAL_PRIORITY,
                    &context,
                )
            },
            callback,
            Err(OlpError::Cancelled),
        )
    }

    /// Future form of `get_data`, implemented in terms of the callback form
    /// (spec §9 design note).
    pub(crate) fn get_data_future(self: &Arc<Self>, request: DataRequest, context: CancellationContext) -> impl Future<Output = OlpResult<Bytes>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.coalesced_get_data(request, context, move |result| {
            let _ = tx.send(result);
        });
        async move { rx.await.unwrap_or(Err(OlpError::Cancelled)) }
    }

    pub(crate) fn coalesced_get_partitions(
        self: &Arc<Self>,
        request: PartitionsRequest,
        context: CancellationContext,
        callback: impl FnOnce(OlpResult<Vec<Partition>>) + Send + 'static,
    ) -> CancellationToken {
        if request.partition_ids.is_empty() {
            callback(Err(OlpError::PreconditionFailed(
                "PartitionsRequest requires at least one partition id".into(),
            )));
            return CancellationToken::new(CancellationContext::new());
        }

        let mut sorted_ids = request.partition_ids.clone();
        sorted_ids.sort();
        let fingerprint = crate::coalesce::fingerprint(&[
            "get_partitions",
            self.hrn(),
            &self.layer,
            &sorted_ids.join(","),
            &self.version_part(),
        ]);

        let core = Arc::clone(self);
        self.partitions_mrc.execute_or_associate(
            fingerprint,
            move |finish| {
                let task_sink = Arc::clone(&core.settings.task_sink);
                task_sink.submit(
                    move |ctx: &CancellationContext| {
                        block_on(core.partitions_repo.get_partitions(
                            &request.partition_ids,
                            core.version,
                            request.fetch_option,
                            request.billing_tag.as_deref(),
                            ctx,
                        ))
                    },
                    finish,
                    NORMAL_PRIORITY,
                    &context,
                )
            },
            callback,
            Err(OlpError::Cancelled),
        )
    }

    pub(crate) fn get_partitions_future(
        self: &Arc<Self>,
        request: PartitionsRequest,
        context: CancellationContext,
    ) -> impl Future<Output = OlpResult<Vec<Partition>>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.coalesced_get_partitions(request, context, move |result| {
            let _ = tx.send(result);
        });
        async move { rx.await.unwrap_or(Err(OlpError::Cancelled)) }
    }

    /// Resolves every requested tile independently and caches it along the
    /// way (spec §4.J `prefetch_tiles`); one tile failing does not fail the
    /// others. Not coalesced through a [`MultiRequestContext`] — tiles are
    /// cached individually by [`PartitionRepository::get_tile`] as soon as
    /// the first resolution completes, so a second concurrent prefetch of
    /// the same tile simply hits that cache rather than needing to share
    /// the in-flight fetch.
    pub(crate) fn prefetch_tiles_future(
        self: &Arc<Self>,
        request: PrefetchTilesRequest,
        context: CancellationContext,
    ) -> impl Future<Output = Vec<PrefetchTileResult>> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let core = Arc::clone(self);
        let task_sink = Arc::clone(&self.settings.task_sink);
        task_sink.submit(
            move |ctx: &CancellationContext| {
                block_on(async move {
                    let futures = request.tiles.iter().map(|&tile| {
                        let core = &core;
                        async move {
                            let result = core
                                .partitions_repo
                                .get_tile(tile, core.version, request.fetch_option, ctx, &[])
                                .await;
                            PrefetchTileResult { tile, result }
                        }
                    });
                    join_all(futures).await
                })
            },
            move |results| {
                let _ = tx.send(results);
            },
            NORMAL_PRIORITY,
            &context,
        );
        async move { rx.await.unwrap_or_default() }
    }

    /// Pins the cache keys backing `tiles` against eviction (spec §4.I.1).
    pub(crate) fn protect(&self, tiles: &[TileKey]) -> OlpResult<()> {
        let version = self.version.unwrap_or(0);
        let mut resolver = ProtectDependencyResolver::new(self.catalog.clone(), self.layer.clone(), version, Arc::clone(&self.cache));
        for key in resolver.keys_to_protect(tiles) {
            self.cache.raw().protect(&key)?;
        }
        Ok(())
    }

    /// Unpins the cache keys backing `tiles` (spec §4.I.2).
    pub(crate) fn release(&self, tiles: &[TileKey]) -> OlpResult<()> {
        let version = self.version.unwrap_or(0);
        let mut resolver = ReleaseDependencyResolver::new(self.catalog.clone(), self.layer.clone(), version, Arc::clone(&self.cache));
        for key in resolver.keys_to_release(tiles) {
            self.cache.raw().release(&key)?;
        }
        Ok(())
    }

    /// Evicts a cached partition or tile's data without waiting for natural
    /// expiry (spec §4.J `remove_from_cache`).
    pub(crate) fn remove_from_cache(&self, target: CacheRemovalTarget) -> OlpResult<()> {
        let hrn = self.hrn();
        match target {
            CacheRemovalTarget::PartitionId(id) => {
                if let Some(partition) = self.cache.partitions.get_partition(hrn, &self.layer, self.version, &id)? {
                    self.cache.data.evict(hrn, &self.layer, &partition.data_handle)?;
                }
                self.cache
                    .raw()
                    .remove(&crate::cache::keys::partition_key(hrn, &self.layer, &id, self.version))
            }
            CacheRemovalTarget::Tile(tile) => {
                let version = self.version.unwrap_or(0);
                let max_depth = tile.level().min(TileKey::MAX_QUADTREE_DEPTH);
                for k in 0..=max_depth {
                    let ancestor = tile.changed_level_by(-(k as i32));
                    if let Some(tree) = self.cache.quadtree.get(hrn, &self.layer, &ancestor, version, TileKey::MAX_QUADTREE_DEPTH)? {
                        if let Some(entry) = tree.find(&tile, false) {
                            return self.cache.data.evict(hrn, &self.layer, &entry.data_handle);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Cancels every task this core's task sink is currently running (spec
    /// §4.J `cancel_pending_requests`). Affects every layer client sharing
    /// this [`ClientSettings`]' task sink, matching the original's
    /// process-wide `CancellationContext::cancelAll` semantics.
    pub(crate) fn cancel_pending_requests(&self) {
        self.settings.task_sink.cancel_all();
    }
}
