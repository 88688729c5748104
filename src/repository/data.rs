//! The blob/data repository (spec §4.H): resolves a partition's data
//! handle to bytes, read-through a named mutex and the data cache, with
//! 403-clearing on revoked access.
//!
//! Grounded on `DataRepository::GetBlobData`
//! (`repositories/DataRepository.cpp`): the named-mutex gating is
//! lock-free under `CacheOnly`/`OnlineOnly`, the sticky error is consulted
//! after the cache read and before the network attempt, and an HTTP 403
//! evicts the cached data handle before the error propagates.

use std::sync::Arc;

use bytes::Bytes;

use crate::cache::CacheFacade;
use crate::client::api_lookup::ApiLookupClient;
use crate::client::settings::ClientSettings;
use crate::client::transport::TransportRequest;
use crate::context::CancellationContext;
use crate::error::{OlpError, OlpResult};
use crate::model::{FetchOption, Hrn, Partition};
use crate::sync::{peek_error, NamedMutexRegistry};

/// Resolves partition data handles to bytes (spec §4.H).
pub struct DataRepository {
    catalog: Hrn,
    settings: Arc<ClientSettings>,
    lookup: Arc<ApiLookupClient>,
    cache: Arc<CacheFacade>,
    mutexes: NamedMutexRegistry,
}

impl DataRepository {
    pub fn new(
        catalog: Hrn,
        settings: Arc<ClientSettings>,
        lookup: Arc<ApiLookupClient>,
        cache: Arc<CacheFacade>,
        mutexes: NamedMutexRegistry,
    ) -> Self {
        Self {
            catalog,
            settings,
            lookup,
            cache,
            mutexes,
        }
    }

    /// `service` is `"blob"` for versioned/volatile layers backed by the
    /// standard blob service, `"volatile-blob"` for the volatile-specific
    /// one (spec §4.H inputs).
    pub async fn get_blob(
        &self,
        layer: &str,
        service: &str,
        partition: &Partition,
        option: FetchOption,
        billing_tag: Option<&str>,
        context: &CancellationContext,
    ) -> OlpResult<Bytes> {
        if partition.data_handle.is_empty() {
            return Err(OlpError::PreconditionFailed("data handle is missing".into()));
        }
        if context.is_cancelled() {
            return Err(OlpError::Cancelled);
        }

        let hrn = self.catalog.to_catalog_hrn_string();
        let data_handle = partition.data_handle.as_str();
        let mutex_name = format!("{hrn}::{layer}::{data_handle}");

        // Under CacheOnly/OnlineOnly, parallel accesses don't benefit from
        // coalescing the single-blob work, so no mutex is taken at all
        // (spec §4.H step 2 / SPEC_FULL.md §4.H: not merely skipping the
        // cache step).
        let guard = if option.skips_named_mutex() {
            None
        } else {
            // A lock-free peek lets a caller fail fast on an already-sticky
            // error without first queueing behind the current holder (spec
            // §4.C: "may elect to fail fast instead of retrying").
            if let Some(error) = peek_error(&self.mutexes, &mutex_name) {
                tracing::debug!(hrn, key = data_handle, "sticky error found before acquiring, failing fast");
                return Err(error);
            }
            Some(self.mutexes.acquire(&mutex_name, context)?)
        };

        if !option.skips_cache_read() {
            if let Some(bytes) = self.cache.data.get(hrn, layer, data_handle)? {
                tracing::trace!(hrn, key = data_handle, "GetBlobData found in cache");
                return Ok(bytes);
            } else if option.is_cache_only() {
                return Err(OlpError::NotFound("CacheOnly: resource not found in cache".into()));
            }
        }

        if let Some(guard) = &guard {
            if let Some(error) = guard.get_error() {
                tracing::debug!(hrn, key = data_handle, "found error in named mutex, aborting");
                return Err(error);
            }
        }

        let api = match self.lookup.lookup_api(service, "v1", option, context).await {
            Ok(api) => api,
            Err(e) => {
                if let Some(guard) = &guard {
                    guard.set_error(e.clone());
                }
                return Err(e);
            }
        };

        let url = format!("{}/layers/{layer}/data/{data_handle}", api.base_url);
        let request = TransportRequest::get(url)
            .with_billing_tag(billing_tag)
            .with_expected_size_hint(partition.expected_size());

        if context.is_cancelled() {
            return Err(OlpError::Cancelled);
        }
        let response = self.settings.transport.execute(request).await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                if let Some(guard) = &guard {
                    guard.set_error(e.clone());
                }
                return Err(e);
            }
        };

        if !response.is_success() {
            let error = OlpError::from_http_status(response.status, format!("GetBlobData failed for {data_handle}"));
            if response.status == 403 {
                tracing::warn!(hrn, key = data_handle, "GetBlobData 403 received, remove from cache");
                if let Err(e) = self.cache.data.evict(hrn, layer, data_handle) {
                    if self.settings.propagate_all_cache_errors {
                        return Err(e);
                    }
                }
            }
            if let Some(guard) = &guard {
                guard.set_error(error.clone());
            }
            return Err(error);
        }

        if !option.skips_cache_write() {
            if let Err(e) = self.cache.data.put(hrn, layer, data_handle, response.body.clone()) {
                if self.settings.propagate_all_cache_errors {
                    return Err(e);
                }
            }
        }

        if let Some(guard) = &guard {
            guard.clear_error();
        }

        Ok(response.body)
    }
}
