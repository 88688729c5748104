//! Resolves (catalog, service, version) to a base URL (spec §4.F).
//!
//! Grounded directly on `ApiLookupClientImpl::LookupApi`'s algorithm:
//! static override first, then cache, then the online `/apis` call
//! (platform scope for `config`, resource scope otherwise), writing every
//! returned service/version pair back into the cache before searching for
//! the one requested.

use std::sync::Arc;

use crate::cache::CacheFacade;
use crate::client::endpoints::default_lookup_url;
use crate::client::settings::ClientSettings;
use crate::client::transport::{ApiEntry, TransportRequest};
use crate::context::CancellationContext;
use crate::error::{OlpError, OlpResult};
use crate::model::{FetchOption, Hrn};

/// The resolved endpoint for one (service, version) pair.
#[derive(Debug, Clone)]
pub struct ApiClient {
    pub base_url: String,
}

pub struct ApiLookupClient {
    catalog: Hrn,
    settings: Arc<ClientSettings>,
    cache: Arc<CacheFacade>,
    lookup_base_url: String,
}

impl ApiLookupClient {
    pub fn new(catalog: Hrn, settings: Arc<ClientSettings>, cache: Arc<CacheFacade>) -> Self {
        let lookup_base_url = settings
            .api_lookup
            .lookup_endpoint_provider
            .as_ref()
            .and_then(|provider| provider(catalog.partition()))
            .unwrap_or_else(|| default_lookup_url(catalog.partition()));

        Self {
            catalog,
            settings,
            cache,
            lookup_base_url,
        }
    }

    /// Step 1 of spec §4.F: a user-supplied `catalog_endpoint_provider`
    /// short-circuits everything else when it yields a non-empty URL.
    fn static_override(&self) -> Option<ApiClient> {
        let provider = self.settings.api_lookup.catalog_endpoint_provider.as_ref()?;
        let url = provider(self.catalog.as_str())?;
        if url.is_empty() {
            return None;
        }
        Some(ApiClient {
            base_url: format!("{url}/catalogs/{}", self.catalog.to_catalog_hrn_string()),
        })
    }

    pub async fn lookup_api(
        &self,
        service: &str,
        service_version: &str,
        option: FetchOption,
        context: &CancellationContext,
    ) -> OlpResult<ApiClient> {
        if let Some(client) = self.static_override() {
            return Ok(client);
        }

        let hrn = self.catalog.to_catalog_hrn_string();

        if !matches!(option, FetchOption::OnlineOnly | FetchOption::CacheWithUpdate) {
            if let Some(url) = self.cache.api.get(hrn, service, service_version)? {
                return Ok(ApiClient { base_url: url });
            } else if option.is_cache_only() {
                return Err(OlpError::NotFound(format!(
                    "CacheOnly: api lookup for {service}/{service_version} not found in cache"
                )));
            }
        }

        if context.is_cancelled() {
            return Err(OlpError::Cancelled);
        }

        let url = if service == "config" {
            format!("{}/platform/apis", self.lookup_base_url)
        } else {
            format!("{}/resources/{hrn}/apis", self.lookup_base_url)
        };

        let response = self
            .settings
            .transport
            .execute(TransportRequest::get(url))
            .await?;

        if !response.is_success() {
            return Err(OlpError::from_http_status(
                response.status,
                format!("api lookup for {service}/{service_version} failed"),
            ));
        }

        let entries: Vec<ApiEntry> = serde_json::from_slice(&response.body)
            .map_err(|e| OlpError::Unknown(format!("malformed /apis response: {e}")))?;

        if !matches!(option, FetchOption::OnlineOnly | FetchOption::CacheWithUpdate) {
            let ttl = response.max_age_s.unwrap_or(crate::cache::DEFAULT_LOOKUP_TTL_S);
            for entry in &entries {
                self.cache
                    .api
                    .put(hrn, &entry.api, &entry.version, &entry.base_url, ttl)?;
            }
        }

        entries
            .into_iter()
            .find(|e| e.api == service && e.version == service_version)
            .map(|e| ApiClient { base_url: e.base_url })
            .ok_or_else(|| {
                OlpError::ServiceUnavailable(format!(
                    "service/version not available for this catalog: {service}/{service_version}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryBlobCache;
    use crate::client::settings::ClientSettingsBuilder;
    use crate::client::transport::{Transport, TransportResponse};
    use async_trait::async_trait;
    use bytes::Bytes;
    use uuid::Uuid;

    struct FakeTransport {
        body: Bytes,
        status: u16,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn execute(&self, _request: TransportRequest) -> OlpResult<TransportResponse> {
            Ok(TransportResponse {
                status: self.status,
                body: self.body.clone(),
                max_age_s: None,
            })
        }
        fn cancel(&self, _request_id: Uuid) {}
    }

    fn settings_with(body: &'static str, status: u16) -> Arc<ClientSettings> {
        Arc::new(
            ClientSettingsBuilder::new()
                .transport(Arc::new(FakeTransport {
                    body: Bytes::from_static(body.as_bytes()),
                    status,
                }))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn cache_hit_skips_network() {
        let settings = settings_with("[]", 200);
        let cache = Arc::new(CacheFacade::new(Arc::new(InMemoryBlobCache::default()), 3600));
        cache
            .api
            .put("hrn:here:data::x:y", "blob", "v1", "https://cached.example.com", 3600)
            .unwrap();

        let catalog = Hrn::new("hrn:here:data::x:y").unwrap();
        let client = ApiLookupClient::new(catalog, Arc::clone(&settings), cache);
        let ctx = CancellationContext::new();
        let resolved = client
            .lookup_api("blob", "v1", FetchOption::OnlineIfNotFound, &ctx)
            .await
            .unwrap();
        assert_eq!(resolved.base_url, "https://cached.example.com");
    }

    #[tokio::test]
    async fn cache_only_miss_is_not_found() {
        let settings = settings_with("[]", 200);
        let cache = Arc::new(CacheFacade::new(Arc::new(InMemoryBlobCache::default()), 3600));
        let catalog = Hrn::new("hrn:here:data::x:y").unwrap();
        let client = ApiLookupClient::new(catalog, settings, cache);
        let ctx = CancellationContext::new();
        let result = client.lookup_api("blob", "v1", FetchOption::CacheOnly, &ctx).await;
        assert!(matches!(result, Err(OlpError::NotFound(_))));
    }

    #[tokio::test]
    async fn online_success_populates_cache_and_returns_requested_service() {
        let body = r#"[{"api":"blob","version":"v1","baseURL":"https://blob.example.com"},{"api":"query","version":"v1","baseURL":"https://query.example.com"}]"#;
        let settings = settings_with(body, 200);
        let cache = Arc::new(CacheFacade::new(Arc::new(InMemoryBlobCache::default()), 3600));
        let catalog = Hrn::new("hrn:here:data::x:y").unwrap();
        let client = ApiLookupClient::new(catalog, Arc::clone(&settings), Arc::clone(&cache));
        let ctx = CancellationContext::new();

        let resolved = client
            .lookup_api("blob", "v1", FetchOption::OnlineIfNotFound, &ctx)
            .await
            .unwrap();
        assert_eq!(resolved.base_url, "https://blob.example.com");

        assert_eq!(
            cache.api.get("hrn:here:data::x:y", "query", "v1").unwrap(),
            Some("https://query.example.com".to_string())
        );
    }

    #[tokio::test]
    async fn requested_service_absent_from_response_is_service_unavailable() {
        let body = r#"[{"api":"query","version":"v1","baseURL":"https://query.example.com"}]"#;
        let settings = settings_with(body, 200);
        let cache = Arc::new(CacheFacade::new(Arc::new(InMemoryBlobCache::default()), 3600));
        let catalog = Hrn::new("hrn:here:data::x:y").unwrap();
        let client = ApiLookupClient::new(catalog, settings, cache);
        let ctx = CancellationContext::new();
        let result = client.lookup_api("blob", "v1", FetchOption::OnlineIfNotFound, &ctx).await;
        assert!(matches!(result, Err(OlpError::ServiceUnavailable(_))));
    }
}
