//! Client configuration (spec §6.4): cache, task scheduler, transport,
//! proxy, retry, and authentication settings, assembled through a builder
//! in the teacher's style.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::BlobCache;
use crate::client::transport::Transport;
use crate::error::OlpError;
use crate::model::HrnPartition;
use crate::sync::NamedMutexRegistry;
use crate::task::TaskSink;

/// Proxy transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    Http,
    Socks4,
    Socks5,
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub proxy_type: ProxyType,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Retry policy applied by the transport around each outbound request.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Overrides the default lookup-endpoint table and/or the final catalog
/// endpoint (spec §4.F step 1 and 3).
#[derive(Clone, Default)]
pub struct ApiLookupSettings {
    pub lookup_endpoint_provider: Option<Arc<dyn Fn(HrnPartition) -> Option<String> + Send + Sync>>,
    pub catalog_endpoint_provider: Option<Arc<dyn Fn(&str) -> Option<String> + Send + Sync>>,
}

/// Supplies bearer tokens for authenticated requests. Token *acquisition*
/// (OAuth client-credentials, federated sign-in) is out of scope (spec §1
/// Non-goals); this is only the seam the transport calls into.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, OlpError>;
}

#[derive(Clone)]
pub struct AuthenticationSettings {
    pub token_provider: Arc<dyn TokenProvider>,
    pub token_endpoint_url: String,
}

/// Assembled client configuration. Construct via [`ClientSettingsBuilder`].
pub struct ClientSettings {
    pub cache: Arc<dyn BlobCache>,
    pub task_sink: Arc<TaskSink>,
    pub transport: Arc<dyn Transport>,
    pub proxy: Option<ProxySettings>,
    pub retry: RetrySettings,
    pub default_cache_expiration: Duration,
    pub propagate_all_cache_errors: bool,
    pub api_lookup: ApiLookupSettings,
    pub authentication: Option<AuthenticationSettings>,
    /// Shared across every layer client built from these settings, so two
    /// clients for the same catalog actually coalesce duplicate in-flight
    /// blob fetches (spec §4.C: no static singletons, passed in via
    /// settings instead).
    pub named_mutexes: NamedMutexRegistry,
}

pub struct ClientSettingsBuilder {
    cache: Option<Arc<dyn BlobCache>>,
    task_sink: Option<Arc<TaskSink>>,
    transport: Option<Arc<dyn Transport>>,
    proxy: Option<ProxySettings>,
    retry: RetrySettings,
    default_cache_expiration: Duration,
    propagate_all_cache_errors: bool,
    api_lookup: ApiLookupSettings,
    authentication: Option<AuthenticationSettings>,
    named_mutexes: Option<NamedMutexRegistry>,
}

impl Default for ClientSettingsBuilder {
    fn default() -> Self {
        Self {
            cache: None,
            task_sink: None,
            transport: None,
            proxy: None,
            retry: RetrySettings::default(),
            default_cache_expiration: Duration::from_secs(crate::cache::DEFAULT_LOOKUP_TTL_S as u64),
            propagate_all_cache_errors: false,
            api_lookup: ApiLookupSettings::default(),
            authentication: None,
            named_mutexes: None,
        }
    }
}

impl ClientSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(mut self, cache: Arc<dyn BlobCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn task_sink(mut self, task_sink: Arc<TaskSink>) -> Self {
        self.task_sink = Some(task_sink);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn default_cache_expiration(mut self, expiration: Duration) -> Self {
        self.default_cache_expiration = expiration;
        self
    }

    pub fn propagate_all_cache_errors(mut self, propagate: bool) -> Self {
        self.propagate_all_cache_errors = propagate;
        self
    }

    pub fn api_lookup(mut self, api_lookup: ApiLookupSettings) -> Self {
        self.api_lookup = api_lookup;
        self
    }

    pub fn authentication(mut self, authentication: AuthenticationSettings) -> Self {
        self.authentication = Some(authentication);
        self
    }

    /// Overrides the named-mutex registry layer clients built from these
    /// settings share. Only useful when wiring several `ClientSettings`
    /// instances to coalesce the same duplicate in-flight work.
    pub fn named_mutexes(mut self, named_mutexes: NamedMutexRegistry) -> Self {
        self.named_mutexes = Some(named_mutexes);
        self
    }

    /// Defaults `cache` to an in-memory cache and `task_sink` to a 4-thread
    /// pool when not explicitly set, so the client is usable out of the
    /// box for tests and small deployments.
    pub fn build(self) -> Result<ClientSettings, OlpError> {
        let transport = self
            .transport
            .ok_or_else(|| OlpError::InvalidArgument("ClientSettings requires a transport".into()))?;

        Ok(ClientSettings {
            cache: self
                .cache
                .unwrap_or_else(|| Arc::new(crate::cache::InMemoryBlobCache::default())),
            task_sink: self.task_sink.unwrap_or_else(|| Arc::new(TaskSink::new(4))),
            transport,
            proxy: self.proxy,
            retry: self.retry,
            default_cache_expiration: self.default_cache_expiration,
            propagate_all_cache_errors: self.propagate_all_cache_errors,
            api_lookup: self.api_lookup,
            authentication: self.authentication,
            named_mutexes: self.named_mutexes.unwrap_or_default(),
        })
    }
}
