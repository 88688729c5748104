//! The streaming layer client (spec §4.J, §6.3): subscribe/poll/seek/
//! unsubscribe against a stream-service node, plus `get_data` for a
//! message's payload.
//!
//! Grounded on `StreamLayerClientImpl`'s subscribe/poll/seek contract
//! (`generated/api/StreamApi.h`): `subscribe` resolves the stream service
//! once through the API lookup client, then every subsequent call targets
//! the node-specific base URL the subscribe response hands back, with the
//! `X-Correlation-Id` header round-tripped on every request in the session.

use std::future::Future;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cache::CacheFacade;
use crate::client::api_lookup::ApiLookupClient;
use crate::client::settings::ClientSettings;
use crate::client::transport::TransportRequest;
use crate::context::CancellationContext;
use crate::error::{OlpError, OlpResult};
use crate::model::{FetchOption, Hrn, Partition};
use crate::repository::DataRepository;
use crate::task::NORMAL_PRIORITY;

use super::core::block_on;

/// How partitions are distributed across consumers in the same group
/// (spec §6.3 `subscribe`'s `mode` query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    Serial,
    Parallel,
}

impl SubscriptionMode {
    fn as_query_value(self) -> &'static str {
        match self {
            SubscriptionMode::Serial => "serial",
            SubscriptionMode::Parallel => "parallel",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeRequest {
    pub subscription_mode: Option<SubscriptionMode>,
    pub consumer_group: Option<String>,
}

impl SubscribeRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subscription_mode(mut self, mode: SubscriptionMode) -> Self {
        self.subscription_mode = Some(mode);
        self
    }

    pub fn with_consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }
}

/// A message's commit position: which partition it came from and its
/// offset within that partition's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageOffset {
    pub partition: i32,
    pub offset: i64,
}

/// One polled message. `inline_data` is present when the stream service
/// embedded the payload directly instead of handing back a data handle to
/// fetch separately.
#[derive(Debug, Clone)]
pub struct Message {
    pub partition_id: String,
    pub data_handle: Option<String>,
    pub inline_data: Option<Bytes>,
    pub offset: MessageOffset,
}

/// Session context established by `subscribe` and required by every other
/// streaming operation (spec §4.J).
#[derive(Debug, Clone)]
struct StreamSession {
    subscription_id: String,
    subscription_mode: SubscriptionMode,
    correlation_id: String,
    node_base_url: String,
}

#[derive(Debug, Deserialize)]
struct SubscribeResponseWire {
    #[serde(rename = "nodeBaseURL")]
    node_base_url: String,
    #[serde(rename = "subscriptionId")]
    subscription_id: String,
}

#[derive(Debug, Deserialize)]
struct MessageMetaDataWire {
    partition: String,
    #[serde(rename = "dataHandle")]
    data_handle: Option<String>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageWire {
    #[serde(rename = "metaData")]
    meta_data: MessageMetaDataWire,
    offset: MessageOffset,
}

#[derive(Debug, Deserialize)]
struct PollResponseWire {
    messages: Vec<MessageWire>,
}

#[derive(Debug, Serialize)]
struct SeekRequestWire {
    offsets: Vec<MessageOffset>,
}

#[derive(Debug, Serialize)]
struct CommitOffsetsRequestWire {
    offsets: Vec<MessageOffset>,
}

const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";

fn require_session(session: &Mutex<Option<StreamSession>>) -> OlpResult<StreamSession> {
    session
        .lock()
        .clone()
        .ok_or_else(|| OlpError::PreconditionFailed("not subscribed to this stream layer".into()))
}

/// A client for one stream layer's subscription lifecycle.
pub struct StreamLayerClient {
    catalog: Hrn,
    layer: String,
    settings: Arc<ClientSettings>,
    lookup: Arc<ApiLookupClient>,
    data_repo: Arc<DataRepository>,
    session: Arc<Mutex<Option<StreamSession>>>,
}

impl StreamLayerClient {
    pub fn new(catalog: Hrn, layer: impl Into<String>, settings: Arc<ClientSettings>) -> Self {
        let layer = layer.into();
        let cache = Arc::new(CacheFacade::new(
            Arc::clone(&settings.cache),
            settings.default_cache_expiration.as_secs() as i64,
        ));
        let lookup = Arc::new(ApiLookupClient::new(catalog.clone(), Arc::clone(&settings), Arc::clone(&cache)));
        let data_repo = Arc::new(DataRepository::new(
            catalog.clone(),
            Arc::clone(&settings),
            Arc::clone(&lookup),
            cache,
            settings.named_mutexes.clone(),
        ));
        Self {
            catalog,
            layer,
            settings,
            lookup,
            data_repo,
            session: Arc::new(Mutex::new(None)),
        }
    }

    fn hrn(&self) -> &str {
        self.catalog.to_catalog_hrn_string()
    }

    async fn run_subscribe(
        layer: String,
        hrn: String,
        mode: SubscriptionMode,
        consumer_group: Option<String>,
        lookup: Arc<ApiLookupClient>,
        transport: Arc<dyn crate::client::transport::Transport>,
        session: Arc<Mutex<Option<StreamSession>>>,
        ctx: &CancellationContext,
    ) -> OlpResult<String> {
        if session.lock().is_some() {
            return Err(OlpError::PreconditionFailed("already subscribed to this stream layer".into()));
        }
        if ctx.is_cancelled() {
            return Err(OlpError::Cancelled);
        }

        let api = lookup.lookup_api("stream", "v2", FetchOption::OnlineIfNotFound, ctx).await?;
        let mut url = format!("{}/layers/{layer}/subscribe?mode={}", api.base_url, mode.as_query_value());
        if let Some(group) = &consumer_group {
            url.push_str(&format!("&consumerGroup={group}"));
        }

        let response = transport.execute(TransportRequest::post(url, Bytes::new())).await?;
        if !response.is_success() {
            return Err(OlpError::from_http_status(response.status, format!("subscribe failed for {hrn}/{layer}")));
        }

        let parsed: SubscribeResponseWire =
            serde_json::from_slice(&response.body).map_err(|e| OlpError::Unknown(format!("malformed subscribe response: {e}")))?;

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let subscription_id = parsed.subscription_id.clone();
        *session.lock() = Some(StreamSession {
            subscription_id: parsed.subscription_id,
            subscription_mode: mode,
            correlation_id,
            node_base_url: parsed.node_base_url,
        });
        Ok(subscription_id)
    }

    /// Establishes a subscription, storing the session context every other
    /// operation requires. Fails with `PreconditionFailed` if a
    /// subscription is already active (spec §4.J).
    pub fn subscribe(&self, request: SubscribeRequest, context: CancellationContext) -> impl Future<Output = OlpResult<String>> {
        let layer = self.layer.clone();
        let hrn = self.hrn().to_string();
        let mode = request.subscription_mode.unwrap_or(SubscriptionMode::Serial);
        let consumer_group = request.consumer_group.clone();
        let lookup = Arc::clone(&self.lookup);
        let transport = Arc::clone(&self.settings.transport);
        let session = Arc::clone(&self.session);
        let task_sink = Arc::clone(&self.settings.task_sink);

        let (tx, rx) = tokio::sync::oneshot::channel();
        task_sink.submit(
            move |ctx: &CancellationContext| block_on(Self::run_subscribe(layer, hrn, mode, consumer_group, lookup, transport, session, ctx)),
            move |result| {
                let _ = tx.send(result);
            },
            NORMAL_PRIORITY,
            &context,
        );
        async move { rx.await.unwrap_or(Err(OlpError::Cancelled)) }
    }

    async fn run_unsubscribe(
        layer: String,
        transport: Arc<dyn crate::client::transport::Transport>,
        session: Arc<Mutex<Option<StreamSession>>>,
        ctx: &CancellationContext,
    ) -> OlpResult<()> {
        let active = require_session(&session)?;
        if ctx.is_cancelled() {
            return Err(OlpError::Cancelled);
        }
        let url = format!(
            "{}/layers/{layer}/subscribe?subscriptionId={}&mode={}",
            active.node_base_url,
            active.subscription_id,
            active.subscription_mode.as_query_value()
        );
        let request = TransportRequest::delete(url).with_header(CORRELATION_ID_HEADER, active.correlation_id.clone());
        let response = transport.execute(request).await?;
        if !response.is_success() {
            return Err(OlpError::from_http_status(response.status, "unsubscribe failed"));
        }
        *session.lock() = None;
        Ok(())
    }

    /// Tears down the active subscription. Fails with `PreconditionFailed`
    /// if there is none (spec §4.J).
    pub fn unsubscribe(&self, context: CancellationContext) -> impl Future<Output = OlpResult<()>> {
        let layer = self.layer.clone();
        let transport = Arc::clone(&self.settings.transport);
        let session = Arc::clone(&self.session);
        let task_sink = Arc::clone(&self.settings.task_sink);

        let (tx, rx) = tokio::sync::oneshot::channel();
        task_sink.submit(
            move |ctx: &CancellationContext| block_on(Self::run_unsubscribe(layer, transport, session, ctx)),
            move |result| {
                let _ = tx.send(result);
            },
            NORMAL_PRIORITY,
            &context,
        );
        async move { rx.await.unwrap_or(Err(OlpError::Cancelled)) }
    }

    async fn run_poll(
        layer: String,
        transport: Arc<dyn crate::client::transport::Transport>,
        session: Arc<Mutex<Option<StreamSession>>>,
        ctx: &CancellationContext,
    ) -> OlpResult<Vec<Message>> {
        let active = require_session(&session)?;
        if ctx.is_cancelled() {
            return Err(OlpError::Cancelled);
        }
        let url = format!(
            "{}/layers/{layer}/partitions?subscriptionId={}&mode={}",
            active.node_base_url,
            active.subscription_id,
            active.subscription_mode.as_query_value()
        );
        let request = TransportRequest::get(url).with_header(CORRELATION_ID_HEADER, active.correlation_id.clone());
        let response = transport.execute(request).await?;
        if !response.is_success() {
            return Err(OlpError::from_http_status(response.status, "poll failed"));
        }
        let parsed: PollResponseWire =
            serde_json::from_slice(&response.body).map_err(|e| OlpError::Unknown(format!("malformed poll response: {e}")))?;

        let offsets: Vec<MessageOffset> = parsed.messages.iter().map(|m| m.offset).collect();
        if !offsets.is_empty() {
            let commit_url = format!(
                "{}/layers/{layer}/offsets?subscriptionId={}&mode={}",
                active.node_base_url,
                active.subscription_id,
                active.subscription_mode.as_query_value()
            );
            let body = Bytes::from(
                serde_json::to_vec(&CommitOffsetsRequestWire { offsets }).map_err(|e| OlpError::Unknown(format!("failed to encode offset commit: {e}")))?,
            );
            let commit_request = TransportRequest::put(commit_url, body).with_header(CORRELATION_ID_HEADER, active.correlation_id.clone());
            let commit_response = transport.execute(commit_request).await?;
            if !commit_response.is_success() {
                return Err(OlpError::from_http_status(commit_response.status, "offset commit failed"));
            }
        }

        Ok(parsed
            .messages
            .into_iter()
            .map(|m| Message {
                partition_id: m.meta_data.partition,
                data_handle: m.meta_data.data_handle,
                inline_data: m.meta_data.data.and_then(|d| general_purpose::STANDARD.decode(d).ok()).map(Bytes::from),
                offset: m.offset,
            })
            .collect())
    }

    /// Polls for new messages, auto-committing their offsets before
    /// returning them to the caller (spec §4.J: "offsets returned by `poll`
    /// are automatically committed before the messages are returned").
    pub fn poll(&self, context: CancellationContext) -> impl Future<Output = OlpResult<Vec<Message>>> {
        let layer = self.layer.clone();
        let transport = Arc::clone(&self.settings.transport);
        let session = Arc::clone(&self.session);
        let task_sink = Arc::clone(&self.settings.task_sink);

        let (tx, rx) = tokio::sync::oneshot::channel();
        task_sink.submit(
            move |ctx: &CancellationContext| block_on(Self::run_poll(layer, transport, session, ctx)),
            move |result| {
                let _ = tx.send(result);
            },
            NORMAL_PRIORITY,
            &context,
        );
        async move { rx.await.unwrap_or(Err(OlpError::Cancelled)) }
    }

    async fn run_seek(
        layer: String,
        offsets: Vec<MessageOffset>,
        transport: Arc<dyn crate::client::transport::Transport>,
        session: Arc<Mutex<Option<StreamSession>>>,
        ctx: &CancellationContext,
    ) -> OlpResult<()> {
        let active = require_session(&session)?;
        if ctx.is_cancelled() {
            return Err(OlpError::Cancelled);
        }
        let url = format!(
            "{}/layers/{layer}/seek?subscriptionId={}&mode={}",
            active.node_base_url,
            active.subscription_id,
            active.subscription_mode.as_query_value()
        );
        let body =
            Bytes::from(serde_json::to_vec(&SeekRequestWire { offsets }).map_err(|e| OlpError::Unknown(format!("failed to encode seek body: {e}")))?);
        let request = TransportRequest::put(url, body).with_header(CORRELATION_ID_HEADER, active.correlation_id.clone());
        let response = transport.execute(request).await?;
        if !response.is_success() {
            return Err(OlpError::from_http_status(response.status, "seek failed"));
        }
        Ok(())
    }

    /// Rewinds consumption to the given per-partition offsets. Fails with
    /// `PreconditionFailed` if not currently subscribed (spec §4.J).
    pub fn seek(&self, offsets: Vec<MessageOffset>, context: CancellationContext) -> impl Future<Output = OlpResult<()>> {
        let layer = self.layer.clone();
        let transport = Arc::clone(&self.settings.transport);
        let session = Arc::clone(&self.session);
        let task_sink = Arc::clone(&self.settings.task_sink);

        let (tx, rx) = tokio::sync::oneshot::channel();
        task_sink.submit(
            move |ctx: &CancellationContext| block_on(Self::run_seek(layer, offsets, transport, session, ctx)),
            move |result| {
                let _ = tx.send(result);
            },
            NORMAL_PRIORITY,
            &context,
        );
        async move { rx.await.unwrap_or(Err(OlpError::Cancelled)) }
    }

    async fn run_get_data(
        layer: String,
        message: Message,
        data_repo: Arc<DataRepository>,
        session: Arc<Mutex<Option<StreamSession>>>,
        ctx: &CancellationContext,
    ) -> OlpResult<Bytes> {
        require_session(&session)?;
        if let Some(bytes) = message.inline_data {
            return Ok(bytes);
        }
        let data_handle = message
            .data_handle
            .ok_or_else(|| OlpError::PreconditionFailed("message carries neither inline data nor a data handle".into()))?;
        let partition = Partition::new(message.partition_id, data_handle);
        data_repo.get_blob(&layer, "blob", &partition, FetchOption::OnlineIfNotFound, None, ctx).await
    }

    /// Fetches a message's payload: returned directly if the stream
    /// service inlined it, otherwise resolved through the blob repository
    /// by data handle (spec §4.J `get_data(message)`).
    pub fn get_data(&self, message: Message, context: CancellationContext) -> impl Future<Output = OlpResult<Bytes>> {
        let layer = self.layer.clone();
        let data_repo = Arc::clone(&self.data_repo);
        let session = Arc::clone(&self.session);
        let task_sink = Arc::clone(&self.settings.task_sink);

        let (tx, rx) = tokio::sync::oneshot::channel();
        task_sink.submit(
            move |ctx: &CancellationContext| block_on(Self::run_get_data(layer, message, data_repo, session, ctx)),
            move |result| {
                let _ = tx.send(result);
            },
            NORMAL_PRIORITY,
            &context,
        );
        async move { rx.await.unwrap_or(Err(OlpError::Cancelled)) }
    }

    /// Cancels every task this client's task sink is currently running.
    pub fn cancel_pending_requests(&self) {
        self.settings.task_sink.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryBlobCache;
    use crate::client::settings::ClientSettingsBuilder;
    use crate::client::transport::{HttpMethod, Transport, TransportResponse};
    use async_trait::async_trait;
    use parking_lot::Mutex as StdMutex;
    use uuid::Uuid;

    struct FakeStreamTransport {
        subscribed: StdMutex<bool>,
    }

    #[async_trait]
    impl Transport for FakeStreamTransport {
        async fn execute(&self, request: TransportRequest) -> OlpResult<TransportResponse> {
            if request.url.ends_with("/apis") {
                return Ok(TransportResponse {
                    status: 200,
                    body: Bytes::from_static(br#"[{"api":"stream","version":"v2","baseURL":"https://stream.example.com"}]"#),
                    max_age_s: None,
                });
            }
            if request.url.contains("/subscribe") && request.method == HttpMethod::Post {
                *self.subscribed.lock() = true;
                return Ok(TransportResponse {
                    status: 200,
                    body: Bytes::from_static(br#"{"nodeBaseURL":"https://node-1.example.com","subscriptionId":"sub-1"}"#),
                    max_age_s: None,
                });
            }
            if request.url.contains("/partitions") {
                return Ok(TransportResponse {
                    status: 200,
                    body: Bytes::from_static(
                        br#"{"messages":[{"metaData":{"partition":"p1","dataHandle":"H1"},"offset":{"partition":0,"offset":5}}]}"#,
                    ),
                    max_age_s: None,
                });
            }
            if request.url.contains("/offsets") || request.url.contains("/seek") {
                return Ok(TransportResponse {
                    status: 200,
                    body: Bytes::new(),
                    max_age_s: None,
                });
            }
            if request.url.contains("/subscribe") && request.method == HttpMethod::Delete {
                *self.subscribed.lock() = false;
                return Ok(TransportResponse {
                    status: 200,
                    body: Bytes::new(),
                    max_age_s: None,
                });
            }
            Ok(TransportResponse {
                status: 200,
                body: Bytes::from_static(b"blob-bytes"),
                max_age_s: None,
            })
        }
        fn cancel(&self, _request_id: Uuid) {}
    }

    fn client() -> StreamLayerClient {
        let settings = Arc::new(
            ClientSettingsBuilder::new()
                .transport(Arc::new(FakeStreamTransport { subscribed: StdMutex::new(false) }))
                .cache(Arc::new(InMemoryBlobCache::default()))
                .task_sink(Arc::new(crate::task::TaskSink::new(2)))
                .build()
                .unwrap(),
        );
        let catalog = Hrn::new("hrn:here:data::olp-here-test:hereos-internal-test-v2").unwrap();
        StreamLayerClient::new(catalog, "a-stream-layer", settings)
    }

    #[tokio::test]
    async fn poll_before_subscribe_is_precondition_failed() {
        let client = client();
        let result = client.poll(CancellationContext::new()).await;
        assert!(matches!(result, Err(OlpError::PreconditionFailed(_))));
    }

    #[tokio::test]
    async fn subscribe_then_double_subscribe_fails() {
        let client = client();
        client.subscribe(SubscribeRequest::new(), CancellationContext::new()).await.unwrap();
        let second = client.subscribe(SubscribeRequest::new(), CancellationContext::new()).await;
        assert!(matches!(second, Err(OlpError::PreconditionFailed(_))));
    }

    #[tokio::test]
    async fn poll_after_subscribe_returns_and_commits_messages() {
        let client = client();
        client.subscribe(SubscribeRequest::new(), CancellationContext::new()).await.unwrap();
        let messages = client.poll(CancellationContext::new()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].partition_id, "p1");
        assert_eq!(messages[0].offset, MessageOffset { partition: 0, offset: 5 });
    }

    #[tokio::test]
    async fn unsubscribe_allows_a_fresh_subscribe() {
        let client = client();
        client.subscribe(SubscribeRequest::new(), CancellationContext::new()).await.unwrap();
        client.unsubscribe(CancellationContext::new()).await.unwrap();
        client.subscribe(SubscribeRequest::new(), CancellationContext::new()).await.unwrap();
    }
}
