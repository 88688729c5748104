//! The network transport boundary (spec §1 Non-goals: "HTTP transport,
//! TLS, proxy handling, per-platform network backends" are external
//! collaborators). Every repository in this crate talks to the network
//! only through [`Transport`]; the default [`ReqwestTransport`] is the one
//! concrete implementation the crate carries so it is testable end to end
//! without a mock in every call site.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::OlpError;

/// The HTTP method of a [`TransportRequest`]. The blob/partition/lookup
/// read paths only ever need `Get`; the streaming subscribe/poll/seek
/// surface (§6.3) needs the other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// A single outbound request. `request_id` is surfaced so a caller holding
/// a cancellation token can invoke [`Transport::cancel`] for exactly this
/// in-flight call.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub request_id: Uuid,
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub range: Option<(u64, Option<u64>)>,
    pub body: Option<Bytes>,
    /// A known response size to preallocate the destination buffer with
    /// (spec §4.H step 6: only applied when the size is known and below
    /// the repository's preallocation ceiling).
    pub expected_size_hint: Option<u64>,
}

impl TransportRequest {
    fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method,
            url: url.into(),
            headers: Vec::new(),
            range: None,
            body: None,
            expected_size_hint: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// `POST` with a JSON body (spec §6.3: subscribe, the one POST the
    /// streaming surface issues).
    pub fn post(url: impl Into<String>, body: Bytes) -> Self {
        let mut request = Self::new(HttpMethod::Post, url);
        request.body = Some(body);
        request
    }

    /// `PUT` with a JSON body (spec §6.3: commit offsets, seek).
    pub fn put(url: impl Into<String>, body: Bytes) -> Self {
        let mut request = Self::new(HttpMethod::Put, url);
        request.body = Some(body);
        request
    }

    /// `DELETE` with no body (spec §6.3: unsubscribe).
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_billing_tag(self, billing_tag: Option<&str>) -> Self {
        match billing_tag {
            Some(tag) => self.with_header("billingTag", tag),
            None => self,
        }
    }

    pub fn with_expected_size_hint(mut self, size: Option<u64>) -> Self {
        self.expected_size_hint = size;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Bytes,
    /// `Cache-Control: max-age=…`, parsed, when present.
    pub max_age_s: Option<i64>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The network seam. `async_trait` is used (as in the teacher's async
/// service boundaries) so the trait stays object-safe for `Arc<dyn
/// Transport>` in [`crate::client::settings::ClientSettings`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, OlpError>;

    /// Best-effort cancellation of an in-flight request by id. A transport
    /// that cannot cancel mid-flight may no-op; the caller's cancellation
    /// context still short-circuits once control returns to it.
    fn cancel(&self, request_id: Uuid);
}

/// Preallocation ceiling mirroring the blob repository's own (spec §4.H
/// step 6): above this, stream into the default growable buffer instead.
const MAX_PREALLOCATE_BYTES: u64 = 10 * 1024 * 1024;

fn parse_max_age(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    let raw = headers.get(reqwest::header::CACHE_CONTROL)?.to_str().ok()?;
    raw.split(',').find_map(|directive| {
        let directive = directive.trim();
        let value = directive.strip_prefix("max-age=")?;
        value.parse::<i64>().ok()
    })
}

/// Default [`Transport`] backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    in_flight: Arc<DashMap<Uuid, Arc<Notify>>>,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, OlpError> {
        Self::with_timeout(Duration::from_secs(60))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, OlpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OlpError::Unknown(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            in_flight: Arc::new(DashMap::new()),
        })
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new().expect("default reqwest client configuration is always valid")
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, OlpError> {
        let notify = Arc::new(Notify::new());
        self.in_flight.insert(request.request_id, Arc::clone(&notify));

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some((start, end)) = request.range {
            let range_value = match end {
                Some(end) => format!("bytes={start}-{end}"),
                None => format!("bytes={start}-"),
            };
            builder = builder.header(reqwest::header::RANGE, range_value);
        }
        if let Some(body) = request.body.clone() {
            builder = builder.header(reqwest::header::CONTENT_TYPE, "application/json").body(body);
        }

        let result = tokio::select! {
            response = builder.send() => response,
            _ = notify.notified() => {
                self.in_flight.remove(&request.request_id);
                return Err(OlpError::Cancelled);
            }
        };
        self.in_flight.remove(&request.request_id);

        let response = result.map_err(|e| {
            if e.is_timeout() {
                OlpError::RequestTimeout
            } else {
                OlpError::Unknown(format!("transport error: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let max_age_s = parse_max_age(response.headers());

        let body = match request.expected_size_hint {
            Some(size) if size <= MAX_PREALLOCATE_BYTES => {
                let mut buffer = Vec::with_capacity(size as usize);
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| OlpError::Unknown(format!("failed to read response body: {e}")))?;
                    buffer.extend_from_slice(&chunk);
                }
                Bytes::from(buffer)
            }
            _ => response
                .bytes()
                .await
                .map_err(|e| OlpError::Unknown(format!("failed to read response body: {e}")))?,
        };

        Ok(TransportResponse {
            status,
            body,
            max_age_s,
        })
    }

    fn cancel(&self, request_id: Uuid) {
        if let Some((_, notify)) = self.in_flight.remove(&request_id) {
            notify.notify_waiters();
        }
    }
}

/// Wire shape of one `/apis` entry (spec §6.3).
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEntry {
    pub api: String,
    pub version: String,
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Wire shape of `{partitions: [...]}` from the query endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PartitionsResponse {
    pub partitions: Vec<WirePartition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WirePartition {
    pub partition: String,
    #[serde(rename = "dataHandle")]
    pub data_handle: String,
    pub version: Option<i64>,
    pub checksum: Option<String>,
    pub crc: Option<String>,
    #[serde(rename = "dataSize")]
    pub data_size: Option<u64>,
    #[serde(rename = "compressedDataSize")]
    pub compressed_data_size: Option<u64>,
}

impl From<WirePartition> for crate::model::Partition {
    fn from(w: WirePartition) -> Self {
        crate::model::Partition {
            partition_id: w.partition,
            data_handle: w.data_handle,
            version: w.version,
            checksum: w.checksum,
            crc: w.crc,
            data_size: w.data_size,
            compressed_data_size: w.compressed_data_size,
        }
    }
}
