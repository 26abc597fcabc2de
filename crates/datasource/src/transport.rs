//! HTTP seam for ranged reads.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use reqwest::header::{
    ACCEPT_ENCODING, ACCEPT_RANGES, CONTENT_RANGE, HeaderMap, HeaderName, HeaderValue, RANGE,
};
use tracing::{debug, warn};

use crate::config::HttpSourceConfig;
use crate::error::DataSourceError;

/// Inclusive byte range; an open end reads to the end of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// `Range` header value.
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{end}", self.start),
            None => format!("bytes={}-", self.start),
        }
    }
}

/// Parsed `Content-Range: bytes <start>-<end>/<total>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn len(&self) -> Option<u64> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end >= start => Some(end - start + 1),
            _ => None,
        }
    }
}

pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    let (start, end) = match span.trim() {
        "*" => (None, None),
        span => {
            let (s, e) = span.split_once('-')?;
            (Some(s.trim().parse().ok()?), Some(e.trim().parse().ok()?))
        }
    };
    Some(ContentRange { start, end, total })
}

pub type ByteStream = BoxStream<'static, Result<Bytes, DataSourceError>>;

pub struct RangeResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub accept_ranges: bool,
    pub content_range: Option<ContentRange>,
    pub body: ByteStream,
}

impl RangeResponse {
    /// Size of the whole resource, when the response reveals it.
    pub fn total_length(&self) -> Option<u64> {
        match self.content_range {
            Some(range) => range.total,
            None if self.status == 200 => self.content_length,
            None => None,
        }
    }

    pub fn supports_ranges(&self) -> bool {
        self.accept_ranges || self.content_range.is_some()
    }

    /// Whether the body starts at the requested offset rather than at zero.
    pub fn is_partial(&self) -> bool {
        self.status == 206 || self.content_range.is_some()
    }
}

impl std::fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("accept_ranges", &self.accept_ranges)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait RangeTransport: Send + Sync {
    /// GET `url`, optionally with a `Range` header. Non-2xx statuses are errors.
    async fn fetch(
        &self,
        url: &str,
        range: Option<ByteRange>,
    ) -> Result<RangeResponse, DataSourceError>;
}

#[async_trait]
impl<T: RangeTransport + ?Sized> RangeTransport for Arc<T> {
    async fn fetch(
        &self,
        url: &str,
        range: Option<ByteRange>,
    ) -> Result<RangeResponse, DataSourceError> {
        (**self).fetch(url, range).await
    }
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &HttpSourceConfig) -> Result<Client, DataSourceError> {
    // A second install from another crate is harmless; only the first one wins.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut headers = HeaderMap::new();
    // Compressed bodies would break byte offsets.
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    for (name, value) in &config.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Invalid header in config; skipping"),
        }
    }

    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .pool_max_idle_per_host(8);

    if !config.connect_timeout.is_zero() {
        builder = builder.connect_timeout(config.connect_timeout);
    }
    if !config.read_timeout.is_zero() {
        builder = builder.read_timeout(config.read_timeout);
    }

    builder.build().map_err(DataSourceError::from)
}

#[derive(Debug, Clone)]
pub struct ReqwestRangeTransport {
    client: Client,
}

impl ReqwestRangeTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &HttpSourceConfig) -> Result<Self, DataSourceError> {
        Ok(Self::new(create_client(config)?))
    }
}

#[async_trait]
impl RangeTransport for ReqwestRangeTransport {
    async fn fetch(
        &self,
        url: &str,
        range: Option<ByteRange>,
    ) -> Result<RangeResponse, DataSourceError> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DataSourceError::http_status(
                status.as_u16(),
                url,
                "range fetch",
            ));
        }

        let headers = response.headers();
        let accept_ranges = headers
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));
        let content_range = headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);
        let content_length = response.content_length();

        debug!(
            url = %url,
            status = status.as_u16(),
            ?content_length,
            accept_ranges,
            ?content_range,
            "Range response"
        );

        Ok(RangeResponse {
            status: status.as_u16(),
            content_length,
            accept_ranges,
            content_range,
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(DataSourceError::from))
                .boxed(),
        })
    }
}
