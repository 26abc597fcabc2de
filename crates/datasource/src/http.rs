//! Plain single-connection HTTP source.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use futures::StreamExt;
use tracing::{debug, instrument};

use crate::error::DataSourceError;
use crate::source::{DataSource, read_cap};
use crate::spec::DataSpec;
use crate::transport::{ByteRange, ByteStream, RangeResponse, RangeTransport};

struct OpenStream {
    url: String,
    body: ByteStream,
    pending: Bytes,
    /// Leading bytes to discard when the server ignored our offset.
    skip: u64,
    remaining: Option<u64>,
}

impl OpenStream {
    /// Take ownership of a response whose body starts at `body_offset`, to be
    /// read from `position` for at most `length` bytes.
    fn new(
        url: String,
        response: RangeResponse,
        body_offset: u64,
        position: u64,
        length: Option<u64>,
    ) -> Self {
        let skip = position.saturating_sub(body_offset);
        let available = if response.is_partial() {
            response
                .content_range
                .and_then(|r| r.len())
                .or(response.content_length)
        } else {
            response.content_length
        }
        .map(|len| len.saturating_sub(skip));

        let remaining = match (available, length) {
            (Some(a), Some(l)) => Some(a.min(l)),
            (a, l) => a.or(l),
        };

        Self {
            url,
            body: response.body,
            pending: Bytes::new(),
            skip,
            remaining,
        }
    }
}

/// Reads a resource over one connection, honouring `DataSpec` offsets with a
/// `Range` header. Servers that ignore the header are handled by skipping.
pub struct HttpDataSource {
    transport: Arc<dyn RangeTransport>,
    stream: Option<OpenStream>,
}

impl HttpDataSource {
    pub fn new(transport: Arc<dyn RangeTransport>) -> Self {
        Self {
            transport,
            stream: None,
        }
    }

    /// Adopt an already received full-body response (offset 0) as an open
    /// source positioned at `position`.
    pub fn from_response(
        transport: Arc<dyn RangeTransport>,
        url: impl Into<String>,
        response: RangeResponse,
        position: u64,
        length: Option<u64>,
    ) -> Self {
        let body_offset = response
            .content_range
            .and_then(|r| r.start)
            .unwrap_or(0);
        Self {
            transport,
            stream: Some(OpenStream::new(
                url.into(),
                response,
                body_offset,
                position,
                length,
            )),
        }
    }

    /// Bytes left in the current response, when known.
    pub fn remaining(&self) -> Option<u64> {
        self.stream.as_ref().and_then(|s| s.remaining)
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    #[instrument(skip(self, spec), fields(url = %spec.url), level = "debug")]
    async fn open(&mut self, spec: DataSpec) -> Result<Option<u64>, DataSourceError> {
        self.stream = None;
        if spec.length == Some(0) {
            return Err(DataSourceError::invalid_range("zero-length request"));
        }

        let range = (spec.position > 0 || spec.length.is_some())
            .then(|| ByteRange::new(spec.position, spec.end_inclusive()));
        let response = self.transport.fetch(&spec.url, range).await?;

        let body_offset = if response.is_partial() {
            response
                .content_range
                .and_then(|r| r.start)
                .unwrap_or(spec.position)
        } else {
            0
        };
        if body_offset > spec.position {
            return Err(DataSourceError::invalid_range(format!(
                "server answered from {body_offset}, requested {}",
                spec.position
            )));
        }

        let stream = OpenStream::new(spec.url, response, body_offset, spec.position, spec.length);
        debug!(remaining = ?stream.remaining, skip = stream.skip, "Opened HTTP source");
        let remaining = stream.remaining;
        self.stream = Some(stream);
        Ok(remaining)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        let stream = self.stream.as_mut().ok_or(DataSourceError::NotOpened)?;
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if stream.remaining == Some(0) {
                return Ok(0);
            }

            if stream.pending.is_empty() {
                match stream.body.next().await {
                    Some(Ok(bytes)) => stream.pending = bytes,
                    Some(Err(e)) => return Err(e),
                    None => return Ok(0),
                }
            }

            if stream.skip > 0 {
                let dropped = stream.skip.min(stream.pending.len() as u64);
                stream.pending.advance(dropped as usize);
                stream.skip -= dropped;
                continue;
            }

            if stream.pending.is_empty() {
                continue;
            }

            let n = read_cap(buf.len().min(stream.pending.len()), stream.remaining);
            buf[..n].copy_from_slice(&stream.pending[..n]);
            stream.pending.advance(n);
            if let Some(remaining) = stream.remaining.as_mut() {
                *remaining -= n as u64;
            }
            return Ok(n);
        }
    }

    async fn close(&mut self) -> Result<(), DataSourceError> {
        // Dropping the body stream releases the connection.
        self.stream = None;
        Ok(())
    }

    fn url(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.url.as_str())
    }
}
