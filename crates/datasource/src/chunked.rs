//! Throttle-evading windowed source.
//!
//! Hosts that slow down long continuous downloads accept a `range=<start>-<end>`
//! query parameter instead. This wrapper walks the resource in bounded windows
//! of that form, one inner request per window, so no single connection ever
//! outlives its window.

use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::ChunkedSourceConfig;
use crate::error::DataSourceError;
use crate::source::{DataSource, read_cap};
use crate::spec::DataSpec;

const RANGE_PARAM: &str = "range";

/// `base` with its `range` parameter replaced by `start-end`. Other query
/// parameters keep their original encoding.
pub fn window_url(base: &Url, start: u64, end: u64) -> Url {
    let mut query: String = base
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| pair.split('=').next() != Some(RANGE_PARAM))
        .collect::<Vec<_>>()
        .join("&");
    if !query.is_empty() {
        query.push('&');
    }
    query.push_str(&format!("{RANGE_PARAM}={start}-{end}"));

    let mut url = base.clone();
    url.set_query(Some(&query));
    url
}

struct WindowState {
    base: Url,
    /// First byte of the current window.
    window_start: u64,
    /// Bytes requested for the current window.
    window_len: u64,
    /// Bytes received in the current window.
    received: u64,
    /// Bytes left of the whole request; `None` reads until the host runs out.
    remaining: Option<u64>,
    finished: bool,
}

enum Mode {
    Passthrough,
    Windowed(WindowState),
}

pub struct ChunkedDataSource<S> {
    inner: S,
    config: ChunkedSourceConfig,
    mode: Option<Mode>,
    windows_opened: u64,
}

impl<S: DataSource> ChunkedDataSource<S> {
    pub fn new(inner: S, config: ChunkedSourceConfig) -> Self {
        Self {
            inner,
            config,
            mode: None,
            windows_opened: 0,
        }
    }

    pub fn windows_opened(&self) -> u64 {
        self.windows_opened
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.mode, Some(Mode::Passthrough))
    }

    async fn open_window(&mut self) -> Result<(), DataSourceError> {
        let Some(Mode::Windowed(state)) = self.mode.as_mut() else {
            return Err(DataSourceError::NotOpened);
        };
        let window = self.config.window_size.max(1);
        let len = state.remaining.map_or(window, |r| r.min(window));
        let end = state.window_start + len - 1;
        let url = window_url(&state.base, state.window_start, end);

        state.window_len = len;
        state.received = 0;
        self.windows_opened += 1;
        debug!(start = state.window_start, end, "Opening window");
        self.inner.open(DataSpec::new(url.as_str())).await?;
        Ok(())
    }

    /// Move past a drained window. Returns whether another window should open.
    fn advance_window(state: &mut WindowState) -> bool {
        state.window_start += state.received;
        if state.remaining == Some(0) || state.received == 0 {
            return false;
        }
        // Without a known length a short window marks the end of the resource.
        !(state.remaining.is_none() && state.received < state.window_len)
    }
}

#[async_trait]
impl<S: DataSource> DataSource for ChunkedDataSource<S> {
    #[instrument(skip(self, spec), fields(url = %spec.url), level = "debug")]
    async fn open(&mut self, spec: DataSpec) -> Result<Option<u64>, DataSourceError> {
        self.mode = None;
        let base = Url::parse(&spec.url)
            .map_err(|e| DataSourceError::invalid_url(&spec.url, e.to_string()))?;

        let throttled = base
            .host_str()
            .is_some_and(|host| self.config.is_throttled_host(host));
        if !throttled {
            self.mode = Some(Mode::Passthrough);
            return self.inner.open(spec).await;
        }

        if spec.length == Some(0) {
            return Err(DataSourceError::invalid_range("zero-length request"));
        }

        self.mode = Some(Mode::Windowed(WindowState {
            base,
            window_start: spec.position,
            window_len: 0,
            received: 0,
            remaining: spec.length,
            finished: false,
        }));
        self.open_window().await?;
        Ok(spec.length)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        loop {
            let state = match self.mode.as_mut() {
                None => return Err(DataSourceError::NotOpened),
                Some(Mode::Passthrough) => return self.inner.read(buf).await,
                Some(Mode::Windowed(state)) => state,
            };
            if state.finished || state.remaining == Some(0) || buf.is_empty() {
                return Ok(0);
            }

            let cap = read_cap(buf.len(), state.remaining);
            let n = self.inner.read(&mut buf[..cap]).await?;
            let Some(Mode::Windowed(state)) = self.mode.as_mut() else {
                return Err(DataSourceError::NotOpened);
            };

            if n > 0 {
                state.received += n as u64;
                if let Some(remaining) = state.remaining.as_mut() {
                    *remaining -= n as u64;
                }
                return Ok(n);
            }

            // End of window.
            let has_next = Self::advance_window(state);
            if !has_next {
                state.finished = true;
            }
            if let Err(e) = self.inner.close().await {
                debug!(error = %e, "Closing window failed");
            }
            if !has_next {
                return Ok(0);
            }

            if let Err(e) = self.open_window().await {
                warn!(error = %e, "Next window failed; ending stream");
                if let Some(Mode::Windowed(state)) = self.mode.as_mut() {
                    state.finished = true;
                }
                return Ok(0);
            }
        }
    }

    async fn close(&mut self) -> Result<(), DataSourceError> {
        self.mode = None;
        self.inner.close().await
    }

    fn url(&self) -> Option<&str> {
        self.inner.url()
    }
}
