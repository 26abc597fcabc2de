//! Parallel range fetcher.
//!
//! A probe request learns the resource length and whether the server honours
//! `Range`. When it does, the resource is split into fixed-size chunks indexed
//! from byte zero and up to `connections` chunks ahead of the reader are
//! downloaded concurrently; `read` hands bytes back strictly in order. Servers
//! without range support or a known length get a single plain connection.

mod buffer_pool;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, instrument, warn};

pub use buffer_pool::{BufferPool, BufferPoolStats, PooledBuffer};

use crate::config::ParallelFetchConfig;
use crate::error::DataSourceError;
use crate::http::HttpDataSource;
use crate::source::DataSource;
use crate::spec::DataSpec;
use crate::transport::{ByteRange, RangeTransport};

/// One downloaded chunk.
pub struct RangeChunk {
    pub index: u64,
    pub data: PooledBuffer,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// HTTP requests issued, probe included.
    pub requests: u64,
    /// Chunk bytes downloaded.
    pub bytes: u64,
    /// Chunk downloads restarted after a retryable failure.
    pub retries: u64,
    /// Most chunk downloads observed running at once.
    pub peak_active: usize,
}

#[derive(Default)]
struct FetchCounters {
    requests: AtomicU64,
    bytes: AtomicU64,
    retries: AtomicU64,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl FetchCounters {
    fn snapshot(&self) -> FetchStats {
        FetchStats {
            requests: self.requests.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            peak_active: self.peak_active.load(Ordering::Relaxed),
        }
    }
}

struct ActiveDownload<'a>(&'a FetchCounters);

impl<'a> ActiveDownload<'a> {
    fn start(counters: &'a FetchCounters) -> Self {
        let now = counters.active.fetch_add(1, Ordering::Relaxed) + 1;
        counters.peak_active.fetch_max(now, Ordering::Relaxed);
        Self(counters)
    }
}

impl Drop for ActiveDownload<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

type ChunkTask = AbortOnDropHandle<Result<RangeChunk, DataSourceError>>;

/// State shared between the reader and its download tasks. Dropping a task
/// handle from `tasks` aborts the download.
struct Shared {
    closed: AtomicBool,
    permits: Semaphore,
    pool: Arc<BufferPool>,
    tasks: DashMap<u64, ChunkTask>,
    counters: FetchCounters,
}

impl Shared {
    fn new(config: &ParallelFetchConfig) -> Self {
        Self {
            closed: AtomicBool::new(false),
            permits: Semaphore::new(config.connections.max(1)),
            pool: Arc::new(BufferPool::new(
                config.chunk_size as usize,
                config.pool_size(),
            )),
            tasks: DashMap::new(),
            counters: FetchCounters::default(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        self.tasks.clear();
        self.pool.close();
    }
}

#[instrument(skip(shared, transport, url), level = "debug")]
async fn download_chunk(
    shared: Arc<Shared>,
    transport: Arc<dyn RangeTransport>,
    url: Arc<str>,
    index: u64,
    range: ByteRange,
) -> Result<RangeChunk, DataSourceError> {
    let _permit = shared
        .permits
        .acquire()
        .await
        .map_err(|_| DataSourceError::Closed)?;
    if shared.is_closed() {
        return Err(DataSourceError::Closed);
    }
    let _active = ActiveDownload::start(&shared.counters);

    let mut data = shared.pool.checkout();
    shared.counters.requests.fetch_add(1, Ordering::Relaxed);
    let response = transport.fetch(&url, Some(range)).await?;

    if !response.is_partial() {
        return Err(DataSourceError::invalid_range(format!(
            "server answered chunk {index} with status {}",
            response.status
        )));
    }
    if let Some(start) = response.content_range.and_then(|r| r.start)
        && start != range.start
    {
        return Err(DataSourceError::invalid_range(format!(
            "chunk {index} starts at {start}, expected {}",
            range.start
        )));
    }

    let expected = range.end.map_or(u64::MAX, |end| end - range.start + 1);
    let mut body = response.body;
    while let Some(piece) = body.next().await {
        if shared.is_closed() {
            return Err(DataSourceError::Closed);
        }
        data.extend_from_slice(&piece?);
        if data.len() as u64 > expected {
            return Err(DataSourceError::invalid_range(format!(
                "chunk {index} overran its range"
            )));
        }
    }
    if (data.len() as u64) < expected {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("chunk {index} ended after {} of {expected} bytes", data.len()),
        )
        .into());
    }

    shared
        .counters
        .bytes
        .fetch_add(data.len() as u64, Ordering::Relaxed);
    Ok(RangeChunk { index, data })
}

struct ParallelState {
    url: Arc<str>,
    total: u64,
    /// Exclusive end of the requested span.
    end: u64,
    /// Next byte handed to the reader.
    position: u64,
    chunk_size: u64,
    current: Option<RangeChunk>,
    shared: Arc<Shared>,
    transport: Arc<dyn RangeTransport>,
    config: ParallelFetchConfig,
}

impl ParallelState {
    fn chunk_range(&self, index: u64) -> ByteRange {
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total) - 1;
        ByteRange::new(start, Some(end))
    }

    fn spawn(&self, index: u64) -> ChunkTask {
        AbortOnDropHandle::new(tokio::spawn(download_chunk(
            self.shared.clone(),
            self.transport.clone(),
            self.url.clone(),
            index,
            self.chunk_range(index),
        )))
    }

    /// Ensure chunks `index..=index + connections` inside the span are scheduled.
    fn schedule_window(&self, index: u64) {
        let horizon = index + self.config.connections as u64;
        for i in index..=horizon {
            if i * self.chunk_size >= self.end {
                break;
            }
            self.shared.tasks.entry(i).or_insert_with(|| self.spawn(i));
        }
    }

    /// Abort and forget every chunk before `index`.
    fn reclaim_behind(&self, index: u64) {
        self.shared.tasks.retain(|&i, _| i >= index);
    }

    async fn await_chunk(&self, index: u64) -> Result<RangeChunk, DataSourceError> {
        let policy = self.config.retry_policy();
        let mut attempt = 0;
        loop {
            let task = match self.shared.tasks.remove(&index) {
                Some((_, task)) => task,
                None => self.spawn(index),
            };
            let result = match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(DataSourceError::Closed),
                Err(e) => Err(DataSourceError::internal(format!("chunk task failed: {e}"))),
            };

            match result {
                Ok(chunk) => return Ok(chunk),
                Err(e) if e.is_closed() || self.shared.is_closed() => {
                    return Err(DataSourceError::Closed);
                }
                Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                    let delay = policy.delay_for_attempt(attempt);
                    attempt += 1;
                    self.shared.counters.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(index, attempt, ?delay, error = %e, "Chunk download failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.position >= self.end {
                self.current = None;
                return Ok(0);
            }
            let index = self.position / self.chunk_size;

            if let Some(chunk) = self.current.as_ref().filter(|c| c.index == index) {
                let offset = (self.position - index * self.chunk_size) as usize;
                let available = chunk.data.len().saturating_sub(offset);
                if available == 0 {
                    return Err(DataSourceError::internal(format!(
                        "chunk {index} shorter than its range"
                    )));
                }
                let left = usize::try_from(self.end - self.position).unwrap_or(usize::MAX);
                let n = buf.len().min(available).min(left);
                buf[..n].copy_from_slice(&chunk.data[offset..offset + n]);
                let exhausted = offset + n == chunk.data.len();

                self.position += n as u64;
                if exhausted {
                    self.current = None;
                }
                return Ok(n);
            }

            self.current = None;
            self.reclaim_behind(index);
            self.schedule_window(index);
            self.current = Some(self.await_chunk(index).await?);
        }
    }
}

enum Mode {
    Parallel(ParallelState),
    Single(HttpDataSource),
}

/// Reads a progressive file over several concurrent range requests.
///
/// Once a probe shows the server cannot serve ranges of a known length, every
/// later `open` on the same source goes straight to a single connection.
pub struct ParallelRangeSource {
    transport: Arc<dyn RangeTransport>,
    config: ParallelFetchConfig,
    shared: Arc<Shared>,
    mode: Option<Mode>,
    single_only: bool,
}

impl ParallelRangeSource {
    pub fn new(transport: Arc<dyn RangeTransport>, config: ParallelFetchConfig) -> Self {
        let shared = Arc::new(Shared::new(&config));
        Self {
            transport,
            config,
            shared,
            mode: None,
            single_only: false,
        }
    }

    /// Whether the open resource is being fetched in parallel.
    pub fn is_parallel(&self) -> bool {
        matches!(self.mode, Some(Mode::Parallel(_)))
    }

    /// Whether the open resource fell back to one plain connection.
    pub fn is_fallback(&self) -> bool {
        matches!(self.mode, Some(Mode::Single(_)))
    }

    pub fn fetch_stats(&self) -> FetchStats {
        self.shared.counters.snapshot()
    }

    pub fn pool_stats(&self) -> BufferPoolStats {
        self.shared.pool.stats()
    }

    /// Chunk downloads currently scheduled ahead of the reader.
    pub fn scheduled_chunks(&self) -> usize {
        self.shared.tasks.len()
    }

    fn reset(&mut self) {
        self.mode = None;
        self.shared.shutdown();
    }
}

#[async_trait]
impl DataSource for ParallelRangeSource {
    #[instrument(skip(self, spec), fields(url = %spec.url), level = "debug")]
    async fn open(&mut self, spec: DataSpec) -> Result<Option<u64>, DataSourceError> {
        self.reset();
        self.shared = Arc::new(Shared::new(&self.config));
        if spec.length == Some(0) {
            return Err(DataSourceError::invalid_range("zero-length request"));
        }

        self.shared
            .counters
            .requests
            .fetch_add(1, Ordering::Relaxed);
        if self.single_only {
            let mut source = HttpDataSource::new(self.transport.clone());
            let remaining = source.open(spec).await?;
            self.mode = Some(Mode::Single(source));
            return Ok(remaining);
        }
        let probe = self.transport.fetch(&spec.url, None).await?;
        let total = probe.total_length();

        let total = match total {
            Some(total) if self.config.enabled && probe.supports_ranges() => total,
            _ => {
                debug!(
                    ?total,
                    ranges = probe.supports_ranges(),
                    "Falling back to a single connection"
                );
                let source = HttpDataSource::from_response(
                    self.transport.clone(),
                    spec.url,
                    probe,
                    spec.position,
                    spec.length,
                );
                let remaining = source.remaining();
                self.single_only = true;
                self.mode = Some(Mode::Single(source));
                return Ok(remaining);
            }
        };
        drop(probe);

        if spec.position > total {
            return Err(DataSourceError::invalid_range(format!(
                "position {} beyond length {total}",
                spec.position
            )));
        }
        let end = spec
            .length
            .map_or(total, |len| spec.position.saturating_add(len).min(total));

        let state = ParallelState {
            url: Arc::from(spec.url.as_str()),
            total,
            end,
            position: spec.position,
            chunk_size: self.config.chunk_size.max(1),
            current: None,
            shared: self.shared.clone(),
            transport: self.transport.clone(),
            config: self.config.clone(),
        };
        state.schedule_window(spec.position / state.chunk_size);
        debug!(
            total,
            end,
            chunk_size = state.chunk_size,
            connections = self.config.connections,
            "Opened parallel range source"
        );
        self.mode = Some(Mode::Parallel(state));
        Ok(Some(end - spec.position))
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        match self.mode.as_mut() {
            None => Err(DataSourceError::NotOpened),
            Some(Mode::Parallel(state)) => state.read(buf).await,
            Some(Mode::Single(source)) => source.read(buf).await,
        }
    }

    async fn close(&mut self) -> Result<(), DataSourceError> {
        if let Some(Mode::Single(source)) = self.mode.as_mut() {
            source.close().await?;
        }
        self.reset();
        Ok(())
    }

    fn url(&self) -> Option<&str> {
        match self.mode.as_ref()? {
            Mode::Parallel(state) => Some(&state.url),
            Mode::Single(source) => source.url(),
        }
    }
}

impl Drop for ParallelRangeSource {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::source::read_to_end;
    use crate::transport::mock::MemoryServer;
    use proptest::prelude::*;

    const URL: &str = "http://cdn.example.com/movie.mp4";

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    fn config(chunk_size: u64, connections: usize) -> ParallelFetchConfig {
        ParallelFetchConfig {
            chunk_size,
            connections,
            retry_delay: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn chunk_requests(server: &MemoryServer) -> Vec<ByteRange> {
        server.requests().iter().filter_map(|r| r.range).collect()
    }

    #[tokio::test]
    async fn test_parallel_read_matches_resource() {
        let server = Arc::new(MemoryServer::new(data(100)));
        let mut source = ParallelRangeSource::new(server.clone(), config(16, 3));
        assert_eq!(source.open(DataSpec::new(URL)).await.unwrap(), Some(100));
        assert!(source.is_parallel());

        let mut out = Vec::new();
        read_to_end(&mut source, &mut out).await.unwrap();
        assert_eq!(out, data(100));

        let stats = source.fetch_stats();
        assert_eq!(stats.requests, 1 + 7);
        assert_eq!(stats.bytes, 100);
        assert_eq!(server.requests()[0].range, None);
        assert!(chunk_requests(&server).contains(&ByteRange::new(96, Some(99))));
    }

    #[tokio::test]
    async fn test_offset_read_skips_leading_chunks() {
        let server = Arc::new(MemoryServer::new(data(100)));
        let mut source = ParallelRangeSource::new(server.clone(), config(10, 2));
        let spec = DataSpec::new(URL).with_position(25).with_length(30);
        assert_eq!(source.open(spec).await.unwrap(), Some(30));

        let mut out = Vec::new();
        read_to_end(&mut source, &mut out).await.unwrap();
        assert_eq!(out, data(100)[25..55]);

        let ranges = chunk_requests(&server);
        assert!(ranges.contains(&ByteRange::new(20, Some(29))));
        assert!(ranges.iter().all(|r| r.start >= 20 && r.start < 55));
    }

    #[tokio::test]
    async fn test_no_range_support_uses_one_connection() {
        let server = Arc::new(MemoryServer::new(data(100)).without_ranges());
        let mut source = ParallelRangeSource::new(server.clone(), config(16, 3));
        let spec = DataSpec::new(URL).with_position(10);
        assert_eq!(source.open(spec).await.unwrap(), Some(90));
        assert!(source.is_fallback());

        let mut out = Vec::new();
        read_to_end(&mut source, &mut out).await.unwrap();
        assert_eq!(out, data(100)[10..]);
        assert_eq!(server.requests().len(), 1);
        assert!(chunk_requests(&server).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_length_uses_one_connection() {
        let server = Arc::new(MemoryServer::new(data(64)).without_length());
        let mut source = ParallelRangeSource::new(server.clone(), config(16, 3));
        assert_eq!(source.open(DataSpec::new(URL)).await.unwrap(), None);
        assert!(source.is_fallback());

        let mut out = Vec::new();
        read_to_end(&mut source, &mut out).await.unwrap();
        assert_eq!(out, data(64));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_after_fallback_skips_range_detection() {
        let server = Arc::new(MemoryServer::new(data(64)).without_length());
        let mut source = ParallelRangeSource::new(server.clone(), config(16, 3));
        assert_eq!(source.open(DataSpec::new(URL)).await.unwrap(), None);
        assert!(source.is_fallback());
        source.close().await.unwrap();

        // The reopen asks for its offset directly instead of a full-body detection request.
        let spec = DataSpec::new(URL).with_position(40);
        source.open(spec).await.unwrap();
        assert!(source.is_fallback());
        let mut out = Vec::new();
        read_to_end(&mut source, &mut out).await.unwrap();
        assert_eq!(out, data(64)[40..]);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].range, None);
        assert_eq!(requests[1].range, Some(ByteRange::new(40, None)));
        assert!(chunk_requests(&server).iter().all(|r| r.start == 40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_retries_back_off() {
        let server = Arc::new(MemoryServer::new(data(30)).fail_once_at(10));
        let mut config = config(10, 1);
        config.retry_delay = Duration::from_secs(1);
        config.retry_jitter = false;
        let mut source = ParallelRangeSource::new(server.clone(), config);
        source.open(DataSpec::new(URL)).await.unwrap();

        let started = tokio::time::Instant::now();
        let mut out = Vec::new();
        read_to_end(&mut source, &mut out).await.unwrap();
        assert_eq!(out, data(30));
        assert_eq!(source.fetch_stats().retries, 1);
        // One retry waits the base delay, not the doubled one.
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retryable_chunk_failure_is_retried() {
        let server = Arc::new(MemoryServer::new(data(50)).fail_once_at(20));
        let mut source = ParallelRangeSource::new(server.clone(), config(10, 2));
        source.open(DataSpec::new(URL)).await.unwrap();

        let mut out = Vec::new();
        read_to_end(&mut source, &mut out).await.unwrap();
        assert_eq!(out, data(50));
        assert_eq!(source.fetch_stats().retries, 1);
        let attempts = chunk_requests(&server)
            .iter()
            .filter(|r| r.start == 20)
            .count();
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_schedule_stays_within_horizon() {
        let connections = 2;
        let server = Arc::new(MemoryServer::new(data(100)));
        let mut source = ParallelRangeSource::new(server.clone(), config(10, connections));
        source.open(DataSpec::new(URL)).await.unwrap();
        assert_eq!(source.scheduled_chunks(), connections + 1);

        let mut buf = [0u8; 4];
        let mut out = Vec::new();
        loop {
            let n = source.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
            assert!(source.scheduled_chunks() <= connections + 1);
        }
        assert_eq!(out, data(100));

        let stats = source.fetch_stats();
        assert!(stats.peak_active <= connections);
        let pool = source.pool_stats();
        assert!(pool.allocations <= connections as u64 + 1);
        assert_eq!(pool.outstanding, 0);
    }

    #[tokio::test]
    async fn test_close_clears_state() {
        let server = Arc::new(MemoryServer::new(data(100)));
        let mut source = ParallelRangeSource::new(server.clone(), config(10, 3));
        source.open(DataSpec::new(URL)).await.unwrap();
        let mut buf = [0u8; 15];
        source.read(&mut buf).await.unwrap();

        source.close().await.unwrap();
        assert_eq!(source.scheduled_chunks(), 0);
        assert_eq!(source.pool_stats().current_pool_size, 0);
        assert!(source.url().is_none());
        assert!(matches!(
            source.read(&mut buf).await,
            Err(DataSourceError::NotOpened)
        ));

        // Reopening starts cold.
        let spec = DataSpec::new(URL).with_position(40);
        source.open(spec).await.unwrap();
        let mut out = Vec::new();
        read_to_end(&mut source, &mut out).await.unwrap();
        assert_eq!(out, data(100)[40..]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_download_observes_close() {
        let server = Arc::new(MemoryServer::new(data(64)).with_delay(|_| Duration::from_secs(10)));
        let shared = Arc::new(Shared::new(&config(16, 2)));
        let task = tokio::spawn(download_chunk(
            shared.clone(),
            server.clone(),
            Arc::from(URL),
            0,
            ByteRange::new(0, Some(15)),
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(server.requests().len(), 1);
        shared.closed.store(true, Ordering::Release);

        let err = task.await.unwrap().err().unwrap();
        assert!(err.is_closed());
        assert!(!err.is_retryable());
        assert_eq!(shared.pool.stats().outstanding, 0);
    }

    #[tokio::test]
    async fn test_closed_before_start_makes_no_request() {
        let server = Arc::new(MemoryServer::new(data(64)));
        let shared = Arc::new(Shared::new(&config(16, 2)));
        shared.shutdown();

        let result = download_chunk(
            shared.clone(),
            server.clone(),
            Arc::from(URL),
            0,
            ByteRange::new(0, Some(15)),
        )
        .await;
        assert!(result.err().is_some_and(|e| e.is_closed()));
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_position_past_end_is_rejected() {
        let server = Arc::new(MemoryServer::new(data(10)));
        let mut source = ParallelRangeSource::new(server, config(4, 2));
        let result = source.open(DataSpec::new(URL).with_position(11)).await;
        assert!(matches!(result, Err(DataSourceError::InvalidRange { .. })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_out_of_order_completion_reads_in_order(
            len in 1usize..1500,
            chunk_size in 16u64..300,
            connections in 1usize..5,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            rt.block_on(async {
                let total = len as u64;
                // Later chunks answer sooner.
                let server = Arc::new(
                    MemoryServer::new(data(len))
                        .with_delay(move |start| Duration::from_millis(total - start.min(total))),
                );
                let mut source = ParallelRangeSource::new(server, config(chunk_size, connections));
                source.open(DataSpec::new(URL)).await.unwrap();

                let mut out = Vec::new();
                read_to_end(&mut source, &mut out).await.unwrap();
                assert_eq!(out, data(len));
                assert!(source.fetch_stats().peak_active <= connections);
            });
        }
    }
}
