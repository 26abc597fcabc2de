//! # datasource-engine
//!
//! Pull-based byte sources for media playback over HTTP.
//!
//! - [`HttpDataSource`]: one connection, `Range` header offsets.
//! - [`ChunkedDataSource`]: walks throttling hosts in `range=<start>-<end>`
//!   query windows so no single request grows large enough to be slowed down.
//! - [`ParallelRangeSource`]: downloads a progressive file over several
//!   concurrent range requests and reads it back in order.
//!
//! [`DataSourceFactory`] picks one of them for a URL.
//!
//! ```no_run
//! use datasource_engine::{DataSource, DataSourceConfig, DataSourceFactory, DataSpec};
//!
//! # async fn run() -> Result<(), datasource_engine::DataSourceError> {
//! let factory = DataSourceFactory::new(DataSourceConfig::default())?;
//! let url = "https://cdn.example.com/movie.mp4";
//! let mut source = factory.create(url)?;
//! source.open(DataSpec::new(url)).await?;
//! let mut buf = vec![0u8; 64 * 1024];
//! while source.read(&mut buf).await? > 0 {}
//! source.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod chunked;
pub mod config;
pub mod error;
pub mod factory;
pub mod http;
pub mod parallel;
pub mod retry;
pub mod source;
pub mod spec;
pub mod transport;

pub use chunked::ChunkedDataSource;
pub use config::{ChunkedSourceConfig, DataSourceConfig, HttpSourceConfig, ParallelFetchConfig};
pub use error::DataSourceError;
pub use factory::{DataSourceFactory, SourceKind};
pub use http::HttpDataSource;
pub use parallel::{BufferPoolStats, FetchStats, ParallelRangeSource};
pub use retry::RetryPolicy;
pub use source::{DataSource, read_to_end};
pub use spec::DataSpec;
pub use transport::{ByteRange, RangeResponse, RangeTransport, ReqwestRangeTransport};
