use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::chunked::ChunkedDataSource;
use crate::config::DataSourceConfig;
use crate::error::DataSourceError;
use crate::http::HttpDataSource;
use crate::parallel::ParallelRangeSource;
use crate::source::DataSource;
use crate::transport::{RangeTransport, ReqwestRangeTransport};

/// Which source a URL is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Throttling host: `range=` query windows.
    Chunked,
    /// Progressive file: concurrent `Range` requests.
    Parallel,
    /// One plain connection.
    Http,
}

/// Picks and builds the data source for a playback URL.
pub struct DataSourceFactory {
    transport: Arc<dyn RangeTransport>,
    config: DataSourceConfig,
}

impl DataSourceFactory {
    pub fn new(config: DataSourceConfig) -> Result<Self, DataSourceError> {
        let transport = ReqwestRangeTransport::from_config(&config.http)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    pub fn with_transport(transport: Arc<dyn RangeTransport>, config: DataSourceConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    pub fn kind_for(&self, url: &str) -> Result<SourceKind, DataSourceError> {
        let parsed = Url::parse(url).map_err(|e| DataSourceError::invalid_url(url, e.to_string()))?;
        let throttled = parsed
            .host_str()
            .is_some_and(|host| self.config.chunked.is_throttled_host(host));

        Ok(if throttled {
            SourceKind::Chunked
        } else if self.config.parallel.enabled {
            SourceKind::Parallel
        } else {
            SourceKind::Http
        })
    }

    pub fn create(&self, url: &str) -> Result<Box<dyn DataSource>, DataSourceError> {
        let kind = self.kind_for(url)?;
        debug!(url, ?kind, "Routing data source");
        let http = || HttpDataSource::new(self.transport.clone());
        Ok(match kind {
            SourceKind::Chunked => Box::new(ChunkedDataSource::new(
                http(),
                self.config.chunked.clone(),
            )),
            SourceKind::Parallel => Box::new(ParallelRangeSource::new(
                self.transport.clone(),
                self.config.parallel.clone(),
            )),
            SourceKind::Http => Box::new(http()),
        })
    }
}
