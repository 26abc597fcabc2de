use std::path::PathBuf;

use afr_engine::AfrError;
use datasource_engine::DataSourceError;
use stream_extractor::ExtractorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TvplayError {
    #[error("cannot read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("no playable source for {0}")]
    NoSource(String),

    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractorError),

    #[error("data source error: {0}")]
    DataSource(#[from] DataSourceError),

    #[error("display error: {0}")]
    Afr(#[from] AfrError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TvplayError>;
