//! Optional TOML configuration layered over the library defaults.

use std::path::{Path, PathBuf};

use afr_engine::{AfrConfig, DisplayMode};
use datasource_engine::DataSourceConfig;
use serde::{Deserialize, Serialize};
use stream_extractor::ExtractorConfig;
use tracing::debug;

use crate::error::{Result, TvplayError};

const APP_DIR: &str = "tvplay";
const CONFIG_FILE: &str = "config.toml";

/// Modes of the output the player drives. Empty means no display is
/// attached and frame-rate matching is skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub modes: Vec<DisplayMode>,
    /// Mode id active at startup; the first listed mode when absent.
    pub active: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub extractor: ExtractorConfig,
    pub datasource: DataSourceConfig,
    pub afr: AfrConfig,
    pub display: DisplayConfig,
}

impl AppConfig {
    /// `<config dir>/tvplay/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load `path`, or the default location when it exists. An explicit path
    /// that cannot be read is an error; a missing default file is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => {
                debug!("No configuration file; using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| TvplayError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| TvplayError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}
