//! # stream-extractor
//!
//! Resolves a hosted-video URL (or bare 11-character id) into direct,
//! time-limited media URLs by querying the host's private player endpoint
//! under several client personas and scoring everything they offer.
//!
//! Two interchangeable backends run the same steps: [`NativeExtractor`] in
//! Rust and, with the `rquickjs` feature, [`ScriptExtractor`] inside a
//! QuickJS sandbox.
//!
//! ```ignore
//! let extractor = HostExtractor::new(ExtractorConfig::default())?;
//! if let Some(source) = extractor.resolve_playback_source("https://youtu.be/dQw4w9WgXcQ").await {
//!     println!("{}", source.video_url);
//! }
//! ```

pub mod candidate;
pub mod config;
pub mod error;
pub mod manifest;
pub mod models;
pub mod native;
pub mod persona;
#[cfg(feature = "rquickjs")]
pub mod script;
pub mod selection;
pub mod transport;
pub mod video_id;
pub mod watch_page;

use std::sync::Arc;

use tracing::{info, warn};

pub use config::{ExtractorBackend, ExtractorConfig};
pub use error::ExtractorError;
pub use native::NativeExtractor;
pub use persona::ClientPersona;
#[cfg(feature = "rquickjs")]
pub use script::ScriptExtractor;
pub use selection::PlaybackSource;
pub use transport::{HttpTransport, ReqwestTransport};
pub use video_id::{extract_video_id, is_hosted_video};

/// The configured extraction strategy.
pub enum HostExtractor {
    Native(NativeExtractor),
    #[cfg(feature = "rquickjs")]
    Script(ScriptExtractor),
}

impl HostExtractor {
    /// Build with a `reqwest` transport.
    pub fn new(config: ExtractorConfig) -> Result<Self, ExtractorError> {
        let client = transport::default_client(config.timeout)?;
        Self::with_transport(config, Arc::new(ReqwestTransport::new(client)))
    }

    pub fn with_transport(
        config: ExtractorConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ExtractorError> {
        let backend = config.backend;
        let config = Arc::new(config);
        match backend {
            ExtractorBackend::Native => Ok(Self::Native(NativeExtractor::new(transport, config))),
            #[cfg(feature = "rquickjs")]
            ExtractorBackend::Script => Ok(Self::Script(ScriptExtractor::new(transport, config))),
            #[cfg(not(feature = "rquickjs"))]
            ExtractorBackend::Script => Err(ExtractorError::ScriptError(
                "built without the rquickjs feature".to_owned(),
            )),
        }
    }

    /// Run one extraction without a deadline.
    pub async fn extract(&self, input: &str) -> Result<PlaybackSource, ExtractorError> {
        match self {
            Self::Native(extractor) => extractor.extract(input).await,
            #[cfg(feature = "rquickjs")]
            Self::Script(extractor) => extractor.extract(input).await,
        }
    }

    /// Like [`extract`](Self::extract) but bounded by `timeout`, returning
    /// the error instead of swallowing it.
    pub async fn extract_with_timeout(
        &self,
        input: &str,
        timeout: std::time::Duration,
    ) -> Result<PlaybackSource, ExtractorError> {
        tokio::time::timeout(timeout, self.extract(input))
            .await
            .map_err(|_| ExtractorError::Timeout(timeout))?
    }

    /// Caller-facing contract: a playable source or nothing.
    ///
    /// Exhaustion, fatal configuration errors and the configured timeout all
    /// collapse to `None`; the cause is only logged. In-flight requests are
    /// dropped (and, for the script backend, cancelled) when the timeout fires.
    pub async fn resolve_playback_source(&self, input: &str) -> Option<PlaybackSource> {
        let timeout = self.config().timeout;
        match self.extract_with_timeout(input, timeout).await {
            Ok(source) => {
                info!(video = %source.video_url, audio = source.audio_url.is_some(), "Resolved playback source");
                Some(source)
            }
            Err(e) => {
                warn!(input = %input, error = %e, "No playback source");
                None
            }
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        match self {
            Self::Native(extractor) => extractor.config(),
            #[cfg(feature = "rquickjs")]
            Self::Script(extractor) => extractor.config(),
        }
    }
}
