//! Sandboxed extraction backend.
//!
//! Runs the bundled `extract.js` inside QuickJS on a blocking thread. The
//! sandbox gets no ambient I/O; it reaches the network only through the same
//! [`HttpTransport`] the native backend uses, and every call it makes is
//! bound to a [`CancellationToken`] that fires when the caller stops waiting.

mod engine;

use std::path::Path;
use std::sync::{Arc, OnceLock};

use serde_json::json;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::ExtractorConfig;
use crate::error::ExtractorError;
use crate::selection::PlaybackSource;
use crate::transport::{DEFAULT_UA, HttpTransport};
use crate::video_id::extract_video_id;

use engine::HostBridge;

const EMBEDDED_SCRIPT: &str = include_str!("extract.js");

/// Loaded once per process; the first configured `script_path` wins.
static SCRIPT_BODY: OnceLock<Arc<str>> = OnceLock::new();

fn script_body(path: Option<&Path>) -> Result<Arc<str>, ExtractorError> {
    if let Some(body) = SCRIPT_BODY.get() {
        return Ok(body.clone());
    }
    let body: Arc<str> = match path {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| {
                ExtractorError::ScriptError(format!("cannot read {}: {e}", path.display()))
            })?
            .into(),
        None => Arc::from(EMBEDDED_SCRIPT),
    };
    debug!(bytes = body.len(), "Loaded extraction script");
    Ok(SCRIPT_BODY.get_or_init(|| body).clone())
}

pub struct ScriptExtractor {
    transport: Arc<dyn HttpTransport>,
    config: Arc<ExtractorConfig>,
}

impl ScriptExtractor {
    pub fn new(transport: Arc<dyn HttpTransport>, config: Arc<ExtractorConfig>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    fn script_input(&self, video_id: &str) -> String {
        let personas: Vec<_> = self
            .config
            .personas
            .iter()
            .map(|p| {
                json!({
                    "key": p.key,
                    "clientId": p.client_id,
                    "version": p.version,
                    "userAgent": p.user_agent,
                    "priority": p.priority,
                    "body": p.player_request_body(video_id, &self.config.language),
                })
            })
            .collect();

        json!({
            "videoId": video_id,
            "host": self.config.host,
            "language": self.config.language,
            "userAgent": DEFAULT_UA,
            "preferredPersona": self.config.preferred_persona,
            "personas": personas,
        })
        .to_string()
    }

    #[instrument(skip(self), fields(backend = "script"))]
    pub async fn extract(&self, input: &str) -> Result<PlaybackSource, ExtractorError> {
        let video_id =
            extract_video_id(input).ok_or_else(|| ExtractorError::InvalidUrl(input.to_owned()))?;
        let script = script_body(self.config.script_path.as_deref())?;
        let script_input = self.script_input(&video_id);

        let token = CancellationToken::new();
        // Dropping this future (caller timeout) cancels the sandbox and its fetches.
        let _cancel_on_drop = token.clone().drop_guard();
        let bridge = HostBridge::new(self.transport.clone(), Handle::current(), token);

        let outcome = tokio::task::spawn_blocking(move || engine::run(&script, &script_input, bridge))
            .await
            .map_err(|e| ExtractorError::Other(format!("script task failed: {e}")))??;

        outcome.ok_or(ExtractorError::NoStreamsFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::tests::{MASTER, WATCH_PAGE, is_player_for, is_watch, vr_player_body};
    use crate::persona::ClientPersona;
    use crate::transport::mock::{MockTransport, ok};

    fn extractor(transport: Arc<MockTransport>) -> ScriptExtractor {
        ScriptExtractor::new(transport, Arc::new(ExtractorConfig::default()))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_script_matches_native_selection() {
        let vr = ClientPersona::android_vr();
        let ios = ClientPersona::ios();
        let transport = Arc::new(
            MockTransport::new()
                .on(|req| is_watch(req).then(|| ok(WATCH_PAGE)).flatten())
                .on(move |req| is_player_for(req, &vr).then(|| ok(vr_player_body())).flatten())
                .on(move |req| {
                    is_player_for(req, &ios)
                        .then(|| {
                            ok(r#"{"streamingData":{"hlsManifestUrl":"https://manifest.example.com/master.m3u8"}}"#)
                        })
                        .flatten()
                })
                .on(|req| req.url.ends_with("master.m3u8").then(|| ok(MASTER)).flatten()),
        );

        let source = extractor(transport.clone())
            .extract("https://youtu.be/dQw4w9WgXcQ")
            .await
            .unwrap();
        assert_eq!(
            source.video_url,
            "https://r1.example.com/videoplayback?itag=137"
        );
        assert_eq!(
            source.audio_url.as_deref(),
            Some("https://r1.example.com/videoplayback?itag=140")
        );

        let requests = transport.requests();
        let player = requests
            .iter()
            .find(|r| r.header_value("x-youtube-client-name") == Some("28"))
            .unwrap();
        assert!(player.url.contains("key=AIzaTestKey"));
        assert_eq!(player.header_value("x-goog-visitor-id"), Some("CgtWaXM"));
        let watch = requests.iter().find(|r| is_watch(r)).unwrap();
        assert_eq!(watch.header_value("user-agent"), Some(DEFAULT_UA));
        assert!(requests.iter().any(|r| r.url.ends_with("master.m3u8")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_script_missing_key_is_error() {
        let transport = Arc::new(
            MockTransport::new().on(|req| is_watch(req).then(|| ok("<html></html>")).flatten()),
        );
        let err = extractor(transport.clone())
            .extract("dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::ScriptError(_)));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_script_exhaustion_is_no_streams() {
        let transport =
            Arc::new(MockTransport::new().on(|req| is_watch(req).then(|| ok(WATCH_PAGE)).flatten()));
        let err = extractor(transport).extract("dQw4w9WgXcQ").await.unwrap_err();
        assert!(matches!(err, ExtractorError::NoStreamsFound));
    }

    #[test]
    fn test_script_body_is_cached() {
        let first = script_body(None).unwrap();
        let second = script_body(None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
