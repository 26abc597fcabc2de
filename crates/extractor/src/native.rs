//! In-process implementation of the extraction steps.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::candidate::ManifestCandidate;
use crate::config::ExtractorConfig;
use crate::error::ExtractorError;
use crate::manifest::{best_variant, parse_master_playlist};
use crate::models::{PlayerResponse, StreamingData};
use crate::persona::ClientPersona;
use crate::selection::{CandidatePools, ManifestRef, PlaybackSource};
use crate::transport::{DEFAULT_UA, HttpRequest, HttpTransport};
use crate::video_id::extract_video_id;
use crate::watch_page::{WatchPageConfig, player_endpoint_url, watch_page_url};

pub struct NativeExtractor {
    transport: Arc<dyn HttpTransport>,
    config: Arc<ExtractorConfig>,
}

impl NativeExtractor {
    pub fn new(transport: Arc<dyn HttpTransport>, config: Arc<ExtractorConfig>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    #[instrument(skip(self), fields(backend = "native"))]
    pub async fn extract(&self, input: &str) -> Result<PlaybackSource, ExtractorError> {
        let video_id =
            extract_video_id(input).ok_or_else(|| ExtractorError::InvalidUrl(input.to_owned()))?;
        let page = self.fetch_watch_page(&video_id).await?;

        let mut pools = CandidatePools::new();
        for persona in &self.config.personas {
            match self.query_persona(persona, &video_id, &page).await {
                Ok(data) => {
                    debug!(
                        persona = %persona.key,
                        formats = data.formats.len(),
                        adaptive = data.adaptive_formats.len(),
                        hls = data.hls_manifest_url.is_some(),
                        "Persona returned streaming data"
                    );
                    pools.absorb(persona, &data);
                }
                Err(e) => warn!(persona = %persona.key, error = %e, "Persona failed; continuing"),
            }
        }

        let manifests = std::mem::take(&mut pools.manifests);
        for manifest in &manifests {
            match self.fetch_manifest(manifest).await {
                Ok(candidate) => pools.offer_manifest(candidate),
                Err(e) => warn!(
                    persona = %manifest.persona,
                    url = %manifest.url,
                    error = %e,
                    "Manifest failed; continuing"
                ),
            }
        }

        pools
            .select(&self.config.preferred_persona)
            .ok_or(ExtractorError::NoStreamsFound)
    }

    async fn fetch_watch_page(&self, video_id: &str) -> Result<WatchPageConfig, ExtractorError> {
        let url = watch_page_url(&self.config.host, video_id, &self.config.language);
        let request = HttpRequest::get(&url)
            .header("user-agent", DEFAULT_UA)
            .header("accept-language", format!("{},*;q=0.8", self.config.language));
        let body = self
            .transport
            .execute(request)
            .await?
            .into_success_body(&url, "watch page")?;
        WatchPageConfig::parse(&body, video_id)
    }

    #[instrument(skip(self, persona, page), fields(persona = %persona.key))]
    async fn query_persona(
        &self,
        persona: &ClientPersona,
        video_id: &str,
        page: &WatchPageConfig,
    ) -> Result<StreamingData, ExtractorError> {
        let url = player_endpoint_url(&self.config.host, &page.api_key);
        let body = persona.player_request_body(video_id, &self.config.language);

        let mut request = HttpRequest::post(&url, body.to_string())
            .header("content-type", "application/json")
            .header("origin", format!("https://{}", self.config.host))
            .header("user-agent", &persona.user_agent)
            .header("x-youtube-client-name", persona.client_id.to_string())
            .header("x-youtube-client-version", &persona.version);
        if let Some(visitor) = &page.visitor_data {
            request = request.header("x-goog-visitor-id", visitor);
        }

        let body = self
            .transport
            .execute(request)
            .await?
            .into_success_body(&url, "player request")?;
        let response: PlayerResponse = serde_json::from_str(&body)?;
        let status = response.status().to_owned();
        response
            .streaming_data
            .ok_or_else(|| ExtractorError::NoStreamingData {
                persona: persona.key.clone(),
                status,
            })
    }

    async fn fetch_manifest(
        &self,
        manifest: &ManifestRef,
    ) -> Result<ManifestCandidate, ExtractorError> {
        let user_agent = self
            .config
            .personas
            .iter()
            .find(|p| p.key == manifest.persona)
            .map_or(DEFAULT_UA, |p| p.user_agent.as_str());
        let request = HttpRequest::get(&manifest.url).header("user-agent", user_agent);
        let text = self
            .transport
            .execute(request)
            .await?
            .into_success_body(&manifest.url, "hls manifest")?;

        let variants = parse_master_playlist(&text, &manifest.url);
        let best = best_variant(&variants).ok_or_else(|| {
            ExtractorError::HlsPlaylistError(format!("no variants in {}", manifest.url))
        })?;

        Ok(ManifestCandidate {
            persona: manifest.persona.clone(),
            priority: manifest.priority,
            manifest_url: manifest.url.clone(),
            variant_url: best.uri.clone(),
            width: best.width,
            height: best.height,
            bandwidth: best.bandwidth,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::HttpResponse;
    use crate::transport::mock::{MockTransport, ok};

    pub(crate) const WATCH_PAGE: &str = r#"<html><script>ytcfg.set({"INNERTUBE_API_KEY":"AIzaTestKey","VISITOR_DATA":"CgtWaXM"});</script></html>"#;

    pub(crate) const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720
https://manifest.example.com/720/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080
https://manifest.example.com/1080/index.m3u8
";

    pub(crate) fn is_watch(req: &HttpRequest) -> bool {
        req.url.contains("/watch?v=dQw4w9WgXcQ")
    }

    pub(crate) fn is_player_for(req: &HttpRequest, persona: &ClientPersona) -> bool {
        req.url.contains("/youtubei/v1/player")
            && req.header_value("x-youtube-client-name") == Some(persona.client_id.to_string().as_str())
    }

    pub(crate) fn vr_player_body() -> String {
        serde_json::json!({
            "playabilityStatus": {"status": "OK"},
            "streamingData": {
                "adaptiveFormats": [
                    {"itag": 137, "url": "https://r1.example.com/videoplayback?itag=137", "mimeType": "video/mp4; codecs=\"avc1.640028\"", "bitrate": 4400000, "width": 1920, "height": 1080, "fps": 30},
                    {"itag": 140, "url": "https://r1.example.com/videoplayback?itag=140", "mimeType": "audio/mp4; codecs=\"mp4a.40.2\"", "bitrate": 130000, "audioSampleRate": "44100"}
                ]
            }
        })
        .to_string()
    }

    fn extractor(transport: Arc<MockTransport>) -> NativeExtractor {
        NativeExtractor::new(transport, Arc::new(ExtractorConfig::default()))
    }

    #[tokio::test]
    async fn test_short_link_end_to_end() {
        let vr = ClientPersona::android_vr();
        let transport = Arc::new(
            MockTransport::new()
                .on(|req| is_watch(req).then(|| ok(WATCH_PAGE)).flatten())
                .on(move |req| is_player_for(req, &vr).then(|| ok(vr_player_body())).flatten()),
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
        assert_eq!(requests.len(), 1 + 4);
        let player = requests
            .iter()
            .find(|r| r.header_value("x-youtube-client-name") == Some("28"))
            .unwrap();
        assert!(player.url.contains("key=AIzaTestKey"));
        assert_eq!(player.header_value("x-goog-visitor-id"), Some("CgtWaXM"));
        let body: serde_json::Value =
            serde_json::from_str(player.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["videoId"], "dQw4w9WgXcQ");
    }

    #[tokio::test]
    async fn test_persona_failures_are_isolated() {
        let vr = ClientPersona::android_vr();
        let ios = ClientPersona::ios();
        let tv = ClientPersona::tv();
        let transport = Arc::new(
            MockTransport::new()
                .on(|req| is_watch(req).then(|| ok(WATCH_PAGE)).flatten())
                .on(move |req| {
                    is_player_for(req, &ios).then(|| HttpResponse {
                        status: 500,
                        body: String::new(),
                    })
                })
                .on(move |req| is_player_for(req, &tv).then(|| ok("{not json")).flatten())
                .on(move |req| is_player_for(req, &vr).then(|| ok(vr_player_body())).flatten())
                .on(|req| {
                    req.url
                        .contains("/youtubei/v1/player")
                        .then(|| ok(r#"{"playabilityStatus":{"status":"LOGIN_REQUIRED"}}"#))
                        .flatten()
                }),
        );

        let source = extractor(transport).extract("dQw4w9WgXcQ").await.unwrap();
        assert!(source.video_url.contains("itag=137"));
    }

    #[tokio::test]
    async fn test_missing_api_key_aborts_before_personas() {
        let transport = Arc::new(
            MockTransport::new().on(|req| is_watch(req).then(|| ok("<html></html>")).flatten()),
        );
        let err = extractor(transport.clone())
            .extract("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::MissingApiKey { .. }));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_input_makes_no_requests() {
        let transport = Arc::new(MockTransport::new());
        let err = extractor(transport.clone())
            .extract("https://example.com/nothing-here")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::InvalidUrl(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_manifest_only_persona() {
        let ios = ClientPersona::ios();
        let transport = Arc::new(
            MockTransport::new()
                .on(|req| is_watch(req).then(|| ok(WATCH_PAGE)).flatten())
                .on(move |req| {
                    is_player_for(req, &ios)
                        .then(|| {
                            ok(r#"{"streamingData":{"hlsManifestUrl":"https://manifest.example.com/master.m3u8"}}"#)
                        })
                        .flatten()
                })
                .on(|req| req.url.ends_with("master.m3u8").then(|| ok(MASTER)).flatten()),
        );

        let source = extractor(transport).extract("dQw4w9WgXcQ").await.unwrap();
        assert_eq!(
            source.video_url,
            "https://manifest.example.com/1080/index.m3u8"
        );
        assert_eq!(source.audio_url, None);
    }

    #[tokio::test]
    async fn test_broken_manifest_falls_back_to_progressive() {
        let tv = ClientPersona::tv();
        let transport = Arc::new(
            MockTransport::new()
                .on(|req| is_watch(req).then(|| ok(WATCH_PAGE)).flatten())
                .on(move |req| {
                    is_player_for(req, &tv)
                        .then(|| {
                            ok(r#"{"streamingData":{
                                "hlsManifestUrl":"https://manifest.example.com/gone.m3u8",
                                "formats":[{"itag":18,"url":"https://r1.example.com/18","mimeType":"video/mp4","height":360,"fps":30,"bitrate":500000}]
                            }}"#)
                        })
                        .flatten()
                }),
        );

        let source = extractor(transport).extract("dQw4w9WgXcQ").await.unwrap();
        assert_eq!(source.video_url, "https://r1.example.com/18");
    }

    #[tokio::test]
    async fn test_exhaustion_is_no_streams() {
        let transport =
            Arc::new(MockTransport::new().on(|req| is_watch(req).then(|| ok(WATCH_PAGE)).flatten()));
        let err = extractor(transport.clone())
            .extract("dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::NoStreamsFound));
        assert_eq!(transport.requests().len(), 5);
    }
}
