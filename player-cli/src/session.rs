//! One playback: resolve, stream, match the display, restore it.

use std::sync::Arc;

use afr_engine::{
    DetectedFrameRate, DisplayHandle, DisplayRateMatcher, FrameRateDetector, SwitchOutcome,
};
use datasource_engine::{DataSource, DataSourceFactory, DataSpec};
use serde::Serialize;
use stream_extractor::{HostExtractor, PlaybackSource, is_hosted_video};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::AppConfig;
use crate::display::StaticDisplay;
use crate::error::{Result, TvplayError};

const COPY_BUFFER: usize = 256 * 1024;

/// Destination for a separate audio stream.
pub type AudioSink<'a> = &'a mut (dyn AsyncWrite + Unpin + Send);

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackReport {
    pub source: PlaybackSource,
    pub bytes: u64,
    /// Bytes of the separate audio stream, when one was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_bytes: Option<u64>,
    /// Switch made for the content, if any.
    pub display: Option<SwitchOutcome>,
    /// Switch back at the end of the session, if any.
    pub restored: Option<SwitchOutcome>,
}

pub struct PlaybackSession {
    extractor: HostExtractor,
    sources: DataSourceFactory,
    matcher: DisplayRateMatcher,
    detector: FrameRateDetector,
}

impl PlaybackSession {
    /// Build from configuration with the network transports, ffprobe and the
    /// configured display.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let extractor = HostExtractor::new(config.extractor.clone())?;
        let sources = DataSourceFactory::new(config.datasource.clone())?;
        let display = match StaticDisplay::from_config(&config.display) {
            Some(display) => DisplayHandle::attached(Arc::new(display)),
            None => DisplayHandle::new(),
        };
        let matcher = DisplayRateMatcher::new(display, config.afr.clone());
        let detector = FrameRateDetector::ffprobe(config.afr.clone());
        Ok(Self::from_parts(extractor, sources, matcher, detector))
    }

    pub fn from_parts(
        extractor: HostExtractor,
        sources: DataSourceFactory,
        matcher: DisplayRateMatcher,
        detector: FrameRateDetector,
    ) -> Self {
        Self {
            extractor,
            sources,
            matcher,
            detector,
        }
    }

    pub fn matcher(&self) -> &DisplayRateMatcher {
        &self.matcher
    }

    /// Bare ids and URLs on the video host go through the extractor; any
    /// other absolute URL is taken as a direct media URL.
    pub async fn resolve(&self, input: &str) -> Option<PlaybackSource> {
        if is_hosted_video(input) {
            return self.extractor.resolve_playback_source(input).await;
        }
        match Url::parse(input) {
            Ok(url) => {
                debug!(%url, "Treating input as a direct media URL");
                Some(PlaybackSource {
                    video_url: url.into(),
                    audio_url: None,
                })
            }
            Err(e) => {
                warn!(input, error = %e, "Input is neither a hosted video nor a URL");
                None
            }
        }
    }

    /// Resolve `input` and report the frame rate of its video stream.
    pub async fn probe_frame_rate(
        &self,
        input: &str,
    ) -> Result<(PlaybackSource, Option<DetectedFrameRate>)> {
        let source = self
            .resolve(input)
            .await
            .ok_or_else(|| TvplayError::NoSource(input.to_owned()))?;
        let detected = self.detector.detect(&source.video_url).await;
        Ok((source, detected))
    }

    /// Stream the video of `input` into `sink` while the display is matched to
    /// it. A separate audio stream is not fetched; see [`Self::play_source`].
    #[instrument(skip(self, sink))]
    pub async fn play<W>(&self, input: &str, sink: &mut W) -> Result<PlaybackReport>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let source = self
            .resolve(input)
            .await
            .ok_or_else(|| TvplayError::NoSource(input.to_owned()))?;
        self.play_source(source, sink, None).await
    }

    /// Stream a resolved source: video into `video`, the separate audio stream
    /// (if the source has one) into `audio`. Both copies run alongside display
    /// matching. The display is restored before returning, also when streaming
    /// fails.
    #[instrument(skip_all, fields(video = %source.video_url))]
    pub async fn play_source<W>(
        &self,
        source: PlaybackSource,
        video: &mut W,
        audio: Option<AudioSink<'_>>,
    ) -> Result<PlaybackReport>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let url = source.video_url.clone();

        let mut data = self.sources.create(&url)?;
        let length = data.open(DataSpec::new(&url)).await?;
        info!(length = ?length, "Streaming");

        let mut audio = match (source.audio_url.as_deref(), audio) {
            (Some(audio_url), Some(sink)) => {
                let mut audio_data = self.sources.create(audio_url)?;
                let audio_length = audio_data.open(DataSpec::new(audio_url)).await?;
                info!(length = ?audio_length, "Streaming separate audio");
                Some((audio_data, sink))
            }
            (Some(audio_url), None) => {
                warn!(audio_url, "No audio output given; the separate audio stream is dropped");
                None
            }
            (None, _) => None,
        };

        let afr = async {
            match self.matcher.match_url(&self.detector, &url).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Frame-rate matching failed");
                    None
                }
            }
        };
        let audio_copy = async {
            match audio.as_mut() {
                Some((audio_data, sink)) => copy_to(audio_data, &mut **sink).await.map(Some),
                None => Ok(None),
            }
        };
        let (display, copied, audio_copied) =
            tokio::join!(afr, copy_to(&mut data, video), audio_copy);

        if let Err(e) = data.close().await {
            debug!(error = %e, "Closing data source failed");
        }
        if let Some((mut audio_data, _)) = audio
            && let Err(e) = audio_data.close().await
        {
            debug!(error = %e, "Closing audio source failed");
        }
        let restored = match self.matcher.restore().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Restoring display mode failed");
                None
            }
        };

        let bytes = copied?;
        let audio_bytes = audio_copied?;
        info!(bytes, ?audio_bytes, "Playback finished");
        Ok(PlaybackReport {
            source,
            bytes,
            audio_bytes,
            display,
            restored,
        })
    }
}

async fn copy_to<S, W>(source: &mut S, sink: &mut W) -> Result<u64>
where
    S: DataSource + ?Sized,
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    sink.flush().await?;
    Ok(total)
}
