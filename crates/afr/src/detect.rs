//! Two-tier frame-rate detection.
//!
//! Tier one asks a media-info probe for the frame rate the container
//! declares. Tier two reads a run of sample timestamps from the first video
//! track and measures the cadence itself. For every candidate URL the first
//! tier that produces a plausible rate wins.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use crate::config::AfrConfig;
use crate::error::AfrError;
use crate::rate::snap_to_standard_rate;

/// Streaming manifests: declared rates are missing or per-variant.
const LIVE_EXTENSIONS: &[&str] = &["m3u8", "m3u", "mpd", "ism", "isml"];
/// Matroska always gets the metadata probe, whatever the scheme.
const ALWAYS_PROBE_EXTENSION: &str = "mkv";
const PROBE_SCHEMES: &[&str] = &["http", "https", "file", "content"];

/// Reads the declared frame rate from stream metadata.
#[async_trait]
pub trait MediaInfoProbe: Send + Sync {
    async fn frame_rate(&self, url: &str) -> Result<Option<f64>, AfrError>;
}

/// Reads presentation timestamps (µs) of the first video track.
#[async_trait]
pub trait SampleTimestampProbe: Send + Sync {
    async fn sample_timestamps(&self, url: &str, max_samples: usize)
    -> Result<Vec<i64>, AfrError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    MediaInfo,
    Sampling,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedFrameRate {
    /// Snapped to a standard cadence where one is close.
    pub fps: f64,
    pub raw_fps: f64,
    pub method: DetectionMethod,
    /// The URL the rate was read from.
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleEstimate {
    pub fps: f64,
    pub mean_frame_duration_us: f64,
    pub intervals: usize,
}

fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Whether the metadata probe is worth running for `url`.
pub fn should_try_media_info(url: &str) -> bool {
    let (scheme, path) = match Url::parse(url) {
        Ok(parsed) => (Some(parsed.scheme().to_owned()), parsed.path().to_owned()),
        Err(_) => (None, url.split(['?', '#']).next().unwrap_or(url).to_owned()),
    };

    match extension(&path).as_deref() {
        Some(ext) if LIVE_EXTENSIONS.contains(&ext) => false,
        Some(ALWAYS_PROBE_EXTENSION) => true,
        _ => scheme.is_none_or(|s| PROBE_SCHEMES.contains(&s.as_str())),
    }
}

/// The `url=` target of a proxy-style URL.
pub fn embedded_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "url")
        .map(|(_, value)| value.into_owned())
        .filter(|inner| inner.starts_with("http://") || inner.starts_with("https://"))
}

fn looks_like_proxy(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let loopback = matches!(
        parsed.host_str(),
        Some("localhost" | "127.0.0.1" | "[::1]")
    );
    loopback || parsed.path().to_ascii_lowercase().contains("proxy")
}

/// URLs to probe, in order. A proxy wrapper is probed after the URL it wraps;
/// any other URL carrying an embedded `url=` is probed before it.
pub fn candidate_urls(url: &str) -> Vec<String> {
    let mut candidates = vec![url.to_owned()];
    if let Some(inner) = embedded_url(url)
        && inner != url
    {
        if looks_like_proxy(url) {
            candidates.insert(0, inner);
        } else {
            candidates.push(inner);
        }
    }
    candidates
}

/// Estimate the frame rate from sample timestamps (µs).
///
/// At most `sample_ceiling` samples are considered and the first
/// `warmup_samples` are dropped. Fewer than `min_intervals` positive
/// intervals, or a rate outside `min_fps..=max_fps`, gives `None`.
pub fn compute_fps_from_samples(timestamps_us: &[i64], config: &AfrConfig) -> Option<SampleEstimate> {
    let mut window: Vec<i64> = timestamps_us
        .iter()
        .copied()
        .take(config.sample_ceiling)
        .skip(config.warmup_samples)
        .collect();
    // Decode order is not presentation order when B-frames are present.
    window.sort_unstable();

    let intervals: Vec<f64> = window
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) as f64)
        .filter(|d| *d > 0.0)
        .collect();
    if intervals.is_empty() || intervals.len() < config.min_intervals {
        return None;
    }

    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    let fps = 1_000_000.0 / mean;
    (config.min_fps..=config.max_fps)
        .contains(&fps)
        .then_some(SampleEstimate {
            fps,
            mean_frame_duration_us: mean,
            intervals: intervals.len(),
        })
}

pub struct FrameRateDetector {
    media_info: Arc<dyn MediaInfoProbe>,
    sampler: Arc<dyn SampleTimestampProbe>,
    config: AfrConfig,
}

impl FrameRateDetector {
    pub fn new(
        media_info: Arc<dyn MediaInfoProbe>,
        sampler: Arc<dyn SampleTimestampProbe>,
        config: AfrConfig,
    ) -> Self {
        Self {
            media_info,
            sampler,
            config,
        }
    }

    fn is_plausible(&self, fps: f64) -> bool {
        fps.is_finite() && (self.config.min_fps..=self.config.max_fps).contains(&fps)
    }

    /// Frame rate of `url`, or `None` when no tier produced a usable value.
    #[instrument(skip(self), level = "debug")]
    pub async fn detect(&self, url: &str) -> Option<DetectedFrameRate> {
        for candidate in candidate_urls(url) {
            if should_try_media_info(&candidate) {
                match self.media_info.frame_rate(&candidate).await {
                    Ok(Some(fps)) if self.is_plausible(fps) => {
                        debug!(url = %candidate, fps, "Frame rate from metadata");
                        return Some(DetectedFrameRate {
                            fps: snap_to_standard_rate(fps, None),
                            raw_fps: fps,
                            method: DetectionMethod::MediaInfo,
                            url: candidate,
                        });
                    }
                    Ok(fps) => debug!(url = %candidate, ?fps, "No usable declared frame rate"),
                    Err(e) => debug!(url = %candidate, error = %e, "Metadata probe failed"),
                }
            }

            let timestamps = match self
                .sampler
                .sample_timestamps(&candidate, self.config.sample_ceiling)
                .await
            {
                Ok(timestamps) => timestamps,
                Err(e) => {
                    debug!(url = %candidate, error = %e, "Sample probe failed");
                    continue;
                }
            };
            match compute_fps_from_samples(&timestamps, &self.config) {
                Some(estimate) => {
                    debug!(
                        url = %candidate,
                        fps = estimate.fps,
                        intervals = estimate.intervals,
                        "Frame rate from samples"
                    );
                    return Some(DetectedFrameRate {
                        fps: snap_to_standard_rate(
                            estimate.fps,
                            Some(estimate.mean_frame_duration_us),
                        ),
                        raw_fps: estimate.fps,
                        method: DetectionMethod::Sampling,
                        url: candidate,
                    });
                }
                None => debug!(
                    url = %candidate,
                    samples = timestamps.len(),
                    "Too few usable samples"
                ),
            }
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeMediaInfo {
        pub rates: HashMap<String, f64>,
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MediaInfoProbe for FakeMediaInfo {
        async fn frame_rate(&self, url: &str) -> Result<Option<f64>, AfrError> {
            self.calls.lock().push(url.to_owned());
            Ok(self.rates.get(url).copied())
        }
    }

    #[derive(Default)]
    pub struct FakeSampler {
        pub samples: HashMap<String, Vec<i64>>,
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SampleTimestampProbe for FakeSampler {
        async fn sample_timestamps(
            &self,
            url: &str,
            max_samples: usize,
        ) -> Result<Vec<i64>, AfrError> {
            self.calls.lock().push(url.to_owned());
            self.samples
                .get(url)
                .map(|s| s.iter().copied().take(max_samples).collect())
                .ok_or_else(|| AfrError::Probe(format!("cannot open {url}")))
        }
    }

    /// `count` timestamps spaced `frame_us` apart.
    pub fn cadence(count: usize, frame_us: f64) -> Vec<i64> {
        (0..count).map(|i| (i as f64 * frame_us).round() as i64).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use crate::rate::NTSC_FILM_FRAME_US;

    #[test]
    fn test_media_info_eligibility() {
        assert!(should_try_media_info("https://cdn.example.com/movie.mp4"));
        assert!(should_try_media_info("file:///media/movie.mp4"));
        assert!(should_try_media_info("content://media/external/video/12"));
        assert!(should_try_media_info("/storage/movie.mp4"));
        assert!(!should_try_media_info("https://cdn.example.com/live/index.m3u8"));
        assert!(!should_try_media_info("https://cdn.example.com/manifest.MPD?x=1"));
        assert!(!should_try_media_info("rtsp://camera.local/stream"));
        assert!(should_try_media_info("smb://nas/movies/film.mkv"));
    }

    #[test]
    fn test_candidate_order() {
        let inner = "https://cdn.example.com/movie.mp4";
        let proxy = format!("http://127.0.0.1:8080/stream?url={}", urlencode(inner));
        assert_eq!(candidate_urls(&proxy), vec![inner.to_owned(), proxy.clone()]);

        let tracker = format!("https://example.com/play?url={}", urlencode(inner));
        assert_eq!(candidate_urls(&tracker), vec![tracker.clone(), inner.to_owned()]);

        assert_eq!(candidate_urls(inner), vec![inner.to_owned()]);
        assert_eq!(
            candidate_urls("https://example.com/p?url=ftp://x/y"),
            vec!["https://example.com/p?url=ftp://x/y".to_owned()]
        );
    }

    fn urlencode(s: &str) -> String {
        url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
    }

    #[test]
    fn test_compute_from_samples() {
        let config = AfrConfig::default();
        let estimate = compute_fps_from_samples(&cadence(380, NTSC_FILM_FRAME_US), &config).unwrap();
        assert!((estimate.fps - 23.976).abs() < 0.001);
        assert_eq!(estimate.intervals, 349);

        // Warm-up noise is ignored.
        let mut noisy = cadence(200, 40_000.0);
        noisy[..30].iter_mut().for_each(|t| *t *= 3);
        let estimate = compute_fps_from_samples(&noisy, &config).unwrap();
        assert!((estimate.fps - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_needs_enough_intervals() {
        let config = AfrConfig::default();
        // 30 warm-up + 91 samples = 90 intervals.
        assert!(compute_fps_from_samples(&cadence(121, 40_000.0), &config).is_some());
        assert!(compute_fps_from_samples(&cadence(120, 40_000.0), &config).is_none());
        assert!(compute_fps_from_samples(&[], &config).is_none());
    }

    #[test]
    fn test_compute_rejects_implausible_rates() {
        let config = AfrConfig::default();
        // 5 fps and 200 fps.
        assert!(compute_fps_from_samples(&cadence(380, 200_000.0), &config).is_none());
        assert!(compute_fps_from_samples(&cadence(380, 5_000.0), &config).is_none());
    }

    #[test]
    fn test_compute_sorts_reordered_samples() {
        let config = AfrConfig::default();
        let mut samples = cadence(380, 40_000.0);
        for pair in samples[40..].chunks_mut(2) {
            pair.reverse();
        }
        let estimate = compute_fps_from_samples(&samples, &config).unwrap();
        assert!((estimate.fps - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_metadata_wins_over_sampling() {
        let url = "https://cdn.example.com/movie.mp4";
        let media_info = Arc::new(FakeMediaInfo {
            rates: [(url.to_owned(), 23.976_02)].into(),
            ..Default::default()
        });
        let sampler = Arc::new(FakeSampler::default());
        let detector = FrameRateDetector::new(media_info, sampler.clone(), AfrConfig::default());

        let detected = detector.detect(url).await.unwrap();
        assert_eq!(detected.method, DetectionMethod::MediaInfo);
        assert_eq!(detected.fps, 23.976);
        assert!(sampler.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sampling_fallback_and_live_skip() {
        let url = "https://cdn.example.com/live/index.m3u8";
        let media_info = Arc::new(FakeMediaInfo::default());
        let sampler = Arc::new(FakeSampler {
            samples: [(url.to_owned(), cadence(380, 1_000_000.0 / 24.0))].into(),
            ..Default::default()
        });
        let detector = FrameRateDetector::new(media_info.clone(), sampler, AfrConfig::default());

        let detected = detector.detect(url).await.unwrap();
        assert_eq!(detected.method, DetectionMethod::Sampling);
        assert_eq!(detected.fps, 24.0);
        assert!(media_info.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_proxy_inner_url_probed_first() {
        let inner = "https://cdn.example.com/movie.mp4";
        let proxy = format!("http://localhost:9000/proxy?url={}", urlencode(inner));
        let media_info = Arc::new(FakeMediaInfo {
            rates: [(inner.to_owned(), 50.0), (proxy.clone(), 25.0)].into(),
            ..Default::default()
        });
        let sampler = Arc::new(FakeSampler::default());
        let detector = FrameRateDetector::new(media_info.clone(), sampler, AfrConfig::default());

        let detected = detector.detect(&proxy).await.unwrap();
        assert_eq!(detected.url, inner);
        assert_eq!(detected.fps, 50.0);
        assert_eq!(media_info.calls.lock().as_slice(), [inner.to_owned()]);
    }

    #[tokio::test]
    async fn test_nothing_detected() {
        let media_info = Arc::new(FakeMediaInfo::default());
        let sampler = Arc::new(FakeSampler::default());
        let detector = FrameRateDetector::new(media_info, sampler.clone(), AfrConfig::default());

        let url = "https://example.com/play?url=https%3A%2F%2Fcdn.example.com%2Fa.mp4";
        assert!(detector.detect(url).await.is_none());
        assert_eq!(sampler.calls.lock().len(), 2);
    }
}
