//! `ffprobe`-backed probes for both detection tiers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::AfrConfig;
use crate::detect::{FrameRateDetector, MediaInfoProbe, SampleTimestampProbe};
use crate::error::AfrError;

#[derive(Debug, Deserialize)]
struct StreamsOutput {
    #[serde(default)]
    streams: Vec<StreamEntry>,
}

#[derive(Debug, Deserialize)]
struct StreamEntry {
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PacketsOutput {
    #[serde(default)]
    packets: Vec<PacketEntry>,
}

#[derive(Debug, Deserialize)]
struct PacketEntry {
    pts_time: Option<String>,
}

/// `"24000/1001"` or `"25"`. Zero denominators and non-positive rates give `None`.
pub fn parse_rational(value: &str) -> Option<f64> {
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.trim().parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Declared rate of the first video stream: `avg_frame_rate`, else `r_frame_rate`.
pub fn parse_stream_frame_rate(json: &str) -> Result<Option<f64>, AfrError> {
    let output: StreamsOutput = serde_json::from_str(json)?;
    Ok(output.streams.first().and_then(|stream| {
        stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rational)
            .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rational))
    }))
}

/// Packet timestamps in µs, skipping packets without one.
pub fn parse_packet_timestamps(json: &str, max_samples: usize) -> Result<Vec<i64>, AfrError> {
    let output: PacketsOutput = serde_json::from_str(json)?;
    Ok(output
        .packets
        .iter()
        .filter_map(|packet| packet.pts_time.as_deref()?.parse::<f64>().ok())
        .map(|seconds| (seconds * 1_000_000.0).round() as i64)
        .take(max_samples)
        .collect())
}

#[derive(Debug, Clone)]
pub struct FfprobeMediaInfoProbe {
    ffprobe_path: String,
    timeout: Duration,
}

impl FfprobeMediaInfoProbe {
    pub fn new(config: &AfrConfig) -> Self {
        Self {
            ffprobe_path: config.ffprobe_path.clone(),
            timeout: config.probe_timeout,
        }
    }
}

#[async_trait]
impl MediaInfoProbe for FfprobeMediaInfoProbe {
    async fn frame_rate(&self, url: &str) -> Result<Option<f64>, AfrError> {
        let args = [
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=avg_frame_rate,r_frame_rate",
            "-of",
            "json",
            url,
        ];
        let output = process_utils::run_captured(&self.ffprobe_path, args, self.timeout).await?;
        parse_stream_frame_rate(&output.stdout)
    }
}

#[derive(Debug, Clone)]
pub struct FfprobeSampleProbe {
    ffprobe_path: String,
    timeout: Duration,
}

impl FfprobeSampleProbe {
    pub fn new(config: &AfrConfig) -> Self {
        Self {
            ffprobe_path: config.ffprobe_path.clone(),
            timeout: config.probe_timeout,
        }
    }
}

#[async_trait]
impl SampleTimestampProbe for FfprobeSampleProbe {
    async fn sample_timestamps(
        &self,
        url: &str,
        max_samples: usize,
    ) -> Result<Vec<i64>, AfrError> {
        // Read only the first `max_samples` packets instead of the whole file.
        let interval = format!("%+#{max_samples}");
        let args = [
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "packet=pts_time",
            "-read_intervals",
            interval.as_str(),
            "-of",
            "json",
            url,
        ];
        let output = process_utils::run_captured(&self.ffprobe_path, args, self.timeout).await?;
        parse_packet_timestamps(&output.stdout, max_samples)
    }
}

impl FrameRateDetector {
    /// Both tiers backed by `ffprobe`.
    pub fn ffprobe(config: AfrConfig) -> Self {
        Self::new(
            Arc::new(FfprobeMediaInfoProbe::new(&config)),
            Arc::new(FfprobeSampleProbe::new(&config)),
            config,
        )
    }
}
