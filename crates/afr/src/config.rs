use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for frame-rate detection and mode switching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AfrConfig {
    /// Delay between active-mode polls after a switch request.
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Give up waiting for the display to settle after this long.
    #[serde(with = "duration_millis")]
    pub switch_timeout: Duration,

    /// Consecutive polls that must report the target mode.
    pub stable_polls: u32,

    /// Sample timestamps read at most.
    pub sample_ceiling: usize,

    /// Leading samples ignored; container start-up timing is noisy.
    pub warmup_samples: usize,

    /// Inter-frame intervals needed after warm-up for a usable estimate.
    pub min_intervals: usize,

    /// Plausible content frame rates.
    pub min_fps: f64,
    pub max_fps: f64,

    pub ffprobe_path: String,

    /// Deadline for a single ffprobe run.
    #[serde(with = "duration_millis")]
    pub probe_timeout: Duration,
}

impl Default for AfrConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            switch_timeout: Duration::from_secs(3),
            stable_polls: 2,
            sample_ceiling: 380,
            warmup_samples: 30,
            min_intervals: 90,
            min_fps: 10.0,
            max_fps: 120.0,
            ffprobe_path: "ffprobe".to_owned(),
            probe_timeout: Duration::from_secs(15),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
