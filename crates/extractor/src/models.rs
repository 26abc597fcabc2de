//! Typed, partial view of the player-info response.
//!
//! Only the fields the extractor reads are modelled; every one of them is
//! optional and each accessor states its fallback.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    #[serde(default)]
    pub playability_status: Option<PlayabilityStatus>,
    #[serde(default)]
    pub streaming_data: Option<StreamingData>,
}

impl PlayerResponse {
    pub fn status(&self) -> &str {
        self.playability_status
            .as_ref()
            .and_then(|s| s.status.as_deref())
            .unwrap_or("UNKNOWN")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayabilityStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingData {
    #[serde(default)]
    pub formats: Vec<RawFormat>,
    #[serde(default)]
    pub adaptive_formats: Vec<RawFormat>,
    #[serde(default)]
    pub hls_manifest_url: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFormat {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub itag: Option<u64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub bitrate: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub width: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub height: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub fps: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub audio_sample_rate: Option<u64>,
}

impl RawFormat {
    /// Direct URL; formats that only carry a cipher have none.
    pub fn direct_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.is_empty())
    }

    pub fn mime(&self) -> &str {
        self.mime_type.as_deref().unwrap_or("")
    }

    pub fn is_video(&self) -> bool {
        self.mime().starts_with("video/")
    }

    pub fn is_audio(&self) -> bool {
        self.mime().starts_with("audio/")
    }

    pub fn height(&self) -> u64 {
        self.height.unwrap_or(0)
    }

    pub fn fps(&self) -> u64 {
        self.fps.unwrap_or(0)
    }

    pub fn bitrate(&self) -> u64 {
        self.bitrate.unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u64 {
        self.audio_sample_rate.unwrap_or(0)
    }
}

/// Accept a number, a numeric string, or null.
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    })
}
