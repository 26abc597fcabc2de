//! Candidate pools gathered across personas and the final pick.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::candidate::{CandidateKind, ManifestCandidate, StreamCandidate, sort_candidates};
use crate::models::StreamingData;
use crate::persona::ClientPersona;

/// Direct media URLs handed to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSource {
    pub video_url: String,
    #[serde(default)]
    pub audio_url: Option<String>,
}

/// An HLS master playlist announced by one persona, not yet fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRef {
    pub persona: String,
    pub priority: u32,
    pub url: String,
}

#[derive(Debug, Default)]
pub struct CandidatePools {
    pub muxed: Vec<StreamCandidate>,
    pub video: Vec<StreamCandidate>,
    pub audio: Vec<StreamCandidate>,
    pub manifests: Vec<ManifestRef>,
    pub best_manifest: Option<ManifestCandidate>,
}

impl CandidatePools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every usable entry of one persona's streaming data.
    pub fn absorb(&mut self, persona: &ClientPersona, data: &StreamingData) {
        if let Some(url) = data.hls_manifest_url.as_deref().filter(|u| !u.is_empty()) {
            self.manifests.push(ManifestRef {
                persona: persona.key.clone(),
                priority: persona.priority,
                url: url.to_owned(),
            });
        }

        self.muxed.extend(
            data.formats
                .iter()
                .filter(|f| f.is_video())
                .filter_map(|f| StreamCandidate::from_format(persona, f, CandidateKind::Muxed)),
        );

        for format in &data.adaptive_formats {
            let kind = if format.is_video() {
                CandidateKind::VideoOnly
            } else if format.is_audio() {
                CandidateKind::AudioOnly
            } else {
                continue;
            };
            if let Some(candidate) = StreamCandidate::from_format(persona, format, kind) {
                match kind {
                    CandidateKind::AudioOnly => self.audio.push(candidate),
                    _ => self.video.push(candidate),
                }
            }
        }
    }

    /// Keep `candidate` if it beats the best manifest variant seen so far.
    pub fn offer_manifest(&mut self, candidate: ManifestCandidate) {
        let replace = self
            .best_manifest
            .as_ref()
            .is_none_or(|best| candidate.is_better_than(best));
        if replace {
            self.best_manifest = Some(candidate);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.muxed.is_empty()
            && self.video.is_empty()
            && self.audio.is_empty()
            && self.best_manifest.is_none()
    }

    /// Pick the final URLs. `preferred` names the persona whose separate
    /// streams win when it offers any.
    pub fn select(mut self, preferred: &str) -> Option<PlaybackSource> {
        sort_candidates(&mut self.muxed);
        sort_candidates(&mut self.video);
        sort_candidates(&mut self.audio);

        let combined = match (self.best_manifest.as_ref(), self.muxed.first()) {
            (Some(manifest), Some(muxed)) if manifest.height > muxed.height => {
                Some(manifest.variant_url.clone())
            }
            (_, Some(muxed)) => Some(muxed.url.clone()),
            (Some(manifest), None) => Some(manifest.variant_url.clone()),
            (None, None) => None,
        };

        let video = pick_separate(&self.video, preferred);
        let audio = pick_separate(&self.audio, preferred);

        debug!(
            muxed = self.muxed.len(),
            video = self.video.len(),
            audio = self.audio.len(),
            manifest = self.best_manifest.is_some(),
            separate_video = video.map(|c| c.persona.as_str()),
            separate_audio = audio.map(|c| c.persona.as_str()),
            "Selecting playback source"
        );

        let video_url = video.map(|c| c.url.clone()).or(combined)?;
        Some(PlaybackSource {
            video_url,
            audio_url: audio.map(|c| c.url.clone()),
        })
    }
}

/// Best candidate of the preferred persona, else the global best.
/// `pool` must already be sorted.
fn pick_separate<'a>(pool: &'a [StreamCandidate], preferred: &str) -> Option<&'a StreamCandidate> {
    pool.iter()
        .find(|c| c.persona == preferred)
        .or_else(|| pool.first())
}
