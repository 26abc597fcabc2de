//! Scored stream candidates and their ordering rules.

use std::cmp::Ordering;

use url::Url;

use crate::models::RawFormat;
use crate::persona::ClientPersona;

const HEIGHT_WEIGHT: u64 = 1_000_000_000;
const FPS_WEIGHT: u64 = 1_000_000;
const AUDIO_BITRATE_WEIGHT: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// Progressive file with muxed audio and video.
    Muxed,
    VideoOnly,
    AudioOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCandidate {
    pub persona: String,
    pub priority: u32,
    pub url: String,
    pub kind: CandidateKind,
    pub score: u64,
    /// URL carries the rotating `n` parameter.
    pub has_n_param: bool,
    pub mime_type: String,
    pub height: u64,
    pub fps: u64,
}

impl StreamCandidate {
    pub fn from_format(persona: &ClientPersona, format: &RawFormat, kind: CandidateKind) -> Option<Self> {
        let url = format.direct_url()?;
        let score = match kind {
            CandidateKind::Muxed | CandidateKind::VideoOnly => video_score(format),
            CandidateKind::AudioOnly => audio_score(format),
        };
        Some(Self {
            persona: persona.key.clone(),
            priority: persona.priority,
            url: url.to_owned(),
            kind,
            score,
            has_n_param: has_n_param(url),
            mime_type: format.mime().to_owned(),
            height: format.height(),
            fps: format.fps(),
        })
    }
}

/// Resolution dominates frame rate, which dominates bitrate.
pub fn video_score(format: &RawFormat) -> u64 {
    format
        .height()
        .saturating_mul(HEIGHT_WEIGHT)
        .saturating_add(format.fps().saturating_mul(FPS_WEIGHT))
        .saturating_add(format.bitrate())
}

pub fn audio_score(format: &RawFormat) -> u64 {
    format
        .bitrate()
        .saturating_mul(AUDIO_BITRATE_WEIGHT)
        .saturating_add(format.sample_rate())
}

pub fn has_n_param(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.query_pairs().any(|(k, _)| k == "n"))
        .unwrap_or(false)
}

/// Score descending, stable URLs first, then persona priority. The trailing
/// persona/url keys only make the order total so evaluation order never matters.
pub fn compare_candidates(a: &StreamCandidate, b: &StreamCandidate) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.has_n_param.cmp(&b.has_n_param))
        .then_with(|| a.priority.cmp(&b.priority))
        .then_with(|| a.persona.cmp(&b.persona))
        .then_with(|| a.url.cmp(&b.url))
}

pub fn sort_candidates(candidates: &mut [StreamCandidate]) {
    candidates.sort_by(compare_candidates);
}

/// Best HLS variant offered by one persona's master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestCandidate {
    pub persona: String,
    pub priority: u32,
    pub manifest_url: String,
    pub variant_url: String,
    pub width: u64,
    pub height: u64,
    pub bandwidth: u64,
}

impl ManifestCandidate {
    /// Height, then bandwidth, then width.
    pub fn quality_cmp(&self, other: &Self) -> Ordering {
        self.height
            .cmp(&other.height)
            .then_with(|| self.bandwidth.cmp(&other.bandwidth))
            .then_with(|| self.width.cmp(&other.width))
    }

    pub fn is_better_than(&self, other: &Self) -> bool {
        match self.quality_cmp(other) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => {
                (self.priority, &self.persona, &self.variant_url)
                    < (other.priority, &other.persona, &other.variant_url)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn candidate(persona: &str, priority: u32, score: u64, n: bool) -> StreamCandidate {
        StreamCandidate {
            persona: persona.to_owned(),
            priority,
            url: format!("https://host/{persona}/{score}/{n}"),
            kind: CandidateKind::VideoOnly,
            score,
            has_n_param: n,
            mime_type: "video/mp4".to_owned(),
            height: 0,
            fps: 0,
        }
    }

    fn format(height: u64, fps: u64, bitrate: u64) -> RawFormat {
        RawFormat {
            height: Some(height),
            fps: Some(fps),
            bitrate: Some(bitrate),
            ..Default::default()
        }
    }

    #[test]
    fn test_video_score_is_lexicographic() {
        assert!(video_score(&format(1080, 24, 1)) > video_score(&format(720, 60, 9_000_000)));
        assert!(video_score(&format(1080, 60, 1)) > video_score(&format(1080, 30, 900_000)));
        assert!(video_score(&format(1080, 30, 5)) > video_score(&format(1080, 30, 4)));
    }

    #[test]
    fn test_audio_score() {
        let high = RawFormat {
            bitrate: Some(160_000),
            audio_sample_rate: Some(44_100),
            ..Default::default()
        };
        let low = RawFormat {
            bitrate: Some(128_000),
            audio_sample_rate: Some(48_000),
            ..Default::default()
        };
        assert!(audio_score(&high) > audio_score(&low));
    }

    #[test]
    fn test_n_param_detection() {
        assert!(has_n_param("https://r1.example.com/videoplayback?itag=22&n=abc"));
        assert!(!has_n_param("https://r1.example.com/videoplayback?itag=22&nn=abc"));
        assert!(!has_n_param("not a url"));
    }

    #[test]
    fn test_tie_breaks() {
        let mut pool = vec![
            candidate("tv", 2, 10, false),
            candidate("ios", 1, 10, true),
            candidate("android_vr", 0, 10, true),
            candidate("mweb", 3, 20, true),
        ];
        sort_candidates(&mut pool);
        let order: Vec<&str> = pool.iter().map(|c| c.persona.as_str()).collect();
        assert_eq!(order, vec!["mweb", "tv", "android_vr", "ios"]);
    }

    #[test]
    fn test_manifest_ordering() {
        let base = ManifestCandidate {
            persona: "ios".to_owned(),
            priority: 1,
            manifest_url: "m".to_owned(),
            variant_url: "v".to_owned(),
            width: 1280,
            height: 720,
            bandwidth: 9_000_000,
        };
        let taller = ManifestCandidate {
            height: 1080,
            bandwidth: 1,
            width: 1,
            ..base.clone()
        };
        let wider = ManifestCandidate {
            width: 1920,
            ..base.clone()
        };
        let richer = ManifestCandidate {
            bandwidth: 9_000_001,
            width: 1,
            ..base.clone()
        };
        assert!(taller.is_better_than(&base));
        assert!(wider.is_better_than(&base));
        assert!(richer.is_better_than(&wider));
        assert!(!base.is_better_than(&taller));
    }

    fn arb_candidate() -> impl Strategy<Value = StreamCandidate> {
        (
            prop::sample::select(vec!["android_vr", "ios", "tv", "mweb"]),
            0u32..4,
            0u64..1_000,
            any::<bool>(),
        )
            .prop_map(|(p, prio, score, n)| candidate(p, prio, score, n))
    }

    proptest! {
        #[test]
        fn prop_sort_is_idempotent(mut pool in prop::collection::vec(arb_candidate(), 0..40)) {
            sort_candidates(&mut pool);
            let once = pool.clone();
            sort_candidates(&mut pool);
            prop_assert_eq!(once, pool);
        }

        #[test]
        fn prop_sort_respects_keys(mut pool in prop::collection::vec(arb_candidate(), 0..40)) {
            sort_candidates(&mut pool);
            for pair in pool.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                prop_assert!(a.score >= b.score);
                if a.score == b.score {
                    prop_assert!(a.has_n_param <= b.has_n_param);
                    if a.has_n_param == b.has_n_param {
                        prop_assert!(a.priority <= b.priority);
                    }
                }
            }
        }

        #[test]
        fn prop_order_independent_of_input(pool in prop::collection::vec(arb_candidate(), 0..40)) {
            let mut forward = pool.clone();
            let mut reversed: Vec<_> = pool.into_iter().rev().collect();
            sort_candidates(&mut forward);
            sort_candidates(&mut reversed);
            prop_assert_eq!(forward, reversed);
        }
    }
}
