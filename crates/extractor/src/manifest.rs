//! HLS master playlist reading.
//!
//! Playlists are parsed with `m3u8_rs`. Hosts occasionally serve master
//! playlists it refuses (a missing `#EXTM3U` header, malformed attributes,
//! comments between a `#EXT-X-STREAM-INF` tag and its URI); those are read
//! again line by line, pairing each tag with the next non-comment line.

use std::cmp::Ordering;

use m3u8_rs::{MasterPlaylist, Playlist, parse_playlist_res};
use tracing::debug;
use url::Url;

const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlsVariant {
    pub uri: String,
    pub width: u64,
    pub height: u64,
    pub bandwidth: u64,
}

impl HlsVariant {
    /// Height, then bandwidth, then width.
    pub fn quality_cmp(&self, other: &Self) -> Ordering {
        self.height
            .cmp(&other.height)
            .then_with(|| self.bandwidth.cmp(&other.bandwidth))
            .then_with(|| self.width.cmp(&other.width))
    }
}

/// Split an attribute list on commas that are not inside double quotes.
/// Values keep their raw form minus surrounding quotes.
pub fn parse_attribute_list(input: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let mut flush = |part: &mut String| {
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            if !key.is_empty() {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                attributes.push((key.to_ascii_uppercase(), value.to_owned()));
            }
        }
        part.clear();
    };

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => flush(&mut current),
            _ => current.push(ch),
        }
    }
    flush(&mut current);

    attributes
}

fn attribute<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn parse_resolution(value: &str) -> Option<(u64, u64)> {
    let (w, h) = value.split_once(['x', 'X'])?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn resolve_uri(base: Option<&Url>, uri: &str) -> String {
    base.and_then(|b| b.join(uri).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| uri.to_owned())
}

/// Parse every variant of a master playlist. `base_url` resolves relative URIs.
pub fn parse_master_playlist(text: &str, base_url: &str) -> Vec<HlsVariant> {
    let base = Url::parse(base_url).ok();
    match parse_playlist_res(text.as_bytes()) {
        Ok(Playlist::MasterPlaylist(playlist)) => match variants_of(&playlist, base.as_ref()) {
            Some(variants) => return variants,
            None => debug!("Master playlist has unusable variant URIs; reading it leniently"),
        },
        Ok(Playlist::MediaPlaylist(_)) => {
            debug!("Playlist parsed as a media playlist; reading it leniently");
        }
        Err(e) => debug!(error = %e, "Playlist rejected by parser; reading it leniently"),
    }
    parse_leniently(text, base.as_ref())
}

/// Non-I-frame variants, or `None` when the playlist yielded nothing usable.
fn variants_of(playlist: &MasterPlaylist, base: Option<&Url>) -> Option<Vec<HlsVariant>> {
    let variants: Vec<_> = playlist
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .map(|v| {
            let (width, height) = v.resolution.map_or((0, 0), |r| (r.width, r.height));
            HlsVariant {
                uri: v.uri.trim().to_owned(),
                width,
                height,
                bandwidth: v.bandwidth,
            }
        })
        .collect();

    if variants.is_empty() || variants.iter().any(|v| v.uri.is_empty() || v.uri.starts_with('#')) {
        return None;
    }
    Some(
        variants
            .into_iter()
            .map(|v| HlsVariant {
                uri: resolve_uri(base, &v.uri),
                ..v
            })
            .collect(),
    )
}

fn parse_leniently(text: &str, base: Option<&Url>) -> Vec<HlsVariant> {
    let mut variants = Vec::new();
    let mut pending: Option<Vec<(String, String)>> = None;

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(attrs) = line.strip_prefix(STREAM_INF_TAG) {
            pending = Some(parse_attribute_list(attrs));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if let Some(attributes) = pending.take() {
            let (width, height) = attribute(&attributes, "RESOLUTION")
                .and_then(parse_resolution)
                .unwrap_or((0, 0));
            let bandwidth = attribute(&attributes, "BANDWIDTH")
                .and_then(|b| b.parse().ok())
                .unwrap_or(0);
            variants.push(HlsVariant {
                uri: resolve_uri(base, line),
                width,
                height,
                bandwidth,
            });
        }
    }

    variants
}

pub fn best_variant(variants: &[HlsVariant]) -> Option<&HlsVariant> {
    variants.iter().max_by(|a, b| a.quality_cmp(b))
}
