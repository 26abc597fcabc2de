use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static VIDEO_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap());

static PATH_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:embed|shorts|live)/([A-Za-z0-9_-]{11})(?:[/?#]|$)").unwrap());

#[inline]
pub fn is_video_id(candidate: &str) -> bool {
    VIDEO_ID_REGEX.is_match(candidate)
}

/// Parse a content identifier out of a watch URL, short link, embed/shorts/live
/// path or a bare 11-character id.
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if is_video_id(input) {
        return Some(input.to_owned());
    }

    let url = Url::parse(input)
        .or_else(|_| Url::parse(&format!("https://{input}")))
        .ok()?;

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if host == "youtu.be" || host.ends_with(".youtu.be") {
        let first = url.path_segments().and_then(|mut s| s.next());
        if let Some(id) = first.filter(|s| is_video_id(s)) {
            return Some(id.to_owned());
        }
    }

    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v")
        && is_video_id(&v)
    {
        return Some(v.into_owned());
    }

    PATH_ID_REGEX
        .captures(url.path())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

const VIDEO_HOSTS: [&str; 3] = ["youtube.com", "youtu.be", "youtube-nocookie.com"];

fn is_video_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    VIDEO_HOSTS.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Whether `input` names a video on the host: a bare id, or a URL on one of
/// the host's domains that [`extract_video_id`] understands. URLs elsewhere
/// are never treated as hosted, whatever their path looks like.
pub fn is_hosted_video(input: &str) -> bool {
    let input = input.trim();
    if is_video_id(input) {
        return true;
    }
    let Ok(url) = Url::parse(input).or_else(|_| Url::parse(&format!("https://{input}"))) else {
        return false;
    };
    url.host_str().is_some_and(is_video_host) && extract_video_id(input).is_some()
}
