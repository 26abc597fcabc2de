use std::sync::LazyLock;

use regex::Regex;

use crate::error::ExtractorError;

static API_KEY_REGEXES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r#""INNERTUBE_API_KEY"\s*:\s*"([^"]+)""#).unwrap(),
        Regex::new(r#""innertubeApiKey"\s*:\s*"([^"]+)""#).unwrap(),
    ]
});

static VISITOR_REGEXES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r#""VISITOR_DATA"\s*:\s*"([^"]+)""#).unwrap(),
        Regex::new(r#""visitorData"\s*:\s*"([^"]+)""#).unwrap(),
    ]
});

fn first_capture(regexes: &[Regex], body: &str) -> Option<String> {
    regexes
        .iter()
        .filter_map(|re| re.captures(body).and_then(|caps| caps.get(1)))
        .map(|m| m.as_str().trim())
        .find(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

/// Per-attempt values scraped from the watch page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPageConfig {
    pub api_key: String,
    pub visitor_data: Option<String>,
}

impl WatchPageConfig {
    pub fn parse(html: &str, video_id: &str) -> Result<Self, ExtractorError> {
        let api_key =
            first_capture(&API_KEY_REGEXES[..], html).ok_or_else(|| ExtractorError::MissingApiKey {
                video_id: video_id.to_owned(),
            })?;
        let visitor_data = first_capture(&VISITOR_REGEXES[..], html);
        Ok(Self {
            api_key,
            visitor_data,
        })
    }
}

pub fn watch_page_url(host: &str, video_id: &str, language: &str) -> String {
    format!("https://{host}/watch?v={video_id}&hl={language}")
}

pub fn player_endpoint_url(host: &str, api_key: &str) -> String {
    format!(
        "https://{host}/youtubei/v1/player?key={}&prettyPrint=false",
        urlencode(api_key)
    )
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
