//! Client personas used to query the private player endpoint.
//!
//! Different device clients are offered different format lists, so one
//! extraction asks several of them and scores the union.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// An immutable device/app identity presented to the host API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientPersona {
    /// Stable identity key, e.g. `android_vr`.
    pub key: String,
    /// Numeric client id sent as `x-youtube-client-name`.
    pub client_id: u32,
    pub version: String,
    pub user_agent: String,
    /// `context.client` payload, without the language fields.
    pub context: Value,
    /// Lower is preferred when candidates otherwise tie.
    pub priority: u32,
}

impl ClientPersona {
    pub const ANDROID_VR: &'static str = "android_vr";
    pub const IOS: &'static str = "ios";
    pub const TV: &'static str = "tv";
    pub const MWEB: &'static str = "mweb";

    pub fn android_vr() -> Self {
        Self {
            key: Self::ANDROID_VR.to_owned(),
            client_id: 28,
            version: "1.60.19".to_owned(),
            user_agent: "com.google.android.apps.youtube.vr.oculus/1.60.19 (Linux; U; Android 12L; eureka-user Build/SQ3A.220605.009.A1) gzip".to_owned(),
            context: json!({
                "clientName": "ANDROID_VR",
                "clientVersion": "1.60.19",
                "deviceMake": "Oculus",
                "deviceModel": "Quest 3",
                "androidSdkVersion": 32,
                "osName": "Android",
                "osVersion": "12L",
            }),
            priority: 0,
        }
    }

    pub fn ios() -> Self {
        Self {
            key: Self::IOS.to_owned(),
            client_id: 5,
            version: "20.10.4".to_owned(),
            user_agent:
                "com.google.ios.youtube/20.10.4 (iPhone16,2; U; CPU iOS 18_3_2 like Mac OS X;)"
                    .to_owned(),
            context: json!({
                "clientName": "IOS",
                "clientVersion": "20.10.4",
                "deviceMake": "Apple",
                "deviceModel": "iPhone16,2",
                "osName": "iPhone",
                "osVersion": "18.3.2.22D82",
            }),
            priority: 1,
        }
    }

    pub fn tv() -> Self {
        Self {
            key: Self::TV.to_owned(),
            client_id: 7,
            version: "7.20250219.14.00".to_owned(),
            user_agent: "Mozilla/5.0 (ChromiumStylePlatform) Cobalt/Version".to_owned(),
            context: json!({
                "clientName": "TVHTML5",
                "clientVersion": "7.20250219.14.00",
            }),
            priority: 2,
        }
    }

    pub fn mweb() -> Self {
        Self {
            key: Self::MWEB.to_owned(),
            client_id: 2,
            version: "2.20250311.03.00".to_owned(),
            user_agent: "Mozilla/5.0 (iPad; CPU OS 16_7_10 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1,gzip(gfe)".to_owned(),
            context: json!({
                "clientName": "MWEB",
                "clientVersion": "2.20250311.03.00",
            }),
            priority: 3,
        }
    }

    /// The built-in persona set, in priority order.
    pub fn defaults() -> Vec<Self> {
        vec![Self::android_vr(), Self::ios(), Self::tv(), Self::mweb()]
    }

    /// `context.client` with the interface language filled in.
    pub fn client_context(&self, language: &str) -> Value {
        let mut context = self.context.clone();
        if let Value::Object(map) = &mut context {
            map.insert("hl".to_owned(), Value::String(language.to_owned()));
            map.insert("gl".to_owned(), Value::String("US".to_owned()));
        }
        context
    }

    /// Body of the player-info POST for `video_id`.
    pub fn player_request_body(&self, video_id: &str, language: &str) -> Value {
        json!({
            "videoId": video_id,
            "contentCheckOk": true,
            "racyCheckOk": true,
            "context": {
                "client": self.client_context(language),
            },
            "playbackContext": {
                "contentPlaybackContext": {
                    "html5Preference": "HTML5_PREF_WANTS",
                },
            },
        })
    }
}
