use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::persona::ClientPersona;

pub const DEFAULT_HOST: &str = "www.youtube.com";

/// Which implementation runs the extraction steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorBackend {
    #[default]
    Native,
    /// Embedded QuickJS script; needs the `rquickjs` feature.
    Script,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub host: String,
    pub language: String,
    pub personas: Vec<ClientPersona>,
    /// Persona whose separate video/audio streams are preferred.
    pub preferred_persona: String,
    /// Upper bound on one whole extraction.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub backend: ExtractorBackend,
    /// Overrides the embedded extraction script.
    pub script_path: Option<PathBuf>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            language: "en".to_owned(),
            personas: ClientPersona::defaults(),
            preferred_persona: ClientPersona::ANDROID_VR.to_owned(),
            timeout: Duration::from_secs(30),
            backend: ExtractorBackend::Native,
            script_path: None,
        }
    }
}

impl ExtractorConfig {
    pub fn with_backend(mut self, backend: ExtractorBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Durations are written as whole seconds in config files.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
