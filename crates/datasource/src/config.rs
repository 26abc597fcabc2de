use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Host suffix of the CDN that throttles long continuous reads.
pub const THROTTLED_HOST: &str = "googlevideo.com";

const MIB: u64 = 1024 * 1024;

/// Options for the underlying HTTP client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSourceConfig {
    /// Time to establish a connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Maximum time between received body chunks
    #[serde(with = "duration_secs")]
    pub read_timeout: Duration,

    pub user_agent: String,

    /// Extra headers sent with every request
    pub headers: Vec<(String, String)>,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: Vec::new(),
        }
    }
}

/// Windowed reads for throttling hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkedSourceConfig {
    /// Bytes requested per `range=` window
    pub window_size: u64,

    /// Host suffixes that get windowed; everything else passes through
    pub throttled_hosts: Vec<String>,
}

impl Default for ChunkedSourceConfig {
    fn default() -> Self {
        Self {
            window_size: 10 * MIB,
            throttled_hosts: vec![THROTTLED_HOST.to_owned()],
        }
    }
}

impl ChunkedSourceConfig {
    pub fn is_throttled_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.throttled_hosts.iter().any(|suffix| {
            let suffix = suffix.to_ascii_lowercase();
            host == suffix || host.ends_with(&format!(".{suffix}"))
        })
    }
}

/// Parallel range fetching for progressive files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelFetchConfig {
    pub enabled: bool,

    /// Bytes per range request
    pub chunk_size: u64,

    /// Concurrent range requests; chunks up to `connections` ahead of the
    /// reader are scheduled
    pub connections: usize,

    /// Buffers kept beyond `connections + 1`
    pub pool_slack: usize,

    /// Extra attempts per chunk after a retryable failure
    pub chunk_retries: u32,

    /// Delay before the first retry of a chunk; doubled for each later one
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,

    /// Upper bound on the delay between chunk attempts
    #[serde(with = "duration_millis")]
    pub retry_max_delay: Duration,

    /// Randomise retry delays by up to half of `retry_delay`
    pub retry_jitter: bool,
}

impl Default for ParallelFetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: 8 * MIB,
            connections: 3,
            pool_slack: 2,
            chunk_retries: 2,
            retry_delay: Duration::from_millis(250),
            retry_max_delay: Duration::from_secs(4),
            retry_jitter: true,
        }
    }
}

impl ParallelFetchConfig {
    pub fn pool_size(&self) -> usize {
        self.connections + 1 + self.pool_slack
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.chunk_retries,
            base_delay: self.retry_delay,
            max_delay: self.retry_max_delay.max(self.retry_delay),
            jitter: self.retry_jitter,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    pub http: HttpSourceConfig,
    pub chunked: ChunkedSourceConfig,
    pub parallel: ParallelFetchConfig,
}

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
