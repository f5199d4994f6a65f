use serde::{Deserialize, Serialize};
use std::{borrow::Cow, convert::TryInto, str::FromStr, time::Duration};

/// Environment variable read by [`Config::from_env`].
pub const CONFIG_ENV_VAR: &str = "CLIENT_TELEMETRY_CONFIG";

pub(crate) const DEFAULT_STORAGE_KEY: &str = "client_telemetry_queue";
const FIELDS_SEPARATOR: char = ';';
const FIELD_KEY_VALUE_SEPARATOR: char = '=';

/// Pipeline configuration.
///
/// Can be deserialized from JSON (camelCase keys, durations in milliseconds) or parsed from a
/// `Key=Value;Key=Value` string:
///
/// ```
/// let config: client_telemetry::Config = "BatchSize=20;OpenDurationMs=30000".parse().unwrap();
/// assert_eq!(20, config.batch_size);
/// assert_eq!(std::time::Duration::from_secs(30), config.open_duration);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Maximum number of entries per send.
    ///
    /// Default: 10
    pub batch_size: usize,

    /// Interval between scheduler ticks.
    ///
    /// Default: 5 seconds
    #[serde(rename = "tickIntervalMs", with = "duration_ms")]
    pub tick_interval: Duration,

    /// Consecutive failed sends before the circuit opens.
    ///
    /// Default: 5
    pub failure_threshold: u32,

    /// How long the circuit stays open.
    ///
    /// Default: 60 seconds
    #[serde(rename = "openDurationMs", with = "duration_ms")]
    pub open_duration: Duration,

    /// Identical entries within this window are recorded once.
    ///
    /// Default: 5 seconds
    #[serde(rename = "dedupeWindowMs", with = "duration_ms")]
    pub dedupe_window: Duration,

    /// Maximum number of queued entries. Appends beyond this are dropped with a warning.
    /// `None` lets the queue grow without bound.
    ///
    /// Default: `Some(1000)`
    pub max_queue_size: Option<usize>,

    /// Key the queue is persisted under.
    ///
    /// Default: `client_telemetry_queue`
    pub storage_key: String,

    /// Telemetry endpoint used by [`HttpTransport::from_config`](crate::HttpTransport::from_config).
    pub endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            batch_size: 10,
            tick_interval: Duration::from_secs(5),
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
            dedupe_window: Duration::from_secs(5),
            max_queue_size: Some(1000),
            storage_key: DEFAULT_STORAGE_KEY.into(),
            endpoint: None,
        }
    }
}

/// Errors while parsing a configuration string.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A field is not of the form `Key=Value`.
    #[error("invalid format")]
    InvalidFormat,
    /// A numeric field has a non-numeric value.
    #[error("invalid number for {key}: {value:?}")]
    InvalidNumber {
        /// Field name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// The endpoint is not a valid URI.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(http::uri::InvalidUri),
    /// No endpoint configured.
    #[error("missing endpoint")]
    MissingEndpoint,
}

impl Config {
    /// Read configuration from the `CLIENT_TELEMETRY_CONFIG` environment variable. Falls back to
    /// the defaults if the variable is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(value) => value.parse(),
            Err(std::env::VarError::NotPresent) => Ok(Config::default()),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat),
        }
    }

    /// Clamp values the pipeline can't work with.
    pub(crate) fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.failure_threshold = self.failure_threshold.max(1);
        if self.tick_interval.is_zero() {
            self.tick_interval = Config::default().tick_interval;
        }
        // A capacity of 0 means unbounded, whichever source the config came from.
        self.max_queue_size = self.max_queue_size.filter(|&n| n > 0);
        self
    }

    /// The configured endpoint as URI.
    pub(crate) fn endpoint_uri(&self) -> Result<http::Uri, ConfigError> {
        let endpoint = self.endpoint.as_ref().ok_or(ConfigError::MissingEndpoint)?;
        sanitize_url(endpoint)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    /// Parse a `Key=Value;Key=Value` string. Keys are case-insensitive, unknown keys are
    /// ignored. `MaxQueueSize=0` selects an unbounded queue.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = Config::default();
        for field in s.split(FIELDS_SEPARATOR).filter(|f| !f.trim().is_empty()) {
            let parts: Vec<&str> = field.split(FIELD_KEY_VALUE_SEPARATOR).collect();
            let (key, value) = match parts.as_slice() {
                [key, value] => (key.trim().to_lowercase(), value.trim()),
                _ => return Err(ConfigError::InvalidFormat),
            };
            match key.as_str() {
                "batchsize" => config.batch_size = parse_number(&key, value)?,
                "tickintervalms" => {
                    config.tick_interval = Duration::from_millis(parse_number(&key, value)?)
                }
                "failurethreshold" => config.failure_threshold = parse_number(&key, value)?,
                "opendurationms" => {
                    config.open_duration = Duration::from_millis(parse_number(&key, value)?)
                }
                "dedupewindowms" => {
                    config.dedupe_window = Duration::from_millis(parse_number(&key, value)?)
                }
                "maxqueuesize" => {
                    config.max_queue_size = Some(parse_number(&key, value)?).filter(|&n| n > 0)
                }
                "storagekey" => config.storage_key = value.into(),
                "endpoint" => config.endpoint = Some(sanitize_url(value)?.to_string()),
                _ => {}
            }
        }
        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.into(),
        value: value.into(),
    })
}

fn sanitize_url(url: &str) -> Result<http::Uri, ConfigError> {
    let new_url: Cow<str> = url.trim().into();
    new_url
        .trim_end_matches('/')
        .try_into()
        .map_err(ConfigError::InvalidEndpoint)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
