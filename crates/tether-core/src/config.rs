//! Configuration parsing and validation
//!
//! A connector is configured from a YAML file, a JSON file or string, or
//! `TETHER_`-prefixed environment variables. All loaders produce the same
//! [`Config`]: the runtime settings in [`ConnectorConfig`] plus the source,
//! publisher and offset store to wire them to.
//!
//! # Example
//!
//! ```yaml
//! name: orders-file
//! offset_commit_interval: 5s
//! on_end_of_data: stop
//! source:
//!   type: file
//!   path: ./data/input.jsonl
//! publisher:
//!   type: file
//!   path: ./data/output.jsonl
//! offsets:
//!   type: file
//!   path: ./.tether/offsets.jsonl
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connectors::{PublisherConfig, SourceConfig, resolve};
use crate::error::{Error, Result};
use crate::retry::RetryConfig;

/// Prefix of environment variables read by [`Config::from_env_vars`]
pub const ENV_PREFIX: &str = "TETHER_";

/// What the run loop does when the source reports end-of-data
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndOfDataPolicy {
    /// Flush, commit and stop
    #[default]
    Stop,
    /// Wait `poll_interval`, then read again
    WaitAndRetry,
}

/// Runtime settings for a single connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector identity; commits are attributed to this name
    pub name: String,

    /// Minimum wall-clock time between offset commits
    #[serde(default = "default_commit_interval", with = "duration")]
    pub offset_commit_interval: Duration,

    /// End-of-data behaviour
    #[serde(default)]
    pub on_end_of_data: EndOfDataPolicy,

    /// Wait between reads under [`EndOfDataPolicy::WaitAndRetry`]
    #[serde(default = "default_poll_interval", with = "duration")]
    pub poll_interval: Duration,

    /// How long an in-flight read may run after a stop request
    #[serde(default = "default_shutdown_grace", with = "duration")]
    pub shutdown_grace: Duration,

    /// Limit for a single commit attempt
    #[serde(default = "default_commit_timeout", with = "duration")]
    pub commit_timeout: Duration,

    /// Retries for offset store reads and commits
    #[serde(default = "RetryConfig::commit_default")]
    pub commit_retry: RetryConfig,

    /// Retries for publish and flush failures
    #[serde(default)]
    pub publish_retry: RetryConfig,

    /// Retries for transient read failures
    #[serde(default)]
    pub read_retry: RetryConfig,
}

fn default_commit_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_commit_timeout() -> Duration {
    Duration::from_secs(10)
}

impl ConnectorConfig {
    /// Settings with all defaults for the given identity
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            offset_commit_interval: default_commit_interval(),
            on_end_of_data: EndOfDataPolicy::default(),
            poll_interval: default_poll_interval(),
            shutdown_grace: default_shutdown_grace(),
            commit_timeout: default_commit_timeout(),
            commit_retry: RetryConfig::commit_default(),
            publish_retry: RetryConfig::default(),
            read_retry: RetryConfig::default(),
        }
    }

    /// Set the commit interval (builder pattern)
    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.offset_commit_interval = interval;
        self
    }

    /// Set the end-of-data policy (builder pattern)
    pub fn with_end_of_data(mut self, policy: EndOfDataPolicy) -> Self {
        self.on_end_of_data = policy;
        self
    }

    /// Set the poll interval (builder pattern)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the shutdown grace period (builder pattern)
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set all retry policies at once (builder pattern)
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.commit_retry = retry.clone();
        self.publish_retry = retry.clone();
        self.read_retry = retry;
        self
    }

    /// Check values that deserialize fine but cannot run
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("connector name must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval must be greater than zero"));
        }
        if self.commit_timeout.is_zero() {
            return Err(invalid("commit_timeout must be greater than zero"));
        }
        for (field, retry) in [
            ("commit_retry", &self.commit_retry),
            ("publish_retry", &self.publish_retry),
            ("read_retry", &self.read_retry),
        ] {
            if retry.multiplier < 1.0 {
                return Err(invalid(format!(
                    "{field}.multiplier must be at least 1.0, got {}",
                    retry.multiplier
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigInvalid {
        message: message.into(),
    }
}

/// Where committed positions are kept
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OffsetStoreConfig {
    /// Append-only commit log file
    File {
        /// Log file path
        path: PathBuf,
    },
    /// Process-local map; positions do not survive a restart
    Memory,
}

impl Default for OffsetStoreConfig {
    fn default() -> Self {
        OffsetStoreConfig::File {
            path: PathBuf::from(".tether/offsets.jsonl"),
        }
    }
}

/// Main configuration container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Runtime settings
    #[serde(flatten)]
    pub connector: ConnectorConfig,

    /// Source to read from
    pub source: SourceConfig,

    /// Publisher to forward records to
    pub publisher: PublisherConfig,

    /// Offset store
    #[serde(default)]
    pub offsets: OffsetStoreConfig,

    /// Emit logs as JSON lines instead of human-readable text
    #[serde(default)]
    pub unify_logging: bool,
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = read_config_file(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.finish(base_dir(path))
    }

    /// Load configuration from a JSON file.
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = read_config_file(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.finish(base_dir(path))
    }

    /// Parse configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validated()
    }

    /// Load configuration from `TETHER_*` environment variables
    pub fn from_env_vars() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from `TETHER_*` key/value pairs.
    ///
    /// Keys are lowercased after the prefix; `__` separates nesting levels,
    /// so `TETHER_SOURCE__PATH` sets `source.path`. Values are parsed as YAML
    /// scalars, falling back to plain strings.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut root = serde_yaml::Mapping::new();
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let path: Vec<String> = name.split("__").map(str::to_lowercase).collect();
            let value = serde_yaml::from_str::<serde_yaml::Value>(value.as_ref())
                .ok()
                .filter(|v| !v.is_mapping() && !v.is_sequence())
                .unwrap_or_else(|| serde_yaml::Value::String(value.as_ref().to_string()));
            insert_nested(&mut root, &path, value)?;
        }

        if root.is_empty() {
            return Err(invalid(format!("no {ENV_PREFIX}* environment variables set")));
        }

        let config: Config = serde_yaml::from_value(serde_yaml::Value::Mapping(root))?;
        config.validated()
    }

    /// Validate the whole configuration
    pub fn validate(&self) -> Result<()> {
        self.connector.validate()?;
        if let OffsetStoreConfig::File { path } = &self.offsets {
            if path.as_os_str().is_empty() {
                return Err(invalid("offsets.path must not be empty"));
            }
        }
        Ok(())
    }

    fn finish(mut self, base: &Path) -> Result<Self> {
        self.source.resolve_paths(base);
        self.publisher.resolve_paths(base);
        if let OffsetStoreConfig::File { path } = &mut self.offsets {
            *path = resolve(base, path);
        }
        self.validated()
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

fn read_config_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(Error::ConfigNotFound {
            path: path.display().to_string(),
        });
    }
    Ok(std::fs::read_to_string(path)?)
}

fn base_dir(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new("."))
}

fn insert_nested(
    map: &mut serde_yaml::Mapping,
    path: &[String],
    value: serde_yaml::Value,
) -> Result<()> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(());
    };
    let key = serde_yaml::Value::String(head.clone());
    if rest.is_empty() {
        map.insert(key, value);
        return Ok(());
    }

    let child = map
        .entry(key)
        .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    match child {
        serde_yaml::Value::Mapping(child) => insert_nested(child, rest, value),
        _ => Err(invalid(format!(
            "environment variable sets both '{head}' and nested keys below it"
        ))),
    }
}

/// Durations given as seconds (`1800`), humantime strings (`"30m"`) or
/// ISO 8601 durations (`"PT30M"`)
mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Fractional(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Fractional(secs) => {
                Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
            }
            Raw::Text(text) => {
                let text = text.trim();
                if text.starts_with(['P', 'p']) {
                    parse_iso8601(text).map_err(serde::de::Error::custom)
                } else {
                    humantime::parse_duration(text).map_err(serde::de::Error::custom)
                }
            }
        }
    }

    /// `P[nW][nD][T[nH][nM][nS]]`; years and months have no fixed length
    fn parse_iso8601(text: &str) -> Result<Duration, String> {
        let invalid = || format!("invalid ISO 8601 duration '{text}'");
        let body = text.get(1..).ok_or_else(invalid)?;

        let mut total = 0.0;
        let mut in_time = false;
        let mut any_unit = false;
        let mut number = String::new();
        for c in body.chars() {
            match c {
                'T' | 't' if !in_time && number.is_empty() => in_time = true,
                '0'..='9' | '.' => number.push(c),
                ',' => number.push('.'),
                unit => {
                    let value: f64 = number.parse().map_err(|_| invalid())?;
                    number.clear();
                    let seconds = match (in_time, unit.to_ascii_uppercase()) {
                        (false, 'W') => 604_800.0,
                        (false, 'D') => 86_400.0,
                        (true, 'H') => 3_600.0,
                        (true, 'M') => 60.0,
                        (true, 'S') => 1.0,
                        (false, 'Y' | 'M') => {
                            return Err(format!(
                                "years and months are not supported in duration '{text}'"
                            ));
                        }
                        _ => return Err(invalid()),
                    };
                    total += value * seconds;
                    any_unit = true;
                }
            }
        }
        if !number.is_empty() || !any_unit {
            return Err(invalid());
        }
        Duration::try_from_secs_f64(total).map_err(|e| e.to_string())
    }
}
