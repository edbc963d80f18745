use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIB: u64 = 1 << 20;
pub const STORE_MIN_PART_SIZE: u64 = 5 * MIB;
pub const STORE_MAX_PART_SIZE: u64 = 5 << 30;
pub const DEFAULT_PART_SIZE: u64 = 8 * MIB;
pub const DEFAULT_CONCURRENCY: usize = 4;
pub const MAX_CONCURRENCY: usize = 50;
pub const DEFAULT_CHANNEL_DEPTH_FACTOR: usize = 2;
pub const DEFAULT_SINGLE_PUT_THRESHOLD: u64 = STORE_MIN_PART_SIZE;

const ENV_PART_SIZE: &str = "STRATA_PART_SIZE";
const ENV_CONCURRENCY: &str = "STRATA_CONCURRENCY";
const ENV_UPLOAD_TIMEOUT_SECS: &str = "STRATA_UPLOAD_TIMEOUT_SECS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Tunables for the upload engine.
///
/// `min_part_size` and `max_part_size` describe what the target store accepts;
/// every requested part size is clamped into that range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub default_part_size: u64,
    pub default_concurrency: usize,
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub max_concurrency: usize,
    pub upload_timeout_secs: Option<u64>,
    pub channel_depth_factor: usize,
    /// Inputs that end within their first part and are no larger than this are
    /// stored with one `put` instead of a multipart session. Zero disables it.
    pub single_put_threshold: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_part_size: DEFAULT_PART_SIZE,
            default_concurrency: DEFAULT_CONCURRENCY,
            min_part_size: STORE_MIN_PART_SIZE,
            max_part_size: STORE_MAX_PART_SIZE,
            max_concurrency: MAX_CONCURRENCY,
            upload_timeout_secs: None,
            channel_depth_factor: DEFAULT_CHANNEL_DEPTH_FACTOR,
            single_put_threshold: DEFAULT_SINGLE_PUT_THRESHOLD,
        }
    }
}

impl UploadConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = env_number(ENV_PART_SIZE)? {
            config.default_part_size = value;
        }
        if let Some(value) = env_number(ENV_CONCURRENCY)? {
            config.default_concurrency =
                usize::try_from(value).map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_CONCURRENCY,
                    value: value.to_string(),
                })?;
        }
        if let Some(value) = env_number(ENV_UPLOAD_TIMEOUT_SECS)? {
            config.upload_timeout_secs = Some(value);
        }

        let config = config.sanitize();
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })?;

        let config = config.sanitize();
        config.validate()?;
        Ok(config)
    }

    /// Replaces zero values with defaults.
    pub fn sanitize(mut self) -> Self {
        if self.default_part_size == 0 {
            self.default_part_size = DEFAULT_PART_SIZE;
        }
        if self.default_concurrency == 0 {
            self.default_concurrency = DEFAULT_CONCURRENCY;
        }
        if self.min_part_size == 0 {
            self.min_part_size = STORE_MIN_PART_SIZE;
        }
        if self.max_part_size == 0 {
            self.max_part_size = STORE_MAX_PART_SIZE;
        }
        if self.max_concurrency == 0 {
            self.max_concurrency = MAX_CONCURRENCY;
        }
        if self.channel_depth_factor == 0 {
            self.channel_depth_factor = DEFAULT_CHANNEL_DEPTH_FACTOR;
        }
        if self.upload_timeout_secs == Some(0) {
            self.upload_timeout_secs = None;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_part_size == 0 {
            return Err(invalid("min_part_size", "must be greater than zero"));
        }
        if self.max_part_size > STORE_MAX_PART_SIZE {
            return Err(invalid(
                "max_part_size",
                format!("must not exceed {STORE_MAX_PART_SIZE} bytes"),
            ));
        }
        if self.min_part_size > self.max_part_size {
            return Err(invalid(
                "min_part_size",
                format!(
                    "{} is larger than max_part_size {}",
                    self.min_part_size, self.max_part_size
                ),
            ));
        }
        if self.default_part_size < self.min_part_size || self.default_part_size > self.max_part_size {
            return Err(invalid(
                "default_part_size",
                format!(
                    "{} is outside [{}, {}]",
                    self.default_part_size, self.min_part_size, self.max_part_size
                ),
            ));
        }
        if self.max_concurrency == 0 || self.max_concurrency > MAX_CONCURRENCY {
            return Err(invalid(
                "max_concurrency",
                format!("must be between 1 and {MAX_CONCURRENCY}"),
            ));
        }
        if self.default_concurrency == 0 || self.default_concurrency > self.max_concurrency {
            return Err(invalid(
                "default_concurrency",
                format!("must be between 1 and {}", self.max_concurrency),
            ));
        }
        if self.channel_depth_factor == 0 {
            return Err(invalid("channel_depth_factor", "must be greater than zero"));
        }
        if self.single_put_threshold > self.max_part_size {
            return Err(invalid(
                "single_put_threshold",
                format!("must not exceed max_part_size {}", self.max_part_size),
            ));
        }
        Ok(())
    }

    pub fn upload_timeout(&self) -> Option<Duration> {
        self.upload_timeout_secs.map(Duration::from_secs)
    }

    /// Capacity of the task and result channels for a pool of `concurrency`
    /// workers.
    pub fn channel_depth(&self, concurrency: usize) -> usize {
        concurrency.saturating_mul(self.channel_depth_factor).max(1)
    }

    pub fn summary(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("default_part_size", format!("{} MiB", self.default_part_size / MIB)),
            ("default_concurrency", self.default_concurrency.to_string()),
            ("min_part_size", format!("{} bytes", self.min_part_size)),
            ("max_part_size", format!("{} bytes", self.max_part_size)),
            ("max_concurrency", self.max_concurrency.to_string()),
            ("single_put_threshold", format!("{} bytes", self.single_put_threshold)),
            (
                "upload_timeout",
                self.upload_timeout_secs
                    .map(|secs| format!("{secs}s"))
                    .unwrap_or_else(|| "none".to_string()),
            ),
        ])
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn env_number(var: &'static str) -> Result<Option<u64>, ConfigError> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv { var, value: raw })
}
