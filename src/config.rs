//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Polling cadence configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// First delay of the exponential fallback curve.
    pub base_delay: Duration,
    /// Multiplier applied once per consecutive empty poll.
    pub growth_factor: f64,
    /// Ceiling for the fallback curve.
    pub max_delay: Duration,
    /// Delay used when the server recommends `aggressive`.
    pub aggressive_delay: Duration,
    /// Delay used when the server recommends `moderate`.
    pub moderate_delay: Duration,
    /// Delay used when the server recommends `gentle`.
    pub gentle_delay: Duration,
    /// Time without a first response after which the job counts as waking.
    pub waking_threshold: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            growth_factor: 1.5,
            max_delay: Duration::from_millis(10_000),
            aggressive_delay: Duration::from_millis(1_000),
            moderate_delay: Duration::from_millis(2_500),
            gentle_delay: Duration::from_millis(5_000),
            waking_threshold: Duration::from_secs(5),
        }
    }
}

impl PollerConfig {
    /// Build from defaults overlaid with `PORTFOLIO_POLL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(d) = millis(&lookup, "PORTFOLIO_POLL_BASE_DELAY_MS")? {
            config.base_delay = d;
        }
        if let Some(d) = millis(&lookup, "PORTFOLIO_POLL_MAX_DELAY_MS")? {
            config.max_delay = d;
        }
        if let Some(d) = millis(&lookup, "PORTFOLIO_POLL_AGGRESSIVE_MS")? {
            config.aggressive_delay = d;
        }
        if let Some(d) = millis(&lookup, "PORTFOLIO_POLL_MODERATE_MS")? {
            config.moderate_delay = d;
        }
        if let Some(d) = millis(&lookup, "PORTFOLIO_POLL_GENTLE_MS")? {
            config.gentle_delay = d;
        }
        if let Some(d) = millis(&lookup, "PORTFOLIO_POLL_WAKING_MS")? {
            config.waking_threshold = d;
        }

        if let Some(raw) = lookup("PORTFOLIO_POLL_GROWTH_FACTOR") {
            let factor: f64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORTFOLIO_POLL_GROWTH_FACTOR".to_string(),
                message: format!("expected a number, got {raw:?}"),
            })?;
            if !factor.is_finite() || factor < 1.0 {
                return Err(ConfigError::InvalidValue {
                    key: "PORTFOLIO_POLL_GROWTH_FACTOR".to_string(),
                    message: format!("must be a finite number >= 1.0, got {factor}"),
                });
            }
            config.growth_factor = factor;
        }

        if config.max_delay < config.base_delay {
            return Err(ConfigError::InvalidValue {
                key: "PORTFOLIO_POLL_MAX_DELAY_MS".to_string(),
                message: "must not be smaller than the base delay".to_string(),
            });
        }

        Ok(config)
    }
}

/// Parse a millisecond knob. Zero is rejected: it would poll with no delay.
fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let ms = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected milliseconds, got {raw:?}"),
        })?;
    if ms == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(Some(Duration::from_millis(ms)))
}

/// Connection settings for the remote analysis service.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URL of the analysis API, without a trailing slash.
    pub base_url: String,
    /// Optional bearer token.
    pub api_key: Option<SecretString>,
    /// Per-request transport timeout.
    pub request_timeout: Duration,
}

impl SourceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("PORTFOLIO_API_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "PORTFOLIO_API_URL".to_string(),
                hint: "Set it to the analysis service root, e.g. https://api.example.com"
                    .to_string(),
            })?;

        let request_timeout = match lookup("PORTFOLIO_API_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        key: "PORTFOLIO_API_TIMEOUT_SECS".to_string(),
                        message: format!("expected a positive number of seconds, got {raw:?}"),
                    })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(30),
        };

        Ok(Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: lookup("PORTFOLIO_API_KEY")
                .filter(|v| !v.is_empty())
                .map(SecretString::from),
            request_timeout,
        })
    }
}
