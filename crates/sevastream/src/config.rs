//! Engine configuration.
//!
//! Defaults suit the streaming path; every field can be overridden from
//! `SEVA_*` environment variables via [`EngineConfig::from_env`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::info;

use crate::broadcast::DEFAULT_SUBSCRIBER_BUFFER;
use crate::error::{Result, StreamError};
use crate::fee::FeePolicy;

/// Interval used by callers that don't pick one.
pub const DEFAULT_INTERVAL_SECS: u64 = 10;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub fee_policy: FeePolicy,
    pub default_interval_secs: u64,
    /// Queue depth per subscriber before it is dropped.
    pub subscriber_buffer: usize,
    /// Upper bound on one executor call. A timeout is an ordinary,
    /// non-fatal tick failure.
    pub executor_timeout: Option<Duration>,
    /// Period of the active-stream summary feed, if enabled.
    pub summary_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_policy: FeePolicy::default(),
            default_interval_secs: DEFAULT_INTERVAL_SECS,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            executor_timeout: None,
            summary_interval: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `SEVA_*` environment variables.
    /// Unset variables keep their defaults; malformed ones are errors.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let fee_policy = FeePolicy::new(
            optional_env("SEVA_FEE_RATE")?.unwrap_or(defaults.fee_policy.fee_rate),
            optional_env("SEVA_MINIMUM_FEE")?.unwrap_or(defaults.fee_policy.minimum_fee),
        );

        let config = Self {
            fee_policy,
            default_interval_secs: optional_env("SEVA_DEFAULT_INTERVAL_SECS")?
                .unwrap_or(defaults.default_interval_secs),
            subscriber_buffer: optional_env("SEVA_SUBSCRIBER_BUFFER")?
                .unwrap_or(defaults.subscriber_buffer),
            executor_timeout: optional_env::<u64>("SEVA_EXECUTOR_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            summary_interval: optional_env::<u64>("SEVA_SUMMARY_INTERVAL_SECS")?
                .map(Duration::from_secs),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fee_policy.fee_rate < Decimal::ZERO || self.fee_policy.fee_rate >= Decimal::ONE {
            return Err(StreamError::Config(format!(
                "fee rate must be in [0, 1), got {}",
                self.fee_policy.fee_rate
            )));
        }
        if self.fee_policy.minimum_fee < Decimal::ZERO {
            return Err(StreamError::Config("minimum fee must not be negative".into()));
        }
        if self.default_interval_secs == 0 {
            return Err(StreamError::Config("default interval must be positive".into()));
        }
        if matches!(self.executor_timeout, Some(t) if t.is_zero()) {
            return Err(StreamError::Config("executor timeout must be positive".into()));
        }
        if matches!(self.summary_interval, Some(t) if t.is_zero()) {
            return Err(StreamError::Config("summary interval must be positive".into()));
        }
        Ok(())
    }

    /// Log the effective configuration.
    pub fn log(&self) {
        info!(
            fee_rate = %self.fee_policy.fee_rate,
            minimum_fee = %self.fee_policy.minimum_fee,
            default_interval_secs = self.default_interval_secs,
            subscriber_buffer = self.subscriber_buffer,
            executor_timeout = ?self.executor_timeout,
            summary_interval = ?self.summary_interval,
            "Engine configuration"
        );
    }
}

fn optional_env<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| StreamError::Config(format!("{key} has invalid value {raw:?}"))),
        Err(_) => Ok(None),
    }
}
