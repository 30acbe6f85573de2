//! Configuration for the record store and the delivery processor.
//!
//! No default bucket size or retry ceiling is assumed: both must be chosen
//! explicitly, either in code or in a configuration file.

use crate::error::{SyncError, SyncResult};
use logsync_protocol::DeliveryConfigUpdate;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Batching and retry limits owned by a delivery processor.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    /// Maximum number of records per bucket.
    pub max_bucket_size: u32,
    /// Maximum payload bytes per new bucket.
    pub max_bucket_bytes: Option<usize>,
    /// Maximum number of buckets carried by one request.
    pub max_in_flight_buckets: u32,
    /// Number of resends allowed before a bucket is dropped. Zero drops a
    /// bucket on its first failure.
    pub retry_ceiling: u32,
    /// Delay before a failed bucket becomes eligible again.
    pub backoff: RetryBackoff,
    /// Age after which an unanswered request is treated as failed.
    pub delivery_timeout: Option<Duration>,
}

impl DeliveryConfig {
    /// Creates a validated configuration with one bucket per request,
    /// immediate retries and no delivery timeout.
    pub fn new(max_bucket_size: u32, retry_ceiling: u32) -> SyncResult<Self> {
        let config = Self {
            max_bucket_size,
            max_bucket_bytes: None,
            max_in_flight_buckets: 1,
            retry_ceiling,
            backoff: RetryBackoff::immediate(),
            delivery_timeout: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the per-bucket byte budget.
    pub fn with_max_bucket_bytes(mut self, bytes: usize) -> Self {
        self.max_bucket_bytes = Some(bytes);
        self
    }

    /// Sets the number of buckets per request.
    pub fn with_max_in_flight_buckets(mut self, buckets: u32) -> Self {
        self.max_in_flight_buckets = buckets;
        self
    }

    /// Sets the retry backoff.
    pub fn with_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the delivery timeout.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = Some(timeout);
        self
    }

    /// Checks every limit. Values are never clamped.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_bucket_size == 0 {
            return Err(SyncError::invalid_config("max_bucket_size must be positive"));
        }
        if self.max_in_flight_buckets == 0 {
            return Err(SyncError::invalid_config(
                "max_in_flight_buckets must be positive",
            ));
        }
        if self.max_bucket_bytes == Some(0) {
            return Err(SyncError::invalid_config("max_bucket_bytes must be positive"));
        }
        if self.delivery_timeout == Some(Duration::ZERO) {
            return Err(SyncError::invalid_config("delivery_timeout must be positive"));
        }
        self.backoff.validate()
    }

    /// Returns a copy with the fields present in `update` replaced.
    ///
    /// The result is validated as a whole; on error `self` is untouched.
    pub fn apply_update(&self, update: &DeliveryConfigUpdate) -> SyncResult<Self> {
        let mut next = self.clone();
        if let Some(size) = update.max_bucket_size {
            next.max_bucket_size = positive_u32("max_bucket_size", size)?;
        }
        if let Some(bytes) = update.max_bucket_bytes {
            next.max_bucket_bytes = Some(positive_u32("max_bucket_bytes", bytes)? as usize);
        }
        if let Some(buckets) = update.max_in_flight_buckets {
            next.max_in_flight_buckets = positive_u32("max_in_flight_buckets", buckets)?;
        }
        if let Some(ceiling) = update.retry_ceiling {
            next.retry_ceiling = non_negative_u32("retry_ceiling", ceiling)?;
        }
        next.validate()?;
        Ok(next)
    }
}

impl TryFrom<RawDeliveryConfig> for DeliveryConfig {
    type Error = SyncError;

    fn try_from(raw: RawDeliveryConfig) -> SyncResult<Self> {
        let config = Self {
            max_bucket_size: positive_u32("max_bucket_size", raw.max_bucket_size)?,
            max_bucket_bytes: raw
                .max_bucket_bytes
                .map(|b| positive_u32("max_bucket_bytes", b).map(|b| b as usize))
                .transpose()?,
            max_in_flight_buckets: positive_u32(
                "max_in_flight_buckets",
                raw.max_in_flight_buckets,
            )?,
            retry_ceiling: non_negative_u32("retry_ceiling", raw.retry_ceiling)?,
            backoff: RetryBackoff::from(raw.backoff),
            delivery_timeout: raw.delivery_timeout_ms.map(Duration::from_millis),
        };
        config.validate()?;
        Ok(config)
    }
}

fn positive_u32(name: &str, value: i64) -> SyncResult<u32> {
    if value <= 0 {
        return Err(SyncError::invalid_config(format!(
            "{name} must be positive, got {value}"
        )));
    }
    u32::try_from(value)
        .map_err(|_| SyncError::invalid_config(format!("{name} is too large: {value}")))
}

fn non_negative_u32(name: &str, value: i64) -> SyncResult<u32> {
    if value < 0 {
        return Err(SyncError::invalid_config(format!(
            "{name} must not be negative, got {value}"
        )));
    }
    u32::try_from(value)
        .map_err(|_| SyncError::invalid_config(format!("{name} is too large: {value}")))
}

/// Exponential backoff between resends of a failed bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryBackoff {
    /// Delay before the first resend.
    pub initial_delay: Duration,
    /// Upper bound on the computed delay (before jitter).
    pub max_delay: Duration,
    /// Growth factor per additional failure.
    pub multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub jitter: bool,
}

impl RetryBackoff {
    /// Creates an exponential backoff with a doubling multiplier and jitter.
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// No delay: a failed bucket is eligible at the next sync opportunity.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the `retry`-th failure (1-based). Zero for 0.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let delay_secs = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    fn validate(&self) -> SyncResult<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(SyncError::invalid_config(format!(
                "backoff multiplier must be >= 1, got {}",
                self.multiplier
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(SyncError::invalid_config(
                "backoff max_delay is shorter than initial_delay",
            ));
        }
        Ok(())
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::immediate()
    }
}

/// What the record store does when an append would exceed its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest pending record and accept the new one.
    DropOldest,
    /// Refuse the new record with `CapacityExceeded`.
    Reject,
}

/// Record store limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Maximum number of records held, pending and bucketed together.
    pub capacity: usize,
    /// Behavior when full.
    pub overflow: OverflowPolicy,
}

impl StoreConfig {
    /// Creates a validated store configuration.
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> SyncResult<Self> {
        let config = Self { capacity, overflow };
        config.validate()?;
        Ok(config)
    }

    /// Checks the capacity.
    pub fn validate(&self) -> SyncResult<()> {
        if self.capacity == 0 {
            return Err(SyncError::invalid_config("store capacity must be positive"));
        }
        Ok(())
    }
}

/// Delivery limits as they appear in a configuration file.
///
/// Signed so that a negative value is reported as invalid rather than as
/// a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawDeliveryConfig {
    /// See [`DeliveryConfig::max_bucket_size`].
    pub max_bucket_size: i64,
    /// See [`DeliveryConfig::max_bucket_bytes`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bucket_bytes: Option<i64>,
    /// See [`DeliveryConfig::max_in_flight_buckets`].
    #[serde(default = "default_in_flight")]
    pub max_in_flight_buckets: i64,
    /// See [`DeliveryConfig::retry_ceiling`].
    pub retry_ceiling: i64,
    /// Retry backoff.
    #[serde(default)]
    pub backoff: RawBackoff,
    /// Delivery timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_timeout_ms: Option<u64>,
}

fn default_in_flight() -> i64 {
    1
}

impl From<&DeliveryConfig> for RawDeliveryConfig {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            max_bucket_size: i64::from(config.max_bucket_size),
            max_bucket_bytes: config.max_bucket_bytes.map(|b| b as i64),
            max_in_flight_buckets: i64::from(config.max_in_flight_buckets),
            retry_ceiling: i64::from(config.retry_ceiling),
            backoff: RawBackoff {
                initial_delay_ms: config.backoff.initial_delay.as_millis() as u64,
                max_delay_ms: config.backoff.max_delay.as_millis() as u64,
                multiplier: config.backoff.multiplier,
                jitter: config.backoff.jitter,
            },
            delivery_timeout_ms: config.delivery_timeout.map(|t| t.as_millis() as u64),
        }
    }
}

/// Backoff as it appears in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawBackoff {
    /// Delay before the first resend, in milliseconds.
    pub initial_delay_ms: u64,
    /// Delay cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor.
    pub multiplier: f64,
    /// Random jitter.
    pub jitter: bool,
}

impl Default for RawBackoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            jitter: false,
        }
    }
}

impl From<RawBackoff> for RetryBackoff {
    fn from(raw: RawBackoff) -> Self {
        Self {
            initial_delay: Duration::from_millis(raw.initial_delay_ms),
            max_delay: Duration::from_millis(raw.max_delay_ms),
            multiplier: raw.multiplier,
            jitter: raw.jitter,
        }
    }
}

/// Complete engine configuration, as loaded from JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Delivery processor limits.
    pub delivery: DeliveryConfig,
    /// Record store limits.
    pub store: StoreConfig,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EngineConfigFile {
    delivery: RawDeliveryConfig,
    store: StoreConfig,
}

impl EngineConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(text: &str) -> SyncResult<Self> {
        let file: EngineConfigFile = serde_json::from_str(text)
            .map_err(|e| SyncError::invalid_config(format!("malformed configuration: {e}")))?;
        file.store.validate()?;
        Ok(Self {
            delivery: DeliveryConfig::try_from(file.delivery)?,
            store: file.store,
        })
    }

    /// Reads, parses and validates a JSON file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}
