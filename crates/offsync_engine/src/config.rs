//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use offsync_protocol::ConflictStrategy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for sync operations.
///
/// A cycle snapshots the configuration when it starts; updates made while a
/// cycle is running apply from the next cycle on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Identifier of this device, sent with every batch.
    pub device_id: String,
    /// Maximum number of operations per upload batch.
    pub batch_size: usize,
    /// Failed attempts after which a record is terminal.
    pub max_retries: u32,
    /// Strategy applied to newly detected conflicts.
    pub strategy: ConflictStrategy,
    /// Period of the background sync loop.
    pub sync_interval_ms: u64,
    /// Queue length above which a capacity warning is raised.
    pub queue_capacity_warning_threshold: usize,
    /// Encrypt payloads at rest.
    pub encryption_enabled: bool,
    /// Upper bound on a single batch upload.
    pub batch_timeout_ms: u64,
    /// Write attempts before an enqueue reports a persistence failure.
    pub persist_attempts: u32,
    /// Backoff between attempts of a failed record.
    pub retry: RetryConfig,
    /// Number of recent error messages kept for status reporting.
    pub max_status_errors: usize,
}

impl SyncConfig {
    /// Creates a configuration with defaults for the given device.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            batch_size: 50,
            max_retries: 3,
            strategy: ConflictStrategy::ServerWins,
            sync_interval_ms: 30_000,
            queue_capacity_warning_threshold: 1_000,
            encryption_enabled: false,
            batch_timeout_ms: 30_000,
            persist_attempts: 3,
            retry: RetryConfig::default(),
            max_status_errors: 20,
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the maximum retry count.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the conflict strategy.
    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the background sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval_ms = duration_millis(interval);
        self
    }

    /// Sets the capacity warning threshold.
    pub fn with_capacity_warning_threshold(mut self, threshold: usize) -> Self {
        self.queue_capacity_warning_threshold = threshold;
        self
    }

    /// Enables or disables payload encryption at rest.
    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encryption_enabled = enabled;
        self
    }

    /// Sets the per-batch upload timeout.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout_ms = duration_millis(timeout);
        self
    }

    /// Sets the number of write attempts per enqueue.
    pub fn with_persist_attempts(mut self, attempts: u32) -> Self {
        self.persist_attempts = attempts;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Background sync interval.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    /// Per-batch upload timeout.
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] for a zero batch size, interval or
    /// timeout.
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 {
            return Err(SyncError::Validation("batch_size must be positive".into()));
        }
        if self.sync_interval_ms == 0 {
            return Err(SyncError::Validation(
                "sync_interval_ms must be positive".into(),
            ));
        }
        if self.batch_timeout_ms == 0 {
            return Err(SyncError::Validation(
                "batch_timeout_ms must be positive".into(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(SyncError::Validation(
                "backoff_multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Returns a copy with `update` applied.
    pub fn merged(&self, update: &SyncConfigUpdate) -> Self {
        let mut next = self.clone();
        if let Some(size) = update.batch_size {
            next.batch_size = size;
        }
        if let Some(max) = update.max_retries {
            next.max_retries = max;
        }
        if let Some(strategy) = update.strategy {
            next.strategy = strategy;
        }
        if let Some(interval) = update.sync_interval_ms {
            next.sync_interval_ms = interval;
        }
        if let Some(threshold) = update.queue_capacity_warning_threshold {
            next.queue_capacity_warning_threshold = threshold;
        }
        if let Some(enabled) = update.encryption_enabled {
            next.encryption_enabled = enabled;
        }
        if let Some(timeout) = update.batch_timeout_ms {
            next.batch_timeout_ms = timeout;
        }
        if let Some(retry) = &update.retry {
            next.retry = retry.clone();
        }
        next
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// A partial configuration update. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfigUpdate {
    /// New batch size.
    pub batch_size: Option<usize>,
    /// New maximum retry count.
    pub max_retries: Option<u32>,
    /// New conflict strategy.
    pub strategy: Option<ConflictStrategy>,
    /// New background interval.
    pub sync_interval_ms: Option<u64>,
    /// New capacity warning threshold.
    pub queue_capacity_warning_threshold: Option<usize>,
    /// Toggle payload encryption for records enqueued from now on.
    pub encryption_enabled: Option<bool>,
    /// New per-batch timeout.
    pub batch_timeout_ms: Option<u64>,
    /// New retry configuration.
    pub retry: Option<RetryConfig>,
}

/// Configuration for retry backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound on any delay.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given initial delay.
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay_ms: duration_millis(initial_delay),
            max_delay_ms: 5 * 60 * 1_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Retries become eligible immediately on the next cycle.
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = duration_millis(delay);
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculates the delay after the given number of failed attempts.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.initial_delay_ms == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let delay_ms = base_ms.min(self.max_delay_ms as f64);

        if self.jitter {
            let jitter = delay_ms * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64((delay_ms + jitter) / 1_000.0)
        } else {
            Duration::from_secs_f64(delay_ms / 1_000.0)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("device-a")
            .with_batch_size(10)
            .with_max_retries(5)
            .with_strategy(ConflictStrategy::Merge)
            .with_batch_timeout(Duration::from_secs(5));

        assert_eq!(config.device_id, "device-a");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.strategy, ConflictStrategy::Merge);
        assert_eq!(config.batch_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.strategy, ConflictStrategy::ServerWins);
        assert!(!config.encryption_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        let config = SyncConfig::default().with_batch_size(0);
        assert!(matches!(config.validate(), Err(SyncError::Validation(_))));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"device_id":"d1","strategy":"merge"}"#).unwrap();
        assert_eq!(config.device_id, "d1");
        assert_eq!(config.strategy, ConflictStrategy::Merge);
        assert_eq!(config.batch_size, 50);
    }

    #[test]
    fn update_only_touches_set_fields() {
        let config = SyncConfig::new("device-a");
        let update = SyncConfigUpdate {
            batch_size: Some(7),
            strategy: Some(ConflictStrategy::Manual),
            ..Default::default()
        };
        let next = config.merged(&update);

        assert_eq!(next.batch_size, 7);
        assert_eq!(next.strategy, ConflictStrategy::Manual);
        assert_eq!(next.max_retries, config.max_retries);
        assert_eq!(next.device_id, "device-a");
    }

    #[test]
    fn retry_immediate_has_no_delay() {
        let retry = RetryConfig::immediate();
        assert_eq!(retry.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(10), Duration::ZERO);
    }

    #[test]
    fn retry_delay_calculation() {
        let retry = RetryConfig::new(Duration::from_millis(100)).with_backoff_multiplier(2.0);

        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);

        let delay1 = retry.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(126));

        let delay3 = retry.delay_for_attempt(3);
        assert!(delay3 >= Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let retry = RetryConfig::new(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(retry.delay_for_attempt(5), Duration::from_secs(5));
    }
}
