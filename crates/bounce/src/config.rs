//! Governor configuration.
//!
//! [`GovernorConfig`] is the serializable part of a governor's setup (the two
//! durations). Callbacks and the scheduler are attached through
//! [`GovernorBuilder`](crate::GovernorBuilder).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Durations that shape a governor's timing.
///
/// Values are not range-checked: a zero throttle wait is accepted and simply
/// makes every chain eligible to resolve on the next timer tick.
///
/// ```
/// use bounce_core::GovernorConfig;
///
/// let config = GovernorConfig::from_json(r#"{ "throttle_wait_ms": 100, "max_delay_ms": 500 }"#).unwrap();
/// assert_eq!(config.throttle_wait().as_millis(), 100);
/// assert_eq!(config.max_delay().map(|d| d.as_millis()), Some(500));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Quiet period, in milliseconds, after which an idle chain resolves.
    pub throttle_wait_ms: u64,

    /// Hard ceiling, in milliseconds, from a chain's first event to its resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

impl GovernorConfig {
    /// Create a config with the given throttle wait and no max-delay ceiling.
    pub fn new(throttle_wait_ms: u64) -> Self {
        Self {
            throttle_wait_ms,
            max_delay_ms: None,
        }
    }

    /// Set the max-delay ceiling.
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    /// Parse a config from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn throttle_wait(&self) -> Duration {
        Duration::from_millis(self.throttle_wait_ms)
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BounceError;

    #[test]
    fn test_max_delay_is_optional() {
        let config = GovernorConfig::from_json(r#"{ "throttle_wait_ms": 250 }"#).unwrap();

        assert_eq!(config.throttle_wait(), Duration::from_millis(250));
        assert_eq!(config.max_delay(), None);
    }

    #[test]
    fn test_missing_throttle_wait_is_rejected() {
        let err = GovernorConfig::from_json(r#"{ "max_delay_ms": 250 }"#).unwrap_err();

        assert!(matches!(err, BounceError::Config(_)));
        assert!(err.to_string().contains("throttle_wait_ms"));
    }

    #[test]
    fn test_builder_style_config_serializes_without_absent_ceiling() {
        let config = GovernorConfig::new(40);
        let json = serde_json::to_value(config).unwrap();

        assert_eq!(json, serde_json::json!({ "throttle_wait_ms": 40 }));

        let capped = config.with_max_delay_ms(1_000);
        assert_eq!(capped.max_delay(), Some(Duration::from_secs(1)));
    }
}
