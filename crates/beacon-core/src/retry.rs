//! # Retry Tiers
//!
//! Delay buckets for the background retry wake.
//!
//! ```text
//! attempt counter   tier      default delay
//! ───────────────   ───────   ─────────────
//!     0, 1          Short     1 minute
//!     2, 3          Medium    1 hour
//!     4+            Long      7 days
//! ```
//!
//! The counter is cumulative and never reset, so a device that keeps failing
//! settles on the long tier.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay bucket selected by the cumulative attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTier {
    Short,
    Medium,
    Long,
}

impl RetryTier {
    pub fn for_attempt(attempt: u64) -> Self {
        match attempt {
            0..=1 => RetryTier::Short,
            2..=3 => RetryTier::Medium,
            _ => RetryTier::Long,
        }
    }
}

/// Concrete delay for each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryTiers {
    #[serde(with = "secs")]
    pub short: Duration,
    #[serde(with = "secs")]
    pub medium: Duration,
    #[serde(with = "secs")]
    pub long: Duration,
}

impl Default for RetryTiers {
    fn default() -> Self {
        RetryTiers {
            short: Duration::from_secs(60),
            medium: Duration::from_secs(60 * 60),
            long: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl RetryTiers {
    pub fn delay_for(&self, tier: RetryTier) -> Duration {
        match tier {
            RetryTier::Short => self.short,
            RetryTier::Medium => self.medium,
            RetryTier::Long => self.long,
        }
    }

    /// Delay before the next wake given the persisted attempt counter.
    pub fn delay_for_attempt(&self, attempt: u64) -> Duration {
        self.delay_for(RetryTier::for_attempt(attempt))
    }
}

/// Durations are written to config files as whole seconds.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_table() {
        let tiers = RetryTiers::default();
        let delays: Vec<Duration> = (0..=5).map(|n| tiers.delay_for_attempt(n)).collect();

        assert_eq!(
            delays,
            vec![
                Duration::from_secs(60),
                Duration::from_secs(60),
                Duration::from_secs(3_600),
                Duration::from_secs(3_600),
                Duration::from_secs(604_800),
                Duration::from_secs(604_800),
            ]
        );
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(RetryTier::for_attempt(1), RetryTier::Short);
        assert_eq!(RetryTier::for_attempt(2), RetryTier::Medium);
        assert_eq!(RetryTier::for_attempt(3), RetryTier::Medium);
        assert_eq!(RetryTier::for_attempt(4), RetryTier::Long);
        assert_eq!(RetryTier::for_attempt(u64::MAX), RetryTier::Long);
    }

    #[test]
    fn test_tiers_serialize_as_seconds() {
        let json = serde_json::to_value(RetryTiers::default()).unwrap();
        assert_eq!(json["short"], 60);
        assert_eq!(json["long"], 604_800);

        let parsed: RetryTiers = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, RetryTiers::default());
    }
}
