//! Engine configuration.
//!
//! Every delay and bound the programmers use that is a policy choice rather
//! than a hardware constant lives here. Hardware settle times stay next to
//! the sequences that need them.

use std::time::Duration;

use bmcfw_errors::{Result, UpdateError};
use bmcfw_transport::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Configuration for an update session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Retry policy for every single transport exchange
    pub retry: RetryPolicy,

    /// Lifetime of the cross-BMC update lease
    #[serde(with = "duration_ms")]
    pub lease_ttl: Duration,

    /// How often a long update extends its lease; must be shorter than the TTL
    #[serde(with = "duration_ms")]
    pub lease_refresh_interval: Duration,

    /// Remaining-writes count at or below which a VR update needs `force`
    pub remaining_writes_warning: u32,

    /// Skip BIOS blocks whose device digest already matches
    pub bios_dedup: bool,

    /// Re-read every BIOS block digest after writing it
    pub bios_verify: bool,

    /// Host-ready polls after a recovery power cycle
    pub host_ready_polls: u32,

    /// Delay between host-ready polls
    #[serde(with = "duration_ms")]
    pub host_ready_interval: Duration,

    /// Download-status polls per PCIe switch block
    pub status_poll_limit: u32,

    /// Delay between download-status polls
    #[serde(with = "duration_ms")]
    pub status_poll_interval: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lease_ttl: Duration::from_secs(60),
            lease_refresh_interval: Duration::from_secs(30),
            remaining_writes_warning: 3,
            bios_dedup: true,
            bios_verify: false,
            host_ready_polls: 40,
            host_ready_interval: Duration::from_secs(3),
            status_poll_limit: 50,
            status_poll_interval: Duration::from_millis(50),
        }
    }
}

impl UpdateConfig {
    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Config`] if the document is malformed or the result
    /// fails [`UpdateConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| UpdateError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the bounds between fields.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.retry
            .validate()
            .map_err(|e| UpdateError::config(format!("retry: {e}")))?;
        if self.lease_ttl.is_zero() {
            return Err(UpdateError::config("lease_ttl must be nonzero"));
        }
        if self.lease_refresh_interval.is_zero() || self.lease_refresh_interval >= self.lease_ttl {
            return Err(UpdateError::config(format!(
                "lease_refresh_interval ({:?}) must be nonzero and shorter than lease_ttl ({:?})",
                self.lease_refresh_interval, self.lease_ttl
            )));
        }
        if self.status_poll_limit == 0 {
            return Err(UpdateError::config("status_poll_limit must be at least 1"));
        }
        Ok(())
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the lease TTL and refresh interval.
    #[must_use]
    pub fn with_lease(mut self, ttl: Duration, refresh_interval: Duration) -> Self {
        self.lease_ttl = ttl;
        self.lease_refresh_interval = refresh_interval;
        self
    }

    /// Set the remaining-writes warning threshold.
    #[must_use]
    pub fn with_remaining_writes_warning(mut self, threshold: u32) -> Self {
        self.remaining_writes_warning = threshold;
        self
    }

    /// Enable or disable BIOS block deduplication.
    #[must_use]
    pub fn with_bios_dedup(mut self, enabled: bool) -> Self {
        self.bios_dedup = enabled;
        self
    }

    /// Enable or disable BIOS post-write verification.
    #[must_use]
    pub fn with_bios_verify(mut self, enabled: bool) -> Self {
        self.bios_verify = enabled;
        self
    }

    /// Set the host-ready poll count and interval.
    #[must_use]
    pub fn with_host_ready(mut self, polls: u32, interval: Duration) -> Self {
        self.host_ready_polls = polls;
        self.host_ready_interval = interval;
        self
    }

    /// Set the download-status poll count and interval.
    #[must_use]
    pub fn with_status_poll(mut self, limit: u32, interval: Duration) -> Self {
        self.status_poll_limit = limit;
        self.status_poll_interval = interval;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
