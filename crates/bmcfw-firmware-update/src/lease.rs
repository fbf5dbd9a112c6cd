//! Cross-BMC update lease.
//!
//! Two BMCs can reach the same component. Before touching hardware a session
//! writes `fru{slot}_fwupd = <expiry>` into the shared key-value store, where
//! the expiry is in seconds of the session clock. A peer that finds an
//! unexpired value backs off with [`UpdateError::ConcurrentUpdateConflict`];
//! an expired value is stale and may be taken over. The holder extends the
//! expiry while it works and deletes the key when it is done, on every exit
//! path.

use std::collections::HashMap;
use std::io;
use std::time::Duration;

use bmcfw_errors::{Result, UpdateError};
use bmcfw_transport::Clock;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Key-value store shared between the BMCs of a chassis.
pub trait KvStore: Send + Sync {
    /// Read `key`.
    ///
    /// # Errors
    ///
    /// Any I/O error of the backing store.
    fn get(&self, key: &str) -> io::Result<Option<String>>;

    /// Write `key`; `ttl` is a hint for stores that expire entries.
    ///
    /// # Errors
    ///
    /// Any I/O error of the backing store.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> io::Result<()>;

    /// Remove `key`; removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Any I/O error of the backing store.
    fn delete(&self, key: &str) -> io::Result<()>;

    /// Write `key` unless its current value satisfies `keep`.
    ///
    /// Returns whether the value was written. Stores that can do so should
    /// make the check and the write atomic.
    ///
    /// # Errors
    ///
    /// Any I/O error of the backing store.
    fn set_unless(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        keep: &dyn Fn(&str) -> bool,
    ) -> io::Result<bool> {
        if self.get(key)?.is_some_and(|current| keep(&current)) {
            return Ok(false);
        }
        self.set(key, value, ttl)?;
        Ok(true)
    }
}

/// Process-local [`KvStore`].
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryKvStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) -> io::Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn set_unless(
        &self,
        key: &str,
        value: &str,
        _ttl: Option<Duration>,
        keep: &dyn Fn(&str) -> bool,
    ) -> io::Result<bool> {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|current| keep(current)) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }
}

/// Lease key for the update flag of `slot`.
pub fn lease_key(slot: u8) -> String {
    format!("fru{slot}_fwupd")
}

/// Lease key shared by every slot for baseboard components.
pub const BASEBOARD_LEASE_KEY: &str = "bb_fw_update";

/// Held update lease; dropping it deletes the key.
pub struct LeaseGuard<'k> {
    store: &'k dyn KvStore,
    clock: &'k dyn Clock,
    key: String,
    ttl: Duration,
    refresh_interval: Duration,
    refreshed_at: Duration,
    released: bool,
}

impl<'k> LeaseGuard<'k> {
    /// Take the lease at `key`.
    ///
    /// # Errors
    ///
    /// [`UpdateError::ConcurrentUpdateConflict`] while a peer holds an
    /// unexpired lease, [`UpdateError::Io`] if the store fails.
    pub fn acquire(
        store: &'k dyn KvStore,
        clock: &'k dyn Clock,
        key: impl Into<String>,
        ttl: Duration,
        refresh_interval: Duration,
    ) -> Result<Self> {
        let key = key.into();
        let now = clock.now();
        let expiry = expiry_secs(now, ttl);
        let now_secs = now.as_secs();
        let live = |current: &str| current.trim().parse::<u64>().is_ok_and(|exp| exp > now_secs);

        if !store.set_unless(&key, &expiry.to_string(), Some(ttl), &live)? {
            warn!(key = %key, "update lease held by a peer");
            return Err(UpdateError::ConcurrentUpdateConflict { key });
        }
        info!(key = %key, expiry, "update lease acquired");
        Ok(Self {
            store,
            clock,
            key,
            ttl,
            refresh_interval,
            refreshed_at: now,
            released: false,
        })
    }

    /// Lease key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Extend the expiry unconditionally.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Io`] if the store fails.
    pub fn refresh(&mut self) -> Result<()> {
        let now = self.clock.now();
        let expiry = expiry_secs(now, self.ttl);
        self.store.set(&self.key, &expiry.to_string(), Some(self.ttl))?;
        self.refreshed_at = now;
        debug!(key = %self.key, expiry, "update lease refreshed");
        Ok(())
    }

    /// Extend the expiry if the refresh interval has passed.
    ///
    /// # Errors
    ///
    /// As [`LeaseGuard::refresh`].
    pub fn refresh_if_due(&mut self) -> Result<()> {
        let elapsed = self.clock.now().saturating_sub(self.refreshed_at);
        if elapsed >= self.refresh_interval {
            self.refresh()?;
        }
        Ok(())
    }

    /// Delete the key now and report failures.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Io`] if the store fails.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.store.delete(&self.key)?;
        info!(key = %self.key, "update lease released");
        Ok(())
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.store.delete(&self.key) {
            Ok(()) => info!(key = %self.key, "update lease released"),
            Err(e) => warn!(key = %self.key, error = %e, "failed to release update lease"),
        }
    }
}

impl core::fmt::Debug for LeaseGuard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("refreshed_at", &self.refreshed_at)
            .finish_non_exhaustive()
    }
}

fn expiry_secs(now: Duration, ttl: Duration) -> u64 {
    now.saturating_add(ttl).as_secs()
}

#[cfg(test)]
mod tests {
    use bmcfw_test_helpers::prelude::*;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);
    const REFRESH: Duration = Duration::from_secs(30);

    #[test]
    fn test_second_holder_conflicts() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let lease = LeaseGuard::acquire(&store, &clock, lease_key(1), TTL, REFRESH)?;
        assert_eq!(store.get("fru1_fwupd")?, Some("60".to_string()));

        let second = LeaseGuard::acquire(&store, &clock, lease_key(1), TTL, REFRESH);
        assert!(matches!(
            second,
            Err(UpdateError::ConcurrentUpdateConflict { ref key }) if key == "fru1_fwupd"
        ));

        drop(lease);
        assert!(store.is_empty());
        let _again = LeaseGuard::acquire(&store, &clock, lease_key(1), TTL, REFRESH)?;
        Ok(())
    }

    #[test]
    fn test_stale_lease_reclaimed() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        store.set("fru2_fwupd", "30", None)?;
        clock.advance(Duration::from_secs(31));
        let lease = LeaseGuard::acquire(&store, &clock, lease_key(2), TTL, REFRESH)?;
        assert_eq!(lease.key(), "fru2_fwupd");
        assert_eq!(store.get("fru2_fwupd")?, Some("91".to_string()));
        Ok(())
    }

    #[test]
    fn test_garbage_value_is_stale() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        store.set("fru3_fwupd", "not-a-number", None)?;
        let _lease = LeaseGuard::acquire(&store, &clock, lease_key(3), TTL, REFRESH)?;
        Ok(())
    }

    #[test]
    fn test_refresh_if_due() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let mut lease = LeaseGuard::acquire(&store, &clock, lease_key(1), TTL, REFRESH)?;

        clock.advance(Duration::from_secs(10));
        lease.refresh_if_due()?;
        assert_eq!(store.get("fru1_fwupd")?, Some("60".to_string()));

        clock.advance(Duration::from_secs(25));
        lease.refresh_if_due()?;
        assert_eq!(store.get("fru1_fwupd")?, Some("95".to_string()));
        Ok(())
    }

    #[test]
    fn test_explicit_release() -> Result<()> {
        let store = InMemoryKvStore::new();
        let clock = ManualClock::new();
        let lease = LeaseGuard::acquire(&store, &clock, lease_key(4), TTL, REFRESH)?;
        lease.release()?;
        assert_eq!(store.get("fru4_fwupd")?, None);
        Ok(())
    }
}
