//! TTL Tracker Module
//!
//! Per-key expiry bookkeeping with optimistic versioning.
//!
//! Expiry detection and eviction are separate steps. A reader that sees a key
//! as expired remembers the entry's version and later asks for a
//! version-checked removal. If a writer refreshed the key in between, the
//! entry carries a newer version and the stale eviction is dropped.
//!
//! This is a deliberate check-then-act without a lock: the version counter
//! is the only guard, and it only protects the tracker entry itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

// == TTL Entry ==
/// Expiry record for a single key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlEntry {
    pub key: String,
    pub expires_at: Instant,
    pub version: u64,
}

impl TtlEntry {
    /// Checks expiry against the given instant.
    ///
    /// Boundary condition: an entry is expired once `now >= expires_at`, so a
    /// zero-length TTL is expired as soon as it is observed.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime, zero once expired.
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

// == TTL Tracker ==
/// Owns every [`TtlEntry`]; at most one entry exists per key.
///
/// A key without an entry never expires.
#[derive(Debug)]
pub struct TtlTracker {
    entries: DashMap<String, TtlEntry>,
    next_version: AtomicU64,
    enabled: bool,
}

impl TtlTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: DashMap::new(),
            next_version: AtomicU64::new(1),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // == Set ==
    /// Starts (or restarts) the clock for a key and returns the new version.
    ///
    /// Replacing an existing entry invalidates its version. Returns `None` when
    /// TTL tracking is disabled or the deadline is not representable, in which
    /// case the key keeps no expiry.
    pub fn set(&self, key: &str, duration: Duration) -> Option<u64> {
        if !self.enabled {
            return None;
        }

        let Some(expires_at) = Instant::now().checked_add(duration) else {
            debug!(key, ?duration, "TTL too large to track, key will not expire");
            self.entries.remove(key);
            return None;
        };

        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key.to_string(),
            TtlEntry {
                key: key.to_string(),
                expires_at,
                version,
            },
        );
        Some(version)
    }

    // == Is Expired ==
    /// True iff an entry exists and its deadline has been reached
    /// (`now >= expires_at`). Never mutates.
    ///
    /// The boundary is inclusive, so a zero-length TTL reads as expired on the
    /// very next check.
    pub fn is_expired(&self, key: &str) -> bool {
        self.expired_version(key).is_some()
    }

    /// Observes expiry, returning the version to hand to
    /// [`remove_if_version_matches`](Self::remove_if_version_matches).
    pub fn expired_version(&self, key: &str) -> Option<u64> {
        let entry = self.entries.get(key)?;
        entry
            .is_expired_at(Instant::now())
            .then_some(entry.version)
    }

    // == Version-Checked Removal ==
    /// Deletes the entry only if it still carries `version`.
    ///
    /// Returns whether the delete happened.
    pub fn remove_if_version_matches(&self, key: &str, version: u64) -> bool {
        self.take_if_version_matches(key, version).is_some()
    }

    /// Like [`remove_if_version_matches`](Self::remove_if_version_matches),
    /// handing back the removed entry so it can be restored.
    pub fn take_if_version_matches(&self, key: &str, version: u64) -> Option<TtlEntry> {
        self.entries
            .remove_if(key, |_, entry| entry.version == version)
            .map(|(_, entry)| entry)
    }

    /// Puts back an entry taken by an eviction that could not complete.
    ///
    /// A newer entry written in the meantime wins and the old one is dropped.
    /// Returns whether the entry was restored.
    pub fn restore(&self, entry: TtlEntry) -> bool {
        match self.entries.entry(entry.key.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    /// Drops the entry for a key regardless of version.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remaining lifetime of a tracked key.
    pub fn remaining(&self, key: &str) -> Option<Duration> {
        self.entries
            .get(key)
            .map(|entry| entry.remaining_at(Instant::now()))
    }

    pub fn version(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|entry| entry.version)
    }

    /// Every currently expired key with the version observed for it.
    pub fn expired(&self) -> Vec<(String, u64)> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| (entry.key.clone(), entry.version))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_untracked_key_never_expires() {
        let tracker = TtlTracker::new(true);
        assert!(!tracker.is_expired("user:42"));
        assert_eq!(tracker.remaining("user:42"), None);
    }

    #[test]
    fn test_zero_duration_is_expired_immediately() {
        let tracker = TtlTracker::new(true);
        tracker.set("session", Duration::ZERO);
        assert!(tracker.is_expired("session"));
    }

    #[test]
    fn test_expiration_after_sleep() {
        let tracker = TtlTracker::new(true);
        tracker.set("session", Duration::from_millis(20));
        assert!(!tracker.is_expired("session"));

        sleep(Duration::from_millis(40));

        assert!(tracker.is_expired("session"));
        assert_eq!(tracker.remaining("session"), Some(Duration::ZERO));
    }

    #[test]
    fn test_is_expired_does_not_evict() {
        let tracker = TtlTracker::new(true);
        tracker.set("session", Duration::ZERO);

        assert!(tracker.is_expired("session"));
        assert!(tracker.is_expired("session"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_one_entry_per_key() {
        let tracker = TtlTracker::new(true);
        let first = tracker.set("k", Duration::from_secs(60)).unwrap();
        let second = tracker.set("k", Duration::from_secs(60)).unwrap();

        assert!(second > first);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.version("k"), Some(second));
    }

    #[test]
    fn test_stale_eviction_is_dropped_after_refresh() {
        let tracker = TtlTracker::new(true);
        tracker.set("k", Duration::ZERO);
        let observed = tracker.expired_version("k").unwrap();

        // A writer refreshes the key before the reader evicts
        tracker.set("k", Duration::from_secs(60));

        assert!(!tracker.remove_if_version_matches("k", observed));
        assert!(!tracker.is_expired("k"));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_matching_version_evicts() {
        let tracker = TtlTracker::new(true);
        tracker.set("k", Duration::ZERO);
        let observed = tracker.expired_version("k").unwrap();

        assert!(tracker.remove_if_version_matches("k", observed));
        assert!(tracker.is_empty());
        // Second eviction with the same version is a no-op
        assert!(!tracker.remove_if_version_matches("k", observed));
    }

    #[test]
    fn test_restore_after_failed_eviction() {
        let tracker = TtlTracker::new(true);
        let version = tracker.set("k", Duration::ZERO).unwrap();
        let taken = tracker.take_if_version_matches("k", version).unwrap();
        assert!(tracker.is_empty());

        assert!(tracker.restore(taken));
        assert_eq!(tracker.expired_version("k"), Some(version));
    }

    #[test]
    fn test_restore_never_overwrites_newer_entry() {
        let tracker = TtlTracker::new(true);
        let version = tracker.set("k", Duration::ZERO).unwrap();
        let taken = tracker.take_if_version_matches("k", version).unwrap();
        let fresh = tracker.set("k", Duration::from_secs(60)).unwrap();

        assert!(!tracker.restore(taken));
        assert_eq!(tracker.version("k"), Some(fresh));
        assert!(!tracker.is_expired("k"));
    }

    #[test]
    fn test_disabled_tracker_ignores_set() {
        let tracker = TtlTracker::new(false);
        assert_eq!(tracker.set("k", Duration::ZERO), None);
        assert!(!tracker.is_expired("k"));
    }

    #[test]
    fn test_huge_duration_is_not_tracked() {
        let tracker = TtlTracker::new(true);
        tracker.set("k", Duration::ZERO);
        assert_eq!(tracker.set("k", Duration::MAX), None);
        assert!(!tracker.is_expired("k"));
    }

    #[test]
    fn test_expired_lists_only_stale_keys() {
        let tracker = TtlTracker::new(true);
        tracker.set("old", Duration::ZERO);
        tracker.set("fresh", Duration::from_secs(60));

        let expired = tracker.expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "old");
    }
}
