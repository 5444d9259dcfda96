//! Session elevation tracking
//!
//! A successful step-up authentication elevates an account for a fixed
//! window. Validity is evaluated against the caller-supplied clock and
//! fails closed: a record stamped in the future is treated as invalid
//! rather than granting an arbitrarily long window.

use crate::models::ElevationRecord;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

pub struct ElevationTracker {
    window_seconds: u64,
    records: RwLock<HashMap<String, ElevationRecord>>,
}

impl ElevationTracker {
    #[must_use]
    pub fn new(window_seconds: u64) -> Self {
        Self {
            window_seconds,
            records: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Mark an account elevated as of `at`, replacing any prior record
    pub fn elevate(&self, owner_id: &str, method: &str, at: DateTime<Utc>) -> ElevationRecord {
        let record = ElevationRecord {
            owner_id: owner_id.to_string(),
            elevated_at: at,
            method: method.to_string(),
        };
        let mut records = self
            .records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        records.insert(owner_id.to_string(), record.clone());
        record
    }

    #[must_use]
    pub fn record(&self, owner_id: &str) -> Option<ElevationRecord> {
        let records = self
            .records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        records.get(owner_id).cloned()
    }

    /// Whether the account is elevated at `now`
    ///
    /// Valid iff `0 <= now - elevated_at <= window`. A future
    /// `elevated_at` indicates clock trouble and is treated as not
    /// elevated.
    #[must_use]
    pub fn is_valid(&self, owner_id: &str, now: DateTime<Utc>) -> bool {
        let Some(record) = self.record(owner_id) else {
            return false;
        };
        let elapsed = now - record.elevated_at;
        if elapsed < Duration::zero() {
            log::warn!("Elevation record for {owner_id} is stamped in the future, treating as invalid");
            return false;
        }
        elapsed <= Duration::seconds(i64::try_from(self.window_seconds).unwrap_or(i64::MAX))
    }

    /// Seconds of elevation remaining at `now`, `None` when not
    /// elevated. `Some(0)` means still valid with under a second left.
    #[must_use]
    pub fn time_remaining(&self, owner_id: &str, now: DateTime<Utc>) -> Option<u64> {
        if !self.is_valid(owner_id, now) {
            return None;
        }
        let record = self.record(owner_id)?;
        let expires = record.elevated_at
            + Duration::seconds(i64::try_from(self.window_seconds).unwrap_or(i64::MAX));
        Some(u64::try_from((expires - now).num_seconds()).unwrap_or(0))
    }

    /// When the current elevation expires, if the account has a record
    #[must_use]
    pub fn expires_at(&self, owner_id: &str) -> Option<DateTime<Utc>> {
        self.record(owner_id).map(|r| {
            r.elevated_at + Duration::seconds(i64::try_from(self.window_seconds).unwrap_or(i64::MAX))
        })
    }

    /// Drop the account's elevation record immediately
    pub fn clear(&self, owner_id: &str) -> bool {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        records.remove(owner_id).is_some()
    }

    /// Drop all records that are no longer valid at `now`
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let window = Duration::seconds(i64::try_from(self.window_seconds).unwrap_or(i64::MAX));
        let mut records = self
            .records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = records.len();
        records.retain(|_, r| {
            let elapsed = now - r.elevated_at;
            elapsed >= Duration::zero() && elapsed <= window
        });
        before - records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ElevationTracker {
        ElevationTracker::new(900)
    }

    #[test]
    fn test_elevation_lifecycle() {
        let t = tracker();
        let now = Utc::now();
        assert!(!t.is_valid("alice", now));

        t.elevate("alice", "passkey", now);
        assert!(t.is_valid("alice", now));
        assert_eq!(t.record("alice").unwrap().method, "passkey");
        assert_eq!(t.expires_at("alice"), Some(now + Duration::seconds(900)));
    }

    #[test]
    fn test_window_boundaries() {
        let t = tracker();
        let now = Utc::now();
        t.elevate("alice", "passkey", now);

        assert!(t.is_valid("alice", now + Duration::seconds(899)));
        assert!(t.is_valid("alice", now + Duration::seconds(900)));
        assert!(!t.is_valid("alice", now + Duration::seconds(901)));
    }

    #[test]
    fn test_future_record_invalid() {
        let t = tracker();
        let now = Utc::now();
        t.elevate("alice", "passkey", now + Duration::seconds(60));
        assert!(!t.is_valid("alice", now));
        assert_eq!(t.time_remaining("alice", now), None);
    }

    #[test]
    fn test_time_remaining() {
        let t = tracker();
        let now = Utc::now();
        t.elevate("alice", "passkey", now);

        assert_eq!(t.time_remaining("alice", now), Some(900));
        assert_eq!(
            t.time_remaining("alice", now + Duration::seconds(300)),
            Some(600)
        );
        assert_eq!(t.time_remaining("alice", now + Duration::seconds(1000)), None);
    }

    #[test]
    fn test_time_remaining_distinguishes_zero_from_absent() {
        let t = tracker();
        let now = Utc::now();
        t.elevate("alice", "passkey", now);

        // Still valid at the window edge, just with nothing left
        assert_eq!(t.time_remaining("alice", now + Duration::seconds(900)), Some(0));
        assert_eq!(t.time_remaining("bob", now), None);
    }

    #[test]
    fn test_clear() {
        let t = tracker();
        let now = Utc::now();
        t.elevate("alice", "passkey", now);
        assert!(t.clear("alice"));
        assert!(!t.is_valid("alice", now));
        assert!(!t.clear("alice"));
    }

    #[test]
    fn test_prune() {
        let t = tracker();
        let now = Utc::now();
        t.elevate("stale", "passkey", now - Duration::seconds(2000));
        t.elevate("fresh", "passkey", now);

        assert_eq!(t.prune(now), 1);
        assert!(t.record("stale").is_none());
        assert!(t.is_valid("fresh", now));
    }

    #[test]
    fn test_re_elevation_replaces_record() {
        let t = tracker();
        let now = Utc::now();
        t.elevate("alice", "passkey", now - Duration::seconds(800));
        t.elevate("alice", "passkey", now);
        assert_eq!(t.time_remaining("alice", now), Some(900));
    }
}
