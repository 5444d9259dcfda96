//! Append-only audit storage
//!
//! Events are keyed by `(timestamp in microseconds, sequence)` so
//! iteration is chronological and keys stay unique even when two
//! events share a timestamp. Secondary indexes by owner, action type,
//! and outcome let filtered queries skip straight to their candidates.

use crate::audit::query::AuditFilter;
use crate::errors::StepkeyError;
use crate::models::AuditEvent;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Primary key of a stored audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub micros: i64,
    pub seq: u64,
}

impl EventKey {
    fn for_event(event: &AuditEvent, seq: u64) -> Self {
        Self {
            micros: event.timestamp.timestamp_micros(),
            seq,
        }
    }
}

/// Storage backend for the audit trail
///
/// Implementations must be append-only: `append` never replaces an
/// existing event, and nothing mutates stored events afterwards.
pub trait AuditStore: Send + Sync {
    /// Persist an event, returning its key
    ///
    /// # Errors
    ///
    /// Returns `AuditWriteFailure` when the event cannot be stored
    fn append(&self, event: AuditEvent) -> Result<EventKey, StepkeyError>;

    /// Events matching `filter` strictly after `after`, ascending,
    /// at most `limit`
    fn page(&self, filter: &AuditFilter, after: Option<EventKey>, limit: usize) -> Vec<(EventKey, AuditEvent)>;

    /// Remove events older than `cutoff`, returning how many went
    fn cleanup(&self, cutoff: DateTime<Utc>) -> usize;

    /// Total number of stored events
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct MemoryTables {
    events: BTreeMap<EventKey, AuditEvent>,
    by_owner: BTreeMap<String, BTreeSet<EventKey>>,
    by_action: BTreeMap<String, BTreeSet<EventKey>>,
    by_outcome: BTreeMap<String, BTreeSet<EventKey>>,
}

/// In-memory `AuditStore` with secondary indexes
pub struct MemoryAuditStore {
    tables: RwLock<MemoryTables>,
    next_seq: AtomicU64,
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(MemoryTables {
                events: BTreeMap::new(),
                by_owner: BTreeMap::new(),
                by_action: BTreeMap::new(),
                by_outcome: BTreeMap::new(),
            }),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Pick the narrowest applicable secondary index for a filter,
    /// if any index applies
    fn candidate_keys(tables: &MemoryTables, filter: &AuditFilter) -> Option<Vec<EventKey>> {
        let mut candidates: Vec<&BTreeSet<EventKey>> = Vec::new();
        if let Some(owner) = &filter.owner_id {
            candidates.push(tables.by_owner.get(owner).unwrap_or(&EMPTY_SET));
        }
        if let Some(action) = &filter.action_type {
            candidates.push(tables.by_action.get(action.as_str()).unwrap_or(&EMPTY_SET));
        }
        if let Some(outcome) = &filter.outcome {
            candidates.push(tables.by_outcome.get(outcome.as_str()).unwrap_or(&EMPTY_SET));
        }
        let narrowest = candidates.iter().min_by_key(|s| s.len())?;
        Some(narrowest.iter().copied().collect())
    }

    /// Key range for an unindexed scan: seek straight to the filter's
    /// lower time bound, stop at its upper one, and resume strictly
    /// after the cursor. Keeps time-window queries from walking the
    /// whole map.
    fn scan_bounds(filter: &AuditFilter, after: Option<EventKey>) -> (Bound<EventKey>, Bound<EventKey>) {
        let from_key = filter.from.map(|from| EventKey {
            micros: from.timestamp_micros(),
            seq: 0,
        });
        let start = match (from_key, after) {
            (Some(from), Some(after)) if after >= from => Bound::Excluded(after),
            (Some(from), _) => Bound::Included(from),
            (None, Some(after)) => Bound::Excluded(after),
            (None, None) => Bound::Unbounded,
        };
        let end = match filter.to {
            Some(to) => Bound::Included(EventKey {
                micros: to.timestamp_micros(),
                seq: u64::MAX,
            }),
            None => Bound::Unbounded,
        };
        (start, end)
    }
}

static EMPTY_SET: std::sync::LazyLock<BTreeSet<EventKey>> = std::sync::LazyLock::new(BTreeSet::new);

impl AuditStore for MemoryAuditStore {
    fn append(&self, event: AuditEvent) -> Result<EventKey, StepkeyError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let key = EventKey::for_event(&event, seq);

        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tables
            .by_owner
            .entry(event.owner_id.clone())
            .or_default()
            .insert(key);
        tables
            .by_action
            .entry(event.action_type.as_str().to_string())
            .or_default()
            .insert(key);
        tables
            .by_outcome
            .entry(event.outcome.as_str().to_string())
            .or_default()
            .insert(key);
        tables.events.insert(key, event);
        Ok(key)
    }

    fn page(
        &self,
        filter: &AuditFilter,
        after: Option<EventKey>,
        limit: usize,
    ) -> Vec<(EventKey, AuditEvent)> {
        let tables = self
            .tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut out = Vec::with_capacity(limit.min(64));

        if let Some(keys) = Self::candidate_keys(&tables, filter) {
            for key in keys {
                if let Some(a) = after {
                    if key <= a {
                        continue;
                    }
                }
                if let Some(event) = tables.events.get(&key) {
                    if filter.matches(event) {
                        out.push((key, event.clone()));
                        if out.len() >= limit {
                            break;
                        }
                    }
                }
            }
        } else {
            for (key, event) in tables.events.range(Self::scan_bounds(filter, after)) {
                if filter.matches(event) {
                    out.push((*key, event.clone()));
                    if out.len() >= limit {
                        break;
                    }
                }
            }
        }
        out
    }

    fn cleanup(&self, cutoff: DateTime<Utc>) -> usize {
        let cutoff_micros = cutoff.timestamp_micros();
        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let stale: Vec<EventKey> = tables
            .events
            .range(
                ..EventKey {
                    micros: cutoff_micros,
                    seq: 0,
                },
            )
            .map(|(k, _)| *k)
            .collect();

        for key in &stale {
            if let Some(event) = tables.events.remove(key) {
                if let Some(set) = tables.by_owner.get_mut(&event.owner_id) {
                    set.remove(key);
                }
                if let Some(set) = tables.by_action.get_mut(event.action_type.as_str()) {
                    set.remove(key);
                }
                if let Some(set) = tables.by_outcome.get_mut(event.outcome.as_str()) {
                    set.remove(key);
                }
            }
        }
        stale.len()
    }

    fn len(&self) -> usize {
        let tables = self
            .tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tables.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionType, AuditEvent, Outcome};
    use chrono::Duration;

    fn event(owner: &str, action: ActionType, outcome: Outcome, at: DateTime<Utc>) -> AuditEvent {
        let mut e = AuditEvent::new(owner, action, outcome, None, None, serde_json::Value::Null);
        e.timestamp = at;
        e
    }

    #[test]
    fn test_append_and_order() {
        let store = MemoryAuditStore::new();
        let t0 = Utc::now();
        store
            .append(event("b", ActionType::AuthenticationSuccess, Outcome::Success, t0 + Duration::seconds(1)))
            .unwrap();
        store
            .append(event("a", ActionType::RegistrationSuccess, Outcome::Success, t0))
            .unwrap();

        let page = store.page(&AuditFilter::default(), None, 10);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].1.owner_id, "a");
        assert_eq!(page[1].1.owner_id, "b");
    }

    #[test]
    fn test_same_timestamp_keys_stay_unique() {
        let store = MemoryAuditStore::new();
        let t0 = Utc::now();
        let k1 = store
            .append(event("a", ActionType::AccessGranted, Outcome::Success, t0))
            .unwrap();
        let k2 = store
            .append(event("a", ActionType::AccessGranted, Outcome::Success, t0))
            .unwrap();
        assert_ne!(k1, k2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_indexed_page() {
        let store = MemoryAuditStore::new();
        let t0 = Utc::now();
        for i in 0..5 {
            let owner = if i % 2 == 0 { "alice" } else { "bob" };
            store
                .append(event(
                    owner,
                    ActionType::AuthenticationFailure,
                    Outcome::Failure,
                    t0 + Duration::seconds(i),
                ))
                .unwrap();
        }

        let filter = AuditFilter {
            owner_id: Some("alice".to_string()),
            ..AuditFilter::default()
        };
        let page = store.page(&filter, None, 10);
        assert_eq!(page.len(), 3);
        assert!(page.iter().all(|(_, e)| e.owner_id == "alice"));
    }

    #[test]
    fn test_page_after_cursor() {
        let store = MemoryAuditStore::new();
        let t0 = Utc::now();
        for i in 0..4 {
            store
                .append(event("a", ActionType::AccessDenied, Outcome::Failure, t0 + Duration::seconds(i)))
                .unwrap();
        }

        let first = store.page(&AuditFilter::default(), None, 2);
        assert_eq!(first.len(), 2);
        let rest = store.page(&AuditFilter::default(), Some(first[1].0), 10);
        assert_eq!(rest.len(), 2);
        assert!(rest[0].0 > first[1].0);
    }

    #[test]
    fn test_scan_bounds_seek_and_stop() {
        let t0 = Utc::now();
        let filter = AuditFilter {
            from: Some(t0),
            to: Some(t0 + Duration::seconds(10)),
            ..AuditFilter::default()
        };

        let (start, end) = MemoryAuditStore::scan_bounds(&filter, None);
        assert_eq!(
            start,
            Bound::Included(EventKey {
                micros: t0.timestamp_micros(),
                seq: 0,
            })
        );
        assert_eq!(
            end,
            Bound::Included(EventKey {
                micros: (t0 + Duration::seconds(10)).timestamp_micros(),
                seq: u64::MAX,
            })
        );
    }

    #[test]
    fn test_scan_bounds_cursor_vs_lower_bound() {
        let t0 = Utc::now();
        let filter = AuditFilter {
            from: Some(t0),
            ..AuditFilter::default()
        };
        let inside = EventKey {
            micros: (t0 + Duration::seconds(5)).timestamp_micros(),
            seq: 3,
        };
        let before = EventKey {
            micros: (t0 - Duration::seconds(5)).timestamp_micros(),
            seq: 0,
        };

        // A cursor past the lower bound resumes after the cursor
        let (start, _) = MemoryAuditStore::scan_bounds(&filter, Some(inside));
        assert_eq!(start, Bound::Excluded(inside));

        // A cursor before the lower bound still seeks to the bound
        let (start, _) = MemoryAuditStore::scan_bounds(&filter, Some(before));
        assert_eq!(
            start,
            Bound::Included(EventKey {
                micros: t0.timestamp_micros(),
                seq: 0,
            })
        );
    }

    #[test]
    fn test_time_only_page_honors_range() {
        let store = MemoryAuditStore::new();
        let t0 = Utc::now();
        for offset in [-5i64, 0, 5, 10, 15] {
            store
                .append(event(
                    "a",
                    ActionType::AccessGranted,
                    Outcome::Success,
                    t0 + Duration::seconds(offset),
                ))
                .unwrap();
        }

        let filter = AuditFilter {
            from: Some(t0),
            to: Some(t0 + Duration::seconds(10)),
            ..AuditFilter::default()
        };
        let page = store.page(&filter, None, 10);
        assert_eq!(page.len(), 3);
        assert!(page
            .iter()
            .all(|(_, e)| e.timestamp >= t0 && e.timestamp <= t0 + Duration::seconds(10)));
    }

    #[test]
    fn test_cleanup_trims_indexes() {
        let store = MemoryAuditStore::new();
        let now = Utc::now();
        store
            .append(event("old", ActionType::ElevationSet, Outcome::Success, now - Duration::days(100)))
            .unwrap();
        store
            .append(event("new", ActionType::ElevationSet, Outcome::Success, now))
            .unwrap();

        let removed = store.cleanup(now - Duration::days(90));
        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);

        let filter = AuditFilter {
            owner_id: Some("old".to_string()),
            ..AuditFilter::default()
        };
        assert!(store.page(&filter, None, 10).is_empty());
    }
}
