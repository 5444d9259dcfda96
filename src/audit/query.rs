//! Audit trail querying

use crate::audit::store::{AuditStore, EventKey};
use crate::models::{ActionType, AuditEvent, Outcome};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const PAGE_SIZE: usize = 256;

/// Criteria an event must meet to be returned
///
/// All populated fields must match; an empty filter matches everything.
/// Time bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub owner_id: Option<String>,
    pub action_type: Option<ActionType>,
    pub outcome: Option<Outcome>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    #[must_use]
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(owner) = &self.owner_id {
            if &event.owner_id != owner {
                return false;
            }
        }
        if let Some(action) = &self.action_type {
            if &event.action_type != action {
                return false;
            }
        }
        if let Some(outcome) = &self.outcome {
            if &event.outcome != outcome {
                return false;
            }
        }
        if let Some(from) = self.from {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if event.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// Lazy, restartable iterator over matching audit events
///
/// Events are pulled from the store one page at a time, in ascending
/// key order. `cursor()` exposes the key of the last event yielded so
/// a caller can resume a long scan later with `resume_after`.
pub struct AuditQuery {
    store: Arc<dyn AuditStore>,
    filter: AuditFilter,
    buffer: std::vec::IntoIter<(EventKey, AuditEvent)>,
    cursor: Option<EventKey>,
    exhausted: bool,
}

impl AuditQuery {
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>, filter: AuditFilter) -> Self {
        Self {
            store,
            filter,
            buffer: Vec::new().into_iter(),
            cursor: None,
            exhausted: false,
        }
    }

    /// Start a query just past a previously observed cursor
    #[must_use]
    pub fn resume_after(store: Arc<dyn AuditStore>, filter: AuditFilter, cursor: EventKey) -> Self {
        Self {
            store,
            filter,
            buffer: Vec::new().into_iter(),
            cursor: Some(cursor),
            exhausted: false,
        }
    }

    /// Key of the most recently yielded event
    #[must_use]
    pub fn cursor(&self) -> Option<EventKey> {
        self.cursor
    }
}

impl Iterator for AuditQuery {
    type Item = AuditEvent;

    fn next(&mut self) -> Option<AuditEvent> {
        loop {
            if let Some((key, event)) = self.buffer.next() {
                self.cursor = Some(key);
                return Some(event);
            }
            if self.exhausted {
                return None;
            }
            let page = self.store.page(&self.filter, self.cursor, PAGE_SIZE);
            if page.len() < PAGE_SIZE {
                self.exhausted = true;
            }
            if page.is_empty() {
                return None;
            }
            self.buffer = page.into_iter();
        }
    }
}
