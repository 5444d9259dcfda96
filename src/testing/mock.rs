//! Mock components for failure-path tests

use crate::audit::{AuditFilter, AuditStore, EventKey, MemoryAuditStore};
use crate::directory::UserDirectory;
use crate::errors::StepkeyError;
use crate::models::AuditEvent;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

/// Directory with fixed answers for every account
pub struct MockDirectory {
    pub has_fallback: bool,
    pub roles: Vec<String>,
}

impl MockDirectory {
    #[must_use]
    pub fn new(has_fallback: bool, roles: Vec<String>) -> Self {
        Self { has_fallback, roles }
    }
}

impl UserDirectory for MockDirectory {
    fn has_fallback_method(&self, _owner_id: &str) -> bool {
        self.has_fallback
    }

    fn roles(&self, _owner_id: &str) -> Vec<String> {
        self.roles.clone()
    }
}

/// Audit store whose writes can be failed on demand
///
/// Delegates to an in-memory store until `fail_writes(true)` is
/// called, then rejects every append.
#[derive(Default)]
pub struct FailingAuditStore {
    inner: MemoryAuditStore,
    failing: AtomicBool,
}

impl FailingAuditStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }
}

impl AuditStore for FailingAuditStore {
    fn append(&self, event: AuditEvent) -> Result<EventKey, StepkeyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StepkeyError::AuditWriteFailure(
                "simulated storage failure".into(),
            ));
        }
        self.inner.append(event)
    }

    fn page(
        &self,
        filter: &AuditFilter,
        after: Option<EventKey>,
        limit: usize,
    ) -> Vec<(EventKey, AuditEvent)> {
        self.inner.page(filter, after, limit)
    }

    fn cleanup(&self, cutoff: DateTime<Utc>) -> usize {
        self.inner.cleanup(cutoff)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
