//! Append-only audit trail
//!
//! Every security-relevant action in the subsystem leaves an event
//! here. The trail is append-only, queryable with lazy restartable
//! iteration, exportable as CSV or JSON, and trimmed by a retention
//! policy.

mod export;
mod query;
mod store;

pub use export::{export, ExportFormat};
pub use query::{AuditFilter, AuditQuery};
pub use store::{AuditStore, EventKey, MemoryAuditStore};

use crate::errors::StepkeyError;
use crate::models::{AuditEvent, Outcome};
use crate::settings::AuditFailureMode;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;

/// The audit trail facade
///
/// Wraps a storage backend with the configured write-failure mode: in
/// strict mode a failed write is surfaced to the caller so the
/// triggering operation can abort, in lenient mode it is logged on the
/// fallback channel and swallowed.
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    failure_mode: AuditFailureMode,
    retention_days: u32,
}

impl AuditLog {
    #[must_use]
    pub fn new(
        store: Arc<dyn AuditStore>,
        failure_mode: AuditFailureMode,
        retention_days: u32,
    ) -> Self {
        Self {
            store,
            failure_mode,
            retention_days,
        }
    }

    /// Record an event, applying the configured failure mode
    ///
    /// # Errors
    ///
    /// In strict mode, returns `AuditWriteFailure` when the store
    /// rejects the event. Lenient mode never errors.
    pub fn record(&self, event: AuditEvent) -> Result<(), StepkeyError> {
        match self.store.append(event) {
            Ok(_) => Ok(()),
            Err(err) => match self.failure_mode {
                AuditFailureMode::Strict => Err(err),
                AuditFailureMode::Lenient => {
                    log::error!("Audit write failed, continuing in lenient mode: {err}");
                    Ok(())
                }
            },
        }
    }

    /// Iterate events matching `filter`, ascending by time
    #[must_use]
    pub fn query(&self, filter: AuditFilter) -> AuditQuery {
        AuditQuery::new(self.store.clone(), filter)
    }

    /// Resume a previous query just past `cursor`
    #[must_use]
    pub fn query_after(&self, filter: AuditFilter, cursor: EventKey) -> AuditQuery {
        AuditQuery::resume_after(self.store.clone(), filter, cursor)
    }

    /// Export matching events in the requested format
    #[must_use]
    pub fn export(&self, filter: AuditFilter, format: ExportFormat) -> String {
        export(self.query(filter), format)
    }

    /// Remove events older than the retention window, returning how
    /// many were removed
    pub fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(i64::from(self.retention_days));
        self.store.cleanup(cutoff)
    }

    /// Summary counts over the stored trail
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self, now: DateTime<Utc>) -> serde_json::Value {
        let mut total = 0usize;
        let mut failures = 0usize;
        let mut last_day = 0usize;
        let mut by_action: std::collections::BTreeMap<String, usize> =
            std::collections::BTreeMap::new();
        let day_ago = now - Duration::hours(24);
        for event in self.query(AuditFilter::default()) {
            total += 1;
            if event.outcome == Outcome::Failure {
                failures += 1;
            }
            if event.timestamp >= day_ago {
                last_day += 1;
            }
            *by_action
                .entry(event.action_type.as_str().to_string())
                .or_default() += 1;
        }
        let success_rate = if total == 0 {
            1.0
        } else {
            (total - failures) as f64 / total as f64
        };
        json!({
            "total_events": total,
            "failure_events": failures,
            "success_rate": success_rate,
            "events_last_24h": last_day,
            "by_action": by_action,
        })
    }
}
