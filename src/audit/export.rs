//! Audit trail export

use crate::audit::query::AuditQuery;
use crate::models::AuditEvent;
use chrono::Utc;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

const CSV_COLUMNS: &[&str] = &[
    "event_id",
    "timestamp",
    "owner_id",
    "action_type",
    "outcome",
    "source_ip",
    "client_info",
    "metadata",
];

/// Render the events a query yields in the requested format
///
/// CSV output carries a header row; JSON output wraps the events with
/// an export timestamp and count.
#[must_use]
pub fn export(query: AuditQuery, format: ExportFormat) -> String {
    let events: Vec<AuditEvent> = query.collect();
    match format {
        ExportFormat::Csv => export_csv(&events),
        ExportFormat::Json => export_json(&events),
    }
}

fn export_csv(events: &[AuditEvent]) -> String {
    let mut out = String::new();
    out.push_str(&CSV_COLUMNS.join(","));
    out.push('\n');

    for event in events {
        let fields = [
            event.event_id.clone(),
            event.timestamp.to_rfc3339(),
            event.owner_id.clone(),
            event.action_type.as_str().to_string(),
            event.outcome.as_str().to_string(),
            event.source_ip.clone(),
            event.client_info.clone(),
            event.metadata.to_string(),
        ];
        let row: Vec<String> = fields.iter().map(|f| csv_quote(f)).collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Quote a CSV field when it contains a delimiter, quote, or newline
fn csv_quote(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn export_json(events: &[AuditEvent]) -> String {
    let document = json!({
        "export_time": Utc::now().to_rfc3339(),
        "event_count": events.len(),
        "events": events,
    });
    serde_json::to_string_pretty(&document).unwrap_or_else(|_| "{}".to_string())
}
