//! Append-only audit trail.
//!
//! Events are written inside the same transaction as the change they record.
//! Schema triggers reject any later update or delete of an event row.

use crate::error::Result;
use rusqlite::{Connection, params};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    StatusChanged,
    FixRequestSubmitted,
    FixDecisionApproved,
    FixDecisionRejected,
    OperatorConfirmScrap,
    ScrapFromRecheck,
    ItemAcknowledged,
    ItemEdited,
    ItemDeleted,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatusChanged => "STATUS_CHANGED",
            Self::FixRequestSubmitted => "FIX_REQUEST_SUBMITTED",
            Self::FixDecisionApproved => "FIX_DECISION_APPROVED",
            Self::FixDecisionRejected => "FIX_DECISION_REJECTED",
            Self::OperatorConfirmScrap => "OPERATOR_CONFIRM_SCRAP",
            Self::ScrapFromRecheck => "SCRAP_FROM_RECHECK",
            Self::ItemAcknowledged => "ITEM_ACKNOWLEDGED",
            Self::ItemEdited => "ITEM_EDITED",
            Self::ItemDeleted => "ITEM_DELETED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An audit row about to be written.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub item_id: i64,
    /// `None` for system actions.
    pub actor_id: Option<i64>,
    pub kind: EventKind,
    pub from_status_id: Option<i64>,
    pub to_status_id: Option<i64>,
    pub details: Value,
    pub at_us: i64,
}

/// Insert one event and return its id.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn append_event(conn: &Connection, event: &NewEvent) -> Result<i64> {
    let details = if event.details.is_null() {
        None
    } else {
        Some(event.details.to_string())
    };
    conn.execute(
        "INSERT INTO item_events (
            item_id, actor_id, event_type, from_status_id, to_status_id,
            details_json, created_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.item_id,
            event.actor_id,
            event.kind.as_str(),
            event.from_status_id,
            event.to_status_id,
            details,
            event.at_us,
        ],
    )?;
    let event_id = conn.last_insert_rowid();
    tracing::debug!(
        event_id,
        item_id = event.item_id,
        kind = %event.kind,
        "appended audit event"
    );
    Ok(event_id)
}
