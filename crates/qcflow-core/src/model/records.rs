//! Row shapes returned by the core. All timestamps are epoch microseconds.

use super::codes::{ImageKind, ItemStatusCode, ReviewState, ReviewType, Station};
use serde::Serialize;
use serde_json::Value;

/// One physical roll or bundle under inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: i64,
    pub station: Station,
    pub line_id: i64,
    pub product_code: Option<String>,
    pub roll_number: Option<String>,
    pub bundle_number: Option<String>,
    pub job_order_number: Option<String>,
    pub roll_id: Option<String>,
    pub roll_width: Option<f64>,
    pub detected_at_us: i64,
    pub status_id: i64,
    pub status: ItemStatusCode,
    pub ai_note: Option<String>,
    pub acknowledged_by: Option<i64>,
    pub acknowledged_at_us: Option<i64>,
    pub scrap_requires_qc: bool,
    pub scrap_confirmed_by: Option<i64>,
    pub scrap_confirmed_at_us: Option<i64>,
    pub current_review_id: Option<i64>,
    pub created_at_us: i64,
    pub updated_at_us: i64,
    pub deleted_at_us: Option<i64>,
}

impl Item {
    /// Operator-facing identifier: roll number, else bundle number.
    #[must_use]
    pub fn number(&self) -> Option<&str> {
        self.roll_number
            .as_deref()
            .or(self.bundle_number.as_deref())
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at_us.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemDefect {
    pub defect_type_id: i64,
    pub code: Option<String>,
    pub name: String,
    pub meta: Option<Value>,
    pub created_at_us: i64,
}

/// An item together with its current defect set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemDetail {
    #[serde(flatten)]
    pub item: Item,
    pub defects: Vec<ItemDefect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChangeRequest {
    pub id: i64,
    pub item_id: i64,
    pub from_status_id: i64,
    pub from_status: ItemStatusCode,
    pub to_status_id: i64,
    pub to_status: ItemStatusCode,
    pub state: ReviewState,
    pub requested_by: i64,
    pub requested_at_us: i64,
    pub approved_by: Option<i64>,
    pub approved_at_us: Option<i64>,
    pub reason: Option<String>,
    pub meta: Option<Value>,
    /// Defect types proposed alongside the transition, ascending.
    pub defect_type_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Review {
    pub id: i64,
    pub item_id: i64,
    pub review_type: ReviewType,
    pub state: ReviewState,
    pub submitted_by: i64,
    pub submitted_at_us: i64,
    pub submit_note: Option<String>,
    pub reviewed_by: Option<i64>,
    pub reviewed_at_us: Option<i64>,
    pub review_note: Option<String>,
    pub reject_reason: Option<String>,
    pub updated_at_us: i64,
    /// Evidence linked to this review, ascending.
    pub image_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemImage {
    pub id: i64,
    pub item_id: Option<i64>,
    pub review_id: Option<i64>,
    pub kind: ImageKind,
    pub path: String,
    pub uploaded_by: Option<i64>,
    pub uploaded_at_us: i64,
    pub deleted_at_us: Option<i64>,
}

/// One audit row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemEvent {
    pub id: i64,
    pub item_id: i64,
    pub actor_id: Option<i64>,
    pub event_type: String,
    pub from_status_id: Option<i64>,
    pub from_status: Option<ItemStatusCode>,
    pub to_status_id: Option<i64>,
    pub to_status: Option<ItemStatusCode>,
    pub details: Value,
    pub created_at_us: i64,
}

/// Outcome of an acknowledgement; `changed` is false when it already existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgement {
    pub item_id: i64,
    pub acknowledged_by: i64,
    pub acknowledged_at_us: i64,
    pub changed: bool,
}
