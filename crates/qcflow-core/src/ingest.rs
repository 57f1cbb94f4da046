//! Ingestion stand-ins for the detection and evidence-store collaborators.
//!
//! Detection creates items and the evidence store records image ids. Both
//! are system actions: neither writes an audit event, and neither is gated
//! by role.

use crate::catalog::{self, Catalog};
use crate::error::{ErrorCode, QcError, Result};
use crate::guard;
use crate::model::{ImageKind, ItemStatusCode, Station};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;
use serde_json::{Value, json};

/// A detected roll or bundle.
#[derive(Debug, Clone, Deserialize)]
pub struct NewItem {
    pub station: Station,
    pub line_id: i64,
    pub product_code: Option<String>,
    pub roll_number: Option<String>,
    pub bundle_number: Option<String>,
    pub job_order_number: Option<String>,
    pub roll_id: Option<String>,
    pub roll_width: Option<f64>,
    /// Defaults to the ingest time.
    pub detected_at_us: Option<i64>,
    /// Defaults to `NORMAL`.
    pub status: Option<ItemStatusCode>,
    #[serde(default)]
    pub defect_type_ids: Vec<i64>,
    pub defect_meta: Option<Value>,
    pub ai_note: Option<String>,
}

impl NewItem {
    #[must_use]
    pub const fn new(station: Station, line_id: i64) -> Self {
        Self {
            station,
            line_id,
            product_code: None,
            roll_number: None,
            bundle_number: None,
            job_order_number: None,
            roll_id: None,
            roll_width: None,
            detected_at_us: None,
            status: None,
            defect_type_ids: Vec::new(),
            defect_meta: None,
            ai_note: None,
        }
    }

    #[must_use]
    pub const fn with_status(mut self, status: ItemStatusCode) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_defects(mut self, defect_type_ids: impl Into<Vec<i64>>) -> Self {
        self.defect_type_ids = defect_type_ids.into();
        self
    }

    #[must_use]
    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        match self.station {
            Station::Roll => self.roll_number = Some(number.into()),
            Station::Bundle => self.bundle_number = Some(number.into()),
        }
        self
    }

    #[must_use]
    pub fn with_product(mut self, product_code: impl Into<String>) -> Self {
        self.product_code = Some(product_code.into());
        self
    }
}

/// An evidence image reported by the evidence store.
#[derive(Debug, Clone, Deserialize)]
pub struct NewImage {
    /// `None` for an upload not yet attached to an item.
    pub item_id: Option<i64>,
    pub kind: ImageKind,
    pub path: String,
    pub uploaded_by: Option<i64>,
}

/// Insert a detected item and its initial defect set.
///
/// # Errors
///
/// ValidationFailed for an unknown status, a DEFECT item without defect
/// types, or unknown defect type ids.
pub fn ingest_item(conn: &Connection, catalog: &Catalog, item: &NewItem, at_us: i64) -> Result<i64> {
    let status = item.status.unwrap_or(ItemStatusCode::Normal);
    let status_id = catalog.status_id(status)?;

    let defect_type_ids = if status.requires_defects() {
        if item.defect_type_ids.is_empty() {
            return Err(QcError::validation(
                ErrorCode::MissingDefectTypes,
                format!("an item detected as {status} needs at least one defect type"),
            ));
        }
        catalog::validate_defect_types(conn, &item.defect_type_ids)?
    } else {
        Vec::new()
    };

    conn.execute(
        "INSERT INTO items (
            station, line_id, product_code, roll_number, bundle_number,
            job_order_number, roll_id, roll_width, detected_at_us, status_id,
            ai_note, created_at_us, updated_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            item.station,
            item.line_id,
            item.product_code,
            item.roll_number,
            item.bundle_number,
            item.job_order_number,
            item.roll_id,
            item.roll_width,
            item.detected_at_us.unwrap_or(at_us),
            status_id,
            item.ai_note,
            at_us,
        ],
    )?;
    let item_id = conn.last_insert_rowid();

    let meta_json = item.defect_meta.as_ref().map(Value::to_string);
    let mut stmt = conn.prepare(
        "INSERT INTO item_defects (item_id, defect_type_id, meta_json, created_at_us)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for defect_type_id in &defect_type_ids {
        stmt.execute(params![item_id, defect_type_id, meta_json, at_us])?;
    }

    tracing::info!(
        item_id,
        station = %item.station,
        line_id = item.line_id,
        status = %status,
        defects = defect_type_ids.len(),
        "ingested item"
    );
    Ok(item_id)
}

/// Record an evidence image id.
///
/// # Errors
///
/// NotFound if `item_id` names no live item, ValidationFailed for an empty
/// path.
pub fn register_image(conn: &Connection, image: &NewImage, at_us: i64) -> Result<i64> {
    let path = image.path.trim();
    if path.is_empty() {
        return Err(
            QcError::validation(ErrorCode::InvalidInput, "image path must not be empty")
                .with_details(json!({ "field": "path" })),
        );
    }
    if let Some(item_id) = image.item_id {
        guard::lock_item(conn, item_id)?;
    }

    conn.execute(
        "INSERT INTO item_images (item_id, kind, path, uploaded_by, uploaded_at_us)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![image.item_id, image.kind, path, image.uploaded_by, at_us],
    )?;
    let image_id = conn.last_insert_rowid();
    tracing::debug!(image_id, item_id = ?image.item_id, kind = %image.kind, "registered image");
    Ok(image_id)
}

/// Look up a live item id by its roll or bundle number, newest first.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn find_by_number(conn: &Connection, number: &str) -> Result<Option<i64>> {
    let found = conn
        .query_row(
            "SELECT item_id FROM items
             WHERE deleted_at_us IS NULL AND (roll_number = ?1 OR bundle_number = ?1)
             ORDER BY detected_at_us DESC, item_id DESC
             LIMIT 1",
            params![number],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found)
}
