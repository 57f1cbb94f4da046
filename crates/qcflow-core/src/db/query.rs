//! `SQLite` read helpers for the qcflow database.
//!
//! Typed row decoders plus the listing queries behind the request and review
//! inboxes. Every function takes a shared `&Connection`; callers inside a
//! unit of work pass the open transaction (it derefs to a connection), so the
//! same readers serve both the locked write path and plain reads.

use crate::error::Result;
use crate::model::{
    ImageKind, Item, ItemDefect, ItemEvent, ItemImage, ItemStatusCode, Review, ReviewState,
    Station, StatusChangeRequest,
};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Row decoders
// ---------------------------------------------------------------------------

const ITEM_SELECT: &str = "SELECT i.item_id, i.station, i.line_id, i.product_code, \
     i.roll_number, i.bundle_number, i.job_order_number, i.roll_id, i.roll_width, \
     i.detected_at_us, i.status_id, s.code, i.ai_note, i.acknowledged_by, \
     i.acknowledged_at_us, i.scrap_requires_qc, i.scrap_confirmed_by, \
     i.scrap_confirmed_at_us, i.current_review_id, i.created_at_us, i.updated_at_us, \
     i.deleted_at_us \
     FROM items i \
     INNER JOIN item_statuses s ON s.status_id = i.status_id";

const REQUEST_SELECT: &str = "SELECT r.request_id, r.item_id, r.from_status_id, fs.code, \
     r.to_status_id, ts.code, r.state, r.requested_by, r.requested_at_us, r.approved_by, \
     r.approved_at_us, r.reason, r.meta_json \
     FROM status_change_requests r \
     INNER JOIN item_statuses fs ON fs.status_id = r.from_status_id \
     INNER JOIN item_statuses ts ON ts.status_id = r.to_status_id";

const REVIEW_SELECT: &str = "SELECT review_id, item_id, review_type, state, submitted_by, \
     submitted_at_us, submit_note, reviewed_by, reviewed_at_us, review_note, reject_reason, \
     updated_at_us \
     FROM reviews";

const IMAGE_SELECT: &str = "SELECT image_id, item_id, review_id, kind, path, uploaded_by, \
     uploaded_at_us, deleted_at_us \
     FROM item_images";

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        station: row.get(1)?,
        line_id: row.get(2)?,
        product_code: row.get(3)?,
        roll_number: row.get(4)?,
        bundle_number: row.get(5)?,
        job_order_number: row.get(6)?,
        roll_id: row.get(7)?,
        roll_width: row.get(8)?,
        detected_at_us: row.get(9)?,
        status_id: row.get(10)?,
        status: row.get(11)?,
        ai_note: row.get(12)?,
        acknowledged_by: row.get(13)?,
        acknowledged_at_us: row.get(14)?,
        scrap_requires_qc: row.get(15)?,
        scrap_confirmed_by: row.get(16)?,
        scrap_confirmed_at_us: row.get(17)?,
        current_review_id: row.get(18)?,
        created_at_us: row.get(19)?,
        updated_at_us: row.get(20)?,
        deleted_at_us: row.get(21)?,
    })
}

fn row_to_request(row: &Row<'_>) -> rusqlite::Result<StatusChangeRequest> {
    Ok(StatusChangeRequest {
        id: row.get(0)?,
        item_id: row.get(1)?,
        from_status_id: row.get(2)?,
        from_status: row.get(3)?,
        to_status_id: row.get(4)?,
        to_status: row.get(5)?,
        state: row.get(6)?,
        requested_by: row.get(7)?,
        requested_at_us: row.get(8)?,
        approved_by: row.get(9)?,
        approved_at_us: row.get(10)?,
        reason: row.get(11)?,
        meta: json_column(row, 12)?,
        defect_type_ids: Vec::new(),
    })
}

fn row_to_review(row: &Row<'_>) -> rusqlite::Result<Review> {
    Ok(Review {
        id: row.get(0)?,
        item_id: row.get(1)?,
        review_type: row.get(2)?,
        state: row.get(3)?,
        submitted_by: row.get(4)?,
        submitted_at_us: row.get(5)?,
        submit_note: row.get(6)?,
        reviewed_by: row.get(7)?,
        reviewed_at_us: row.get(8)?,
        review_note: row.get(9)?,
        reject_reason: row.get(10)?,
        updated_at_us: row.get(11)?,
        image_ids: Vec::new(),
    })
}

fn row_to_image(row: &Row<'_>) -> rusqlite::Result<ItemImage> {
    Ok(ItemImage {
        id: row.get(0)?,
        item_id: row.get(1)?,
        review_id: row.get(2)?,
        kind: row.get(3)?,
        path: row.get(4)?,
        uploaded_by: row.get(5)?,
        uploaded_at_us: row.get(6)?,
        deleted_at_us: row.get(7)?,
    })
}

/// Decode a nullable JSON text column.
fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|text| {
        serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Single-record readers
// ---------------------------------------------------------------------------

/// Fetch one item. Soft-deleted rows are returned only when asked for.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn fetch_item(conn: &Connection, item_id: i64, include_deleted: bool) -> Result<Option<Item>> {
    let sql = if include_deleted {
        format!("{ITEM_SELECT} WHERE i.item_id = ?1")
    } else {
        format!("{ITEM_SELECT} WHERE i.item_id = ?1 AND i.deleted_at_us IS NULL")
    };
    let item = conn
        .query_row(&sql, params![item_id], row_to_item)
        .optional()?;
    Ok(item)
}

/// Current defect set of an item, in catalog display order.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn item_defects(conn: &Connection, item_id: i64) -> Result<Vec<ItemDefect>> {
    let mut stmt = conn.prepare(
        "SELECT d.defect_type_id, t.code, t.name, d.meta_json, d.created_at_us \
         FROM item_defects d \
         INNER JOIN defect_types t ON t.defect_type_id = d.defect_type_id \
         WHERE d.item_id = ?1 \
         ORDER BY t.display_order, d.defect_type_id",
    )?;
    let rows = stmt.query_map(params![item_id], |row| {
        Ok(ItemDefect {
            defect_type_id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            meta: json_column(row, 3)?,
            created_at_us: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Fetch a live (not soft-deleted) status-change request with its defect ids.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn fetch_request(conn: &Connection, request_id: i64) -> Result<Option<StatusChangeRequest>> {
    let sql = format!("{REQUEST_SELECT} WHERE r.request_id = ?1 AND r.deleted_at_us IS NULL");
    let Some(mut request) = conn
        .query_row(&sql, params![request_id], row_to_request)
        .optional()?
    else {
        return Ok(None);
    };
    request.defect_type_ids = request_defect_ids(conn, request_id)?;
    Ok(Some(request))
}

/// Defect types proposed by a request, ascending.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn request_defect_ids(conn: &Connection, request_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT defect_type_id FROM status_change_request_defects \
         WHERE request_id = ?1 ORDER BY defect_type_id",
    )?;
    let ids = stmt
        .query_map(params![request_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

/// Id of the live PENDING request for an item, if any.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn pending_request_id(conn: &Connection, item_id: i64) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT request_id FROM status_change_requests \
             WHERE item_id = ?1 AND state = 'PENDING' AND deleted_at_us IS NULL \
             LIMIT 1",
            params![item_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Id of the live PENDING review for an item, if any.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn pending_review_id(conn: &Connection, item_id: i64) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT review_id FROM reviews \
             WHERE item_id = ?1 AND state = 'PENDING' AND deleted_at_us IS NULL \
             LIMIT 1",
            params![item_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Fetch a live review with the ids of its linked images.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn fetch_review(conn: &Connection, review_id: i64) -> Result<Option<Review>> {
    let sql = format!("{REVIEW_SELECT} WHERE review_id = ?1 AND deleted_at_us IS NULL");
    let Some(mut review) = conn
        .query_row(&sql, params![review_id], row_to_review)
        .optional()?
    else {
        return Ok(None);
    };
    review.image_ids = review_image_ids(conn, review_id)?;
    Ok(Some(review))
}

fn review_image_ids(conn: &Connection, review_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT image_id FROM item_images WHERE review_id = ?1 ORDER BY image_id")?;
    let ids = stmt
        .query_map(params![review_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

/// Audit trail of an item, newest first. Soft-deleted events are excluded.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn item_events(conn: &Connection, item_id: i64) -> Result<Vec<ItemEvent>> {
    let mut stmt = conn.prepare(
        "SELECT e.event_id, e.item_id, e.actor_id, e.event_type, \
         e.from_status_id, fs.code, e.to_status_id, ts.code, e.details_json, e.created_at_us \
         FROM item_events e \
         LEFT JOIN item_statuses fs ON fs.status_id = e.from_status_id \
         LEFT JOIN item_statuses ts ON ts.status_id = e.to_status_id \
         WHERE e.item_id = ?1 AND e.deleted_at_us IS NULL \
         ORDER BY e.created_at_us DESC, e.event_id DESC",
    )?;
    let rows = stmt.query_map(params![item_id], |row| {
        Ok(ItemEvent {
            id: row.get(0)?,
            item_id: row.get(1)?,
            actor_id: row.get(2)?,
            event_type: row.get(3)?,
            from_status_id: row.get(4)?,
            from_status: row.get(5)?,
            to_status_id: row.get(6)?,
            to_status: row.get(7)?,
            details: json_column(row, 8)?.unwrap_or(Value::Null),
            created_at_us: row.get(9)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Live images of an item, optionally restricted to some kinds.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn item_images(conn: &Connection, item_id: i64, kinds: &[ImageKind]) -> Result<Vec<ItemImage>> {
    let mut param_values: Vec<Box<dyn ToSql>> = vec![Box::new(item_id)];
    let mut sql = format!("{IMAGE_SELECT} WHERE item_id = ?1 AND deleted_at_us IS NULL");
    if !kinds.is_empty() {
        let placeholders = push_placeholders(&mut param_values, kinds.iter().copied());
        sql.push_str(&format!(" AND kind IN ({placeholders})"));
    }
    sql.push_str(" ORDER BY uploaded_at_us, image_id");

    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(AsRef::as_ref).collect();
    let rows = stmt.query_map(params_from_iter(params_ref), row_to_image)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Images with the given ids, including soft-deleted ones.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub fn images_by_ids(conn: &Connection, image_ids: &[i64]) -> Result<Vec<ItemImage>> {
    if image_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();
    let placeholders = push_placeholders(&mut param_values, image_ids.iter().copied());
    let sql = format!("{IMAGE_SELECT} WHERE image_id IN ({placeholders}) ORDER BY image_id");

    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(AsRef::as_ref).collect();
    let rows = stmt.query_map(params_from_iter(params_ref), row_to_image)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Append `?N` placeholders for `values`, returning the comma-joined list.
pub(crate) fn push_placeholders<T, I>(param_values: &mut Vec<Box<dyn ToSql>>, values: I) -> String
where
    T: ToSql + 'static,
    I: IntoIterator<Item = T>,
{
    let mut placeholders = Vec::new();
    for value in values {
        param_values.push(Box::new(value));
        placeholders.push(format!("?{}", param_values.len()));
    }
    placeholders.join(", ")
}

// ---------------------------------------------------------------------------
// Sorting and paging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    const fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => anyhow::bail!("unknown sort direction '{other}': expected asc or desc"),
        }
    }
}

/// Page request. `page` is 1-based; `page_size` is clamped to `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

impl PageRequest {
    pub const MAX_PAGE_SIZE: u32 = 100;

    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    fn limit_clause(self) -> String {
        let offset = u64::from(self.page - 1) * u64::from(self.page_size);
        format!(" LIMIT {} OFFSET {offset}", self.page_size)
    }

    fn pagination(self, total: u64) -> Pagination {
        Pagination {
            page: self.page,
            page_size: self.page_size,
            total,
            total_pages: total.div_ceil(u64::from(self.page_size)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

// ---------------------------------------------------------------------------
// Request listing
// ---------------------------------------------------------------------------

/// Sort keys for the request inbox. Missing values always sort last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestSort {
    Line,
    Station,
    ProductCode,
    Number,
    JobOrder,
    StatusBefore,
    StatusAfter,
    #[default]
    RequestedAt,
}

impl RequestSort {
    fn order_by(self, dir: SortDirection) -> String {
        let d = dir.sql();
        let key = match self {
            Self::Line => format!("i.line_id {d} NULLS LAST"),
            Self::Station => format!("i.station {d} NULLS LAST"),
            Self::ProductCode => format!("i.product_code {d} NULLS LAST"),
            Self::Number => format!("COALESCE(i.roll_number, i.bundle_number) {d} NULLS LAST"),
            Self::JobOrder => format!("i.job_order_number {d} NULLS LAST"),
            Self::StatusBefore => format!("fs.display_order {d}, fs.code {d}"),
            Self::StatusAfter => format!("ts.display_order {d}, ts.code {d}"),
            Self::RequestedAt => format!("r.requested_at_us {d}"),
        };
        format!("ORDER BY {key}, r.requested_at_us DESC, r.request_id DESC")
    }
}

impl fmt::Display for RequestSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Line => "line",
            Self::Station => "station",
            Self::ProductCode => "product_code",
            Self::Number => "number",
            Self::JobOrder => "job_order",
            Self::StatusBefore => "status_before",
            Self::StatusAfter => "status_after",
            Self::RequestedAt => "requested_at",
        })
    }
}

impl FromStr for RequestSort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "line" | "production_line" => Ok(Self::Line),
            "station" => Ok(Self::Station),
            "product_code" | "product" => Ok(Self::ProductCode),
            "number" => Ok(Self::Number),
            "job_order" | "job_order_number" => Ok(Self::JobOrder),
            "status_before" => Ok(Self::StatusBefore),
            "status_after" => Ok(Self::StatusAfter),
            "requested_at" => Ok(Self::RequestedAt),
            other => anyhow::bail!(
                "unknown request sort '{other}': expected one of line, station, product_code, number, job_order, status_before, status_after, requested_at"
            ),
        }
    }
}

/// Filter for the request inbox. `state` defaults to PENDING.
#[derive(Debug, Clone)]
pub struct RequestFilter {
    pub state: ReviewState,
    pub line_id: Option<i64>,
    pub station: Option<Station>,
    pub sort: RequestSort,
    pub direction: SortDirection,
    pub page: PageRequest,
}

impl Default for RequestFilter {
    fn default() -> Self {
        Self {
            state: ReviewState::Pending,
            line_id: None,
            station: None,
            sort: RequestSort::default(),
            direction: SortDirection::default(),
            page: PageRequest::default(),
        }
    }
}

/// A request together with the item attributes it is sorted by.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestRow {
    #[serde(flatten)]
    pub request: StatusChangeRequest,
    pub line_id: i64,
    pub station: Station,
    pub product_code: Option<String>,
    pub number: Option<String>,
    pub job_order_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StationSummary {
    pub roll: u64,
    pub bundle: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestPage {
    pub data: Vec<RequestRow>,
    pub summary: StationSummary,
    pub pagination: Pagination,
}

/// List status-change requests with filter, sort, and page.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn list_requests(conn: &Connection, filter: &RequestFilter) -> Result<RequestPage> {
    let page = filter.page.clamped();

    let mut conditions = vec![
        "r.deleted_at_us IS NULL".to_string(),
        "i.deleted_at_us IS NULL".to_string(),
    ];
    let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

    param_values.push(Box::new(filter.state));
    conditions.push(format!("r.state = ?{}", param_values.len()));

    if let Some(line_id) = filter.line_id {
        param_values.push(Box::new(line_id));
        conditions.push(format!("i.line_id = ?{}", param_values.len()));
    }

    if let Some(station) = filter.station {
        param_values.push(Box::new(station));
        conditions.push(format!("i.station = ?{}", param_values.len()));
    }

    let from_clause = "FROM status_change_requests r \
         INNER JOIN items i ON i.item_id = r.item_id \
         INNER JOIN item_statuses fs ON fs.status_id = r.from_status_id \
         INNER JOIN item_statuses ts ON ts.status_id = r.to_status_id";
    let where_clause = format!(" WHERE {}", conditions.join(" AND "));
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(AsRef::as_ref).collect();

    let mut by_station: HashMap<Station, u64> = HashMap::new();
    {
        let sql = format!("SELECT i.station, COUNT(*) {from_clause}{where_clause} GROUP BY i.station");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params_ref.iter()), |row| {
            Ok((row.get::<_, Station>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (station, count) = row?;
            by_station.insert(station, u64::try_from(count).unwrap_or_default());
        }
    }
    let roll = by_station.get(&Station::Roll).copied().unwrap_or_default();
    let bundle = by_station.get(&Station::Bundle).copied().unwrap_or_default();
    let total = roll + bundle;

    let sql = format!(
        "SELECT r.request_id, r.item_id, r.from_status_id, fs.code, r.to_status_id, ts.code, \
         r.state, r.requested_by, r.requested_at_us, r.approved_by, r.approved_at_us, \
         r.reason, r.meta_json, i.line_id, i.station, i.product_code, \
         COALESCE(i.roll_number, i.bundle_number), i.job_order_number \
         {from_clause}{where_clause} {}{}",
        filter.sort.order_by(filter.direction),
        page.limit_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params_ref.iter()), |row| {
        Ok(RequestRow {
            request: row_to_request(row)?,
            line_id: row.get(13)?,
            station: row.get(14)?,
            product_code: row.get(15)?,
            number: row.get(16)?,
            job_order_number: row.get(17)?,
        })
    })?;

    let mut data = Vec::new();
    for row in rows {
        let mut row = row?;
        row.request.defect_type_ids = request_defect_ids(conn, row.request.id)?;
        data.push(row);
    }

    Ok(RequestPage {
        data,
        summary: StationSummary {
            roll,
            bundle,
            total,
        },
        pagination: page.pagination(total),
    })
}

// ---------------------------------------------------------------------------
// Review listing
// ---------------------------------------------------------------------------

/// Sort keys for the review inbox. Missing values always sort last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewSort {
    Line,
    Station,
    ProductCode,
    Number,
    JobOrder,
    State,
    Decision,
    ReviewedBy,
    ReviewedAt,
    /// Tiebreak order only.
    #[default]
    Recent,
}

impl ReviewSort {
    fn order_by(self, dir: SortDirection) -> String {
        let d = dir.sql();
        let column = match self {
            Self::Line => Some("line_id"),
            Self::Station => Some("station"),
            Self::ProductCode => Some("product_code"),
            Self::Number => Some("number"),
            Self::JobOrder => Some("job_order_number"),
            Self::State => Some("state"),
            Self::Decision => Some("decision"),
            Self::ReviewedBy => Some("reviewed_by"),
            Self::ReviewedAt => Some("reviewed_at_us"),
            Self::Recent => None,
        };
        let tiebreak = "updated_at_us DESC, detected_at_us DESC, item_id DESC";
        column.map_or_else(
            || format!("ORDER BY {tiebreak}"),
            |column| format!("ORDER BY {column} {d} NULLS LAST, {tiebreak}"),
        )
    }
}

impl FromStr for ReviewSort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "line" | "production_line" => Ok(Self::Line),
            "station" => Ok(Self::Station),
            "product_code" | "product" => Ok(Self::ProductCode),
            "number" => Ok(Self::Number),
            "job_order" | "job_order_number" => Ok(Self::JobOrder),
            "state" => Ok(Self::State),
            "decision" => Ok(Self::Decision),
            "reviewed_by" => Ok(Self::ReviewedBy),
            "reviewed_at" => Ok(Self::ReviewedAt),
            "recent" | "updated_at" => Ok(Self::Recent),
            other => anyhow::bail!(
                "unknown review sort '{other}': expected one of line, station, product_code, number, job_order, state, decision, reviewed_by, reviewed_at, recent"
            ),
        }
    }
}

/// Filter for the review inbox. Time bounds are inclusive epoch microseconds.
#[derive(Debug, Clone, Default)]
pub struct ReviewFilter {
    pub line_id: Option<i64>,
    pub states: Vec<ReviewState>,
    pub defect_type_id: Option<i64>,
    pub reviewed_from_us: Option<i64>,
    pub reviewed_to_us: Option<i64>,
    pub submitted_from_us: Option<i64>,
    pub submitted_to_us: Option<i64>,
    pub sort: ReviewSort,
    pub direction: SortDirection,
    pub page: PageRequest,
}

/// The latest review of an item, with the item and its defects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRow {
    pub review: Review,
    pub item: Item,
    pub status: ItemStatusCode,
    pub defects: Vec<ItemDefect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReviewSummary {
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewPage {
    pub data: Vec<ReviewRow>,
    pub summary: ReviewSummary,
    pub pagination: Pagination,
}

/// List the latest review per item with filter, sort, and page.
///
/// Filters apply before "latest per item" is chosen.
///
/// # Errors
///
/// Returns an error if a query fails.
pub fn list_reviews(conn: &Connection, filter: &ReviewFilter) -> Result<ReviewPage> {
    let page = filter.page.clamped();

    let mut conditions = vec![
        "rv.deleted_at_us IS NULL".to_string(),
        "i.deleted_at_us IS NULL".to_string(),
    ];
    let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(line_id) = filter.line_id {
        param_values.push(Box::new(line_id));
        conditions.push(format!("i.line_id = ?{}", param_values.len()));
    }
    if !filter.states.is_empty() {
        let placeholders = push_placeholders(&mut param_values, filter.states.iter().copied());
        conditions.push(format!("rv.state IN ({placeholders})"));
    }
    if let Some(defect_type_id) = filter.defect_type_id {
        param_values.push(Box::new(defect_type_id));
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM item_defects d WHERE d.item_id = i.item_id AND d.defect_type_id = ?{})",
            param_values.len()
        ));
    }
    let bounds = [
        ("rv.reviewed_at_us >=", filter.reviewed_from_us),
        ("rv.reviewed_at_us <=", filter.reviewed_to_us),
        ("rv.submitted_at_us >=", filter.submitted_from_us),
        ("rv.submitted_at_us <=", filter.submitted_to_us),
    ];
    for (predicate, bound) in bounds {
        if let Some(value) = bound {
            param_values.push(Box::new(value));
            conditions.push(format!("{predicate} ?{}", param_values.len()));
        }
    }

    let latest = format!(
        "WITH latest AS ( \
           SELECT rv.review_id, rv.item_id, rv.state, rv.reviewed_by, rv.reviewed_at_us, \
             rv.updated_at_us, COALESCE(rv.review_note, rv.reject_reason) AS decision, \
             i.line_id, i.station, i.product_code, \
             COALESCE(i.roll_number, i.bundle_number) AS number, \
             i.job_order_number, i.detected_at_us, \
             ROW_NUMBER() OVER ( \
               PARTITION BY rv.item_id ORDER BY rv.updated_at_us DESC, rv.review_id DESC \
             ) AS rn \
           FROM reviews rv \
           INNER JOIN items i ON i.item_id = rv.item_id \
           WHERE {} \
         )",
        conditions.join(" AND ")
    );
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(AsRef::as_ref).collect();

    let mut summary = ReviewSummary::default();
    {
        let sql = format!("{latest} SELECT state, COUNT(*) FROM latest WHERE rn = 1 GROUP BY state");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params_ref.iter()), |row| {
            Ok((row.get::<_, ReviewState>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (state, count) = row?;
            let count = u64::try_from(count).unwrap_or_default();
            match state {
                ReviewState::Pending => summary.pending += count,
                ReviewState::Approved => summary.approved += count,
                ReviewState::Rejected => summary.rejected += count,
            }
            summary.total += count;
        }
    }

    let sql = format!(
        "{latest} SELECT review_id FROM latest WHERE rn = 1 {}{}",
        filter.sort.order_by(filter.direction),
        page.limit_clause()
    );
    let mut stmt = conn.prepare(&sql)?;
    let review_ids = stmt
        .query_map(params_from_iter(params_ref.iter()), |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut data = Vec::with_capacity(review_ids.len());
    for review_id in review_ids {
        let Some(review) = fetch_review(conn, review_id)? else {
            continue;
        };
        let Some(item) = fetch_item(conn, review.item_id, false)? else {
            continue;
        };
        let defects = item_defects(conn, item.id)?;
        data.push(ReviewRow {
            status: item.status,
            review,
            item,
            defects,
        });
    }

    Ok(ReviewPage {
        data,
        pagination: page.pagination(summary.total),
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn status_id(conn: &Connection, code: &str) -> i64 {
        conn.query_row(
            "SELECT status_id FROM item_statuses WHERE code = ?1",
            [code],
            |row| row.get(0),
        )
        .expect("seeded status")
    }

    fn insert_item(conn: &Connection, station: &str, line: i64, roll: Option<&str>, at: i64) -> i64 {
        let normal = status_id(conn, "NORMAL");
        conn.execute(
            "INSERT INTO items (station, line_id, product_code, roll_number, bundle_number,
                detected_at_us, status_id, created_at_us, updated_at_us)
             VALUES (?1, ?2, 'P-1', ?3, 'B-9', ?4, ?5, ?4, ?4)",
            params![station, line, roll, at, normal],
        )
        .expect("insert item");
        conn.last_insert_rowid()
    }

    fn insert_request(conn: &Connection, item_id: i64, to: &str, at: i64) -> i64 {
        conn.execute(
            "INSERT INTO status_change_requests
                (item_id, from_status_id, to_status_id, requested_by, requested_at_us)
             VALUES (?1, ?2, ?3, 5, ?4)",
            params![item_id, status_id(conn, "NORMAL"), status_id(conn, to), at],
        )
        .expect("insert request");
        conn.last_insert_rowid()
    }

    fn insert_review(conn: &Connection, item_id: i64, state: &str, at: i64) -> i64 {
        conn.execute(
            "INSERT INTO reviews (item_id, review_type, state, submitted_by, submitted_at_us,
                updated_at_us)
             VALUES (?1, 'DEFECT_FIX', ?2, 5, ?3, ?3)",
            params![item_id, state, at],
        )
        .expect("insert review");
        conn.last_insert_rowid()
    }

    #[test]
    fn fetch_item_hides_soft_deleted_rows() -> Result<()> {
        let conn = open_in_memory()?;
        let id = insert_item(&conn, "ROLL", 1, Some("R1"), 10);
        conn.execute("UPDATE items SET deleted_at_us = 99 WHERE item_id = ?1", [id])?;

        assert!(fetch_item(&conn, id, false)?.is_none());
        let item = fetch_item(&conn, id, true)?.expect("deleted row visible on request");
        assert!(item.is_deleted());
        assert_eq!(item.status, ItemStatusCode::Normal);
        assert_eq!(item.number(), Some("R1"));
        Ok(())
    }

    #[test]
    fn events_are_newest_first_with_id_tiebreak() -> Result<()> {
        let conn = open_in_memory()?;
        let id = insert_item(&conn, "ROLL", 1, None, 10);
        for (event_type, at) in [("A", 100), ("B", 200), ("C", 200)] {
            conn.execute(
                "INSERT INTO item_events (item_id, event_type, created_at_us, details_json)
                 VALUES (?1, ?2, ?3, '{}')",
                params![id, event_type, at],
            )?;
        }
        conn.execute(
            "UPDATE item_events SET deleted_at_us = 1 WHERE event_type = 'A'",
            [],
        )?;

        let events = item_events(&conn, id)?;
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["C", "B"]);
        Ok(())
    }

    #[test]
    fn request_list_defaults_to_pending_and_summarises_stations() -> Result<()> {
        let conn = open_in_memory()?;
        let roll = insert_item(&conn, "ROLL", 1, Some("R1"), 10);
        let bundle = insert_item(&conn, "BUNDLE", 2, None, 20);
        let decided = insert_item(&conn, "ROLL", 1, Some("R2"), 30);
        insert_request(&conn, roll, "DEFECT", 100);
        insert_request(&conn, bundle, "SCRAP", 200);
        let done = insert_request(&conn, decided, "SCRAP", 300);
        conn.execute(
            "UPDATE status_change_requests SET state = 'APPROVED' WHERE request_id = ?1",
            [done],
        )?;

        let page = list_requests(&conn, &RequestFilter::default())?;
        assert_eq!(page.summary.roll, 1);
        assert_eq!(page.summary.bundle, 1);
        assert_eq!(page.summary.total, 2);
        assert_eq!(page.pagination.total_pages, 1);
        // requested_at desc
        assert_eq!(page.data[0].request.item_id, bundle);
        assert_eq!(page.data[1].number.as_deref(), Some("R1"));
        // roll number missing falls back to the bundle number
        assert_eq!(page.data[0].number.as_deref(), Some("B-9"));

        let filtered = list_requests(
            &conn,
            &RequestFilter {
                station: Some(Station::Roll),
                ..RequestFilter::default()
            },
        )?;
        assert_eq!(filtered.data.len(), 1);
        assert_eq!(filtered.summary.bundle, 0);
        Ok(())
    }

    #[test]
    fn request_list_sorts_status_by_display_order_and_pages() -> Result<()> {
        let conn = open_in_memory()?;
        for (idx, to) in ["QC_PASSED", "DEFECT", "RECHECK"].into_iter().enumerate() {
            let at = i64::try_from(idx).expect("small index") * 10;
            let item = insert_item(&conn, "ROLL", 1, None, at);
            insert_request(&conn, item, to, at);
        }

        let page = list_requests(
            &conn,
            &RequestFilter {
                sort: RequestSort::StatusAfter,
                direction: SortDirection::Asc,
                page: PageRequest {
                    page: 1,
                    page_size: 2,
                },
                ..RequestFilter::default()
            },
        )?;
        let targets: Vec<ItemStatusCode> =
            page.data.iter().map(|row| row.request.to_status).collect();
        assert_eq!(
            targets,
            vec![ItemStatusCode::Defect, ItemStatusCode::Recheck]
        );
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.total_pages, 2);
        Ok(())
    }

    #[test]
    fn request_list_puts_missing_keys_last_in_both_directions() -> Result<()> {
        let conn = open_in_memory()?;
        let with_code = insert_item(&conn, "ROLL", 1, None, 10);
        let without_code = insert_item(&conn, "ROLL", 1, None, 20);
        conn.execute(
            "UPDATE items SET job_order_number = 'JO-7' WHERE item_id = ?1",
            [with_code],
        )?;
        insert_request(&conn, with_code, "DEFECT", 10);
        insert_request(&conn, without_code, "DEFECT", 20);

        for direction in [SortDirection::Asc, SortDirection::Desc] {
            let page = list_requests(
                &conn,
                &RequestFilter {
                    sort: RequestSort::JobOrder,
                    direction,
                    ..RequestFilter::default()
                },
            )?;
            assert_eq!(page.data[0].request.item_id, with_code);
            assert_eq!(page.data[1].request.item_id, without_code);
        }
        Ok(())
    }

    #[test]
    fn page_size_is_clamped() {
        let page = PageRequest {
            page: 0,
            page_size: 1_000,
        }
        .clamped();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, PageRequest::MAX_PAGE_SIZE);
        assert_eq!(
            PageRequest {
                page: 3,
                page_size: 0
            }
            .clamped()
            .page_size,
            1
        );
    }

    #[test]
    fn review_list_shows_latest_review_per_item() -> Result<()> {
        let conn = open_in_memory()?;
        let first = insert_item(&conn, "ROLL", 1, Some("R1"), 10);
        let second = insert_item(&conn, "BUNDLE", 1, None, 20);
        insert_review(&conn, first, "REJECTED", 100);
        let latest_first = insert_review(&conn, first, "PENDING", 200);
        let only_second = insert_review(&conn, second, "APPROVED", 150);

        let page = list_reviews(&conn, &ReviewFilter::default())?;
        let ids: Vec<i64> = page.data.iter().map(|row| row.review.id).collect();
        assert_eq!(ids, vec![latest_first, only_second]);
        assert_eq!(page.summary.pending, 1);
        assert_eq!(page.summary.approved, 1);
        assert_eq!(page.summary.rejected, 0);
        assert_eq!(page.summary.total, 2);

        let approved_only = list_reviews(
            &conn,
            &ReviewFilter {
                states: vec![ReviewState::Approved],
                ..ReviewFilter::default()
            },
        )?;
        assert_eq!(approved_only.data.len(), 1);
        assert_eq!(approved_only.data[0].item.id, second);
        Ok(())
    }

    #[test]
    fn review_list_filters_by_defect_type() -> Result<()> {
        let conn = open_in_memory()?;
        let tagged = insert_item(&conn, "ROLL", 1, None, 10);
        let untagged = insert_item(&conn, "ROLL", 1, None, 20);
        insert_review(&conn, tagged, "PENDING", 100);
        insert_review(&conn, untagged, "PENDING", 100);
        conn.execute(
            "INSERT INTO item_defects (item_id, defect_type_id, created_at_us) VALUES (?1, 2, 0)",
            [tagged],
        )?;

        let page = list_reviews(
            &conn,
            &ReviewFilter {
                defect_type_id: Some(2),
                ..ReviewFilter::default()
            },
        )?;
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].item.id, tagged);
        assert_eq!(page.data[0].defects[0].code.as_deref(), Some("BARCODE"));
        Ok(())
    }

    #[test]
    fn sort_names_parse() {
        assert_eq!(
            "production_line".parse::<RequestSort>().expect("parse"),
            RequestSort::Line
        );
        assert_eq!(
            "status-before".parse::<RequestSort>().expect("parse"),
            RequestSort::StatusBefore
        );
        assert_eq!(
            "decision".parse::<ReviewSort>().expect("parse"),
            ReviewSort::Decision
        );
        assert!("weight".parse::<ReviewSort>().is_err());
        assert_eq!(
            "ASC".parse::<SortDirection>().expect("parse"),
            SortDirection::Asc
        );
    }
}
