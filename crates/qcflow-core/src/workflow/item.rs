//! Item-level actions that do not change disposition.

use super::Ctx;
use crate::audit::{self, EventKind, NewEvent};
use crate::error::{ErrorCode, QcError, Result};
use crate::guard;
use crate::model::{Acknowledgement, Actor, Item};
use crate::policy::Operation;
use rusqlite::{Connection, params};
use serde_json::{Map, Value, json};

/// Largest roll width magnitude the store accepts (exclusive), in the
/// same unit as `roll_width`.
pub const ROLL_WIDTH_LIMIT: f64 = 100_000_000.0;

/// Descriptive fields to overwrite on an item.
///
/// The outer `Option` is "leave as is"; `Some(None)` clears the column.
/// Strings are trimmed, and a blank string clears the column too.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub product_code: Option<Option<String>>,
    pub roll_number: Option<Option<String>>,
    pub bundle_number: Option<Option<String>>,
    pub job_order_number: Option<Option<String>>,
    pub roll_id: Option<Option<String>>,
    pub roll_width: Option<Option<f64>>,
}

impl ItemPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.product_code.is_none()
            && self.roll_number.is_none()
            && self.bundle_number.is_none()
            && self.job_order_number.is_none()
            && self.roll_id.is_none()
            && self.roll_width.is_none()
    }

    fn text_fields(&self) -> [(&'static str, Option<&Option<String>>); 5] {
        [
            ("product_code", self.product_code.as_ref()),
            ("roll_number", self.roll_number.as_ref()),
            ("bundle_number", self.bundle_number.as_ref()),
            ("job_order_number", self.job_order_number.as_ref()),
            ("roll_id", self.roll_id.as_ref()),
        ]
    }
}

fn trimmed(value: Option<&String>) -> Option<String> {
    value
        .map(String::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Round to hundredths and check the column range.
fn normalize_roll_width(width: f64) -> Result<f64> {
    if !width.is_finite() {
        return Err(QcError::validation(ErrorCode::InvalidInput, "Invalid roll_width")
            .with_details(json!({ "field": "roll_width" })));
    }
    let rounded = (width * 100.0).round() / 100.0;
    if rounded.abs() >= ROLL_WIDTH_LIMIT {
        return Err(QcError::validation(
            ErrorCode::InvalidInput,
            "roll_width out of range",
        )
        .with_details(json!({ "field": "roll_width", "value": width, "limit": ROLL_WIDTH_LIMIT })));
    }
    Ok(rounded)
}

/// Overwrite descriptive fields of a live item. Status, defects and review
/// pointers are never touched here.
///
/// # Errors
///
/// - ValidationFailed for an empty patch or a bad `roll_width`
/// - NotFound or Forbidden for the item
pub fn edit(conn: &Connection, ctx: &Ctx<'_>, item_id: i64, patch: &ItemPatch, actor: &Actor) -> Result<Item> {
    if patch.is_empty() {
        return Err(QcError::validation(ErrorCode::InvalidInput, "No fields to update"));
    }
    let roll_width = match patch.roll_width {
        Some(Some(width)) => Some(Some(normalize_roll_width(width)?)),
        other => other,
    };

    let item = guard::lock_item(conn, item_id)?;
    ctx.policy
        .authorize_line(actor, Operation::EditItem, item.line_id)?;

    let mut changed = Map::new();
    for (column, value) in patch.text_fields() {
        let Some(value) = value else { continue };
        let value = trimmed(value.as_ref());
        conn.execute(
            &format!("UPDATE items SET {column} = ?1 WHERE item_id = ?2"),
            params![value, item_id],
        )?;
        changed.insert(column.to_string(), json!(value));
    }
    if let Some(width) = roll_width {
        conn.execute(
            "UPDATE items SET roll_width = ?1 WHERE item_id = ?2",
            params![width, item_id],
        )?;
        changed.insert("roll_width".to_string(), json!(width));
    }
    conn.execute(
        "UPDATE items SET updated_at_us = ?1 WHERE item_id = ?2",
        params![ctx.now_us, item_id],
    )?;

    let fields: Vec<String> = changed.keys().cloned().collect();
    audit::append_event(
        conn,
        &NewEvent {
            item_id,
            actor_id: Some(actor.id),
            kind: EventKind::ItemEdited,
            from_status_id: Some(item.status_id),
            to_status_id: Some(item.status_id),
            details: json!({ "changes": Value::Object(changed) }),
            at_us: ctx.now_us,
        },
    )?;
    tracing::info!(item_id, actor_id = actor.id, ?fields, "item edited");

    guard::lock_item(conn, item_id)
}

/// Record that an operator has seen the item. Repeat calls are no-ops that
/// return the first acknowledgement.
///
/// # Errors
///
/// NotFound or Forbidden for the item, or a storage failure.
pub fn acknowledge(conn: &Connection, ctx: &Ctx<'_>, item_id: i64, actor: &Actor) -> Result<Acknowledgement> {
    let item = guard::lock_item(conn, item_id)?;
    ctx.policy
        .authorize_line(actor, Operation::AcknowledgeItem, item.line_id)?;

    if let (Some(by), Some(at)) = (item.acknowledged_by, item.acknowledged_at_us) {
        tracing::debug!(item_id, acknowledged_by = by, "item already acknowledged");
        return Ok(Acknowledgement {
            item_id,
            acknowledged_by: by,
            acknowledged_at_us: at,
            changed: false,
        });
    }

    conn.execute(
        "UPDATE items
         SET acknowledged_by = ?1, acknowledged_at_us = ?2, updated_at_us = ?2
         WHERE item_id = ?3",
        params![actor.id, ctx.now_us, item_id],
    )?;
    audit::append_event(
        conn,
        &NewEvent {
            item_id,
            actor_id: Some(actor.id),
            kind: EventKind::ItemAcknowledged,
            from_status_id: Some(item.status_id),
            to_status_id: Some(item.status_id),
            details: json!({ "status": item.status }),
            at_us: ctx.now_us,
        },
    )?;
    tracing::info!(item_id, actor_id = actor.id, "item acknowledged");

    Ok(Acknowledgement {
        item_id,
        acknowledged_by: actor.id,
        acknowledged_at_us: ctx.now_us,
        changed: true,
    })
}

/// Hide an item from every further operation. Rows are kept.
///
/// # Errors
///
/// NotFound (including an already-deleted item) or Forbidden.
pub fn soft_delete(conn: &Connection, ctx: &Ctx<'_>, item_id: i64, actor: &Actor) -> Result<i64> {
    let item = guard::lock_item(conn, item_id)?;
    ctx.policy
        .authorize_line(actor, Operation::SoftDeleteItem, item.line_id)?;

    conn.execute(
        "UPDATE items SET deleted_at_us = ?1, updated_at_us = ?1 WHERE item_id = ?2",
        params![ctx.now_us, item_id],
    )?;
    let event_id = audit::append_event(
        conn,
        &NewEvent {
            item_id,
            actor_id: Some(actor.id),
            kind: EventKind::ItemDeleted,
            from_status_id: Some(item.status_id),
            to_status_id: Some(item.status_id),
            details: json!({ "status": item.status }),
            at_us: ctx.now_us,
        },
    )?;
    tracing::info!(item_id, actor_id = actor.id, "item soft-deleted");
    Ok(event_id)
}

#[cfg(test)]
mod tests {
    use super::{ItemPatch, acknowledge, edit, soft_delete};
    use crate::catalog::Catalog;
    use crate::db::{open_in_memory, query};
    use crate::error::{ErrorClass, ErrorCode};
    use crate::model::Actor;
    use crate::policy::Policy;
    use crate::workflow::Ctx;
    use rusqlite::{Connection, params};

    fn setup() -> (Connection, Catalog, Policy, i64) {
        let conn = open_in_memory().expect("db");
        let catalog = Catalog::load(&conn).expect("catalog");
        conn.execute(
            "INSERT INTO items (station, line_id, detected_at_us, status_id,
                created_at_us, updated_at_us)
             SELECT 'ROLL', 1, 0, status_id, 0, 0 FROM item_statuses WHERE code = 'DEFECT'",
            params![],
        )
        .expect("item");
        let id = conn.last_insert_rowid();
        (conn, catalog, Policy::default(), id)
    }

    #[test]
    fn acknowledgement_is_idempotent() {
        let (conn, catalog, policy, id) = setup();
        let mut ctx = Ctx {
            catalog: &catalog,
            policy: &policy,
            now_us: 100,
        };
        let first = acknowledge(&conn, &ctx, id, &Actor::operator(4, 1)).expect("ack");
        assert!(first.changed);

        ctx.now_us = 200;
        let second = acknowledge(&conn, &ctx, id, &Actor::operator(5, 1)).expect("ack again");
        assert!(!second.changed);
        assert_eq!(second.acknowledged_by, 4);
        assert_eq!(second.acknowledged_at_us, 100);

        let events = query::item_events(&conn, id).expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "ITEM_ACKNOWLEDGED");
    }

    #[test]
    fn deleted_item_is_gone() {
        let (conn, catalog, policy, id) = setup();
        let ctx = Ctx {
            catalog: &catalog,
            policy: &policy,
            now_us: 100,
        };
        soft_delete(&conn, &ctx, id, &Actor::inspector(9, 1)).expect("delete");

        let err = acknowledge(&conn, &ctx, id, &Actor::operator(4, 1)).expect_err("gone");
        assert_eq!(err.code(), ErrorCode::ItemNotFound);
        assert_eq!(err.class(), ErrorClass::Gone);

        let row = query::fetch_item(&conn, id, true).expect("q").expect("row kept");
        assert_eq!(row.deleted_at_us, Some(100));
    }

    #[test]
    fn edit_trims_and_clears_fields() {
        let (conn, catalog, policy, id) = setup();
        conn.execute(
            "UPDATE items SET product_code = 'P-1', roll_id = 'old' WHERE item_id = ?1",
            params![id],
        )
        .expect("seed fields");
        let ctx = Ctx {
            catalog: &catalog,
            policy: &policy,
            now_us: 300,
        };
        let patch = ItemPatch {
            roll_number: Some(Some("  R-77 ".into())),
            roll_id: Some(Some("   ".into())),
            roll_width: Some(Some(12.345_6)),
            ..ItemPatch::default()
        };

        let item = edit(&conn, &ctx, id, &patch, &Actor::operator(4, 1)).expect("edit");
        assert_eq!(item.roll_number.as_deref(), Some("R-77"));
        assert_eq!(item.roll_id, None);
        assert_eq!(item.product_code.as_deref(), Some("P-1"));
        let width = item.roll_width.expect("width");
        assert!((width - 12.35).abs() < 1e-9, "rounded to {width}");
        assert_eq!(item.updated_at_us, 300);

        let events = query::item_events(&conn, id).expect("events");
        assert_eq!(events[0].event_type, "ITEM_EDITED");
        assert_eq!(events[0].details["changes"]["roll_number"], "R-77");
        assert!(events[0].details["changes"]["roll_id"].is_null());
    }

    #[test]
    fn empty_edit_and_wild_width_are_refused() {
        let (conn, catalog, policy, id) = setup();
        let ctx = Ctx {
            catalog: &catalog,
            policy: &policy,
            now_us: 300,
        };
        let operator = Actor::operator(4, 1);

        let err = edit(&conn, &ctx, id, &ItemPatch::default(), &operator).expect_err("empty");
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert_eq!(err.class(), ErrorClass::FixInput);

        for width in [1.0e8, -2.5e9, f64::NAN] {
            let patch = ItemPatch {
                roll_width: Some(Some(width)),
                ..ItemPatch::default()
            };
            let err = edit(&conn, &ctx, id, &patch, &operator).expect_err("bad width");
            assert_eq!(err.code(), ErrorCode::InvalidInput);
        }

        let cleared = ItemPatch {
            roll_width: Some(None),
            ..ItemPatch::default()
        };
        let item = edit(&conn, &ctx, id, &cleared, &operator).expect("clear width");
        assert_eq!(item.roll_width, None);
        assert_eq!(query::item_events(&conn, id).expect("events").len(), 1);
    }

    #[test]
    fn edit_respects_line_and_deletion() {
        let (conn, catalog, policy, id) = setup();
        let ctx = Ctx {
            catalog: &catalog,
            policy: &policy,
            now_us: 300,
        };
        let patch = ItemPatch {
            product_code: Some(Some("P-9".into())),
            ..ItemPatch::default()
        };
        let err = edit(&conn, &ctx, id, &patch, &Actor::operator(4, 2)).expect_err("other line");
        assert_eq!(err.code(), ErrorCode::CrossLine);

        soft_delete(&conn, &ctx, id, &Actor::inspector(9, 1)).expect("delete");
        let err = edit(&conn, &ctx, id, &patch, &Actor::operator(4, 1)).expect_err("gone");
        assert_eq!(err.code(), ErrorCode::ItemNotFound);
    }
}
