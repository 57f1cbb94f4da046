//! Transition Executor.
//!
//! A transition is planned (validated, no writes) and then applied (one item
//! update, an optional defect-set replacement, one audit event). Both halves
//! run against an item already locked by the caller's unit of work, so a
//! failed validation leaves nothing behind and a failed write rolls back
//! with the transaction.

use crate::audit::{self, EventKind, NewEvent};
use crate::catalog::{self, Catalog};
use crate::error::{ErrorCode, QcError, Result};
use crate::model::{Item, ItemStatusCode};
use rusqlite::{Connection, params};
use serde::Serialize;
use serde_json::{Value, json};

/// A validated transition, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub item_id: i64,
    pub from: ItemStatusCode,
    pub from_status_id: i64,
    pub to: ItemStatusCode,
    pub to_status_id: i64,
    /// Sorted, de-duplicated, known defect types. Applied only into DEFECT.
    pub defect_type_ids: Vec<i64>,
}

impl TransitionPlan {
    const fn replaces_defects(&self) -> bool {
        self.to.requires_defects()
    }
}

/// What an applied transition changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    pub item_id: i64,
    pub from: ItemStatusCode,
    pub to: ItemStatusCode,
    pub defect_type_ids: Vec<i64>,
    pub event_id: i64,
    pub at_us: i64,
}

/// Validate moving `item` to `target`.
///
/// # Errors
///
/// - [`ErrorCode::UnknownStatus`] if `target` is not an active catalog entry
/// - [`ErrorCode::NoOpTransition`] (Conflict) if the item already has `target`
/// - [`ErrorCode::MissingDefectTypes`] if `target` is DEFECT and no defect
///   types were supplied
/// - [`ErrorCode::UnknownDefectType`] if any defect type id is unknown
pub fn plan(
    conn: &Connection,
    catalog: &Catalog,
    item: &Item,
    target: ItemStatusCode,
    defect_type_ids: &[i64],
) -> Result<TransitionPlan> {
    let to_status_id = catalog.status_id(target)?;

    if item.status == target {
        tracing::warn!(item_id = item.id, status = %target, "no-op transition refused");
        return Err(QcError::conflict(
            ErrorCode::NoOpTransition,
            format!("item {} is already {target}", item.id),
        )
        .with_details(json!({ "item_id": item.id, "status": target })));
    }

    if target.requires_defects() && defect_type_ids.is_empty() {
        return Err(QcError::validation(
            ErrorCode::MissingDefectTypes,
            format!("moving an item into {target} requires at least one defect type"),
        ));
    }
    let defect_type_ids = catalog::validate_defect_types(conn, defect_type_ids)?;

    Ok(TransitionPlan {
        item_id: item.id,
        from: item.status,
        from_status_id: item.status_id,
        to: target,
        to_status_id,
        defect_type_ids,
    })
}

/// Apply a planned transition and record it.
///
/// `details` becomes the audit payload; `applied_defect_type_ids` is added
/// to it. `meta` is stored on each new defect row.
///
/// # Errors
///
/// Returns an error if any write fails. The caller must not commit then.
pub fn apply(
    conn: &Connection,
    plan: &TransitionPlan,
    meta: Option<&Value>,
    actor_id: i64,
    details: Value,
    at_us: i64,
) -> Result<TransitionOutcome> {
    conn.execute(
        "UPDATE items SET status_id = ?1, updated_at_us = ?2 WHERE item_id = ?3",
        params![plan.to_status_id, at_us, plan.item_id],
    )?;

    let applied: Vec<i64> = if plan.replaces_defects() {
        replace_defects(conn, plan.item_id, &plan.defect_type_ids, meta, at_us)?;
        plan.defect_type_ids.clone()
    } else {
        Vec::new()
    };

    let mut details = details;
    if let Value::Object(map) = &mut details {
        map.insert("applied_defect_type_ids".to_string(), json!(applied));
    }

    let event_id = audit::append_event(
        conn,
        &NewEvent {
            item_id: plan.item_id,
            actor_id: Some(actor_id),
            kind: EventKind::StatusChanged,
            from_status_id: Some(plan.from_status_id),
            to_status_id: Some(plan.to_status_id),
            details,
            at_us,
        },
    )?;

    tracing::info!(
        item_id = plan.item_id,
        from = %plan.from,
        to = %plan.to,
        actor_id,
        defects = applied.len(),
        "applied transition"
    );

    Ok(TransitionOutcome {
        item_id: plan.item_id,
        from: plan.from,
        to: plan.to,
        defect_type_ids: applied,
        event_id,
        at_us,
    })
}

/// Replace the whole defect set of an item.
fn replace_defects(
    conn: &Connection,
    item_id: i64,
    defect_type_ids: &[i64],
    meta: Option<&Value>,
    at_us: i64,
) -> Result<()> {
    conn.execute("DELETE FROM item_defects WHERE item_id = ?1", params![item_id])?;
    let meta_json = meta.filter(|m| !m.is_null()).map(Value::to_string);
    let mut stmt = conn.prepare(
        "INSERT INTO item_defects (item_id, defect_type_id, meta_json, created_at_us)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for defect_type_id in defect_type_ids {
        stmt.execute(params![item_id, defect_type_id, meta_json, at_us])?;
    }
    Ok(())
}
