//! Status-change workflow: direct transitions, requests, and decisions.

use super::{Ctx, merge_note};
use crate::db::query;
use crate::error::{Entity, ErrorCode, QcError, Result};
use crate::guard;
use crate::model::{Actor, Decision, ItemStatusCode, ReviewState, StatusChangeRequest};
use crate::policy::Operation;
use crate::transition::{self, TransitionOutcome};
use rusqlite::{Connection, params};
use serde::Deserialize;
use serde_json::{Value, json};

/// A proposed or direct status change.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionInput {
    pub item_id: i64,
    pub to_status: Option<ItemStatusCode>,
    #[serde(default)]
    pub defect_type_ids: Vec<i64>,
    pub reason: Option<String>,
    pub meta: Option<Value>,
}

impl TransitionInput {
    #[must_use]
    pub fn new(item_id: i64, to_status: ItemStatusCode) -> Self {
        Self {
            item_id,
            to_status: Some(to_status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_defects(mut self, defect_type_ids: impl Into<Vec<i64>>) -> Self {
        self.defect_type_ids = defect_type_ids.into();
        self
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    fn target(&self) -> Result<ItemStatusCode> {
        self.to_status.ok_or_else(|| {
            QcError::validation(ErrorCode::InvalidInput, "to_status is required")
        })
    }
}

/// Apply a transition directly, bypassing the request envelope.
///
/// # Errors
///
/// NotFound, Forbidden (line), ValidationFailed, or Conflict (no-op).
pub fn apply_direct(
    conn: &Connection,
    ctx: &Ctx<'_>,
    input: &TransitionInput,
    actor: &Actor,
) -> Result<TransitionOutcome> {
    let target = input.target()?;
    let item = guard::lock_item(conn, input.item_id)?;
    ctx.policy
        .authorize_line(actor, Operation::ApplyTransition, item.line_id)?;

    let plan = transition::plan(conn, ctx.catalog, &item, target, &input.defect_type_ids)?;
    transition::apply(
        conn,
        &plan,
        input.meta.as_ref(),
        actor.id,
        json!({
            "source": "DIRECT",
            "reason": input.reason,
            "meta": input.meta,
            "defect_type_ids": plan.defect_type_ids,
        }),
        ctx.now_us,
    )
}

/// Record a request and, on the fast path, apply it immediately.
///
/// # Errors
///
/// - NotFound / Forbidden for the item
/// - ValidationFailed for an unknown target or defect set
/// - Conflict if a PENDING request exists, or if the target is the current
///   status
pub fn submit(
    conn: &Connection,
    ctx: &Ctx<'_>,
    input: &TransitionInput,
    actor: &Actor,
) -> Result<StatusChangeRequest> {
    let target = input.target()?;
    let item = guard::lock_item(conn, input.item_id)?;
    ctx.policy
        .authorize_line(actor, Operation::SubmitRequest, item.line_id)?;

    ctx.catalog.status_id(target)?;
    guard::probe_pending_request(conn, item.id)?;
    let plan = transition::plan(conn, ctx.catalog, &item, target, &input.defect_type_ids)?;

    let meta_json = input.meta.as_ref().map(Value::to_string);
    conn.execute(
        "INSERT INTO status_change_requests (
            item_id, from_status_id, to_status_id, state, requested_by,
            requested_at_us, reason, meta_json
         ) VALUES (?1, ?2, ?3, 'PENDING', ?4, ?5, ?6, ?7)",
        params![
            item.id,
            plan.from_status_id,
            plan.to_status_id,
            actor.id,
            ctx.now_us,
            input.reason,
            meta_json,
        ],
    )?;
    let request_id = conn.last_insert_rowid();
    insert_request_defects(conn, request_id, &plan.defect_type_ids)?;

    if ctx.policy.auto_applies(actor, target) {
        transition::apply(
            conn,
            &plan,
            input.meta.as_ref(),
            actor.id,
            json!({
                "source": "QC_AUTO_APPROVE",
                "request_id": request_id,
                "reason": input.reason,
                "meta": input.meta,
                "defect_type_ids": plan.defect_type_ids,
            }),
            ctx.now_us,
        )?;
        conn.execute(
            "UPDATE status_change_requests
             SET state = 'APPROVED', approved_by = ?1, approved_at_us = ?2
             WHERE request_id = ?3",
            params![actor.id, ctx.now_us, request_id],
        )?;
        tracing::info!(request_id, item_id = item.id, to = %target, "request auto-approved");
    } else {
        tracing::info!(request_id, item_id = item.id, to = %target, "request pending decision");
    }

    query::fetch_request(conn, request_id)?.ok_or(QcError::not_found(Entity::Request, request_id))
}

fn insert_request_defects(conn: &Connection, request_id: i64, defect_type_ids: &[i64]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO status_change_request_defects (request_id, defect_type_id) VALUES (?1, ?2)",
    )?;
    for defect_type_id in defect_type_ids {
        stmt.execute(params![request_id, defect_type_id])?;
    }
    Ok(())
}

/// Approve or reject a PENDING request.
///
/// # Errors
///
/// - NotFound for the request or its item
/// - Conflict if the request is already decided, or (on approval) the item
///   left the request's from-status since submission
pub fn decide(
    conn: &Connection,
    ctx: &Ctx<'_>,
    request_id: i64,
    decision: Decision,
    note: Option<&str>,
    actor: &Actor,
) -> Result<StatusChangeRequest> {
    let request = guard::lock_request(conn, request_id)?;
    if request.state != ReviewState::Pending {
        tracing::warn!(request_id, state = %request.state, "request already decided");
        return Err(QcError::conflict(ErrorCode::AlreadyDecided, "Request already processed")
            .with_details(json!({ "request_id": request_id, "state": request.state })));
    }

    // A rejection leaves the item untouched, so it can still close out a
    // request whose item has since been soft-deleted.
    let item = match decision {
        Decision::Approved => guard::lock_item(conn, request.item_id)?,
        Decision::Rejected => query::fetch_item(conn, request.item_id, true)?
            .ok_or(QcError::not_found(Entity::Item, request.item_id))?,
    };
    ctx.policy
        .authorize_line(actor, Operation::DecideRequest, item.line_id)?;

    if decision == Decision::Approved {
        if item.status_id != request.from_status_id {
            tracing::warn!(
                request_id,
                item_id = item.id,
                expected = %request.from_status,
                actual = %item.status,
                "stale request refused"
            );
            return Err(QcError::conflict(
                ErrorCode::StaleRequest,
                format!(
                    "Item status changed since the request was made (expected {}, found {})",
                    request.from_status, item.status
                ),
            )
            .with_details(json!({
                "request_id": request_id,
                "expected_status_id": request.from_status_id,
                "actual_status_id": item.status_id,
                "expected_status": request.from_status,
                "actual_status": item.status,
            })));
        }

        let plan = transition::plan(
            conn,
            ctx.catalog,
            &item,
            request.to_status,
            &request.defect_type_ids,
        )?;
        transition::apply(
            conn,
            &plan,
            request.meta.as_ref(),
            actor.id,
            json!({
                "source": "QC_DECISION",
                "request_id": request_id,
                "note": note,
                "defect_type_ids": plan.defect_type_ids,
            }),
            ctx.now_us,
        )?;
    }

    let reason = merge_note(request.reason.as_deref(), note);
    conn.execute(
        "UPDATE status_change_requests
         SET state = ?1, approved_by = ?2, approved_at_us = ?3, reason = ?4
         WHERE request_id = ?5",
        params![
            decision.resulting_state(),
            actor.id,
            ctx.now_us,
            reason,
            request_id
        ],
    )?;
    tracing::info!(request_id, item_id = item.id, decision = %decision, actor_id = actor.id, "request decided");

    guard::lock_request(conn, request_id)
}
