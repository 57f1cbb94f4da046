//! Review workflow: defect-fix evidence, scrap-from-recheck, and decisions.
//!
//! Both review types share one lifecycle (`PENDING -> APPROVED | REJECTED`)
//! and the one-open-review-per-item invariant. `items.current_review_id`
//! always points at the most recently opened review and is never cleared.

use super::Ctx;
use crate::audit::{self, EventKind, NewEvent};
use crate::error::{Entity, ErrorCode, QcError, Result};
use crate::guard;
use crate::model::{
    Actor, Decision, Item, ItemStatusCode, Review, ReviewState, ReviewType,
};
use crate::policy::Operation;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Evidence submitted against a defective item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixRequest {
    pub item_id: i64,
    pub image_ids: Vec<i64>,
    pub note: Option<String>,
    pub not_modified_since_us: Option<i64>,
}

/// What `request_scrap` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScrapOutcome {
    /// The item was already SCRAP; the operator confirmed it.
    Confirmed { item_id: i64, event_id: i64 },
    /// The item left RECHECK for SCRAP and a review was opened.
    ReviewOpened {
        item_id: i64,
        review_id: i64,
        event_id: i64,
    },
}

/// Open a `DEFECT_FIX` review and claim its evidence images.
///
/// # Errors
///
/// - NotFound / Forbidden for the item
/// - PreconditionFailed if the item changed after the caller's token
/// - Conflict if a review is pending or an image was claimed concurrently
/// - ValidationFailed for an ineligible status or bad image ids
pub fn submit_fix(
    conn: &Connection,
    ctx: &Ctx<'_>,
    request: &FixRequest,
    actor: &Actor,
) -> Result<Review> {
    let item = guard::lock_item(conn, request.item_id)?;
    ctx.policy
        .authorize_line(actor, Operation::SubmitFixRequest, item.line_id)?;
    guard::check_not_modified_since(&item, request.not_modified_since_us)?;
    guard::probe_pending_review(conn, item.id)?;

    if !ctx.policy.fix_eligible(item.status) {
        return Err(QcError::validation(
            ErrorCode::StatusNotEligible,
            format!("A fix request cannot be submitted for a {} item", item.status),
        )
        .with_details(json!({
            "item_id": item.id,
            "status": item.status,
            "eligible": ctx.policy.config().fix_eligible,
        })));
    }

    let image_ids = guard::validate_images(conn, item.id, &request.image_ids)?;
    let review_id = open_review(
        conn,
        &item,
        ReviewType::DefectFix,
        request.note.as_deref(),
        actor,
        ctx.now_us,
    )?;
    guard::link_images(conn, review_id, item.id, &image_ids)?;

    audit::append_event(
        conn,
        &NewEvent {
            item_id: item.id,
            actor_id: Some(actor.id),
            kind: EventKind::FixRequestSubmitted,
            from_status_id: Some(item.status_id),
            to_status_id: Some(item.status_id),
            details: json!({
                "review_id": review_id,
                "image_ids": image_ids,
                "note": request.note,
            }),
            at_us: ctx.now_us,
        },
    )?;
    tracing::info!(
        review_id,
        item_id = item.id,
        images = image_ids.len(),
        actor_id = actor.id,
        "fix request submitted"
    );

    guard::lock_review(conn, review_id)
}

/// Confirm a SCRAP item, or move a RECHECK item to SCRAP pending review.
///
/// # Errors
///
/// - NotFound / Forbidden for the item
/// - PreconditionFailed if the item changed after the caller's token
/// - Conflict if the RECHECK item already has a pending review
/// - ValidationFailed for any other status
pub fn request_scrap(
    conn: &Connection,
    ctx: &Ctx<'_>,
    item_id: i64,
    not_modified_since_us: Option<i64>,
    note: Option<&str>,
    actor: &Actor,
) -> Result<ScrapOutcome> {
    let item = guard::lock_item(conn, item_id)?;
    ctx.policy
        .authorize_line(actor, Operation::RequestScrap, item.line_id)?;
    guard::check_not_modified_since(&item, not_modified_since_us)?;

    match item.status {
        ItemStatusCode::Scrap => {
            conn.execute(
                "UPDATE items
                 SET scrap_confirmed_by = ?1, scrap_confirmed_at_us = ?2, updated_at_us = ?2
                 WHERE item_id = ?3",
                params![actor.id, ctx.now_us, item.id],
            )?;
            let event_id = audit::append_event(
                conn,
                &NewEvent {
                    item_id: item.id,
                    actor_id: Some(actor.id),
                    kind: EventKind::OperatorConfirmScrap,
                    from_status_id: Some(item.status_id),
                    to_status_id: Some(item.status_id),
                    details: json!({ "note": note }),
                    at_us: ctx.now_us,
                },
            )?;
            tracing::info!(item_id = item.id, actor_id = actor.id, "scrap confirmed");
            Ok(ScrapOutcome::Confirmed {
                item_id: item.id,
                event_id,
            })
        }
        ItemStatusCode::Recheck => {
            guard::probe_pending_review(conn, item.id)?;
            let scrap_id = ctx.catalog.status_id(ItemStatusCode::Scrap)?;
            let review_id = open_review(
                conn,
                &item,
                ReviewType::ScrapFromRecheck,
                note,
                actor,
                ctx.now_us,
            )?;
            conn.execute(
                "UPDATE items
                 SET status_id = ?1, scrap_requires_qc = 1, updated_at_us = ?2
                 WHERE item_id = ?3",
                params![scrap_id, ctx.now_us, item.id],
            )?;
            let event_id = audit::append_event(
                conn,
                &NewEvent {
                    item_id: item.id,
                    actor_id: Some(actor.id),
                    kind: EventKind::ScrapFromRecheck,
                    from_status_id: Some(item.status_id),
                    to_status_id: Some(scrap_id),
                    details: json!({ "review_id": review_id, "note": note }),
                    at_us: ctx.now_us,
                },
            )?;
            tracing::info!(
                review_id,
                item_id = item.id,
                actor_id = actor.id,
                "recheck item scrapped pending review"
            );
            Ok(ScrapOutcome::ReviewOpened {
                item_id: item.id,
                review_id,
                event_id,
            })
        }
        other => Err(QcError::validation(
            ErrorCode::StatusNotEligible,
            format!("Only SCRAP or RECHECK items can be scrapped (item is {other})"),
        )
        .with_details(json!({ "item_id": item.id, "status": other }))),
    }
}

/// Accept or reject a PENDING review of either type.
///
/// APPROVED moves the item to `QC_PASSED`, REJECTED to `REJECTED`.
///
/// # Errors
///
/// - NotFound for the review or its item
/// - Conflict if the review is already decided
pub fn decide(
    conn: &Connection,
    ctx: &Ctx<'_>,
    review_id: i64,
    decision: Decision,
    note: Option<&str>,
    actor: &Actor,
) -> Result<Review> {
    let review = guard::lock_review(conn, review_id)?;
    if review.state != ReviewState::Pending {
        tracing::warn!(review_id, state = %review.state, "review already decided");
        return Err(QcError::conflict(ErrorCode::AlreadyDecided, "Review already processed")
            .with_details(json!({ "review_id": review_id, "state": review.state })));
    }

    let item = guard::lock_item(conn, review.item_id)?;
    ctx.policy
        .authorize_line(actor, Operation::DecideReview, item.line_id)?;

    let (target, kind) = match decision {
        Decision::Approved => (ItemStatusCode::QcPassed, EventKind::FixDecisionApproved),
        Decision::Rejected => (ItemStatusCode::Rejected, EventKind::FixDecisionRejected),
    };
    let target_id = ctx.catalog.status_id(target)?;
    let (review_note, reject_reason) = match decision {
        Decision::Approved => (note, None),
        Decision::Rejected => (None, note),
    };

    conn.execute(
        "UPDATE reviews
         SET state = ?1, reviewed_by = ?2, reviewed_at_us = ?3, review_note = ?4,
             reject_reason = ?5, updated_at_us = ?3
         WHERE review_id = ?6",
        params![
            decision.resulting_state(),
            actor.id,
            ctx.now_us,
            review_note,
            reject_reason,
            review_id
        ],
    )?;
    conn.execute(
        "UPDATE items
         SET status_id = ?1, scrap_requires_qc = 0, updated_at_us = ?2
         WHERE item_id = ?3",
        params![target_id, ctx.now_us, item.id],
    )?;
    audit::append_event(
        conn,
        &NewEvent {
            item_id: item.id,
            actor_id: Some(actor.id),
            kind,
            from_status_id: Some(item.status_id),
            to_status_id: Some(target_id),
            details: json!({
                "review_id": review_id,
                "review_type": review.review_type,
                "note": note,
            }),
            at_us: ctx.now_us,
        },
    )?;
    tracing::info!(
        review_id,
        item_id = item.id,
        from = %item.status,
        to = %target,
        decision = %decision,
        actor_id = actor.id,
        "review decided"
    );

    guard::lock_review(conn, review_id)
}

/// Insert a PENDING review and point the item at it.
fn open_review(
    conn: &Connection,
    item: &Item,
    review_type: ReviewType,
    note: Option<&str>,
    actor: &Actor,
    at_us: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO reviews (
            item_id, review_type, state, submitted_by, submitted_at_us, submit_note,
            updated_at_us
         ) VALUES (?1, ?2, 'PENDING', ?3, ?4, ?5, ?4)",
        params![item.id, review_type, actor.id, at_us, note],
    )?;
    let review_id = conn.last_insert_rowid();
    let updated = conn.execute(
        "UPDATE items SET current_review_id = ?1, updated_at_us = ?2 WHERE item_id = ?3",
        params![review_id, at_us, item.id],
    )?;
    if updated == 0 {
        return Err(QcError::not_found(Entity::Item, item.id));
    }
    Ok(review_id)
}

#[cfg(test)]
mod tests {
    use super::{FixRequest, ScrapOutcome, decide, request_scrap, submit_fix};
    use crate::catalog::Catalog;
    use crate::db::{open_in_memory, query};
    use crate::error::{ErrorClass, ErrorCode};
    use crate::model::{Actor, Decision, ItemStatusCode, ReviewState, ReviewType};
    use crate::policy::Policy;
    use crate::workflow::Ctx;
    use rusqlite::{Connection, params};

    fn setup(status: &str) -> (Connection, Catalog, Policy, i64) {
        let conn = open_in_memory().expect("db");
        let catalog = Catalog::load(&conn).expect("catalog");
        conn.execute(
            "INSERT INTO items (station, line_id, detected_at_us, status_id,
                created_at_us, updated_at_us)
             SELECT 'BUNDLE', 2, 0, status_id, 0, 5 FROM item_statuses WHERE code = ?1",
            params![status],
        )
        .expect("item");
        let id = conn.last_insert_rowid();
        (conn, catalog, Policy::default(), id)
    }

    fn image(conn: &Connection, item_id: Option<i64>) -> i64 {
        conn.execute(
            "INSERT INTO item_images (item_id, kind, path, uploaded_at_us)
             VALUES (?1, 'OTHER', 'fix.jpg', 0)",
            params![item_id],
        )
        .expect("image");
        conn.last_insert_rowid()
    }

    #[test]
    fn fix_request_links_images_and_points_item_at_review() {
        let (conn, catalog, policy, id) = setup("DEFECT");
        let ctx = Ctx {
            catalog: &catalog,
            policy: &policy,
            now_us: 50,
        };
        let owned = image(&conn, Some(id));
        let orphan = image(&conn, None);

        let review = submit_fix(
            &conn,
            &ctx,
            &FixRequest {
                item_id: id,
                image_ids: vec![orphan, owned, owned],
                note: Some("relabelled".into()),
                not_modified_since_us: None,
            },
            &Actor::operator(1, 2),
        )
        .expect("submit");
        assert_eq!(review.state, ReviewState::Pending);
        assert_eq!(review.review_type, ReviewType::DefectFix);
        assert_eq!(review.image_ids, vec![owned, orphan]);

        let item = query::fetch_item(&conn, id, false).expect("q").expect("item");
        assert_eq!(item.current_review_id, Some(review.id));
        assert_eq!(item.status, ItemStatusCode::Defect);

        let images = query::images_by_ids(&conn, &[orphan]).expect("images");
        assert_eq!(images[0].item_id, Some(id));
        assert_eq!(images[0].kind, crate::model::ImageKind::Fix);

        let events = query::item_events(&conn, id).expect("events");
        assert_eq!(events[0].event_type, "FIX_REQUEST_SUBMITTED");
    }

    #[test]
    fn ineligible_status_is_rejected() {
        let (conn, catalog, policy, id) = setup("NORMAL");
        let ctx = Ctx {
            catalog: &catalog,
            policy: &policy,
            now_us: 50,
        };
        let img = image(&conn, Some(id));
        let err = submit_fix(
            &conn,
            &ctx,
            &FixRequest {
                item_id: id,
                image_ids: vec![img],
                ..FixRequest::default()
            },
            &Actor::operator(1, 2),
        )
        .expect_err("normal item");
        assert_eq!(err.code(), ErrorCode::StatusNotEligible);
        assert_eq!(err.class(), ErrorClass::FixInput);
    }

    #[test]
    fn stale_token_is_precondition_failure() {
        let (conn, catalog, policy, id) = setup("DEFECT");
        let ctx = Ctx {
            catalog: &catalog,
            policy: &policy,
            now_us: 50,
        };
        let img = image(&conn, Some(id));
        let err = submit_fix(
            &conn,
            &ctx,
            &FixRequest {
                item_id: id,
                image_ids: vec![img],
                note: None,
                not_modified_since_us: Some(4),
            },
            &Actor::operator(1, 2),
        )
        .expect_err("modified since");
        assert_eq!(err.code(), ErrorCode::ModifiedSince);
        assert_eq!(err.class(), ErrorClass::Retry);
    }

    #[test]
    fn rejection_keeps_pointer_until_the_next_fix_request() {
        let (conn, catalog, policy, id) = setup("RECHECK");
        let ctx = Ctx {
            catalog: &catalog,
            policy: &policy,
            now_us: 50,
        };
        let img = image(&conn, Some(id));
        let review = submit_fix(
            &conn,
            &ctx,
            &FixRequest {
                item_id: id,
                image_ids: vec![img],
                ..FixRequest::default()
            },
            &Actor::operator(1, 2),
        )
        .expect("submit");

        let decided = decide(
            &conn,
            &ctx,
            review.id,
            Decision::Rejected,
            Some("still scratched"),
            &Actor::inspector(9, 2),
        )
        .expect("decide");
        assert_eq!(decided.state, ReviewState::Rejected);
        assert_eq!(decided.reject_reason.as_deref(), Some("still scratched"));
        assert_eq!(decided.review_note, None);

        let item = query::fetch_item(&conn, id, false).expect("q").expect("item");
        assert_eq!(item.status, ItemStatusCode::Rejected);
        assert_eq!(item.current_review_id, Some(review.id));

        let err = decide(
            &conn,
            &ctx,
            review.id,
            Decision::Approved,
            None,
            &Actor::inspector(9, 2),
        )
        .expect_err("decided twice");
        assert_eq!(err.code(), ErrorCode::AlreadyDecided);

        let second_img = image(&conn, Some(id));
        let resubmitted = submit_fix(
            &conn,
            &ctx,
            &FixRequest {
                item_id: id,
                image_ids: vec![second_img],
                note: Some("sanded again".into()),
                not_modified_since_us: None,
            },
            &Actor::operator(1, 2),
        )
        .expect("resubmit from REJECTED");
        assert_ne!(resubmitted.id, review.id);
        assert_eq!(resubmitted.state, ReviewState::Pending);

        let item = query::fetch_item(&conn, id, false).expect("q").expect("item");
        assert_eq!(item.current_review_id, Some(resubmitted.id));
        assert_eq!(item.status, ItemStatusCode::Rejected);
    }

    #[test]
    fn scrap_from_recheck_opens_review_then_confirm_on_scrap() {
        let (conn, catalog, policy, id) = setup("RECHECK");
        let ctx = Ctx {
            catalog: &catalog,
            policy: &policy,
            now_us: 50,
        };
        let outcome =
            request_scrap(&conn, &ctx, id, None, None, &Actor::operator(1, 2)).expect("scrap");
        let ScrapOutcome::ReviewOpened { review_id, .. } = outcome else {
            panic!("expected a review, got {outcome:?}");
        };

        let item = query::fetch_item(&conn, id, false).expect("q").expect("item");
        assert_eq!(item.status, ItemStatusCode::Scrap);
        assert!(item.scrap_requires_qc);
        assert_eq!(item.current_review_id, Some(review_id));

        let outcome =
            request_scrap(&conn, &ctx, id, None, None, &Actor::operator(1, 2)).expect("confirm");
        assert!(matches!(outcome, ScrapOutcome::Confirmed { .. }));
        let item = query::fetch_item(&conn, id, false).expect("q").expect("item");
        assert_eq!(item.scrap_confirmed_by, Some(1));

        decide(
            &conn,
            &ctx,
            review_id,
            Decision::Approved,
            Some("ok"),
            &Actor::inspector(9, 2),
        )
        .expect("decide");
        let item = query::fetch_item(&conn, id, false).expect("q").expect("item");
        assert_eq!(item.status, ItemStatusCode::QcPassed);
        assert!(!item.scrap_requires_qc);
    }

    #[test]
    fn scrap_of_normal_item_is_invalid() {
        let (conn, catalog, policy, id) = setup("NORMAL");
        let ctx = Ctx {
            catalog: &catalog,
            policy: &policy,
            now_us: 50,
        };
        let err = request_scrap(&conn, &ctx, id, None, None, &Actor::operator(1, 2))
            .expect_err("normal");
        assert_eq!(err.code(), ErrorCode::StatusNotEligible);
    }
}
