//! Concurrency guard: exclusive units of work, row locks, pending probes,
//! the not-modified-since token, and compare-and-swap image linking.
//!
//! SQLite locks the database, not the row. A unit of work opens with
//! `BEGIN IMMEDIATE`, which takes the write lock before anything is read;
//! a second writer (thread or process) waits on the busy timeout until the
//! first commits or rolls back and then reads fresh state. The `lock_*`
//! helpers read their row inside that transaction, so every decision is made
//! against state no one else can change until commit.
//!
//! While the write lock is held no other writer is in flight, so the pending
//! probes never wait on a concurrent decision; they are plain existence
//! reads. Partial unique indexes back both probes.

use crate::db::query;
use crate::error::{Entity, ErrorCode, QcError, Result};
use crate::model::{Item, Review, StatusChangeRequest};
use rusqlite::types::ToSql;
use rusqlite::{Connection, Transaction, TransactionBehavior, params_from_iter};
use serde_json::json;
use std::collections::BTreeSet;

/// Begin a unit of work holding the database write lock.
///
/// # Errors
///
/// Returns an error if the lock cannot be taken within the busy timeout.
pub fn begin_exclusive(conn: &mut Connection) -> Result<Transaction<'_>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tracing::debug!("acquired write lock");
    Ok(tx)
}

/// Read a live item inside the unit of work.
///
/// # Errors
///
/// Returns [`QcError::NotFound`] for missing or soft-deleted items.
pub fn lock_item(conn: &Connection, item_id: i64) -> Result<Item> {
    let item = query::fetch_item(conn, item_id, false)?
        .ok_or(QcError::not_found(Entity::Item, item_id))?;
    tracing::debug!(item_id, status = %item.status, "locked item");
    Ok(item)
}

/// Read a live status-change request inside the unit of work.
///
/// # Errors
///
/// Returns [`QcError::NotFound`] if the request does not resolve.
pub fn lock_request(conn: &Connection, request_id: i64) -> Result<StatusChangeRequest> {
    let request = query::fetch_request(conn, request_id)?
        .ok_or(QcError::not_found(Entity::Request, request_id))?;
    tracing::debug!(request_id, state = %request.state, "locked request");
    Ok(request)
}

/// Read a live review inside the unit of work.
///
/// # Errors
///
/// Returns [`QcError::NotFound`] if the review does not resolve.
pub fn lock_review(conn: &Connection, review_id: i64) -> Result<Review> {
    let review = query::fetch_review(conn, review_id)?
        .ok_or(QcError::not_found(Entity::Review, review_id))?;
    tracing::debug!(review_id, state = %review.state, "locked review");
    Ok(review)
}

/// Fail if the item already has a PENDING status-change request.
///
/// # Errors
///
/// Returns [`QcError::Conflict`] carrying the existing request id.
pub fn probe_pending_request(conn: &Connection, item_id: i64) -> Result<()> {
    let existing = query::pending_request_id(conn, item_id)?;
    tracing::debug!(item_id, ?existing, "probed pending request");
    match existing {
        None => Ok(()),
        Some(request_id) => {
            tracing::warn!(item_id, request_id, "pending request already exists");
            Err(QcError::conflict(
                ErrorCode::PendingRequestExists,
                format!("Item already has a pending request (id={request_id})"),
            )
            .with_details(json!({ "item_id": item_id, "request_id": request_id })))
        }
    }
}

/// Fail if the item already has a PENDING review.
///
/// # Errors
///
/// Returns [`QcError::Conflict`] carrying the existing review id.
pub fn probe_pending_review(conn: &Connection, item_id: i64) -> Result<()> {
    let existing = query::pending_review_id(conn, item_id)?;
    tracing::debug!(item_id, ?existing, "probed pending review");
    match existing {
        None => Ok(()),
        Some(review_id) => {
            tracing::warn!(item_id, review_id, "pending review already exists");
            Err(QcError::conflict(
                ErrorCode::PendingReviewExists,
                "The fix request has been submitted",
            )
            .with_details(json!({ "item_id": item_id, "review_id": review_id })))
        }
    }
}

/// Optimistic layer: reject when the item changed after the caller's token.
///
/// # Errors
///
/// Returns [`QcError::PreconditionFailed`] if `item.updated_at_us > token`.
pub fn check_not_modified_since(item: &Item, not_modified_since_us: Option<i64>) -> Result<()> {
    match not_modified_since_us {
        Some(token) if item.updated_at_us > token => {
            tracing::warn!(
                item_id = item.id,
                modified_at_us = item.updated_at_us,
                token,
                "item modified since token"
            );
            Err(QcError::PreconditionFailed {
                item_id: item.id,
                modified_at_us: item.updated_at_us,
                not_modified_since_us: token,
            })
        }
        _ => Ok(()),
    }
}

/// De-duplicate `image_ids` and check each is a live, unlinked image of this
/// item (or of no item).
///
/// # Errors
///
/// - [`QcError::ValidationFailed`] with `missing`, `deleted` and
///   `wrong_item` id lists (an image claimed by a review counts as claimed,
///   not as belonging to another item)
/// - [`QcError::Conflict`] with [`ErrorCode::ImageLinkRace`] and the
///   `already_linked` list when every image is otherwise valid but another
///   review has claimed some of them
pub fn validate_images(conn: &Connection, item_id: i64, image_ids: &[i64]) -> Result<Vec<i64>> {
    let ids: Vec<i64> = image_ids
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ids.is_empty() {
        return Err(QcError::validation(
            ErrorCode::InvalidImages,
            "Provide at least 1 image_id",
        ));
    }

    let rows = query::images_by_ids(conn, &ids)?;
    let found: BTreeSet<i64> = rows.iter().map(|image| image.id).collect();
    let missing: Vec<i64> = ids.iter().copied().filter(|id| !found.contains(id)).collect();
    if !missing.is_empty() {
        return Err(QcError::validation(
            ErrorCode::InvalidImages,
            "Some image_ids do not exist",
        )
        .with_details(json!({ "missing": missing })));
    }

    let already_linked: Vec<i64> = rows
        .iter()
        .filter(|image| image.review_id.is_some())
        .map(|image| image.id)
        .collect();
    let deleted: Vec<i64> = rows
        .iter()
        .filter(|image| image.deleted_at_us.is_some())
        .map(|image| image.id)
        .collect();
    let wrong_item: Vec<i64> = rows
        .iter()
        .filter(|image| image.review_id.is_none())
        .filter(|image| image.item_id.is_some_and(|owner| owner != item_id))
        .map(|image| image.id)
        .collect();

    if !deleted.is_empty() || !wrong_item.is_empty() {
        return Err(
            QcError::validation(ErrorCode::InvalidImages, "Invalid images for fix request")
                .with_details(json!({
                    "missing": [],
                    "already_linked": already_linked,
                    "deleted": deleted,
                    "wrong_item": wrong_item,
                })),
        );
    }
    if !already_linked.is_empty() {
        tracing::warn!(item_id, ?already_linked, "images already claimed by another review");
        return Err(QcError::conflict(
            ErrorCode::ImageLinkRace,
            "Some images are already linked to another review",
        )
        .with_details(json!({ "already_linked": already_linked })));
    }
    Ok(ids)
}

/// Compare-and-swap over the image set: claim the rows that are still
/// unlinked, live, and owned by this item (or no item), then require that
/// every requested row was claimed.
///
/// # Errors
///
/// Returns [`QcError::Conflict`] with [`ErrorCode::ImageLinkRace`] when fewer
/// rows matched than requested. The caller's transaction must then be
/// dropped so the partial claim rolls back.
pub fn link_images(
    conn: &Connection,
    review_id: i64,
    item_id: i64,
    image_ids: &[i64],
) -> Result<()> {
    let mut param_values: Vec<Box<dyn ToSql>> = vec![Box::new(review_id), Box::new(item_id)];
    let placeholders = query::push_placeholders(&mut param_values, image_ids.iter().copied());
    let sql = format!(
        "UPDATE item_images SET review_id = ?1, kind = 'FIX', item_id = COALESCE(item_id, ?2) \
         WHERE image_id IN ({placeholders}) \
           AND review_id IS NULL \
           AND deleted_at_us IS NULL \
           AND (item_id IS NULL OR item_id = ?2)"
    );
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(AsRef::as_ref).collect();
    let claimed = conn.execute(&sql, params_from_iter(params_ref))?;

    if claimed == image_ids.len() {
        tracing::debug!(review_id, claimed, "linked images");
        return Ok(());
    }
    tracing::warn!(
        review_id,
        item_id,
        expected = image_ids.len(),
        claimed,
        "image link lost a race"
    );
    Err(QcError::conflict(
        ErrorCode::ImageLinkRace,
        "Images changed concurrently; please retry",
    )
    .with_details(json!({
        "expected": image_ids.len(),
        "claimed": claimed,
        "image_ids": image_ids,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::error::ErrorClass;
    use rusqlite::params;

    fn item(conn: &Connection, line: i64) -> i64 {
        conn.execute(
            "INSERT INTO items (station, line_id, detected_at_us, status_id,
                created_at_us, updated_at_us)
             VALUES ('ROLL', ?1, 0, 1, 0, 500)",
            params![line],
        )
        .expect("item");
        conn.last_insert_rowid()
    }

    fn image(conn: &Connection, item_id: Option<i64>) -> i64 {
        conn.execute(
            "INSERT INTO item_images (item_id, kind, path, uploaded_at_us)
             VALUES (?1, 'DETECTED', 'img.jpg', 0)",
            params![item_id],
        )
        .expect("image");
        conn.last_insert_rowid()
    }

    fn review(conn: &Connection, item_id: i64) -> i64 {
        conn.execute(
            "INSERT INTO reviews (item_id, review_type, submitted_by, submitted_at_us, updated_at_us)
             VALUES (?1, 'DEFECT_FIX', 1, 0, 0)",
            params![item_id],
        )
        .expect("review");
        conn.last_insert_rowid()
    }

    #[test]
    fn lock_item_hides_soft_deleted() {
        let conn = open_in_memory().expect("db");
        let id = item(&conn, 1);
        assert!(lock_item(&conn, id).is_ok());
        conn.execute("UPDATE items SET deleted_at_us = 1 WHERE item_id = ?1", [id])
            .expect("soft delete");
        let err = lock_item(&conn, id).expect_err("deleted");
        assert_eq!(err.class(), ErrorClass::Gone);
    }

    #[test]
    fn pending_review_probe_reports_existing_id() {
        let conn = open_in_memory().expect("db");
        let id = item(&conn, 1);
        assert!(probe_pending_review(&conn, id).is_ok());
        let review_id = review(&conn, id);
        let err = probe_pending_review(&conn, id).expect_err("pending");
        assert_eq!(err.code(), ErrorCode::PendingReviewExists);
        assert_eq!(err.details()["review_id"], review_id);
    }

    #[test]
    fn token_check_is_strictly_newer() {
        let conn = open_in_memory().expect("db");
        let id = item(&conn, 1);
        let locked = lock_item(&conn, id).expect("item");
        assert!(check_not_modified_since(&locked, None).is_ok());
        assert!(check_not_modified_since(&locked, Some(500)).is_ok());
        let err = check_not_modified_since(&locked, Some(499)).expect_err("stale token");
        assert_eq!(err.code(), ErrorCode::ModifiedSince);
    }

    #[test]
    fn image_validation_reports_each_problem() {
        let conn = open_in_memory().expect("db");
        let mine = item(&conn, 1);
        let other = item(&conn, 1);
        let ok = image(&conn, Some(mine));
        let orphan = image(&conn, None);
        let foreign = image(&conn, Some(other));
        let gone = image(&conn, Some(mine));
        conn.execute(
            "UPDATE item_images SET deleted_at_us = 1 WHERE image_id = ?1",
            [gone],
        )
        .expect("delete image");

        assert_eq!(
            validate_images(&conn, mine, &[orphan, ok, ok]).expect("valid"),
            vec![ok, orphan]
        );

        let err = validate_images(&conn, mine, &[]).expect_err("empty");
        assert_eq!(err.code(), ErrorCode::InvalidImages);

        let err = validate_images(&conn, mine, &[ok, 9_999]).expect_err("missing");
        assert_eq!(err.details()["missing"][0], 9_999);

        let err = validate_images(&conn, mine, &[ok, foreign, gone]).expect_err("invalid");
        assert_eq!(err.class(), ErrorClass::FixInput);
        assert_eq!(err.details()["wrong_item"][0], foreign);
        assert_eq!(err.details()["deleted"][0], gone);

        let claimed = review(&conn, other);
        link_images(&conn, claimed, other, &[orphan]).expect("claim orphan");
        assert_eq!(
            validate_images(&conn, other, &[orphan]).expect_err("own claim").code(),
            ErrorCode::ImageLinkRace
        );
        let err = validate_images(&conn, mine, &[ok, orphan]).expect_err("claimed");
        assert_eq!(err.code(), ErrorCode::ImageLinkRace);
        assert_eq!(err.class(), ErrorClass::Retry);
        assert_eq!(err.details()["already_linked"][0], orphan);
    }

    #[test]
    fn link_is_compare_and_swap() {
        let conn = open_in_memory().expect("db");
        let id = item(&conn, 1);
        let first = image(&conn, Some(id));
        let second = image(&conn, None);
        let winner = review(&conn, id);

        link_images(&conn, winner, id, &[first]).expect("first claim");

        conn.execute("UPDATE reviews SET state = 'APPROVED' WHERE review_id = ?1", [winner])
            .expect("close review");
        let loser = review(&conn, id);
        let err = link_images(&conn, loser, id, &[first, second]).expect_err("lost race");
        assert_eq!(err.code(), ErrorCode::ImageLinkRace);
        assert_eq!(err.class(), ErrorClass::Retry);

        let owner: i64 = conn
            .query_row(
                "SELECT review_id FROM item_images WHERE image_id = ?1",
                [first],
                |row| row.get(0),
            )
            .expect("owner");
        assert_eq!(owner, winner);
    }
}
