//! The operation surface: one [`Engine`] per database connection.
//!
//! Every mutating method checks the role matrix, then runs its workflow
//! inside one exclusive unit of work that reads the clock once the write
//! lock is held. An `Err` from any
//! step drops the transaction, which rolls it back.

use crate::catalog::{self, Catalog, DefectTypeEntry};
use crate::clock::{Clock, SystemClock};
use crate::config::QcConfig;
use crate::db::{self, query};
use crate::error::{Entity, QcError, Result};
use crate::guard;
use crate::ingest::{self, NewImage, NewItem};
use crate::model::{
    Acknowledgement, Actor, Decision, ImageKind, Item, ItemDetail, ItemEvent, ItemImage, Review,
    StatusChangeRequest,
};
use crate::policy::{Operation, Policy};
use crate::transition::TransitionOutcome;
use crate::workflow::item::ItemPatch;
use crate::workflow::request::TransitionInput;
use crate::workflow::review::{FixRequest, ScrapOutcome};
use crate::workflow::{self, Ctx};
use anyhow::Context;
use rusqlite::Connection;
use std::fmt;
use std::sync::Arc;

pub struct Engine {
    conn: Connection,
    catalog: Catalog,
    policy: Policy,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("catalog", &self.catalog)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Open the configured database on the wall clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated, or
    /// the status catalog is empty.
    pub fn open(config: &QcConfig) -> anyhow::Result<Self> {
        let conn = db::open_database(&config.database.path, config.database.busy_timeout())?;
        let engine = Self::new(conn, Policy::new(config.policy.clone()), Arc::new(SystemClock))
            .context("load status catalog")?;
        tracing::debug!(path = %config.database.path.display(), "engine ready");
        Ok(engine)
    }

    /// Wrap an already migrated connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the status catalog cannot be loaded.
    pub fn new(conn: Connection, policy: Policy, clock: Arc<dyn Clock>) -> Result<Self> {
        let catalog = Catalog::load(&conn)?;
        Ok(Self {
            conn,
            catalog,
            policy,
            clock,
        })
    }

    /// A fresh in-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub fn in_memory(policy: Policy, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let conn = db::open_in_memory()?;
        Ok(Self::new(conn, policy, clock)?)
    }

    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub const fn policy(&self) -> &Policy {
        &self.policy
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    fn unit_of_work<T>(&mut self, work: impl FnOnce(&Connection, &Ctx<'_>) -> Result<T>) -> Result<T> {
        let tx = guard::begin_exclusive(&mut self.conn)?;
        // Stamped under the write lock so timestamps follow commit order.
        let now_us = self.clock.now_us();
        let ctx = Ctx {
            catalog: &self.catalog,
            policy: &self.policy,
            now_us,
        };
        let value = work(&tx, &ctx)?;
        tx.commit()?;
        Ok(value)
    }

    // -- status-change workflow -------------------------------------------

    /// Apply a transition immediately (inspectors only).
    ///
    /// # Errors
    ///
    /// See [`workflow::request::apply_direct`].
    pub fn apply_transition(&mut self, input: &TransitionInput, actor: &Actor) -> Result<TransitionOutcome> {
        let _span =
            tracing::info_span!("apply_transition", item_id = input.item_id, actor_id = actor.id)
                .entered();
        self.policy.authorize_role(actor, Operation::ApplyTransition)?;
        self.unit_of_work(|conn, ctx| workflow::request::apply_direct(conn, ctx, input, actor))
    }

    /// # Errors
    ///
    /// See [`workflow::request::submit`].
    pub fn submit_request(&mut self, input: &TransitionInput, actor: &Actor) -> Result<StatusChangeRequest> {
        let _span =
            tracing::info_span!("submit_request", item_id = input.item_id, actor_id = actor.id)
                .entered();
        self.policy.authorize_role(actor, Operation::SubmitRequest)?;
        self.unit_of_work(|conn, ctx| workflow::request::submit(conn, ctx, input, actor))
    }

    /// # Errors
    ///
    /// See [`workflow::request::decide`].
    pub fn decide_request(
        &mut self,
        request_id: i64,
        decision: Decision,
        note: Option<&str>,
        actor: &Actor,
    ) -> Result<StatusChangeRequest> {
        let _span = tracing::info_span!("decide_request", request_id, actor_id = actor.id).entered();
        self.policy.authorize_role(actor, Operation::DecideRequest)?;
        self.unit_of_work(|conn, ctx| {
            workflow::request::decide(conn, ctx, request_id, decision, note, actor)
        })
    }

    // -- review workflow --------------------------------------------------

    /// # Errors
    ///
    /// See [`workflow::review::submit_fix`].
    pub fn submit_fix_request(&mut self, request: &FixRequest, actor: &Actor) -> Result<Review> {
        let _span =
            tracing::info_span!("submit_fix_request", item_id = request.item_id, actor_id = actor.id)
                .entered();
        self.policy.authorize_role(actor, Operation::SubmitFixRequest)?;
        self.unit_of_work(|conn, ctx| workflow::review::submit_fix(conn, ctx, request, actor))
    }

    /// # Errors
    ///
    /// See [`workflow::review::decide`].
    pub fn decide_review(
        &mut self,
        review_id: i64,
        decision: Decision,
        note: Option<&str>,
        actor: &Actor,
    ) -> Result<Review> {
        let _span = tracing::info_span!("decide_review", review_id, actor_id = actor.id).entered();
        self.policy.authorize_role(actor, Operation::DecideReview)?;
        self.unit_of_work(|conn, ctx| {
            workflow::review::decide(conn, ctx, review_id, decision, note, actor)
        })
    }

    /// # Errors
    ///
    /// See [`workflow::review::request_scrap`].
    pub fn request_scrap(
        &mut self,
        item_id: i64,
        not_modified_since_us: Option<i64>,
        note: Option<&str>,
        actor: &Actor,
    ) -> Result<ScrapOutcome> {
        let _span = tracing::info_span!("request_scrap", item_id, actor_id = actor.id).entered();
        self.policy.authorize_role(actor, Operation::RequestScrap)?;
        self.unit_of_work(|conn, ctx| {
            workflow::review::request_scrap(conn, ctx, item_id, not_modified_since_us, note, actor)
        })
    }

    // -- item actions -----------------------------------------------------

    /// # Errors
    ///
    /// See [`workflow::item::acknowledge`].
    pub fn acknowledge_item(&mut self, item_id: i64, actor: &Actor) -> Result<Acknowledgement> {
        let _span = tracing::info_span!("acknowledge_item", item_id, actor_id = actor.id).entered();
        self.policy.authorize_role(actor, Operation::AcknowledgeItem)?;
        self.unit_of_work(|conn, ctx| workflow::item::acknowledge(conn, ctx, item_id, actor))
    }

    /// # Errors
    ///
    /// See [`workflow::item::edit`].
    pub fn edit_item(&mut self, item_id: i64, patch: &ItemPatch, actor: &Actor) -> Result<Item> {
        let _span = tracing::info_span!("edit_item", item_id, actor_id = actor.id).entered();
        self.policy.authorize_role(actor, Operation::EditItem)?;
        self.unit_of_work(|conn, ctx| workflow::item::edit(conn, ctx, item_id, patch, actor))
    }

    /// Returns the id of the `ITEM_DELETED` event.
    ///
    /// # Errors
    ///
    /// See [`workflow::item::soft_delete`].
    pub fn soft_delete_item(&mut self, item_id: i64, actor: &Actor) -> Result<i64> {
        let _span = tracing::info_span!("soft_delete_item", item_id, actor_id = actor.id).entered();
        self.policy.authorize_role(actor, Operation::SoftDeleteItem)?;
        self.unit_of_work(|conn, ctx| workflow::item::soft_delete(conn, ctx, item_id, actor))
    }

    // -- ingestion --------------------------------------------------------

    /// # Errors
    ///
    /// See [`ingest::ingest_item`].
    pub fn ingest_item(&mut self, item: &NewItem) -> Result<i64> {
        let _span = tracing::info_span!("ingest_item", line_id = item.line_id).entered();
        self.unit_of_work(|conn, ctx| ingest::ingest_item(conn, ctx.catalog, item, ctx.now_us))
    }

    /// # Errors
    ///
    /// See [`ingest::register_image`].
    pub fn register_image(&mut self, image: &NewImage) -> Result<i64> {
        let _span = tracing::info_span!("register_image", item_id = ?image.item_id).entered();
        self.unit_of_work(|conn, ctx| ingest::register_image(conn, image, ctx.now_us))
    }

    // -- readers ----------------------------------------------------------

    /// A live item with its current defect set.
    ///
    /// # Errors
    ///
    /// NotFound for a missing or soft-deleted item.
    pub fn get_item(&self, item_id: i64) -> Result<ItemDetail> {
        let item = query::fetch_item(&self.conn, item_id, false)?
            .ok_or(QcError::not_found(Entity::Item, item_id))?;
        let defects = query::item_defects(&self.conn, item_id)?;
        Ok(ItemDetail { item, defects })
    }

    /// Audit history, newest first.
    ///
    /// # Errors
    ///
    /// NotFound for a missing or soft-deleted item.
    pub fn item_history(&self, item_id: i64) -> Result<Vec<ItemEvent>> {
        if query::fetch_item(&self.conn, item_id, false)?.is_none() {
            return Err(QcError::not_found(Entity::Item, item_id));
        }
        query::item_events(&self.conn, item_id)
    }

    /// Images of a live item, optionally restricted to some kinds.
    ///
    /// # Errors
    ///
    /// NotFound for a missing or soft-deleted item.
    pub fn item_images(&self, item_id: i64, kinds: &[ImageKind]) -> Result<Vec<ItemImage>> {
        if query::fetch_item(&self.conn, item_id, false)?.is_none() {
            return Err(QcError::not_found(Entity::Item, item_id));
        }
        query::item_images(&self.conn, item_id, kinds)
    }

    /// # Errors
    ///
    /// NotFound if the request does not resolve.
    pub fn get_request(&self, request_id: i64) -> Result<StatusChangeRequest> {
        query::fetch_request(&self.conn, request_id)?
            .ok_or(QcError::not_found(Entity::Request, request_id))
    }

    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn list_requests(&self, filter: &query::RequestFilter) -> Result<query::RequestPage> {
        query::list_requests(&self.conn, filter)
    }

    /// # Errors
    ///
    /// NotFound if the review does not resolve.
    pub fn get_review(&self, review_id: i64) -> Result<Review> {
        query::fetch_review(&self.conn, review_id)?
            .ok_or(QcError::not_found(Entity::Review, review_id))
    }

    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn list_reviews(&self, filter: &query::ReviewFilter) -> Result<query::ReviewPage> {
        query::list_reviews(&self.conn, filter)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn defect_types(&self) -> Result<Vec<DefectTypeEntry>> {
        catalog::defect_types(&self.conn)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_by_number(&self, number: &str) -> Result<Option<i64>> {
        ingest::find_by_number(&self.conn, number)
    }
}

#[cfg(test)]
mod tests {
    use super::Engine;
    use crate::clock::FixedClock;
    use crate::error::ErrorCode;
    use crate::ingest::NewItem;
    use crate::model::{Actor, ItemStatusCode, Role, Station};
    use crate::policy::Policy;
    use crate::workflow::request::TransitionInput;
    use std::sync::Arc;

    fn engine() -> Engine {
        Engine::in_memory(Policy::default(), Arc::new(FixedClock::new(1_000))).expect("engine")
    }

    #[test]
    fn role_check_runs_before_any_write() {
        let mut engine = engine();
        let id = engine
            .ingest_item(&NewItem::new(Station::Roll, 1))
            .expect("ingest");

        let viewer = Actor::new(7, Role::Viewer, Some(1));
        let err = engine
            .submit_request(&TransitionInput::new(id, ItemStatusCode::Scrap), &viewer)
            .expect_err("viewer");
        assert_eq!(err.code(), ErrorCode::RoleNotPermitted);

        let err = engine
            .apply_transition(
                &TransitionInput::new(id, ItemStatusCode::Scrap),
                &Actor::operator(1, 1),
            )
            .expect_err("operator");
        assert_eq!(err.code(), ErrorCode::RoleNotPermitted);
    }

    #[test]
    fn failed_unit_of_work_rolls_back() {
        let mut engine = engine();
        let id = engine
            .ingest_item(&NewItem::new(Station::Roll, 1))
            .expect("ingest");
        let err = engine
            .apply_transition(
                &TransitionInput::new(id, ItemStatusCode::Defect).with_defects([1, 404]),
                &Actor::inspector(2, 1),
            )
            .expect_err("unknown defect");
        assert_eq!(err.code(), ErrorCode::UnknownDefectType);

        let detail = engine.get_item(id).expect("item");
        assert_eq!(detail.item.status, ItemStatusCode::Normal);
        assert!(detail.defects.is_empty());
        assert!(engine.item_history(id).expect("history").is_empty());
    }

    #[test]
    fn timestamps_come_from_the_clock() {
        let mut engine = engine();
        let id = engine
            .ingest_item(&NewItem::new(Station::Bundle, 1))
            .expect("ingest");
        let outcome = engine
            .apply_transition(
                &TransitionInput::new(id, ItemStatusCode::Recheck),
                &Actor::inspector(2, 1),
            )
            .expect("apply");
        assert_eq!(outcome.at_us, 1_000);
        assert_eq!(engine.get_item(id).expect("item").item.updated_at_us, 1_000);
    }
}
