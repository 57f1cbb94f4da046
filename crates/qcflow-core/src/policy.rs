//! Authorization and fast-path rules as one explicit table.
//!
//! Authorization is a pure function of `(actor, operation, item line)`.
//! Which submissions skip the inspector gate is decided here and nowhere
//! else.

use crate::config::PolicyConfig;
use crate::error::{ErrorCode, QcError, Result};
use crate::model::{Actor, ItemStatusCode, Role};
use std::fmt;

/// Mutating operations subject to the role matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ApplyTransition,
    SubmitRequest,
    DecideRequest,
    SubmitFixRequest,
    DecideReview,
    RequestScrap,
    AcknowledgeItem,
    EditItem,
    SoftDeleteItem,
}

impl Operation {
    const fn allowed_roles(self) -> &'static [Role] {
        match self {
            Self::ApplyTransition
            | Self::DecideRequest
            | Self::DecideReview
            | Self::SoftDeleteItem => &[Role::Inspector],
            Self::SubmitRequest
            | Self::SubmitFixRequest
            | Self::RequestScrap
            | Self::AcknowledgeItem
            | Self::EditItem => &[Role::Operator, Role::Inspector],
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApplyTransition => "apply_transition",
            Self::SubmitRequest => "submit_request",
            Self::DecideRequest => "decide_request",
            Self::SubmitFixRequest => "submit_fix_request",
            Self::DecideReview => "decide_review",
            Self::RequestScrap => "request_scrap",
            Self::AcknowledgeItem => "acknowledge_item",
            Self::EditItem => "edit_item",
            Self::SoftDeleteItem => "soft_delete_item",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Policy {
    config: PolicyConfig,
}

impl Policy {
    #[must_use]
    pub const fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Check the role matrix. Runs before any row is touched.
    ///
    /// # Errors
    ///
    /// Returns [`QcError::Forbidden`] with [`ErrorCode::RoleNotPermitted`].
    pub fn authorize_role(&self, actor: &Actor, op: Operation) -> Result<()> {
        if op.allowed_roles().contains(&actor.role) {
            return Ok(());
        }
        tracing::warn!(actor_id = actor.id, role = %actor.role, op = %op, "role not permitted");
        Err(QcError::forbidden(
            ErrorCode::RoleNotPermitted,
            format!("role {} may not {op}", actor.role),
        ))
    }

    /// Same-line rule for mutations, checked once the item is locked.
    ///
    /// # Errors
    ///
    /// Returns [`QcError::Forbidden`] with [`ErrorCode::CrossLine`].
    pub fn authorize_line(&self, actor: &Actor, op: Operation, item_line_id: i64) -> Result<()> {
        if !self.config.enforce_same_line || actor.line_id == Some(item_line_id) {
            return Ok(());
        }
        tracing::warn!(
            actor_id = actor.id,
            actor_line = ?actor.line_id,
            item_line = item_line_id,
            op = %op,
            "cross-line mutation refused"
        );
        Err(QcError::forbidden(
            ErrorCode::CrossLine,
            format!("item belongs to line {item_line_id}"),
        ))
    }

    /// Whether a submitted request applies immediately.
    #[must_use]
    pub fn auto_applies(&self, actor: &Actor, target: ItemStatusCode) -> bool {
        self.config.auto_apply_targets.contains(&target)
            || (self.config.inspector_auto_apply && actor.is_inspector())
    }

    /// Whether a fix request may be opened from `status`.
    #[must_use]
    pub fn fix_eligible(&self, status: ItemStatusCode) -> bool {
        self.config.fix_eligible.contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::{Operation, Policy};
    use crate::config::PolicyConfig;
    use crate::error::ErrorCode;
    use crate::model::{Actor, ItemStatusCode, Role};

    #[test]
    fn role_matrix() {
        let policy = Policy::default();
        let operator = Actor::operator(1, 3);
        let inspector = Actor::inspector(2, 3);
        let viewer = Actor::new(3, Role::Viewer, None);

        assert!(policy.authorize_role(&operator, Operation::SubmitRequest).is_ok());
        assert!(policy.authorize_role(&operator, Operation::SubmitFixRequest).is_ok());
        assert!(policy.authorize_role(&operator, Operation::RequestScrap).is_ok());
        assert!(policy.authorize_role(&operator, Operation::EditItem).is_ok());
        assert!(policy.authorize_role(&viewer, Operation::EditItem).is_err());
        assert!(policy.authorize_role(&inspector, Operation::DecideRequest).is_ok());
        assert!(policy.authorize_role(&inspector, Operation::ApplyTransition).is_ok());

        let err = policy
            .authorize_role(&operator, Operation::DecideReview)
            .expect_err("operators cannot decide");
        assert_eq!(err.code(), ErrorCode::RoleNotPermitted);
        assert!(policy.authorize_role(&viewer, Operation::SubmitRequest).is_err());
        assert!(policy.authorize_role(&operator, Operation::ApplyTransition).is_err());
    }

    #[test]
    fn same_line_rule_can_be_disabled() {
        let strict = Policy::default();
        let actor = Actor::operator(1, 3);
        assert!(strict.authorize_line(&actor, Operation::SubmitRequest, 3).is_ok());
        let err = strict
            .authorize_line(&actor, Operation::SubmitRequest, 4)
            .expect_err("other line");
        assert_eq!(err.code(), ErrorCode::CrossLine);

        let relaxed = Policy::new(PolicyConfig {
            enforce_same_line: false,
            ..PolicyConfig::default()
        });
        assert!(relaxed.authorize_line(&actor, Operation::SubmitRequest, 4).is_ok());
    }

    #[test]
    fn fast_path_table() {
        let policy = Policy::default();
        let operator = Actor::operator(1, 3);
        let inspector = Actor::inspector(2, 3);

        assert!(policy.auto_applies(&operator, ItemStatusCode::LeftoverRoll));
        assert!(!policy.auto_applies(&operator, ItemStatusCode::Defect));
        assert!(policy.auto_applies(&inspector, ItemStatusCode::Scrap));

        let no_inspector_shortcut = Policy::new(PolicyConfig {
            inspector_auto_apply: false,
            auto_apply_targets: vec![ItemStatusCode::Defect],
            ..PolicyConfig::default()
        });
        assert!(!no_inspector_shortcut.auto_applies(&inspector, ItemStatusCode::Scrap));
        assert!(no_inspector_shortcut.auto_applies(&operator, ItemStatusCode::Defect));
    }

    #[test]
    fn fix_eligibility_follows_config() {
        let policy = Policy::default();
        assert!(policy.fix_eligible(ItemStatusCode::Defect));
        assert!(policy.fix_eligible(ItemStatusCode::Recheck));
        assert!(policy.fix_eligible(ItemStatusCode::Rejected));
        assert!(!policy.fix_eligible(ItemStatusCode::Normal));
        assert!(!policy.fix_eligible(ItemStatusCode::QcPassed));
    }
}
