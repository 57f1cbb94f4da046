use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;

/// Machine-readable error codes for callers that branch on failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    ItemNotFound,
    RequestNotFound,
    ReviewNotFound,
    InvalidInput,
    UnknownStatus,
    UnknownDefectType,
    MissingDefectTypes,
    InvalidImages,
    StatusNotEligible,
    PendingRequestExists,
    PendingReviewExists,
    ImageLinkRace,
    StaleRequest,
    NoOpTransition,
    AlreadyDecided,
    UniqueViolation,
    RoleNotPermitted,
    CrossLine,
    ModifiedSince,
    StorageFailure,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::ItemNotFound => "E2001",
            Self::RequestNotFound => "E2002",
            Self::ReviewNotFound => "E2003",
            Self::InvalidInput => "E3001",
            Self::UnknownStatus => "E3002",
            Self::UnknownDefectType => "E3003",
            Self::MissingDefectTypes => "E3004",
            Self::InvalidImages => "E3005",
            Self::StatusNotEligible => "E3006",
            Self::PendingRequestExists => "E4001",
            Self::PendingReviewExists => "E4002",
            Self::ImageLinkRace => "E4003",
            Self::StaleRequest => "E4004",
            Self::NoOpTransition => "E4005",
            Self::AlreadyDecided => "E4006",
            Self::UniqueViolation => "E4007",
            Self::RoleNotPermitted => "E5001",
            Self::CrossLine => "E5002",
            Self::ModifiedSince => "E6001",
            Self::StorageFailure => "E9001",
            Self::InternalUnexpected => "E9002",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Database not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::ItemNotFound => "Item not found",
            Self::RequestNotFound => "Status-change request not found",
            Self::ReviewNotFound => "Review not found",
            Self::InvalidInput => "Invalid input",
            Self::UnknownStatus => "Unknown item status",
            Self::UnknownDefectType => "Unknown defect type",
            Self::MissingDefectTypes => "Defect types required",
            Self::InvalidImages => "Invalid image selection",
            Self::StatusNotEligible => "Item status not eligible",
            Self::PendingRequestExists => "Item already has a pending request",
            Self::PendingReviewExists => "The fix request has been submitted",
            Self::ImageLinkRace => "Images changed concurrently",
            Self::StaleRequest => "Item status changed since the request was made",
            Self::NoOpTransition => "Item already has the target status",
            Self::AlreadyDecided => "Already processed",
            Self::UniqueViolation => "Uniqueness constraint violated",
            Self::RoleNotPermitted => "Role not permitted",
            Self::CrossLine => "Item belongs to another line",
            Self::ModifiedSince => "Item modified since the supplied token",
            Self::StorageFailure => "Storage failure",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `qc init` to create the database."),
            Self::ConfigParseError => Some("Fix syntax in qcflow.toml and retry."),
            Self::ItemNotFound | Self::RequestNotFound | Self::ReviewNotFound => None,
            Self::InvalidInput => Some("Check the command arguments and retry."),
            Self::UnknownStatus => Some(
                "Use one of NORMAL, DEFECT, SCRAP, RECHECK, QC_PASSED, REJECTED, LEFTOVER_ROLL.",
            ),
            Self::UnknownDefectType => Some("List defect types with `qc catalog`."),
            Self::MissingDefectTypes => {
                Some("Pass at least one defect type when moving an item into DEFECT.")
            }
            Self::InvalidImages => Some("Select images of this item that are not yet linked."),
            Self::StatusNotEligible => Some("Check the item's current status first."),
            Self::PendingRequestExists => Some("Wait for an inspector to decide the open request."),
            Self::PendingReviewExists => Some("Wait for an inspector to decide the open review."),
            Self::ImageLinkRace | Self::UniqueViolation => {
                Some("Re-read the item and retry the submission.")
            }
            Self::StaleRequest => Some("Reject this request and submit a new one."),
            Self::NoOpTransition => None,
            Self::AlreadyDecided => Some("The decision is final; submit a new request instead."),
            Self::RoleNotPermitted => Some("Ask an inspector to perform this action."),
            Self::CrossLine => Some("Only actors on the item's line may change it."),
            Self::ModifiedSince => Some("Reload the item and retry with a fresh token."),
            Self::StorageFailure => Some("Check that the database file is reachable and writable."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Coarse routing for callers: fix the input, try again, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    FixInput,
    Retry,
    Gone,
    Internal,
}

impl ErrorClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FixInput => "fix_input",
            Self::Retry => "retry",
            Self::Gone => "gone",
            Self::Internal => "internal",
        }
    }
}

/// Kind of record a lookup failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Item,
    Request,
    Review,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Item => "item",
            Self::Request => "request",
            Self::Review => "review",
        })
    }
}

/// Failure of a core operation. Every variant leaves the database unchanged.
#[derive(Debug, thiserror::Error)]
pub enum QcError {
    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: i64 },

    #[error("{message}")]
    ValidationFailed {
        code: ErrorCode,
        message: String,
        details: Value,
    },

    #[error("{message}")]
    Conflict {
        code: ErrorCode,
        message: String,
        details: Value,
    },

    #[error("{message}")]
    Forbidden { code: ErrorCode, message: String },

    #[error(
        "item {item_id} was modified at {modified_at_us}, after the supplied token {not_modified_since_us}"
    )]
    PreconditionFailed {
        item_id: i64,
        modified_at_us: i64,
        not_modified_since_us: i64,
    },

    #[error("storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = QcError> = std::result::Result<T, E>;

impl QcError {
    #[must_use]
    pub const fn not_found(entity: Entity, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            code,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn conflict(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn forbidden(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Forbidden {
            code,
            message: message.into(),
        }
    }

    /// Attach a structured payload to a validation or conflict error.
    #[must_use]
    pub fn with_details(mut self, value: Value) -> Self {
        if let Self::ValidationFailed { details, .. } | Self::Conflict { details, .. } = &mut self {
            *details = value;
        }
        self
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { entity, .. } => match entity {
                Entity::Item => ErrorCode::ItemNotFound,
                Entity::Request => ErrorCode::RequestNotFound,
                Entity::Review => ErrorCode::ReviewNotFound,
            },
            Self::ValidationFailed { code, .. }
            | Self::Conflict { code, .. }
            | Self::Forbidden { code, .. } => *code,
            Self::PreconditionFailed { .. } => ErrorCode::ModifiedSince,
            Self::Storage(_) => ErrorCode::StorageFailure,
            Self::Internal(_) => ErrorCode::InternalUnexpected,
        }
    }

    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::ValidationFailed { .. } | Self::Forbidden { .. } => ErrorClass::FixInput,
            Self::Conflict { .. } | Self::PreconditionFailed { .. } => ErrorClass::Retry,
            Self::NotFound { .. } => ErrorClass::Gone,
            Self::Storage(_) | Self::Internal(_) => ErrorClass::Internal,
        }
    }

    #[must_use]
    pub fn details(&self) -> Value {
        match self {
            Self::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
            Self::ValidationFailed { details, .. } | Self::Conflict { details, .. } => {
                details.clone()
            }
            Self::PreconditionFailed {
                item_id,
                modified_at_us,
                not_modified_since_us,
            } => json!({
                "item_id": item_id,
                "modified_at_us": modified_at_us,
                "not_modified_since_us": not_modified_since_us,
            }),
            Self::Forbidden { .. } | Self::Storage(_) | Self::Internal(_) => Value::Null,
        }
    }

    /// Serializable summary for transports.
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        let code = self.code();
        ErrorReport {
            code: code.code(),
            class: self.class(),
            message: self.to_string(),
            hint: code.hint(),
            details: self.details(),
        }
    }
}

impl From<rusqlite::Error> for QcError {
    fn from(err: rusqlite::Error) -> Self {
        let is_unique = err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation)
            && err.to_string().contains("UNIQUE");
        if is_unique {
            tracing::warn!(error = %err, "uniqueness constraint rejected write");
            return Self::Conflict {
                code: ErrorCode::UniqueViolation,
                message: ErrorCode::UniqueViolation.message().to_string(),
                details: json!({ "constraint": err.to_string() }),
            };
        }
        Self::Storage(err)
    }
}

/// Wire shape of a [`QcError`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub class: ErrorClass,
    pub message: String,
    pub hint: Option<&'static str>,
    pub details: Value,
}

#[cfg(test)]
mod tests {
    use super::{Entity, ErrorClass, ErrorCode, QcError};
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::NotInitialized,
            ErrorCode::ConfigParseError,
            ErrorCode::ItemNotFound,
            ErrorCode::RequestNotFound,
            ErrorCode::ReviewNotFound,
            ErrorCode::InvalidInput,
            ErrorCode::UnknownStatus,
            ErrorCode::UnknownDefectType,
            ErrorCode::MissingDefectTypes,
            ErrorCode::InvalidImages,
            ErrorCode::StatusNotEligible,
            ErrorCode::PendingRequestExists,
            ErrorCode::PendingReviewExists,
            ErrorCode::ImageLinkRace,
            ErrorCode::StaleRequest,
            ErrorCode::NoOpTransition,
            ErrorCode::AlreadyDecided,
            ErrorCode::UniqueViolation,
            ErrorCode::RoleNotPermitted,
            ErrorCode::CrossLine,
            ErrorCode::ModifiedSince,
            ErrorCode::StorageFailure,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::StaleRequest.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code[1..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn classes_separate_input_retry_and_gone() {
        assert_eq!(
            QcError::validation(ErrorCode::MissingDefectTypes, "x").class(),
            ErrorClass::FixInput
        );
        assert_eq!(
            QcError::forbidden(ErrorCode::CrossLine, "x").class(),
            ErrorClass::FixInput
        );
        assert_eq!(
            QcError::conflict(ErrorCode::StaleRequest, "x").class(),
            ErrorClass::Retry
        );
        assert_eq!(
            QcError::PreconditionFailed {
                item_id: 1,
                modified_at_us: 2,
                not_modified_since_us: 1,
            }
            .class(),
            ErrorClass::Retry
        );
        assert_eq!(
            QcError::not_found(Entity::Review, 4).class(),
            ErrorClass::Gone
        );
    }

    #[test]
    fn report_carries_details() {
        let err = QcError::conflict(ErrorCode::PendingRequestExists, "pending")
            .with_details(json!({ "request_id": 12 }));
        let report = err.report();
        assert_eq!(report.code, "E4001");
        assert_eq!(report.details["request_id"], 12);
        assert_eq!(
            QcError::not_found(Entity::Item, 3).to_string(),
            "item 3 not found"
        );
    }

    #[test]
    fn unique_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        conn.execute_batch("CREATE TABLE t (x INTEGER UNIQUE); INSERT INTO t VALUES (1);")
            .expect("setup");
        let err = conn
            .execute("INSERT INTO t VALUES (1)", [])
            .expect_err("duplicate insert");
        let mapped = QcError::from(err);
        assert_eq!(mapped.code(), ErrorCode::UniqueViolation);
        assert_eq!(mapped.class(), ErrorClass::Retry);
    }
}
