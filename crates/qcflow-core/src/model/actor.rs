//! Authenticated caller identity.
//!
//! Authentication happens outside this crate. Every mutating operation
//! receives an [`Actor`] value and authorization becomes a pure function of
//! `(actor, item)`; nothing reads ambient session state.

use super::codes::ParseEnumError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Operator,
    Inspector,
    Viewer,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Operator => "OPERATOR",
            Self::Inspector => "INSPECTOR",
            Self::Viewer => "VIEWER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPERATOR" => Ok(Self::Operator),
            "INSPECTOR" | "QC" => Ok(Self::Inspector),
            "VIEWER" => Ok(Self::Viewer),
            _ => Err(ParseEnumError {
                expected: "role",
                got: s.to_string(),
            }),
        }
    }
}

/// The caller of a core operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    pub role: Role,
    /// Production line affiliation. Viewers may be unaffiliated.
    pub line_id: Option<i64>,
}

impl Actor {
    #[must_use]
    pub const fn new(id: i64, role: Role, line_id: Option<i64>) -> Self {
        Self { id, role, line_id }
    }

    #[must_use]
    pub const fn operator(id: i64, line_id: i64) -> Self {
        Self::new(id, Role::Operator, Some(line_id))
    }

    #[must_use]
    pub const fn inspector(id: i64, line_id: i64) -> Self {
        Self::new(id, Role::Inspector, Some(line_id))
    }

    #[must_use]
    pub const fn is_inspector(&self) -> bool {
        matches!(self.role, Role::Inspector)
    }
}

#[cfg(test)]
mod tests {
    use super::{Actor, Role};
    use std::str::FromStr;

    #[test]
    fn role_parses_aliases() {
        assert_eq!(Role::from_str("qc").unwrap(), Role::Inspector);
        assert_eq!(Role::from_str("Operator").unwrap(), Role::Operator);
        assert!(Role::from_str("admin").is_err());
    }

    #[test]
    fn constructors_set_line() {
        let actor = Actor::inspector(9, 3);
        assert!(actor.is_inspector());
        assert_eq!(actor.line_id, Some(3));
        assert!(!Actor::operator(1, 3).is_inspector());
    }
}
