use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Disposition vocabulary. Validated once at the catalog boundary; nothing
/// past that boundary compares raw status strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatusCode {
    Normal,
    Defect,
    Scrap,
    Recheck,
    QcPassed,
    Rejected,
    LeftoverRoll,
}

impl ItemStatusCode {
    /// Every status the state machine knows about.
    pub const ALL: [Self; 7] = [
        Self::Normal,
        Self::Defect,
        Self::Scrap,
        Self::Recheck,
        Self::QcPassed,
        Self::Rejected,
        Self::LeftoverRoll,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Defect => "DEFECT",
            Self::Scrap => "SCRAP",
            Self::Recheck => "RECHECK",
            Self::QcPassed => "QC_PASSED",
            Self::Rejected => "REJECTED",
            Self::LeftoverRoll => "LEFTOVER_ROLL",
        }
    }

    /// `true` for statuses that carry a defect set.
    #[must_use]
    pub const fn requires_defects(self) -> bool {
        matches!(self, Self::Defect)
    }
}

/// Physical station an item was detected at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Station {
    Roll,
    Bundle,
}

impl Station {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Roll => "ROLL",
            Self::Bundle => "BUNDLE",
        }
    }
}

/// Lifecycle of both status-change requests and reviews.
///
/// `PENDING -> APPROVED` or `PENDING -> REJECTED`; both outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Pending,
    Approved,
    Rejected,
}

impl ReviewState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// An inspector's verdict on a request or review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    /// The terminal state a pending record moves to under this decision.
    #[must_use]
    pub const fn resulting_state(self) -> ReviewState {
        match self {
            Self::Approved => ReviewState::Approved,
            Self::Rejected => ReviewState::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewType {
    DefectFix,
    ScrapFromRecheck,
    RequestStatusChange,
}

impl ReviewType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DefectFix => "DEFECT_FIX",
            Self::ScrapFromRecheck => "SCRAP_FROM_RECHECK",
            Self::RequestStatusChange => "REQUEST_STATUS_CHANGE",
        }
    }
}

/// Evidence classification for an item image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageKind {
    Detected,
    Fix,
    Other,
}

impl ImageKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Detected => "DETECTED",
            Self::Fix => "FIX",
            Self::Other => "OTHER",
        }
    }
}

/// Error returned when parsing a vocabulary value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

impl fmt::Display for ItemStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ReviewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ReviewType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_uppercase().replace('-', "_")
}

impl FromStr for ItemStatusCode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == normalized)
            .ok_or_else(|| ParseEnumError {
                expected: "item status",
                got: s.to_string(),
            })
    }
}

impl FromStr for Station {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "ROLL" => Ok(Self::Roll),
            "BUNDLE" => Ok(Self::Bundle),
            _ => Err(ParseEnumError {
                expected: "station",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for ReviewState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "PENDING" => Ok(Self::Pending),
            "APPROVED" => Ok(Self::Approved),
            "REJECTED" => Ok(Self::Rejected),
            _ => Err(ParseEnumError {
                expected: "review state",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Decision {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "APPROVED" | "APPROVE" => Ok(Self::Approved),
            "REJECTED" | "REJECT" => Ok(Self::Rejected),
            _ => Err(ParseEnumError {
                expected: "decision",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for ReviewType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "DEFECT_FIX" => Ok(Self::DefectFix),
            "SCRAP_FROM_RECHECK" => Ok(Self::ScrapFromRecheck),
            "REQUEST_STATUS_CHANGE" => Ok(Self::RequestStatusChange),
            _ => Err(ParseEnumError {
                expected: "review type",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for ImageKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "DETECTED" => Ok(Self::Detected),
            "FIX" => Ok(Self::Fix),
            "OTHER" => Ok(Self::Other),
            _ => Err(ParseEnumError {
                expected: "image kind",
                got: s.to_string(),
            }),
        }
    }
}

/// Column adapters so rows decode straight into the vocabulary types.
macro_rules! sql_text_enum {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl rusqlite::types::ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                    Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
                }
            }

            impl rusqlite::types::FromSql for $ty {
                fn column_result(
                    value: rusqlite::types::ValueRef<'_>,
                ) -> rusqlite::types::FromSqlResult<Self> {
                    let text = value.as_str()?;
                    text.parse()
                        .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
                }
            }
        )+
    };
}

sql_text_enum!(ItemStatusCode, Station, ReviewState, ReviewType, ImageKind);

#[cfg(test)]
mod tests {
    use super::{Decision, ImageKind, ItemStatusCode, ReviewState, ReviewType, Station};
    use std::str::FromStr;

    #[test]
    fn status_codes_use_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&ItemStatusCode::QcPassed).unwrap(),
            "\"QC_PASSED\""
        );
        assert_eq!(
            serde_json::from_str::<ItemStatusCode>("\"LEFTOVER_ROLL\"").unwrap(),
            ItemStatusCode::LeftoverRoll
        );
        for code in ItemStatusCode::ALL {
            assert_eq!(ItemStatusCode::from_str(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn parse_is_case_and_dash_tolerant() {
        assert_eq!(
            ItemStatusCode::from_str(" qc-passed ").unwrap(),
            ItemStatusCode::QcPassed
        );
        assert_eq!(Station::from_str("bundle").unwrap(), Station::Bundle);
        assert_eq!(Decision::from_str("approve").unwrap(), Decision::Approved);
        assert_eq!(
            ReviewType::from_str("scrap-from-recheck").unwrap(),
            ReviewType::ScrapFromRecheck
        );
        assert_eq!(ImageKind::from_str("fix").unwrap(), ImageKind::Fix);
    }

    #[test]
    fn parse_rejects_unknown_values() {
        assert!(ItemStatusCode::from_str("BROKEN").is_err());
        assert!(Station::from_str("pallet").is_err());
        assert!(ReviewState::from_str("DONE").is_err());
        assert!(Decision::from_str("maybe").is_err());
    }

    #[test]
    fn decision_maps_to_terminal_state() {
        assert_eq!(
            Decision::Approved.resulting_state(),
            ReviewState::Approved
        );
        assert!(Decision::Rejected.resulting_state().is_terminal());
        assert!(!ReviewState::Pending.is_terminal());
    }
}
