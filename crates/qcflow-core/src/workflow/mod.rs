//! Approval workflows layered over the Transition Executor.
//!
//! Every function here runs inside a unit of work opened by the caller
//! (see [`crate::guard::begin_exclusive`]) and takes the open transaction
//! as a `&Connection`. Nothing here commits.

pub mod item;
pub mod request;
pub mod review;

use crate::catalog::Catalog;
use crate::policy::Policy;

/// Shared, read-only inputs of one unit of work.
#[derive(Debug, Clone, Copy)]
pub struct Ctx<'a> {
    pub catalog: &'a Catalog,
    pub policy: &'a Policy,
    /// The single clock reading stamped on every row this unit writes.
    pub now_us: i64,
}

/// Append a decision note to existing text as `"{existing} | {note}"`.
fn merge_note(existing: Option<&str>, note: Option<&str>) -> Option<String> {
    let note = note.map(str::trim).filter(|n| !n.is_empty());
    let existing = existing.map(str::trim).filter(|e| !e.is_empty());
    match (existing, note) {
        (Some(existing), Some(note)) => Some(format!("{existing} | {note}")),
        (Some(existing), None) => Some(existing.to_string()),
        (None, Some(note)) => Some(note.to_string()),
        (None, None) => None,
    }
}
