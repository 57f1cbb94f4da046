//! Reference catalogs: item statuses and defect types.
//!
//! Statuses are loaded once and resolved to [`ItemStatusCode`] at this
//! boundary. Defect types are validated against the table at call time so a
//! newly seeded type is usable without reloading.

use crate::db::query::push_placeholders;
use crate::error::{ErrorCode, QcError, Result};
use crate::model::ItemStatusCode;
use rusqlite::types::ToSql;
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub id: i64,
    pub code: ItemStatusCode,
    pub name: String,
    pub display_order: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefectTypeEntry {
    pub id: i64,
    pub code: Option<String>,
    pub name: String,
    pub display_order: i64,
    pub is_active: bool,
}

/// In-memory copy of the status catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    statuses: Vec<StatusEntry>,
    by_code: HashMap<ItemStatusCode, usize>,
}

impl Catalog {
    /// Load the status catalog. Rows with codes outside the state machine's
    /// vocabulary are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut stmt = conn.prepare(
            "SELECT status_id, code, name, display_order, is_active \
             FROM item_statuses ORDER BY display_order, code",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;

        let mut catalog = Self::default();
        for row in rows {
            let (id, raw_code, name, display_order, is_active) = row?;
            let Ok(code) = ItemStatusCode::from_str(&raw_code) else {
                tracing::warn!(status_id = id, code = %raw_code, "ignoring unknown status code");
                continue;
            };
            catalog.by_code.insert(code, catalog.statuses.len());
            catalog.statuses.push(StatusEntry {
                id,
                code,
                name,
                display_order,
                is_active,
            });
        }

        if catalog.statuses.is_empty() {
            return Err(QcError::validation(
                ErrorCode::NotInitialized,
                "status catalog is empty",
            ));
        }
        tracing::debug!(statuses = catalog.statuses.len(), "loaded status catalog");
        Ok(catalog)
    }

    #[must_use]
    pub fn statuses(&self) -> &[StatusEntry] {
        &self.statuses
    }

    #[must_use]
    pub fn entry(&self, code: ItemStatusCode) -> Option<&StatusEntry> {
        self.by_code.get(&code).map(|idx| &self.statuses[*idx])
    }

    /// Resolve a target status to its id. Unknown or inactive codes fail
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns [`QcError::ValidationFailed`] with [`ErrorCode::UnknownStatus`].
    pub fn status_id(&self, code: ItemStatusCode) -> Result<i64> {
        match self.entry(code) {
            Some(entry) if entry.is_active => Ok(entry.id),
            Some(_) => Err(QcError::validation(
                ErrorCode::UnknownStatus,
                format!("item status {code} is inactive"),
            )
            .with_details(json!({ "status": code }))),
            None => Err(QcError::validation(
                ErrorCode::UnknownStatus,
                format!("item status {code} is not in the catalog"),
            )
            .with_details(json!({ "status": code }))),
        }
    }

    /// Parse and resolve a raw status code.
    ///
    /// # Errors
    ///
    /// Returns [`QcError::ValidationFailed`] if the text is not a known code.
    pub fn resolve(&self, raw: &str) -> Result<(ItemStatusCode, i64)> {
        let code = ItemStatusCode::from_str(raw).map_err(|e| {
            QcError::validation(ErrorCode::UnknownStatus, e.to_string())
                .with_details(json!({ "status": raw }))
        })?;
        Ok((code, self.status_id(code)?))
    }
}

/// Sort and de-duplicate defect type ids, then require each to exist.
///
/// # Errors
///
/// Returns [`QcError::ValidationFailed`] with the unknown ids in `details`.
pub fn validate_defect_types(conn: &Connection, ids: &[i64]) -> Result<Vec<i64>> {
    let wanted: Vec<i64> = ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
    if wanted.is_empty() {
        return Ok(wanted);
    }

    let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();
    let placeholders = push_placeholders(&mut param_values, wanted.iter().copied());
    let sql = format!(
        "SELECT defect_type_id FROM defect_types \
         WHERE is_active = 1 AND defect_type_id IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn ToSql> = param_values.iter().map(AsRef::as_ref).collect();
    let found: BTreeSet<i64> = stmt
        .query_map(params_from_iter(params_ref), |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    let unknown: Vec<i64> = wanted.iter().copied().filter(|id| !found.contains(id)).collect();
    if !unknown.is_empty() {
        return Err(QcError::validation(
            ErrorCode::UnknownDefectType,
            format!("unknown defect type ids: {unknown:?}"),
        )
        .with_details(json!({ "unknown": unknown })));
    }
    Ok(wanted)
}

/// Active and inactive defect types in display order.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn defect_types(conn: &Connection) -> Result<Vec<DefectTypeEntry>> {
    let mut stmt = conn.prepare(
        "SELECT defect_type_id, code, name, display_order, is_active \
         FROM defect_types ORDER BY display_order, defect_type_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(DefectTypeEntry {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            display_order: row.get(3)?,
            is_active: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
