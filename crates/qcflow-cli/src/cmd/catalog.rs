//! `qc catalog`: list item statuses and defect types.

use super::CmdCtx;
use crate::output::{pretty_rule, pretty_section, render_mode};
use anyhow::Result;
use qcflow_core::catalog::{DefectTypeEntry, StatusEntry};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
pub struct CatalogView<'a> {
    pub statuses: &'a [StatusEntry],
    pub defect_types: Vec<DefectTypeEntry>,
}

/// Execute `qc catalog`.
///
/// # Errors
///
/// Returns an error if the defect type query fails.
pub fn run_catalog(ctx: &CmdCtx) -> Result<()> {
    let view = CatalogView {
        statuses: ctx.engine.catalog().statuses(),
        defect_types: ctx.engine.defect_types()?,
    };
    render_mode(
        ctx.output,
        &view,
        |v, w| {
            for s in v.statuses {
                writeln!(w, "status\t{}\t{}\t{}", s.id, s.code, s.display_order)?;
            }
            for d in &v.defect_types {
                writeln!(
                    w,
                    "defect\t{}\t{}\t{}",
                    d.id,
                    d.code.as_deref().unwrap_or("-"),
                    d.name
                )?;
            }
            Ok(())
        },
        |v, w| {
            pretty_section(w, "Statuses")?;
            for s in v.statuses {
                let active = if s.is_active { "" } else { " (inactive)" };
                writeln!(w, "{:>3}  {:<14} {}{active}", s.id, s.code, s.name)?;
            }
            writeln!(w)?;
            pretty_section(w, "Defect types")?;
            for d in &v.defect_types {
                writeln!(
                    w,
                    "{:>3}  {:<14} {}",
                    d.id,
                    d.code.as_deref().unwrap_or("-"),
                    d.name
                )?;
            }
            pretty_rule(w)
        },
    )
}
