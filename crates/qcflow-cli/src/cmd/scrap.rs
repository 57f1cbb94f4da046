//! `qc scrap`: confirm a scrapped item or send a RECHECK item to scrap.

use super::item::resolve_item;
use super::{CmdCtx, parse_instant};
use crate::output::render;
use anyhow::Result;
use clap::Args;
use qcflow_core::workflow::review::ScrapOutcome;
use std::io::Write;

#[derive(Args, Debug)]
pub struct ScrapArgs {
    /// Item id, or a roll/bundle number.
    pub item: String,

    #[arg(long)]
    pub note: Option<String>,

    /// Refuse if the item changed after this instant (RFC 3339 or epoch µs).
    #[arg(long, value_parser = parse_instant)]
    pub since: Option<i64>,
}

/// # Errors
///
/// Returns the core error if the item is not SCRAP or RECHECK.
pub fn run_scrap(args: &ScrapArgs, ctx: &mut CmdCtx) -> Result<()> {
    let item_id = resolve_item(ctx, &args.item)?;
    let actor = ctx.actor()?;
    let outcome = ctx
        .engine
        .request_scrap(item_id, args.since, args.note.as_deref(), &actor)?;
    render(ctx.output, &outcome, |o, w| match o {
        ScrapOutcome::Confirmed { item_id, .. } => {
            writeln!(w, "item {item_id}: scrap confirmed")
        }
        ScrapOutcome::ReviewOpened {
            item_id, review_id, ..
        } => writeln!(w, "item {item_id}: moved to SCRAP, review {review_id} awaits QC"),
    })
}
