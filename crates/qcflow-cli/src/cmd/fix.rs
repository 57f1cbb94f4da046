//! `qc fix`: submit a defect-fix request with evidence images.

use super::item::resolve_item;
use super::review::render_review;
use super::{CmdCtx, parse_instant};
use anyhow::Result;
use clap::Args;
use qcflow_core::workflow::review::FixRequest;

#[derive(Args, Debug)]
pub struct FixArgs {
    /// Item id, or a roll/bundle number.
    pub item: String,

    /// Evidence image id (repeatable, at least one).
    #[arg(long = "image", required = true)]
    pub images: Vec<i64>,

    #[arg(long)]
    pub note: Option<String>,

    /// Refuse if the item changed after this instant (RFC 3339 or epoch µs).
    #[arg(long, value_parser = parse_instant)]
    pub since: Option<i64>,
}

/// # Errors
///
/// Returns the core error if the fix request is refused.
pub fn run_fix(args: &FixArgs, ctx: &mut CmdCtx) -> Result<()> {
    let item_id = resolve_item(ctx, &args.item)?;
    let actor = ctx.actor()?;
    let request = FixRequest {
        item_id,
        image_ids: args.images.clone(),
        note: args.note.clone(),
        not_modified_since_us: args.since,
    };
    let review = ctx.engine.submit_fix_request(&request, &actor)?;
    render_review(ctx, &review)
}
