//! `qc transition`: apply a status change directly (inspectors).

use super::CmdCtx;
use super::item::resolve_item;
use crate::output::render;
use anyhow::Result;
use clap::Args;
use qcflow_core::model::ItemStatusCode;
use qcflow_core::workflow::request::TransitionInput;
use std::io::Write;

#[derive(Args, Debug)]
pub struct TransitionArgs {
    /// Item id, or a roll/bundle number.
    pub item: String,

    /// Target status.
    #[arg(long)]
    pub to: ItemStatusCode,

    /// Defect type id (repeatable). Required when the target is DEFECT.
    #[arg(long = "defect")]
    pub defects: Vec<i64>,

    #[arg(long)]
    pub reason: Option<String>,
}

impl TransitionArgs {
    pub fn to_input(&self, item_id: i64) -> TransitionInput {
        let mut input = TransitionInput::new(item_id, self.to).with_defects(self.defects.clone());
        input.reason.clone_from(&self.reason);
        input
    }
}

/// Execute `qc transition`.
///
/// # Errors
///
/// Returns the core error if the transition is refused.
pub fn run_transition(args: &TransitionArgs, ctx: &mut CmdCtx) -> Result<()> {
    let item_id = resolve_item(ctx, &args.item)?;
    let actor = ctx.actor()?;
    let outcome = ctx.engine.apply_transition(&args.to_input(item_id), &actor)?;
    render(ctx.output, &outcome, |o, w| {
        writeln!(w, "item {}: {} -> {}", o.item_id, o.from, o.to)
    })
}
