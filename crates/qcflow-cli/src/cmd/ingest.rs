//! `qc ingest`: record a detected roll or bundle.

use super::CmdCtx;
use super::item::render_item_detail;
use anyhow::{Context as _, Result};
use clap::Args;
use qcflow_core::ingest::NewItem;
use qcflow_core::model::{ItemStatusCode, Station};

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Detection station: roll or bundle.
    #[arg(long)]
    pub station: Station,

    /// Production line of the item (defaults to --line).
    #[arg(long = "item-line")]
    pub item_line: Option<i64>,

    /// Roll or bundle number, depending on the station.
    #[arg(long)]
    pub number: Option<String>,

    #[arg(long)]
    pub product: Option<String>,

    #[arg(long = "job-order")]
    pub job_order: Option<String>,

    #[arg(long = "roll-id")]
    pub roll_id: Option<String>,

    #[arg(long)]
    pub width: Option<f64>,

    /// Initial status (default NORMAL).
    #[arg(long)]
    pub status: Option<ItemStatusCode>,

    /// Defect type id (repeatable). Required when the status is DEFECT.
    #[arg(long = "defect")]
    pub defects: Vec<i64>,

    /// Detection note from the vision system.
    #[arg(long)]
    pub note: Option<String>,

    /// Detection time in epoch microseconds (default now).
    #[arg(long = "detected-at-us")]
    pub detected_at_us: Option<i64>,
}

impl IngestArgs {
    fn to_new_item(&self, fallback_line: Option<i64>) -> Result<NewItem> {
        let line_id = self
            .item_line
            .or(fallback_line)
            .context("ingest needs --item-line or --line")?;
        let mut item = NewItem::new(self.station, line_id).with_defects(self.defects.clone());
        if let Some(number) = &self.number {
            item = item.with_number(number.clone());
        }
        if let Some(product) = &self.product {
            item = item.with_product(product.clone());
        }
        item.status = self.status;
        item.job_order_number.clone_from(&self.job_order);
        item.roll_id.clone_from(&self.roll_id);
        item.roll_width = self.width;
        item.ai_note.clone_from(&self.note);
        item.detected_at_us = self.detected_at_us;
        Ok(item)
    }
}

/// Execute `qc ingest`.
///
/// # Errors
///
/// Returns an error if the item is invalid or cannot be stored.
pub fn run_ingest(args: &IngestArgs, ctx: &mut CmdCtx) -> Result<()> {
    let new_item = args.to_new_item(ctx.actor.line)?;
    let id = ctx.engine.ingest_item(&new_item)?;
    let detail = ctx.engine.get_item(id)?;
    render_item_detail(ctx, &detail)
}
