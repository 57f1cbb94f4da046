//! `qc item`: show, history, images, acknowledge, edit, delete.

use super::CmdCtx;
use crate::output::{or_dash, pretty_kv, pretty_rule, pretty_section, render, render_mode};
use anyhow::Result;
use clap::{Args, Subcommand};
use qcflow_core::model::{ImageKind, ItemDetail};
use qcflow_core::workflow::item::ItemPatch;
use serde_json::json;
use std::io::Write;

#[derive(Subcommand, Debug)]
pub enum ItemCommand {
    /// Show an item with its status and defect set.
    Show(ItemRef),
    /// Audit history, newest first.
    History(ItemRef),
    /// Images attached to an item.
    Images(ImagesArgs),
    /// Acknowledge an item (idempotent).
    Ack(ItemRef),
    /// Correct descriptive fields. An empty string clears a text field.
    Edit(EditArgs),
    /// Soft-delete an item (inspector only).
    Delete(ItemRef),
}

#[derive(Args, Debug)]
pub struct ItemRef {
    /// Item id, or a roll/bundle number.
    pub item: String,
}

#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Item id, or a roll/bundle number.
    pub item: String,

    /// Only these kinds (repeatable): detected, fix, other.
    #[arg(long = "kind")]
    pub kinds: Vec<ImageKind>,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Item id, or a roll/bundle number.
    pub item: String,

    #[arg(long)]
    pub product_code: Option<String>,

    #[arg(long)]
    pub roll_number: Option<String>,

    #[arg(long)]
    pub bundle_number: Option<String>,

    #[arg(long = "job-order")]
    pub job_order_number: Option<String>,

    #[arg(long)]
    pub roll_id: Option<String>,

    /// Width, rounded to hundredths.
    #[arg(long, allow_negative_numbers = true, conflicts_with = "clear_roll_width")]
    pub roll_width: Option<f64>,

    /// Remove the recorded roll width.
    #[arg(long)]
    pub clear_roll_width: bool,
}

impl EditArgs {
    #[must_use]
    pub fn to_patch(&self) -> ItemPatch {
        let text = |value: Option<&String>| value.cloned().map(Some);
        ItemPatch {
            product_code: text(self.product_code.as_ref()),
            roll_number: text(self.roll_number.as_ref()),
            bundle_number: text(self.bundle_number.as_ref()),
            job_order_number: text(self.job_order_number.as_ref()),
            roll_id: text(self.roll_id.as_ref()),
            roll_width: if self.clear_roll_width {
                Some(None)
            } else {
                self.roll_width.map(Some)
            },
        }
    }
}

/// Resolve an item argument: a numeric id, else a roll or bundle number.
///
/// # Errors
///
/// Returns an error if nothing matches.
pub fn resolve_item(ctx: &CmdCtx, raw: &str) -> Result<i64> {
    if let Ok(id) = raw.trim().parse::<i64>() {
        return Ok(id);
    }
    ctx.engine
        .find_by_number(raw.trim())?
        .ok_or_else(|| anyhow::anyhow!("no item with number '{}'", raw.trim()))
}

/// # Errors
///
/// Returns an error if the command fails or output cannot be written.
pub fn run_item(command: &ItemCommand, ctx: &mut CmdCtx) -> Result<()> {
    match command {
        ItemCommand::Show(args) => {
            let id = resolve_item(ctx, &args.item)?;
            let detail = ctx.engine.get_item(id)?;
            render_item_detail(ctx, &detail)
        }
        ItemCommand::History(args) => {
            let id = resolve_item(ctx, &args.item)?;
            let events = ctx.engine.item_history(id)?;
            render_mode(
                ctx.output,
                &events,
                |events, w| {
                    for e in events {
                        writeln!(
                            w,
                            "{}\t{}\t{}\t{}\t{}\t{}",
                            e.id,
                            e.created_at_us,
                            e.event_type,
                            or_dash(e.from_status),
                            or_dash(e.to_status),
                            or_dash(e.actor_id)
                        )?;
                    }
                    Ok(())
                },
                |events, w| {
                    pretty_section(w, &format!("History of item {id}"))?;
                    for e in events {
                        writeln!(
                            w,
                            "{}  {:<22} {} -> {}  by {}",
                            ctx.ts(e.created_at_us),
                            e.event_type,
                            or_dash(e.from_status),
                            or_dash(e.to_status),
                            or_dash(e.actor_id)
                        )?;
                    }
                    pretty_rule(w)
                },
            )
        }
        ItemCommand::Images(args) => {
            let id = resolve_item(ctx, &args.item)?;
            let images = ctx.engine.item_images(id, &args.kinds)?;
            render(ctx.output, &images, |images, w| {
                for i in images {
                    writeln!(
                        w,
                        "{}\t{}\t{}\t{}",
                        i.id,
                        i.kind,
                        or_dash(i.review_id),
                        i.path
                    )?;
                }
                Ok(())
            })
        }
        ItemCommand::Ack(args) => {
            let id = resolve_item(ctx, &args.item)?;
            let actor = ctx.actor()?;
            let ack = ctx.engine.acknowledge_item(id, &actor)?;
            render(ctx.output, &ack, |a, w| {
                if a.changed {
                    writeln!(w, "acknowledged item {}", a.item_id)
                } else {
                    writeln!(
                        w,
                        "item {} was already acknowledged by {} at {}",
                        a.item_id,
                        a.acknowledged_by,
                        ctx.ts(a.acknowledged_at_us)
                    )
                }
            })
        }
        ItemCommand::Edit(args) => {
            let id = resolve_item(ctx, &args.item)?;
            let actor = ctx.actor()?;
            ctx.engine.edit_item(id, &args.to_patch(), &actor)?;
            let detail = ctx.engine.get_item(id)?;
            render_item_detail(ctx, &detail)
        }
        ItemCommand::Delete(args) => {
            let id = resolve_item(ctx, &args.item)?;
            let actor = ctx.actor()?;
            let event_id = ctx.engine.soft_delete_item(id, &actor)?;
            let body = json!({ "item_id": id, "deleted": true, "event_id": event_id });
            render(ctx.output, &body, |_, w| writeln!(w, "deleted item {id}"))
        }
    }
}

/// Shared renderer for an item and its defects.
///
/// # Errors
///
/// Returns an error if output cannot be written.
pub fn render_item_detail(ctx: &CmdCtx, detail: &ItemDetail) -> Result<()> {
    render_mode(
        ctx.output,
        detail,
        |d, w| {
            let defects: Vec<String> = d
                .defects
                .iter()
                .map(|x| x.defect_type_id.to_string())
                .collect();
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}\t{}",
                d.item.id,
                d.item.station,
                d.item.line_id,
                or_dash(d.item.number()),
                d.item.status,
                defects.join(",")
            )
        },
        |d, w| {
            let item = &d.item;
            pretty_section(w, &format!("Item {}", item.id))?;
            pretty_kv(w, "Status", item.status.as_str())?;
            pretty_kv(w, "Station", item.station.as_str())?;
            pretty_kv(w, "Line", item.line_id.to_string())?;
            pretty_kv(w, "Number", or_dash(item.number()))?;
            pretty_kv(w, "Product", or_dash(item.product_code.as_deref()))?;
            pretty_kv(w, "Job order", or_dash(item.job_order_number.as_deref()))?;
            pretty_kv(w, "Detected", ctx.ts(item.detected_at_us))?;
            pretty_kv(w, "Updated", ctx.ts(item.updated_at_us))?;
            pretty_kv(w, "Acknowledged", ctx.ts_opt(item.acknowledged_at_us))?;
            pretty_kv(w, "Review", or_dash(item.current_review_id))?;
            if item.scrap_requires_qc {
                pretty_kv(w, "Scrap", "awaiting QC")?;
            }
            if !d.defects.is_empty() {
                writeln!(w)?;
                pretty_section(w, "Defects")?;
                for defect in &d.defects {
                    writeln!(
                        w,
                        "{:>3}  {:<10} {}",
                        defect.defect_type_id,
                        defect.code.as_deref().unwrap_or("-"),
                        defect.name
                    )?;
                }
            }
            pretty_rule(w)
        },
    )
}
