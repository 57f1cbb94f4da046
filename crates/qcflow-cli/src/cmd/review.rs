//! `qc review`: defect-fix and scrap reviews: decide, list, show.

use super::{CmdCtx, parse_instant};
use crate::output::{or_dash, pretty_kv, pretty_rule, pretty_section, render, render_mode};
use anyhow::Result;
use clap::{Args, Subcommand};
use qcflow_core::db::query::{PageRequest, ReviewFilter, ReviewPage, ReviewSort, SortDirection};
use qcflow_core::model::{Decision, Review, ReviewState};
use std::io::Write;

#[derive(Subcommand, Debug)]
pub enum ReviewCommand {
    /// Approve (QC_PASSED) or reject (REJECTED) a pending review.
    Decide(DecideArgs),
    /// List reviews.
    List(ListArgs),
    /// Show one review with its images.
    Show { id: i64 },
}

#[derive(Args, Debug)]
pub struct DecideArgs {
    pub id: i64,

    /// approve or reject.
    pub decision: Decision,

    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// pending, approved, rejected (repeatable; default all).
    #[arg(long = "state")]
    pub states: Vec<ReviewState>,

    /// Only items on this line.
    #[arg(long = "item-line")]
    pub item_line: Option<i64>,

    /// Only items carrying this defect type.
    #[arg(long)]
    pub defect: Option<i64>,

    #[arg(long = "reviewed-from", value_parser = parse_instant)]
    pub reviewed_from: Option<i64>,

    #[arg(long = "reviewed-to", value_parser = parse_instant)]
    pub reviewed_to: Option<i64>,

    #[arg(long = "submitted-from", value_parser = parse_instant)]
    pub submitted_from: Option<i64>,

    #[arg(long = "submitted-to", value_parser = parse_instant)]
    pub submitted_to: Option<i64>,

    /// line, station, product_code, number, job_order, state, decision,
    /// reviewed_by, reviewed_at, recent.
    #[arg(long, default_value = "recent")]
    pub sort: ReviewSort,

    /// asc or desc.
    #[arg(long, default_value = "desc")]
    pub order: SortDirection,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long = "page-size", default_value_t = 20)]
    pub page_size: u32,
}

impl ListArgs {
    pub fn to_filter(&self) -> ReviewFilter {
        ReviewFilter {
            line_id: self.item_line,
            states: self.states.clone(),
            defect_type_id: self.defect,
            reviewed_from_us: self.reviewed_from,
            reviewed_to_us: self.reviewed_to,
            submitted_from_us: self.submitted_from,
            submitted_to_us: self.submitted_to,
            sort: self.sort,
            direction: self.order,
            page: PageRequest {
                page: self.page,
                page_size: self.page_size,
            },
        }
    }
}

/// # Errors
///
/// Returns the core error if the operation is refused.
pub fn run_review(command: &ReviewCommand, ctx: &mut CmdCtx) -> Result<()> {
    match command {
        ReviewCommand::Decide(args) => {
            let actor = ctx.actor()?;
            let review =
                ctx.engine
                    .decide_review(args.id, args.decision, args.note.as_deref(), &actor)?;
            render_review(ctx, &review)
        }
        ReviewCommand::List(args) => {
            let page = ctx.engine.list_reviews(&args.to_filter())?;
            render_review_page(ctx, &page)
        }
        ReviewCommand::Show { id } => {
            let review = ctx.engine.get_review(*id)?;
            render_review(ctx, &review)
        }
    }
}

/// # Errors
///
/// Returns an error if output cannot be written.
pub fn render_review(ctx: &CmdCtx, review: &Review) -> Result<()> {
    render_mode(
        ctx.output,
        review,
        |r, w| {
            writeln!(
                w,
                "{}\t{}\t{}\t{}",
                r.id, r.item_id, r.review_type, r.state
            )
        },
        |r, w| {
            pretty_section(w, &format!("Review {}", r.id))?;
            pretty_kv(w, "Item", r.item_id.to_string())?;
            pretty_kv(w, "Type", r.review_type.as_str())?;
            pretty_kv(w, "State", r.state.as_str())?;
            pretty_kv(
                w,
                "Submitted",
                format!("{} by {}", ctx.ts(r.submitted_at_us), r.submitted_by),
            )?;
            pretty_kv(w, "Note", or_dash(r.submit_note.as_deref()))?;
            pretty_kv(
                w,
                "Reviewed",
                format!("{} by {}", ctx.ts_opt(r.reviewed_at_us), or_dash(r.reviewed_by)),
            )?;
            if let Some(note) = &r.review_note {
                pretty_kv(w, "QC note", note)?;
            }
            if let Some(reason) = &r.reject_reason {
                pretty_kv(w, "Rejected", reason)?;
            }
            let images: Vec<String> = r.image_ids.iter().map(ToString::to_string).collect();
            pretty_kv(w, "Images", if images.is_empty() { "-".to_string() } else { images.join(", ") })?;
            pretty_rule(w)
        },
    )
}

fn render_review_page(ctx: &CmdCtx, page: &ReviewPage) -> Result<()> {
    render(ctx.output, page, |p, w| {
        for row in &p.data {
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                row.review.id,
                row.item.id,
                row.item.line_id,
                or_dash(row.item.number()),
                row.status,
                row.review.state,
                ctx.ts(row.review.updated_at_us)
            )?;
        }
        writeln!(
            w,
            "page {}/{} · {} pending, {} approved, {} rejected",
            p.pagination.page,
            p.pagination.total_pages.max(1),
            p.summary.pending,
            p.summary.approved,
            p.summary.rejected
        )
    })
}
