//! `qc request`: status-change requests: submit, decide, list, show.

use super::CmdCtx;
use super::item::resolve_item;
use super::transition::TransitionArgs;
use crate::output::{or_dash, pretty_kv, pretty_rule, pretty_section, render, render_mode};
use anyhow::Result;
use clap::{Args, Subcommand};
use qcflow_core::db::query::{
    PageRequest, RequestFilter, RequestPage, RequestSort, SortDirection,
};
use qcflow_core::model::{Decision, ReviewState, Station, StatusChangeRequest};
use std::io::Write;

#[derive(Subcommand, Debug)]
pub enum RequestCommand {
    /// Propose a status change. Fast-path targets apply at once.
    Submit(TransitionArgs),
    /// Approve or reject a pending request (inspector only).
    Decide(DecideArgs),
    /// List requests (pending by default).
    List(ListArgs),
    /// Show one request.
    Show {
        id: i64,
    },
}

#[derive(Args, Debug)]
pub struct DecideArgs {
    pub id: i64,

    /// approve or reject.
    pub decision: Decision,

    /// Note appended to the request reason.
    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// pending, approved or rejected.
    #[arg(long, default_value = "pending")]
    pub state: ReviewState,

    /// Only requests for items on this line.
    #[arg(long = "item-line")]
    pub item_line: Option<i64>,

    #[arg(long)]
    pub station: Option<Station>,

    /// line, station, product_code, number, job_order, status_before,
    /// status_after, requested_at.
    #[arg(long, default_value = "requested_at")]
    pub sort: RequestSort,

    /// asc or desc.
    #[arg(long, default_value = "desc")]
    pub order: SortDirection,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long = "page-size", default_value_t = 20)]
    pub page_size: u32,
}

impl ListArgs {
    pub const fn to_filter(&self) -> RequestFilter {
        RequestFilter {
            state: self.state,
            line_id: self.item_line,
            station: self.station,
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
pub fn run_request(command: &RequestCommand, ctx: &mut CmdCtx) -> Result<()> {
    match command {
        RequestCommand::Submit(args) => {
            let item_id = resolve_item(ctx, &args.item)?;
            let actor = ctx.actor()?;
            let request = ctx.engine.submit_request(&args.to_input(item_id), &actor)?;
            render_request(ctx, &request)
        }
        RequestCommand::Decide(args) => {
            let actor = ctx.actor()?;
            let request =
                ctx.engine
                    .decide_request(args.id, args.decision, args.note.as_deref(), &actor)?;
            render_request(ctx, &request)
        }
        RequestCommand::List(args) => {
            let page = ctx.engine.list_requests(&args.to_filter())?;
            render_request_page(ctx, &page)
        }
        RequestCommand::Show { id } => {
            let request = ctx.engine.get_request(*id)?;
            render_request(ctx, &request)
        }
    }
}

fn render_request(ctx: &CmdCtx, request: &StatusChangeRequest) -> Result<()> {
    render_mode(
        ctx.output,
        request,
        |r, w| {
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}",
                r.id, r.item_id, r.from_status, r.to_status, r.state
            )
        },
        |r, w| {
            pretty_section(w, &format!("Request {}", r.id))?;
            pretty_kv(w, "Item", r.item_id.to_string())?;
            pretty_kv(w, "Change", format!("{} -> {}", r.from_status, r.to_status))?;
            pretty_kv(w, "State", r.state.as_str())?;
            pretty_kv(w, "Requested", format!("{} by {}", ctx.ts(r.requested_at_us), r.requested_by))?;
            pretty_kv(w, "Decided", format!("{} by {}", ctx.ts_opt(r.approved_at_us), or_dash(r.approved_by)))?;
            pretty_kv(w, "Reason", or_dash(r.reason.as_deref()))?;
            if !r.defect_type_ids.is_empty() {
                let ids: Vec<String> = r.defect_type_ids.iter().map(ToString::to_string).collect();
                pretty_kv(w, "Defects", ids.join(", "))?;
            }
            pretty_rule(w)
        },
    )
}

fn render_request_page(ctx: &CmdCtx, page: &RequestPage) -> Result<()> {
    render(ctx.output, page, |p, w| {
        for row in &p.data {
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{}\t{} -> {}\t{}",
                row.request.id,
                row.request.item_id,
                row.line_id,
                row.station,
                or_dash(row.number.as_deref()),
                row.request.from_status,
                row.request.to_status,
                ctx.ts(row.request.requested_at_us)
            )?;
        }
        writeln!(
            w,
            "page {}/{} · {} total ({} roll, {} bundle)",
            p.pagination.page,
            p.pagination.total_pages.max(1),
            p.summary.total,
            p.summary.roll,
            p.summary.bundle
        )
    })
}
