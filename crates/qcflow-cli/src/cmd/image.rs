//! `qc image`: register evidence images.

use super::CmdCtx;
use super::item::resolve_item;
use crate::output::render;
use anyhow::Result;
use clap::Subcommand;
use qcflow_core::ingest::NewImage;
use qcflow_core::model::ImageKind;
use serde_json::json;
use std::io::Write;

#[derive(Subcommand, Debug)]
pub enum ImageCommand {
    /// Record an uploaded image. Without --item it stays unattached until a
    /// fix request claims it.
    Register {
        /// Item id, or a roll/bundle number.
        #[arg(long)]
        item: Option<String>,

        /// detected, fix or other.
        #[arg(long, default_value = "fix")]
        kind: ImageKind,

        /// Storage path or key of the uploaded file.
        #[arg(long)]
        path: String,
    },
}

/// # Errors
///
/// Returns the core error if the image cannot be recorded.
pub fn run_image(command: &ImageCommand, ctx: &mut CmdCtx) -> Result<()> {
    match command {
        ImageCommand::Register { item, kind, path } => {
            let item_id = item
                .as_deref()
                .map(|raw| resolve_item(ctx, raw))
                .transpose()?;
            let image = NewImage {
                item_id,
                kind: *kind,
                path: path.clone(),
                uploaded_by: ctx.actor.actor_id,
            };
            let id = ctx.engine.register_image(&image)?;
            render(
                ctx.output,
                &json!({ "image_id": id, "item_id": item_id }),
                |_, w| writeln!(w, "registered image {id}"),
            )
        }
    }
}
