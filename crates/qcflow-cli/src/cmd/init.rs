//! `qc init`: create or upgrade the database and report its state.

use super::CmdCtx;
use crate::output::{pretty_kv, pretty_section, render_mode};
use anyhow::{Context as _, Result};
use clap::Args;
use qcflow_core::config::{LOCAL_CONFIG_FILE, QcConfig};
use qcflow_core::db::migrations::current_schema_version;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Also write a default `qcflow.toml` into the working directory.
    #[arg(long)]
    pub write_config: bool,
}

#[derive(Debug, Serialize)]
pub struct InitReport {
    pub database: String,
    pub schema_version: u32,
    pub statuses: usize,
    pub defect_types: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_written: Option<String>,
}

/// Execute `qc init`. Opening the engine already applied migrations.
///
/// # Errors
///
/// Returns an error if the config file exists already or any query fails.
pub fn run_init(args: &InitArgs, ctx: &CmdCtx, config: &QcConfig, cwd: &Path) -> Result<()> {
    let config_written = if args.write_config {
        let path = cwd.join(LOCAL_CONFIG_FILE);
        if path.exists() {
            anyhow::bail!("{} already exists", path.display());
        }
        let body = toml::to_string_pretty(config).context("serialize default config")?;
        std::fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
        Some(path.display().to_string())
    } else {
        None
    };

    let report = InitReport {
        database: config.database.path.display().to_string(),
        schema_version: current_schema_version(ctx.engine.connection())?,
        statuses: ctx.engine.catalog().statuses().len(),
        defect_types: ctx.engine.defect_types()?.len(),
        config_written,
    };
    tracing::info!(database = %report.database, version = report.schema_version, "database ready");

    render_mode(
        ctx.output,
        &report,
        |r, w| {
            writeln!(
                w,
                "{}\t{}\t{}\t{}",
                r.database, r.schema_version, r.statuses, r.defect_types
            )
        },
        |r, w| {
            pretty_section(w, "qcflow database ready")?;
            pretty_kv(w, "Database", &r.database)?;
            pretty_kv(w, "Schema", r.schema_version.to_string())?;
            pretty_kv(w, "Statuses", r.statuses.to_string())?;
            pretty_kv(w, "Defect types", r.defect_types.to_string())?;
            if let Some(path) = &r.config_written {
                pretty_kv(w, "Config", path)?;
            }
            Ok(())
        },
    )
}
