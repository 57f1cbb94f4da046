pub mod catalog;
pub mod fix;
pub mod image;
pub mod ingest;
pub mod init;
pub mod item;
pub mod request;
pub mod review;
pub mod scrap;
pub mod transition;

use crate::output::OutputMode;
use anyhow::Context as _;
use clap::Args;
use qcflow_core::Engine;
use qcflow_core::config::QcConfig;
use qcflow_core::model::{Actor, Role};

/// Caller identity. Authentication happens upstream; the CLI trusts these.
#[derive(Args, Debug, Clone, Default)]
pub struct ActorArgs {
    /// Acting user id.
    #[arg(long = "actor-id", global = true)]
    pub actor_id: Option<i64>,

    /// Acting role: operator, inspector (or qc), viewer.
    #[arg(long, global = true)]
    pub role: Option<Role>,

    /// Production line the actor belongs to.
    #[arg(long, global = true)]
    pub line: Option<i64>,
}

impl ActorArgs {
    /// Build the actor for a mutating command.
    ///
    /// # Errors
    ///
    /// Returns an error if `--actor-id` or `--role` is missing.
    pub fn require(&self) -> anyhow::Result<Actor> {
        let id = self
            .actor_id
            .context("this command needs --actor-id and --role")?;
        let role = self
            .role
            .context("this command needs --actor-id and --role")?;
        Ok(Actor::new(id, role, self.line))
    }
}

/// Everything a command handler needs.
pub struct CmdCtx {
    pub engine: Engine,
    pub output: OutputMode,
    pub utc_offset_minutes: i32,
    pub actor: ActorArgs,
}

impl CmdCtx {
    /// Open the configured database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(config: &QcConfig, output: OutputMode, actor: ActorArgs) -> anyhow::Result<Self> {
        let engine = Engine::open(config)
            .with_context(|| format!("open database {}", config.database.path.display()))?;
        Ok(Self {
            engine,
            output,
            utc_offset_minutes: config.clock.utc_offset_minutes,
            actor,
        })
    }

    /// # Errors
    ///
    /// See [`ActorArgs::require`].
    pub fn actor(&self) -> anyhow::Result<Actor> {
        self.actor.require()
    }

    pub fn ts(&self, us: i64) -> String {
        crate::output::plant_time(us, self.utc_offset_minutes)
    }

    pub fn ts_opt(&self, us: Option<i64>) -> String {
        us.map_or_else(|| "-".to_string(), |us| self.ts(us))
    }
}

/// Parse an instant given as RFC 3339 or as raw epoch microseconds.
pub fn parse_instant(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    if let Ok(us) = raw.parse::<i64>() {
        return Ok(us);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.timestamp_micros())
        .map_err(|e| format!("expected RFC 3339 or epoch microseconds: {e}"))
}
