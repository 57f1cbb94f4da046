#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::{ActorArgs, CmdCtx};
use output::{CliError, OutputMode, render_error};
use qcflow_core::{ErrorClass, QcError};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "qc: QC disposition tracker for rolls and bundles",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Output format: pretty, text or json.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Config file (default: ./qcflow.toml, then the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file; overrides config and QCFLOW_DB.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(flatten)]
    actor: ActorArgs,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Create or migrate the database",
        long_about = "Open the database, apply pending migrations and seed the catalog.",
        after_help = "EXAMPLES:\n    # Initialize the default database\n    qc init\n\n    # Also write a starter qcflow.toml\n    qc init --write-config"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Setup",
        about = "List statuses and defect types",
        after_help = "EXAMPLES:\n    qc catalog --json"
    )]
    Catalog,

    #[command(
        next_help_heading = "Detection",
        about = "Record a detected roll or bundle",
        long_about = "Insert an item as reported by a detection station. DEFECT items need at least one --defect.",
        after_help = "EXAMPLES:\n    # A defective roll on line 3\n    qc ingest --station roll --item-line 3 --number R-001 --status defect --defect 1"
    )]
    Ingest(cmd::ingest::IngestArgs),

    #[command(
        next_help_heading = "Detection",
        about = "Register evidence images",
        after_help = "EXAMPLES:\n    # An unattached fix photo\n    qc image register --path uploads/fix-1.jpg --actor-id 5"
    )]
    #[command(subcommand)]
    Image(cmd::image::ImageCommand),

    #[command(
        next_help_heading = "Read",
        about = "Inspect and act on a single item",
        after_help = "EXAMPLES:\n    qc item show R-001\n    qc item history 12 --json\n    qc item ack 12 --actor-id 5 --role operator --line 3\n    qc item edit R-001 --job-order JO-88 --roll-width 152.4 --actor-id 5 --role operator --line 3"
    )]
    #[command(subcommand)]
    Item(cmd::item::ItemCommand),

    #[command(
        next_help_heading = "Disposition",
        about = "Apply a status change directly",
        long_about = "Move an item to a new status in one step. Inspectors only.",
        after_help = "EXAMPLES:\n    qc transition R-001 --to recheck --actor-id 9 --role inspector --line 3"
    )]
    Transition(cmd::transition::TransitionArgs),

    #[command(
        next_help_heading = "Disposition",
        about = "Status-change requests",
        after_help = "EXAMPLES:\n    # Operator proposes DEFECT\n    qc request submit R-001 --to defect --defect 2 --actor-id 5 --role operator --line 3\n\n    # Inspector approves it\n    qc request decide 1 approve --actor-id 9 --role inspector --line 3\n\n    # Pending inbox for line 3\n    qc request list --item-line 3"
    )]
    #[command(subcommand)]
    Request(cmd::request::RequestCommand),

    #[command(
        next_help_heading = "Disposition",
        about = "Submit a defect-fix request",
        long_about = "Claim evidence images and open a DEFECT_FIX review for an eligible item.",
        after_help = "EXAMPLES:\n    qc fix R-001 --image 101 --image 102 --note \"relabelled\" --actor-id 5 --role operator --line 3"
    )]
    Fix(cmd::fix::FixArgs),

    #[command(
        next_help_heading = "Disposition",
        about = "Confirm or request scrap",
        long_about = "Confirm a SCRAP item, or move a RECHECK item to SCRAP pending QC review.",
        after_help = "EXAMPLES:\n    qc scrap R-001 --actor-id 5 --role operator --line 3"
    )]
    Scrap(cmd::scrap::ScrapArgs),

    #[command(
        next_help_heading = "Disposition",
        about = "Defect-fix and scrap reviews",
        after_help = "EXAMPLES:\n    qc review list --state pending\n    qc review decide 4 approve --note ok --actor-id 9 --role inspector --line 3"
    )]
    #[command(subcommand)]
    Review(cmd::review::ReviewCommand),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("QCFLOW_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "qcflow=debug,info"
        } else {
            "qcflow=info,warn"
        })
    });

    let format = env::var("QCFLOW_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries command output, logs go to stderr.
    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn dispatch(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    let mut config = qcflow_core::config::load_config(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.database.path.clone_from(db);
    }
    debug!(db = %config.database.path.display(), "resolved database");

    let mut ctx = CmdCtx::open(&config, output, cli.actor.clone())?;
    match &cli.command {
        Commands::Init(args) => {
            let cwd = env::current_dir()?;
            cmd::init::run_init(args, &ctx, &config, &cwd)
        }
        Commands::Catalog => cmd::catalog::run_catalog(&ctx),
        Commands::Ingest(args) => cmd::ingest::run_ingest(args, &mut ctx),
        Commands::Image(command) => cmd::image::run_image(command, &mut ctx),
        Commands::Item(command) => cmd::item::run_item(command, &mut ctx),
        Commands::Transition(args) => cmd::transition::run_transition(args, &mut ctx),
        Commands::Request(command) => cmd::request::run_request(command, &mut ctx),
        Commands::Fix(args) => cmd::fix::run_fix(args, &mut ctx),
        Commands::Scrap(args) => cmd::scrap::run_scrap(args, &mut ctx),
        Commands::Review(command) => cmd::review::run_review(command, &mut ctx),
    }
}

const fn exit_code_for(class: ErrorClass) -> u8 {
    match class {
        ErrorClass::FixInput => 2,
        ErrorClass::Retry => 3,
        ErrorClass::Gone => 4,
        ErrorClass::Internal => 1,
    }
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }
    let output = cli.output_mode();

    match dispatch(&cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let (rendered, code) = err.downcast_ref::<QcError>().map_or_else(
                || (CliError::new(format!("{err:#}")), 1),
                |qc| (CliError::from(qc), exit_code_for(qc.class())),
            );
            if let Err(write_err) = render_error(output, &rendered) {
                eprintln!("error: {err:#} ({write_err})");
            }
            ExitCode::from(code)
        }
    }
}
