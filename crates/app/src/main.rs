use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args as ClapArgs, Parser, Subcommand};
use finsight_core::{Amount, Applicability, RuleId, StatementClass, TransactionId};
use finsight_pipeline::{Config, Orchestrator, Selection, CONFIG_FILE};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

mod commands;

/// finsight: turns bank and credit card statement exports into a categorized ledger.
///
/// Uploaded CSV files are read from each class's uploads directory, deduplicated against what
/// is already known, categorized and written to the Silver and Gold ledgers in the data
/// directory. Edits are kept separately and survive every re-run.
#[derive(Debug, Parser)]
#[command(name = "finsight", version)]
struct Args {
    /// Path to the configuration file.
    #[arg(long, env = "FINSIGHT_CONFIG", default_value = CONFIG_FILE)]
    config: PathBuf,

    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// RUST_LOG takes precedence when it is set.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process the uploaded statements of one class, or of both.
    Run {
        #[arg(default_value = "all")]
        selection: Selection,
    },
    /// Categorize every uploaded row of a class again with the current rules and categories.
    /// Rows keep their ids, so edits survive.
    Reprocess { class: StatementClass },
    /// Rebuild the Gold ledger of a class from its Silver ledger and the recorded edits.
    Regenerate { class: StatementClass },
    /// Change the category or description of one row.
    Edit(EditArgs),
    /// Manage the categorization rules.
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },
    /// Manage the categories the categorizer may assign.
    Categories {
        #[command(subcommand)]
        action: CategoriesCommand,
    },
    /// Print totals of the Gold ledger of one class, or of both.
    Stats {
        #[arg(default_value = "all")]
        selection: Selection,
    },
}

#[derive(Debug, ClapArgs)]
pub struct EditArgs {
    pub class: StatementClass,
    /// Id of the row; takes precedence over date, description and amount.
    #[arg(long)]
    pub id: Option<TransactionId>,
    #[arg(long, required_unless_present = "id")]
    pub date: Option<NaiveDate>,
    #[arg(long, required_unless_present = "id")]
    pub description: Option<String>,
    #[arg(long, required_unless_present = "id", allow_hyphen_values = true)]
    pub amount: Option<Amount>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub new_description: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    List,
    Add {
        content: String,
        #[arg(long, default_value_t = Applicability::Both)]
        applies_to: Applicability,
    },
    Update {
        id: RuleId,
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        applies_to: Option<Applicability>,
    },
    Delete {
        id: RuleId,
    },
}

#[derive(Debug, Subcommand)]
pub enum CategoriesCommand {
    List,
    Add { name: String },
    Delete { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(args.log_level);
    debug!("Log level set to {}", args.log_level);

    match main_inner(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("Exiting with error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn main_inner(args: Args) -> anyhow::Result<ExitCode> {
    let config = Config::load(&args.config)
        .with_context(|| format!("Unable to load {}", args.config.display()))?;
    let orchestrator = Orchestrator::from_config(&config)?;

    match args.command {
        Command::Run { selection } => commands::run(&orchestrator, selection).await,
        Command::Reprocess { class } => commands::reprocess(&orchestrator, class).await,
        Command::Regenerate { class } => commands::regenerate(&orchestrator, class).await,
        Command::Edit(edit) => commands::edit(&orchestrator, edit).await,
        Command::Rules { action } => commands::rules(&orchestrator, action).await,
        Command::Categories { action } => commands::categories(&orchestrator, action).await,
        Command::Stats { selection } => commands::stats(&orchestrator, selection).await,
    }
}

const CRATES: &[&str] = &[
    "finsight",
    "finsight_core",
    "finsight_import",
    "finsight_categorize",
    "finsight_storage",
    "finsight_pipeline",
];

/// Initializes the tracing subscriber on stderr.
fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => EnvFilter::from_default_env(),
        None => EnvFilter::new(
            CRATES
                .iter()
                .map(|c| format!("{c}={level}"))
                .collect::<Vec<_>>()
                .join(","),
        ),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
