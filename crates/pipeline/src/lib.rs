pub mod config;
pub mod gold;
pub mod loader;
pub mod orchestrator;
pub mod stats;

pub use config::{CategorizerSettings, ClassConfig, Config, ConfigError, CONFIG_FILE};
pub use gold::{materialize, Materialized};
pub use loader::{gold_key, silver_key, LedgerLoader, SilverSnapshot};
pub use orchestrator::{
    ClassOutcome, ClassReport, Edit, EditTarget, Orchestrator, PipelineError, RunReport,
    RunStats, Selection, Stage,
};
pub use stats::{summarize, CategoryTotal, LedgerStats};
