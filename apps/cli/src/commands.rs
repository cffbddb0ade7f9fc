//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use opencraft_core::CraftEngine;
use opencraft_shared::{
    AppConfig, MaterialSummary, database_path, init_config, load_config, load_config_from,
    validate_api_key,
};
use opencraft_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// OpenCraft: combine materials, discover new ones.
#[derive(Parser)]
#[command(
    name = "opencraft",
    version,
    about = "Combine materials into new ones with an LLM, tracking who discovered what.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.opencraft/opencraft.toml.
    #[arg(long, global = true, env = "OPENCRAFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding [database] path.
    #[arg(long, global = true, env = "OPENCRAFT_DB")]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Combine two materials.
    Craft {
        first: String,
        second: String,

        /// Attribute the craft to this user (enables discovery logging).
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Craft the six pairs of base elements.
    Defaults {
        #[arg(short, long)]
        user: Option<String>,
    },

    /// List every registered material.
    Materials,

    /// List the materials a user has produced.
    UserMaterials { user: String },

    /// Print the discovery graph.
    Graph {
        /// Only include this user's crafts.
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Cosine similarity of two materials.
    Similarity { first: String, second: String },

    /// Materials most similar to the given one.
    Nearest {
        name: String,

        #[arg(short, long, default_value = "5")]
        k: usize,
    },

    /// Compute embeddings for materials that lack one.
    Backfill,

    /// Check the store and report queue counters.
    Health,

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "opencraft=info",
        1 => "opencraft=debug",
        _ => "opencraft=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so stdout stays clean JSON.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(cli.config.as_deref(), cli.db).await,
        };
    }

    let config = resolve_config(cli.config.as_deref(), cli.db)?;
    match cli.command {
        Command::Craft {
            first,
            second,
            user,
        } => cmd_craft(&config, &first, &second, user.as_deref()).await,
        Command::Defaults { user } => cmd_defaults(&config, user.as_deref()).await,
        Command::Materials => cmd_materials(&config).await,
        Command::UserMaterials { user } => cmd_user_materials(&config, &user).await,
        Command::Graph { user } => cmd_graph(&config, user.as_deref()).await,
        Command::Similarity { first, second } => cmd_similarity(&config, &first, &second).await,
        Command::Nearest { name, k } => cmd_nearest(&config, &name, k).await,
        Command::Backfill => cmd_backfill(&config).await,
        Command::Health => cmd_health(&config).await,
        Command::Config { .. } => Ok(()),
    }
}

/// Load the config file (explicit path or default) and apply flag overrides.
fn resolve_config(path: Option<&Path>, db: Option<String>) -> Result<AppConfig> {
    let mut config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    if let Some(db) = db {
        config.database.path = db;
    }
    Ok(config)
}

/// Open the store read-only for view commands.
async fn open_view(config: &AppConfig) -> Result<Storage> {
    let path = database_path(config)?;
    if !path.exists() {
        return Err(eyre!(
            "no database at {}; craft something first",
            path.display()
        ));
    }
    Ok(Storage::open_readonly(&path).await?)
}

/// Why generation would fail for lack of credentials, if it would.
///
/// Crafting still proceeds: cached pairs answer without the generator.
fn api_key_warning(config: &AppConfig) -> Option<String> {
    validate_api_key(config).err().map(|e| e.to_string())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(message);
    spinner
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_craft(
    config: &AppConfig,
    first: &str,
    second: &str,
    user: Option<&str>,
) -> Result<()> {
    if let Some(message) = api_key_warning(config) {
        warn!("{message}");
    }
    let engine = CraftEngine::open(config).await?;

    let progress = spinner(format!("Crafting {first} + {second}"));
    let outcome = engine.craft(first, second, user).await;
    progress.finish_and_clear();

    // Drain before surfacing any error so admitted jobs are not lost.
    engine.shutdown().await;
    let outcome = outcome?;

    if outcome.is_empty() {
        info!("no result for {first} + {second}");
    }
    print_json(&outcome)
}

async fn cmd_defaults(config: &AppConfig, user: Option<&str>) -> Result<()> {
    if let Some(message) = api_key_warning(config) {
        warn!("{message}");
    }
    let engine = CraftEngine::open(config).await?;

    let progress = spinner("Crafting base element pairs".into());
    let results = engine.default_combinations(user).await;
    progress.finish_and_clear();

    engine.shutdown().await;
    print_json(&results?)
}

async fn cmd_materials(config: &AppConfig) -> Result<()> {
    let storage = open_view(config).await?;
    let materials: Vec<MaterialSummary> = storage
        .list_materials()
        .await?
        .iter()
        .map(MaterialSummary::from)
        .collect();
    print_json(&materials)
}

async fn cmd_user_materials(config: &AppConfig, user: &str) -> Result<()> {
    let storage = open_view(config).await?;
    print_json(&storage.user_materials(user).await?)
}

async fn cmd_graph(config: &AppConfig, user: Option<&str>) -> Result<()> {
    let storage = open_view(config).await?;
    print_json(&opencraft_core::graph(&storage, user).await?)
}

async fn cmd_similarity(config: &AppConfig, first: &str, second: &str) -> Result<()> {
    let storage = open_view(config).await?;
    let similarity = opencraft_core::similarity(&storage, first, second).await?;
    print_json(&serde_json::json!({ "similarity": similarity }))
}

async fn cmd_nearest(config: &AppConfig, name: &str, k: usize) -> Result<()> {
    let storage = open_view(config).await?;
    print_json(&opencraft_core::nearest(&storage, name, k).await?)
}

async fn cmd_backfill(config: &AppConfig) -> Result<()> {
    let engine = CraftEngine::open(config).await?;

    let progress = spinner("Computing embeddings".into());
    let filled = engine.backfill_embeddings().await;
    progress.finish_and_clear();

    engine.shutdown().await;
    print_json(&serde_json::json!({ "filled": filled? }))
}

async fn cmd_health(config: &AppConfig) -> Result<()> {
    let engine = CraftEngine::open(config).await?;
    let report = engine.health().await;
    engine.shutdown().await;
    print_json(&report?)
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>, db: Option<String>) -> Result<()> {
    let config = resolve_config(path, db)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
