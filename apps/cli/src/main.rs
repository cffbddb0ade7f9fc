//! OpenCraft CLI: combine materials into new ones.
//!
//! Crafts pairs through an LLM-backed generator, keeps a shared cache and a
//! per-user discovery log, and prints graph and similarity views as JSON.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
