//! docmodern CLI: modernize a technical documentation page.
//!
//! Fetches a documentation URL, finds outdated content, researches current
//! practice, rewrites the page, and scores the result.

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
