//! Subnet managing service binary.

mod cli;
mod commands;
mod logging;
mod simulate;

use clap::Parser;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init_logging(&cli.logs)?;
    let config = cli.config.resolve()?;

    match &cli.command {
        Commands::Config => commands::print_config(&config),
        Commands::Inspect(args) => commands::inspect(config, args),
        Commands::Simulate(args) => simulate::run(config, args).await,
    }
}
