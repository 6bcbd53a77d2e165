//! Corelink CLI - replay host commands against the control plane.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "corelink")]
#[command(author, version, about = "Corelink DSP control plane CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a command script and report the resulting topology
    Run(commands::run::RunArgs),

    /// List registered drivers and the module manifest
    Drivers(commands::drivers::DriversArgs),

    /// Validate a platform description and optionally a script
    Validate(commands::validate::ValidateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Drivers(args) => commands::drivers::run(args),
        Commands::Validate(args) => commands::validate::run(args),
    }
}
