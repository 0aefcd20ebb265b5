mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "weir", version, about = "A declarative stream processor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a stream until its input is exhausted or SIGINT arrives
    Run {
        /// Path to the stream YAML file
        config: PathBuf,
    },
    /// Parse and lint a stream config without running it
    Check {
        /// Path to the stream YAML file
        config: PathBuf,
    },
    /// Lint several stream configs, reporting every violation
    Lint {
        /// Paths to stream YAML files
        configs: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { config } => commands::run::execute(&config).await,
        Commands::Check { config } => commands::check::execute(&config),
        Commands::Lint { configs } => commands::lint::execute(&configs),
    }
}
