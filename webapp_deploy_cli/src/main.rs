mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "webapp-deploy", version, about = "Synthesize and deploy webapp deployment stacks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the CloudFormation template and stage local assets
    Synth {
        /// Path to the deployment TOML file
        #[arg(short, long)]
        config: PathBuf,
        /// Print the template to stdout instead of writing it
        #[arg(long)]
        stdout: bool,
    },
    /// Synthesize, upload staged assets and create or update the stack
    Deploy {
        /// Path to the deployment TOML file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Synth { config, stdout } => commands::synth(&config, stdout),
        Commands::Deploy { config } => commands::deploy(&config).await,
    }
}
