//! Farecast - Main Entry Point

use clap::Parser;
use farecast::cli::{cmd_inspect, cmd_predict, cmd_train, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "farecast=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train { data, target, registry, config, k } => {
            cmd_train(&data, &target, registry.as_deref(), config.as_deref(), k)?;
        }
        Commands::Predict { data, registry, config, output, fallback } => {
            cmd_predict(&data, registry.as_deref(), config.as_deref(), output.as_deref(), fallback)?;
        }
        Commands::Inspect { registry } => {
            cmd_inspect(&registry)?;
        }
    }

    Ok(())
}
