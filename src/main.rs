//! KTV CLI - Karaoke Mixing Engine
//!
//! Command-line interface for the KTV karaoke engine.

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ktv::cli::{commands, Cli, Commands};
use ktv::EngineConfig;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("KTV karaoke engine v{}", env!("CARGO_PKG_VERSION"));

    let config = commands::load_config(cli.config.as_deref())?;
    handle_command(cli.command, config)
}

fn handle_command(cmd: Commands, config: EngineConfig) -> anyhow::Result<()> {
    match cmd {
        Commands::Topology => commands::topology(config),
        Commands::Ir {
            out,
            duration,
            decay,
            seed,
        } => commands::ir(&config, &out, duration, decay, seed),
        Commands::Session {
            music,
            play_secs,
            params,
            realtime,
        } => commands::session(config, &music, play_secs, params.as_deref(), realtime),
    }
}
