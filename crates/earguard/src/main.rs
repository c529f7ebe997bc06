//! earguard daemon and one-shot mute CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use guardconf::GuardConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "earguard")]
#[command(about = "Mute the default sink when audio switches to a public output")]
#[command(version)]
struct Cli {
    /// Config file, used instead of ./earguard.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive (overrides config and RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the graph and guard output switches (default)
    Run,
    /// Mute a node and wait for the server to confirm
    Mute {
        /// PipeWire global id of the node
        node_id: u32,
    },
    /// Unmute a node and wait for the server to confirm
    Unmute {
        /// PipeWire global id of the node
        node_id: u32,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = GuardConfig::load_with_sources_from(cli.config.as_deref())?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.telemetry.log_level.clone());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .without_time()
        .init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            if let Err(e) = earguard::daemon::run(&config) {
                error!("{:#}", e);
            }
            // The monitor is gone; exit non-zero for the supervisor.
            std::process::exit(1);
        }
        Commands::Mute { node_id } => set_mute(&config, node_id, true)?,
        Commands::Unmute { node_id } => set_mute(&config, node_id, false)?,
        Commands::Config => {
            for file in &sources.files {
                println!("# loaded {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# overridden by ${}", var);
            }
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

fn set_mute(config: &GuardConfig, node_id: u32, mute: bool) -> Result<()> {
    let mut session = earguard::daemon::connect(config)?;
    let result = session.set_mute(node_id, mute);
    session.shutdown();
    result?;
    info!("node {} {}", node_id, if mute { "muted" } else { "unmuted" });
    Ok(())
}
