//! iosim - IPv4 network simulator
//!
//! Runs the pre-built scenarios against routers, switches, hosts and
//! firewalls that forward packets one tick at a time.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use iosim_logging::{IosimSubscriberBuilder, LogConfig};

use iosim_simulation::{SimConfig, scenarios};

#[derive(Parser)]
#[command(name = "iosim", about = "Discrete-tick IPv4 network simulator", version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON simulation config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write JSONL logs to this directory instead of the console
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Forward traffic across a two-router lab
    Demo,

    /// Show a TTL=1 packet expiring right after transmission
    TtlExpiry,

    /// Show block and TTL-floor policies with longest-prefix match
    Policies,

    /// Exercise the routing, policy and snapshot structures with random keys
    Structures {
        /// Number of keys to insert
        #[arg(short = 'n', long, default_value = "1000")]
        count: usize,

        /// Snapshot index order
        #[arg(short, long, default_value = "4")]
        order: usize,

        /// Random seed
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },

    /// Save, list and restore topology snapshots
    Snapshots {
        /// Directory for snapshot files
        #[arg(short, long, default_value = "./snapshots")]
        dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = match (&cli.log_dir, cli.verbose) {
        (Some(dir), _) => LogConfig::recording(dir.clone()),
        (None, true) => LogConfig::development(),
        (None, false) => LogConfig::default(),
    };
    let _guard = IosimSubscriberBuilder::new().with_config(log_config).init()?;

    let config = match &cli.config {
        Some(path) => SimConfig::from_json_file(path)?,
        None => SimConfig::default(),
    };

    match cli.command {
        Commands::Demo => {
            scenarios::run_demo_scenario(config)?;
        }
        Commands::TtlExpiry => {
            scenarios::run_ttl_expiry_scenario(config)?;
        }
        Commands::Policies => {
            scenarios::run_policies_scenario(config)?;
        }
        Commands::Structures { count, order, seed } => {
            let report = scenarios::run_structures_scenario(count, order, seed)?;
            if cli.verbose {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Commands::Snapshots { dir } => {
            scenarios::run_snapshots_scenario(config, &dir)?;
        }
    }

    Ok(())
}
