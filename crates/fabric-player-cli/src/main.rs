//! Fabric Player CLI - Headless playback controller tooling
//!
//! Features:
//! - Protocol / DRM negotiation against an offer matrix
//! - Playback parameter validation
//! - Engine error classification
//! - Engine settings inspection per profile

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

/// Fabric Player CLI - Playback controller toolkit
#[derive(Parser)]
#[command(name = "fabric-player")]
#[command(version)]
#[command(about = "Inspect how the playback controller negotiates and recovers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select a protocol / DRM pair from an offer matrix
    Negotiate {
        /// Playback parameters file (.json or .toml)
        #[arg(short, long)]
        params: PathBuf,

        /// Offer matrix as a JSON file path or an http(s) URL
        #[arg(short, long)]
        offers: String,

        /// DRM schemes the target device supports
        #[arg(short, long = "device-drm")]
        device_drms: Vec<String>,
    },

    /// Validate a playback parameters file
    Validate {
        /// Playback parameters file (.json or .toml)
        params: PathBuf,
    },

    /// Classify a sequence of raw engine errors
    Classify {
        /// JSON file holding one raw error or an array of them
        errors: PathBuf,

        /// Consecutive errors before unclassified errors escalate
        #[arg(short, long)]
        threshold: Option<u32>,
    },

    /// Show the engine settings a session would construct
    Settings {
        /// Playback parameters file (.json or .toml)
        params: PathBuf,

        /// Engine family (hls, dash)
        #[arg(long, default_value = "hls")]
        protocol: String,
    },

    /// List player profiles
    Profiles,

    /// Print default playback parameters
    Defaults,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    fabric_player_core::init();

    match cli.command {
        Commands::Negotiate { params, offers, device_drms } => {
            commands::negotiate(&params, &offers, &device_drms, &cli.format).await?;
        }
        Commands::Validate { params } => {
            commands::validate(&params, &cli.format)?;
        }
        Commands::Classify { errors, threshold } => {
            commands::classify(&errors, threshold, &cli.format)?;
        }
        Commands::Settings { params, protocol } => {
            commands::settings(&params, &protocol, &cli.format)?;
        }
        Commands::Profiles => {
            commands::profiles(&cli.format)?;
        }
        Commands::Defaults => {
            commands::defaults()?;
        }
    }

    Ok(())
}
