// ============================================
// File: crates/gatesplice-proxy/src/main.rs
// ============================================
//! # Gatesplice Proxy Entry Point
//!
//! ## Creation Reason
//! Main entry point for the Gatesplice proxy binary. Handles CLI parsing,
//! logging setup, configuration and protocol-table loading, and runs the
//! proxy until interrupted.
//!
//! ## Usage
//! ```bash
//! # Run the proxy
//! gatesplice-proxy start --config gatesplice.toml
//!
//! # Check a configuration file
//! gatesplice-proxy validate --config gatesplice.toml
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The binary runs a passthrough proxy; modules are loaded by embedders
//!   through `ProxyServer`'s `on_dispatch` callback
//! - Protocol tables must match the game build being proxied
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gatesplice_core::protocol::ProtocolCodec;
use gatesplice_core::TableCodec;
use gatesplice_proxy::{ProxyConfig, ProxyServer};

// ============================================
// CLI Definition
// ============================================

/// Gatesplice game-protocol proxy
#[derive(Parser, Debug)]
#[command(name = "gatesplice-proxy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the proxy
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "gatesplice.toml")]
        config: PathBuf,
    },

    /// Validate configuration and protocol tables
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "gatesplice.toml")]
        config: PathBuf,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging("info");

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config).await,
        Commands::Validate { config } => cmd_validate(config).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Starts the proxy.
async fn cmd_start(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load_config(&config_path).await?;

    // Re-initialize logging with the configured level.
    init_logging(&config.logging.level);

    let codec = Arc::new(TableCodec::load(&config.protocol.tables_path)?);
    info!(tables = %config.protocol.tables_path, "protocol tables loaded");

    let server = Arc::new(ProxyServer::new(
        config,
        codec,
        Arc::new(|dispatcher| {
            debug!(?dispatcher, "dispatcher ready");
        }),
    ));

    let runner = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.run().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    server.shutdown();

    runner.await??;
    info!("proxy stopped");
    Ok(())
}

/// Validates configuration and protocol tables.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   The proxy would use default values.");
        return Ok(());
    }

    let config = ProxyConfig::load(&config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Network:");
    println!("   Listen:     {}", config.network.listen_addr);
    println!("   Server:     {}", config.network.server_addr);
    println!();
    println!("Framing:");
    println!("   Max frame:  {} bytes", config.framing.max_frame_len);
    println!();
    println!("Dispatch:");
    println!(
        "   Version announcement:  {} (opcode {})",
        config.dispatch.check_version_name, config.dispatch.check_version_opcode
    );
    println!();

    match TableCodec::load(&config.protocol.tables_path) {
        Ok(codec) => {
            println!("✅ Protocol tables are valid");
            println!("   Versions:   {:?}", codec.protocol_versions());
        }
        Err(e) => {
            println!("❌ Protocol tables failed to load: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

/// Loads config or falls back to defaults.
async fn load_config(path: &PathBuf) -> anyhow::Result<ProxyConfig> {
    if path.exists() {
        Ok(ProxyConfig::load(path).await?)
    } else {
        info!("config file not found, using defaults");
        Ok(ProxyConfig::default())
    }
}
