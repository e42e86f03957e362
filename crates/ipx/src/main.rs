//! ipx CLI - AT Protocol image proxy.
//!
//! Provides commands for:
//! - `serve`: Start the image proxy server
//! - `cache cleanup`: Run one expiry and eviction pass over the disk cache
//! - `cache size`: Print the disk cache size
//! - `presets`: List the transformation presets

mod commands;
mod error;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{CacheCommand, PresetsArgs, ServeArgs};
use error::CliError;
use output::Output;

/// ipx - AT Protocol image proxy.
#[derive(Parser)]
#[command(name = "ipx", version, about)]
struct Cli {
    /// Path to configuration file (default: auto-discover ipx.toml).
    #[arg(short, long, global = true, env = "IPX_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output (info-level logs).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the image proxy server.
    Serve(ServeArgs),
    /// Disk cache maintenance.
    #[command(subcommand)]
    Cache(CacheCommand),
    /// List transformation presets.
    Presets(PresetsArgs),
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    let filter = log_filter(cli.verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(cli) {
        output.error(&format!("Error: {err}"));
        std::process::exit(1);
    }
}

/// `--verbose` forces INFO, otherwise `RUST_LOG` applies, falling back to WARN
/// when it is unset or unparseable.
fn log_filter(verbose: bool, rust_log: Option<String>) -> EnvFilter {
    if verbose {
        return EnvFilter::new("info");
    }
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(args.execute(config_path))
        }
        Commands::Cache(cmd) => cmd.execute(config_path),
        Commands::Presets(args) => {
            args.execute();
            Ok(())
        }
    }
}
