//! `ipx cache` subcommand group.

use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use ipx_cache::{DiskCache, ImageCache};
use ipx_config::{CliSettings, Config};

use crate::error::CliError;
use crate::output::{Output, format_bytes};

/// Cache maintenance commands.
#[derive(Subcommand)]
pub(crate) enum CacheCommand {
    /// Run one expiry and eviction pass.
    Cleanup(CacheArgs),
    /// Print the total size of the cache.
    Size(CacheArgs),
}

/// Arguments shared by cache commands.
#[derive(Args)]
pub(crate) struct CacheArgs {
    /// Disk cache directory (overrides config).
    #[arg(long)]
    cache_path: Option<PathBuf>,
}

impl CacheCommand {
    /// Execute the cache subcommand.
    pub(crate) fn execute(self, config_path: Option<&Path>) -> Result<(), CliError> {
        let output = Output::new();
        match self {
            Self::Cleanup(args) => {
                let cache = open_cache(config_path, args)?;
                let report = cleanup(&cache)?;

                output.success(&format!(
                    "Removed {} entries and {} empty directories",
                    report.removed, report.dirs_removed
                ));
                output.info(&format!(
                    "Cache size: {} (limit {})",
                    format_bytes(report.size_bytes),
                    format_bytes(cache.max_bytes())
                ));
            }
            Self::Size(args) => {
                let cache = open_cache(config_path, args)?;
                let size = cache.size()?;
                output.result(&format!(
                    "{}\t{}",
                    format_bytes(size),
                    cache.base_dir().display()
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of a manual cleanup.
#[derive(Debug, PartialEq, Eq)]
struct CleanupReport {
    removed: usize,
    dirs_removed: usize,
    size_bytes: u64,
}

fn open_cache(config_path: Option<&Path>, args: CacheArgs) -> Result<DiskCache, CliError> {
    let settings = CliSettings {
        cache_path: args.cache_path,
        ..CliSettings::default()
    };
    let config = Config::load(config_path, Some(&settings))?;

    Ok(DiskCache::new(
        config.cache.path.clone(),
        config.cache.max_bytes(),
        config.cache.ttl_days(),
    )?)
}

fn cleanup(cache: &DiskCache) -> Result<CleanupReport, CliError> {
    let removed = cache.cleanup()?;
    let dirs_removed = cache.clean_empty_dirs();
    let size_bytes = cache.size()?;
    tracing::info!(removed, dirs_removed, size_bytes, "manual cache cleanup finished");

    Ok(CleanupReport {
        removed,
        dirs_removed,
        size_bytes,
    })
}
