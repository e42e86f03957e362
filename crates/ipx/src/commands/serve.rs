//! `ipx serve` command implementation.

use std::path::{Path, PathBuf};

use clap::Args;
use ipx_config::{CliSettings, Config};
use ipx_server::{run_server, server_config_from_ipx_config};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Disk cache directory (overrides config).
    #[arg(long)]
    cache_path: Option<PathBuf>,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the server fails to start.
    pub(crate) async fn execute(self, config_path: Option<&Path>) -> Result<(), CliError> {
        let output = Output::new();

        let cli_settings = CliSettings {
            host: self.host,
            port: self.port,
            cache_path: self.cache_path,
        };
        let config = Config::load(config_path, Some(&cli_settings))?;

        output.info(&format!(
            "Starting server on {}:{}",
            config.server.host, config.server.port
        ));
        if let Some(path) = &config.config_path {
            output.info(&format!("Config file: {}", path.display()));
        }

        if config.proxy.enabled {
            output.info(&format!(
                "Cache directory: {}",
                config.cache.path.display()
            ));
            if config.cache.cleanup_interval_minutes > 0 {
                output.info(&format!(
                    "Cache cleanup: every {} minutes",
                    config.cache.cleanup_interval_minutes
                ));
            } else {
                output.warning("Cache cleanup: disabled");
            }
        } else {
            output.warning("Image proxy: disabled");
        }

        let server_config = server_config_from_ipx_config(&config);
        run_server(server_config)
            .await
            .map_err(|e| CliError::Server(e.to_string()))?;

        Ok(())
    }
}
