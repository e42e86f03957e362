//! Configuration management for the image proxy.
//!
//! Parses `ipx.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! Precedence, lowest first:
//!
//! 1. built-in defaults
//! 2. the config file
//! 3. `IMAGE_PROXY_*` environment variables
//! 4. [`CliSettings`]
//!
//! Validation runs once all layers are applied.
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `server.host`
//! - `proxy.base_url`
//! - `proxy.cdn_url`
//! - `cache.path`
//! - `identity.plc_directory_url`

mod expand;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
    /// Override cache directory.
    pub cache_path: Option<PathBuf>,
}

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "ipx.toml";

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * BYTES_PER_MB;

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Proxy switch and public URLs.
    pub proxy: ProxyConfig,
    /// Disk cache configuration.
    pub cache: CacheConfig,
    /// Origin fetch configuration.
    pub fetch: FetchConfig,
    /// DID resolution configuration.
    pub identity: IdentityConfig,

    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 7980,
        }
    }
}

/// Proxy configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Whether `/img` requests are served at all.
    pub enabled: bool,
    /// Origin for generated image URLs. Empty produces relative URLs.
    pub base_url: String,
    /// Optional CDN prefix; takes precedence over `base_url` in URLs.
    pub cdn_url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            cdn_url: String::new(),
        }
    }
}

/// Disk cache configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root directory. Relative paths resolve against the config file.
    pub path: PathBuf,
    /// Size cap in gigabytes.
    pub max_gb: i64,
    /// Expiry after last access in days; `0` disables expiry.
    pub ttl_days: i64,
    /// Janitor period in minutes; `0` or less disables the janitor.
    pub cleanup_interval_minutes: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/cache/ipx/images"),
            max_gb: 10,
            ttl_days: 30,
            cleanup_interval_minutes: 60,
        }
    }
}

impl CacheConfig {
    /// Size cap in bytes.
    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        u64::try_from(self.max_gb)
            .unwrap_or(0)
            .saturating_mul(BYTES_PER_GB)
    }

    /// Expiry in days (`0` = disabled).
    #[must_use]
    pub fn ttl_days(&self) -> u32 {
        u32::try_from(self.ttl_days.max(0)).unwrap_or(u32::MAX)
    }

    /// Janitor period; zero when disabled.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        let minutes = u64::try_from(self.cleanup_interval_minutes).unwrap_or(0);
        Duration::from_secs(minutes.saturating_mul(60))
    }
}

/// Origin fetch configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    pub timeout_seconds: i64,
    /// Maximum source blob size in megabytes.
    pub max_source_size_mb: i64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_source_size_mb: 10,
        }
    }
}

impl FetchConfig {
    /// Per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.timeout_seconds).unwrap_or(0))
    }

    /// Maximum source blob size in bytes.
    #[must_use]
    pub fn max_source_bytes(&self) -> u64 {
        u64::try_from(self.max_source_size_mb)
            .unwrap_or(0)
            .saturating_mul(BYTES_PER_MB)
    }
}

/// DID resolution configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// PLC directory used to resolve `did:plc` identifiers.
    pub plc_directory_url: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            plc_directory_url: "https://plc.directory".to_owned(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`cache.path`").
        field: String,
        /// Error message (e.g., "${`CACHE_DIR`} not set").
        message: String,
    },
    /// `cache.max_gb` is not positive.
    #[error("cache.max_gb must be positive: got {0}")]
    InvalidCacheMaxGb(i64),
    /// `fetch.timeout_seconds` is not positive.
    #[error("fetch.timeout_seconds must be positive: got {0}")]
    InvalidFetchTimeout(i64),
    /// `fetch.max_source_size_mb` is not positive.
    #[error("fetch.max_source_size_mb must be positive: got {0}")]
    InvalidMaxSourceSize(i64),
    /// `cache.path` is empty while the proxy is enabled.
    #[error("cache.path is required when the proxy is enabled")]
    MissingCachePath,
    /// `cache.ttl_days` is negative.
    #[error("cache.ttl_days cannot be negative: got {0}")]
    InvalidCacheTtl(i64),
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require a URL field to use http:// or https:// scheme.
fn require_http_url(url: &str, field: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `ipx.toml` in current directory and parents,
    /// falling back to defaults.
    ///
    /// Environment overrides and then CLI settings are applied on top, and
    /// the result is validated.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// or the final configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(cache_path) = &settings.cache_path {
            self.cache.path.clone_from(cache_path);
        }
    }

    /// Apply `IMAGE_PROXY_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|name| std::env::var(name).ok());
    }

    /// Apply `IMAGE_PROXY_*` overrides read through `lookup`.
    ///
    /// Empty values are ignored. Unparseable or out-of-range numbers are
    /// logged and leave the current value in place.
    fn apply_env_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = var("IMAGE_PROXY_ENABLED") {
            self.proxy.enabled = v == "true" || v == "1";
        }
        if let Some(v) = var("IMAGE_PROXY_BASE_URL") {
            self.proxy.base_url = v;
        }
        if let Some(v) = var("IMAGE_PROXY_CACHE_PATH") {
            self.cache.path = PathBuf::from(v);
        }
        if let Some(v) = var("IMAGE_PROXY_CDN_URL") {
            self.proxy.cdn_url = v;
        }

        let numeric = [
            ("IMAGE_PROXY_CACHE_MAX_GB", &mut self.cache.max_gb, 1),
            ("IMAGE_PROXY_CACHE_TTL_DAYS", &mut self.cache.ttl_days, 0),
            (
                "IMAGE_PROXY_CLEANUP_INTERVAL_MINUTES",
                &mut self.cache.cleanup_interval_minutes,
                0,
            ),
            (
                "IMAGE_PROXY_FETCH_TIMEOUT_SECONDS",
                &mut self.fetch.timeout_seconds,
                1,
            ),
            (
                "IMAGE_PROXY_MAX_SOURCE_SIZE_MB",
                &mut self.fetch.max_source_size_mb,
                1,
            ),
        ];
        for (name, field, min) in numeric {
            let Some(raw) = var(name) else {
                continue;
            };
            match raw.trim().parse::<i64>() {
                Ok(n) if n >= min => *field = n,
                _ => {
                    tracing::warn!(
                        variable = name,
                        value = %raw,
                        current = *field,
                        "invalid environment override, keeping current value"
                    );
                }
            }
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Numeric limits are checked regardless of `proxy.enabled`; the cache
    /// path is only required when the proxy is enabled.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_limits()?;
        self.validate_urls()?;

        if self.proxy.enabled && self.cache.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingCachePath);
        }
        Ok(())
    }

    /// Validate server configuration.
    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;

        // Port 0 is technically valid (OS assigns a random port), but it's
        // unlikely to be intentional in a config file
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }

        Ok(())
    }

    fn validate_limits(&self) -> Result<(), ConfigError> {
        if self.cache.max_gb <= 0 {
            return Err(ConfigError::InvalidCacheMaxGb(self.cache.max_gb));
        }
        if self.fetch.timeout_seconds <= 0 {
            return Err(ConfigError::InvalidFetchTimeout(self.fetch.timeout_seconds));
        }
        if self.fetch.max_source_size_mb <= 0 {
            return Err(ConfigError::InvalidMaxSourceSize(
                self.fetch.max_source_size_mb,
            ));
        }
        if self.cache.ttl_days < 0 {
            return Err(ConfigError::InvalidCacheTtl(self.cache.ttl_days));
        }
        Ok(())
    }

    fn validate_urls(&self) -> Result<(), ConfigError> {
        // Empty base/CDN URLs are valid and mean "relative URLs"
        if !self.proxy.base_url.is_empty() {
            require_http_url(&self.proxy.base_url, "proxy.base_url")?;
        }
        if !self.proxy.cdn_url.is_empty() {
            require_http_url(&self.proxy.cdn_url, "proxy.cdn_url")?;
        }
        require_non_empty(&self.identity.plc_directory_url, "identity.plc_directory_url")?;
        require_http_url(&self.identity.plc_directory_url, "identity.plc_directory_url")?;
        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;
        self.proxy.base_url = expand::expand_env(&self.proxy.base_url, "proxy.base_url")?;
        self.proxy.cdn_url = expand::expand_env(&self.proxy.cdn_url, "proxy.cdn_url")?;
        self.identity.plc_directory_url = expand::expand_env(
            &self.identity.plc_directory_url,
            "identity.plc_directory_url",
        )?;

        let cache_path = self.cache.path.to_string_lossy().into_owned();
        self.cache.path = PathBuf::from(expand::expand_env(&cache_path, "cache.path")?);

        Ok(())
    }

    /// Resolve a relative cache path against the config file directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        if !self.cache.path.as_os_str().is_empty() && self.cache.path.is_relative() {
            self.cache.path = config_dir.join(&self.cache.path);
        }
    }
}
