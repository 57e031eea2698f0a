//! Configuration
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. a TOML file: the explicit path (builder or `SCRIPTPOOL_CONFIG_PATH`),
//!    otherwise `scriptpool.toml` in the working directory if present
//! 3. `SCRIPTPOOL_*` environment variables, `__` separating nested keys
//!    (e.g. `SCRIPTPOOL_POOL__MAX_REUSE=20`)
//! 4. `SCRIPTPOOL_DATABASE_URL`
//! 5. builder overrides
//!
//! A `.env` file is loaded first if one exists.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "SCRIPTPOOL";
pub const CONFIG_PATH_ENV: &str = "SCRIPTPOOL_CONFIG_PATH";
pub const DATABASE_URL_ENV: &str = "SCRIPTPOOL_DATABASE_URL";
const DEFAULT_CONFIG_FILE: &str = "scriptpool";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub pool: PoolSettings,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

/// Eviction thresholds applied when a context is returned to its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// A returned context is destroyed if its idle list already holds this many
    pub max_idle_per_pool: usize,
    /// A returned context is destroyed once it has been reused more than this
    pub max_reuse: u32,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle_per_pool: 10,
            max_reuse: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from files and the environment with no overrides
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// The database URL, or an error explaining how to set one
    pub fn database_url(&self) -> Result<&str> {
        self.database.url.as_deref().with_context(|| {
            format!(
                "No database URL configured. Set {} or pass --database-url",
                DATABASE_URL_ENV
            )
        })
    }

    /// Render the effective configuration
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration as TOML")
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    database_url: Option<String>,
    config_path: Option<PathBuf>,
}

impl ConfigBuilder {
    pub fn database_url(mut self, url: Option<String>) -> Self {
        self.database_url = url;
        self
    }

    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn build(self) -> Result<Config> {
        dotenvy::dotenv().ok();

        let path = self
            .config_path
            .or_else(|| env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let mut builder = config::Config::builder();
        builder = match &path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                builder.add_source(File::from(path.as_path()).format(FileFormat::Toml))
            }
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let url = self.database_url.or_else(|| env::var(DATABASE_URL_ENV).ok());
        if let Some(url) = url {
            builder = builder
                .set_override("database.url", url)
                .context("Failed to apply database URL override")?;
        }

        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.database.min_connections > config.database.max_connections {
        anyhow::bail!(
            "database.min_connections ({}) exceeds database.max_connections ({})",
            config.database.min_connections,
            config.database.max_connections
        );
    }
    if config.pool.max_idle_per_pool == 0 {
        anyhow::bail!("pool.max_idle_per_pool must be at least 1");
    }
    Ok(())
}
