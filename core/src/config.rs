//! Engine configuration
//!
//! Sources, lowest to highest precedence:
//! 1. Built-in defaults
//! 2. TOML file (`--config`, `REFRAIN_CONFIG_PATH`, or `./refrain.toml` when present)
//! 3. Environment variables, e.g. `REFRAIN_SERVER__STORE_URL`
//! 4. Builder overrides
//!
//! A `.env` file in the working directory is loaded before the environment
//! is read.
//!
//! ```toml
//! [server]
//! studio_url = "https://studio.example.com"
//! store_url = "https://store.example.com"
//!
//! [activities.defaults]
//! startToCloseTimeout = "5m"
//! retry = { maximumAttempts = 5, backoffCoefficient = 2.0 }
//!
//! [activities.overrides.generate]
//! retry = { maximumAttempts = 10 }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::options::{ActivityOptions, ActivityOptionsRegistry};
use crate::types::ServiceConfig;

pub const CONFIG_PATH_ENV: &str = "REFRAIN_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "refrain.toml";
const ENV_PREFIX: &str = "REFRAIN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServiceConfig,

    #[serde(default)]
    pub activities: ActivitiesConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivitiesConfig {
    /// Options every activity starts from
    #[serde(default)]
    pub defaults: ActivityOptions,

    /// Per-activity options merged over `defaults`
    #[serde(default)]
    pub overrides: HashMap<String, ActivityOptions>,
}

impl ActivitiesConfig {
    pub fn registry(&self) -> ActivityOptionsRegistry {
        ActivityOptionsRegistry::from_overrides(self.overrides.clone())
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a TOML document, without consulting file or environment
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).context("Failed to parse configuration")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    studio_url: Option<String>,
    store_url: Option<String>,
    skip_env: bool,
}

impl ConfigBuilder {
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn studio_url(mut self, url: Option<String>) -> Self {
        self.studio_url = url;
        self
    }

    pub fn store_url(mut self, url: Option<String>) -> Self {
        self.store_url = url;
        self
    }

    /// Ignore `.env` and process environment (tests, embedded use)
    pub fn skip_env(mut self, skip: bool) -> Self {
        self.skip_env = skip;
        self
    }

    pub fn build(self) -> Result<Config> {
        if !self.skip_env {
            dotenvy::dotenv().ok();
        }

        let mut builder = config::Config::builder()
            .set_default("server.studio_url", "")?
            .set_default("server.store_url", "")?;

        if let Some(path) = self.resolve_path() {
            let name = path.to_string_lossy();
            builder = builder.add_source(config::File::new(&name, config::FileFormat::Toml));
        }

        if !self.skip_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        if let Some(url) = self.studio_url {
            builder = builder.set_override("server.studio_url", url)?;
        }
        if let Some(url) = self.store_url {
            builder = builder.set_override("server.store_url", url)?;
        }

        builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Explicit path, then `REFRAIN_CONFIG_PATH`, then `./refrain.toml` if it exists
    fn resolve_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            return Some(path.clone());
        }
        if !self.skip_env {
            if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
                return Some(PathBuf::from(path));
            }
        }
        let default = Path::new(DEFAULT_CONFIG_FILE);
        default.exists().then(|| default.to_path_buf())
    }
}
