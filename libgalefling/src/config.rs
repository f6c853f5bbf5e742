//! Configuration management for GaleFling

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credentials::CredentialConfig;
use crate::error::{ConfigError, Result};
use crate::specs::{PlatformId, PlatformSpec, SpecTable};

pub const CONFIG_ENV: &str = "GALEFLING_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_accounts_file")]
    pub accounts_file: String,

    #[serde(default)]
    pub credentials: CredentialConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    /// Whole-spec replacements, keyed by platform id
    #[serde(default)]
    pub platforms: HashMap<PlatformId, PlatformSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-request timeout for silent backends, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Root of the per-account browser profiles
    #[serde(default = "default_profiles_dir")]
    pub profiles_dir: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            profiles_dir: default_profiles_dir(),
        }
    }
}

fn default_accounts_file() -> String {
    "~/.config/galefling/accounts.toml".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_profiles_dir() -> String {
    "~/.local/share/galefling/webprofiles".to_string()
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file at the default location yields [`Config::default_config`];
    /// a missing file named by `GALEFLING_CONFIG` is an error.
    pub fn load() -> Result<Self> {
        let path = resolve_config_path()?;
        if !path.exists() && std::env::var(CONFIG_ENV).is_err() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default_config());
        }
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that parse but cannot work
    pub fn validate(&self) -> Result<()> {
        if self.network.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "network.timeout_secs must be at least 1".to_string(),
            )
            .into());
        }
        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            accounts_file: default_accounts_file(),
            credentials: CredentialConfig::default(),
            network: NetworkConfig::default(),
            browser: BrowserConfig::default(),
            platforms: HashMap::new(),
        }
    }

    /// Built-in specs with this config's `[platforms.<id>]` overrides applied
    pub fn spec_table(&self) -> Result<SpecTable> {
        SpecTable::with_overrides(self.platforms.clone())
    }

    pub fn accounts_path(&self) -> PathBuf {
        expand(&self.accounts_file)
    }

    pub fn profiles_path(&self) -> PathBuf {
        expand(&self.browser.profiles_dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// `$GALEFLING_CONFIG`, else `{config_dir}/galefling/config.toml`
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Ok(expand(&path));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("galefling").join("config.toml"))
}
