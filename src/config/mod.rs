mod basic;
mod gmail;

pub use basic::BasicConfig;
pub use gmail::GmailConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::LazyLock};

/// Application configuration managed by Figment.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core server configuration (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Gmail integration settings (see `gmail` table in config.toml).
    #[serde(default)]
    pub gmail: GmailConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "VOWMAIL_";

impl Config {
    /// Builds a Figment that merges defaults, an optional config TOML file and
    /// `VOWMAIL_`-prefixed environment variables (`__` separates nested keys, e.g.
    /// `VOWMAIL_GMAIL__OAUTH_CLIENT_SECRET`).
    pub fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Loads configuration without validating required secrets.
    ///
    /// Binaries should call `Config::from_toml()` instead so they never run with empty keys.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional config.toml): {err}")
        })
    }

    /// Loads configuration and validates required fields.
    pub fn from_toml() -> Self {
        let cfg: Self = Self::figment()
            .extract()
            .unwrap_or_else(|err| panic!("failed to extract configuration: {err}"));
        if let Err(missing) = cfg.validate() {
            panic!("{missing} must be set and non-empty");
        }
        cfg
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.basic.vowmail_key.trim().is_empty() {
            return Err("basic.vowmail_key");
        }
        if self.gmail.oauth_client_id.trim().is_empty() {
            return Err("gmail.oauth_client_id");
        }
        if self.gmail.webhook_token.trim().is_empty() {
            return Err("gmail.webhook_token");
        }
        Ok(())
    }
}

/// Global, lazily-initialized configuration instance.
pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::from_optional_toml);
