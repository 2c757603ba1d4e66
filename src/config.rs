use failure::Fail;
use log::LevelFilter;
use std::{collections::HashMap, fs, path::PathBuf};
use toml;
use serde::Deserialize;

use crate::utils::SingleInit;

static CONFIG: SingleInit<Config> = SingleInit::uninit();

pub fn load() -> crate::Result<&'static Config> {
    CONFIG.get_or_try_init(|| {
        let data = fs::read("config.toml").map_err(ReadConfigurationError)?;
        toml::from_slice(&data).map_err(|e| ConfigurationError(e).into())
    })
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub database: Option<Database>,
    pub storage: Storage,
    #[serde(default)]
    pub baking: Baking,
    #[serde(default)]
    pub logging: Logging,
    pub sentry: Option<Sentry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Database {
    /// Postgres connection URL. Overridden by the DATABASE_URL environment
    /// variable when present.
    pub url: String,
}

/// Content-addressed file store configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Storage {
    /// Directory in which published files are stored.
    pub path: PathBuf,
    /// Largest resource accepted in a publication, in megabytes.
    #[serde(default = "default_resource_limit")]
    pub resource_limit: usize,
}

impl Storage {
    /// Resource size limit in bytes.
    pub fn resource_limit_bytes(&self) -> usize {
        self.resource_limit * 1024 * 1024
    }
}

/// Baking worker configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Baking {
    /// Seconds between polling sweeps for unclaimed post-publication items.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Ruleset applied when a publication doesn't name one.
    #[serde(default = "default_recipe")]
    pub recipe: String,
}

/// Logging configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Logging {
    /// Default logging level.
    #[serde(default = "default_level_filter")]
    pub level: LevelFilter,
    /// Custom filters.
    #[serde(default)]
    pub filters: HashMap<String, LevelFilter>,
}

/// Sentry.io configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct Sentry {
    /// Client key.
    pub dsn: String,
}

#[derive(Debug, Fail)]
#[fail(display = "Cannot read configuration file")]
pub struct ReadConfigurationError(#[fail(cause)] std::io::Error);

#[derive(Debug, Fail)]
#[fail(display = "Invalid configuration: {}", _0)]
pub struct ConfigurationError(#[fail(cause)] toml::de::Error);

fn default_resource_limit() -> usize {
    1
}

fn default_poll_interval() -> u64 {
    30
}

fn default_recipe() -> String {
    "default".into()
}

fn default_level_filter() -> LevelFilter {
    LevelFilter::Info
}

impl Default for Baking {
    fn default() -> Self {
        Baking {
            poll_interval: default_poll_interval(),
            recipe: default_recipe(),
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: default_level_filter(),
            filters: HashMap::new(),
        }
    }
}
