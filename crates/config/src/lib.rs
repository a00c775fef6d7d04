//! Layered configuration for pgmirror caches.
//!
//! Values come from a configuration file (TOML, YAML or JSON, chosen by
//! extension) and are then overridden by `PGMIRROR_` environment variables,
//! with `__` separating nested keys: `PGMIRROR_DATABASE__URL` sets
//! `database.url`.
//!
//! ```toml
//! [database]
//! url = "postgres://cache@localhost/app"
//!
//! [caches.api_keys]
//! query = "select key, name from api_keys where revoked = $1"
//! params = [false]
//! key = "key"
//! tables = ["api_keys"]
//! refresh_interval = 43
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use pgmirror_cache::{MAX_REFRESH_INTERVAL, MonitorPolicy, Param, Staleness, TableName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "PGMIRROR_";
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;

/// Location of the configuration file used when none is given explicitly.
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "pgmirror").map(|dirs| dirs.config_dir().join("config.toml"))
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub caches: BTreeMap<String, CacheConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    /// Connection used for monitoring DDL, when the cache user may not
    /// create tables, functions or triggers.
    #[serde(default)]
    pub admin_url: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConfig {
    pub query: String,
    #[serde(default)]
    pub params: Vec<Param>,
    /// Name of the field records are grouped by.
    pub key: String,
    #[serde(default)]
    pub tables: Vec<String>,
    /// Seconds between staleness checks.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default)]
    pub staleness: Staleness,
    #[serde(default)]
    pub monitoring: MonitorPolicy,
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    fn problems(&self, name: &str) -> Vec<String> {
        let mut problems = Vec::new();
        if self.query.trim().is_empty() {
            problems.push(format!("caches.{name}.query is empty"));
        }
        if self.key.trim().is_empty() {
            problems.push(format!("caches.{name}.key is empty"));
        }
        if self.tables.is_empty() {
            problems.push(format!("caches.{name}.tables is empty"));
        }
        for table in &self.tables {
            if TableName::new(table).is_err() {
                problems.push(format!("caches.{name}.tables contains invalid table name {table:?}"));
            }
        }
        if self.refresh_interval == 0 {
            problems.push(format!("caches.{name}.refresh_interval must be greater than zero"));
        } else if self.refresh_interval() > MAX_REFRESH_INTERVAL {
            problems.push(format!(
                "caches.{name}.refresh_interval must be at most {} seconds",
                MAX_REFRESH_INTERVAL.as_secs()
            ));
        }
        problems
    }
}

impl Config {
    /// Load, merge and validate the configuration.
    ///
    /// An explicit `path` must exist. Without one, the file at
    /// [`default_path`] is used if present; otherwise only the environment
    /// is consulted.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(path)?)
    }

    /// The provider stack [`load`](Self::load) extracts from.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let figment = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.display().to_string())),
            Some(path) => merge_file(Figment::new(), path)?,
            None => match default_path().filter(|path| path.is_file()) {
                Some(path) => merge_file(Figment::new(), &path)?,
                None => Figment::new(),
            },
        };
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Invalid)?;
        config.validate()?;
        tracing::debug!(caches = config.caches.len(), "Configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.database.url.trim().is_empty() {
            problems.push("database.url is empty".to_string());
        }
        if self.database.max_connections == Some(0) {
            problems.push("database.max_connections must be greater than zero".to_string());
        }
        for (name, cache) in &self.caches {
            problems.extend(cache.problems(name));
        }
        if !problems.is_empty() {
            exn::bail!(ErrorKind::Validation(problems.join("; ")));
        }
        Ok(())
    }

    /// Look up a configured cache by name.
    pub fn cache(&self, name: &str) -> Result<&CacheConfig> {
        self.caches
            .get(name)
            .ok_or_raise(|| ErrorKind::UnknownCache(name.to_string()))
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let figment = match extension.as_str() {
        "toml" => figment.merge(Toml::file(path)),
        "yaml" | "yml" => figment.merge(Yaml::file(path)),
        "json" => figment.merge(Json::file(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.display().to_string())),
    };
    Ok(figment)
}
