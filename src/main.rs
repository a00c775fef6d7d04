mod cli;
mod error;

use crate::cli::{Cli, Command};
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use pgmirror_cache::{
    DbCache, ExecutorHandle, JsonRecord, KeyField, PgExecutor, StalenessOracle, TableName, ensure_monitoring,
};
use pgmirror_config::{CacheConfig, Config};
use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level());
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = ?err, "Command failed");
            ExitCode::FAILURE
        },
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).map_err(|err| err.raise(ErrorKind::Config))?;
    let db = Database::connect(&config).await?;
    match cli.command {
        Command::Install => install(&config, &db).await,
        Command::Fingerprint { cache } => fingerprint(&config, &db, &cache).await,
        Command::Get { cache, keys, all } => get(&config, &db, &cache, &keys, all).await,
        Command::Watch { cache } => watch(&config, &db, &cache).await,
    }
}

/// Read pool, plus a separate DDL pool when an admin URL is configured.
struct Database {
    reader: Arc<PgExecutor>,
    admin: Option<ExecutorHandle>,
}

impl Database {
    async fn connect(config: &Config) -> Result<Self> {
        let max = config.database.max_connections;
        let reader = PgExecutor::connect(&config.database.url, max)
            .await
            .map_err(|err| err.raise(ErrorKind::Connection))?;
        let admin: Option<ExecutorHandle> = match &config.database.admin_url {
            Some(url) => {
                let admin = PgExecutor::connect(url, Some(1))
                    .await
                    .map_err(|err| err.raise(ErrorKind::Connection))?
                    .with_name("admin");
                Some(Arc::new(admin))
            },
            None => None,
        };
        Ok(Self { reader: Arc::new(reader), admin })
    }

    fn ddl(&self) -> ExecutorHandle {
        match &self.admin {
            Some(admin) => admin.clone(),
            None => self.reader.clone(),
        }
    }
}

fn cache_config<'a>(config: &'a Config, name: &str) -> Result<&'a CacheConfig> {
    config.cache(name).map_err(|err| err.raise(ErrorKind::Config))
}

fn tables(name: &str, cache: &CacheConfig) -> Result<Vec<TableName>> {
    TableName::parse_all(&cache.tables).map_err(|err| err.raise(ErrorKind::Cache(name.to_string())))
}

async fn install(config: &Config, db: &Database) -> Result<()> {
    let ddl = db.ddl();
    let mut failed = Vec::new();
    for (name, cache) in &config.caches {
        if !cache.staleness.needs_monitoring() {
            tracing::info!(cache = %name, "Staleness strategy needs no monitoring; skipping");
            continue;
        }
        let result = match tables(name, cache) {
            Ok(tables) => ensure_monitoring(&tables, ddl.as_ref())
                .await
                .map_err(|err| err.raise(ErrorKind::Cache(name.clone()))),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => tracing::info!(cache = %name, tables = ?cache.tables, "Monitoring installed"),
            Err(err) => {
                tracing::warn!(cache = %name, error = ?err, "Monitoring could not be installed");
                failed.push(name.as_str());
            },
        }
    }
    if !failed.is_empty() {
        exn::bail!(ErrorKind::Cache(failed.join(", ")));
    }
    Ok(())
}

async fn fingerprint(config: &Config, db: &Database, name: &str) -> Result<()> {
    let cache = cache_config(config, name)?;
    let oracle = StalenessOracle::new(tables(name, cache)?, cache.staleness)
        .map_err(|err| err.raise(ErrorKind::Cache(name.to_string())))?;
    let fingerprint = oracle
        .fingerprint(&*db.reader)
        .await
        .map_err(|err| err.raise(ErrorKind::Cache(name.to_string())))?;
    println!("{fingerprint}");
    Ok(())
}

async fn open(name: &str, cache: &CacheConfig, db: &Database, background: bool) -> Result<DbCache<JsonRecord>> {
    let mut builder = DbCache::builder(JsonRecord::wrap_query(&cache.query), KeyField::lookup(cache.key.as_str()))
        .name(name)
        .params(cache.params.clone())
        .monitor(&cache.tables)
        .staleness(cache.staleness)
        .monitor_policy(cache.monitoring)
        .interval(cache.refresh_interval());
    if let Some(admin) = &db.admin {
        builder = builder.admin(admin.clone());
    }
    if !background {
        builder = builder.without_background_refresh();
    }
    builder
        .build(db.reader.clone())
        .await
        .map_err(|err| err.raise(ErrorKind::Cache(name.to_string())))
}

async fn get(config: &Config, db: &Database, name: &str, keys: &[String], all: bool) -> Result<()> {
    let cache = open(name, cache_config(config, name)?, db, false).await?;
    let output = if all {
        render(&cache.get_all().await)?
    } else {
        let snapshot = cache.snapshot().await;
        let found: BTreeMap<&str, &[JsonRecord]> = keys.iter().map(|key| (key.as_str(), snapshot.get(key))).collect();
        render(&found)?
    };
    println!("{output}");
    cache.close().await;
    Ok(())
}

fn render(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string_pretty(value).or_raise(|| ErrorKind::Output)
}

async fn watch(config: &Config, db: &Database, name: &str) -> Result<()> {
    let settings = cache_config(config, name)?;
    let cache = open(name, settings, db, true).await?;
    tracing::info!(
        cache = %name,
        interval_secs = settings.refresh_interval,
        records = cache.len().await,
        "Watching for changes; press Ctrl-C to stop"
    );
    let signal = tokio::signal::ctrl_c().await.or_raise(|| ErrorKind::Signal);
    let stats = cache.stats();
    cache.close().await;
    tracing::info!(
        cache = %name,
        checks = stats.checks,
        reloads = stats.reloads,
        failures = stats.failures,
        "Stopped watching"
    );
    signal
}
