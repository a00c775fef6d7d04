//! The cache handle and its builder.

use crate::error::{ErrorKind, Result};
use crate::executor::{ExecutorHandle, QueryExecutor, RecordSource, SourceHandle};
use crate::fingerprint::{Fingerprint, Staleness, StalenessOracle};
use crate::key::KeyField;
use crate::loader::Loader;
use crate::monitor::{MonitorPolicy, ensure_monitoring};
use crate::param::Param;
use crate::refresh::{RefreshOutcome, RefreshStatsSnapshot, Refresher};
use crate::snapshot::Snapshot;
use crate::table::TableName;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::instrument;

/// How often the background task checks for upstream changes by default.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
/// Longest accepted refresh interval (365 days).
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A read-only, auto-refreshing cache of one query's results, bucketed by key.
///
/// Reads never fail and never wait on the database: they see the snapshot
/// published by the last successful load. A background task re-checks the
/// monitored tables on a fixed interval and swaps in a complete new snapshot
/// when they changed.
///
/// # Examples
///
/// ```no_run
/// use pgmirror_cache::{DbCache, KeyField, PgExecutor};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[derive(Clone, sqlx::FromRow)]
/// struct ApiKey {
///     key: Option<String>,
///     name: Option<String>,
/// }
///
/// # async fn example(pool: sqlx::PgPool) -> pgmirror_cache::error::Result<()> {
/// let executor = Arc::new(PgExecutor::new(pool));
/// let cache = DbCache::builder("select key, name from api_keys", KeyField::new("key", |k: &ApiKey| k.key.clone()))
///     .monitor(["api_keys"])
///     .interval(Duration::from_secs(43))
///     .build(executor)
///     .await?;
///
/// for key in cache.get("some-id").await {
///     println!("{:?}", key.name);
/// }
/// cache.close().await;
/// # Ok(())
/// # }
/// ```
pub struct DbCache<R> {
    refresher: Arc<Refresher<R>>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl<R> DbCache<R>
where
    R: Send + Sync + 'static,
{
    /// Start configuring a cache for `query`, keyed by `key`.
    pub fn builder(query: impl Into<String>, key: KeyField<R>) -> CacheBuilder<R> {
        CacheBuilder::new(query, key)
    }

    /// Name of the cache, used in log output.
    pub fn name(&self) -> &str {
        &self.refresher.name
    }

    /// The current snapshot.
    ///
    /// Holding on to it is cheap and gives a consistent view across several
    /// lookups, even if a reload publishes a newer snapshot meanwhile.
    pub async fn snapshot(&self) -> Arc<Snapshot<R>> {
        self.refresher.store.current().await
    }

    /// Records for `key`, in result-row order. Empty if the key is unknown.
    pub async fn get(&self, key: &str) -> Vec<R>
    where
        R: Clone,
    {
        self.snapshot().await.get(key).to_vec()
    }

    /// Every record, grouped by key; key order is unspecified.
    pub async fn get_all(&self) -> Vec<R>
    where
        R: Clone,
    {
        self.snapshot().await.iter().cloned().collect()
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.snapshot().await.contains_key(key)
    }

    /// Total number of cached records.
    pub async fn len(&self) -> usize {
        self.snapshot().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshot().await.is_empty()
    }

    /// Fingerprint of the data currently served.
    pub async fn fingerprint(&self) -> Fingerprint {
        self.snapshot().await.fingerprint().clone()
    }

    /// Check for upstream changes now, reloading if there are any.
    ///
    /// Runs exclusively with the background task. On failure the current
    /// snapshot stays published and the error is returned.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        self.refresher.refresh().await
    }

    pub fn stats(&self) -> RefreshStatsSnapshot {
        self.refresher.stats.snapshot()
    }

    /// Stop the background task and wait for it to exit.
    ///
    /// A refresh in progress is allowed to finish. Dropping the cache also
    /// stops the task, without waiting for it.
    pub async fn close(self) {
        let Self { refresher, shutdown, task } = self;
        _ = shutdown.send(true);
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(cache = %refresher.name, error = %err, "Refresh task ended abnormally");
            }
        }
        tracing::debug!(cache = %refresher.name, "Cache closed");
    }
}

impl<R> fmt::Debug for DbCache<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCache")
            .field("name", &self.refresher.name)
            .field("tables", &self.refresher.oracle.tables())
            .field("key", &self.refresher.loader.key().name())
            .field("background", &self.task.is_some())
            .finish_non_exhaustive()
    }
}

/// Configuration for a [`DbCache`], consumed by [`build`](Self::build).
pub struct CacheBuilder<R> {
    name: Option<String>,
    query: String,
    params: Vec<Param>,
    key: KeyField<R>,
    tables: Vec<String>,
    interval: Option<Duration>,
    staleness: Staleness,
    policy: MonitorPolicy,
    admin: Option<ExecutorHandle>,
}

impl<R> CacheBuilder<R>
where
    R: Send + Sync + 'static,
{
    fn new(query: impl Into<String>, key: KeyField<R>) -> Self {
        Self {
            name: None,
            query: query.into(),
            params: Vec::new(),
            key,
            tables: Vec::new(),
            interval: Some(DEFAULT_REFRESH_INTERVAL),
            staleness: Staleness::default(),
            policy: MonitorPolicy::default(),
            admin: None,
        }
    }

    /// Name used in log output. Defaults to the monitored tables.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Append a positional parameter (`$1`, `$2`, ...) for the load query.
    pub fn param(mut self, param: impl Into<Param>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Append several positional parameters.
    pub fn params(mut self, params: impl IntoIterator<Item = Param>) -> Self {
        self.params.extend(params);
        self
    }

    /// Tables whose mutations should trigger a reload.
    pub fn monitor<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables.extend(tables.into_iter().map(Into::into));
        self
    }

    /// How often the background task checks for changes.
    ///
    /// Must be greater than zero and at most [`MAX_REFRESH_INTERVAL`].
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Don't start a background task; the cache only changes through
    /// [`DbCache::refresh`].
    pub fn without_background_refresh(mut self) -> Self {
        self.interval = None;
        self
    }

    pub fn staleness(mut self, staleness: Staleness) -> Self {
        self.staleness = staleness;
        self
    }

    pub fn monitor_policy(mut self, policy: MonitorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Executor for the monitoring DDL, if the read executor lacks the
    /// privileges to create tables, functions and triggers.
    pub fn admin(mut self, admin: ExecutorHandle) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Install monitoring, load the first snapshot, and start refreshing.
    ///
    /// Nothing is returned unless the cache is ready to serve reads; every
    /// failure on the way is raised as [`ErrorKind::Construction`].
    pub async fn build<E>(self, executor: Arc<E>) -> Result<DbCache<R>>
    where
        E: QueryExecutor + RecordSource<R> + 'static,
    {
        let checker: ExecutorHandle = executor.clone();
        let source: SourceHandle<R> = executor;
        self.build_with(checker, source)
            .await
            .map_err(|err| err.raise(ErrorKind::Construction))
    }

    #[instrument(name = "build_cache", skip_all, fields(cache))]
    async fn build_with(self, checker: ExecutorHandle, source: SourceHandle<R>) -> Result<DbCache<R>> {
        if self
            .interval
            .is_some_and(|interval| interval.is_zero() || interval > MAX_REFRESH_INTERVAL)
        {
            exn::bail!(ErrorKind::InvalidInterval);
        }
        let tables = TableName::parse_all(&self.tables)?;
        let name = self.name.unwrap_or_else(|| self.tables.join(","));
        tracing::Span::current().record("cache", name.as_str());
        let oracle = StalenessOracle::new(tables, self.staleness)?;

        if self.staleness.needs_monitoring() {
            let ddl = self.admin.as_ref().unwrap_or(&checker);
            match ensure_monitoring(oracle.tables(), ddl.as_ref()).await {
                Ok(()) => {},
                Err(err) if self.policy == MonitorPolicy::Lenient => {
                    tracing::warn!(cache = %name, error = ?err, "Continuing without complete change monitoring");
                },
                Err(err) => return Err(err),
            }
        }

        let loader = Loader::new(self.query, self.params, self.key);
        let refresher = Arc::new(Refresher::initialize(name, oracle, loader, checker, source).await?);
        let (shutdown, receiver) = watch::channel(false);
        let task = self
            .interval
            .map(|period| tokio::spawn(refresher.clone().run(period, receiver)));
        Ok(DbCache { refresher, shutdown, task })
    }
}
