//! PostgreSQL executor over a sqlx connection pool.

use super::{QueryExecutor, RecordSource};
use crate::error::{ErrorKind, Result};
use crate::param::Param;
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

// Refreshes run one query at a time; a few spare connections cover readers
// sharing the pool and the odd manual refresh.
const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Executor backed by a [`PgPool`].
///
/// The pool belongs to the caller. Cloning the executor clones the pool
/// handle, and dropping it never closes the pool.
#[derive(Debug, Clone)]
pub struct PgExecutor {
    name: String,
    pool: PgPool,
}

impl PgExecutor {
    /// Wrap an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { name: "postgres".to_string(), pool }
    }

    /// Open a new pool for the given connection URL.
    ///
    /// Mostly useful for binaries; libraries should share the pool the
    /// application already has through [`new`](Self::new).
    #[instrument(skip(url))]
    pub async fn connect(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = Self::pool_options(max_connections)
            .connect_with(Self::connect_options(url)?)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(Self::new(pool))
    }

    /// Create a pool that only connects on first use.
    pub fn connect_lazy(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool = Self::pool_options(max_connections).connect_lazy_with(Self::connect_options(url)?);
        Ok(Self::new(pool))
    }

    fn connect_options(url: &str) -> Result<PgConnectOptions> {
        PgConnectOptions::from_str(url).or_raise(|| ErrorKind::Database)
    }

    fn pool_options(max_connections: Option<u32>) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(max_connections.unwrap_or(MAX_CONNECTIONS))
            .acquire_timeout(ACQUIRE_TIMEOUT)
    }

    /// Change the name used in log output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<PgPool> for PgExecutor {
    fn from(pool: PgPool) -> Self {
        Self::new(pool)
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, sql: &str, params: &[Param]) -> Result<u64> {
        let result = if params.is_empty() {
            // Simple query protocol: allows `DO $$ ... $$` blocks and
            // multiple statements, neither of which can be prepared.
            sqlx::raw_sql(sql).execute(&self.pool).await
        } else {
            params
                .iter()
                .fold(sqlx::query(sql), |query, param| param.bind(query))
                .execute(&self.pool)
                .await
        };
        Ok(result.or_raise(|| ErrorKind::Database)?.rows_affected())
    }

    async fn fetch_text(&self, sql: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> = sqlx::query_scalar(sql)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(value.flatten())
    }
}

#[async_trait]
impl<R> RecordSource<R> for PgExecutor
where
    R: for<'r> FromRow<'r, PgRow> + Send + Unpin + 'static,
{
    async fn fetch_records(&self, sql: &str, params: &[Param]) -> Result<Vec<R>> {
        params
            .iter()
            .fold(sqlx::query_as::<_, R>(sql), |query, param| param.bind_as(query))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }
}
