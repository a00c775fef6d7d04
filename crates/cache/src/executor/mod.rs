//! The query-executing handle a cache runs against.
//!
//! The cache never opens or closes connections itself. It is handed an
//! executor (usually a [`PgExecutor`] over a caller-owned pool) and borrows it
//! for the fingerprint, load and monitoring statements. Splitting the seam
//! into two traits keeps [`QueryExecutor`] object safe, while
//! [`RecordSource`] carries the record type the row-mapping layer produces.

#[cfg(any(test, feature = "mock"))]
mod mock;
mod postgres;

#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockExecutor;
pub use self::postgres::PgExecutor;
use crate::error::Result;
use crate::param::Param;
use async_trait::async_trait;
use std::sync::Arc;

/// Untyped statement execution: DDL, and single-value queries.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Name of the executor, used for logging only.
    fn name(&self) -> &str;

    /// Execute a statement, returning the number of rows affected.
    async fn execute(&self, sql: &str, params: &[Param]) -> Result<u64>;

    /// Fetch the first column of the first row as text.
    ///
    /// Returns `None` when the query produces no rows, or when that value is
    /// `NULL`.
    async fn fetch_text(&self, sql: &str) -> Result<Option<String>>;
}

/// Typed record loading.
///
/// Implementations are the bridge to the row-mapping layer: every result row
/// of `sql` becomes one `R`, in result order.
#[async_trait]
pub trait RecordSource<R>: Send + Sync
where
    R: Send + 'static,
{
    async fn fetch_records(&self, sql: &str, params: &[Param]) -> Result<Vec<R>>;
}

/// Shared handle to an untyped executor.
pub type ExecutorHandle = Arc<dyn QueryExecutor>;
/// Shared handle to a typed record source.
pub type SourceHandle<R> = Arc<dyn RecordSource<R>>;
