//! In-memory executor for testing.

use super::{QueryExecutor, RecordSource};
use crate::error::{ErrorKind, Result};
use crate::param::Param;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

const TRIGGER_ROUTINE: &str = "create_table_monitor_trigger";

/// In-memory executor for testing.
///
/// Rows live in a `Vec` behind a [`RwLock`], so every trait method works on
/// `&self`. The fingerprint is the row count followed by a version number
/// that every [`mutate`](Self::mutate) bumps, which stands in for the
/// `count || max(operation_time)` a real database would report. Installed
/// monitoring triggers are tracked as a set, mirroring the database routine
/// that skips tables which already have one.
///
/// # Examples
///
/// ```
/// use pgmirror_cache::{MockExecutor, QueryExecutor};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let executor = MockExecutor::with_rows([1, 2, 3]);
/// let before = executor.fetch_text("select ...").await.unwrap();
/// executor.mutate(|rows| rows.push(4)).await;
/// let after = executor.fetch_text("select ...").await.unwrap();
/// assert_ne!(before, after);
/// # }
/// ```
pub struct MockExecutor<R> {
    name: String,
    state: RwLock<State<R>>,
    fingerprint_calls: AtomicUsize,
    load_calls: AtomicUsize,
}

struct State<R> {
    rows: Vec<R>,
    version: u64,
    triggers: BTreeSet<String>,
    broken_tables: BTreeSet<String>,
    statements: Vec<String>,
    fail_fingerprint: bool,
    fail_load: bool,
    no_rows: bool,
}

impl<R> MockExecutor<R> {
    /// Create a mock executor pre-populated with rows.
    pub fn with_rows(rows: impl IntoIterator<Item = R>) -> Self {
        Self {
            name: "mock".to_string(),
            state: RwLock::new(State {
                rows: rows.into_iter().collect(),
                version: 0,
                triggers: BTreeSet::new(),
                broken_tables: BTreeSet::new(),
                statements: Vec::new(),
                fail_fingerprint: false,
                fail_load: false,
                no_rows: false,
            }),
            fingerprint_calls: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
        }
    }

    /// Change the name of the mock executor.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Change the rows in place, as an insert/update/delete would.
    pub async fn mutate(&self, change: impl FnOnce(&mut Vec<R>)) {
        let mut state = self.state.write().await;
        change(&mut state.rows);
        state.version += 1;
    }

    /// Make fingerprint queries fail (or succeed again).
    pub async fn fail_fingerprint(&self, fail: bool) {
        self.state.write().await.fail_fingerprint = fail;
    }

    /// Make load queries fail (or succeed again).
    pub async fn fail_load(&self, fail: bool) {
        self.state.write().await.fail_load = fail;
    }

    /// Make fingerprint queries return no rows.
    pub async fn return_no_rows(&self, no_rows: bool) {
        self.state.write().await.no_rows = no_rows;
    }

    /// Make attaching a monitoring trigger to `table` fail, as it would for a
    /// table that does not exist.
    pub async fn break_table(&self, table: impl Into<String>) {
        self.state.write().await.broken_tables.insert(table.into());
    }

    /// Tables that have a monitoring trigger attached.
    pub async fn triggers(&self) -> Vec<String> {
        self.state.read().await.triggers.iter().cloned().collect()
    }

    /// Every statement passed to [`execute`](QueryExecutor::execute), in order.
    pub async fn statements(&self) -> Vec<String> {
        self.state.read().await.statements.clone()
    }

    /// Number of fingerprint queries run so far.
    pub fn fingerprint_calls(&self) -> usize {
        self.fingerprint_calls.load(Ordering::SeqCst)
    }

    /// Number of load queries run so far.
    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }
}

impl<R> Default for MockExecutor<R> {
    fn default() -> Self {
        Self::with_rows([])
    }
}

#[async_trait]
impl<R: Send + Sync> QueryExecutor for MockExecutor<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, sql: &str, params: &[Param]) -> Result<u64> {
        let mut state = self.state.write().await;
        state.statements.push(sql.to_string());
        if sql.contains(TRIGGER_ROUTINE) && !sql.contains("CREATE FUNCTION") {
            let Some(Param::Text(table)) = params.first() else {
                exn::bail!(ErrorKind::Database);
            };
            if state.broken_tables.contains(table) {
                exn::bail!(ErrorKind::Database);
            }
            state.triggers.insert(table.clone());
        }
        Ok(0)
    }

    async fn fetch_text(&self, _sql: &str) -> Result<Option<String>> {
        self.fingerprint_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        if state.fail_fingerprint {
            exn::bail!(ErrorKind::Database);
        }
        if state.no_rows {
            return Ok(None);
        }
        Ok(Some(format!("{}|{}", state.rows.len(), state.version)))
    }
}

#[async_trait]
impl<R> RecordSource<R> for MockExecutor<R>
where
    R: Clone + Send + Sync + 'static,
{
    async fn fetch_records(&self, _sql: &str, _params: &[Param]) -> Result<Vec<R>> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.read().await;
        if state.fail_load {
            exn::bail!(ErrorKind::Database);
        }
        Ok(state.rows.clone())
    }
}
