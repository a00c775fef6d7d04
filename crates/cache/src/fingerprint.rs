//! Staleness detection.
//!
//! A [`Fingerprint`] is a cheap summary of the monitored tables: per table,
//! the row count followed by the time of the last recorded mutation. Two
//! equal fingerprints mean "nothing worth reloading happened". This is a
//! heuristic, not a digest: a delete followed by an insert within the
//! resolution of the mutation timestamp leaves the fingerprint unchanged.

use crate::error::{ErrorKind, Result};
use crate::executor::QueryExecutor;
use crate::table::TableName;
use derive_more::Display;
use exn::OptionExt;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Stand-in for "never mutated", used when a table has no log entry yet.
pub(crate) const EPOCH_SENTINEL: &str = "1970-01-01 00:00:01.0000+00";

/// Opaque summary of the observed state of all monitored tables.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
#[display("{_0}")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Where the "last mutation" half of a fingerprint comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Staleness {
    /// The trigger-maintained `table_log`. Requires monitoring to be installed.
    #[default]
    ChangeLog,
    /// `pg_xact_commit_timestamp(xmin)` of the rows themselves. Requires
    /// `track_commit_timestamp = on` but no triggers; deletes only show up
    /// through the row count.
    CommitTimestamp,
}

impl Staleness {
    /// Whether change-log bookkeeping must be installed for this strategy.
    pub fn needs_monitoring(&self) -> bool {
        matches!(self, Self::ChangeLog)
    }

    fn table_expression(&self, table: &TableName) -> String {
        match self {
            Self::ChangeLog => format!(
                "cast(count(*) as varchar) || cast(coalesce((select max(operation_time) from table_log where table_name = {}), '{EPOCH_SENTINEL}') as varchar)",
                table.literal(),
            ),
            Self::CommitTimestamp => format!(
                "cast(count(*) as varchar) || cast(coalesce(max(pg_xact_commit_timestamp(xmin)), '{EPOCH_SENTINEL}') as varchar)"
            ),
        }
    }
}

/// Computes fingerprints for a fixed, ordered set of tables.
///
/// The query is assembled once. With several tables the per-table values are
/// joined in configuration order, so the same data always yields the same
/// fingerprint.
#[derive(Debug, Clone)]
pub struct StalenessOracle {
    tables: Vec<TableName>,
    staleness: Staleness,
    sql: String,
}

impl StalenessOracle {
    pub fn new(tables: Vec<TableName>, staleness: Staleness) -> Result<Self> {
        if tables.is_empty() {
            exn::bail!(ErrorKind::NoMonitoredTables);
        }
        let sql = Self::build_query(&tables, staleness);
        Ok(Self { tables, staleness, sql })
    }

    fn build_query(tables: &[TableName], staleness: Staleness) -> String {
        if let [table] = tables {
            return format!("select {} as ct from {table}", staleness.table_expression(table));
        }
        let parts = tables
            .iter()
            .enumerate()
            .map(|(ord, table)| format!("select {ord} as ord, {} as ct from {table}", staleness.table_expression(table)))
            .collect::<Vec<_>>()
            .join(" union all ");
        format!("select string_agg(ct, ', ' order by ord) from ({parts}) as t")
    }

    pub fn tables(&self) -> &[TableName] {
        &self.tables
    }

    pub fn staleness(&self) -> Staleness {
        self.staleness
    }

    /// The fingerprint query, exactly as it is sent to the database.
    pub fn query(&self) -> &str {
        &self.sql
    }

    /// Compute the current fingerprint.
    #[instrument(level = "debug", skip_all, fields(executor = db.name()))]
    pub async fn fingerprint(&self, db: &dyn QueryExecutor) -> Result<Fingerprint> {
        let value = db
            .fetch_text(&self.sql)
            .await
            .map_err(|err| err.raise(ErrorKind::StalenessCheck))?
            .ok_or_raise(|| ErrorKind::NoRows)?;
        Ok(Fingerprint(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockExecutor;
    use rstest::rstest;

    fn oracle(names: &[&str], staleness: Staleness) -> StalenessOracle {
        StalenessOracle::new(TableName::parse_all(names).unwrap(), staleness).unwrap()
    }

    #[test]
    fn test_single_table_change_log_query() {
        let oracle = oracle(&["api_keys"], Staleness::ChangeLog);
        assert_eq!(
            oracle.query(),
            "select cast(count(*) as varchar) || cast(coalesce((select max(operation_time) from table_log \
             where table_name = 'api_keys'), '1970-01-01 00:00:01.0000+00') as varchar) as ct from api_keys"
        );
    }

    #[test]
    fn test_single_table_commit_timestamp_query() {
        let oracle = oracle(&["api_keys"], Staleness::CommitTimestamp);
        assert_eq!(
            oracle.query(),
            "select cast(count(*) as varchar) || cast(coalesce(max(pg_xact_commit_timestamp(xmin)), \
             '1970-01-01 00:00:01.0000+00') as varchar) as ct from api_keys"
        );
    }

    #[test]
    fn test_multiple_tables_are_aggregated_in_order() {
        let oracle = oracle(&["orders", "customers"], Staleness::ChangeLog);
        let sql = oracle.query();
        assert!(sql.starts_with("select string_agg(ct, ', ' order by ord) from (select 0 as ord, "));
        assert!(sql.ends_with(") as t"));
        assert_eq!(sql.matches(" union all ").count(), 1);
        let orders = sql.find("from orders").unwrap();
        let customers = sql.find("select 1 as ord").unwrap();
        assert!(orders < customers);
        assert!(sql.contains("where table_name = 'customers'"));
    }

    #[rstest]
    #[case(&["a"], 0)]
    #[case(&["a", "b"], 1)]
    #[case(&["a", "b", "c"], 2)]
    fn test_union_count(#[case] names: &[&str], #[case] unions: usize) {
        let oracle = oracle(names, Staleness::CommitTimestamp);
        assert_eq!(oracle.query().matches(" union all ").count(), unions);
    }

    #[test]
    fn test_no_tables() {
        let err = StalenessOracle::new(Vec::new(), Staleness::ChangeLog).unwrap_err();
        assert_eq!(*err, ErrorKind::NoMonitoredTables);
    }

    #[tokio::test]
    async fn test_fingerprint_is_stable_until_mutation() {
        let db = MockExecutor::with_rows([1, 2]);
        let oracle = oracle(&["numbers"], Staleness::ChangeLog);
        let first = oracle.fingerprint(&db).await.unwrap();
        assert_eq!(first, oracle.fingerprint(&db).await.unwrap());
        db.mutate(|rows| rows.retain(|n| *n != 1)).await;
        assert_ne!(first, oracle.fingerprint(&db).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_rows() {
        let db = MockExecutor::<()>::default();
        db.return_no_rows(true).await;
        let err = oracle(&["numbers"], Staleness::ChangeLog).fingerprint(&db).await.unwrap_err();
        assert_eq!(*err, ErrorKind::NoRows);
    }

    #[tokio::test]
    async fn test_query_failure() {
        let db = MockExecutor::<()>::default();
        db.fail_fingerprint(true).await;
        let err = oracle(&["numbers"], Staleness::ChangeLog).fingerprint(&db).await.unwrap_err();
        assert_eq!(*err, ErrorKind::StalenessCheck);
    }
}
