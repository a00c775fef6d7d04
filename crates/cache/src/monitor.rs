//! Change-log bookkeeping.
//!
//! Row mutations on monitored tables are recorded by a trigger into a small
//! log table (`table_log`: table name and last mutation time), so the
//! staleness check can look at one row per table instead of scanning the
//! tables themselves. Everything here is idempotent and safe to run on every
//! startup, including against tables that are already instrumented.

use crate::error::{ErrorKind, Result};
use crate::executor::QueryExecutor;
use crate::param::Param;
use crate::table::TableName;
use serde::{Deserialize, Serialize};
use tracing::instrument;

const CREATE_TABLE_LOG: &str = include_str!("../queries/create_table_log.sql");
const CREATE_LOG_CHANGES_FUNCTION: &str = include_str!("../queries/create_log_changes_function.sql");
const CREATE_MONITOR_TRIGGER_FUNCTION: &str = include_str!("../queries/create_monitor_trigger_function.sql");
const ATTACH_MONITOR_TRIGGER: &str = include_str!("../queries/attach_monitor_trigger.sql");

/// What a cache constructor does when monitoring cannot be installed on
/// every table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorPolicy {
    /// Construction fails.
    #[default]
    Strict,
    /// A warning is logged and construction continues. Tables without a
    /// trigger still change the fingerprint through their row count.
    Lenient,
}

/// Install the change log, its trigger routines, and one trigger per table.
///
/// The log table and both routines are required: if any of them cannot be
/// created the function returns immediately. Tables are then instrumented one
/// by one; a failure on one table is logged and does not stop the others, and
/// [`ErrorKind::Monitoring`] naming every failed table is returned at the end.
///
/// DDL needs a role that may create tables, functions and triggers, so this
/// is usually run against an admin executor rather than the read pool.
#[instrument(skip_all, fields(executor = db.name(), tables = tables.len()))]
pub async fn ensure_monitoring(tables: &[TableName], db: &dyn QueryExecutor) -> Result<()> {
    let bookkeeping = [
        ("table_log", CREATE_TABLE_LOG),
        ("log_changes", CREATE_LOG_CHANGES_FUNCTION),
        ("create_table_monitor_trigger", CREATE_MONITOR_TRIGGER_FUNCTION),
    ];
    for (object, sql) in bookkeeping {
        db.execute(sql, &[])
            .await
            .map_err(|err| err.raise(ErrorKind::Monitoring(object.to_string())))?;
    }

    let mut failed = Vec::new();
    for table in tables {
        match db.execute(ATTACH_MONITOR_TRIGGER, &[Param::from(table.as_str())]).await {
            Ok(_) => tracing::debug!(table = %table, "Change monitoring trigger in place"),
            Err(err) => {
                tracing::warn!(table = %table, error = ?err, "Failed to attach change monitoring trigger");
                failed.push(table.as_str());
            },
        }
    }
    if !failed.is_empty() {
        exn::bail!(ErrorKind::Monitoring(failed.join(", ")));
    }
    Ok(())
}
