//! Auto-refreshing in-memory cache of PostgreSQL query results.
//!
//! A [`DbCache`] runs one query, buckets the resulting records by a key field,
//! and serves lookups from memory. It stays fresh without polling the data
//! itself: triggers on the monitored tables record every mutation into a
//! small change log, and a background task compares a cheap fingerprint of
//! that log (plus the row counts) against the one taken at the last load.
//! Only a changed fingerprint causes a reload.
//!
//! # Architecture
//! - **Monitoring**: idempotent DDL for the change log, its routines and one
//!   trigger per table ([`ensure_monitoring`]).
//! - **Staleness**: the fingerprint query over all monitored tables
//!   ([`StalenessOracle`]).
//! - **Loading**: the configured query, mapped to records and grouped by key
//!   ([`Loader`], [`KeyField`]).
//! - **Refreshing**: fingerprint, compare, reload, swap; readers always see a
//!   complete [`Snapshot`].
//!
//! The cache talks to the database only through a [`QueryExecutor`] (and a
//! [`RecordSource`] for typed rows), normally a [`PgExecutor`] over a pool
//! the caller owns.

mod cache;
pub mod error;
mod executor;
mod fingerprint;
mod key;
mod loader;
mod monitor;
mod param;
mod record;
mod refresh;
mod snapshot;
mod table;

pub use crate::cache::{CacheBuilder, DEFAULT_REFRESH_INTERVAL, DbCache, MAX_REFRESH_INTERVAL};
#[cfg(feature = "mock")]
pub use crate::executor::MockExecutor;
pub use crate::executor::{ExecutorHandle, PgExecutor, QueryExecutor, RecordSource, SourceHandle};
pub use crate::fingerprint::{Fingerprint, Staleness, StalenessOracle};
pub use crate::key::{FieldLookup, FieldValue, KeyField};
pub use crate::loader::{Loader, Records, group_by_key};
pub use crate::monitor::{MonitorPolicy, ensure_monitoring};
pub use crate::param::Param;
pub use crate::record::JsonRecord;
pub use crate::refresh::{RefreshOutcome, RefreshStats, RefreshStatsSnapshot};
pub use crate::snapshot::Snapshot;
pub use crate::table::TableName;
