//! Cache Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Errors raised by the refresh loop
//! never reach readers; they are logged and the previous snapshot is kept.

use derive_more::{Display, Error};

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The executor failed to run a statement.
    #[display("database error")]
    Database,
    /// The cache could not be made ready; nothing was returned to the caller.
    #[display("failed to construct cache")]
    Construction,
    /// A monitored table name is not a plain SQL identifier.
    #[display("invalid table name: {_0}")]
    InvalidTable(#[error(not(source))] String),
    /// A cache must watch at least one table.
    #[display("no monitored tables configured")]
    NoMonitoredTables,
    /// The refresh interval must be non-zero and at most
    /// [`MAX_REFRESH_INTERVAL`](crate::MAX_REFRESH_INTERVAL).
    #[display("refresh interval must be greater than zero and at most one year")]
    InvalidInterval,
    /// Change-log bookkeeping (log table, routines or per-table triggers)
    /// could not be installed for the named objects.
    #[display("failed to install change monitoring for: {_0}")]
    Monitoring(#[error(not(source))] String),
    /// The fingerprint query failed.
    #[display("staleness check failed")]
    StalenessCheck,
    /// The fingerprint query produced no row (or a `NULL` aggregate).
    #[display("staleness check query returned no rows")]
    NoRows,
    /// The load query failed, or its rows could not be mapped to records.
    #[display("failed to load cache data")]
    Load,
    /// A loaded record has no field with the configured key name.
    #[display("key field not found: {_0}")]
    KeyFieldNotFound(#[error(not(source))] String),
    /// A loaded record has a null key.
    #[display("key field is null: {_0}")]
    KeyFieldNil(#[error(not(source))] String),
    /// A loaded record has a key that is not a scalar value.
    #[display("key field is not a scalar: {_0}")]
    KeyFieldNotScalar(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::StalenessCheck | Self::NoRows | Self::Load)
    }

    /// Returns `true` if the error was caused by a record's key field.
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::KeyFieldNotFound(_) | Self::KeyFieldNil(_) | Self::KeyFieldNotScalar(_))
    }
}
