//! Configuration Error Types

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An explicitly requested configuration file does not exist.
    #[display("configuration file not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The configuration file extension is not one of toml, yaml, yml or json.
    #[display("unsupported configuration format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// The merged configuration could not be parsed into the expected shape.
    #[display("invalid configuration")]
    Invalid,
    /// The configuration parsed, but its values make no sense.
    #[display("configuration validation failed: {_0}")]
    Validation(#[error(not(source))] String),
    /// No cache with the given name is configured.
    #[display("no cache named {_0} is configured")]
    UnknownCache(#[error(not(source))] String),
}

impl ErrorKind {
    /// Configuration errors need a human to edit something; retrying is
    /// never useful.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
