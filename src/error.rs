//! CLI Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not connect to the database")]
    Connection,
    #[display("cache operation failed for {_0}")]
    Cache(#[error(not(source))] String),
    #[display("could not write output")]
    Output,
    #[display("could not listen for shutdown signal")]
    Signal,
}
