//! Monitored table names.

use crate::error::{Error, ErrorKind, Result};
use derive_more::Display;
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").unwrap());

/// A validated, unqualified table name.
///
/// Table names end up interpolated into SQL (there is no way to bind an
/// identifier), so only plain identifiers are accepted. They are folded to
/// lower case the same way PostgreSQL folds unquoted identifiers, which keeps
/// the name identical to the `tg_table_name` the change-log trigger records.
///
/// Schema-qualified names are rejected; set the connection's `search_path`
/// instead.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{_0}")]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref().trim();
        if !IDENTIFIER.is_match(name) {
            exn::bail!(ErrorKind::InvalidTable(name.to_string()));
        }
        Ok(Self(name.to_lowercase()))
    }

    /// Parse a list of table names, keeping their order.
    pub fn parse_all<I, S>(names: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().map(Self::new).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a SQL string literal, for comparisons against `table_log`.
    pub(crate) fn literal(&self) -> String {
        // Identifiers never contain quotes, so no escaping is necessary.
        format!("'{}'", self.0)
    }
}

impl FromStr for TableName {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("api_keys", "api_keys")]
    #[case("ApiKeys", "apikeys")]
    #[case("  orders ", "orders")]
    #[case("_audit$2", "_audit$2")]
    fn test_valid(#[case] input: &str, #[case] expected: &str) {
        let table = TableName::new(input).unwrap();
        assert_eq!(table.as_str(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("public.api_keys")]
    #[case("1table")]
    #[case("users; drop table users")]
    #[case("\"quoted\"")]
    fn test_invalid(#[case] input: &str) {
        let err = TableName::new(input).unwrap_err();
        assert!(matches!(*err, ErrorKind::InvalidTable(_)));
    }

    #[test]
    fn test_literal() {
        let table: TableName = "Orders".parse().unwrap();
        assert_eq!(table.literal(), "'orders'");
    }

    #[test]
    fn test_parse_all_keeps_order() {
        let tables = TableName::parse_all(["b", "a", "c"]).unwrap();
        let names: Vec<_> = tables.iter().map(TableName::as_str).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }
}
