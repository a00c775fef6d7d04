//! Loading and bucketing records.

use crate::error::{ErrorKind, Result};
use crate::executor::RecordSource;
use crate::key::KeyField;
use crate::param::Param;
use std::collections::HashMap;
use tracing::instrument;

/// Records bucketed by key, each bucket in result-row order.
pub type Records<R> = HashMap<String, Vec<R>>;

/// Group records by their key.
///
/// Order within a key follows the input order and nothing is deduplicated.
/// The first record whose key cannot be extracted fails the whole grouping:
/// a record without a key has no consistent place in the map.
pub fn group_by_key<R>(records: Vec<R>, key: &KeyField<R>) -> Result<Records<R>> {
    let mut map: Records<R> = HashMap::new();
    for record in records {
        let value = key.extract(&record)?;
        map.entry(value).or_default().push(record);
    }
    Ok(map)
}

/// The configured load query, its parameters, and how to key the result.
#[derive(Debug)]
pub struct Loader<R> {
    query: String,
    params: Vec<Param>,
    key: KeyField<R>,
}

impl<R> Loader<R> {
    pub fn new(query: impl Into<String>, params: Vec<Param>, key: KeyField<R>) -> Self {
        Self {
            query: query.into(),
            params,
            key,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn key(&self) -> &KeyField<R> {
        &self.key
    }
}

impl<R> Loader<R>
where
    R: Send + 'static,
{
    /// Run the query and build a fresh map.
    ///
    /// Nothing outside the returned map is touched; publishing it is the
    /// caller's business.
    #[instrument(level = "debug", skip_all, fields(key = self.key.name(), records))]
    pub async fn load(&self, db: &dyn RecordSource<R>) -> Result<Records<R>> {
        let records = db
            .fetch_records(&self.query, &self.params)
            .await
            .map_err(|err| err.raise(ErrorKind::Load))?;
        tracing::Span::current().record("records", records.len());
        group_by_key(records, &self.key)
    }
}
