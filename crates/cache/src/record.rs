//! A record type for queries whose shape is only known at runtime.

use crate::key::{FieldLookup, FieldValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};

/// One result row as a JSON object.
///
/// PostgreSQL does the row mapping: wrap the load query with
/// [`wrap_query`](Self::wrap_query) so every row arrives as a single
/// `row_to_json` column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonRecord(pub Map<String, Value>);

impl JsonRecord {
    /// Wrap a query so each of its rows is returned as one JSON object.
    pub fn wrap_query(sql: &str) -> String {
        let sql = sql.trim().trim_end_matches(';').trim_end();
        format!("select row_to_json(q) from ({sql}) as q")
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }
}

impl FieldLookup for JsonRecord {
    fn field(&self, name: &str) -> FieldValue {
        match self.0.get(name) {
            None => FieldValue::Missing,
            Some(Value::Null) => FieldValue::Null,
            Some(Value::String(s)) => FieldValue::Scalar(s.clone()),
            Some(Value::Number(n)) => FieldValue::Scalar(n.to_string()),
            Some(Value::Bool(b)) => FieldValue::Scalar(b.to_string()),
            Some(Value::Array(_) | Value::Object(_)) => FieldValue::Composite,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for JsonRecord {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let Json(map) = row.try_get::<Json<Map<String, Value>>, _>(0)?;
        Ok(Self(map))
    }
}

impl From<Map<String, Value>> for JsonRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
