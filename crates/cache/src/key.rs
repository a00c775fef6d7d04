//! Key extraction.
//!
//! Every loaded record is bucketed by a string key. Rather than looking the
//! key field up by name at runtime, callers hand over either an accessor
//! closure (checked by the compiler) or a record type that implements
//! [`FieldLookup`], an explicit mapping from field names to values.

use crate::error::{ErrorKind, Result};
use exn::Exn;
use std::fmt;
use std::sync::Arc;

/// The value of a named field, as seen by [`FieldLookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// The record has no field with that name.
    Missing,
    /// The field exists but holds no value.
    Null,
    /// A scalar value rendered as a string.
    Scalar(String),
    /// A nested value (list, map, ...) that cannot be used as a key.
    Composite,
}

/// Field access by name, for record types without a fixed shape.
pub trait FieldLookup {
    fn field(&self, name: &str) -> FieldValue;
}

type Accessor<R> = dyn Fn(&R) -> Result<String> + Send + Sync;

/// The named field a cache buckets its records by.
pub struct KeyField<R> {
    name: Arc<str>,
    accessor: Arc<Accessor<R>>,
}

impl<R: 'static> KeyField<R> {
    /// Key records with an accessor. A `None` from the accessor is a null key.
    ///
    /// ```
    /// use pgmirror_cache::KeyField;
    ///
    /// struct ApiKey {
    ///     key: Option<String>,
    /// }
    ///
    /// let field = KeyField::new("key", |k: &ApiKey| k.key.clone());
    /// let record = ApiKey { key: Some("abc".to_string()) };
    /// assert_eq!(field.extract(&record).unwrap(), "abc");
    /// ```
    pub fn new<F, S>(name: impl Into<String>, accessor: F) -> Self
    where
        F: Fn(&R) -> Option<S> + Send + Sync + 'static,
        S: ToString,
    {
        let name: Arc<str> = Arc::from(name.into());
        let field = name.clone();
        Self {
            name,
            accessor: Arc::new(move |record: &R| -> Result<String> {
                match accessor(record) {
                    Some(value) => Ok(value.to_string()),
                    None => Err(Exn::from(ErrorKind::KeyFieldNil(field.to_string()))),
                }
            }),
        }
    }
}

impl<R> KeyField<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Extract the key of a single record.
    pub fn extract(&self, record: &R) -> Result<String> {
        (self.accessor)(record)
    }
}

impl<R: FieldLookup + 'static> KeyField<R> {
    /// Key records by looking the field up through [`FieldLookup`].
    pub fn lookup(name: impl Into<String>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let field = name.clone();
        Self {
            name,
            accessor: Arc::new(move |record: &R| -> Result<String> {
                let kind = match record.field(&field) {
                    FieldValue::Scalar(value) => return Ok(value),
                    FieldValue::Missing => ErrorKind::KeyFieldNotFound(field.to_string()),
                    FieldValue::Null => ErrorKind::KeyFieldNil(field.to_string()),
                    FieldValue::Composite => ErrorKind::KeyFieldNotScalar(field.to_string()),
                };
                Err(Exn::from(kind))
            }),
        }
    }
}

impl<R> Clone for KeyField<R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            accessor: self.accessor.clone(),
        }
    }
}

impl<R> fmt::Debug for KeyField<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyField").field("name", &self.name).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    struct Account {
        id: Option<i64>,
        region: &'static str,
    }

    struct Dynamic(Vec<(&'static str, FieldValue)>);
    impl FieldLookup for Dynamic {
        fn field(&self, name: &str) -> FieldValue {
            self.0.iter().find(|(n, _)| *n == name).map_or(FieldValue::Missing, |(_, v)| v.clone())
        }
    }

    #[test]
    fn test_accessor_converts_to_string() {
        let field = KeyField::new("id", |a: &Account| a.id);
        let account = Account { id: Some(42), region: "eu" };
        assert_eq!(field.extract(&account).unwrap(), "42");
        assert_eq!(field.name(), "id");
    }

    #[test]
    fn test_accessor_null_key() {
        let field = KeyField::new("id", |a: &Account| a.id);
        let err = field.extract(&Account { id: None, region: "eu" }).unwrap_err();
        assert_eq!(*err, ErrorKind::KeyFieldNil("id".to_string()));
    }

    #[test]
    fn test_accessor_always_present() {
        let field = KeyField::new("region", |a: &Account| Some(a.region));
        assert_eq!(field.extract(&Account { id: None, region: "us" }).unwrap(), "us");
    }

    #[rstest]
    #[case(FieldValue::Scalar("A".to_string()), Ok("A"))]
    #[case(FieldValue::Null, Err(ErrorKind::KeyFieldNil("key".to_string())))]
    #[case(FieldValue::Composite, Err(ErrorKind::KeyFieldNotScalar("key".to_string())))]
    fn test_lookup(#[case] value: FieldValue, #[case] expected: std::result::Result<&str, ErrorKind>) {
        let field = KeyField::<Dynamic>::lookup("key");
        let record = Dynamic(vec![("key", value)]);
        let result = field.extract(&record).map_err(|err| (*err).clone());
        assert_eq!(result, expected.map(str::to_string));
    }

    #[test]
    fn test_lookup_missing_field() {
        let field = KeyField::<Dynamic>::lookup("key");
        let err = field.extract(&Dynamic(vec![("other", FieldValue::Null)])).unwrap_err();
        assert_eq!(*err, ErrorKind::KeyFieldNotFound("key".to_string()));
    }
}
