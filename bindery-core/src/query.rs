use crate::{AsValue, Value};
use anyhow::{Error, Result};
use std::{
    any,
    collections::BTreeMap,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// Metadata about modify operations (INSERT/UPDATE/DELETE).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowsAffected {
    /// Total number of rows impacted.
    pub rows_affected: u64,
    /// Backend-specific last inserted / affected identifier when available.
    pub last_affected_id: Option<i64>,
}

impl Extend<RowsAffected> for RowsAffected {
    fn extend<T: IntoIterator<Item = RowsAffected>>(&mut self, iter: T) {
        for elem in iter {
            self.rows_affected += elem.rows_affected;
            if elem.last_affected_id.is_some() {
                self.last_affected_id = elem.last_affected_id;
            }
        }
    }
}

/// Shared reference-counted column name list.
pub type RowNames = Arc<[String]>;
/// Owned row value slice matching `RowNames` length.
pub type Row = Box<[Value]>;

/// A result row with its corresponding column labels.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLabeled {
    /// Column names.
    pub labels: RowNames,
    /// Data values (aligned by index with `labels`).
    pub values: Row,
}

impl RowLabeled {
    pub fn new(labels: RowNames, values: Row) -> Self {
        Self { labels, values }
    }
    pub fn names(&self) -> &[String] {
        &self.labels
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    /// Index of the column, compared case insensitively.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.labels.iter().position(|v| v.eq_ignore_ascii_case(name))
    }
    pub fn get_column(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|i| &self.values[i])
    }
}

/// Rows produced by a driver, pulled one at a time.
pub type RowSource = Box<dyn Iterator<Item = Result<RowLabeled>> + Send>;

/// Values of the output parameters of a stored procedure call.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct OutputValues(pub BTreeMap<String, Value>);

impl OutputValues {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
    /// Typed read of an output parameter.
    pub fn get<T: AsValue>(&self, name: &str) -> Result<T> {
        let value = self.0.get(name).ok_or_else(|| {
            Error::msg(format!(
                "No output parameter named `{name}`, available: {:?}",
                self.0.keys().collect::<Vec<_>>()
            ))
        })?;
        T::try_from_value(value.clone()).map_err(|e| {
            e.context(format!(
                "While reading output parameter `{name}` as {}",
                any::type_name::<T>()
            ))
        })
    }
}

/// Outcome of one execution, its shape follows the statement kind.
pub enum QueryResult {
    /// Rows of a query, or generated keys of an update or batch.
    Rows(RowSource),
    /// A single modify effect.
    Affected(RowsAffected),
    /// One modify effect per batch element.
    Batch(Vec<RowsAffected>),
    /// A stored procedure call.
    Call {
        affected: RowsAffected,
        outputs: OutputValues,
    },
}

impl QueryResult {
    pub fn kind_name(&self) -> &'static str {
        match self {
            QueryResult::Rows(..) => "rows",
            QueryResult::Affected(..) => "affected count",
            QueryResult::Batch(..) => "batch counts",
            QueryResult::Call { .. } => "call outputs",
        }
    }
}

impl Debug for QueryResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Rows(..) => f.write_str("QueryResult::Rows(..)"),
            QueryResult::Affected(v) => write!(f, "QueryResult::Affected({v:?})"),
            QueryResult::Batch(v) => write!(f, "QueryResult::Batch({v:?})"),
            QueryResult::Call { affected, outputs } => {
                write!(f, "QueryResult::Call({affected:?}, {outputs:?})")
            }
        }
    }
}

impl From<RowsAffected> for QueryResult {
    fn from(value: RowsAffected) -> Self {
        QueryResult::Affected(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{OutputValues, RowLabeled, RowsAffected};
    use crate::Value;

    #[test]
    fn columns_case_insensitive() {
        let row = RowLabeled::new(
            ["ID".to_string(), "Name".to_string()].into(),
            [Value::Int64(Some(1)), Value::Varchar(Some("Ada".into()))].into(),
        );
        assert_eq!(row.position("name"), Some(1));
        assert_eq!(row.get_column("id"), Some(&Value::Int64(Some(1))));
        assert_eq!(row.get_column("missing"), None);
    }

    #[test]
    fn extend_affected() {
        let mut total = RowsAffected::default();
        total.extend([
            RowsAffected {
                rows_affected: 2,
                last_affected_id: Some(4),
            },
            RowsAffected {
                rows_affected: 3,
                last_affected_id: None,
            },
        ]);
        assert_eq!(total.rows_affected, 5);
        assert_eq!(total.last_affected_id, Some(4));
    }

    #[test]
    fn typed_outputs() {
        let mut outputs = OutputValues::new();
        outputs.insert("total", Value::Int32(Some(12)));
        assert_eq!(outputs.get::<i64>("total").unwrap(), 12);
        assert!(outputs.get::<i64>("missing").is_err());
        assert!(outputs.get::<String>("total").is_err());
    }
}
