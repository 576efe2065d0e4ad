use crate::{
    Error, MethodDescriptor, OutputValues, QualifierSet, QueryResult, Result, RowLabeled,
    RowMapper, RowSource, RowsAffected, Value,
    resource::{Lease, Resource},
};
use rust_decimal::Decimal;
use std::{
    any::{self, Any},
    collections::{BTreeMap, HashMap},
    fmt::{self, Debug, Formatter},
    hash::Hash,
    sync::Arc,
};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

/// How a declared return type consumes the result of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnShape {
    /// `()`, the result is discarded.
    Unit,
    /// A scalar: the first row, or the affected row count of an update.
    Single,
    /// `Option<T>`: the first row, if any.
    Optional,
    /// [`One<T>`]: exactly one row.
    One,
    /// `Vec<T>`: every row, or one count per batch element.
    List,
    /// `HashMap`/`BTreeMap`: one entry per row.
    Map {
        key_column: Option<String>,
        value_column: Option<String>,
    },
    /// [`RowIter<T>`]: rows pulled on demand.
    Lazy,
    /// [`OutParameters`]: outputs of a stored procedure call.
    OutParameters,
    /// Whatever a default body returns, never mapped.
    Opaque,
}

impl ReturnShape {
    pub fn is_lazy(&self) -> bool {
        matches!(self, ReturnShape::Lazy)
    }
}

/// Everything a return type needs to map a result.
pub struct Mapping<'a> {
    pub(crate) method: &'a MethodDescriptor,
    pub(crate) qualifiers: QualifierSet,
    pub(crate) resource: &'a Resource,
}

impl<'a> Mapping<'a> {
    pub fn method(&self) -> &MethodDescriptor {
        self.method
    }

    /// Qualifiers attached to the call, used to pick the mappers.
    pub fn qualifiers(&self) -> &QualifierSet {
        &self.qualifiers
    }

    /// Row mapper for `T`, qualified with the qualifiers of the call.
    pub fn row_mapper<T: Any>(&self) -> Result<Arc<dyn RowMapper<T>>> {
        self.method.row_mapper::<T>(&self.qualifiers)
    }

    /// Column mapper for `T`, qualified with the qualifiers of the call.
    pub fn column_mapper<T: Any>(&self) -> Result<Arc<dyn crate::ColumnMapper<T>>> {
        self.method.column_mapper::<T>(&self.qualifiers)
    }

    /// Unqualified column mapper, used for keys and counts.
    pub fn plain_column_mapper<T: Any>(&self) -> Result<Arc<dyn crate::ColumnMapper<T>>> {
        self.method.column_mapper::<T>(&QualifierSet::new())
    }

    pub fn error(&self, source: anyhow::Error) -> Error {
        Error::mapping(self.method.site(), source)
    }

    pub fn rows(&self, result: QueryResult) -> Result<RowSource> {
        match result {
            QueryResult::Rows(rows) => Ok(rows),
            other => Err(self.error(anyhow::Error::msg(format!(
                "Expected rows but the statement returned {}",
                other.kind_name()
            )))),
        }
    }

    pub fn next_row(&self, rows: &mut RowSource) -> Result<Option<RowLabeled>> {
        rows.next().transpose().map_err(|source| Error::Execution {
            method: self.method.site().to_string(),
            chunk: None,
            source,
        })
    }

    /// Affected count of an update or a call, as a value.
    fn count(result: &QueryResult) -> Option<Value> {
        match result {
            QueryResult::Affected(v) | QueryResult::Call { affected: v, .. } => {
                Some(Value::UInt64(Some(v.rows_affected)))
            }
            _ => None,
        }
    }

    pub(crate) fn lease(&self) -> Option<Arc<Lease>> {
        self.resource.lease_lazy()
    }
}

/// A type a declared method can return.
pub trait Returns: Sized + Send + 'static {
    fn shape() -> ReturnShape;
    fn build(result: QueryResult, mapping: &Mapping<'_>) -> Result<Self>;
}

impl Returns for () {
    fn shape() -> ReturnShape {
        ReturnShape::Unit
    }
    fn build(_result: QueryResult, _mapping: &Mapping<'_>) -> Result<Self> {
        Ok(())
    }
}

fn single<T: Any>(result: QueryResult, mapping: &Mapping<'_>) -> Result<T> {
    if let Some(count) = Mapping::count(&result) {
        return mapping
            .plain_column_mapper::<T>()?
            .map(count)
            .map_err(|e| mapping.error(e));
    }
    let mut rows = mapping.rows(result)?;
    let row = mapping.next_row(&mut rows)?.ok_or_else(|| {
        mapping.error(anyhow::Error::msg(format!(
            "Expected a row to map into {}, the query returned none",
            any::type_name::<T>()
        )))
    })?;
    mapping
        .row_mapper::<T>()?
        .map(&row)
        .map_err(|e| mapping.error(e))
}

macro_rules! impl_returns_single {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Returns for $ty {
                fn shape() -> ReturnShape {
                    ReturnShape::Single
                }
                fn build(result: QueryResult, mapping: &Mapping<'_>) -> Result<Self> {
                    single::<$ty>(result, mapping)
                }
            }
        )+
    };
}

impl_returns_single!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    Decimal,
    String,
    Arc<str>,
    Box<[u8]>,
    Uuid,
    Date,
    Time,
    PrimitiveDateTime,
    OffsetDateTime,
    Value,
);

impl<T: Send + 'static> Returns for Option<T> {
    fn shape() -> ReturnShape {
        ReturnShape::Optional
    }
    fn build(result: QueryResult, mapping: &Mapping<'_>) -> Result<Self> {
        if let Some(count) = Mapping::count(&result) {
            return mapping
                .plain_column_mapper::<T>()?
                .map(count)
                .map(Some)
                .map_err(|e| mapping.error(e));
        }
        let mut rows = mapping.rows(result)?;
        match mapping.next_row(&mut rows)? {
            Some(row) => mapping
                .row_mapper::<T>()?
                .map(&row)
                .map(Some)
                .map_err(|e| mapping.error(e)),
            None => Ok(None),
        }
    }
}

/// Exactly one row, zero or more than one is a mapping error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct One<T>(pub T);

impl<T> One<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Send + 'static> Returns for One<T> {
    fn shape() -> ReturnShape {
        ReturnShape::One
    }
    fn build(result: QueryResult, mapping: &Mapping<'_>) -> Result<Self> {
        let mut rows = mapping.rows(result)?;
        let Some(row) = mapping.next_row(&mut rows)? else {
            return Err(mapping.error(anyhow::Error::msg(
                "Expected exactly one row, the query returned none",
            )));
        };
        if mapping.next_row(&mut rows)?.is_some() {
            return Err(mapping.error(anyhow::Error::msg(
                "Expected exactly one row, the query returned more",
            )));
        }
        mapping
            .row_mapper::<T>()?
            .map(&row)
            .map(One)
            .map_err(|e| mapping.error(e))
    }
}

impl<T: Send + 'static> Returns for Vec<T> {
    fn shape() -> ReturnShape {
        ReturnShape::List
    }
    fn build(result: QueryResult, mapping: &Mapping<'_>) -> Result<Self> {
        if let QueryResult::Batch(counts) = result {
            let mapper = mapping.plain_column_mapper::<T>()?;
            return counts
                .into_iter()
                .map(|v| {
                    mapper
                        .map(Value::UInt64(Some(v.rows_affected)))
                        .map_err(|e| mapping.error(e))
                })
                .collect();
        }
        let mut rows = mapping.rows(result)?;
        let mapper = mapping.row_mapper::<T>()?;
        let mut values = Vec::new();
        while let Some(row) = mapping.next_row(&mut rows)? {
            values.push(mapper.map(&row).map_err(|e| mapping.error(e))?);
        }
        Ok(values)
    }
}

fn entries<K: Any, V: Any>(
    result: QueryResult,
    mapping: &Mapping<'_>,
    mut insert: impl FnMut(K, V),
) -> Result<()> {
    let (key_column, value_column) = match mapping.method.operation().return_shape() {
        ReturnShape::Map {
            key_column,
            value_column,
        } => (key_column.as_deref(), value_column.as_deref()),
        _ => (None, None),
    };
    let column = |row: &RowLabeled, name: Option<&str>| -> Result<Value> {
        match name {
            Some(name) => row.get_column(name).cloned().ok_or_else(|| {
                mapping.error(anyhow::Error::msg(format!(
                    "There is no column named `{name}`, available: {:?}",
                    row.names()
                )))
            }),
            None => row
                .values
                .first()
                .cloned()
                .ok_or_else(|| mapping.error(anyhow::Error::msg("The row has no columns"))),
        }
    };
    let mut rows = mapping.rows(result)?;
    let key_mapper = mapping.plain_column_mapper::<K>()?;
    let value_mapper: Box<dyn Fn(&RowLabeled) -> Result<V>> = match value_column {
        Some(name) => {
            let mapper = mapping.column_mapper::<V>()?;
            Box::new(move |row| {
                mapper
                    .map(column(row, Some(name))?)
                    .map_err(|e| mapping.error(e))
            })
        }
        None => {
            let mapper = mapping.row_mapper::<V>()?;
            Box::new(move |row| mapper.map(row).map_err(|e| mapping.error(e)))
        }
    };
    while let Some(row) = mapping.next_row(&mut rows)? {
        let key = key_mapper
            .map(column(&row, key_column)?)
            .map_err(|e| mapping.error(e))?;
        insert(key, value_mapper(&row)?);
    }
    Ok(())
}

impl<K, V> Returns for HashMap<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    fn shape() -> ReturnShape {
        ReturnShape::Map {
            key_column: None,
            value_column: None,
        }
    }
    fn build(result: QueryResult, mapping: &Mapping<'_>) -> Result<Self> {
        let mut map = HashMap::new();
        entries(result, mapping, |k, v| {
            map.insert(k, v);
        })?;
        Ok(map)
    }
}

impl<K, V> Returns for BTreeMap<K, V>
where
    K: Ord + Send + 'static,
    V: Send + 'static,
{
    fn shape() -> ReturnShape {
        ReturnShape::Map {
            key_column: None,
            value_column: None,
        }
    }
    fn build(result: QueryResult, mapping: &Mapping<'_>) -> Result<Self> {
        let mut map = BTreeMap::new();
        entries(result, mapping, |k, v| {
            map.insert(k, v);
        })?;
        Ok(map)
    }
}

/// Rows mapped one at a time, while the caller iterates.
///
/// For an on demand call the resource stays open until the iterator is
/// exhausted, fails or is [closed](RowIter::close). An iterator dropped before
/// any of those still closes it.
///
/// Transactions do not extend to the iteration: a method decorated with
/// [`crate::Transaction`] has committed by the time the iterator is returned,
/// rows are pulled outside of it. Collect into a `Vec` when the rows must be
/// read inside the transaction.
pub struct RowIter<T> {
    method: String,
    rows: Option<RowSource>,
    mapper: Arc<dyn RowMapper<T>>,
    lease: Option<Arc<Lease>>,
}

impl<T> RowIter<T> {
    /// Stop iterating and release the resource.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    pub fn is_closed(&self) -> bool {
        self.rows.is_none()
    }

    fn finish(&mut self) -> Result<()> {
        self.rows = None;
        match self.lease.take() {
            Some(lease) => lease.release(),
            None => Ok(()),
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        match self.finish() {
            Ok(()) => error,
            Err(cleanup) => error.suppress(cleanup),
        }
    }
}

impl<T> Iterator for RowIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.rows.as_mut()?.next();
        match next {
            Some(Ok(row)) => match self.mapper.map(&row) {
                Ok(value) => Some(Ok(value)),
                Err(e) => {
                    let error = Error::mapping(&self.method, e);
                    Some(Err(self.fail(error)))
                }
            },
            Some(Err(source)) => {
                let error = Error::Execution {
                    method: self.method.clone(),
                    chunk: None,
                    source,
                };
                Some(Err(self.fail(error)))
            }
            None => self.finish().err().map(Err),
        }
    }
}

impl<T> Debug for RowIter<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RowIter<{}>({}{})",
            any::type_name::<T>(),
            self.method,
            if self.rows.is_none() { ", closed" } else { "" }
        )
    }
}

impl<T: Send + 'static> Returns for RowIter<T> {
    fn shape() -> ReturnShape {
        ReturnShape::Lazy
    }
    fn build(result: QueryResult, mapping: &Mapping<'_>) -> Result<Self> {
        let rows = mapping.rows(result)?;
        let mapper = mapping.row_mapper::<T>()?;
        Ok(RowIter {
            method: mapping.method.site().to_string(),
            rows: Some(rows),
            mapper,
            lease: mapping.lease(),
        })
    }
}

/// Result of a stored procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutParameters {
    pub affected: RowsAffected,
    outputs: OutputValues,
}

impl OutParameters {
    pub fn get<T: crate::AsValue>(&self, name: &str) -> anyhow::Result<T> {
        self.outputs.get(name)
    }
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.outputs.get_value(name)
    }
    pub fn outputs(&self) -> &OutputValues {
        &self.outputs
    }
}

impl Returns for OutParameters {
    fn shape() -> ReturnShape {
        ReturnShape::OutParameters
    }
    fn build(result: QueryResult, mapping: &Mapping<'_>) -> Result<Self> {
        match result {
            QueryResult::Call { affected, outputs } => Ok(OutParameters { affected, outputs }),
            other => Err(mapping.error(anyhow::Error::msg(format!(
                "Expected the outputs of a call, the statement returned {}",
                other.kind_name()
            )))),
        }
    }
}
