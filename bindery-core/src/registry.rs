use crate::{
    ArgumentValue, AsValue, Error, QualifiedType, QualifierSet, RegistryKind, RowLabeled, TypeKey,
    Value,
};
use anyhow::Context;
use rust_decimal::Decimal;
use std::{
    any::{self, Any},
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::{Arc, PoisonError, RwLock},
};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

/// Turns a typed argument into a statement parameter.
pub trait Binder<T: ?Sized>: Send + Sync {
    fn bind(&self, value: &T) -> anyhow::Result<Value>;
}

impl<T: ?Sized, F> Binder<T> for F
where
    F: Fn(&T) -> anyhow::Result<Value> + Send + Sync,
{
    fn bind(&self, value: &T) -> anyhow::Result<Value> {
        self(value)
    }
}

/// Reads a single column value.
pub trait ColumnMapper<T>: Send + Sync {
    fn map(&self, value: Value) -> anyhow::Result<T>;
}

impl<T, F> ColumnMapper<T> for F
where
    F: Fn(Value) -> anyhow::Result<T> + Send + Sync,
{
    fn map(&self, value: Value) -> anyhow::Result<T> {
        self(value)
    }
}

/// Reads a whole row.
pub trait RowMapper<T>: Send + Sync {
    fn map(&self, row: &RowLabeled) -> anyhow::Result<T>;
}

impl<T, F> RowMapper<T> for F
where
    F: Fn(&RowLabeled) -> anyhow::Result<T> + Send + Sync,
{
    fn map(&self, row: &RowLabeled) -> anyhow::Result<T> {
        self(row)
    }
}

/// Row mapper reading the first column through a column mapper.
pub struct FirstColumn<T>(pub Arc<dyn ColumnMapper<T>>);

impl<T> RowMapper<T> for FirstColumn<T> {
    fn map(&self, row: &RowLabeled) -> anyhow::Result<T> {
        let value = row
            .values
            .first()
            .cloned()
            .context("The row has no columns")?;
        self.0.map(value)
    }
}

pub(crate) type ErasedBinder = Arc<dyn Fn(&ArgumentValue) -> anyhow::Result<Value> + Send + Sync>;
type Erased = Arc<dyn Any + Send + Sync>;

/// Binders and mappers registered at one scope.
///
/// Registrations are keyed by the exact (type, qualifier set) pair, a later
/// registration for the same pair shadows the earlier one.
#[derive(Default, Clone)]
pub struct Registry {
    binders: Vec<(QualifiedType, ErasedBinder)>,
    column_mappers: Vec<(QualifiedType, Erased)>,
    row_mappers: Vec<(QualifiedType, Erased)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the binders and column mappers of every [`AsValue`]
    /// type, [`Value`] and their `Option<_>`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        macro_rules! builtins {
            ($($ty:ty),+ $(,)?) => {
                $(
                    registry.register_as_value::<$ty>();
                    registry.register_as_value::<Option<$ty>>();
                )+
            };
        }
        builtins!(
            bool,
            i8,
            i16,
            i32,
            i64,
            u8,
            u16,
            u32,
            u64,
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
        );
        registry.register_binder::<Value, _>(|v: &Value| Ok(v.clone()));
        registry.register_column_mapper::<Value, _>(Ok::<Value, anyhow::Error>);
        registry.register_binder::<&'static str, _>(|v: &&'static str| {
            Ok(Value::Varchar(Some(v.to_string())))
        });
        registry.register_binder::<usize, _>(|v: &usize| Ok((*v as u64).as_value()));
        registry.register_column_mapper::<usize, _>(|v: Value| {
            Ok(usize::try_from(u64::try_from_value(v)?)?)
        });
        registry
    }

    fn register_as_value<T: AsValue + Clone + Send + Sync + 'static>(&mut self) {
        self.register_binder::<T, _>(|v: &T| Ok(v.clone().as_value()));
        self.register_column_mapper::<T, _>(|v: Value| T::try_from_value(v));
    }

    pub fn register_binder<T, B>(&mut self, binder: B) -> &mut Self
    where
        T: Any + Send + Sync,
        B: Binder<T> + 'static,
    {
        self.register_qualified_binder::<T, B>(QualifierSet::new(), binder)
    }

    pub fn register_qualified_binder<T, B>(&mut self, qualifiers: QualifierSet, binder: B) -> &mut Self
    where
        T: Any + Send + Sync,
        B: Binder<T> + 'static,
    {
        let erased: ErasedBinder = Arc::new(move |value: &ArgumentValue| {
            let value = value.downcast_ref::<T>().with_context(|| {
                format!(
                    "Expected a {} argument but got {}",
                    any::type_name::<T>(),
                    value.ty()
                )
            })?;
            binder.bind(value)
        });
        self.binders.push((
            QualifiedType::new(TypeKey::of::<T>(), qualifiers),
            erased,
        ));
        self
    }

    pub fn register_column_mapper<T, M>(&mut self, mapper: M) -> &mut Self
    where
        T: Any,
        M: ColumnMapper<T> + 'static,
    {
        self.register_qualified_column_mapper::<T, M>(QualifierSet::new(), mapper)
    }

    pub fn register_qualified_column_mapper<T, M>(
        &mut self,
        qualifiers: QualifierSet,
        mapper: M,
    ) -> &mut Self
    where
        T: Any,
        M: ColumnMapper<T> + 'static,
    {
        let mapper: Arc<dyn ColumnMapper<T>> = Arc::new(mapper);
        self.column_mappers.push((
            QualifiedType::new(TypeKey::of::<T>(), qualifiers),
            Arc::new(mapper),
        ));
        self
    }

    pub fn register_row_mapper<T, M>(&mut self, mapper: M) -> &mut Self
    where
        T: Any,
        M: RowMapper<T> + 'static,
    {
        self.register_qualified_row_mapper::<T, M>(QualifierSet::new(), mapper)
    }

    pub fn register_qualified_row_mapper<T, M>(
        &mut self,
        qualifiers: QualifierSet,
        mapper: M,
    ) -> &mut Self
    where
        T: Any,
        M: RowMapper<T> + 'static,
    {
        let mapper: Arc<dyn RowMapper<T>> = Arc::new(mapper);
        self.row_mappers.push((
            QualifiedType::new(TypeKey::of::<T>(), qualifiers),
            Arc::new(mapper),
        ));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.binders.is_empty() && self.column_mappers.is_empty() && self.row_mappers.is_empty()
    }

    fn find<'a, V>(entries: &'a [(QualifiedType, V)], key: &QualifiedType) -> Option<&'a V> {
        entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl Debug for Registry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("binders", &self.binders.len())
            .field("column_mappers", &self.column_mappers.len())
            .field("row_mappers", &self.row_mappers.len())
            .finish()
    }
}

/// Lookup across scopes, narrowest first: method, type, global.
#[derive(Clone, Copy)]
pub(crate) struct Registries<'a> {
    pub(crate) scopes: [&'a Registry; 3],
}

impl<'a> Registries<'a> {
    /// The requested pair, then the unqualified type if qualifiers are optional.
    fn candidates(requested: &QualifiedType, optional: bool) -> Vec<QualifiedType> {
        let mut result = vec![requested.clone()];
        if optional && !requested.qualifiers.is_empty() {
            result.push(requested.unqualified());
        }
        result
    }

    pub(crate) fn binder(
        &self,
        requested: &QualifiedType,
        optional: bool,
        site: &str,
    ) -> crate::Result<ErasedBinder> {
        Self::candidates(requested, optional)
            .iter()
            .find_map(|key| {
                self.scopes
                    .iter()
                    .find_map(|scope| Registry::find(&scope.binders, key))
            })
            .cloned()
            .ok_or_else(|| resolution_error(site, RegistryKind::Binder, requested))
    }

    pub(crate) fn column_mapper<T: Any>(
        &self,
        requested: &QualifiedType,
        optional: bool,
        site: &str,
    ) -> crate::Result<Arc<dyn ColumnMapper<T>>> {
        Self::candidates(requested, optional)
            .iter()
            .find_map(|key| {
                self.scopes.iter().find_map(|scope| {
                    Registry::find(&scope.column_mappers, key)
                        .and_then(|v| v.downcast_ref::<Arc<dyn ColumnMapper<T>>>())
                })
            })
            .cloned()
            .ok_or_else(|| resolution_error(site, RegistryKind::ColumnMapper, requested))
    }

    /// Row mapper for the type, in each scope a column mapper for the same
    /// pair is the fallback, applied to the first column.
    pub(crate) fn row_mapper<T: Any>(
        &self,
        requested: &QualifiedType,
        optional: bool,
        site: &str,
    ) -> crate::Result<Arc<dyn RowMapper<T>>> {
        Self::candidates(requested, optional)
            .iter()
            .find_map(|key| {
                self.scopes.iter().find_map(|scope| {
                    if let Some(mapper) = Registry::find(&scope.row_mappers, key)
                        .and_then(|v| v.downcast_ref::<Arc<dyn RowMapper<T>>>())
                    {
                        return Some(mapper.clone());
                    }
                    Registry::find(&scope.column_mappers, key)
                        .and_then(|v| v.downcast_ref::<Arc<dyn ColumnMapper<T>>>())
                        .map(|v| Arc::new(FirstColumn(v.clone())) as Arc<dyn RowMapper<T>>)
                })
            })
            .ok_or_else(|| resolution_error(site, RegistryKind::RowMapper, requested))
    }
}

fn resolution_error(site: &str, kind: RegistryKind, requested: &QualifiedType) -> Error {
    Error::Resolution {
        site: site.to_string(),
        kind,
        requested: requested.clone(),
    }
}

/// Outcome of every lookup made by one method, failures included.
///
/// Two threads resolving the same key concurrently both compute it, the first
/// stored outcome is the one every caller observes.
#[derive(Default)]
pub(crate) struct ResolutionCache {
    entries: RwLock<HashMap<(RegistryKind, QualifiedType), Option<Erased>>>,
}

impl ResolutionCache {
    pub(crate) fn resolve<V: Clone + Send + Sync + 'static>(
        &self,
        kind: RegistryKind,
        requested: &QualifiedType,
        site: &str,
        lookup: impl FnOnce() -> crate::Result<V>,
    ) -> crate::Result<V> {
        let key = (kind, requested.clone());
        let cached = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let outcome = match cached {
            Some(outcome) => outcome,
            None => {
                let computed = match lookup() {
                    Ok(v) => Some(Arc::new(v) as Erased),
                    Err(Error::Resolution { .. }) => None,
                    Err(e) => return Err(e),
                };
                self.entries
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(key)
                    .or_insert(computed)
                    .clone()
            }
        };
        outcome
            .and_then(|v| v.downcast_ref::<V>().cloned())
            .ok_or_else(|| resolution_error(site, kind, requested))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
