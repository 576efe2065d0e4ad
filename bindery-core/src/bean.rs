use crate::{Binding, Customizer, Parameter, RowLabeled, RowMapper, StatementContext, Value};
use anyhow::{Context, Result};
use std::{any, borrow::Cow, marker::PhantomData};

/// A plain struct whose members map to columns, usually derived with `#[derive(Bean)]`.
pub trait Bean: Send + Sync + 'static {
    /// Names of the members, in declaration order.
    fn members() -> &'static [&'static str]
    where
        Self: Sized;
    /// Column a member maps to.
    fn column_name(member: &str) -> Option<&'static str>
    where
        Self: Sized;
    fn read_member(&self, member: &str) -> Result<Value>;
    fn write_member(&mut self, member: &str, value: Value) -> Result<()>;
}

/// Case and underscores are ignored when matching columns: `first_name`,
/// `FirstName` and `FIRSTNAME` are the same column.
pub fn normalize_column(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Maps a row onto a default constructed bean, column by column.
///
/// Columns with no matching member are ignored, members with no matching
/// column keep their default value.
pub struct BeanMapper<T>(PhantomData<fn() -> T>);

impl<T> BeanMapper<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for BeanMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Bean + Default> RowMapper<T> for BeanMapper<T> {
    fn map(&self, row: &RowLabeled) -> Result<T> {
        let mut result = T::default();
        let columns: Vec<String> = row.names().iter().map(|v| normalize_column(v)).collect();
        for member in T::members() {
            let column = normalize_column(T::column_name(member).unwrap_or(member));
            if let Some(i) = columns.iter().position(|v| *v == column) {
                result
                    .write_member(member, row.values[i].clone())
                    .with_context(|| {
                        format!(
                            "While mapping column `{}` into {}::{member}",
                            row.labels[i],
                            any::type_name::<T>()
                        )
                    })?;
            }
        }
        Ok(result)
    }
}

/// Binds every member of a bean argument as `:member`, or `:prefix.member`.
pub struct BindBean<T> {
    prefix: Cow<'static, str>,
    _bean: PhantomData<fn() -> T>,
}

impl<T: Bean> BindBean<T> {
    pub fn new() -> Self {
        Self::prefixed("")
    }
    pub fn prefixed(prefix: impl Into<Cow<'static, str>>) -> Self {
        Self {
            prefix: prefix.into(),
            _bean: PhantomData,
        }
    }
}

impl<T: Bean> Default for BindBean<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Bean> Customizer for BindBean<T> {
    fn customize(&self, context: &mut StatementContext, parameter: Option<Parameter<'_>>) -> Result<()> {
        let parameter = parameter.context("BindBean must be declared on a parameter")?;
        let bean = parameter.value.downcast_ref::<T>().with_context(|| {
            format!(
                "BindBean expects a {} argument, got {}",
                any::type_name::<T>(),
                parameter.value.ty()
            )
        })?;
        for member in T::members() {
            let name = if self.prefix.is_empty() {
                member.to_string()
            } else {
                format!("{}.{member}", self.prefix)
            };
            context.bind_optional(name, Binding::Value(bean.read_member(member)?));
        }
        Ok(())
    }
}
