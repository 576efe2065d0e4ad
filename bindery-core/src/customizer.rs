use crate::{
    ArgumentValue, Binding, Error, Isolation, Labeled, Qualifier, QualifierSet, Result,
    StatementContext, Value, separated_by, short_type_name,
};
use anyhow::Context;
use std::{
    any::{self, Any},
    borrow::Cow,
    fmt::{self, Debug, Display, Formatter, Write},
    marker::PhantomData,
    sync::Arc,
    time::Duration,
};

/// The call argument a parameter scoped customizer is applied to.
#[derive(Debug, Clone, Copy)]
pub struct Parameter<'a> {
    pub index: usize,
    pub name: &'a str,
    pub value: &'a ArgumentValue,
    pub qualifiers: &'a QualifierSet,
}

/// Mutates the statement context before the statement is bound.
///
/// Type and method scoped customizers receive no parameter, parameter scoped
/// ones receive the argument of their parameter (the current element for a
/// batch).
pub trait Customizer: Send + Sync {
    /// Name used by explicit customizer orders.
    fn label(&self) -> &str {
        short_type_name(any::type_name::<Self>())
    }
    fn customize(
        &self,
        context: &mut StatementContext,
        parameter: Option<Parameter<'_>>,
    ) -> anyhow::Result<()>;
}

impl<F> Customizer for F
where
    F: Fn(&mut StatementContext, Option<Parameter<'_>>) -> anyhow::Result<()> + Send + Sync,
{
    fn customize(
        &self,
        context: &mut StatementContext,
        parameter: Option<Parameter<'_>>,
    ) -> anyhow::Result<()> {
        self(context, parameter)
    }
}

/// Where a directive was declared.
#[derive(Debug, Clone, Copy)]
pub struct DirectiveSite<'a> {
    pub type_name: &'a str,
    pub method: Option<&'a str>,
    pub parameter: Option<&'a str>,
}

impl Display for DirectiveSite<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)?;
        if let Some(method) = self.method {
            write!(f, "::{method}")?;
        }
        if let Some(parameter) = self.parameter {
            write!(f, "({parameter})")?;
        }
        Ok(())
    }
}

/// Builds the customizer of a named directive, once per declaration site.
pub trait CustomizerFactory: Send + Sync {
    fn create(&self, site: &DirectiveSite<'_>) -> anyhow::Result<Arc<dyn Customizer>>;
}

impl<F> CustomizerFactory for F
where
    F: Fn(&DirectiveSite<'_>) -> anyhow::Result<Arc<dyn Customizer>> + Send + Sync,
{
    fn create(&self, site: &DirectiveSite<'_>) -> anyhow::Result<Arc<dyn Customizer>> {
        self(site)
    }
}

/// A declared customizer: either an instance or the name of a registered factory.
#[derive(Clone)]
pub struct CustomizerDirective {
    label: Cow<'static, str>,
    source: DirectiveSource<dyn Customizer>,
}

pub(crate) enum DirectiveSource<T: ?Sized> {
    Instance(Arc<T>),
    Named(Cow<'static, str>),
}

impl<T: ?Sized> Clone for DirectiveSource<T> {
    fn clone(&self) -> Self {
        match self {
            DirectiveSource::Instance(v) => DirectiveSource::Instance(v.clone()),
            DirectiveSource::Named(v) => DirectiveSource::Named(v.clone()),
        }
    }
}

impl CustomizerDirective {
    pub fn new(customizer: impl Customizer + 'static) -> Self {
        Self {
            label: customizer.label().to_string().into(),
            source: DirectiveSource::Instance(Arc::new(customizer)),
        }
    }
    pub fn labeled(label: impl Into<Cow<'static, str>>, customizer: impl Customizer + 'static) -> Self {
        Self {
            label: label.into(),
            source: DirectiveSource::Instance(Arc::new(customizer)),
        }
    }
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            source: DirectiveSource::Named(name),
        }
    }

    pub(crate) fn resolve(
        &self,
        site: &DirectiveSite<'_>,
        factory: impl FnOnce(&str) -> Option<Arc<dyn CustomizerFactory>>,
    ) -> Result<Arc<dyn Customizer>> {
        match &self.source {
            DirectiveSource::Instance(v) => Ok(v.clone()),
            DirectiveSource::Named(name) => factory(name)
                .ok_or_else(|| {
                    Error::configuration(
                        site.to_string(),
                        format!("no customizer factory is registered as `{name}`"),
                    )
                })?
                .create(site)
                .map_err(|e| Error::configuration(site.to_string(), format!("{e:#}"))),
        }
    }
}

impl Labeled for CustomizerDirective {
    fn label(&self) -> &str {
        &self.label
    }
}

impl Debug for CustomizerDirective {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CustomizerDirective({})", self.label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomizerScope {
    Type,
    Method,
    Parameter(usize),
}

/// A customizer ready to be applied, in its final position.
#[derive(Clone)]
pub struct ResolvedCustomizer {
    pub(crate) label: String,
    pub(crate) scope: CustomizerScope,
    pub(crate) customizer: Arc<dyn Customizer>,
}

impl ResolvedCustomizer {
    pub fn scope(&self) -> CustomizerScope {
        self.scope
    }
}

impl Labeled for ResolvedCustomizer {
    fn label(&self) -> &str {
        &self.label
    }
}

impl Debug for ResolvedCustomizer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.label, self.scope)
    }
}

/// Apply every customizer in order, stopping at the first failure.
pub(crate) fn apply_customizers<'a>(
    context: &mut StatementContext,
    customizers: &[ResolvedCustomizer],
    parameter: impl Fn(usize) -> Option<Parameter<'a>>,
) -> Result<()> {
    for customizer in customizers {
        let parameter = match customizer.scope {
            CustomizerScope::Parameter(index) => parameter(index),
            _ => None,
        };
        customizer
            .customizer
            .customize(context, parameter)
            .with_context(|| format!("While applying `{}`", customizer.label))
            .map_err(|source| Error::Customization {
                method: format!("{}::{}", context.type_name(), context.method()),
                source,
            })?;
    }
    Ok(())
}

fn require<'a>(parameter: Option<Parameter<'a>>, what: &str) -> anyhow::Result<Parameter<'a>> {
    parameter.with_context(|| format!("{what} must be declared on a parameter"))
}

/// Binds its parameter under an explicit name.
#[derive(Debug, Clone)]
pub struct Bind {
    name: Cow<'static, str>,
}

impl Bind {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self { name: name.into() }
    }
}

impl Customizer for Bind {
    fn customize(
        &self,
        context: &mut StatementContext,
        parameter: Option<Parameter<'_>>,
    ) -> anyhow::Result<()> {
        let parameter = require(parameter, "Bind")?;
        context.bind(
            self.name.as_ref(),
            Binding::Argument {
                value: parameter.value.clone(),
                qualifiers: parameter.qualifiers.clone(),
            },
        );
        Ok(())
    }
}

/// Expands `<name>` into one placeholder per element of a `Vec<T>` argument:
/// `IN (<ids>)` becomes `IN (:ids_0, :ids_1)`.
pub struct BindList<T> {
    name: Cow<'static, str>,
    _element: PhantomData<fn() -> T>,
}

impl<T: Any + Clone + Send + Sync> BindList<T> {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            _element: PhantomData,
        }
    }
}

impl<T: Any + Clone + Send + Sync> Customizer for BindList<T> {
    fn customize(
        &self,
        context: &mut StatementContext,
        parameter: Option<Parameter<'_>>,
    ) -> anyhow::Result<()> {
        let parameter = require(parameter, "BindList")?;
        let values = parameter.value.downcast_ref::<Vec<T>>().with_context(|| {
            format!(
                "BindList expects a Vec<{}> argument, got {}",
                any::type_name::<T>(),
                parameter.value.ty()
            )
        })?;
        if values.is_empty() {
            return Err(anyhow::Error::msg(format!(
                "The list bound to `<{}>` is empty, an empty list cannot be expanded",
                self.name
            )));
        }
        let mut placeholders = String::new();
        separated_by(
            &mut placeholders,
            0..values.len(),
            |out, i| {
                let _ = write!(out, ":{}_{i}", self.name);
            },
            ", ",
        );
        context.define(self.name.as_ref(), placeholders);
        for (i, value) in values.iter().enumerate() {
            context.bind(
                format!("{}_{i}", self.name),
                Binding::Argument {
                    value: ArgumentValue::new(value.clone()),
                    qualifiers: parameter.qualifiers.clone(),
                },
            );
        }
        Ok(())
    }
}

/// Sets the `<name>` template definition, from a constant or from its parameter.
#[derive(Clone)]
pub struct Define {
    name: Cow<'static, str>,
    source: DefineSource,
}

#[derive(Clone)]
enum DefineSource {
    Constant(String),
    Parameter(fn(&ArgumentValue) -> Option<String>),
}

fn display_text(value: &ArgumentValue) -> Option<String> {
    macro_rules! try_display {
        ($($ty:ty),+) => {
            $(
                if let Some(v) = value.downcast_ref::<$ty>() {
                    return Some(v.to_string());
                }
            )+
        };
    }
    try_display!(String, &'static str, Arc<str>, i32, i64, u32, u64, usize, bool);
    None
}

fn display_as<T: Display + Any>(value: &ArgumentValue) -> Option<String> {
    value.downcast_ref::<T>().map(ToString::to_string)
}

impl Define {
    /// Parameter scoped, the argument must be a string or an integer.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            source: DefineSource::Parameter(display_text),
        }
    }
    /// Parameter scoped, the argument is rendered through its `Display`.
    pub fn display<T: Display + Any>(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            source: DefineSource::Parameter(display_as::<T>),
        }
    }
    pub fn constant(name: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: DefineSource::Constant(value.into()),
        }
    }
}

impl Customizer for Define {
    fn customize(
        &self,
        context: &mut StatementContext,
        parameter: Option<Parameter<'_>>,
    ) -> anyhow::Result<()> {
        let value = match &self.source {
            DefineSource::Constant(v) => v.clone(),
            DefineSource::Parameter(render) => {
                let parameter = require(parameter, "Define")?;
                render(parameter.value).with_context(|| {
                    format!(
                        "Cannot define `<{}>` from a {} argument",
                        self.name,
                        parameter.value.ty()
                    )
                })?
            }
        };
        context.define(self.name.as_ref(), value);
        Ok(())
    }
}

/// Binds a constant under a name, useful at type or method scope.
#[derive(Debug, Clone)]
pub struct BindValue {
    name: Cow<'static, str>,
    value: Value,
}

impl BindValue {
    pub fn new(name: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Customizer for BindValue {
    fn customize(&self, context: &mut StatementContext, _: Option<Parameter<'_>>) -> anyhow::Result<()> {
        context.bind_optional(self.name.as_ref(), self.value.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchSize(pub u32);

impl Customizer for FetchSize {
    fn customize(&self, context: &mut StatementContext, _: Option<Parameter<'_>>) -> anyhow::Result<()> {
        context.set_fetch_size(self.0);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MaxRows(pub u64);

impl Customizer for MaxRows {
    fn customize(&self, context: &mut StatementContext, _: Option<Parameter<'_>>) -> anyhow::Result<()> {
        context.set_max_rows(self.0);
        Ok(())
    }
}

/// Deadline passed to the driver, an expired one is reported as [`crate::StatementTimeout`].
#[derive(Debug, Clone, Copy)]
pub struct QueryTimeout(pub Duration);

impl Customizer for QueryTimeout {
    fn customize(&self, context: &mut StatementContext, _: Option<Parameter<'_>>) -> anyhow::Result<()> {
        context.set_timeout(self.0);
        Ok(())
    }
}

/// Adds a qualifier used to pick the result mapper.
#[derive(Debug, Clone)]
pub struct Qualify(pub Qualifier);

impl Customizer for Qualify {
    fn customize(&self, context: &mut StatementContext, _: Option<Parameter<'_>>) -> anyhow::Result<()> {
        context.qualify(self.0.clone());
        Ok(())
    }
}

/// The statement runs in a transaction of this isolation level, joining the
/// current one if compatible.
#[derive(Debug, Clone, Copy)]
pub struct IsolationHint(pub Isolation);

impl Customizer for IsolationHint {
    fn customize(&self, context: &mut StatementContext, _: Option<Parameter<'_>>) -> anyhow::Result<()> {
        context.set_isolation(self.0);
        Ok(())
    }
}
