use crate::{
    Argument, DirectiveSite, DirectiveSource, Error, Handle, Labeled, MethodDescriptor, Result,
    resource::Resource, short_type_name,
};
use std::{
    any::{self, Any},
    borrow::Cow,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// Type erased value of a call, downcast to the declared return type by the caller.
pub type Outcome = Box<dyn Any + Send>;

/// One in flight call as seen by handlers and decorators.
pub struct Invocation<'a> {
    pub(crate) method: &'a MethodDescriptor,
    pub(crate) resource: &'a Resource,
    /// Arguments of the call, the statement handler takes them.
    pub arguments: Vec<Argument>,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        method: &'a MethodDescriptor,
        resource: &'a Resource,
        arguments: Vec<Argument>,
    ) -> Self {
        Self {
            method,
            resource,
            arguments,
        }
    }
    pub fn method(&self) -> &MethodDescriptor {
        self.method
    }
    /// The resource of the call, opened now if the call runs on demand.
    pub fn handle(&self) -> Result<Handle> {
        self.resource.handle()
    }
}

impl Debug for Invocation<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("method", &self.method.site())
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// Executes a call.
pub trait Handler: Send + Sync {
    fn handle(&self, invocation: &mut Invocation<'_>) -> Result<Outcome>;
}

/// Wraps a handler into another one.
///
/// The wrapper may call the inner handler, transform its result or skip it
/// entirely: in that case its own outcome is the result of the call and must
/// have the declared return type.
pub trait Decorator: Send + Sync {
    /// Name used by explicit decorator orders.
    fn label(&self) -> &str {
        short_type_name(any::type_name::<Self>())
    }
    fn decorate(&self, inner: Arc<dyn Handler>) -> Arc<dyn Handler>;
}

/// Builds the decorator of a named directive, once per declaration site.
pub trait DecoratorFactory: Send + Sync {
    fn create(&self, site: &DirectiveSite<'_>) -> anyhow::Result<Arc<dyn Decorator>>;
}

impl<F> DecoratorFactory for F
where
    F: Fn(&DirectiveSite<'_>) -> anyhow::Result<Arc<dyn Decorator>> + Send + Sync,
{
    fn create(&self, site: &DirectiveSite<'_>) -> anyhow::Result<Arc<dyn Decorator>> {
        self(site)
    }
}

type AroundFn = dyn Fn(&dyn Handler, &mut Invocation<'_>) -> Result<Outcome> + Send + Sync;

/// Decorator from a closure receiving the inner handler.
///
/// ```rust
/// use bindery_core::{Decorator, around};
/// let logged = around("logged", |inner, invocation| {
///     log::debug!("Entering {}", invocation.method().name());
///     inner.handle(invocation)
/// });
/// assert_eq!(logged.label(), "logged");
/// ```
pub fn around<F>(label: impl Into<Cow<'static, str>>, f: F) -> Around
where
    F: Fn(&dyn Handler, &mut Invocation<'_>) -> Result<Outcome> + Send + Sync + 'static,
{
    Around {
        label: label.into(),
        f: Arc::new(f),
    }
}

#[derive(Clone)]
pub struct Around {
    label: Cow<'static, str>,
    f: Arc<AroundFn>,
}

struct AroundHandler {
    f: Arc<AroundFn>,
    inner: Arc<dyn Handler>,
}

impl Handler for AroundHandler {
    fn handle(&self, invocation: &mut Invocation<'_>) -> Result<Outcome> {
        (self.f)(self.inner.as_ref(), invocation)
    }
}

impl Decorator for Around {
    fn label(&self) -> &str {
        &self.label
    }
    fn decorate(&self, inner: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(AroundHandler {
            f: self.f.clone(),
            inner,
        })
    }
}

/// A declared decorator: either an instance or the name of a registered factory.
#[derive(Clone)]
pub struct DecoratorDirective {
    label: Cow<'static, str>,
    source: DirectiveSource<dyn Decorator>,
}

impl DecoratorDirective {
    pub fn new(decorator: impl Decorator + 'static) -> Self {
        Self {
            label: decorator.label().to_string().into(),
            source: DirectiveSource::Instance(Arc::new(decorator)),
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
        factory: impl FnOnce(&str) -> Option<Arc<dyn DecoratorFactory>>,
    ) -> Result<ResolvedDecorator> {
        let decorator = match &self.source {
            DirectiveSource::Instance(v) => v.clone(),
            DirectiveSource::Named(name) => factory(name)
                .ok_or_else(|| {
                    Error::configuration(
                        site.to_string(),
                        format!("no decorator factory is registered as `{name}`"),
                    )
                })?
                .create(site)
                .map_err(|e| Error::configuration(site.to_string(), format!("{e:#}")))?,
        };
        Ok(ResolvedDecorator {
            label: self.label.to_string(),
            decorator,
        })
    }
}

impl Labeled for DecoratorDirective {
    fn label(&self) -> &str {
        &self.label
    }
}

impl Debug for DecoratorDirective {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "DecoratorDirective({})", self.label)
    }
}

pub(crate) struct ResolvedDecorator {
    pub(crate) label: String,
    pub(crate) decorator: Arc<dyn Decorator>,
}

impl Labeled for ResolvedDecorator {
    fn label(&self) -> &str {
        &self.label
    }
}

/// Wrap `base`, the first decorator ends up outermost.
pub(crate) fn build_chain(base: Arc<dyn Handler>, decorators: &[ResolvedDecorator]) -> Arc<dyn Handler> {
    decorators
        .iter()
        .rev()
        .fold(base, |inner, v| v.decorator.decorate(inner))
}
