use crate::{
    Binder, ColumnMapper, CustomizerFactory, Decorator, DecoratorDirective, DecoratorFactory,
    DefinitionTemplate, Driver, Handle, LiteralLocator, QualifierSet, Registry, Result, RowMapper,
    SqlLocator, SqlObject, SqlObjectType, TemplateEngine, TypeDeclaration, TypeDescriptor,
    resource::{Origin, with_cleanup},
    sql_object::ObjectCore,
};
use log::debug;
use std::{
    any::{Any, TypeId},
    borrow::Cow,
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    sync::{Arc, PoisonError, RwLock},
};

/// Process scoped configuration, read only once built.
pub struct Config {
    pub(crate) registry: Registry,
    pub(crate) customizer_factories: HashMap<String, Arc<dyn CustomizerFactory>>,
    pub(crate) decorator_factories: HashMap<String, Arc<dyn DecoratorFactory>>,
    pub(crate) decorators: Vec<DecoratorDirective>,
    pub(crate) decorator_order: Option<Vec<Cow<'static, str>>>,
    pub(crate) locator: Arc<dyn SqlLocator>,
    pub(crate) templates: Arc<dyn TemplateEngine>,
    pub(crate) allow_unused_bindings: bool,
    pub(crate) default_chunk_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: Registry::with_builtins(),
            customizer_factories: HashMap::new(),
            decorator_factories: HashMap::new(),
            decorators: Vec::new(),
            decorator_order: None,
            locator: Arc::new(LiteralLocator),
            templates: Arc::new(DefinitionTemplate),
            allow_unused_bindings: false,
            default_chunk_size: None,
        }
    }
}

impl Config {
    /// Global binders and mappers.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
    pub fn allow_unused_bindings(&self) -> bool {
        self.allow_unused_bindings
    }
    pub fn default_chunk_size(&self) -> Option<usize> {
        self.default_chunk_size
    }
    pub(crate) fn customizer_factory(&self, name: &str) -> Option<Arc<dyn CustomizerFactory>> {
        self.customizer_factories.get(name).cloned()
    }
    pub(crate) fn decorator_factory(&self, name: &str) -> Option<Arc<dyn DecoratorFactory>> {
        self.decorator_factories.get(name).cloned()
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("registry", &self.registry)
            .field("customizer_factories", &self.customizer_factories.keys())
            .field("decorator_factories", &self.decorator_factories.keys())
            .field("decorators", &self.decorators)
            .field("decorator_order", &self.decorator_order)
            .field("allow_unused_bindings", &self.allow_unused_bindings)
            .field("default_chunk_size", &self.default_chunk_size)
            .finish()
    }
}

/// Entry point: turns [`SqlObjectType`] declarations into [`SqlObject`]s
/// running on the handles of one driver.
///
/// Cloning is cheap, clones share the configuration and the resolved
/// declarations.
#[derive(Clone)]
pub struct Bindery {
    config: Arc<Config>,
    driver: Arc<dyn Driver>,
    descriptors: Arc<RwLock<HashMap<TypeId, Arc<TypeDescriptor>>>>,
}

impl Bindery {
    pub fn builder(driver: impl Driver) -> BinderyBuilder {
        BinderyBuilder {
            config: Config::default(),
            driver: Arc::new(driver),
        }
    }

    /// Default configuration.
    pub fn new(driver: impl Driver) -> Self {
        Self::builder(driver).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a handle owned by the caller, who must close it.
    pub fn open(&self) -> Result<Handle> {
        Handle::open(self.driver.as_ref())
    }

    /// The resolved declaration of `D`, resolved on first request.
    ///
    /// Concurrent first requests may both resolve it, every caller observes
    /// the one that was stored first.
    pub fn descriptor<D: SqlObjectType>(&self) -> Result<Arc<TypeDescriptor>> {
        let id = TypeId::of::<D>();
        if let Some(descriptor) = self
            .descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            return Ok(descriptor.clone());
        }
        let mut declaration = TypeDeclaration::of::<D>();
        D::declare(&mut declaration);
        let resolved = Arc::new(TypeDescriptor::resolve(declaration, &self.config)?);
        Ok(self
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_insert(resolved)
            .clone())
    }

    /// Object whose calls all run on `handle`, the caller keeps owning it.
    pub fn attach<D: SqlObjectType>(&self, handle: &Handle) -> Result<SqlObject<D>> {
        let descriptor = self.descriptor::<D>()?;
        debug!("Attached {} to {handle:?}", descriptor.name());
        Ok(SqlObject::from_core(ObjectCore {
            descriptor,
            origin: Origin::Attached(handle.clone()),
        }))
    }

    /// Object opening a handle for each top level call that needs one.
    pub fn on_demand<D: SqlObjectType>(&self) -> Result<SqlObject<D>> {
        Ok(SqlObject::from_core(ObjectCore {
            descriptor: self.descriptor::<D>()?,
            origin: Origin::OnDemand(self.driver.clone()),
        }))
    }

    /// Open a handle, run `f` and close it.
    pub fn with_handle<T>(&self, f: impl FnOnce(&Handle) -> Result<T>) -> Result<T> {
        let handle = self.open()?;
        let result = f(&handle);
        with_cleanup(result, handle.close())
    }

    /// Open a handle, run `f` in a transaction and close it.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Handle) -> Result<T>) -> Result<T> {
        self.with_handle(|handle| handle.in_transaction(f))
    }
}

impl Debug for Bindery {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindery")
            .field("driver", &self.driver.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Every global registration happens here, before anything is resolved.
pub struct BinderyBuilder {
    config: Config,
    driver: Arc<dyn Driver>,
}

impl BinderyBuilder {
    pub fn register_binder<T, B>(mut self, binder: B) -> Self
    where
        T: Any + Send + Sync,
        B: Binder<T> + 'static,
    {
        self.config.registry.register_binder::<T, B>(binder);
        self
    }
    pub fn register_qualified_binder<T, B>(mut self, qualifiers: QualifierSet, binder: B) -> Self
    where
        T: Any + Send + Sync,
        B: Binder<T> + 'static,
    {
        self.config
            .registry
            .register_qualified_binder::<T, B>(qualifiers, binder);
        self
    }
    pub fn register_column_mapper<T: Any, M: ColumnMapper<T> + 'static>(mut self, mapper: M) -> Self {
        self.config.registry.register_column_mapper::<T, M>(mapper);
        self
    }
    pub fn register_qualified_column_mapper<T: Any, M: ColumnMapper<T> + 'static>(
        mut self,
        qualifiers: QualifierSet,
        mapper: M,
    ) -> Self {
        self.config
            .registry
            .register_qualified_column_mapper::<T, M>(qualifiers, mapper);
        self
    }
    pub fn register_row_mapper<T: Any, M: RowMapper<T> + 'static>(mut self, mapper: M) -> Self {
        self.config.registry.register_row_mapper::<T, M>(mapper);
        self
    }
    pub fn register_qualified_row_mapper<T: Any, M: RowMapper<T> + 'static>(
        mut self,
        qualifiers: QualifierSet,
        mapper: M,
    ) -> Self {
        self.config
            .registry
            .register_qualified_row_mapper::<T, M>(qualifiers, mapper);
        self
    }

    /// Factory building the customizers declared with `customize_named(name)`.
    pub fn register_customizer_factory(
        mut self,
        name: impl Into<String>,
        factory: impl CustomizerFactory + 'static,
    ) -> Self {
        self.config
            .customizer_factories
            .insert(name.into(), Arc::new(factory));
        self
    }
    /// Factory building the decorators declared with `decorate_named(name)`.
    pub fn register_decorator_factory(
        mut self,
        name: impl Into<String>,
        factory: impl DecoratorFactory + 'static,
    ) -> Self {
        self.config
            .decorator_factories
            .insert(name.into(), Arc::new(factory));
        self
    }

    /// Decorator wrapping every declared operation, outside the type and method ones.
    pub fn decorate(mut self, decorator: impl Decorator + 'static) -> Self {
        self.config
            .decorators
            .push(DecoratorDirective::new(decorator));
        self
    }
    pub fn decorate_named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.config.decorators.push(DecoratorDirective::named(name));
        self
    }
    /// Decorator order used by types and methods declaring none.
    pub fn decorator_order<I>(mut self, order: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Cow<'static, str>>,
    {
        self.config.decorator_order = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn locator(mut self, locator: impl SqlLocator + 'static) -> Self {
        self.config.locator = Arc::new(locator);
        self
    }
    pub fn templates(mut self, templates: impl TemplateEngine + 'static) -> Self {
        self.config.templates = Arc::new(templates);
        self
    }
    /// Named bindings the statement does not reference are ignored instead of rejected.
    pub fn allow_unused_bindings(mut self, allow: bool) -> Self {
        self.config.allow_unused_bindings = allow;
        self
    }
    /// Chunk size of the batches declaring none, all at once by default.
    pub fn default_chunk_size(mut self, size: usize) -> Self {
        self.config.default_chunk_size = (size > 0).then_some(size);
        self
    }

    pub fn build(self) -> Bindery {
        Bindery {
            config: Arc::new(self.config),
            driver: self.driver,
            descriptors: Default::default(),
        }
    }
}
