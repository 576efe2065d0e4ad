use crate::{
    Argument, ColumnMapper, Config, CustomizerScope, DirectiveSite, Error, Handler, Labeled, Mapping,
    Outcome, QualifiedType, QualifierSet, QueryResult, Registry, RegistryKind, ResolvedCustomizer,
    Result, ReturnShape, Returns, RowMapper, TypeKey, Value,
    declaration::{DeclaredReturn, MethodDeclaration, TypeDeclaration},
    decorator::{ResolvedDecorator, build_chain},
    handler::Dispatch,
    order_by_labels,
    registry::{ErasedBinder, Registries, ResolutionCache},
    separated_by,
    sql_object::ObjectCore,
};
use log::debug;
use std::{
    any::Any,
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt::{self, Debug, Display, Formatter, Write},
    sync::Arc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Update,
    Batch,
    Call,
    /// Runs a default body, no statement.
    PassThrough,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Query => "query",
            OperationKind::Update => "update",
            OperationKind::Batch => "batch",
            OperationKind::Call => "call",
            OperationKind::PassThrough => "default body",
        })
    }
}

/// Static classification of a method, immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredOperation {
    method: String,
    kind: OperationKind,
    sql: Option<String>,
    return_shape: ReturnShape,
}

impl DeclaredOperation {
    pub fn method(&self) -> &str {
        &self.method
    }
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
    /// Located SQL text, before the template is rendered.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }
    pub fn return_shape(&self) -> &ReturnShape {
        &self.return_shape
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    /// Bound to the statement.
    Bound,
    /// Chunk size of a batch, never bound.
    ChunkSize,
}

#[derive(Debug, Clone)]
pub struct ParamDescriptor {
    pub(crate) name: String,
    pub(crate) ty: TypeKey,
    pub(crate) qualifiers: QualifierSet,
    pub(crate) role: ParamRole,
    /// No customizer takes care of it: bound by name and by position.
    pub(crate) bound_by_default: bool,
}

impl ParamDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn ty(&self) -> TypeKey {
        self.ty
    }
    pub fn qualifiers(&self) -> &QualifierSet {
        &self.qualifiers
    }
    pub fn role(&self) -> ParamRole {
        self.role
    }
}

pub(crate) type Body = Arc<dyn Fn(&ObjectCore, Vec<Argument>) -> Result<Outcome> + Send + Sync>;
pub(crate) type BuildFn = fn(QueryResult, &Mapping<'_>) -> Result<Outcome>;

pub(crate) enum Implementation {
    Body(Body),
    Chain(Arc<dyn Handler>),
}

#[derive(Debug, Clone)]
pub(crate) struct OutParameterSpec {
    pub(crate) name: String,
    pub(crate) sql_type: Value,
}

/// Everything needed to run one method, resolved once per type.
pub struct MethodDescriptor {
    site: String,
    type_name: &'static str,
    operation: DeclaredOperation,
    return_type: TypeKey,
    pub(crate) build: BuildFn,
    pub(crate) params: Vec<ParamDescriptor>,
    pub(crate) customizers: Vec<ResolvedCustomizer>,
    decorators: Vec<String>,
    pub(crate) implementation: Implementation,
    pub(crate) return_qualifiers: QualifierSet,
    qualifiers_optional: bool,
    pub(crate) generated_keys: Option<Vec<String>>,
    pub(crate) out_parameters: Vec<OutParameterSpec>,
    pub(crate) chunk_size: Option<usize>,
    pub(crate) transactional: bool,
    row_mapper: Option<(TypeKey, Arc<dyn Any + Send + Sync>)>,
    registry: Registry,
    type_registry: Arc<Registry>,
    pub(crate) config: Arc<Config>,
    cache: ResolutionCache,
}

impl MethodDescriptor {
    pub fn name(&self) -> &str {
        self.operation.method()
    }
    /// `Type::method`, used in errors and logs.
    pub fn site(&self) -> &str {
        &self.site
    }
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
    pub fn operation(&self) -> &DeclaredOperation {
        &self.operation
    }
    pub fn return_type(&self) -> TypeKey {
        self.return_type
    }
    pub fn params(&self) -> &[ParamDescriptor] {
        &self.params
    }
    /// Customizers in the order they are applied.
    pub fn customizers(&self) -> &[ResolvedCustomizer] {
        &self.customizers
    }
    /// Decorator labels, outermost first.
    pub fn decorators(&self) -> &[String] {
        &self.decorators
    }
    pub fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }
    pub fn is_pass_through(&self) -> bool {
        self.operation.kind == OperationKind::PassThrough
    }

    fn registries(&self) -> Registries<'_> {
        Registries {
            scopes: [&self.registry, &self.type_registry, &self.config.registry],
        }
    }

    pub(crate) fn binder(&self, requested: &QualifiedType) -> Result<ErasedBinder> {
        self.cache
            .resolve(RegistryKind::Binder, requested, &self.site, || {
                self.registries()
                    .binder(requested, self.qualifiers_optional, &self.site)
            })
    }

    /// Row mapper for `T`, the mapper declared on the method comes first.
    pub fn row_mapper<T: Any>(&self, qualifiers: &QualifierSet) -> Result<Arc<dyn RowMapper<T>>> {
        if let Some(mapper) = self
            .row_mapper
            .as_ref()
            .and_then(|(_, v)| v.downcast_ref::<Arc<dyn RowMapper<T>>>())
        {
            return Ok(mapper.clone());
        }
        let requested = QualifiedType::new(TypeKey::of::<T>(), qualifiers.clone());
        self.cache
            .resolve(RegistryKind::RowMapper, &requested, &self.site, || {
                self.registries()
                    .row_mapper::<T>(&requested, self.qualifiers_optional, &self.site)
            })
    }

    pub fn column_mapper<T: Any>(
        &self,
        qualifiers: &QualifierSet,
    ) -> Result<Arc<dyn ColumnMapper<T>>> {
        let requested = QualifiedType::new(TypeKey::of::<T>(), qualifiers.clone());
        self.cache
            .resolve(RegistryKind::ColumnMapper, &requested, &self.site, || {
                self.registries()
                    .column_mapper::<T>(&requested, self.qualifiers_optional, &self.site)
            })
    }

    /// Number of lookups remembered, failures included.
    pub fn resolved_lookups(&self) -> usize {
        self.cache.len()
    }
}

impl Debug for MethodDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("site", &self.site)
            .field("operation", &self.operation)
            .field("return_type", &self.return_type)
            .field("params", &self.params)
            .field("customizers", &self.customizers)
            .field("decorators", &self.decorators)
            .finish()
    }
}

/// The resolved methods of a [`crate::SqlObjectType`].
pub struct TypeDescriptor {
    ty: TypeKey,
    name: &'static str,
    methods: Vec<Arc<MethodDescriptor>>,
    index: HashMap<String, usize>,
}

impl TypeDescriptor {
    pub fn ty(&self) -> TypeKey {
        self.ty
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn methods(&self) -> &[Arc<MethodDescriptor>] {
        &self.methods
    }
    pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.index.get(name).map(|i| &self.methods[*i])
    }
    pub fn operations(&self) -> impl Iterator<Item = &DeclaredOperation> {
        self.methods.iter().map(|v| v.operation())
    }

    /// Validate the declaration and resolve every method, failing on the
    /// first invalid one.
    pub(crate) fn resolve(declaration: TypeDeclaration, config: &Arc<Config>) -> Result<Self> {
        let TypeDeclaration {
            ty,
            name,
            customizers,
            customizer_order,
            decorators,
            decorator_order,
            registry,
            chunk_size,
            methods: declared,
        } = declaration;
        let site = DirectiveSite {
            type_name: name,
            method: None,
            parameter: None,
        };
        let scope = TypeScope {
            name,
            customizers: customizers
                .iter()
                .map(|v| -> Result<ResolvedCustomizer> {
                    Ok(ResolvedCustomizer {
                        label: v.label().to_string(),
                        scope: CustomizerScope::Type,
                        customizer: v.resolve(&site, |n| config.customizer_factory(n))?,
                    })
                })
                .collect::<Result<_>>()?,
            customizer_order,
            global_decorators: config
                .decorators
                .iter()
                .map(|v| v.resolve(&site, |n| config.decorator_factory(n)))
                .collect::<Result<_>>()?,
            decorators: decorators
                .iter()
                .map(|v| v.resolve(&site, |n| config.decorator_factory(n)))
                .collect::<Result<_>>()?,
            decorator_order,
            registry: Arc::new(registry),
            chunk_size,
            config: config.clone(),
        };
        let mut seen = HashSet::new();
        let mut methods = Vec::with_capacity(declared.len());
        let mut index = HashMap::new();
        for method in declared {
            if !seen.insert(method.name.clone()) {
                return Err(Error::configuration(
                    format!("{name}::{}", method.name),
                    "the method is declared more than once",
                ));
            }
            index.insert(method.name.clone(), methods.len());
            methods.push(Arc::new(scope.resolve_method(method, ty)?));
        }
        debug!("Resolved {} methods of {name}", methods.len());
        Ok(Self {
            ty,
            name,
            methods,
            index,
        })
    }
}

impl Debug for TypeDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .finish()
    }
}

/// What every method of a type inherits.
struct TypeScope {
    name: &'static str,
    customizers: Vec<ResolvedCustomizer>,
    customizer_order: Option<Vec<Cow<'static, str>>>,
    global_decorators: Vec<ResolvedDecorator>,
    decorators: Vec<ResolvedDecorator>,
    decorator_order: Option<Vec<Cow<'static, str>>>,
    registry: Arc<Registry>,
    chunk_size: Option<usize>,
    config: Arc<Config>,
}

fn shape_name(shape: &ReturnShape) -> &'static str {
    match shape {
        ReturnShape::Unit => "()",
        ReturnShape::Single => "a single value",
        ReturnShape::Optional => "an optional value",
        ReturnShape::One => "exactly one row",
        ReturnShape::List => "a list",
        ReturnShape::Map { .. } => "a map",
        ReturnShape::Lazy => "a lazy iterator",
        ReturnShape::OutParameters => "output parameters",
        ReturnShape::Opaque => "an opaque value",
    }
}

impl TypeScope {
    fn resolve_method(&self, method: MethodDeclaration, owner: TypeKey) -> Result<MethodDescriptor> {
        let site = format!("{}::{}", self.name, method.name);
        let fail = |message: String| Error::configuration(site.clone(), message);
        if method.operations.len() > 1 {
            let mut kinds = String::new();
            separated_by(
                &mut kinds,
                method.operations.iter(),
                |out, (kind, _)| {
                    let _ = write!(out, "{kind}");
                },
                ", ",
            );
            return Err(fail(format!(
                "more than one operation is declared ({kinds})"
            )));
        }
        let MethodDeclaration {
            name,
            mut operations,
            body,
            params,
            returns,
            return_qualifiers,
            qualifiers_optional,
            key_column,
            value_column,
            generated_keys,
            out_parameters,
            chunk_size,
            transactional,
            row_mapper,
            registry,
            customizers,
            customizer_order,
            decorators,
            decorator_order,
        } = method;
        let statement_only: Vec<&str> = [
            (
                "customizers",
                !customizers.is_empty() || customizer_order.is_some(),
            ),
            ("decorators", !decorators.is_empty() || decorator_order.is_some()),
            (
                "binding directives",
                params
                    .iter()
                    .any(|v| !v.customizers.is_empty() || v.chunk_size || !v.qualifiers.is_empty()),
            ),
            (
                "return mapping",
                returns.is_some()
                    || !return_qualifiers.is_empty()
                    || qualifiers_optional
                    || key_column.is_some()
                    || value_column.is_some()
                    || row_mapper.is_some(),
            ),
            ("generated keys", generated_keys.is_some()),
            ("output parameters", !out_parameters.is_empty()),
            ("batch settings", chunk_size.is_some() || transactional.is_some()),
            ("registrations", !registry.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, declared)| declared.then_some(name))
        .collect();

        let mut descriptor = MethodDescriptor {
            site: site.clone(),
            type_name: self.name,
            operation: DeclaredOperation {
                method: name.clone(),
                kind: OperationKind::PassThrough,
                sql: None,
                return_shape: ReturnShape::Opaque,
            },
            return_type: TypeKey::of::<()>(),
            build: unit,
            params: Vec::new(),
            customizers: Vec::new(),
            decorators: Vec::new(),
            implementation: Implementation::Chain(Arc::new(Dispatch)),
            return_qualifiers,
            qualifiers_optional,
            generated_keys: None,
            out_parameters: Vec::new(),
            chunk_size: None,
            transactional: false,
            row_mapper,
            registry,
            type_registry: self.registry.clone(),
            config: self.config.clone(),
            cache: ResolutionCache::default(),
        };
        let Some((kind, declared_sql)) = operations.pop() else {
            let Some(body) = body else {
                return Err(fail(
                    "declares neither an operation nor a default body".into(),
                ));
            };
            if !statement_only.is_empty() {
                return Err(fail(format!(
                    "a method with a default body runs no statement, it cannot carry {}",
                    statement_only.join(", ")
                )));
            }
            if body.owner != owner {
                return Err(fail(format!(
                    "the default body is written for {}, not for {}",
                    body.owner, self.name
                )));
            }
            descriptor.return_type = body.returns;
            descriptor.params = params
                .into_iter()
                .map(|v| ParamDescriptor {
                    name: v.name,
                    ty: v.ty,
                    qualifiers: v.qualifiers,
                    role: ParamRole::Bound,
                    bound_by_default: false,
                })
                .collect();
            descriptor.implementation = Implementation::Body(body.body);
            return Ok(descriptor);
        };
        if body.is_some() {
            return Err(fail(format!(
                "declares both a {kind} and a default body"
            )));
        }

        let DeclaredReturn {
            ty: return_type,
            mut shape,
            build,
        } = returns.unwrap_or_else(|| DeclaredReturn {
            ty: TypeKey::of::<()>(),
            shape: <() as Returns>::shape(),
            build: unit,
        });
        if key_column.is_some() || value_column.is_some() {
            let ReturnShape::Map { .. } = shape else {
                return Err(fail(format!(
                    "key and value columns only apply to map returns, the method returns {}",
                    shape_name(&shape)
                )));
            };
            shape = ReturnShape::Map {
                key_column,
                value_column,
            };
        }
        if generated_keys.is_some() && matches!(kind, OperationKind::Query | OperationKind::Call) {
            return Err(fail(format!("a {kind} cannot return generated keys")));
        }
        if !out_parameters.is_empty() && kind != OperationKind::Call {
            return Err(fail(format!(
                "only a call declares output parameters, this is a {kind}"
            )));
        }
        let accepted = match (kind, generated_keys.is_some()) {
            (OperationKind::Query, _) | (_, true) => !matches!(shape, ReturnShape::OutParameters),
            (OperationKind::Update, false) => matches!(
                shape,
                ReturnShape::Unit | ReturnShape::Single | ReturnShape::Optional
            ),
            (OperationKind::Batch, false) => matches!(shape, ReturnShape::Unit | ReturnShape::List),
            (OperationKind::Call, false) => matches!(
                shape,
                ReturnShape::Unit | ReturnShape::Single | ReturnShape::OutParameters
            ),
            (OperationKind::PassThrough, false) => false,
        };
        if !accepted {
            return Err(fail(format!(
                "a {kind} cannot return {}",
                shape_name(&shape)
            )));
        }

        let chunk_params = params.iter().filter(|v| v.chunk_size).count();
        if chunk_params > 1 {
            return Err(fail("more than one parameter is the chunk size".into()));
        }
        if kind != OperationKind::Batch && (chunk_params > 0 || chunk_size.is_some()) {
            return Err(fail(format!("a {kind} has no chunk size")));
        }
        if let Some(param) = params
            .iter()
            .find(|v| v.chunk_size && !v.ty.is::<usize>())
        {
            return Err(fail(format!(
                "the chunk size parameter `{}` must be a usize, it is a {}",
                param.name, param.ty
            )));
        }
        let chunk_size = match kind {
            OperationKind::Batch => chunk_size.or(self.chunk_size),
            _ => None,
        };
        if chunk_size == Some(0) {
            return Err(fail("the chunk size must be greater than 0".into()));
        }

        let sql = self
            .config
            .locator
            .locate(self.name, &name, &declared_sql)
            .map_err(|e| fail(format!("could not locate the SQL: {e:#}")))?;

        let mut resolved = self.customizers.clone();
        let method_site = DirectiveSite {
            type_name: self.name,
            method: Some(&name),
            parameter: None,
        };
        for directive in &customizers {
            resolved.push(ResolvedCustomizer {
                label: directive.label().to_string(),
                scope: CustomizerScope::Method,
                customizer: directive.resolve(&method_site, |n| self.config.customizer_factory(n))?,
            });
        }
        for (i, param) in params.iter().enumerate() {
            let param_site = DirectiveSite {
                parameter: Some(&param.name),
                ..method_site
            };
            for directive in &param.customizers {
                resolved.push(ResolvedCustomizer {
                    label: directive.label().to_string(),
                    scope: CustomizerScope::Parameter(i),
                    customizer: directive
                        .resolve(&param_site, |n| self.config.customizer_factory(n))?,
                });
            }
        }
        let order = customizer_order.as_deref().or(self.customizer_order.as_deref());
        let resolved = order_by_labels(resolved, order, &site, "customizer")?;

        let mut chain: Vec<ResolvedDecorator> = self
            .global_decorators
            .iter()
            .chain(&self.decorators)
            .map(|v| ResolvedDecorator {
                label: v.label.clone(),
                decorator: v.decorator.clone(),
            })
            .collect();
        for directive in &decorators {
            chain.push(directive.resolve(&method_site, |n| self.config.decorator_factory(n))?);
        }
        let order = decorator_order
            .as_deref()
            .or(self.decorator_order.as_deref())
            .or(self.config.decorator_order.as_deref());
        let chain = order_by_labels(chain, order, &site, "decorator")?;

        descriptor.operation = DeclaredOperation {
            method: name,
            kind,
            sql: Some(sql),
            return_shape: shape,
        };
        descriptor.return_type = return_type;
        descriptor.build = build;
        descriptor.params = params
            .into_iter()
            .map(|v| ParamDescriptor {
                bound_by_default: v.customizers.is_empty() && !v.chunk_size,
                role: if v.chunk_size {
                    ParamRole::ChunkSize
                } else {
                    ParamRole::Bound
                },
                name: v.name,
                ty: v.ty,
                qualifiers: v.qualifiers,
            })
            .collect();
        descriptor.customizers = resolved;
        descriptor.decorators = chain.iter().map(|v| v.label.clone()).collect();
        descriptor.implementation = Implementation::Chain(build_chain(Arc::new(Dispatch), &chain));
        descriptor.generated_keys = generated_keys;
        descriptor.out_parameters = out_parameters
            .into_iter()
            .map(|(name, sql_type)| OutParameterSpec { name, sql_type })
            .collect();
        descriptor.chunk_size = chunk_size;
        descriptor.transactional = kind == OperationKind::Batch && transactional.unwrap_or(true);
        Ok(descriptor)
    }
}

fn unit(result: QueryResult, mapping: &Mapping<'_>) -> Result<Outcome> {
    <() as Returns>::build(result, mapping).map(|v| Box::new(v) as Outcome)
}
