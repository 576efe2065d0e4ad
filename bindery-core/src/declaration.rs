use crate::{
    Argument, Customizer, CustomizerDirective, Decorator, DecoratorDirective, Outcome, Qualifier,
    QualifierSet, Registry, Result, ReturnShape, Returns, RowMapper, SqlObject, TypeKey, Value,
    descriptor::{Body, BuildFn, OperationKind},
    short_type_name,
    sql_object::ObjectCore,
};
use std::{
    any::{self, Any},
    borrow::Cow,
    sync::Arc,
};

/// A declared SQL object: a marker type listing its methods.
///
/// ```rust
/// use bindery_core::{SqlObjectType, TypeDeclaration};
/// struct Users;
/// impl SqlObjectType for Users {
///     fn declare(users: &mut TypeDeclaration) {
///         users
///             .method("count")
///             .query("SELECT COUNT(*) FROM users")
///             .returns::<i64>();
///     }
/// }
/// ```
pub trait SqlObjectType: Send + Sync + 'static {
    fn declare(declaration: &mut TypeDeclaration);
}

fn labels<I>(order: I) -> Vec<Cow<'static, str>>
where
    I: IntoIterator,
    I::Item: Into<Cow<'static, str>>,
{
    order.into_iter().map(Into::into).collect()
}

/// Static description of a [`SqlObjectType`], filled by [`SqlObjectType::declare`].
pub struct TypeDeclaration {
    pub(crate) ty: TypeKey,
    pub(crate) name: &'static str,
    pub(crate) customizers: Vec<CustomizerDirective>,
    pub(crate) customizer_order: Option<Vec<Cow<'static, str>>>,
    pub(crate) decorators: Vec<DecoratorDirective>,
    pub(crate) decorator_order: Option<Vec<Cow<'static, str>>>,
    pub(crate) registry: Registry,
    pub(crate) chunk_size: Option<usize>,
    pub(crate) methods: Vec<MethodDeclaration>,
}

impl TypeDeclaration {
    pub(crate) fn of<D: SqlObjectType>() -> Self {
        Self {
            ty: TypeKey::of::<D>(),
            name: short_type_name(any::type_name::<D>()),
            customizers: Vec::new(),
            customizer_order: None,
            decorators: Vec::new(),
            decorator_order: None,
            registry: Registry::new(),
            chunk_size: None,
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Customizer applied to every statement of the type, before the method ones.
    pub fn customize(&mut self, customizer: impl Customizer + 'static) -> &mut Self {
        self.customizers.push(CustomizerDirective::new(customizer));
        self
    }
    pub fn customize_as(
        &mut self,
        label: impl Into<Cow<'static, str>>,
        customizer: impl Customizer + 'static,
    ) -> &mut Self {
        self.customizers
            .push(CustomizerDirective::labeled(label, customizer));
        self
    }
    /// Customizer built by the factory registered under `name`.
    pub fn customize_named(&mut self, name: impl Into<Cow<'static, str>>) -> &mut Self {
        self.customizers.push(CustomizerDirective::named(name));
        self
    }
    /// Explicit customizer order, used by every method without its own.
    pub fn customizer_order<I>(&mut self, order: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Cow<'static, str>>,
    {
        self.customizer_order = Some(labels(order));
        self
    }

    pub fn decorate(&mut self, decorator: impl Decorator + 'static) -> &mut Self {
        self.decorators.push(DecoratorDirective::new(decorator));
        self
    }
    pub fn decorate_named(&mut self, name: impl Into<Cow<'static, str>>) -> &mut Self {
        self.decorators.push(DecoratorDirective::named(name));
        self
    }
    /// Explicit decorator order, replaces the global one.
    pub fn decorator_order<I>(&mut self, order: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Cow<'static, str>>,
    {
        self.decorator_order = Some(labels(order));
        self
    }

    /// Binders and mappers visible to the methods of this type only.
    pub fn registry(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Batch chunk size of every batch method without its own.
    pub fn chunk_size(&mut self, size: usize) -> &mut Self {
        self.chunk_size = Some(size);
        self
    }

    /// Declare a method, each name can be declared once.
    pub fn method(&mut self, name: impl Into<String>) -> &mut MethodDeclaration {
        self.methods.push(MethodDeclaration::new(name.into()));
        let last = self.methods.len() - 1;
        &mut self.methods[last]
    }
}

pub(crate) struct DeclaredBody {
    pub(crate) owner: TypeKey,
    pub(crate) returns: TypeKey,
    pub(crate) body: Body,
}

pub(crate) struct DeclaredReturn {
    pub(crate) ty: TypeKey,
    pub(crate) shape: ReturnShape,
    pub(crate) build: BuildFn,
}

fn build_outcome<R: Returns>(
    result: crate::QueryResult,
    mapping: &crate::Mapping<'_>,
) -> Result<Outcome> {
    R::build(result, mapping).map(|v| Box::new(v) as Outcome)
}

/// Static description of one method.
pub struct MethodDeclaration {
    pub(crate) name: String,
    pub(crate) operations: Vec<(OperationKind, String)>,
    pub(crate) body: Option<DeclaredBody>,
    pub(crate) params: Vec<ParamDeclaration>,
    pub(crate) returns: Option<DeclaredReturn>,
    pub(crate) return_qualifiers: QualifierSet,
    pub(crate) qualifiers_optional: bool,
    pub(crate) key_column: Option<String>,
    pub(crate) value_column: Option<String>,
    pub(crate) generated_keys: Option<Vec<String>>,
    pub(crate) out_parameters: Vec<(String, Value)>,
    pub(crate) chunk_size: Option<usize>,
    pub(crate) transactional: Option<bool>,
    pub(crate) row_mapper: Option<(TypeKey, Arc<dyn Any + Send + Sync>)>,
    pub(crate) registry: Registry,
    pub(crate) customizers: Vec<CustomizerDirective>,
    pub(crate) customizer_order: Option<Vec<Cow<'static, str>>>,
    pub(crate) decorators: Vec<DecoratorDirective>,
    pub(crate) decorator_order: Option<Vec<Cow<'static, str>>>,
}

impl MethodDeclaration {
    fn new(name: String) -> Self {
        Self {
            name,
            operations: Vec::new(),
            body: None,
            params: Vec::new(),
            returns: None,
            return_qualifiers: QualifierSet::new(),
            qualifiers_optional: false,
            key_column: None,
            value_column: None,
            generated_keys: None,
            out_parameters: Vec::new(),
            chunk_size: None,
            transactional: None,
            row_mapper: None,
            registry: Registry::new(),
            customizers: Vec::new(),
            customizer_order: None,
            decorators: Vec::new(),
            decorator_order: None,
        }
    }

    fn operation(&mut self, kind: OperationKind, sql: impl Into<String>) -> &mut Self {
        self.operations.push((kind, sql.into()));
        self
    }
    pub fn query(&mut self, sql: impl Into<String>) -> &mut Self {
        self.operation(OperationKind::Query, sql)
    }
    pub fn update(&mut self, sql: impl Into<String>) -> &mut Self {
        self.operation(OperationKind::Update, sql)
    }
    pub fn batch(&mut self, sql: impl Into<String>) -> &mut Self {
        self.operation(OperationKind::Batch, sql)
    }
    pub fn call(&mut self, sql: impl Into<String>) -> &mut Self {
        self.operation(OperationKind::Call, sql)
    }

    /// The method runs this code instead of a statement.
    ///
    /// The body receives the object it was invoked on, calls made through it
    /// share the resource of the outer call.
    pub fn default_body<D, R, F>(&mut self, body: F) -> &mut Self
    where
        D: crate::SqlObjectType,
        R: Any + Send,
        F: Fn(&SqlObject<D>, Vec<Argument>) -> Result<R> + Send + Sync + 'static,
    {
        let body: Body = Arc::new(move |core: &ObjectCore, arguments: Vec<Argument>| {
            let object = SqlObject::<D>::from_core(core.clone());
            body(&object, arguments).map(|v| Box::new(v) as Outcome)
        });
        self.body = Some(DeclaredBody {
            owner: TypeKey::of::<D>(),
            returns: TypeKey::of::<R>(),
            body,
        });
        self
    }

    /// Append a parameter, in call argument order.
    pub fn param<T: Any + Send + Sync>(&mut self, name: impl Into<String>) -> &mut Self {
        self.params.push(ParamDeclaration::new::<T>(name.into()));
        self
    }
    pub fn param_with<T: Any + Send + Sync>(
        &mut self,
        name: impl Into<String>,
        declare: impl FnOnce(&mut ParamDeclaration),
    ) -> &mut Self {
        let mut param = ParamDeclaration::new::<T>(name.into());
        declare(&mut param);
        self.params.push(param);
        self
    }

    /// Declared return type, `()` when never called.
    pub fn returns<R: Returns>(&mut self) -> &mut Self {
        self.returns = Some(DeclaredReturn {
            ty: TypeKey::of::<R>(),
            shape: R::shape(),
            build: build_outcome::<R>,
        });
        self
    }
    /// Qualifier of the returned type, used to pick its mapper.
    pub fn qualify_return(&mut self, qualifier: impl Into<Qualifier>) -> &mut Self {
        self.return_qualifiers.insert(qualifier);
        self
    }
    /// Fall back to the unqualified binders and mappers when no qualified one exists.
    pub fn qualifiers_optional(&mut self) -> &mut Self {
        self.qualifiers_optional = true;
        self
    }
    /// Map returns: column holding the key, the first one by default.
    pub fn key_column(&mut self, column: impl Into<String>) -> &mut Self {
        self.key_column = Some(column.into());
        self
    }
    /// Map returns: column holding the value, the whole row by default.
    pub fn value_column(&mut self, column: impl Into<String>) -> &mut Self {
        self.value_column = Some(column.into());
        self
    }
    /// Return the generated keys instead of the affected row count, no
    /// columns means every generated column.
    pub fn get_generated_keys<I>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.generated_keys = Some(columns.into_iter().map(Into::into).collect());
        self
    }
    /// Output parameter of a call, `sql_type` is a typed null.
    pub fn out_parameter(&mut self, name: impl Into<String>, sql_type: Value) -> &mut Self {
        self.out_parameters.push((name.into(), sql_type));
        self
    }
    pub fn chunk_size(&mut self, size: usize) -> &mut Self {
        self.chunk_size = Some(size);
        self
    }
    /// Batches run in a transaction unless disabled here.
    pub fn transactional(&mut self, transactional: bool) -> &mut Self {
        self.transactional = Some(transactional);
        self
    }
    /// Map every row of the result with this mapper.
    pub fn use_row_mapper<T: Any, M: RowMapper<T> + 'static>(&mut self, mapper: M) -> &mut Self {
        let mapper: Arc<dyn RowMapper<T>> = Arc::new(mapper);
        self.row_mapper = Some((TypeKey::of::<T>(), Arc::new(mapper)));
        self
    }
    /// Binders and mappers visible to this method only.
    pub fn registry(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn customize(&mut self, customizer: impl Customizer + 'static) -> &mut Self {
        self.customizers.push(CustomizerDirective::new(customizer));
        self
    }
    pub fn customize_as(
        &mut self,
        label: impl Into<Cow<'static, str>>,
        customizer: impl Customizer + 'static,
    ) -> &mut Self {
        self.customizers
            .push(CustomizerDirective::labeled(label, customizer));
        self
    }
    pub fn customize_named(&mut self, name: impl Into<Cow<'static, str>>) -> &mut Self {
        self.customizers.push(CustomizerDirective::named(name));
        self
    }
    /// Explicit customizer order, replaces the one of the type.
    pub fn customizer_order<I>(&mut self, order: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Cow<'static, str>>,
    {
        self.customizer_order = Some(labels(order));
        self
    }
    pub fn decorate(&mut self, decorator: impl Decorator + 'static) -> &mut Self {
        self.decorators.push(DecoratorDirective::new(decorator));
        self
    }
    pub fn decorate_named(&mut self, name: impl Into<Cow<'static, str>>) -> &mut Self {
        self.decorators.push(DecoratorDirective::named(name));
        self
    }
    /// Explicit decorator order, replaces the one of the type.
    pub fn decorator_order<I>(&mut self, order: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Cow<'static, str>>,
    {
        self.decorator_order = Some(labels(order));
        self
    }
}

/// Static description of one parameter.
pub struct ParamDeclaration {
    pub(crate) name: String,
    pub(crate) ty: TypeKey,
    pub(crate) qualifiers: QualifierSet,
    pub(crate) customizers: Vec<CustomizerDirective>,
    pub(crate) chunk_size: bool,
}

impl ParamDeclaration {
    fn new<T: Any>(name: String) -> Self {
        Self {
            name,
            ty: TypeKey::of::<T>(),
            qualifiers: QualifierSet::new(),
            customizers: Vec::new(),
            chunk_size: false,
        }
    }

    /// A parameter with customizers is no longer bound by name and position.
    pub fn customize(&mut self, customizer: impl Customizer + 'static) -> &mut Self {
        self.customizers.push(CustomizerDirective::new(customizer));
        self
    }
    pub fn customize_named(&mut self, name: impl Into<Cow<'static, str>>) -> &mut Self {
        self.customizers.push(CustomizerDirective::named(name));
        self
    }
    /// Qualifier used to pick the binder of the argument.
    pub fn qualify(&mut self, qualifier: impl Into<Qualifier>) -> &mut Self {
        self.qualifiers.insert(qualifier);
        self
    }
    /// The argument (a `usize`) is the chunk size of the batch, it is not bound.
    pub fn chunk_size(&mut self) -> &mut Self {
        self.chunk_size = true;
        self
    }
}
