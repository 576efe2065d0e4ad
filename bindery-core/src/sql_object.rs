use crate::{
    Argument, Error, Handle, Invocation, Isolation, MethodDescriptor, Outcome, Result, RowIter,
    SqlObjectType, TypeDescriptor,
    descriptor::Implementation,
    resource::{CallScope, Origin, Resource, with_cleanup},
};
use std::{
    any::{self, Any},
    fmt::{self, Debug, Formatter},
    marker::PhantomData,
    sync::Arc,
};

#[derive(Clone)]
pub(crate) struct ObjectCore {
    pub(crate) descriptor: Arc<TypeDescriptor>,
    pub(crate) origin: Origin,
}

impl ObjectCore {
    /// Run one top level call, an on demand object opens (at first use) and
    /// closes a resource around it.
    fn call(&self, method: &MethodDescriptor, arguments: Vec<Argument>) -> Result<Outcome> {
        match &self.origin {
            Origin::OnDemand(driver) => {
                let scope = Arc::new(CallScope::new(driver.clone()));
                let result = self.run(
                    method,
                    Resource::Scoped(scope.clone()),
                    Origin::Scoped(scope.clone()),
                    arguments,
                );
                with_cleanup(result, scope.finish())
            }
            Origin::Attached(handle) => self.run(
                method,
                Resource::Attached(handle.clone()),
                self.origin.clone(),
                arguments,
            ),
            Origin::Scoped(scope) => self.run(
                method,
                Resource::Scoped(scope.clone()),
                self.origin.clone(),
                arguments,
            ),
        }
    }

    fn run(
        &self,
        method: &MethodDescriptor,
        resource: Resource,
        view: Origin,
        arguments: Vec<Argument>,
    ) -> Result<Outcome> {
        match &method.implementation {
            Implementation::Body(body) => {
                let view = ObjectCore {
                    descriptor: self.descriptor.clone(),
                    origin: view,
                };
                body(&view, arguments)
            }
            Implementation::Chain(handler) => {
                let mut invocation = Invocation::new(method, &resource, arguments);
                handler.handle(&mut invocation)
            }
        }
    }

    /// Run `f` on the handle of the object, opened and closed around it for
    /// an on demand object.
    fn scoped<T>(&self, f: impl FnOnce(&Handle, ObjectCore) -> Result<T>) -> Result<T> {
        match &self.origin {
            Origin::OnDemand(driver) => {
                let scope = Arc::new(CallScope::new(driver.clone()));
                let view = ObjectCore {
                    descriptor: self.descriptor.clone(),
                    origin: Origin::Scoped(scope.clone()),
                };
                let result = scope.handle().and_then(|handle| f(&handle, view));
                with_cleanup(result, scope.finish())
            }
            Origin::Attached(handle) => f(handle, self.clone()),
            Origin::Scoped(scope) => f(&scope.handle()?, self.clone()),
        }
    }
}

/// The runtime implementation of a [`SqlObjectType`].
///
/// Obtained from [`crate::Bindery::attach`] (every call reuses a caller owned
/// handle) or [`crate::Bindery::on_demand`] (every top level call opens and
/// closes its own). User facing traits are implemented on it by forwarding
/// to [`SqlObject::invoke`]:
///
/// ```rust
/// use bindery_core::{SqlObject, SqlObjectType, TypeDeclaration, Result, args};
/// struct Users;
/// impl SqlObjectType for Users {
///     fn declare(users: &mut TypeDeclaration) {
///         users
///             .method("name_of")
///             .query("SELECT name FROM users WHERE id = :id")
///             .param::<i64>("id")
///             .returns::<Option<String>>();
///     }
/// }
/// trait UserQueries {
///     fn name_of(&self, id: i64) -> Result<Option<String>>;
/// }
/// impl UserQueries for SqlObject<Users> {
///     fn name_of(&self, id: i64) -> Result<Option<String>> {
///         self.invoke("name_of", args![id])
///     }
/// }
/// ```
pub struct SqlObject<D> {
    core: ObjectCore,
    _declaration: PhantomData<fn() -> D>,
}

impl<D: SqlObjectType> SqlObject<D> {
    pub(crate) fn from_core(core: ObjectCore) -> Self {
        Self {
            core,
            _declaration: PhantomData,
        }
    }

    /// Call a declared method, `R` must be its declared return type.
    pub fn invoke<R: Any + Send>(&self, method: &str, arguments: Vec<Argument>) -> Result<R> {
        let descriptor = self.core.descriptor.method(method).ok_or_else(|| {
            Error::configuration(
                format!("{}::{method}", self.type_name()),
                "the method is not declared",
            )
        })?;
        let site = descriptor.site();
        if !descriptor.return_type().is::<R>() {
            return Err(Error::mapping(
                site,
                anyhow::Error::msg(format!(
                    "the method returns {}, it was invoked as returning {}",
                    descriptor.return_type(),
                    any::type_name::<R>()
                )),
            ));
        }
        if arguments.len() != descriptor.params().len() {
            return Err(Error::binding(
                site,
                format!(
                    "expected {} arguments, got {}",
                    descriptor.params().len(),
                    arguments.len()
                ),
            ));
        }
        // A sequence is checked against its element type.
        if let Some((param, argument)) = descriptor
            .params()
            .iter()
            .zip(&arguments)
            .find(|(param, argument)| argument.ty() != param.ty())
        {
            return Err(Error::binding(
                site,
                format!(
                    "`{}` is declared as {}, the argument is a {}",
                    param.name(),
                    param.ty(),
                    argument.ty()
                ),
            ));
        }
        let outcome = self.core.call(descriptor, arguments)?;
        outcome.downcast::<R>().map(|v| *v).map_err(|_| {
            Error::mapping(
                site,
                anyhow::Error::msg(format!(
                    "the call produced something else than a {}",
                    any::type_name::<R>()
                )),
            )
        })
    }

    /// Run `f` on the handle of this object.
    pub fn with_handle<T>(&self, f: impl FnOnce(&Handle) -> Result<T>) -> Result<T> {
        self.core.scoped(|handle, _| f(handle))
    }

    /// Run `f` in a transaction, every call made through the object it
    /// receives joins that transaction.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&SqlObject<D>) -> Result<T>) -> Result<T> {
        self.transaction(None, f)
    }

    /// Like [`SqlObject::in_transaction`], at the given isolation level. Joining
    /// a running transaction with a different level fails.
    pub fn in_transaction_with<T>(
        &self,
        isolation: Isolation,
        f: impl FnOnce(&SqlObject<D>) -> Result<T>,
    ) -> Result<T> {
        self.transaction(Some(isolation), f)
    }

    fn transaction<T>(
        &self,
        isolation: Option<Isolation>,
        f: impl FnOnce(&SqlObject<D>) -> Result<T>,
    ) -> Result<T> {
        self.core.scoped(|handle, view| {
            let view = SqlObject::<D>::from_core(view);
            handle.transaction(isolation, false, |_| f(&view))
        })
    }

    /// Call a method returning [`RowIter<T>`] and hand its rows to `f`, the
    /// resource of an on demand object is released once `f` returns, whether
    /// or not it consumed every row.
    pub fn with_rows<T, R>(
        &self,
        method: &str,
        arguments: Vec<Argument>,
        f: impl FnOnce(&mut RowIter<T>) -> Result<R>,
    ) -> Result<R>
    where
        T: Send + 'static,
    {
        let mut rows = self.invoke::<RowIter<T>>(method, arguments)?;
        let result = f(&mut rows);
        with_cleanup(result, rows.close())
    }

    /// Call a method returning [`RowIter<T>`] and pass every row to `f`,
    /// stopping at the first error.
    pub fn for_each<T>(
        &self,
        method: &str,
        arguments: Vec<Argument>,
        mut f: impl FnMut(T) -> Result<()>,
    ) -> Result<()>
    where
        T: Send + 'static,
    {
        self.with_rows(method, arguments, |rows: &mut RowIter<T>| {
            rows.try_for_each(|row| f(row?))
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.core.descriptor.name()
    }

    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.core.descriptor
    }

    /// Names of the declared methods.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.core.descriptor.methods().iter().map(|v| v.name())
    }

    pub fn is_on_demand(&self) -> bool {
        !matches!(self.core.origin, Origin::Attached(..))
    }
}

impl<D> Clone for SqlObject<D> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _declaration: PhantomData,
        }
    }
}

impl<D> Debug for SqlObject<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SqlObject<{}>({:?})",
            self.core.descriptor.name(),
            self.core.origin
        )
    }
}
