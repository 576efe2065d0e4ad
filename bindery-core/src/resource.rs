use crate::{Connection, Driver, Error, Isolation, QueryResult, Result, Statement, truncate_long};
use log::{debug, warn};
use std::{
    fmt::{self, Debug, Formatter},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

static HANDLE_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct TransactionState {
    depth: usize,
    isolation: Option<Isolation>,
    read_only: bool,
}

struct HandleInner {
    id: u64,
    driver: String,
    connection: Mutex<Box<dyn Connection>>,
    state: Mutex<TransactionState>,
    closed: AtomicBool,
}

/// An open connection plus its transaction nesting depth.
///
/// Clones share the same connection and the same depth. Whoever opened the
/// handle closes it: the engine closes the handles it opens for on demand
/// calls and never closes a handle it was attached to.
#[derive(Clone)]
pub struct Handle(Arc<HandleInner>);

impl Handle {
    pub fn open(driver: &dyn Driver) -> Result<Self> {
        let connection = driver
            .connect()
            .map_err(|e| Error::resource(format!("Could not open a {} connection", driver.name()), e))?;
        let handle = Handle(Arc::new(HandleInner {
            id: HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            driver: driver.name().to_string(),
            connection: Mutex::new(connection),
            state: Default::default(),
            closed: AtomicBool::new(false),
        }));
        debug!("Opened handle {handle:?}");
        Ok(handle)
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn execute(&self, statement: &Statement) -> anyhow::Result<QueryResult> {
        if self.is_closed() {
            anyhow::bail!("Handle {} is closed", self.0.id);
        }
        debug!(
            "Handle {} executes {}: {}",
            self.0.id,
            statement.kind,
            truncate_long!(statement.sql)
        );
        lock(&self.0.connection).execute(statement)
    }

    /// Enter a transaction scope, the transaction begins only at depth 0.
    ///
    /// A scope asking for an isolation level different from the one of the
    /// running transaction is rejected.
    pub fn begin_with(&self, isolation: Option<Isolation>, read_only: bool) -> Result<()> {
        let mut state = lock(&self.0.state);
        if state.depth == 0 {
            lock(&self.0.connection)
                .begin(isolation, read_only)
                .map_err(|e| Error::Transaction {
                    message: format!("Handle {} could not begin a transaction", self.0.id),
                    source: Some(e),
                    cause: None,
                })?;
            debug!("Handle {} began a transaction", self.0.id);
            state.isolation = isolation;
            state.read_only = read_only;
        } else if let (Some(current), Some(requested)) = (state.isolation, isolation) {
            if current != requested {
                return Err(Error::transaction(format!(
                    "Cannot join a {current} transaction from a scope requiring {requested}"
                )));
            }
        }
        state.depth += 1;
        Ok(())
    }

    pub fn begin(&self) -> Result<()> {
        self.begin_with(None, false)
    }

    /// Leave a transaction scope, the transaction commits when the depth returns to 0.
    pub fn commit(&self) -> Result<()> {
        let mut state = lock(&self.0.state);
        if state.depth == 0 {
            return Err(Error::transaction("There is no transaction to commit"));
        }
        state.depth -= 1;
        if state.depth == 0 {
            lock(&self.0.connection)
                .commit()
                .map_err(|e| Error::Transaction {
                    message: format!("Handle {} could not commit", self.0.id),
                    source: Some(e),
                    cause: None,
                })?;
            debug!("Handle {} committed", self.0.id);
        }
        Ok(())
    }

    /// Leave a transaction scope, the transaction rolls back when the depth returns to 0.
    pub fn rollback(&self) -> Result<()> {
        self.unwind().map_err(|e| Error::Transaction {
            message: format!("Handle {} could not roll back", self.0.id),
            source: Some(e),
            cause: None,
        })
    }

    fn unwind(&self) -> anyhow::Result<()> {
        let mut state = lock(&self.0.state);
        if state.depth == 0 {
            anyhow::bail!("There is no transaction to roll back");
        }
        state.depth -= 1;
        if state.depth == 0 {
            lock(&self.0.connection).rollback()?;
            debug!("Handle {} rolled back", self.0.id);
        }
        Ok(())
    }

    /// Run `f` in a transaction scope: commit on success, roll back on failure.
    ///
    /// A failed rollback is reported as a transaction error caused by the
    /// error of `f`.
    pub fn transaction<T>(
        &self,
        isolation: Option<Isolation>,
        read_only: bool,
        f: impl FnOnce(&Handle) -> Result<T>,
    ) -> Result<T> {
        self.begin_with(isolation, read_only)?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => match self.unwind() {
                Ok(()) => Err(e),
                Err(rollback) => Err(Error::Transaction {
                    message: format!("Handle {} could not roll back after a failure", self.0.id),
                    source: Some(rollback),
                    cause: Some(Box::new(e)),
                }),
            },
        }
    }

    pub fn in_transaction<T>(&self, f: impl FnOnce(&Handle) -> Result<T>) -> Result<T> {
        self.transaction(None, false, f)
    }

    pub fn is_in_transaction(&self) -> bool {
        self.transaction_depth() > 0
    }

    pub fn transaction_depth(&self) -> usize {
        lock(&self.0.state).depth
    }

    pub fn isolation(&self) -> Option<Isolation> {
        let state = lock(&self.0.state);
        if state.depth > 0 { state.isolation } else { None }
    }

    pub fn is_read_only(&self) -> bool {
        let state = lock(&self.0.state);
        state.depth > 0 && state.read_only
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// Close the connection, idempotent.
    ///
    /// A transaction still open is rolled back and reported as an error.
    pub fn close(&self) -> Result<()> {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = lock(&self.0.state);
        let mut connection = lock(&self.0.connection);
        let pending = if state.depth > 0 {
            state.depth = 0;
            Some(connection.rollback())
        } else {
            None
        };
        let closed = connection.close();
        debug!("Closed handle {}", self.0.id);
        match (pending, closed) {
            (_, Err(e)) => Err(Error::resource(
                format!("Could not close handle {}", self.0.id),
                e,
            )),
            (Some(rollback), Ok(())) => Err(Error::Transaction {
                message: format!(
                    "Handle {} was closed with an open transaction, it was rolled back",
                    self.0.id
                ),
                source: rollback.err(),
                cause: None,
            }),
            (None, Ok(())) => Ok(()),
        }
    }

    pub fn same_as(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({} #{})", self.0.driver, self.0.id)
    }
}

/// A handle opened by the engine, closed exactly once.
///
/// Whoever holds the last reference of an unreleased lease (an abandoned lazy
/// result) closes it on drop.
pub(crate) struct Lease {
    handle: Handle,
    released: AtomicBool,
    handed_over: AtomicBool,
}

impl Lease {
    fn new(handle: Handle) -> Self {
        Self {
            handle,
            released: AtomicBool::new(false),
            handed_over: AtomicBool::new(false),
        }
    }
    pub(crate) fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.handle.close()
    }
    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !*self.released.get_mut() {
            warn!(
                "Closing {:?} from fallback cleanup, a lazy result was dropped before being exhausted or closed",
                self.handle
            );
            if let Err(e) = self.handle.close() {
                warn!("{e}");
            }
        }
    }
}

/// Resource of one top level on demand call, opened at first use.
pub(crate) struct CallScope {
    driver: Arc<dyn Driver>,
    lease: Mutex<Option<Arc<Lease>>>,
}

impl CallScope {
    pub(crate) fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            lease: Mutex::new(None),
        }
    }

    pub(crate) fn handle(&self) -> Result<Handle> {
        let mut lease = lock(&self.lease);
        match lease.as_ref() {
            Some(current) if !current.is_released() => Ok(current.handle.clone()),
            _ => {
                let handle = Handle::open(self.driver.as_ref())?;
                *lease = Some(Arc::new(Lease::new(handle.clone())));
                Ok(handle)
            }
        }
    }

    /// The current lease becomes owned by a lazy result, the scope will not close it.
    pub(crate) fn hand_over(&self) -> Option<Arc<Lease>> {
        lock(&self.lease).as_ref().map(|v| {
            v.handed_over.store(true, Ordering::Release);
            v.clone()
        })
    }

    /// End of the top level call: close the resource unless a lazy result owns it.
    pub(crate) fn finish(&self) -> Result<()> {
        match lock(&self.lease).take() {
            Some(lease) if !lease.handed_over.load(Ordering::Acquire) => lease.release(),
            _ => Ok(()),
        }
    }
}

/// Combine the outcome of a call with the outcome of its cleanup, the call
/// error stays the primary one.
pub(crate) fn with_cleanup<T>(result: Result<T>, cleanup: Result<()>) -> Result<T> {
    match (result, cleanup) {
        (Ok(v), Ok(())) => Ok(v),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(c)) => Err(e.suppress(c)),
    }
}

/// Where a call gets its handle from.
#[derive(Clone)]
pub(crate) enum Resource {
    Attached(Handle),
    Scoped(Arc<CallScope>),
}

impl Resource {
    pub(crate) fn handle(&self) -> Result<Handle> {
        match self {
            Resource::Attached(handle) => Ok(handle.clone()),
            Resource::Scoped(scope) => scope.handle(),
        }
    }

    /// Lease to hand to a lazy result, none when attached.
    pub(crate) fn lease_lazy(&self) -> Option<Arc<Lease>> {
        match self {
            Resource::Attached(..) => None,
            Resource::Scoped(scope) => scope.hand_over(),
        }
    }
}

/// Where a runtime object gets resources from.
#[derive(Clone)]
pub(crate) enum Origin {
    Attached(Handle),
    OnDemand(Arc<dyn Driver>),
    /// View handed to default bodies, nested calls join the running call.
    Scoped(Arc<CallScope>),
}

impl Debug for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Attached(handle) => write!(f, "attached to {handle:?}"),
            Origin::OnDemand(driver) => write!(f, "on demand ({})", driver.name()),
            Origin::Scoped(..) => f.write_str("scoped"),
        }
    }
}
