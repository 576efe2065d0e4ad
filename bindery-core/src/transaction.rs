use crate::{Decorator, Handler, Invocation, Outcome, Result};
use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Isolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Display for Isolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Isolation::ReadUncommitted => "READ UNCOMMITTED",
            Isolation::ReadCommitted => "READ COMMITTED",
            Isolation::RepeatableRead => "REPEATABLE READ",
            Isolation::Serializable => "SERIALIZABLE",
        })
    }
}

/// Runs the decorated call in a transaction.
///
/// Nested scopes on the same handle collapse into the outermost one: only the
/// outermost scope begins, and it alone commits or rolls back. The scope ends
/// when the call returns, a lazy [`crate::RowIter`] is read after it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub isolation: Option<Isolation>,
    pub read_only: bool,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = Some(isolation);
        self
    }
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

struct TransactionHandler {
    transaction: Transaction,
    inner: Arc<dyn Handler>,
}

impl Handler for TransactionHandler {
    fn handle(&self, invocation: &mut Invocation<'_>) -> Result<Outcome> {
        let handle = invocation.handle()?;
        handle.transaction(
            self.transaction.isolation,
            self.transaction.read_only,
            |_| self.inner.handle(invocation),
        )
    }
}

impl Decorator for Transaction {
    fn decorate(&self, inner: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(TransactionHandler {
            transaction: *self,
            inner,
        })
    }
}
