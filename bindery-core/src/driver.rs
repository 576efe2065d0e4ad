use crate::{Isolation, QueryResult, Value};
use anyhow::Result;
use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

/// The execution primitive: opens connections.
pub trait Driver: Send + Sync + 'static {
    /// Human readable name, used in logs.
    fn name(&self) -> &str;
    fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// One open connection-like resource.
///
/// Calls are blocking. The engine never shares a connection between two
/// threads at the same time, it serializes access through its handle.
pub trait Connection: Send {
    fn execute(&mut self, statement: &Statement) -> Result<QueryResult>;
    fn begin(&mut self, isolation: Option<Isolation>, read_only: bool) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Query,
    Update,
    Batch,
    Call,
}

impl Display for StatementKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatementKind::Query => "query",
            StatementKind::Update => "update",
            StatementKind::Batch => "batch",
            StatementKind::Call => "call",
        })
    }
}

/// Output parameter of a stored procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct OutParameter {
    pub name: String,
    /// Index of the placeholder in [`Statement::parameters`].
    pub position: usize,
    /// Typed `NULL` of the expected SQL type.
    pub sql_type: Value,
}

/// Fully bound statement handed to [`Connection::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    /// SQL text, every parameter is a `?` placeholder.
    pub sql: String,
    /// One parameter row per execution: a batch chunk has one per element,
    /// every other kind exactly one.
    pub parameters: Vec<Vec<Value>>,
    pub out_parameters: Vec<OutParameter>,
    /// Columns to return as generated keys, empty list means all of them.
    pub generated_keys: Option<Vec<String>>,
    pub fetch_size: Option<u32>,
    pub max_rows: Option<u64>,
    pub timeout: Option<Duration>,
}

impl Statement {
    pub fn new(kind: StatementKind, sql: impl Into<String>) -> Self {
        Self {
            kind,
            sql: sql.into(),
            parameters: Vec::new(),
            out_parameters: Vec::new(),
            generated_keys: None,
            fetch_size: None,
            max_rows: None,
            timeout: None,
        }
    }

    /// The parameter row of a non batch statement.
    pub fn values(&self) -> &[Value] {
        self.parameters.first().map(Vec::as_slice).unwrap_or_default()
    }
}

/// Error a driver returns when the statement exceeded [`Statement::timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Statement timed out after {0:?}")]
pub struct StatementTimeout(pub Duration);
