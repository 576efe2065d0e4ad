use anyhow::{Result, bail};
use bindery_core::{
    Connection, Driver, Isolation, OutputValues, QueryResult, RowLabeled, RowNames, RowsAffected,
    Statement, StatementKind, Value,
};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

type Responder = Arc<dyn Fn(&Statement) -> Result<QueryResult> + Send + Sync>;

/// Something the driver saw, tagged with the connection it happened on.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Open(u64),
    Begin(u64, Option<Isolation>, bool),
    Execute(u64, Statement),
    Commit(u64),
    Rollback(u64),
    Close(u64),
}

#[derive(Default)]
struct State {
    responders: Mutex<Vec<(String, Responder)>>,
    events: Mutex<Vec<Event>>,
    connections: AtomicU64,
    fail_connect: AtomicBool,
    fail_close: AtomicBool,
    fail_rollback: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted in-memory driver recording every interaction.
///
/// Statements are answered by the most recently registered responder whose
/// fragment appears in the SQL. Without one a query returns no rows, an
/// update affects one row, a batch one row per element and a call returns
/// its output parameters as typed nulls.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    state: Arc<State>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the statements containing `fragment`.
    pub fn respond<F>(&self, fragment: impl Into<String>, responder: F) -> &Self
    where
        F: Fn(&Statement) -> Result<QueryResult> + Send + Sync + 'static,
    {
        lock(&self.state.responders).push((fragment.into(), Arc::new(responder)));
        self
    }

    /// Answer the queries containing `fragment` with these rows, on every execution.
    pub fn respond_rows(&self, fragment: impl Into<String>, labels: &[&str], rows: Vec<Vec<Value>>) -> &Self {
        let labels: RowNames = labels.iter().map(ToString::to_string).collect();
        self.respond(fragment, move |_| Ok(rows_result(labels.clone(), rows.clone())))
    }

    pub fn fail_connect(&self, fail: bool) -> &Self {
        self.state.fail_connect.store(fail, Ordering::Relaxed);
        self
    }
    pub fn fail_close(&self, fail: bool) -> &Self {
        self.state.fail_close.store(fail, Ordering::Relaxed);
        self
    }
    pub fn fail_rollback(&self, fail: bool) -> &Self {
        self.state.fail_rollback.store(fail, Ordering::Relaxed);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.state.events).clone()
    }
    pub fn clear_events(&self) {
        lock(&self.state.events).clear();
    }
    fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        lock(&self.state.events).iter().filter(|v| predicate(v)).count()
    }
    pub fn opens(&self) -> usize {
        self.count(|v| matches!(v, Event::Open(..)))
    }
    pub fn closes(&self) -> usize {
        self.count(|v| matches!(v, Event::Close(..)))
    }
    pub fn begins(&self) -> usize {
        self.count(|v| matches!(v, Event::Begin(..)))
    }
    pub fn commits(&self) -> usize {
        self.count(|v| matches!(v, Event::Commit(..)))
    }
    pub fn rollbacks(&self) -> usize {
        self.count(|v| matches!(v, Event::Rollback(..)))
    }
    /// Every executed statement, in order.
    pub fn statements(&self) -> Vec<Statement> {
        lock(&self.state.events)
            .iter()
            .filter_map(|v| match v {
                Event::Execute(_, statement) => Some(statement.clone()),
                _ => None,
            })
            .collect()
    }
    /// The SQL of every executed statement, in order.
    pub fn executed(&self) -> Vec<String> {
        self.statements().into_iter().map(|v| v.sql).collect()
    }
}

/// Rows result with shared labels.
pub fn rows_result(labels: RowNames, rows: Vec<Vec<Value>>) -> QueryResult {
    QueryResult::Rows(Box::new(rows.into_iter().map(move |values| {
        Ok(RowLabeled::new(labels.clone(), values.into_boxed_slice()))
    })))
}

impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }
    fn connect(&self) -> Result<Box<dyn Connection>> {
        if self.state.fail_connect.load(Ordering::Relaxed) {
            bail!("The memory database refused the connection");
        }
        let id = self.state.connections.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.state.events).push(Event::Open(id));
        Ok(Box::new(MemoryConnection {
            id,
            state: self.state.clone(),
        }))
    }
}

struct MemoryConnection {
    id: u64,
    state: Arc<State>,
}

impl MemoryConnection {
    fn record(&self, event: Event) {
        lock(&self.state.events).push(event);
    }
}

impl Connection for MemoryConnection {
    fn execute(&mut self, statement: &Statement) -> Result<QueryResult> {
        self.record(Event::Execute(self.id, statement.clone()));
        let responder = lock(&self.state.responders)
            .iter()
            .rev()
            .find(|(fragment, _)| statement.sql.contains(fragment.as_str()))
            .map(|(_, v)| v.clone());
        if let Some(responder) = responder {
            return responder(statement);
        }
        Ok(match statement.kind {
            StatementKind::Query => rows_result(RowNames::from([]), Vec::new()),
            StatementKind::Update => QueryResult::Affected(RowsAffected {
                rows_affected: 1,
                last_affected_id: None,
            }),
            StatementKind::Batch => QueryResult::Batch(
                statement
                    .parameters
                    .iter()
                    .map(|_| RowsAffected {
                        rows_affected: 1,
                        last_affected_id: None,
                    })
                    .collect(),
            ),
            StatementKind::Call => {
                let mut outputs = OutputValues::new();
                for output in &statement.out_parameters {
                    outputs.insert(output.name.clone(), output.sql_type.clone());
                }
                QueryResult::Call {
                    affected: RowsAffected::default(),
                    outputs,
                }
            }
        })
    }
    fn begin(&mut self, isolation: Option<Isolation>, read_only: bool) -> Result<()> {
        self.record(Event::Begin(self.id, isolation, read_only));
        Ok(())
    }
    fn commit(&mut self) -> Result<()> {
        self.record(Event::Commit(self.id));
        Ok(())
    }
    fn rollback(&mut self) -> Result<()> {
        self.record(Event::Rollback(self.id));
        if self.state.fail_rollback.load(Ordering::Relaxed) {
            bail!("The memory database lost the transaction");
        }
        Ok(())
    }
    fn close(&mut self) -> Result<()> {
        self.record(Event::Close(self.id));
        if self.state.fail_close.load(Ordering::Relaxed) {
            bail!("The memory database could not release connection {}", self.id);
        }
        Ok(())
    }
}
