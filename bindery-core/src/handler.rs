use crate::{
    Argument, ArgumentValue, Binding, Error, Handle, Handler, Invocation, Mapping,
    MethodDescriptor, OperationKind, OutParameter, Outcome, Parameter, ParamRole, Placeholder,
    QualifiedType, QueryResult, Result, RowLabeled, Sequence, Statement, StatementContext,
    StatementKind, Value, apply_customizers, parse_sql, resource::Resource,
};
use log::trace;
use std::{iter::Peekable, mem};

/// Steps of a call, traced as they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Start,
    ContextBuilt,
    Customized,
    Bound,
    Executed,
    Mapped,
    Done,
    Failed,
}

struct Progress<'a> {
    site: &'a str,
    state: CallState,
}

impl<'a> Progress<'a> {
    fn start(site: &'a str) -> Self {
        trace!("{site}: {:?}", CallState::Start);
        Self {
            site,
            state: CallState::Start,
        }
    }
    fn advance(&mut self, state: CallState) {
        trace!("{}: {:?} -> {state:?}", self.site, self.state);
        self.state = state;
    }
    fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(..) => self.advance(CallState::Done),
            Err(e) => {
                trace!("{}: {:?} -> {:?} ({e})", self.site, self.state, CallState::Failed);
                self.state = CallState::Failed;
            }
        }
        result
    }
}

/// The innermost handler: build the context, customize, bind, execute, map.
pub(crate) struct Dispatch;

impl Handler for Dispatch {
    fn handle(&self, invocation: &mut Invocation<'_>) -> Result<Outcome> {
        let method = invocation.method;
        let arguments = mem::take(&mut invocation.arguments);
        let mut progress = Progress::start(method.site());
        let result = match method.operation().kind() {
            OperationKind::Batch => run_batch(&mut progress, method, invocation.resource, arguments),
            OperationKind::PassThrough => Err(Error::configuration(
                method.site(),
                "a default body does not run a statement",
            )),
            _ => run_single(&mut progress, method, invocation.resource, arguments),
        };
        progress.finish(result)
    }
}

fn statement_kind(kind: OperationKind) -> StatementKind {
    match kind {
        OperationKind::Query | OperationKind::PassThrough => StatementKind::Query,
        OperationKind::Update => StatementKind::Update,
        OperationKind::Batch => StatementKind::Batch,
        OperationKind::Call => StatementKind::Call,
    }
}

fn new_context(method: &MethodDescriptor) -> StatementContext {
    StatementContext::new(
        method.type_name(),
        method.name(),
        method.return_qualifiers.clone(),
    )
}

/// Parameters without customizers are bound by name and by position.
fn bind_defaults(method: &MethodDescriptor, context: &mut StatementContext, values: &[ArgumentValue]) {
    for (i, (param, value)) in method.params.iter().zip(values).enumerate() {
        if param.bound_by_default {
            let binding = Binding::Argument {
                value: value.clone(),
                qualifiers: param.qualifiers.clone(),
            };
            context.bind_optional(param.name.clone(), binding.clone());
            context.bind_position(i, binding);
        }
    }
}

fn customize(
    method: &MethodDescriptor,
    context: &mut StatementContext,
    values: &[ArgumentValue],
) -> Result<()> {
    bind_defaults(method, context, values);
    apply_customizers(context, &method.customizers, |i| {
        let param = method.params.get(i)?;
        Some(Parameter {
            index: i,
            name: &param.name,
            value: values.get(i)?,
            qualifiers: &param.qualifiers,
        })
    })
}

fn convert(method: &MethodDescriptor, binding: &Binding) -> Result<Value> {
    match binding {
        Binding::Value(v) => Ok(v.clone()),
        // Arguments were checked against the declared parameter types on invocation.
        Binding::Argument { value, qualifiers } => {
            let requested = QualifiedType::new(value.ty(), qualifiers.clone());
            let binder = method.binder(&requested)?;
            binder(value).map_err(|e| {
                Error::binding(method.site(), format!("could not bind a {}: {e:#}", value.ty()))
            })
        }
    }
}

/// Render the template, then bind every placeholder of the resulting SQL.
fn bind(
    method: &MethodDescriptor,
    context: &StatementContext,
) -> Result<(String, Vec<Value>, Vec<OutParameter>)> {
    let site = method.site();
    let template = method.operation().sql().unwrap_or_default();
    let rendered = method
        .config
        .templates
        .render(template, context.definitions())
        .map_err(|e| Error::binding(site, format!("{e:#}")))?;
    let parsed = parse_sql(&rendered).map_err(|e| Error::binding(site, format!("{e:#}")))?;
    let mut values = Vec::with_capacity(parsed.placeholders.len());
    let mut outputs = Vec::new();
    for (position, placeholder) in parsed.placeholders.iter().enumerate() {
        let binding = match placeholder {
            Placeholder::Named(name) => context.named_binding(name),
            Placeholder::Positional(i) => context.positional_binding(*i),
        };
        let output = match placeholder {
            Placeholder::Named(name) => method.out_parameters.iter().find(|v| v.name == *name),
            Placeholder::Positional(..) => None,
        };
        if let Some(output) = output {
            outputs.push(OutParameter {
                name: output.name.clone(),
                position,
                sql_type: output.sql_type.clone(),
            });
        }
        let value = match (binding, output) {
            (Some(binding), _) => convert(method, binding)?,
            (None, Some(output)) => output.sql_type.clone(),
            (None, None) => {
                return Err(Error::binding(
                    site,
                    match placeholder {
                        Placeholder::Named(name) => format!("missing named parameter `{name}`"),
                        Placeholder::Positional(i) => format!("missing positional parameter {i}"),
                    },
                ));
            }
        };
        values.push(value);
    }
    if let Some(missing) = method
        .out_parameters
        .iter()
        .find(|v| !parsed.references(&v.name))
    {
        return Err(Error::binding(
            site,
            format!("the output parameter `{}` is not referenced by the statement", missing.name),
        ));
    }
    if !method.config.allow_unused_bindings {
        let unused: Vec<&str> = context
            .named
            .iter()
            .filter(|(name, v)| v.explicit && !parsed.references(name))
            .map(|(name, _)| name.as_str())
            .collect();
        if !unused.is_empty() {
            return Err(Error::binding(
                site,
                format!(
                    "superfluous named parameters {unused:?} are not referenced by `{}`",
                    parsed.sql
                ),
            ));
        }
    }
    Ok((parsed.sql, values, outputs))
}

fn new_statement(
    method: &MethodDescriptor,
    context: &StatementContext,
    sql: String,
) -> Statement {
    let mut statement = Statement::new(statement_kind(method.operation().kind()), sql);
    statement.generated_keys = method.generated_keys.clone();
    statement.fetch_size = context.fetch_size();
    statement.max_rows = context.max_rows();
    statement.timeout = context.timeout();
    statement
}

fn run_single(
    progress: &mut Progress<'_>,
    method: &MethodDescriptor,
    resource: &Resource,
    arguments: Vec<Argument>,
) -> Result<Outcome> {
    let mut values = Vec::with_capacity(arguments.len());
    for (param, argument) in method.params.iter().zip(arguments) {
        match argument {
            Argument::Single(v) => values.push(v),
            Argument::Sequence(..) => {
                return Err(Error::binding(
                    method.site(),
                    format!(
                        "`{}` received a sequence, only a batch iterates over its arguments",
                        param.name
                    ),
                ));
            }
        }
    }
    let handle = resource.handle()?;
    let mut context = new_context(method);
    progress.advance(CallState::ContextBuilt);
    customize(method, &mut context, &values)?;
    progress.advance(CallState::Customized);
    match context.isolation() {
        Some(isolation) => handle.transaction(Some(isolation), false, |handle| {
            execute_single(progress, method, resource, handle, context)
        }),
        None => execute_single(progress, method, resource, &handle, context),
    }
}

fn execute_single(
    progress: &mut Progress<'_>,
    method: &MethodDescriptor,
    resource: &Resource,
    handle: &Handle,
    context: StatementContext,
) -> Result<Outcome> {
    let (sql, values, outputs) = bind(method, &context)?;
    let mut statement = new_statement(method, &context, sql);
    statement.parameters = vec![values];
    statement.out_parameters = outputs;
    progress.advance(CallState::Bound);
    let result = handle
        .execute(&statement)
        .map_err(|source| Error::Execution {
            method: method.site().to_string(),
            chunk: None,
            source,
        })?;
    progress.advance(CallState::Executed);
    let mapping = Mapping {
        method,
        qualifiers: context.qualifiers,
        resource,
    };
    let outcome = (method.build)(result, &mapping)?;
    progress.advance(CallState::Mapped);
    Ok(outcome)
}

enum Column {
    Repeat(ArgumentValue),
    Sequence(Sequence),
}

/// Batch elements: sequences are zipped up to the shortest one, every other
/// argument is repeated.
struct Elements(Vec<Column>);

impl Iterator for Elements {
    type Item = Vec<ArgumentValue>;
    fn next(&mut self) -> Option<Self::Item> {
        self.0
            .iter_mut()
            .map(|v| match v {
                Column::Repeat(v) => Some(v.clone()),
                Column::Sequence(s) => s.next(),
            })
            .collect()
    }
}

fn run_batch(
    progress: &mut Progress<'_>,
    method: &MethodDescriptor,
    resource: &Resource,
    arguments: Vec<Argument>,
) -> Result<Outcome> {
    let site = method.site();
    let mut chunk_size = None;
    let mut columns = Vec::with_capacity(arguments.len());
    for (param, argument) in method.params.iter().zip(arguments) {
        match (param.role, argument) {
            (ParamRole::ChunkSize, Argument::Single(v)) => {
                let size = v.downcast_ref::<usize>().copied().unwrap_or_default();
                if size == 0 {
                    return Err(Error::binding(
                        site,
                        format!("the chunk size `{}` must be greater than 0", param.name),
                    ));
                }
                chunk_size = Some(size);
                columns.push(Column::Repeat(v));
            }
            (ParamRole::ChunkSize, Argument::Sequence(..)) => {
                return Err(Error::binding(
                    site,
                    format!("the chunk size `{}` cannot be a sequence", param.name),
                ));
            }
            (ParamRole::Bound, Argument::Single(v)) => columns.push(Column::Repeat(v)),
            (ParamRole::Bound, Argument::Sequence(s)) => columns.push(Column::Sequence(s)),
        }
    }
    let chunk_size = chunk_size
        .or(method.chunk_size)
        .or(method.config.default_chunk_size);
    let mut sequences = columns.iter().filter_map(|v| match v {
        Column::Sequence(s) => Some(s),
        Column::Repeat(..) => None,
    });
    let Some(first) = sequences.next() else {
        return Err(Error::binding(
            site,
            "a batch needs at least one sequence argument",
        ));
    };
    if chunk_size.is_none() && !(first.is_finite() && sequences.all(Sequence::is_finite)) {
        return Err(Error::binding(
            site,
            "an unbounded sequence can only be consumed in chunks, declare a chunk size",
        ));
    }
    let mut elements = Elements(columns).peekable();
    if elements.peek().is_none() {
        return Err(Error::binding(
            site,
            "the batch is empty, there is no statement to execute",
        ));
    }
    let handle = resource.handle()?;
    progress.advance(CallState::ContextBuilt);
    let result = if method.transactional && !handle.is_in_transaction() {
        handle.transaction(None, false, |handle| {
            execute_batch(progress, method, handle, elements, chunk_size)
        })?
    } else {
        execute_batch(progress, method, &handle, elements, chunk_size)?
    };
    progress.advance(CallState::Executed);
    let mapping = Mapping {
        method,
        qualifiers: method.return_qualifiers.clone(),
        resource,
    };
    let outcome = (method.build)(result, &mapping)?;
    progress.advance(CallState::Mapped);
    Ok(outcome)
}

/// Each element is customized on its own, every element of a chunk must
/// render the same statement.
fn bind_chunk(method: &MethodDescriptor, elements: &[Vec<ArgumentValue>]) -> Result<Statement> {
    let mut statement: Option<Statement> = None;
    for values in elements {
        let mut context = new_context(method);
        customize(method, &mut context, values)?;
        let (sql, values, _) = bind(method, &context)?;
        match &mut statement {
            Some(statement) if statement.sql != sql => {
                return Err(Error::binding(
                    method.site(),
                    format!(
                        "every element of a batch chunk must render the same statement, got `{}` and `{sql}`",
                        statement.sql
                    ),
                ));
            }
            Some(statement) => statement.parameters.push(values),
            None => {
                let mut first = new_statement(method, &context, sql);
                first.parameters.push(values);
                statement = Some(first);
            }
        }
    }
    statement.ok_or_else(|| Error::binding(method.site(), "the batch chunk is empty"))
}

fn execute_batch(
    progress: &mut Progress<'_>,
    method: &MethodDescriptor,
    handle: &Handle,
    mut elements: Peekable<Elements>,
    chunk_size: Option<usize>,
) -> Result<QueryResult> {
    let site = method.site();
    let mut counts = Vec::new();
    let mut keys: Vec<RowLabeled> = Vec::new();
    let mut chunk = 0;
    loop {
        let batch: Vec<_> = match chunk_size {
            Some(size) => elements.by_ref().take(size).collect(),
            None => elements.by_ref().collect(),
        };
        if batch.is_empty() {
            break;
        }
        let statement = bind_chunk(method, &batch)?;
        progress.advance(CallState::Bound);
        let failed = |source| Error::Execution {
            method: site.to_string(),
            chunk: Some(chunk),
            source,
        };
        match handle.execute(&statement).map_err(failed)? {
            QueryResult::Batch(v) => counts.extend(v),
            QueryResult::Affected(v) => counts.push(v),
            QueryResult::Rows(rows) => {
                for row in rows {
                    keys.push(row.map_err(failed)?);
                }
            }
            other => {
                return Err(failed(anyhow::Error::msg(format!(
                    "a batch cannot return {}",
                    other.kind_name()
                ))));
            }
        }
        chunk += 1;
    }
    Ok(match method.generated_keys {
        Some(..) => QueryResult::Rows(Box::new(keys.into_iter().map(Ok::<_, anyhow::Error>))),
        None => QueryResult::Batch(counts),
    })
}
