use crate::{ArgumentValue, Isolation, Qualifier, QualifierSet, Value};
use std::{collections::BTreeMap, time::Duration};

/// A value waiting to be bound to a statement parameter.
#[derive(Debug, Clone)]
pub enum Binding {
    /// Already converted, bound as is.
    Value(Value),
    /// Converted through the binder registered for its (qualified) type.
    Argument {
        value: ArgumentValue,
        qualifiers: QualifierSet,
    },
}

impl From<Value> for Binding {
    fn from(value: Value) -> Self {
        Binding::Value(value)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NamedBinding {
    pub(crate) binding: Binding,
    /// Supplied on purpose rather than by the default by-name binding.
    pub(crate) explicit: bool,
}

/// Per call state the customizers work on.
///
/// Every call gets a fresh context, it is dropped once the statement is
/// executed.
#[derive(Debug)]
pub struct StatementContext {
    type_name: &'static str,
    method: String,
    pub(crate) named: BTreeMap<String, NamedBinding>,
    pub(crate) positional: BTreeMap<usize, Binding>,
    pub(crate) definitions: BTreeMap<String, String>,
    pub(crate) qualifiers: QualifierSet,
    pub(crate) fetch_size: Option<u32>,
    pub(crate) max_rows: Option<u64>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) isolation: Option<Isolation>,
}

impl StatementContext {
    pub(crate) fn new(type_name: &'static str, method: &str, qualifiers: QualifierSet) -> Self {
        Self {
            type_name,
            method: method.to_string(),
            named: Default::default(),
            positional: Default::default(),
            definitions: Default::default(),
            qualifiers,
            fetch_size: None,
            max_rows: None,
            timeout: None,
            isolation: None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Bind `:name`, reported as unused under the strict policy if the
    /// statement never references it.
    pub fn bind(&mut self, name: impl Into<String>, binding: impl Into<Binding>) -> &mut Self {
        self.named.insert(
            name.into(),
            NamedBinding {
                binding: binding.into(),
                explicit: true,
            },
        );
        self
    }

    /// Bind `:name` only for the statements that happen to reference it.
    pub fn bind_optional(
        &mut self,
        name: impl Into<String>,
        binding: impl Into<Binding>,
    ) -> &mut Self {
        self.named.insert(
            name.into(),
            NamedBinding {
                binding: binding.into(),
                explicit: false,
            },
        );
        self
    }

    /// Bind the `index`-th `?`, zero based.
    pub fn bind_position(&mut self, index: usize, binding: impl Into<Binding>) -> &mut Self {
        self.positional.insert(index, binding.into());
        self
    }

    pub fn named_binding(&self, name: &str) -> Option<&Binding> {
        self.named.get(name).map(|v| &v.binding)
    }
    pub fn positional_binding(&self, index: usize) -> Option<&Binding> {
        self.positional.get(&index)
    }

    /// Substitution for the `<name>` tokens of the SQL template.
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.definitions.insert(name.into(), value.into());
        self
    }
    pub fn definition(&self, name: &str) -> Option<&str> {
        self.definitions.get(name).map(String::as_str)
    }
    pub fn definitions(&self) -> &BTreeMap<String, String> {
        &self.definitions
    }

    /// Qualifiers used to resolve the mapper of the result.
    pub fn qualify(&mut self, qualifier: impl Into<Qualifier>) -> &mut Self {
        self.qualifiers.insert(qualifier);
        self
    }
    pub fn qualifiers(&self) -> &QualifierSet {
        &self.qualifiers
    }

    pub fn set_fetch_size(&mut self, value: u32) -> &mut Self {
        self.fetch_size = Some(value);
        self
    }
    pub fn fetch_size(&self) -> Option<u32> {
        self.fetch_size
    }
    pub fn set_max_rows(&mut self, value: u64) -> &mut Self {
        self.max_rows = Some(value);
        self
    }
    pub fn max_rows(&self) -> Option<u64> {
        self.max_rows
    }
    pub fn set_timeout(&mut self, value: Duration) -> &mut Self {
        self.timeout = Some(value);
        self
    }
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
    /// The statement runs in a transaction with this isolation level.
    pub fn set_isolation(&mut self, value: Isolation) -> &mut Self {
        self.isolation = Some(value);
        self
    }
    pub fn isolation(&self) -> Option<Isolation> {
        self.isolation
    }
}

#[cfg(test)]
mod tests {
    use super::{Binding, StatementContext};
    use crate::{Qualifier, Value};
    use std::time::Duration;

    #[test]
    fn later_binding_replaces() {
        let mut context = StatementContext::new("Dao", "find", Default::default());
        context
            .bind_optional("id", Value::Int64(Some(1)))
            .bind("id", Value::Int64(Some(2)))
            .bind_position(0, Value::Boolean(Some(true)))
            .define("table", "users")
            .set_timeout(Duration::from_secs(3))
            .qualify(Qualifier::new("reversed"));
        assert!(matches!(
            context.named_binding("id"),
            Some(Binding::Value(Value::Int64(Some(2))))
        ));
        assert!(context.named["id"].explicit);
        assert!(context.positional_binding(0).is_some());
        assert_eq!(context.definition("table"), Some("users"));
        assert_eq!(context.timeout(), Some(Duration::from_secs(3)));
        assert!(context.qualifiers().contains(&Qualifier::new("reversed")));
    }
}
