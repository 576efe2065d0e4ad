use crate::TypeKey;
use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// A single call argument, or a sequence of them.
///
/// Sequences feed batch operations (one statement per element) and list
/// expansion (`BindList`). A sequence is finite when it was built from a
/// collection or from an iterator reporting an upper bound in its size hint.
pub enum Argument {
    Single(ArgumentValue),
    Sequence(Sequence),
}

/// Type erased argument value, cheap to clone.
#[derive(Clone)]
pub struct ArgumentValue {
    ty: TypeKey,
    value: Arc<dyn Any + Send + Sync>,
}

impl ArgumentValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            ty: TypeKey::of::<T>(),
            value: Arc::new(value),
        }
    }
    pub fn ty(&self) -> TypeKey {
        self.ty
    }
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }
    pub fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self.value.as_ref()
    }
}

impl Debug for ArgumentValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ArgumentValue<{}>", self.ty)
    }
}

/// Lazily consumed sequence of argument values.
pub struct Sequence {
    element: TypeKey,
    finite: bool,
    items: Box<dyn Iterator<Item = ArgumentValue> + Send>,
}

impl Sequence {
    pub fn element(&self) -> TypeKey {
        self.element
    }
    pub fn is_finite(&self) -> bool {
        self.finite
    }
    /// Drain the whole sequence, callers must check [`Sequence::is_finite`] first.
    pub fn collect_values(self) -> Vec<ArgumentValue> {
        self.items.collect()
    }
}

impl Iterator for Sequence {
    type Item = ArgumentValue;
    fn next(&mut self) -> Option<ArgumentValue> {
        self.items.next()
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl Argument {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Argument::Single(ArgumentValue::new(value))
    }

    /// Finite sequence from a collection.
    pub fn list<T, I>(values: I) -> Self
    where
        T: Any + Send + Sync,
        I: IntoIterator<Item = T>,
    {
        let items: Vec<_> = values.into_iter().map(ArgumentValue::new).collect();
        Argument::Sequence(Sequence {
            element: TypeKey::of::<T>(),
            finite: true,
            items: Box::new(items.into_iter()),
        })
    }

    /// Lazy sequence, finite only if the iterator reports an upper bound.
    pub fn iter<T, I>(values: I) -> Self
    where
        T: Any + Send + Sync,
        I: Iterator<Item = T> + Send + 'static,
    {
        let finite = values.size_hint().1.is_some();
        Argument::Sequence(Sequence {
            element: TypeKey::of::<T>(),
            finite,
            items: Box::new(values.map(ArgumentValue::new)),
        })
    }

    /// Type of the value, or of the elements for a sequence.
    pub fn ty(&self) -> TypeKey {
        match self {
            Argument::Single(v) => v.ty(),
            Argument::Sequence(s) => s.element(),
        }
    }

    pub fn as_single(&self) -> Option<&ArgumentValue> {
        match self {
            Argument::Single(v) => Some(v),
            Argument::Sequence(..) => None,
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Argument::Sequence(..))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_single().and_then(ArgumentValue::downcast_ref)
    }
}

impl Debug for Argument {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Single(v) => v.fmt(f),
            Argument::Sequence(s) => write!(
                f,
                "Sequence<{}>{}",
                s.element,
                if s.finite { "" } else { " (unbounded)" }
            ),
        }
    }
}

impl From<ArgumentValue> for Argument {
    fn from(value: ArgumentValue) -> Self {
        Argument::Single(value)
    }
}

/// Build the argument list of a call.
///
/// ```rust
/// use bindery_core::{Argument, args};
/// let args: Vec<Argument> = args![1i64, String::from("Alice")];
/// assert_eq!(args.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Argument>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::Argument::new($value)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::Argument;
    use std::iter;

    #[test]
    fn sequences_report_finiteness() {
        assert!(matches!(Argument::list(vec![1, 2, 3]), Argument::Sequence(s) if s.is_finite()));
        assert!(matches!(Argument::iter(0..10), Argument::Sequence(s) if s.is_finite()));
        assert!(
            matches!(Argument::iter(iter::repeat(1)), Argument::Sequence(s) if !s.is_finite())
        );
    }

    #[test]
    fn single_downcast() {
        let argument = Argument::new(String::from("value"));
        assert_eq!(
            argument.downcast_ref::<String>().map(String::as_str),
            Some("value")
        );
        assert!(argument.downcast_ref::<i32>().is_none());
        assert!(!argument.is_sequence());
    }
}
