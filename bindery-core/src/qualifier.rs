use std::{
    any::{self, Any, TypeId},
    borrow::Cow,
    collections::BTreeSet,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
};

/// Identity of a Rust type, comparable and hashable, with a readable name.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: Any + ?Sized>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
        }
    }
    pub fn id(&self) -> TypeId {
        self.id
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    pub fn is<T: Any + ?Sized>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Debug for TypeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl Display for TypeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Tag narrowing which binder or mapper applies to a type, for example
/// `reversed` or `not_null`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Qualifier(Cow<'static, str>);

impl Qualifier {
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Qualifier {
    fn from(value: &'static str) -> Self {
        Qualifier::new(value)
    }
}

impl From<String> for Qualifier {
    fn from(value: String) -> Self {
        Qualifier(Cow::Owned(value))
    }
}

impl Display for Qualifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Ordered set of qualifiers, equality is set equality.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifierSet(BTreeSet<Qualifier>);

impl QualifierSet {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn insert(&mut self, qualifier: impl Into<Qualifier>) -> bool {
        self.0.insert(qualifier.into())
    }
    pub fn contains(&self, qualifier: &Qualifier) -> bool {
        self.0.contains(qualifier)
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Qualifier> {
        self.0.iter()
    }
    pub fn extend(&mut self, other: &QualifierSet) {
        self.0.extend(other.0.iter().cloned());
    }
}

impl<Q: Into<Qualifier>> FromIterator<Q> for QualifierSet {
    fn from_iter<I: IntoIterator<Item = Q>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl Display for QualifierSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, q) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{q}")?;
        }
        Ok(())
    }
}

/// A type together with the qualifiers attached at a binding or mapping site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedType {
    pub ty: TypeKey,
    pub qualifiers: QualifierSet,
}

impl QualifiedType {
    pub fn of<T: Any + ?Sized>() -> Self {
        Self {
            ty: TypeKey::of::<T>(),
            qualifiers: Default::default(),
        }
    }
    pub fn new(ty: TypeKey, qualifiers: QualifierSet) -> Self {
        Self { ty, qualifiers }
    }
    pub fn with(mut self, qualifier: impl Into<Qualifier>) -> Self {
        self.qualifiers.insert(qualifier);
        self
    }
    pub fn unqualified(&self) -> Self {
        Self {
            ty: self.ty,
            qualifiers: Default::default(),
        }
    }
}

impl Display for QualifiedType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.qualifiers.is_empty() {
            write!(f, "{}", self.ty)
        } else {
            write!(f, "{} {}", self.qualifiers, self.ty)
        }
    }
}
