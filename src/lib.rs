//! Declarative SQL objects.
//!
//! A [`SqlObjectType`] declares its methods once (the statement, how the
//! arguments are bound and how the result is mapped), [`Bindery`] turns it
//! into a [`SqlObject`] whose calls bind, execute and map through the
//! customizers, decorators and registries configured for it.
pub use bindery_core::*;
pub use bindery_macros::*;
