mod argument;
mod as_value;
mod bean;
mod bindery;
mod context;
mod customizer;
mod declaration;
mod decorator;
mod descriptor;
mod driver;
mod error;
mod handler;
mod locator;
mod qualifier;
mod query;
mod registry;
mod resource;
mod returns;
mod sql_object;
mod statement;
mod transaction;
mod util;
mod value;

pub use ::anyhow;
pub use ::anyhow::Context;
pub use argument::*;
pub use as_value::*;
pub use bean::*;
pub use bindery::*;
pub use context::*;
pub use customizer::*;
pub use declaration::*;
pub use decorator::*;
pub use descriptor::*;
pub use driver::*;
pub use error::*;
pub use handler::CallState;
pub use locator::*;
pub use qualifier::*;
pub use query::*;
pub use registry::*;
pub use resource::Handle;
pub use returns::*;
pub use sql_object::SqlObject;
pub use statement::*;
pub use transaction::*;
pub use util::*;
pub use value::*;
