//! # relmap
//!
//! Relational data mapping: declare entities once, get parameterized SQL
//! for four dialects and a querier that cascades relation writes and
//! populates relation reads.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use relmap::prelude::*;
//!
//! let mut registry = SchemaRegistry::new();
//! registry.entity("User").id("id").field("name", FieldOptions::default()).register()?;
//!
//! let compiler = Compiler::new(&registry, Dialect::SQLite);
//! let query = Query::new().filter(Filter::new().field("name", Operator::Ne("lorem".into())));
//! let stmt = compiler.find("User", &query, true)?;
//! // => SELECT id, name FROM "User" WHERE name <> ?
//! ```
//!
//! ## Layers
//!
//! | Module       | Role                                              |
//! |--------------|---------------------------------------------------|
//! | `schema`     | Entity declarations, inference, resolution        |
//! | `query`      | Filters, projections, sorting, paging             |
//! | `transpiler` | Query model to SQL text plus bound values         |
//! | `querier`    | Statement sequences: cascades, population, tx     |
//! | `engine`     | sqlx pool and `Connection` implementation         |

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod querier;
pub mod query;
pub mod schema;
pub mod transpiler;
pub mod unflatten;
pub mod value;

pub mod prelude {
    pub use crate::config::DatabaseConfig;
    pub use crate::connection::{Connection, RunOutcome};
    pub use crate::engine::{Database, SqlxConnection};
    pub use crate::error::*;
    pub use crate::querier::{FindOptions, Querier, TransactionState};
    pub use crate::query::*;
    pub use crate::schema::*;
    pub use crate::transpiler::{Compiler, DeleteOptions, Dialect, SqlGenerator, Statement};
    pub use crate::unflatten::{unflatten, unflatten_rows};
    pub use crate::value::{RawContext, RawExpr, Record, Value, raw, raw_fn};
}
