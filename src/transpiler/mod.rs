//! SQL compiler.
//!
//! Turns entity schemas plus caller query trees into parameterized
//! statements for one [`Dialect`]. Everything here is pure: no I/O, safe to
//! use from any number of tasks at once.

pub mod conditions;
pub mod dialect;
pub mod dml;
pub mod sql;
pub mod traits;

#[cfg(test)]
mod tests;

use std::sync::Arc;

pub use conditions::{Clause, FilterOptions, ParamContext, SoftDeleteGuard};
pub use dialect::Dialect;
pub use dml::delete::DeleteOptions;
pub use traits::{InsertIdStrategy, SqlGenerator, escape_identifier};

use crate::error::RelmapResult;
use crate::query::{Filter, Query};
use crate::schema::{EntitySchema, SchemaRegistry};
use crate::value::{Record, Value};

/// Compiled SQL plus the values bound to its placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub values: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }

    /// A statement without parameters.
    pub fn bare(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// Compile-only entry point: statements without executing them.
#[derive(Clone, Copy)]
pub struct Compiler<'r> {
    registry: &'r SchemaRegistry,
    dialect: Dialect,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r SchemaRegistry, dialect: Dialect) -> Self {
        Self { registry, dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn registry(&self) -> &'r SchemaRegistry {
        self.registry
    }

    pub fn generator(&self) -> &'static dyn SqlGenerator {
        self.dialect.generator()
    }

    pub fn schema(&self, entity: &str) -> RelmapResult<Arc<EntitySchema>> {
        self.registry.resolve(entity)
    }

    /// `SELECT` with joins for to-one relations in the projection.
    pub fn find(&self, entity: &str, query: &Query, soft_delete: bool) -> RelmapResult<Statement> {
        dml::select::build_select(self, entity, query, soft_delete)
    }

    pub fn insert(&self, entity: &str, payloads: &[Record]) -> RelmapResult<Statement> {
        dml::insert::build_insert(self, entity, payloads)
    }

    pub fn update(
        &self,
        entity: &str,
        filter: &Filter,
        payload: &Record,
        soft_delete: bool,
    ) -> RelmapResult<Statement> {
        dml::update::build_update(self, entity, filter, payload, soft_delete)
    }

    pub fn delete(&self, entity: &str, filter: &Filter, options: DeleteOptions) -> RelmapResult<Statement> {
        dml::delete::build_delete(self, entity, filter, options)
    }

    /// Insert, updating on conflict with `conflict_paths`.
    pub fn upsert(&self, entity: &str, conflict_paths: &[&str], payload: &Record) -> RelmapResult<Statement> {
        dml::upsert::build_upsert(self, entity, conflict_paths, payload)
    }

    pub fn begin_transaction(&self) -> Statement {
        Statement::bare(self.generator().begin_transaction())
    }

    pub fn commit_transaction(&self) -> Statement {
        Statement::bare(self.generator().commit_transaction())
    }

    pub fn rollback_transaction(&self) -> Statement {
        Statement::bare(self.generator().rollback_transaction())
    }
}
