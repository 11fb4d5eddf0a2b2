//! DELETE SQL generation, including soft delete.

use crate::error::{RelmapError, RelmapResult};
use crate::query::Filter;
use crate::transpiler::conditions::{FilterOptions, ParamContext, SoftDeleteGuard, where_clause};
use crate::transpiler::{Compiler, Statement};
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// `None` soft-deletes whenever the entity supports it; `Some(false)`
    /// forces a hard delete; `Some(true)` requires soft-delete support.
    pub soft_delete: Option<bool>,
}

impl DeleteOptions {
    pub fn hard() -> Self {
        Self {
            soft_delete: Some(false),
        }
    }

    pub fn soft() -> Self {
        Self {
            soft_delete: Some(true),
        }
    }
}

/// Generate DELETE SQL, or the soft-delete UPDATE.
pub fn build_delete(
    c: &Compiler<'_>,
    entity: &str,
    filter: &Filter,
    options: DeleteOptions,
) -> RelmapResult<Statement> {
    let schema = c.schema(entity)?;
    let generator = c.generator();
    let table = generator.escape_identifier(&schema.storage_name);
    let mut params = ParamContext::new();

    let soft_field = match (schema.soft_delete_field(), options.soft_delete) {
        (None, Some(true)) => return Err(RelmapError::SoftDeleteNotSupported(schema.name.clone())),
        (Some(_), Some(false)) | (None, _) => None,
        (Some(field), _) => Some(field),
    };

    let sql = match soft_field {
        Some(field) => {
            let value = field
                .on_delete
                .as_ref()
                .map(|g| Value::from(g.generate()))
                .unwrap_or(Value::Null);
            let placeholder = params.add_param(value, generator);
            let options = FilterOptions::default().soft_delete(SoftDeleteGuard::Always);
            format!(
                "UPDATE {} SET {} = {}{}",
                table,
                generator.escape_identifier(&field.column),
                placeholder,
                where_clause(c, &schema, filter, &options, &mut params)?
            )
        }
        None => format!(
            "DELETE FROM {}{}",
            table,
            where_clause(c, &schema, filter, &FilterOptions::default(), &mut params)?
        ),
    };

    Ok(Statement::new(sql, params.into_values()))
}
