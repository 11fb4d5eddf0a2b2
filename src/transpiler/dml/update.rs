//! UPDATE SQL generation.

use crate::error::{RelmapError, RelmapResult};
use crate::query::Filter;
use crate::schema::EntitySchema;
use crate::transpiler::conditions::{FilterOptions, ParamContext, SoftDeleteGuard, where_clause};
use crate::transpiler::{Compiler, Statement};
use crate::value::{Record, Value};

use super::insert::persistable_keys;

/// Run `on_update` generators for fields missing from `payload`.
pub fn with_update_defaults(schema: &EntitySchema, payload: &Record) -> Record {
    let mut record = payload.clone();
    for field in &schema.fields {
        if let Some(generator) = &field.on_update {
            if !record.contains_key(&field.name) {
                record.insert(field.name.clone(), generator.generate());
            }
        }
    }
    record
}

/// Whether an update payload touches any stored column once defaults apply.
pub fn has_updates(schema: &EntitySchema, payload: &Record) -> bool {
    !persistable_keys(schema, &with_update_defaults(schema, payload)).is_empty()
}

/// Generate UPDATE SQL.
pub fn build_update(
    c: &Compiler<'_>,
    entity: &str,
    filter: &Filter,
    payload: &Record,
    soft_delete: bool,
) -> RelmapResult<Statement> {
    let schema = c.schema(entity)?;
    let generator = c.generator();
    let record = with_update_defaults(&schema, payload);
    let keys = persistable_keys(&schema, &record);
    if keys.is_empty() {
        return Err(RelmapError::InvalidFilter(format!(
            "nothing to update on '{}'",
            schema.name
        )));
    }

    let mut params = ParamContext::new();
    let assignments: Vec<String> = keys
        .iter()
        .map(|key| {
            let column = generator.escape_identifier(schema.column(key).unwrap_or(key));
            let value = record.get(key).map(Value::from).unwrap_or(Value::Null);
            format!("{} = {}", column, params.add_param(value, generator))
        })
        .collect();

    let mut sql = format!(
        "UPDATE {} SET {}",
        generator.escape_identifier(&schema.storage_name),
        assignments.join(", ")
    );
    let options = FilterOptions::default().soft_delete(if soft_delete {
        SoftDeleteGuard::IfUnconstrained
    } else {
        SoftDeleteGuard::Off
    });
    sql.push_str(&where_clause(c, &schema, filter, &options, &mut params)?);

    Ok(Statement::new(sql, params.into_values()))
}
