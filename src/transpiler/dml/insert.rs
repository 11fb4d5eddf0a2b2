//! INSERT SQL generation.

use crate::error::{RelmapError, RelmapResult};
use crate::schema::EntitySchema;
use crate::transpiler::conditions::ParamContext;
use crate::transpiler::traits::{InsertIdStrategy, SqlGenerator};
use crate::transpiler::{Compiler, Statement};
use crate::value::{Record, Value};

/// Run `on_insert` generators for fields missing from `payload`.
pub fn with_insert_defaults(schema: &EntitySchema, payload: &Record) -> Record {
    let mut record = payload.clone();
    for field in &schema.fields {
        if let Some(generator) = &field.on_insert {
            if !record.contains_key(&field.name) {
                record.insert(field.name.clone(), generator.generate());
            }
        }
    }
    record
}

/// Payload keys that map to stored columns, in payload order.
pub fn persistable_keys(schema: &EntitySchema, payload: &Record) -> Vec<String> {
    payload
        .keys()
        .filter(|key| schema.is_persistable(key))
        .cloned()
        .collect()
}

/// ` RETURNING id` for dialects that report ids as rows.
pub(crate) fn returning_clause(schema: &EntitySchema, generator: &dyn SqlGenerator) -> String {
    if generator.insert_id_strategy() != InsertIdStrategy::Returning {
        return String::new();
    }
    let id = schema.id_field();
    let column = generator.escape_identifier(&id.column);
    if id.column == id.name {
        format!(" RETURNING {}", column)
    } else {
        format!(" RETURNING {} AS {}", column, generator.escape_identifier(&id.name))
    }
}

/// Column list and `VALUES` rows. All rows use the first row's keys.
pub(crate) fn insert_body(
    schema: &EntitySchema,
    rows: &[Record],
    generator: &dyn SqlGenerator,
    params: &mut ParamContext,
) -> RelmapResult<(Vec<String>, String)> {
    let first = rows.first().ok_or_else(|| {
        RelmapError::InvalidFilter(format!("nothing to insert into '{}'", schema.name))
    })?;
    let keys = persistable_keys(schema, first);
    if keys.is_empty() {
        return Ok((keys, generator.default_values().to_string()));
    }

    let columns: Vec<String> = keys
        .iter()
        .map(|key| generator.escape_identifier(schema.column(key).unwrap_or(key)))
        .collect();
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let placeholders: Vec<String> = keys
                .iter()
                .map(|key| {
                    let value = row.get(key).map(Value::from).unwrap_or(Value::Null);
                    params.add_param(value, generator)
                })
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    Ok((
        keys,
        format!(" ({}) VALUES {}", columns.join(", "), tuples.join(", ")),
    ))
}

/// Generate INSERT SQL for one or more payloads.
pub fn build_insert(c: &Compiler<'_>, entity: &str, payloads: &[Record]) -> RelmapResult<Statement> {
    let schema = c.schema(entity)?;
    let generator = c.generator();
    let rows: Vec<Record> = payloads
        .iter()
        .map(|p| with_insert_defaults(&schema, p))
        .collect();

    let mut params = ParamContext::new();
    let (_, body) = insert_body(&schema, &rows, generator, &mut params)?;

    let mut sql = String::from("INSERT INTO ");
    sql.push_str(&generator.escape_identifier(&schema.storage_name));
    sql.push_str(&body);
    sql.push_str(&returning_clause(&schema, generator));

    Ok(Statement::new(sql, params.into_values()))
}
