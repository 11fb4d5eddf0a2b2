//! Upsert (INSERT ... ON CONFLICT / ON DUPLICATE KEY) SQL generation.

use crate::error::{RelmapError, RelmapResult};
use crate::transpiler::conditions::ParamContext;
use crate::transpiler::{Compiler, Statement};
use crate::value::{Record, Value};

use super::insert::{insert_body, returning_clause, with_insert_defaults};

/// Generate UPSERT SQL.
///
/// `conflict_paths` name the unique fields of the conflict target. Every
/// other field of the payload is overwritten with the incoming value, and
/// `on_update` generators fill fields the payload leaves out. Values that
/// only `on_insert` generators produced are written on insert alone.
pub fn build_upsert(
    c: &Compiler<'_>,
    entity: &str,
    conflict_paths: &[&str],
    payload: &Record,
) -> RelmapResult<Statement> {
    let schema = c.schema(entity)?;
    let generator = c.generator();
    if conflict_paths.is_empty() {
        return Err(RelmapError::InvalidFilter(format!(
            "upsert into '{}' requires conflict fields",
            schema.name
        )));
    }

    let row = with_insert_defaults(&schema, payload);
    let mut params = ParamContext::new();
    let (keys, body) = insert_body(&schema, std::slice::from_ref(&row), generator, &mut params)?;

    let column = |name: &str| generator.escape_identifier(schema.column(name).unwrap_or(name));
    let conflict: Vec<String> = conflict_paths.iter().map(|p| column(p)).collect();

    let mut assignments: Vec<String> = keys
        .iter()
        .filter(|key| payload.contains_key(key.as_str()) && !conflict_paths.contains(&key.as_str()))
        .map(|key| {
            let col = column(key);
            format!("{} = {}", col, generator.excluded(&col))
        })
        .collect();
    for field in &schema.fields {
        if let Some(on_update) = &field.on_update {
            if !payload.contains_key(&field.name) && !conflict_paths.contains(&field.name.as_str()) {
                let placeholder = params.add_param(Value::from(on_update.generate()), generator);
                assignments.push(format!("{} = {}", column(&field.name), placeholder));
            }
        }
    }

    let mut sql = String::from("INSERT INTO ");
    sql.push_str(&generator.escape_identifier(&schema.storage_name));
    sql.push_str(&body);
    sql.push_str(&generator.upsert_clause(&conflict, &assignments));
    sql.push_str(&returning_clause(&schema, generator));

    Ok(Statement::new(sql, params.into_values()))
}
