//! SELECT SQL generation.
//!
//! To-one relations named in the projection become joins, recursively, with
//! their columns aliased by the dotted relation path (`"author.name"`) so
//! [`crate::unflatten`] can rebuild the nesting. To-many relations are left to
//! the querier.

use crate::error::{RelmapError, RelmapResult};
use crate::query::{Direction, Filter, ProjectEntry, ProjectItem, Projection, Query, RelationQuery};
use crate::schema::EntitySchema;
use crate::transpiler::conditions::{
    Clause, FilterOptions, ParamContext, SoftDeleteGuard, compile_expr, where_clause,
};
use crate::transpiler::{Compiler, Statement};
use crate::value::{RawContext, RawExpr, Value};

/// Result column carrying the parent id in a many-to-many population query.
pub const LINK_KEY: &str = "__link";

/// Extra join through a link entity, used to load many-to-many targets of
/// several parents in one query.
#[derive(Debug, Clone)]
pub struct LinkJoin {
    pub entity: String,
    /// Link field holding the parent id; selected as [`LINK_KEY`].
    pub source_key: String,
    /// Link field holding the target id.
    pub target_key: String,
    pub parent_ids: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    pub soft_delete: bool,
    pub link: Option<LinkJoin>,
}

enum Selected<'p> {
    Field(String),
    Raw(&'p RawExpr, Option<&'p str>),
}

/// Generate SELECT SQL.
pub fn build_select(c: &Compiler<'_>, entity: &str, query: &Query, soft_delete: bool) -> RelmapResult<Statement> {
    build_select_with(
        c,
        entity,
        query,
        &SelectOptions {
            soft_delete,
            link: None,
        },
    )
}

pub fn build_select_with(
    c: &Compiler<'_>,
    entity: &str,
    query: &Query,
    options: &SelectOptions,
) -> RelmapResult<Statement> {
    let schema = c.schema(entity)?;
    let generator = c.generator();
    let mut params = ParamContext::new();

    let relations = match &query.project {
        Some(project) => project.relations(&schema)?,
        None => Vec::new(),
    };
    let mut has_joins = options.link.is_some();
    for (name, _) in &relations {
        if schema.joinable_relation(name)?.cardinality.is_to_one() {
            has_joins = true;
        }
    }

    let table = generator.escape_identifier(&schema.storage_name);
    let qualifier = has_joins.then(|| table.clone());

    let mut selection = selection(&schema, query.project.as_ref());
    for key in added_parent_keys(&schema, query.project.as_ref())? {
        selection.push(Selected::Field(key));
    }
    let mut columns: Vec<String> = selection
        .iter()
        .map(|s| render_column(c, &schema, s, qualifier.as_deref(), None))
        .collect();

    let mut joins = Vec::new();
    let mut link_filter = None;
    if let Some(link) = &options.link {
        let link_schema = c.schema(&link.entity)?;
        let link_table = generator.escape_identifier(&link_schema.storage_name);
        let source = format!(
            "{}.{}",
            link_table,
            generator.escape_identifier(link_schema.column(&link.source_key).unwrap_or(&link.source_key))
        );
        columns.push(format!("{} AS {}", source, generator.quote_identifier(LINK_KEY)));
        joins.push(format!(
            "INNER JOIN {} ON {}.{} = {}.{}",
            link_table,
            link_table,
            generator.escape_identifier(link_schema.column(&link.target_key).unwrap_or(&link.target_key)),
            table,
            generator.escape_identifier(&schema.id_field().column)
        ));
        link_filter = Some((source, link.parent_ids.clone()));
    }

    join_relations(
        c,
        &schema,
        &table,
        None,
        &relations,
        options.soft_delete,
        &mut columns,
        &mut joins,
        &mut params,
    )?;

    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), table);
    for join in &joins {
        sql.push(' ');
        sql.push_str(join);
    }

    // WHERE: link restriction first, then the caller's filter.
    let mut conditions = Vec::new();
    if let Some((source, ids)) = link_filter {
        if ids.is_empty() {
            conditions.push("1 = 0".to_string());
        } else {
            let placeholders: Vec<String> = ids
                .into_iter()
                .map(|id| params.add_param(id, generator))
                .collect();
            conditions.push(format!("{} IN ({})", source, placeholders.join(", ")));
        }
    }
    let filter_options = FilterOptions {
        qualifier: qualifier.clone(),
        clause: Clause::Where,
        soft_delete: if options.soft_delete {
            SoftDeleteGuard::IfUnconstrained
        } else {
            SoftDeleteGuard::Off
        },
    };
    if let Some(expr) = compile_expr(c, &schema, &query.filter, &filter_options, &mut params)? {
        if conditions.is_empty() {
            conditions.push(expr.sql);
        } else {
            conditions.push(expr.in_and());
        }
    }
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if !query.group.is_empty() {
        let group: Vec<String> = query
            .group
            .iter()
            .map(|f| field_ref(c, &schema, f, qualifier.as_deref()))
            .collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&group.join(", "));
    }

    if let Some(having) = &query.having {
        // HAVING sees output aliases, which are never qualified.
        let having_options = FilterOptions::default().clause(Clause::Having);
        sql.push_str(&where_clause(c, &schema, having, &having_options, &mut params)?);
    }

    if !query.sort.is_empty() {
        let mut terms = Vec::with_capacity(query.sort.len());
        for sort in &query.sort {
            let column = sort_ref(c, &schema, &sort.key, qualifier.as_deref())?;
            terms.push(match sort.direction {
                Direction::Asc => column,
                Direction::Desc => format!("{} DESC", column),
            });
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }

    sql.push_str(&generator.limit_offset(query.limit, query.skip));

    Ok(Statement::new(sql, params.into_values()))
}

/// Parent fields that to-many population matches children on but that
/// `project` does not select. The SELECT adds them; callers drop them from
/// the result once population is done.
pub fn added_parent_keys(schema: &EntitySchema, project: Option<&Projection>) -> RelmapResult<Vec<String>> {
    let Some(project) = project else {
        return Ok(Vec::new());
    };
    let selected = selection(schema, Some(project));
    let mut keys: Vec<String> = Vec::new();
    for (name, _) in project.relations(schema)? {
        let relation = schema.joinable_relation(&name)?;
        if relation.cardinality.is_to_one() {
            continue;
        }
        let key = match relation.reference() {
            Some(reference) if relation.through.is_none() => reference.local.clone(),
            _ => schema.id.clone(),
        };
        let present = keys.contains(&key) || selected.iter().any(|s| matches!(s, Selected::Field(f) if *f == key));
        if !present {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// Select list for one level, without joins.
pub fn build_columns(
    c: &Compiler<'_>,
    schema: &EntitySchema,
    project: Option<&Projection>,
    qualifier: Option<&str>,
    path: Option<&str>,
) -> String {
    selection(schema, project)
        .iter()
        .map(|s| render_column(c, schema, s, qualifier, path))
        .collect::<Vec<_>>()
        .join(", ")
}

#[allow(clippy::too_many_arguments)]
fn join_relations(
    c: &Compiler<'_>,
    parent: &EntitySchema,
    parent_qualifier: &str,
    parent_path: Option<&str>,
    relations: &[(String, RelationQuery)],
    soft_delete: bool,
    columns: &mut Vec<String>,
    joins: &mut Vec<String>,
    params: &mut ParamContext,
) -> RelmapResult<()> {
    let generator = c.generator();
    for (name, relation_query) in relations {
        let relation = parent.joinable_relation(name)?;
        if relation.cardinality.is_to_many() {
            // needs a separate query
            continue;
        }
        let reference = relation
            .reference()
            .ok_or_else(|| RelmapError::UnresolvedRelation {
                entity: parent.name.clone(),
                relation: name.clone(),
            })?;
        let target = c.schema(&relation.target)?;
        let path = match parent_path {
            Some(p) => format!("{}.{}", p, name),
            None => name.clone(),
        };
        let alias = generator.quote_identifier(&path);

        let mut on = format!(
            "{}.{} = {}.{}",
            alias,
            generator.escape_identifier(target.column(&reference.foreign).unwrap_or(&reference.foreign)),
            parent_qualifier,
            generator.escape_identifier(parent.column(&reference.local).unwrap_or(&reference.local))
        );
        let filter = relation_query.filter.clone().unwrap_or_default();
        let options = FilterOptions::qualified(alias.clone()).soft_delete(if soft_delete {
            SoftDeleteGuard::IfUnconstrained
        } else {
            SoftDeleteGuard::Off
        });
        if let Some(expr) = compile_expr(c, &target, &filter, &options, params)? {
            on.push_str(" AND ");
            on.push_str(&expr.in_and());
        }

        let kind = if relation_query.required { "INNER" } else { "LEFT" };
        joins.push(format!(
            "{} JOIN {} {} ON {}",
            kind,
            generator.escape_identifier(&target.storage_name),
            alias,
            on
        ));

        let project = relation_query.project.as_ref();
        columns.extend(
            selection(&target, project)
                .iter()
                .map(|s| render_column(c, &target, s, Some(&alias), Some(&path))),
        );

        let nested = match project {
            Some(p) => p.relations(&target)?,
            None => Vec::new(),
        };
        join_relations(c, &target, &alias, Some(&path), &nested, soft_delete, columns, joins, params)?;
    }
    Ok(())
}

/// Fields and raw expressions a projection selects from one entity.
fn selection<'p>(schema: &EntitySchema, project: Option<&'p Projection>) -> Vec<Selected<'p>> {
    let all_stored = || -> Vec<Selected<'p>> {
        schema
            .stored_fields()
            .map(|f| Selected::Field(f.name.clone()))
            .collect()
    };
    let mut selected = match project {
        None => all_stored(),
        Some(Projection::List(items)) => items
            .iter()
            .filter_map(|item| match item {
                ProjectItem::Field(name) if schema.relation(name).is_some() => None,
                ProjectItem::Field(name) => Some(Selected::Field(name.clone())),
                ProjectItem::Raw { expr, alias } => Some(Selected::Raw(expr, alias.as_deref())),
            })
            .collect(),
        Some(Projection::Map(entries)) => {
            let positive: Vec<Selected<'p>> = entries
                .iter()
                .filter(|(key, entry)| {
                    matches!(entry, ProjectEntry::Include(true)) && schema.relation(key).is_none()
                })
                .map(|(key, _)| Selected::Field(key.clone()))
                .collect();
            if positive.is_empty() {
                let negative: Vec<&str> = entries
                    .iter()
                    .filter(|(_, entry)| matches!(entry, ProjectEntry::Include(false)))
                    .map(|(key, _)| key.as_str())
                    .collect();
                schema
                    .stored_fields()
                    .filter(|f| !negative.contains(&f.name.as_str()))
                    .map(|f| Selected::Field(f.name.clone()))
                    .collect()
            } else {
                positive
            }
        }
    };
    if selected.is_empty() {
        selected.push(Selected::Field(schema.id.clone()));
    }
    selected
}

fn render_column(
    c: &Compiler<'_>,
    schema: &EntitySchema,
    selected: &Selected<'_>,
    qualifier: Option<&str>,
    path: Option<&str>,
) -> String {
    let generator = c.generator();
    let prefix = qualifier.map(|q| format!("{}.", q)).unwrap_or_default();
    let raw_context = RawContext {
        generator,
        prefix: &prefix,
    };
    let (expr, name, natural) = match selected {
        Selected::Field(name) => match schema.field(name) {
            Some(field) => match &field.virtual_expr {
                Some(virtual_expr) => (format!("({})", virtual_expr.render(&raw_context)), name.as_str(), false),
                None => (
                    format!("{}{}", prefix, generator.escape_identifier(&field.column)),
                    name.as_str(),
                    field.column == *name,
                ),
            },
            None => (format!("{}{}", prefix, generator.quote_identifier(name)), name.as_str(), true),
        },
        Selected::Raw(raw, alias) => match alias {
            Some(alias) => (raw.render(&raw_context), *alias, false),
            None => return raw.render(&raw_context),
        },
    };
    match path {
        Some(path) => format!("{} AS {}", expr, generator.quote_identifier(&format!("{}.{}", path, name))),
        None if natural => expr,
        None => format!("{} AS {}", expr, generator.escape_identifier(name)),
    }
}

fn field_ref(c: &Compiler<'_>, schema: &EntitySchema, name: &str, qualifier: Option<&str>) -> String {
    let generator = c.generator();
    let prefix = qualifier.map(|q| format!("{}.", q)).unwrap_or_default();
    match schema.field(name) {
        Some(field) if field.is_virtual() => generator.escape_identifier(name),
        Some(field) => format!("{}{}", prefix, generator.escape_identifier(&field.column)),
        None => format!("{}{}", prefix, generator.quote_identifier(name)),
    }
}

/// ORDER BY term; dotted keys address joined relations.
fn sort_ref(c: &Compiler<'_>, schema: &EntitySchema, key: &str, qualifier: Option<&str>) -> RelmapResult<String> {
    let Some((path, field)) = key.rsplit_once('.') else {
        return Ok(field_ref(c, schema, key, qualifier));
    };
    let generator = c.generator();
    let mut current = c.schema(&schema.name)?;
    for segment in path.split('.') {
        let relation = current.require_relation(segment)?;
        current = c.schema(&relation.target)?;
    }
    let column = current.column(field).unwrap_or(field);
    Ok(format!(
        "{}.{}",
        generator.quote_identifier(path),
        generator.escape_identifier(column)
    ))
}

/// Make sure `project` selects `field`; reports whether it had to be added.
pub fn ensure_selected(schema: &EntitySchema, project: Option<Projection>, field: &str) -> (Option<Projection>, bool) {
    let selected = selection(schema, project.as_ref())
        .iter()
        .any(|s| matches!(s, Selected::Field(f) if f == field));
    if selected {
        return (project, false);
    }
    let project = match project {
        Some(Projection::List(mut items)) => {
            items.push(ProjectItem::Field(field.to_string()));
            Projection::List(items)
        }
        Some(Projection::Map(mut entries)) => {
            let has_positive = entries.iter().any(|(key, entry)| {
                matches!(entry, ProjectEntry::Include(true)) && schema.relation(key).is_none()
            });
            if has_positive {
                entries.push((field.to_string(), ProjectEntry::Include(true)));
            } else {
                entries.retain(|(key, _)| key != field);
            }
            Projection::Map(entries)
        }
        None => return (None, false),
    };
    (Some(project), true)
}

/// Filter matching `field IN ids`.
pub fn in_filter(field: &str, ids: Vec<Value>) -> Filter {
    Filter::new().field(field, ids)
}
