//! Filter compiler: filter trees to SQL boolean expressions.
//!
//! Every comparison value is bound through [`ParamContext`]; only
//! [`RawExpr`](crate::value::RawExpr) values are spliced into the text.

use crate::error::{RelmapError, RelmapResult};
use crate::query::{FieldCondition, Filter, FilterEntry, Operator};
use crate::schema::{Cardinality, EntitySchema};
use crate::value::{RawContext, Value};

use super::Compiler;
use super::traits::SqlGenerator;

/// Context for parameterized query building.
#[derive(Debug, Default)]
pub struct ParamContext {
    /// Current parameter index (1-based for Postgres $1, $2, etc.)
    pub index: usize,
    /// Collected parameter values in order
    pub params: Vec<Value>,
}

impl ParamContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value and return the placeholder for it.
    pub fn add_param(&mut self, value: Value, generator: &dyn SqlGenerator) -> String {
        self.index += 1;
        self.params.push(value);
        generator.placeholder(self.index)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.params
    }
}

/// Which clause a filter is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clause {
    #[default]
    Where,
    Having,
}

/// When to append `<softDeleteField> IS NULL`. Only honored for `WHERE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoftDeleteGuard {
    #[default]
    Off,
    /// Unless the filter already constrains the soft-delete field.
    IfUnconstrained,
    Always,
}

#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Escaped table qualifier (no trailing dot) for every column.
    pub qualifier: Option<String>,
    pub clause: Clause,
    pub soft_delete: SoftDeleteGuard,
}

impl FilterOptions {
    pub fn qualified(qualifier: impl Into<String>) -> Self {
        Self {
            qualifier: Some(qualifier.into()),
            ..Self::default()
        }
    }

    pub fn soft_delete(mut self, guard: SoftDeleteGuard) -> Self {
        self.soft_delete = guard;
        self
    }

    pub fn clause(mut self, clause: Clause) -> Self {
        self.clause = clause;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Precedence {
    Atom,
    And,
    Or,
}

/// A compiled boolean expression and the loosest operator at its top level.
#[derive(Debug, Clone)]
pub(crate) struct Expr {
    pub sql: String,
    prec: Precedence,
}

impl Expr {
    fn atom(sql: String) -> Self {
        Self {
            sql,
            prec: Precedence::Atom,
        }
    }

    /// Text safe to place next to `AND`.
    pub fn in_and(&self) -> String {
        if self.prec == Precedence::Or {
            format!("({})", self.sql)
        } else {
            self.sql.clone()
        }
    }

    fn in_or(&self) -> String {
        if self.prec == Precedence::Atom {
            self.sql.clone()
        } else {
            format!("({})", self.sql)
        }
    }

    /// Parenthesize an `AND` group that sits next to sibling keys.
    fn grouped(self) -> Self {
        match self.prec {
            Precedence::And => Self::atom(format!("({})", self.sql)),
            _ => self,
        }
    }

    fn negate(self) -> Self {
        match self.prec {
            Precedence::Atom => Self::atom(format!("NOT {}", self.sql)),
            _ => Self::atom(format!("NOT ({})", self.sql)),
        }
    }
}

fn join_and(mut parts: Vec<Expr>) -> Option<Expr> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Expr {
            sql: parts.iter().map(Expr::in_and).collect::<Vec<_>>().join(" AND "),
            prec: Precedence::And,
        }),
    }
}

fn join_or(mut parts: Vec<Expr>) -> Option<Expr> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Expr {
            sql: parts.iter().map(Expr::in_or).collect::<Vec<_>>().join(" OR "),
            prec: Precedence::Or,
        }),
    }
}

/// Escape LIKE wildcards so the text matches literally.
pub fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Compile `filter` into a boolean expression, or `None` when it is empty.
pub fn compile_filter(
    compiler: &Compiler<'_>,
    schema: &EntitySchema,
    filter: &Filter,
    options: &FilterOptions,
    params: &mut ParamContext,
) -> RelmapResult<Option<String>> {
    Ok(compile_expr(compiler, schema, filter, options, params)?.map(|e| e.sql))
}

/// `" WHERE <expr>"`, or an empty string for an empty filter.
pub fn where_clause(
    compiler: &Compiler<'_>,
    schema: &EntitySchema,
    filter: &Filter,
    options: &FilterOptions,
    params: &mut ParamContext,
) -> RelmapResult<String> {
    let keyword = match options.clause {
        Clause::Where => "WHERE",
        Clause::Having => "HAVING",
    };
    Ok(compile_filter(compiler, schema, filter, options, params)?
        .map(|sql| format!(" {} {}", keyword, sql))
        .unwrap_or_default())
}

pub(crate) fn compile_expr(
    compiler: &Compiler<'_>,
    schema: &EntitySchema,
    filter: &Filter,
    options: &FilterOptions,
    params: &mut ParamContext,
) -> RelmapResult<Option<Expr>> {
    let scope = Scope {
        compiler: *compiler,
        schema,
        prefix: options
            .qualifier
            .as_ref()
            .map(|q| format!("{}.", q))
            .unwrap_or_default(),
        clause: options.clause,
        guard: options.soft_delete,
    };
    scope.expr(filter, params)
}

struct Scope<'a> {
    compiler: Compiler<'a>,
    schema: &'a EntitySchema,
    /// Escaped qualifier with its dot, or empty.
    prefix: String,
    clause: Clause,
    guard: SoftDeleteGuard,
}

impl Scope<'_> {
    fn generator(&self) -> &'static dyn SqlGenerator {
        self.compiler.generator()
    }

    fn raw_context(&self) -> RawContext<'_> {
        RawContext {
            generator: self.generator(),
            prefix: &self.prefix,
        }
    }

    /// Top-level expression, including the soft-delete guard.
    fn expr(&self, filter: &Filter, params: &mut ParamContext) -> RelmapResult<Option<Expr>> {
        let mut parts = self.parts(filter, params)?;
        if self.clause == Clause::Where {
            if let Some(field) = self.schema.soft_delete_field() {
                let guarded = match self.guard {
                    SoftDeleteGuard::Off => false,
                    SoftDeleteGuard::IfUnconstrained => !filter.constrains(&field.name),
                    SoftDeleteGuard::Always => true,
                };
                if guarded {
                    parts.push(Expr::atom(format!(
                        "{}{} IS NULL",
                        self.prefix,
                        self.generator().escape_identifier(&field.column)
                    )));
                }
            }
        }
        Ok(join_and(parts))
    }

    fn group(&self, filter: &Filter, params: &mut ParamContext) -> RelmapResult<Option<Expr>> {
        Ok(join_and(self.parts(filter, params)?))
    }

    fn groups(&self, filters: &[Filter], params: &mut ParamContext) -> RelmapResult<Vec<Expr>> {
        let mut parts = Vec::with_capacity(filters.len());
        for filter in filters {
            if let Some(expr) = self.group(filter, params)? {
                parts.push(expr);
            }
        }
        Ok(parts)
    }

    fn parts(&self, filter: &Filter, params: &mut ParamContext) -> RelmapResult<Vec<Expr>> {
        match filter {
            Filter::Id(id) => {
                let column = self.column(&self.schema.id);
                Ok(vec![self.operator(&column, &Operator::Eq(id.clone()), params)?])
            }
            Filter::Where(entries) => {
                let siblings = entries.len() > 1;
                let mut parts = Vec::with_capacity(entries.len());
                for entry in entries {
                    if let Some(expr) = self.entry(entry, params)? {
                        parts.push(if siblings { expr.grouped() } else { expr });
                    }
                }
                Ok(parts)
            }
        }
    }

    fn entry(&self, entry: &FilterEntry, params: &mut ParamContext) -> RelmapResult<Option<Expr>> {
        Ok(match entry {
            FilterEntry::Field(name, condition) => self.field(name, condition, params)?,
            FilterEntry::And(filters) => join_and(self.groups(filters, params)?),
            FilterEntry::Or(filters) => join_or(self.groups(filters, params)?),
            FilterEntry::Not(filters) => join_and(self.groups(filters, params)?).map(Expr::negate),
            FilterEntry::Nor(filters) => join_or(self.groups(filters, params)?).map(Expr::negate),
            FilterEntry::Text { fields, value } => {
                let generator = self.generator();
                let columns: Vec<String> = fields.iter().map(|f| self.column(f)).collect();
                let table = if self.prefix.is_empty() {
                    generator.escape_identifier(&self.schema.storage_name)
                } else {
                    self.prefix.trim_end_matches('.').to_string()
                };
                let placeholder = params.add_param(Value::Text(value.clone()), generator);
                Some(Expr::atom(generator.text_search(&table, &columns, &placeholder)))
            }
            FilterEntry::Raw(expr) => Some(Expr::atom(expr.render(&self.raw_context()))),
        })
    }

    /// Column reference for a field name. Undeclared names are always quoted.
    fn column(&self, name: &str) -> String {
        let generator = self.generator();
        match self.schema.field(name) {
            Some(field) => match &field.virtual_expr {
                Some(expr) => format!("({})", expr.render(&self.raw_context())),
                None => format!("{}{}", self.prefix, generator.escape_identifier(&field.column)),
            },
            None => format!("{}{}", self.prefix, generator.quote_identifier(name)),
        }
    }

    fn field(
        &self,
        name: &str,
        condition: &FieldCondition,
        params: &mut ParamContext,
    ) -> RelmapResult<Option<Expr>> {
        if let FieldCondition::Relation(nested) = condition {
            return self.relation(name, nested, params).map(Some);
        }
        let column = self.column(name);
        Ok(self.condition(&column, condition, params)?.map(|expr| {
            if expr.prec == Precedence::Atom {
                expr
            } else {
                Expr::atom(format!("({})", expr.sql))
            }
        }))
    }

    fn condition(
        &self,
        column: &str,
        condition: &FieldCondition,
        params: &mut ParamContext,
    ) -> RelmapResult<Option<Expr>> {
        match condition {
            FieldCondition::Value(value) => self.operator(column, &Operator::Eq(value.clone()), params).map(Some),
            FieldCondition::List(values) => Ok(Some(self.in_list(column, values, false, params))),
            FieldCondition::Ops(ops) => {
                let mut parts = Vec::with_capacity(ops.len());
                for op in ops {
                    parts.push(self.operator(column, op, params)?);
                }
                Ok(join_and(parts))
            }
            FieldCondition::Relation(_) => Err(RelmapError::InvalidFilter(format!(
                "nested filter is not allowed on column {}",
                column
            ))),
        }
    }

    fn operator(&self, column: &str, op: &Operator, params: &mut ParamContext) -> RelmapResult<Expr> {
        let sql = match op {
            Operator::Eq(v) if v.is_null() => format!("{} IS NULL", column),
            Operator::Ne(v) if v.is_null() => format!("{} IS NOT NULL", column),
            Operator::Eq(v) => self.compare(column, "=", v, params),
            Operator::Ne(v) => self.compare(column, "<>", v, params),
            Operator::Lt(v) => self.compare(column, "<", v, params),
            Operator::Lte(v) => self.compare(column, "<=", v, params),
            Operator::Gt(v) => self.compare(column, ">", v, params),
            Operator::Gte(v) => self.compare(column, ">=", v, params),
            Operator::In(values) => return Ok(self.in_list(column, values, false, params)),
            Operator::Nin(values) => return Ok(self.in_list(column, values, true, params)),
            Operator::StartsWith(s) => self.like(column, format!("{}%", escape_like(s)), false, params),
            Operator::IStartsWith(s) => self.like(column, format!("{}%", escape_like(s)), true, params),
            Operator::EndsWith(s) => self.like(column, format!("%{}", escape_like(s)), false, params),
            Operator::IEndsWith(s) => self.like(column, format!("%{}", escape_like(s)), true, params),
            Operator::Includes(s) => self.like(column, format!("%{}%", escape_like(s)), false, params),
            Operator::IIncludes(s) => self.like(column, format!("%{}%", escape_like(s)), true, params),
            Operator::Like(pattern) => self.like(column, pattern.clone(), false, params),
            Operator::ILike(pattern) => self.like(column, pattern.clone(), true, params),
            Operator::Regex(pattern) => {
                let generator = self.generator();
                let placeholder = params.add_param(Value::Text(pattern.clone()), generator);
                generator.regex(column, &placeholder)
            }
            Operator::Not(inner) => {
                let expr = self
                    .condition(column, inner, params)?
                    .ok_or_else(|| RelmapError::InvalidFilter("$not requires a condition".to_string()))?;
                match inner.as_ref() {
                    FieldCondition::Value(_) => format!("NOT {}", expr.sql),
                    _ => format!("NOT ({})", expr.sql),
                }
            }
        };
        Ok(Expr::atom(sql))
    }

    fn bind(&self, value: &Value, params: &mut ParamContext) -> String {
        match value {
            Value::Raw(expr) => expr.render(&self.raw_context()),
            other => params.add_param(other.clone(), self.generator()),
        }
    }

    fn compare(&self, column: &str, op: &str, value: &Value, params: &mut ParamContext) -> String {
        format!("{} {} {}", column, op, self.bind(value, params))
    }

    fn in_list(&self, column: &str, values: &[Value], negate: bool, params: &mut ParamContext) -> Expr {
        if values.is_empty() {
            // Nothing is IN an empty set.
            return Expr::atom(if negate { "1 = 1" } else { "1 = 0" }.to_string());
        }
        let placeholders: Vec<String> = values.iter().map(|v| self.bind(v, params)).collect();
        Expr::atom(format!(
            "{} {}IN ({})",
            column,
            if negate { "NOT " } else { "" },
            placeholders.join(", ")
        ))
    }

    fn like(&self, column: &str, pattern: String, insensitive: bool, params: &mut ParamContext) -> String {
        let generator = self.generator();
        if insensitive {
            let pattern = if generator.lowers_pattern() {
                pattern.to_lowercase()
            } else {
                pattern
            };
            let placeholder = params.add_param(Value::Text(pattern), generator);
            format!("{}{}", generator.ilike(column, &placeholder), generator.like_escape())
        } else {
            let placeholder = params.add_param(Value::Text(pattern), generator);
            format!("{} LIKE {}{}", column, placeholder, generator.like_escape())
        }
    }

    /// `key IN (SELECT ...)` for a nested filter on a relation.
    fn relation(&self, name: &str, nested: &Filter, params: &mut ParamContext) -> RelmapResult<Expr> {
        let relation = self.schema.joinable_relation(name)?;
        let target = self.compiler.schema(&relation.target)?;
        let generator = self.generator();

        let sub = Scope {
            compiler: self.compiler,
            schema: &target,
            prefix: String::new(),
            clause: Clause::Where,
            guard: if self.clause == Clause::Where {
                self.guard
            } else {
                SoftDeleteGuard::Off
            },
        };
        let column = self.column(match relation.cardinality {
            Cardinality::ManyToMany => self.schema.id.as_str(),
            _ => relation
                .reference()
                .map(|r| r.local.as_str())
                .unwrap_or(self.schema.id.as_str()),
        });
        let inner = sub
            .expr(nested, params)?
            .map(|e| format!(" WHERE {}", e.sql))
            .unwrap_or_default();
        let target_table = generator.escape_identifier(&target.storage_name);

        let sql = match (&relation.through, relation.cardinality) {
            (Some(through), Cardinality::ManyToMany) => {
                let link = self.compiler.schema(&through.entity)?;
                format!(
                    "{} IN (SELECT {} FROM {} WHERE {} IN (SELECT {} FROM {}{}))",
                    column,
                    generator.escape_identifier(link.column(&through.source_key).unwrap_or(&through.source_key)),
                    generator.escape_identifier(&link.storage_name),
                    generator.escape_identifier(link.column(&through.target_key).unwrap_or(&through.target_key)),
                    generator.escape_identifier(&target.id_field().column),
                    target_table,
                    inner
                )
            }
            _ => {
                let foreign = relation
                    .reference()
                    .map(|r| r.foreign.as_str())
                    .unwrap_or(target.id.as_str());
                format!(
                    "{} IN (SELECT {} FROM {}{})",
                    column,
                    generator.escape_identifier(target.column(foreign).unwrap_or(foreign)),
                    target_table,
                    inner
                )
            }
        };
        Ok(Expr::atom(sql))
    }
}
