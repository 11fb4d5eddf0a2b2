//! Values bound to statements, payload records and the raw-SQL escape hatch.

use std::fmt;
use std::sync::Arc;

use crate::transpiler::SqlGenerator;

/// A payload or result row: field name to JSON value.
///
/// Rows coming back from the connection are flat (`"user.name"` keys for
/// joined columns) until they pass through [`crate::unflatten`].
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A scalar bound to a statement placeholder.
///
/// `Raw` never reaches a statement's value list: the compiler splices its
/// SQL text in place of a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Raw(RawExpr),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert back to JSON, used when values round-trip into records.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Raw(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Json(v) => v.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Json(v) => write!(f, "{}", v),
            Value::Raw(r) => write!(f, "{:?}", r),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Json(other.clone()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::from(&v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<RawExpr> for Value {
    fn from(v: RawExpr) -> Self {
        Value::Raw(v)
    }
}

/// What a raw expression sees when it is rendered.
pub struct RawContext<'a> {
    pub generator: &'a dyn SqlGenerator,
    /// Escaped table qualifier including the trailing dot, or empty.
    pub prefix: &'a str,
}

impl RawContext<'_> {
    /// A column of the current table, qualified when a prefix is active.
    pub fn column(&self, name: &str) -> String {
        format!("{}{}", self.prefix, self.generator.quote_identifier(name))
    }

    pub fn quote(&self, name: &str) -> String {
        self.generator.quote_identifier(name)
    }
}

type RawFn = dyn Fn(&RawContext<'_>) -> String + Send + Sync;

/// Caller-opted SQL spliced verbatim. Nothing inside is escaped.
#[derive(Clone)]
pub enum RawExpr {
    Sql(String),
    Fn(Arc<RawFn>),
}

impl RawExpr {
    pub fn render(&self, ctx: &RawContext<'_>) -> String {
        match self {
            RawExpr::Sql(sql) => sql.clone(),
            RawExpr::Fn(f) => f(ctx),
        }
    }
}

impl fmt::Debug for RawExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawExpr::Sql(sql) => f.debug_tuple("Sql").field(sql).finish(),
            RawExpr::Fn(_) => f.write_str("Fn(..)"),
        }
    }
}

impl PartialEq for RawExpr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RawExpr::Sql(a), RawExpr::Sql(b)) => a == b,
            (RawExpr::Fn(a), RawExpr::Fn(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Raw SQL text.
pub fn raw(sql: impl Into<String>) -> RawExpr {
    RawExpr::Sql(sql.into())
}

/// Raw SQL built at render time, e.g. a correlated subquery that needs the
/// current table prefix.
pub fn raw_fn<F>(f: F) -> RawExpr
where
    F: Fn(&RawContext<'_>) -> String + Send + Sync + 'static,
{
    RawExpr::Fn(Arc::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_from_json() {
        assert_eq!(Value::from(json!(42)), Value::Int(42));
        assert_eq!(Value::from(json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::from(json!("a")), Value::Text("a".into()));
        assert_eq!(Value::from(json!(null)), Value::Null);
        assert_eq!(Value::from(json!({"a": 1})), Value::Json(json!({"a": 1})));
    }

    #[test]
    fn test_raw_equality() {
        assert_eq!(raw("NOW()"), raw("NOW()"));
        let f = raw_fn(|_| "1".into());
        assert_eq!(f.clone(), f);
        assert_ne!(raw_fn(|_| "1".into()), raw_fn(|_| "1".into()));
    }
}
