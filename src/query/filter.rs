//! Filter trees.
//!
//! A [`Filter`] is either a bare id or an ordered list of entries that are
//! ANDed together. Field entries hold a [`FieldCondition`]; logical entries
//! hold nested filters.

use serde_json::Value as Json;

use crate::error::{RelmapError, RelmapResult};
use crate::value::{RawExpr, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Bare scalar, sugar for `{ <id>: value }`.
    Id(Value),
    /// Entries joined with AND, in order.
    Where(Vec<FilterEntry>),
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Where(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterEntry {
    Field(String, FieldCondition),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Vec<Filter>),
    Nor(Vec<Filter>),
    /// Full-text search over the given fields.
    Text { fields: Vec<String>, value: String },
    Raw(RawExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldCondition {
    /// Sugar for `$eq`.
    Value(Value),
    /// Sugar for `$in`.
    List(Vec<Value>),
    /// Operators ANDed together.
    Ops(Vec<Operator>),
    /// Nested filter on a relation.
    Relation(Box<Filter>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Eq(Value),
    Ne(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    StartsWith(String),
    IStartsWith(String),
    EndsWith(String),
    IEndsWith(String),
    Includes(String),
    IIncludes(String),
    Like(String),
    ILike(String),
    Regex(String),
    Not(Box<FieldCondition>),
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Eq(_) => "$eq",
            Operator::Ne(_) => "$ne",
            Operator::Lt(_) => "$lt",
            Operator::Lte(_) => "$lte",
            Operator::Gt(_) => "$gt",
            Operator::Gte(_) => "$gte",
            Operator::In(_) => "$in",
            Operator::Nin(_) => "$nin",
            Operator::StartsWith(_) => "$startsWith",
            Operator::IStartsWith(_) => "$istartsWith",
            Operator::EndsWith(_) => "$endsWith",
            Operator::IEndsWith(_) => "$iendsWith",
            Operator::Includes(_) => "$includes",
            Operator::IIncludes(_) => "$iincludes",
            Operator::Like(_) => "$like",
            Operator::ILike(_) => "$ilike",
            Operator::Regex(_) => "$regex",
            Operator::Not(_) => "$not",
        }
    }

    /// Decode one `$op: value` pair.
    pub fn from_json(op: &str, value: &Json) -> RelmapResult<Self> {
        let scalar = || Value::from(value);
        let list = || -> RelmapResult<Vec<Value>> {
            value
                .as_array()
                .map(|items| items.iter().map(Value::from).collect())
                .ok_or_else(|| RelmapError::InvalidFilter(format!("{} expects an array", op)))
        };
        let text = || -> RelmapResult<String> {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| RelmapError::InvalidFilter(format!("{} expects a string", op)))
        };
        Ok(match op {
            "$eq" => Operator::Eq(scalar()),
            "$ne" => Operator::Ne(scalar()),
            "$lt" => Operator::Lt(scalar()),
            "$lte" => Operator::Lte(scalar()),
            "$gt" => Operator::Gt(scalar()),
            "$gte" => Operator::Gte(scalar()),
            "$in" => Operator::In(list()?),
            "$nin" => Operator::Nin(list()?),
            "$startsWith" => Operator::StartsWith(text()?),
            "$istartsWith" => Operator::IStartsWith(text()?),
            "$endsWith" => Operator::EndsWith(text()?),
            "$iendsWith" => Operator::IEndsWith(text()?),
            "$includes" => Operator::Includes(text()?),
            "$iincludes" => Operator::IIncludes(text()?),
            "$like" => Operator::Like(text()?),
            "$ilike" => Operator::ILike(text()?),
            "$regex" => Operator::Regex(text()?),
            "$not" => Operator::Not(Box::new(FieldCondition::from_json(value)?)),
            other => return Err(RelmapError::UnknownOperator(other.to_string())),
        })
    }
}

impl FieldCondition {
    /// Decode the value under a field key.
    pub fn from_json(value: &Json) -> RelmapResult<Self> {
        match value {
            Json::Array(items) => Ok(FieldCondition::List(items.iter().map(Value::from).collect())),
            Json::Object(map) if map.is_empty() => Ok(FieldCondition::Ops(Vec::new())),
            Json::Object(map) => {
                let operators = map.keys().filter(|k| k.starts_with('$')).count();
                if operators == map.len() {
                    map.iter()
                        .map(|(op, v)| Operator::from_json(op, v))
                        .collect::<RelmapResult<Vec<_>>>()
                        .map(FieldCondition::Ops)
                } else if operators == 0 {
                    Filter::from_json(value).map(|f| FieldCondition::Relation(Box::new(f)))
                } else {
                    Err(RelmapError::InvalidFilter(
                        "operators and field names cannot be mixed".to_string(),
                    ))
                }
            }
            scalar => Ok(FieldCondition::Value(Value::from(scalar))),
        }
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<Value>) -> Self {
        Filter::Id(id.into())
    }

    fn push(self, entry: FilterEntry) -> Self {
        let mut entries = match self {
            Filter::Where(entries) => entries,
            id @ Filter::Id(_) => vec![FilterEntry::And(vec![id])],
        };
        entries.push(entry);
        Filter::Where(entries)
    }

    /// `field = value`, or `field IN (...)` for lists.
    pub fn field(self, name: impl Into<String>, condition: impl Into<FieldCondition>) -> Self {
        self.push(FilterEntry::Field(name.into(), condition.into()))
    }

    pub fn and(self, filters: Vec<Filter>) -> Self {
        self.push(FilterEntry::And(filters))
    }

    pub fn or(self, filters: Vec<Filter>) -> Self {
        self.push(FilterEntry::Or(filters))
    }

    pub fn not(self, filters: Vec<Filter>) -> Self {
        self.push(FilterEntry::Not(filters))
    }

    pub fn nor(self, filters: Vec<Filter>) -> Self {
        self.push(FilterEntry::Nor(filters))
    }

    pub fn text(self, fields: &[&str], value: impl Into<String>) -> Self {
        self.push(FilterEntry::Text {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            value: value.into(),
        })
    }

    pub fn raw(self, expr: RawExpr) -> Self {
        self.push(FilterEntry::Raw(expr))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::Where(entries) if entries.is_empty())
    }

    /// Whether a top-level entry constrains `field`.
    pub fn constrains(&self, field: &str) -> bool {
        match self {
            Filter::Id(_) => false,
            Filter::Where(entries) => entries
                .iter()
                .any(|e| matches!(e, FilterEntry::Field(name, _) if name == field)),
        }
    }

    /// Decode the dynamic document shape (`{ name: 'x', $or: [...] }`).
    pub fn from_json(value: &Json) -> RelmapResult<Self> {
        let map = match value {
            Json::Object(map) => map,
            Json::Array(_) => {
                return Err(RelmapError::InvalidFilter(
                    "a filter must be an object or a scalar id".to_string(),
                ));
            }
            scalar => return Ok(Filter::Id(Value::from(scalar))),
        };

        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            let entry = match key.as_str() {
                "$and" => FilterEntry::And(filter_list(key, value)?),
                "$or" => FilterEntry::Or(filter_list(key, value)?),
                "$not" => FilterEntry::Not(filter_list(key, value)?),
                "$nor" => FilterEntry::Nor(filter_list(key, value)?),
                "$text" => text_entry(value)?,
                op if op.starts_with('$') => return Err(RelmapError::UnknownOperator(op.to_string())),
                field => FilterEntry::Field(field.to_string(), FieldCondition::from_json(value)?),
            };
            entries.push(entry);
        }
        Ok(Filter::Where(entries))
    }
}

fn filter_list(key: &str, value: &Json) -> RelmapResult<Vec<Filter>> {
    match value {
        Json::Array(items) => items.iter().map(Filter::from_json).collect(),
        Json::Object(_) => Ok(vec![Filter::from_json(value)?]),
        _ => Err(RelmapError::InvalidFilter(format!(
            "{} expects an array of filters",
            key
        ))),
    }
}

fn text_entry(value: &Json) -> RelmapResult<FilterEntry> {
    let fields = value
        .get("$fields")
        .and_then(Json::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Json::as_str)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .ok_or_else(|| RelmapError::InvalidFilter("$text requires $fields".to_string()))?;
    let value = value
        .get("$value")
        .and_then(Json::as_str)
        .ok_or_else(|| RelmapError::InvalidFilter("$text requires a string $value".to_string()))?;
    Ok(FilterEntry::Text {
        fields,
        value: value.to_string(),
    })
}

impl From<Value> for FieldCondition {
    fn from(v: Value) -> Self {
        FieldCondition::Value(v)
    }
}

impl From<&str> for FieldCondition {
    fn from(v: &str) -> Self {
        FieldCondition::Value(v.into())
    }
}

impl From<String> for FieldCondition {
    fn from(v: String) -> Self {
        FieldCondition::Value(v.into())
    }
}

impl From<i64> for FieldCondition {
    fn from(v: i64) -> Self {
        FieldCondition::Value(v.into())
    }
}

impl From<i32> for FieldCondition {
    fn from(v: i32) -> Self {
        FieldCondition::Value(v.into())
    }
}

impl From<bool> for FieldCondition {
    fn from(v: bool) -> Self {
        FieldCondition::Value(v.into())
    }
}

impl From<Vec<Value>> for FieldCondition {
    fn from(v: Vec<Value>) -> Self {
        FieldCondition::List(v)
    }
}

impl From<Operator> for FieldCondition {
    fn from(op: Operator) -> Self {
        FieldCondition::Ops(vec![op])
    }
}

impl From<Vec<Operator>> for FieldCondition {
    fn from(ops: Vec<Operator>) -> Self {
        FieldCondition::Ops(ops)
    }
}

impl From<Filter> for FieldCondition {
    fn from(f: Filter) -> Self {
        FieldCondition::Relation(Box::new(f))
    }
}
