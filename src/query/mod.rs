//! Caller-supplied query trees.
//!
//! Built either with the fluent constructors or decoded from the dynamic
//! JSON shape (`{ $filter, $project, $sort, $skip, $limit, $group, $having }`).

pub mod filter;
pub mod projection;

pub use filter::{FieldCondition, Filter, FilterEntry, Operator};
pub use projection::{ProjectEntry, ProjectItem, Projection, RelationQuery};

use serde_json::Value as Json;

use crate::error::{RelmapError, RelmapResult};

use projection::pager_value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY term. Keys may be dotted relation paths (`author.name`).
#[derive(Debug, Clone, PartialEq)]
pub struct SortBy {
    pub key: String,
    pub direction: Direction,
}

impl SortBy {
    pub fn asc(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            direction: Direction::Desc,
        }
    }

    /// `{ name: 1, createdAt: -1 }` or `{ name: 'asc', createdAt: 'desc' }`.
    pub fn from_json(value: &Json) -> RelmapResult<Vec<Self>> {
        let Json::Object(map) = value else {
            return Err(RelmapError::InvalidFilter("$sort expects an object".to_string()));
        };
        map.iter()
            .map(|(key, dir)| {
                let direction = match dir {
                    Json::Number(n) if n.as_i64() == Some(-1) => Direction::Desc,
                    Json::Number(_) => Direction::Asc,
                    Json::String(s) if s.eq_ignore_ascii_case("desc") => Direction::Desc,
                    Json::String(s) if s.eq_ignore_ascii_case("asc") => Direction::Asc,
                    _ => {
                        return Err(RelmapError::InvalidFilter(format!(
                            "invalid sort direction for '{}'",
                            key
                        )));
                    }
                };
                Ok(SortBy {
                    key: key.clone(),
                    direction,
                })
            })
            .collect()
    }
}

/// A full read query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub filter: Filter,
    pub project: Option<Projection>,
    pub sort: Vec<SortBy>,
    pub group: Vec<String>,
    pub having: Option<Filter>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn project(mut self, project: Projection) -> Self {
        self.project = Some(project);
        self
    }

    pub fn sort(mut self, sort: SortBy) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn group<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn having(mut self, having: Filter) -> Self {
        self.having = Some(having);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Decode the dynamic query document.
    pub fn from_json(value: &Json) -> RelmapResult<Self> {
        let Json::Object(map) = value else {
            return Err(RelmapError::InvalidFilter("a query must be an object".to_string()));
        };
        let mut query = Query::new();
        for (key, v) in map {
            match key.as_str() {
                "$filter" => query.filter = Filter::from_json(v)?,
                "$project" => query.project = Some(Projection::from_json(v)?),
                "$sort" => query.sort = SortBy::from_json(v)?,
                "$group" => {
                    query.group = v
                        .as_array()
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(Json::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .ok_or_else(|| RelmapError::InvalidFilter("$group expects an array".to_string()))?
                }
                "$having" => query.having = Some(Filter::from_json(v)?),
                "$skip" => query.skip = pager_value(key, v)?,
                "$limit" => query.limit = pager_value(key, v)?,
                other => return Err(RelmapError::UnknownOperator(other.to_string())),
            }
        }
        Ok(query)
    }
}
