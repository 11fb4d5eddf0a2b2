//! Projection trees. Populating relations is expressed inside the projection.

use serde_json::Value as Json;

use crate::error::{RelmapError, RelmapResult};
use crate::schema::EntitySchema;
use crate::value::RawExpr;

use super::{Filter, SortBy};

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Explicit, order-preserving list.
    List(Vec<ProjectItem>),
    /// Include/exclude flags and relation entries.
    Map(Vec<(String, ProjectEntry)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectItem {
    Field(String),
    Raw { expr: RawExpr, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectEntry {
    Include(bool),
    Relation(RelationQuery),
}

/// What to load for one relation: its own projection, filter and paging.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelationQuery {
    pub project: Option<Projection>,
    pub filter: Option<Filter>,
    /// INNER instead of LEFT join.
    pub required: bool,
    pub sort: Vec<SortBy>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl RelationQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(mut self, project: Projection) -> Self {
        self.project = Some(project);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn sort(mut self, sort: SortBy) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Decode `{ $project, $filter, $required, $sort, $skip, $limit }`, or a
    /// bare nested projection map.
    pub fn from_json(value: &Json) -> RelmapResult<Self> {
        let Json::Object(map) = value else {
            return Err(RelmapError::InvalidFilter(
                "a relation entry must be an object".to_string(),
            ));
        };
        if !map.keys().any(|k| k.starts_with('$')) {
            return Ok(Self::new().project(Projection::from_json(value)?));
        }
        let mut query = Self::new();
        for (key, v) in map {
            match key.as_str() {
                "$project" => query.project = Some(Projection::from_json(v)?),
                "$filter" => query.filter = Some(Filter::from_json(v)?),
                "$required" => query.required = v.as_bool().unwrap_or(false),
                "$sort" => query.sort = SortBy::from_json(v)?,
                "$skip" => query.skip = pager_value(key, v)?,
                "$limit" => query.limit = pager_value(key, v)?,
                other => return Err(RelmapError::UnknownOperator(other.to_string())),
            }
        }
        Ok(query)
    }
}

/// `$skip`/`$limit`: a non-negative integer, or null for none.
pub(crate) fn pager_value(key: &str, value: &Json) -> RelmapResult<Option<u64>> {
    if value.is_null() {
        return Ok(None);
    }
    value
        .as_u64()
        .map(Some)
        .ok_or_else(|| RelmapError::InvalidFilter(format!("{} must be a non-negative integer, got {}", key, value)))
}

impl Projection {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::List(fields.into_iter().map(|f| ProjectItem::Field(f.into())).collect())
    }

    pub fn map() -> Self {
        Projection::Map(Vec::new())
    }

    /// Append a raw column. A map projection becomes a list of its included
    /// names; relation entries stay listed by name and populate with defaults.
    pub fn with_raw(self, expr: RawExpr, alias: Option<&str>) -> Self {
        let item = ProjectItem::Raw {
            expr,
            alias: alias.map(str::to_string),
        };
        let mut items = match self {
            Projection::List(items) => items,
            Projection::Map(entries) => entries
                .into_iter()
                .filter_map(|(key, entry)| match entry {
                    ProjectEntry::Include(true) | ProjectEntry::Relation(_) => Some(ProjectItem::Field(key)),
                    ProjectEntry::Include(false) => None,
                })
                .collect(),
        };
        items.push(item);
        Projection::List(items)
    }

    fn with_entry(self, key: String, entry: ProjectEntry) -> Self {
        match self {
            Projection::Map(mut entries) => {
                entries.push((key, entry));
                Projection::Map(entries)
            }
            Projection::List(items) => {
                let mut entries: Vec<(String, ProjectEntry)> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        ProjectItem::Field(f) => Some((f, ProjectEntry::Include(true))),
                        ProjectItem::Raw { .. } => None,
                    })
                    .collect();
                entries.push((key, entry));
                Projection::Map(entries)
            }
        }
    }

    pub fn include(self, field: impl Into<String>) -> Self {
        self.with_entry(field.into(), ProjectEntry::Include(true))
    }

    pub fn exclude(self, field: impl Into<String>) -> Self {
        self.with_entry(field.into(), ProjectEntry::Include(false))
    }

    pub fn relation(self, name: impl Into<String>, query: RelationQuery) -> Self {
        self.with_entry(name.into(), ProjectEntry::Relation(query))
    }

    /// Relation entries in declaration order. Names listed or flagged `true`
    /// that are relations of `schema` populate with defaults.
    ///
    /// An object entry on a key that is not a relation is `NotARelation`.
    pub fn relations(&self, schema: &EntitySchema) -> RelmapResult<Vec<(String, RelationQuery)>> {
        match self {
            Projection::List(items) => Ok(items
                .iter()
                .filter_map(|item| match item {
                    ProjectItem::Field(name) if schema.relation(name).is_some() => {
                        Some((name.clone(), RelationQuery::new()))
                    }
                    _ => None,
                })
                .collect()),
            Projection::Map(entries) => {
                let mut out = Vec::new();
                for (key, entry) in entries {
                    match entry {
                        ProjectEntry::Relation(query) => {
                            schema.require_relation(key)?;
                            out.push((key.clone(), query.clone()));
                        }
                        ProjectEntry::Include(true) if schema.relation(key).is_some() => {
                            out.push((key.clone(), RelationQuery::new()));
                        }
                        ProjectEntry::Include(_) => {}
                    }
                }
                Ok(out)
            }
        }
    }

    /// Decode `['id', 'name']` or `{ name: true, password: false, author: {...} }`.
    pub fn from_json(value: &Json) -> RelmapResult<Self> {
        match value {
            Json::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(|s| ProjectItem::Field(s.to_string()))
                        .ok_or_else(|| {
                            RelmapError::InvalidFilter("projection lists hold field names".to_string())
                        })
                })
                .collect::<RelmapResult<Vec<_>>>()
                .map(Projection::List),
            Json::Object(map) => {
                let mut entries = Vec::with_capacity(map.len());
                for (key, v) in map {
                    let entry = match v {
                        Json::Bool(b) => ProjectEntry::Include(*b),
                        Json::Number(n) => ProjectEntry::Include(n.as_i64() != Some(0)),
                        Json::Object(_) => ProjectEntry::Relation(RelationQuery::from_json(v)?),
                        _ => {
                            return Err(RelmapError::InvalidFilter(format!(
                                "invalid projection entry for '{}'",
                                key
                            )));
                        }
                    };
                    entries.push((key.clone(), entry));
                }
                Ok(Projection::Map(entries))
            }
            _ => Err(RelmapError::InvalidFilter(
                "a projection must be an array or an object".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_list_and_map() {
        assert_eq!(
            Projection::from_json(&json!(["id", "name"])).unwrap(),
            Projection::fields(["id", "name"])
        );
        let p = Projection::from_json(&json!({
            "name": 1,
            "password": false,
            "author": {"$project": ["id"], "$required": true}
        }))
        .unwrap();
        assert_eq!(
            p,
            Projection::map().include("name").exclude("password").relation(
                "author",
                RelationQuery::new().project(Projection::fields(["id"])).required()
            )
        );
    }

    #[test]
    fn test_bare_nested_map_is_projection() {
        let q = RelationQuery::from_json(&json!({"picture": true})).unwrap();
        assert_eq!(q.project, Some(Projection::map().include("picture")));
    }

    #[test]
    fn test_raw_on_map_keeps_included_fields() {
        let p = Projection::map()
            .include("name")
            .exclude("password")
            .relation("author", RelationQuery::new())
            .with_raw(crate::value::raw("1"), Some("one"));
        let Projection::List(items) = p else {
            panic!("expected a list projection");
        };
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], ProjectItem::Field("name".into()));
        assert_eq!(items[1], ProjectItem::Field("author".into()));
        assert!(matches!(&items[2], ProjectItem::Raw { alias: Some(a), .. } if a == "one"));
    }

    #[test]
    fn test_pager_must_be_unsigned() {
        let err = RelationQuery::from_json(&json!({"$limit": "ten"})).unwrap_err();
        assert!(matches!(err, RelmapError::InvalidFilter(_)));
        let err = RelationQuery::from_json(&json!({"$skip": -1})).unwrap_err();
        assert!(matches!(err, RelmapError::InvalidFilter(_)));
        let q = RelationQuery::from_json(&json!({"$skip": 2, "$limit": 5})).unwrap();
        assert_eq!((q.skip, q.limit), (Some(2), Some(5)));
    }

    #[test]
    fn test_unknown_relation_key() {
        let err = RelationQuery::from_json(&json!({"$populate": {}})).unwrap_err();
        assert!(matches!(err, RelmapError::UnknownOperator(_)));
    }
}
