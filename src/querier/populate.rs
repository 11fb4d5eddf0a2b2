//! Find with to-many population.
//!
//! To-one relations arrive joined in the main query. Each to-many relation
//! costs one extra query for all parents at once, whose rows are grouped back
//! onto their parents by key.

use std::collections::{HashMap, HashSet};

use futures::future::{BoxFuture, FutureExt, try_join_all};
use serde_json::Value as Json;

use crate::connection::Connection;
use crate::error::{RelmapError, RelmapResult};
use crate::query::{Query, RelationQuery};
use crate::schema::{Cardinality, EntitySchema, RelationDef};
use crate::transpiler::dml::select::{
    LINK_KEY, LinkJoin, SelectOptions, added_parent_keys, build_select_with, ensure_selected, in_filter,
};
use crate::unflatten::unflatten_rows;
use crate::value::{Record, Value};

use super::{Querier, key_of};

/// Children of one relation, keyed by the parent value they belong to.
struct Population {
    name: String,
    parent_key: String,
    groups: HashMap<String, Vec<Record>>,
}

impl Population {
    fn empty(name: &str, parent_key: &str) -> Self {
        Self {
            name: name.to_string(),
            parent_key: parent_key.to_string(),
            groups: HashMap::new(),
        }
    }

    /// Every parent gets an array, empty when nothing matched.
    fn attach(self, rows: &mut [Record]) {
        for row in rows.iter_mut() {
            let children = row
                .get(&self.parent_key)
                .and_then(|key| self.groups.get(&key_of(key)))
                .cloned()
                .unwrap_or_default();
            row.insert(
                self.name.clone(),
                Json::Array(children.into_iter().map(Json::Object).collect()),
            );
        }
    }
}

/// Distinct non-null values of `field` across `rows`, in first-seen order.
fn distinct_keys(rows: &[Record], field: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(field))
        .filter(|key| !key.is_null() && seen.insert(key_of(key)))
        .map(Value::from)
        .collect()
}

impl<C: Connection> Querier<C> {
    pub(super) fn find_rows<'a>(
        &'a self,
        entity: &'a str,
        query: Query,
        link: Option<LinkJoin>,
        soft_delete: bool,
    ) -> BoxFuture<'a, RelmapResult<Vec<Record>>> {
        async move {
            let compiler = self.compiler();
            let schema = compiler.schema(entity)?;
            let statement = build_select_with(&compiler, entity, &query, &SelectOptions { soft_delete, link })?;
            let mut rows = unflatten_rows(self.query(&statement).await?);

            let relations = match &query.project {
                Some(project) => project.relations(&schema)?,
                None => Vec::new(),
            };
            let mut tasks = Vec::new();
            for (name, relation_query) in &relations {
                let relation = schema.joinable_relation(name)?;
                if relation.cardinality.is_to_many() {
                    tasks.push(self.populate(&schema, relation, relation_query, &rows, soft_delete));
                }
            }
            let populated = try_join_all(tasks).await?;
            for population in populated {
                population.attach(&mut rows);
            }

            let added = added_parent_keys(&schema, query.project.as_ref())?;
            if !added.is_empty() {
                for row in rows.iter_mut() {
                    for key in &added {
                        row.shift_remove(key);
                    }
                }
            }
            Ok(rows)
        }
        .boxed()
    }

    fn populate<'s>(
        &'s self,
        schema: &'s EntitySchema,
        relation: &'s RelationDef,
        relation_query: &'s RelationQuery,
        rows: &'s [Record],
        soft_delete: bool,
    ) -> BoxFuture<'s, RelmapResult<Population>> {
        async move {
            let unresolved = || RelmapError::UnresolvedRelation {
                entity: schema.name.clone(),
                relation: relation.name.clone(),
            };

            if let (Some(through), Cardinality::ManyToMany) = (&relation.through, relation.cardinality) {
                let mut population = Population::empty(&relation.name, &schema.id);
                let parent_ids = distinct_keys(rows, &schema.id);
                if parent_ids.is_empty() {
                    return Ok(population);
                }
                let query = Query {
                    filter: relation_query.filter.clone().unwrap_or_default(),
                    project: relation_query.project.clone(),
                    sort: relation_query.sort.clone(),
                    skip: relation_query.skip,
                    limit: relation_query.limit,
                    ..Query::default()
                };
                let link = LinkJoin {
                    entity: through.entity.clone(),
                    source_key: through.source_key.clone(),
                    target_key: through.target_key.clone(),
                    parent_ids,
                };
                let children = self.find_rows(&relation.target, query, Some(link), soft_delete).await?;
                for mut child in children {
                    if let Some(key) = child.shift_remove(LINK_KEY) {
                        population.groups.entry(key_of(&key)).or_default().push(child);
                    }
                }
                return Ok(population);
            }

            let reference = relation.reference().ok_or_else(unresolved)?;
            let mut population = Population::empty(&relation.name, &reference.local);
            let keys = distinct_keys(rows, &reference.local);
            if keys.is_empty() {
                return Ok(population);
            }

            let target = self.compiler().schema(&relation.target)?;
            let mut filter = in_filter(&reference.foreign, keys);
            if let Some(extra) = &relation_query.filter {
                filter = filter.and(vec![extra.clone()]);
            }
            let (project, added) = ensure_selected(&target, relation_query.project.clone(), &reference.foreign);
            let query = Query {
                filter,
                project,
                sort: relation_query.sort.clone(),
                skip: relation_query.skip,
                limit: relation_query.limit,
                ..Query::default()
            };
            let children = self.find_rows(&relation.target, query, None, soft_delete).await?;
            for mut child in children {
                let key = if added {
                    child.shift_remove(&reference.foreign)
                } else {
                    child.get(&reference.foreign).cloned()
                };
                if let Some(key) = key {
                    population.groups.entry(key_of(&key)).or_default().push(child);
                }
            }
            Ok(population)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(value: Json) -> Record {
        match value {
            Json::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_distinct_keys_skip_nulls_and_repeats() {
        let rows = vec![
            record(json!({"id": 1})),
            record(json!({"id": null})),
            record(json!({"id": 1})),
            record(json!({"id": 2})),
        ];
        assert_eq!(distinct_keys(&rows, "id"), vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_attach_gives_every_parent_an_array() {
        let mut rows = vec![record(json!({"id": 1})), record(json!({"id": 2}))];
        let mut population = Population::empty("items", "id");
        population
            .groups
            .insert(key_of(&json!(1)), vec![record(json!({"id": 10}))]);
        population.attach(&mut rows);
        assert_eq!(Json::Object(rows[0].clone()), json!({"id": 1, "items": [{"id": 10}]}));
        assert_eq!(Json::Object(rows[1].clone()), json!({"id": 2, "items": []}));
    }
}
