//! Relation cascades for insert, update and delete.
//!
//! Sibling relations of one record run concurrently; the steps of a single
//! relation (insert targets, then link them) run in order.

use futures::future::{BoxFuture, FutureExt, try_join_all};
use serde_json::Value as Json;

use crate::connection::Connection;
use crate::error::{RelmapError, RelmapResult};
use crate::query::{Filter, Projection, Query};
use crate::schema::{Cardinality, EntitySchema, JoinReference, OnDelete, RelationDef};
use crate::transpiler::dml::insert::with_insert_defaults;
use crate::transpiler::dml::update::has_updates;
use crate::transpiler::{DeleteOptions, InsertIdStrategy};
use crate::value::{Record, Value};

use super::Querier;

fn reference_of<'r>(schema: &EntitySchema, relation: &'r RelationDef) -> RelmapResult<&'r JoinReference> {
    relation
        .reference()
        .ok_or_else(|| RelmapError::UnresolvedRelation {
            entity: schema.name.clone(),
            relation: relation.name.clone(),
        })
}

fn present(value: Option<&Json>) -> Option<Json> {
    value.filter(|v| !v.is_null()).cloned()
}

/// `field IN (values)` over JSON keys.
fn keys_filter(field: &str, keys: &[Json]) -> Filter {
    Filter::new().field(field, keys.iter().map(Value::from).collect::<Vec<_>>())
}

/// Relations whose rows an update payload replaces.
fn replaced_by(relation: &RelationDef) -> bool {
    match relation.cardinality {
        Cardinality::ManyToOne => false,
        Cardinality::OneToOne => !relation.owner,
        Cardinality::OneToMany | Cardinality::ManyToMany => true,
    }
}

impl<C: Connection> Querier<C> {
    pub(super) fn insert_rows<'a>(
        &'a self,
        entity: &'a str,
        bodies: Vec<Record>,
    ) -> BoxFuture<'a, RelmapResult<Vec<Json>>> {
        async move {
            if bodies.is_empty() {
                return Ok(Vec::new());
            }
            let compiler = self.compiler();
            let schema = compiler.schema(entity)?;
            let mut rows: Vec<Record> = bodies
                .iter()
                .map(|body| with_insert_defaults(&schema, body))
                .collect();

            // Owning one-to-one: the child must exist before the parent points at it.
            for relation in schema
                .relations
                .iter()
                .filter(|r| r.cardinality == Cardinality::OneToOne && r.owner)
            {
                for row in rows.iter_mut() {
                    let Some(Json::Object(child)) = row.get(&relation.name).cloned() else {
                        continue;
                    };
                    let reference = reference_of(&schema, relation)?;
                    let key = match present(child.get(&reference.foreign)) {
                        Some(key) => key,
                        None => self
                            .insert_rows(&relation.target, vec![child])
                            .await?
                            .into_iter()
                            .next()
                            .unwrap_or(Json::Null),
                    };
                    row.insert(reference.local.clone(), key);
                }
            }

            let statement = compiler.insert(entity, &rows)?;
            let ids: Vec<Json> = match compiler.generator().insert_id_strategy() {
                InsertIdStrategy::Returning => {
                    let returned = self.query(&statement).await?;
                    rows.iter()
                        .enumerate()
                        .map(|(i, row)| {
                            present(returned.get(i).and_then(|r| r.get(&schema.id)))
                                .or_else(|| present(row.get(&schema.id)))
                                .unwrap_or(Json::Null)
                        })
                        .collect()
                }
                strategy => {
                    let outcome = self.run(&statement).await?;
                    let count = rows.len() as i64;
                    let first = outcome.insert_id.map(|id| match strategy {
                        InsertIdStrategy::LastOfBatch => id - (count - 1),
                        _ => id,
                    });
                    rows.iter()
                        .enumerate()
                        .map(|(i, row)| {
                            present(row.get(&schema.id))
                                .or_else(|| first.map(|f| Json::from(f + i as i64)))
                                .unwrap_or(Json::Null)
                        })
                        .collect()
                }
            };

            let mut tasks = Vec::new();
            for (row, id) in rows.iter().zip(&ids) {
                for relation in &schema.relations {
                    if let Some(value) = row.get(&relation.name) {
                        tasks.push(self.insert_relation(&schema, relation, row, id, value));
                    }
                }
            }
            try_join_all(tasks).await?;
            Ok(ids)
        }
        .boxed()
    }

    fn insert_relation<'s>(
        &'s self,
        schema: &'s EntitySchema,
        relation: &'s RelationDef,
        row: &'s Record,
        id: &'s Json,
        value: &'s Json,
    ) -> BoxFuture<'s, RelmapResult<()>> {
        async move {
            if !replaced_by(relation) || value.is_null() {
                return Ok(());
            }
            schema.joinable_relation(&relation.name)?;
            match relation.cardinality {
                Cardinality::ManyToMany => {
                    if let Json::Array(items) = value {
                        self.link_targets(schema, relation, id, items).await?;
                    }
                }
                _ => {
                    let reference = reference_of(schema, relation)?;
                    let key = parent_key(schema, reference, row, id);
                    let children: Vec<Record> = match value {
                        Json::Object(child) => vec![child.clone()],
                        Json::Array(items) => items.iter().filter_map(Json::as_object).cloned().collect(),
                        _ => Vec::new(),
                    };
                    let children = children
                        .into_iter()
                        .map(|mut child| {
                            child.insert(reference.foreign.clone(), key.clone());
                            child
                        })
                        .collect();
                    self.insert_rows(&relation.target, children).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// Insert targets without an id, then one link row per target.
    async fn link_targets(
        &self,
        schema: &EntitySchema,
        relation: &RelationDef,
        parent_id: &Json,
        items: &[Json],
    ) -> RelmapResult<()> {
        let through = relation
            .through
            .as_ref()
            .ok_or_else(|| RelmapError::UnresolvedRelation {
                entity: schema.name.clone(),
                relation: relation.name.clone(),
            })?;
        let target = self.compiler().schema(&relation.target)?;

        let fresh: Vec<Record> = items
            .iter()
            .filter_map(Json::as_object)
            .filter(|obj| present(obj.get(&target.id)).is_none())
            .cloned()
            .collect();
        let mut created = self.insert_rows(&relation.target, fresh).await?.into_iter();

        let mut links = Vec::with_capacity(items.len());
        for item in items {
            let target_id = match item {
                Json::Null => continue,
                Json::Object(obj) => match present(obj.get(&target.id)) {
                    Some(id) => id,
                    None => created.next().unwrap_or(Json::Null),
                },
                // A bare scalar links an existing target by id.
                scalar => scalar.clone(),
            };
            let mut link = Record::new();
            link.insert(through.source_key.clone(), parent_id.clone());
            link.insert(through.target_key.clone(), target_id);
            links.push(link);
        }
        self.insert_rows(&through.entity, links).await?;
        Ok(())
    }

    pub(super) fn update_rows<'a>(
        &'a self,
        entity: &'a str,
        filter: &'a Filter,
        body: &'a Record,
        known_ids: Option<Vec<Json>>,
    ) -> BoxFuture<'a, RelmapResult<u64>> {
        async move {
            let compiler = self.compiler();
            let schema = compiler.schema(entity)?;
            let mut payload = body.clone();

            let replaced: Vec<&RelationDef> = schema
                .relations
                .iter()
                .filter(|r| body.contains_key(&r.name) && replaced_by(r))
                .collect();
            for relation in &replaced {
                schema.joinable_relation(&relation.name)?;
            }

            // Owning one-to-one: point the parent at the updated or new child.
            for relation in schema
                .relations
                .iter()
                .filter(|r| r.cardinality == Cardinality::OneToOne && r.owner)
            {
                let Some(value) = body.get(&relation.name) else {
                    continue;
                };
                let reference = reference_of(&schema, relation)?;
                let key = match value {
                    Json::Null => Json::Null,
                    Json::Object(child) => match present(child.get(&reference.foreign)) {
                        Some(key) => {
                            let mut child = child.clone();
                            child.shift_remove(&reference.foreign);
                            let by_key = Filter::new().field(reference.foreign.clone(), Value::from(&key));
                            self.update_rows(&relation.target, &by_key, &child, Some(vec![key.clone()]))
                                .await?;
                            key
                        }
                        None => self
                            .insert_rows(&relation.target, vec![child.clone()])
                            .await?
                            .into_iter()
                            .next()
                            .unwrap_or(Json::Null),
                    },
                    _ => continue,
                };
                payload.insert(reference.local.clone(), key);
            }

            let ids = match (replaced.is_empty(), known_ids) {
                (true, _) => Vec::new(),
                (false, Some(ids)) => ids,
                (false, None) => self.select_keys(&schema, filter, vec![schema.id.clone()], true).await?
                    .iter()
                    .filter_map(|row| present(row.get(&schema.id)))
                    .collect(),
            };

            let affected = if has_updates(&schema, &payload) {
                let statement = compiler.update(entity, filter, &payload, true)?;
                self.run(&statement).await?.affected
            } else {
                0
            };

            let mut tasks = Vec::new();
            for id in &ids {
                for relation in &replaced {
                    if let Some(value) = body.get(&relation.name) {
                        tasks.push(self.replace_relation(&schema, relation, id, value));
                    }
                }
            }
            try_join_all(tasks).await?;
            Ok(affected)
        }
        .boxed()
    }

    /// Replace the rows of one relation of one parent.
    fn replace_relation<'s>(
        &'s self,
        schema: &'s EntitySchema,
        relation: &'s RelationDef,
        id: &'s Json,
        value: &'s Json,
    ) -> BoxFuture<'s, RelmapResult<()>> {
        async move {
            let compiler = self.compiler();
            if let (Some(through), Cardinality::ManyToMany) = (&relation.through, relation.cardinality) {
                let links = keys_filter(&through.source_key, std::slice::from_ref(id));
                self.run(&compiler.delete(&through.entity, &links, DeleteOptions::hard())?)
                    .await?;
                if let Json::Array(items) = value {
                    self.link_targets(schema, relation, id, items).await?;
                }
                return Ok(());
            }

            let reference = reference_of(schema, relation)?;
            let owned = keys_filter(&reference.foreign, std::slice::from_ref(id));
            let stamp = |child: &Record| {
                let mut child = child.clone();
                child.insert(reference.foreign.clone(), id.clone());
                child
            };

            match value {
                Json::Object(child) if relation.cardinality == Cardinality::OneToOne => {
                    let target = compiler.schema(&relation.target)?;
                    match present(child.get(&target.id)) {
                        Some(child_id) => {
                            let mut child = stamp(child);
                            child.shift_remove(&target.id);
                            let by_id = Filter::by_id(Value::from(&child_id));
                            self.update_rows(&relation.target, &by_id, &child, Some(vec![child_id]))
                                .await?;
                        }
                        None => {
                            self.run(&compiler.delete(&relation.target, &owned, DeleteOptions::default())?)
                                .await?;
                            self.insert_rows(&relation.target, vec![stamp(child)]).await?;
                        }
                    }
                }
                Json::Array(items) => {
                    self.run(&compiler.delete(&relation.target, &owned, DeleteOptions::default())?)
                        .await?;
                    let children = items.iter().filter_map(Json::as_object).map(stamp).collect();
                    self.insert_rows(&relation.target, children).await?;
                }
                _ => {
                    self.run(&compiler.delete(&relation.target, &owned, DeleteOptions::default())?)
                        .await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    pub(super) fn delete_rows<'a>(
        &'a self,
        entity: &'a str,
        filter: &'a Filter,
        options: DeleteOptions,
    ) -> BoxFuture<'a, RelmapResult<u64>> {
        async move {
            let compiler = self.compiler();
            let schema = compiler.schema(entity)?;
            if options.soft_delete == Some(true) && schema.soft_delete.is_none() {
                return Err(RelmapError::SoftDeleteNotSupported(schema.name.clone()));
            }
            let soft = schema.soft_delete.is_some() && options.soft_delete != Some(false);

            let reverse: Vec<&RelationDef> = schema
                .relations
                .iter()
                .filter(|r| r.on_delete != OnDelete::Ignore && replaced_by(r))
                .collect();
            let mut key_fields = vec![schema.id.clone()];
            for relation in &reverse {
                if let (Some(reference), None) = (relation.reference(), &relation.through) {
                    if !key_fields.contains(&reference.local) {
                        key_fields.push(reference.local.clone());
                    }
                }
            }

            let rows = self.select_keys(&schema, filter, key_fields, soft).await?;
            let ids: Vec<Json> = rows.iter().filter_map(|row| present(row.get(&schema.id))).collect();
            if ids.is_empty() {
                return Ok(0);
            }

            let statement = compiler.delete(entity, &keys_filter(&schema.id, &ids), options)?;
            let affected = self.run(&statement).await?.affected;

            let tasks: Vec<_> = reverse
                .iter()
                .map(|relation| self.cascade_delete(&schema, relation, &rows, options))
                .collect();
            try_join_all(tasks).await?;
            Ok(affected)
        }
        .boxed()
    }

    fn cascade_delete<'s>(
        &'s self,
        schema: &'s EntitySchema,
        relation: &'s RelationDef,
        rows: &'s [Record],
        options: DeleteOptions,
    ) -> BoxFuture<'s, RelmapResult<()>> {
        async move {
            let compiler = self.compiler();
            if let (Some(through), Cardinality::ManyToMany) = (&relation.through, relation.cardinality) {
                let ids: Vec<Json> = rows.iter().filter_map(|row| present(row.get(&schema.id))).collect();
                let links = keys_filter(&through.source_key, &ids);
                self.run(&compiler.delete(&through.entity, &links, DeleteOptions::hard())?)
                    .await?;
                return Ok(());
            }

            let reference = reference_of(schema, relation)?;
            let keys: Vec<Json> = rows
                .iter()
                .filter_map(|row| present(row.get(&reference.local)))
                .collect();
            if keys.is_empty() {
                return Ok(());
            }
            let owned = keys_filter(&reference.foreign, &keys);
            match relation.on_delete {
                OnDelete::Cascade => {
                    // Only a forced hard delete carries over to children.
                    let child_options = DeleteOptions {
                        soft_delete: options.soft_delete.filter(|soft| !soft),
                    };
                    self.delete_rows(&relation.target, &owned, child_options).await?;
                }
                OnDelete::Nullify => {
                    let mut payload = Record::new();
                    payload.insert(reference.foreign.clone(), Json::Null);
                    self.run(&compiler.update(&relation.target, &owned, &payload, false)?)
                        .await?;
                }
                OnDelete::Ignore => {}
            }
            Ok(())
        }
        .boxed()
    }

    /// `SELECT <fields>` of the rows matched by `filter`.
    async fn select_keys(
        &self,
        schema: &EntitySchema,
        filter: &Filter,
        fields: Vec<String>,
        soft_delete: bool,
    ) -> RelmapResult<Vec<Record>> {
        let query = Query {
            filter: filter.clone(),
            project: Some(Projection::fields(fields)),
            ..Query::default()
        };
        self.find_rows(&schema.name, query, None, soft_delete).await
    }
}

/// Value of the parent side of `reference`.
fn parent_key(schema: &EntitySchema, reference: &JoinReference, row: &Record, id: &Json) -> Json {
    if reference.local == schema.id {
        id.clone()
    } else {
        row.get(&reference.local).cloned().unwrap_or(Json::Null)
    }
}
