//! Schema registry: declarations in, resolved [`EntitySchema`]s out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use crate::error::{RelmapError, RelmapResult};

use super::{
    Cardinality, EntityOptions, EntitySchema, FieldDef, FieldOptions, JoinReference, RelationDef,
    RelationOptions, Through, capitalize, lower_first,
};

/// Holds every registered entity. Populated at startup, read afterwards.
///
/// Resolution is lazy and memoized per entity; once an entity is resolved
/// further declarations for it are rejected.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entries: HashMap<String, Declaration>,
}

#[derive(Debug, Default)]
struct Declaration {
    options: Option<EntityOptions>,
    fields: Vec<FieldDef>,
    relations: Vec<(String, RelationOptions)>,
    resolved: OnceLock<Arc<EntitySchema>>,
}

/// Inheritance-flattened declarations, before reference inference.
#[derive(Debug)]
struct Flat {
    storage_name: String,
    id: String,
    fields: Vec<FieldDef>,
    relations: Vec<(String, RelationOptions)>,
    soft_delete: Option<String>,
}

impl Flat {
    fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn relation(&self, name: &str) -> Option<&RelationOptions> {
        self.relations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
    }

    /// The single field declaring a reference to `entity`.
    fn unique_reference_to(&self, entity: &str) -> Option<&FieldDef> {
        let mut it = self
            .fields
            .iter()
            .filter(|f| f.reference.as_deref() == Some(entity));
        match (it.next(), it.next()) {
            (Some(f), None) => Some(f),
            _ => None,
        }
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn declaration_mut(&mut self, entity: &str) -> RelmapResult<&mut Declaration> {
        let decl = self.entries.entry(entity.to_string()).or_default();
        if decl.resolved.get().is_some() {
            return Err(RelmapError::invalid_entity(
                entity,
                "entity is already resolved and can no longer change",
            ));
        }
        Ok(decl)
    }

    /// Declare a field. A later declaration with the same name replaces it.
    pub fn register_field(
        &mut self,
        entity: &str,
        field: &str,
        options: FieldOptions,
    ) -> RelmapResult<()> {
        let decl = self.declaration_mut(entity)?;
        let def = FieldDef::new(field, options);
        match decl.fields.iter_mut().find(|f| f.name == field) {
            Some(existing) => *existing = def,
            None => decl.fields.push(def),
        }
        Ok(())
    }

    /// Declare a relation. A later declaration with the same name replaces it.
    pub fn register_relation(
        &mut self,
        entity: &str,
        relation: &str,
        options: RelationOptions,
    ) -> RelmapResult<()> {
        let decl = self.declaration_mut(entity)?;
        match decl.relations.iter_mut().find(|(n, _)| n == relation) {
            Some(existing) => existing.1 = options,
            None => decl.relations.push((relation.to_string(), options)),
        }
        Ok(())
    }

    /// Register the entity itself, validating its declared fields.
    ///
    /// Fails with `InvalidEntityDeclaration` when the entity (with its
    /// ancestors) has no fields, no id field, or more than one id field of
    /// its own.
    pub fn register(&mut self, entity: &str, options: EntityOptions) -> RelmapResult<()> {
        if let Some(parent) = &options.extends {
            let registered = self
                .entries
                .get(parent)
                .is_some_and(|d| d.options.is_some());
            if !registered {
                return Err(RelmapError::NotAnEntity(parent.clone()));
            }
        }

        let decl = self.declaration_mut(entity)?;
        let own_ids = decl.fields.iter().filter(|f| f.is_id).count();
        if own_ids > 1 {
            return Err(RelmapError::invalid_entity(
                entity,
                "more than one id field declared",
            ));
        }
        decl.options = Some(options);

        // Validate against the flattened view so subtypes may inherit.
        let result = self.flatten(entity).map(|_| ());
        if result.is_err() {
            if let Some(decl) = self.entries.get_mut(entity) {
                decl.options = None;
            }
        }
        result
    }

    pub fn is_registered(&self, entity: &str) -> bool {
        self.entries
            .get(entity)
            .is_some_and(|d| d.options.is_some())
    }

    /// Registered entity names, in no particular order.
    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, d)| d.options.is_some())
            .map(|(n, _)| n.as_str())
    }

    /// Resolve an entity: flatten inheritance, infer join references.
    ///
    /// The result is computed once and shared afterwards.
    pub fn resolve(&self, entity: &str) -> RelmapResult<Arc<EntitySchema>> {
        let decl = self
            .entries
            .get(entity)
            .filter(|d| d.options.is_some())
            .ok_or_else(|| RelmapError::NotAnEntity(entity.to_string()))?;

        if let Some(schema) = decl.resolved.get() {
            return Ok(schema.clone());
        }

        let flat = self.flatten(entity)?;
        let relations = flat
            .relations
            .iter()
            .map(|(name, options)| self.resolve_relation(entity, &flat, name, options))
            .collect();

        let schema = Arc::new(EntitySchema::new(
            entity.to_string(),
            flat.storage_name,
            flat.id,
            flat.fields,
            relations,
            flat.soft_delete,
        ));
        tracing::debug!(
            "Resolved entity '{}' ({} fields, {} relations)",
            entity,
            schema.fields.len(),
            schema.relations.len()
        );

        // A concurrent resolver may have won; both computed the same thing.
        let _ = decl.resolved.set(schema);
        decl.resolved
            .get()
            .cloned()
            .ok_or_else(|| RelmapError::NotAnEntity(entity.to_string()))
    }

    /// Merge the entity's declarations over its ancestors'.
    fn flatten(&self, entity: &str) -> RelmapResult<Flat> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(entity.to_string());
        while let Some(name) = current {
            if !seen.insert(name.clone()) {
                return Err(RelmapError::invalid_entity(entity, "inheritance cycle"));
            }
            let decl = self
                .entries
                .get(&name)
                .filter(|d| d.options.is_some())
                .ok_or_else(|| RelmapError::NotAnEntity(name.clone()))?;
            current = decl.options.as_ref().and_then(|o| o.extends.clone());
            chain.push((name, decl));
        }

        let mut fields: Vec<FieldDef> = Vec::new();
        let mut relations: Vec<(String, RelationOptions)> = Vec::new();
        let mut id = None;
        let mut soft_delete_enabled = false;

        // Root ancestor first; nearer declarations overwrite.
        for (_, decl) in chain.iter().rev() {
            if let Some(own_id) = decl.fields.iter().find(|f| f.is_id) {
                for f in fields.iter_mut() {
                    f.is_id = false;
                }
                id = Some(own_id.name.clone());
            }
            for f in &decl.fields {
                match fields.iter_mut().find(|e| e.name == f.name) {
                    Some(existing) => *existing = f.clone(),
                    None => fields.push(f.clone()),
                }
            }
            for (name, r) in &decl.relations {
                match relations.iter_mut().find(|(n, _)| n == name) {
                    Some(existing) => existing.1 = r.clone(),
                    None => relations.push((name.clone(), r.clone())),
                }
            }
            if decl.options.as_ref().is_some_and(|o| o.soft_delete) {
                soft_delete_enabled = true;
            }
        }

        if fields.is_empty() {
            return Err(RelmapError::invalid_entity(entity, "no fields declared"));
        }
        let id = id.ok_or_else(|| RelmapError::invalid_entity(entity, "no id field declared"))?;

        let soft_delete = if soft_delete_enabled {
            let field = fields.iter().find(|f| f.on_delete.is_some()).ok_or_else(|| {
                RelmapError::invalid_entity(
                    entity,
                    "soft delete requires a field with an on_delete generator",
                )
            })?;
            Some(field.name.clone())
        } else {
            None
        };

        let storage_name = chain
            .first()
            .and_then(|(_, d)| d.options.as_ref())
            .and_then(|o| o.storage_name.clone())
            .unwrap_or_else(|| entity.to_string());

        Ok(Flat {
            storage_name,
            id,
            fields,
            relations,
            soft_delete,
        })
    }

    fn resolve_relation(
        &self,
        entity: &str,
        source: &Flat,
        name: &str,
        options: &RelationOptions,
    ) -> RelationDef {
        let mut def = RelationDef {
            name: name.to_string(),
            cardinality: options.cardinality,
            target: options.target.clone(),
            references: options.references.clone(),
            through: None,
            mapped_by: options.mapped_by.clone(),
            owner: false,
            on_delete: options.on_delete,
        };

        let target = match self.flatten(&options.target) {
            Ok(target) => target,
            Err(_) => {
                tracing::warn!(
                    "Relation '{}.{}' targets unregistered entity '{}'",
                    entity,
                    name,
                    options.target
                );
                def.references.clear();
                return def;
            }
        };

        match options.cardinality {
            Cardinality::ManyToOne => {
                if def.references.is_empty() {
                    if let Some(fk) = infer_owned_key(source, name, &options.target, &target) {
                        def.references.push(JoinReference::new(fk, target.id.clone()));
                    }
                }
                def.owner = true;
            }
            Cardinality::OneToOne if options.mapped_by.is_none() => {
                if let Some(r) = def.references.first() {
                    def.owner = r.local != source.id;
                } else if let Some(fk) = infer_owned_key(source, name, &options.target, &target) {
                    def.references.push(JoinReference::new(fk, target.id.clone()));
                    def.owner = true;
                } else if let Some(fk) = infer_inverse_key(entity, source, &target, None) {
                    def.references.push(JoinReference::new(source.id.clone(), fk));
                }
            }
            Cardinality::OneToOne | Cardinality::OneToMany => {
                if def.references.is_empty() {
                    let inverse = options.mapped_by.as_deref();
                    if let Some(fk) = infer_inverse_key(entity, source, &target, inverse) {
                        def.references.push(JoinReference::new(source.id.clone(), fk));
                    }
                }
            }
            Cardinality::ManyToMany => {
                def.through = self.resolve_through(entity, source, name, options, &target);
            }
        }

        if !def.is_resolved() {
            tracing::warn!(
                "Could not infer join references for relation '{}.{}'; it cannot be populated",
                entity,
                name
            );
        }
        def
    }

    fn resolve_through(
        &self,
        entity: &str,
        source: &Flat,
        name: &str,
        options: &RelationOptions,
        target: &Flat,
    ) -> Option<Through> {
        // The inverse side borrows the owner's link entity with keys swapped.
        let inverse = options
            .mapped_by
            .as_deref()
            .and_then(|m| target.relation(m));
        let through_entity = options
            .through
            .clone()
            .or_else(|| inverse.and_then(|r| r.through.clone()))?;
        let through = match self.flatten(&through_entity) {
            Ok(flat) => flat,
            Err(_) => {
                tracing::warn!(
                    "Relation '{}.{}' links through unregistered entity '{}'",
                    entity,
                    name,
                    through_entity
                );
                return None;
            }
        };

        let keys = options.through_keys.clone().or_else(|| {
            inverse
                .and_then(|r| r.through_keys.clone())
                .map(|(s, t)| (t, s))
        });
        let (source_key, target_key) = match keys {
            Some(keys) => keys,
            None => (
                infer_link_key(&through, entity, &source.id)?,
                infer_link_key(&through, &options.target, &target.id)?,
            ),
        };
        Some(Through {
            entity: through_entity,
            source_key,
            target_key,
        })
    }
}

/// Foreign key held by the declaring entity: `<relation><TargetId>` or the
/// unique field referencing the target.
fn infer_owned_key(source: &Flat, relation: &str, target_name: &str, target: &Flat) -> Option<String> {
    let by_convention = format!("{}{}", relation, capitalize(&target.id));
    if source.field(&by_convention).is_some() {
        return Some(by_convention);
    }
    source
        .unique_reference_to(target_name)
        .map(|f| f.name.clone())
}

/// Foreign key held by the target entity, pointing back at `source`.
fn infer_inverse_key(
    source_name: &str,
    source: &Flat,
    target: &Flat,
    mapped_by: Option<&str>,
) -> Option<String> {
    let id_suffix = capitalize(&source.id);
    if let Some(inverse) = mapped_by {
        if let Some(r) = target.relation(inverse).and_then(|r| r.references.first()) {
            return Some(r.local.clone());
        }
        let by_convention = format!("{}{}", inverse, id_suffix);
        if target.field(&by_convention).is_some() {
            return Some(by_convention);
        }
    }
    let by_entity_name = format!("{}{}", lower_first(source_name), id_suffix);
    if target.field(&by_entity_name).is_some() {
        return Some(by_entity_name);
    }
    target
        .unique_reference_to(source_name)
        .map(|f| f.name.clone())
}

/// Key on a link entity pointing at `entity`.
fn infer_link_key(through: &Flat, entity: &str, id: &str) -> Option<String> {
    if let Some(f) = through.unique_reference_to(entity) {
        return Some(f.name.clone());
    }
    let by_convention = format!("{}{}", lower_first(entity), capitalize(id));
    through.field(&by_convention).map(|f| f.name.clone())
}
