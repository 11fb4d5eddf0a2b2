//! Entity metadata: fields, identifiers, relations and lifecycle hooks.
//!
//! Declarations go into a [`SchemaRegistry`]; resolving an entity flattens
//! inheritance and infers join references once, producing an immutable
//! [`EntitySchema`].

pub mod builder;
pub mod registry;

pub use builder::EntityBuilder;
pub use registry::SchemaRegistry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{RelmapError, RelmapResult};
use crate::value::RawExpr;

/// Semantic type tag of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    #[default]
    String,
    Number,
    Boolean,
    Date,
    Json,
    Raw,
}

/// Value producer for lifecycle hooks (timestamps, UUIDs, ...).
#[derive(Clone)]
pub struct Generator(Arc<dyn Fn() -> serde_json::Value + Send + Sync>);

impl Generator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> serde_json::Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Current UTC time as an RFC 3339 string.
    pub fn now() -> Self {
        Self::new(|| serde_json::Value::String(chrono::Utc::now().to_rfc3339()))
    }

    /// Random v4 UUID as a string.
    pub fn uuid() -> Self {
        Self::new(|| serde_json::Value::String(uuid::Uuid::new_v4().to_string()))
    }

    /// Always the same value.
    pub fn constant(value: serde_json::Value) -> Self {
        Self::new(move || value.clone())
    }

    pub fn generate(&self) -> serde_json::Value {
        (self.0)()
    }
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Generator(..)")
    }
}

/// Declaration options for one field.
#[derive(Debug, Clone, Default)]
pub struct FieldOptions {
    pub column: Option<String>,
    pub kind: FieldKind,
    pub is_id: bool,
    pub on_insert: Option<Generator>,
    pub on_update: Option<Generator>,
    pub on_delete: Option<Generator>,
    /// Entity this scalar points at (foreign key).
    pub reference: Option<String>,
    /// Derived column computed by an expression instead of stored.
    pub virtual_expr: Option<RawExpr>,
}

impl FieldOptions {
    /// Options for an identifier field.
    pub fn id() -> Self {
        Self {
            is_id: true,
            kind: FieldKind::Number,
            ..Self::default()
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn on_insert(mut self, generator: Generator) -> Self {
        self.on_insert = Some(generator);
        self
    }

    pub fn on_update(mut self, generator: Generator) -> Self {
        self.on_update = Some(generator);
        self
    }

    pub fn on_delete(mut self, generator: Generator) -> Self {
        self.on_delete = Some(generator);
        self
    }

    pub fn reference(mut self, entity: impl Into<String>) -> Self {
        self.reference = Some(entity.into());
        self
    }

    pub fn virtual_expr(mut self, expr: RawExpr) -> Self {
        self.virtual_expr = Some(expr);
        self
    }
}

/// A resolved field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub column: String,
    pub kind: FieldKind,
    pub is_id: bool,
    pub on_insert: Option<Generator>,
    pub on_update: Option<Generator>,
    pub on_delete: Option<Generator>,
    pub reference: Option<String>,
    pub virtual_expr: Option<RawExpr>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, options: FieldOptions) -> Self {
        let name = name.into();
        Self {
            column: options.column.unwrap_or_else(|| name.clone()),
            name,
            kind: options.kind,
            is_id: options.is_id,
            on_insert: options.on_insert,
            on_update: options.on_update,
            on_delete: options.on_delete,
            reference: options.reference,
            virtual_expr: options.virtual_expr,
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.virtual_expr.is_some()
    }
}

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl Cardinality {
    /// Resolvable with a single-query JOIN.
    pub fn is_to_one(&self) -> bool {
        matches!(self, Cardinality::OneToOne | Cardinality::ManyToOne)
    }

    pub fn is_to_many(&self) -> bool {
        !self.is_to_one()
    }
}

/// Join key pair, both sides named by field.
///
/// `local` lives on the entity declaring the relation, `foreign` on the
/// target entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinReference {
    pub local: String,
    pub foreign: String,
}

impl JoinReference {
    pub fn new(local: impl Into<String>, foreign: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            foreign: foreign.into(),
        }
    }
}

/// Link entity of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Through {
    pub entity: String,
    /// Field on the link entity holding the source id.
    pub source_key: String,
    /// Field on the link entity holding the target id.
    pub target_key: String,
}

/// What deleting a parent does to rows holding the reverse reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    #[default]
    Ignore,
    Cascade,
    Nullify,
}

/// Declaration options for one relation.
#[derive(Debug, Clone)]
pub struct RelationOptions {
    pub cardinality: Cardinality,
    pub target: String,
    pub references: Vec<JoinReference>,
    pub through: Option<String>,
    /// `(source_key, target_key)` on the link entity.
    pub through_keys: Option<(String, String)>,
    pub mapped_by: Option<String>,
    pub on_delete: OnDelete,
}

impl RelationOptions {
    pub fn new(cardinality: Cardinality, target: impl Into<String>) -> Self {
        Self {
            cardinality,
            target: target.into(),
            references: Vec::new(),
            through: None,
            through_keys: None,
            mapped_by: None,
            on_delete: OnDelete::Ignore,
        }
    }

    pub fn one_to_one(target: impl Into<String>) -> Self {
        Self::new(Cardinality::OneToOne, target)
    }

    pub fn many_to_one(target: impl Into<String>) -> Self {
        Self::new(Cardinality::ManyToOne, target)
    }

    pub fn one_to_many(target: impl Into<String>) -> Self {
        Self::new(Cardinality::OneToMany, target)
    }

    pub fn many_to_many(target: impl Into<String>) -> Self {
        Self::new(Cardinality::ManyToMany, target)
    }

    pub fn references(mut self, local: impl Into<String>, foreign: impl Into<String>) -> Self {
        self.references.push(JoinReference::new(local, foreign));
        self
    }

    pub fn through(mut self, entity: impl Into<String>) -> Self {
        self.through = Some(entity.into());
        self
    }

    pub fn through_keys(mut self, source_key: impl Into<String>, target_key: impl Into<String>) -> Self {
        self.through_keys = Some((source_key.into(), target_key.into()));
        self
    }

    pub fn mapped_by(mut self, inverse: impl Into<String>) -> Self {
        self.mapped_by = Some(inverse.into());
        self
    }

    pub fn on_delete(mut self, on_delete: OnDelete) -> Self {
        self.on_delete = on_delete;
        self
    }
}

/// A resolved relation.
#[derive(Debug, Clone)]
pub struct RelationDef {
    pub name: String,
    pub cardinality: Cardinality,
    pub target: String,
    /// Empty when inference failed; such a relation cannot be joined.
    pub references: Vec<JoinReference>,
    pub through: Option<Through>,
    pub mapped_by: Option<String>,
    /// The declaring entity holds the foreign key (`local` is a fk column).
    pub owner: bool,
    pub on_delete: OnDelete,
}

impl RelationDef {
    pub fn is_resolved(&self) -> bool {
        match self.cardinality {
            Cardinality::ManyToMany => self.through.is_some(),
            _ => !self.references.is_empty(),
        }
    }

    pub fn reference(&self) -> Option<&JoinReference> {
        self.references.first()
    }
}

/// Normalized, immutable description of one entity.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: String,
    pub storage_name: String,
    pub id: String,
    pub fields: Vec<FieldDef>,
    pub relations: Vec<RelationDef>,
    pub soft_delete: Option<String>,
    field_index: HashMap<String, usize>,
    relation_index: HashMap<String, usize>,
}

impl EntitySchema {
    pub(crate) fn new(
        name: String,
        storage_name: String,
        id: String,
        fields: Vec<FieldDef>,
        relations: Vec<RelationDef>,
        soft_delete: Option<String>,
    ) -> Self {
        let field_index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        let relation_index = relations
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        Self {
            name,
            storage_name,
            id,
            fields,
            relations,
            soft_delete,
            field_index,
            relation_index,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.field_index.get(name).map(|&i| &self.fields[i])
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relation_index.get(name).map(|&i| &self.relations[i])
    }

    /// The relation, or `NotARelation`.
    pub fn require_relation(&self, name: &str) -> RelmapResult<&RelationDef> {
        self.relation(name)
            .ok_or_else(|| RelmapError::not_a_relation(&self.name, name))
    }

    /// The relation with usable join references, or an error naming it.
    pub fn joinable_relation(&self, name: &str) -> RelmapResult<&RelationDef> {
        let relation = self.require_relation(name)?;
        if !relation.is_resolved() {
            return Err(RelmapError::UnresolvedRelation {
                entity: self.name.clone(),
                relation: name.to_string(),
            });
        }
        Ok(relation)
    }

    pub fn id_field(&self) -> &FieldDef {
        // Registration guarantees the id field exists.
        &self.fields[self.field_index[&self.id]]
    }

    pub fn soft_delete_field(&self) -> Option<&FieldDef> {
        self.soft_delete.as_deref().and_then(|name| self.field(name))
    }

    /// Storage column for a field name, when the field is declared.
    pub fn column(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.column.as_str())
    }

    /// Stored (non-virtual) fields in declaration order.
    pub fn stored_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.is_virtual())
    }

    /// A payload key that maps onto a stored column of this entity.
    pub fn is_persistable(&self, key: &str) -> bool {
        self.field(key).is_some_and(|f| !f.is_virtual())
    }
}

/// Declaration options for the entity itself.
#[derive(Debug, Clone, Default)]
pub struct EntityOptions {
    pub storage_name: Option<String>,
    pub extends: Option<String>,
    pub soft_delete: bool,
}

pub(crate) fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub(crate) fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
