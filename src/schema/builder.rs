//! Fluent entity declaration.
//!
//! ```
//! use relmap::schema::{FieldOptions, RelationOptions, SchemaRegistry};
//!
//! let mut registry = SchemaRegistry::new();
//! registry
//!     .entity("Post")
//!     .table("posts")
//!     .id("id")
//!     .field("title", FieldOptions::default())
//!     .field("authorId", FieldOptions::default().reference("User"))
//!     .relation("author", RelationOptions::many_to_one("User"))
//!     .register()
//!     .unwrap();
//! assert!(registry.is_registered("Post"));
//! ```

use crate::error::RelmapResult;

use super::{EntityOptions, FieldOptions, RelationOptions, SchemaRegistry};

/// Collects one entity's declarations and registers them together.
pub struct EntityBuilder<'r> {
    registry: &'r mut SchemaRegistry,
    name: String,
    options: EntityOptions,
    fields: Vec<(String, FieldOptions)>,
    relations: Vec<(String, RelationOptions)>,
}

impl SchemaRegistry {
    /// Start declaring an entity.
    pub fn entity(&mut self, name: impl Into<String>) -> EntityBuilder<'_> {
        EntityBuilder {
            registry: self,
            name: name.into(),
            options: EntityOptions::default(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }
}

impl EntityBuilder<'_> {
    /// Storage (table) name; defaults to the entity name.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.options.storage_name = Some(name.into());
        self
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.options.extends = Some(parent.into());
        self
    }

    pub fn soft_delete(mut self) -> Self {
        self.options.soft_delete = true;
        self
    }

    /// Numeric id field.
    pub fn id(self, name: impl Into<String>) -> Self {
        self.id_with(name, FieldOptions::id())
    }

    /// Id field with custom options (column, generator, kind).
    pub fn id_with(mut self, name: impl Into<String>, options: FieldOptions) -> Self {
        self.fields.push((
            name.into(),
            FieldOptions {
                is_id: true,
                ..options
            },
        ));
        self
    }

    pub fn field(mut self, name: impl Into<String>, options: FieldOptions) -> Self {
        self.fields.push((name.into(), options));
        self
    }

    pub fn relation(mut self, name: impl Into<String>, options: RelationOptions) -> Self {
        self.relations.push((name.into(), options));
        self
    }

    pub fn register(self) -> RelmapResult<()> {
        let EntityBuilder {
            registry,
            name,
            options,
            fields,
            relations,
        } = self;
        for (field, opts) in fields {
            registry.register_field(&name, &field, opts)?;
        }
        for (relation, opts) in relations {
            registry.register_relation(&name, &relation, opts)?;
        }
        registry.register(&name, options)
    }
}
