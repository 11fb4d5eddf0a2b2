//! Compiler test modules.
//!
//! Tests are organized by category:
//! - `core`: filters, SELECT, INSERT, UPDATE, DELETE
//! - `dialects`: placeholders, quoting, pagers and per-dialect operators
//! - `features`: joins, soft delete, relation filters, virtual fields, upsert

mod dialects;
mod features;

use serde_json::{Value as Json, json};

use crate::query::Query;
use crate::schema::{FieldKind, FieldOptions, Generator, RelationOptions, SchemaRegistry};
use crate::transpiler::{Compiler, Dialect, Statement};
use crate::value::{Record, raw_fn};

/// Shared model: users, posts, comments, items with units and tags.
pub(super) fn registry() -> SchemaRegistry {
    let mut reg = SchemaRegistry::new();
    reg.entity("User")
        .id("id")
        .field("name", FieldOptions::default())
        .field("status", FieldOptions::default().kind(FieldKind::Number))
        .register()
        .unwrap();
    reg.entity("Post")
        .id("id")
        .field("title", FieldOptions::default())
        .field("body", FieldOptions::default())
        .field("authorId", FieldOptions::default().reference("User"))
        .field(
            "commentCount",
            FieldOptions::default().virtual_expr(raw_fn(|ctx| {
                format!("SELECT COUNT(*) FROM Comment WHERE Comment.postId = {}", ctx.column("id"))
            })),
        )
        .relation("author", RelationOptions::many_to_one("User"))
        .relation("comments", RelationOptions::one_to_many("Comment"))
        .register()
        .unwrap();
    reg.entity("Comment")
        .id("id")
        .field("body", FieldOptions::default())
        .field("postId", FieldOptions::default().reference("Post"))
        .relation("post", RelationOptions::many_to_one("Post"))
        .register()
        .unwrap();
    reg.entity("MeasureUnit")
        .soft_delete()
        .id("id")
        .field("name", FieldOptions::default())
        .field(
            "deletedAt",
            FieldOptions::default()
                .kind(FieldKind::Date)
                .on_delete(Generator::constant(json!(99))),
        )
        .register()
        .unwrap();
    reg.entity("Item")
        .id("id")
        .field("name", FieldOptions::default())
        .field("unitId", FieldOptions::default().reference("MeasureUnit"))
        .relation("unit", RelationOptions::many_to_one("MeasureUnit"))
        .relation("tags", RelationOptions::many_to_many("Tag").through("ItemTag"))
        .register()
        .unwrap();
    reg.entity("Tag")
        .id("id")
        .field("name", FieldOptions::default().column("tag_name"))
        .register()
        .unwrap();
    reg.entity("ItemTag")
        .id("id")
        .field("itemId", FieldOptions::default().reference("Item"))
        .field("tagId", FieldOptions::default().reference("Tag"))
        .register()
        .unwrap();
    reg
}

pub(super) fn record(value: Json) -> Record {
    match value {
        Json::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

/// Compile a soft-delete aware find.
pub(super) fn find(dialect: Dialect, entity: &str, query: Query) -> Statement {
    let reg = registry();
    Compiler::new(&reg, dialect).find(entity, &query, true).unwrap()
}

pub(super) fn find_json(dialect: Dialect, entity: &str, query: Json) -> Statement {
    find(dialect, entity, Query::from_json(&query).unwrap())
}
