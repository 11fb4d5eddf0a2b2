//! Joins, soft delete, relation filters, virtual fields and upsert.

use pretty_assertions::assert_eq;
use serde_json::{Value as Json, json};

use super::{find, find_json, record, registry};
use crate::error::RelmapError;
use crate::query::{Filter, Operator, Projection, Query, RelationQuery, SortBy};
use crate::schema::{FieldOptions, Generator, RelationOptions, SchemaRegistry};
use crate::transpiler::dml::select::{LinkJoin, SelectOptions, added_parent_keys, build_columns, build_select_with};
use crate::transpiler::{Compiler, DeleteOptions, Dialect};
use crate::unflatten::unflatten;
use crate::value::{Value, raw};

const AUTHOR_COLUMNS: &str =
    "\"author\".id AS \"author.id\", \"author\".name AS \"author.name\", \"author\".status AS \"author.status\"";

#[test]
fn test_many_to_one_join() {
    let query = Query::new()
        .filter(Filter::new().field("title", "x"))
        .project(Projection::fields(["title", "author"]));
    let stmt = find(Dialect::SQLite, "Post", query);
    assert_eq!(
        stmt.sql,
        format!(
            "SELECT Post.title, {} FROM Post LEFT JOIN \"User\" \"author\" ON \"author\".id = Post.authorId WHERE Post.title = ?",
            AUTHOR_COLUMNS
        )
    );
    assert_eq!(stmt.values, vec![Value::Text("x".into())]);
}

#[test]
fn test_sort_by_joined_field() {
    let query = Query::new()
        .project(Projection::fields(["title", "author"]))
        .sort(SortBy::asc("author.name"));
    let stmt = find(Dialect::SQLite, "Post", query);
    assert_eq!(
        stmt.sql,
        format!(
            "SELECT Post.title, {} FROM Post LEFT JOIN \"User\" \"author\" ON \"author\".id = Post.authorId ORDER BY \"author\".name",
            AUTHOR_COLUMNS
        )
    );
}

#[test]
fn test_three_level_join_aliases() {
    let query = Query::new().project(
        Projection::map().include("body").relation(
            "post",
            RelationQuery::new()
                .project(Projection::fields(["title", "author"]))
                .required(),
        ),
    );
    let stmt = find(Dialect::SQLite, "Comment", query);
    assert_eq!(
        stmt.sql,
        "SELECT Comment.body, \"post\".title AS \"post.title\", \
         \"post.author\".id AS \"post.author.id\", \"post.author\".name AS \"post.author.name\", \
         \"post.author\".status AS \"post.author.status\" \
         FROM Comment \
         INNER JOIN Post \"post\" ON \"post\".id = Comment.postId \
         LEFT JOIN \"User\" \"post.author\" ON \"post.author\".id = \"post\".authorId"
    );

    // Rows come back keyed by those aliases.
    let row = record(json!({
        "body": "c",
        "post.title": "t",
        "post.author.id": 1,
        "post.author.name": "n",
        "post.author.status": null
    }));
    assert_eq!(
        Json::Object(unflatten(row)),
        json!({"body": "c", "post": {"title": "t", "author": {"id": 1, "name": "n", "status": null}}})
    );
}

#[test]
fn test_join_filter_and_soft_delete_guard() {
    let query = Query::new().project(
        Projection::map()
            .include("name")
            .relation("unit", RelationQuery::new().filter(Filter::new().field("name", "kg"))),
    );
    let stmt = find(Dialect::SQLite, "Item", query);
    assert_eq!(
        stmt.sql,
        "SELECT Item.name, \"unit\".id AS \"unit.id\", \"unit\".name AS \"unit.name\", \
         \"unit\".deletedAt AS \"unit.deletedAt\" FROM Item \
         LEFT JOIN MeasureUnit \"unit\" ON \"unit\".id = Item.unitId AND \"unit\".name = ? AND \"unit\".deletedAt IS NULL"
    );
    assert_eq!(stmt.values, vec![Value::Text("kg".into())]);
}

#[test]
fn test_join_without_soft_delete_awareness() {
    let reg = registry();
    let query = Query::new().project(Projection::fields(["name", "unit"]));
    let stmt = Compiler::new(&reg, Dialect::SQLite).find("Item", &query, false).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT Item.name, \"unit\".id AS \"unit.id\", \"unit\".name AS \"unit.name\", \
         \"unit\".deletedAt AS \"unit.deletedAt\" FROM Item \
         LEFT JOIN MeasureUnit \"unit\" ON \"unit\".id = Item.unitId"
    );
}

#[test]
fn test_to_many_projection_selects_parent_key() {
    let stmt = find(Dialect::SQLite, "Post", Query::new().project(Projection::fields(["title", "comments"])));
    assert_eq!(stmt.sql, "SELECT title, id FROM Post");
}

#[test]
fn test_projecting_a_non_relation_entry() {
    let reg = registry();
    let query = Query::new().project(Projection::map().relation("title", RelationQuery::new()));
    let err = Compiler::new(&reg, Dialect::SQLite).find("Post", &query, true).unwrap_err();
    assert!(matches!(err, RelmapError::NotARelation { relation, .. } if relation == "title"));
}

#[test]
fn test_unresolved_relation_fails_only_when_used() {
    let mut reg = SchemaRegistry::new();
    reg.entity("User")
        .id("id")
        .field("name", FieldOptions::default())
        .register()
        .unwrap();
    reg.entity("Orphan")
        .id("id")
        .field("label", FieldOptions::default())
        .relation("owner", RelationOptions::many_to_one("User"))
        .register()
        .unwrap();
    let compiler = Compiler::new(&reg, Dialect::SQLite);

    let plain = compiler.find("Orphan", &Query::new(), true).unwrap();
    assert_eq!(plain.sql, "SELECT id, label FROM Orphan");

    let query = Query::new().project(Projection::fields(["owner"]));
    let err = compiler.find("Orphan", &query, true).unwrap_err();
    assert!(matches!(err, RelmapError::UnresolvedRelation { relation, .. } if relation == "owner"));
}

#[test]
fn test_virtual_field_uses_current_prefix() {
    let stmt = find(Dialect::SQLite, "Post", Query::new().project(Projection::fields(["id", "commentCount"])));
    assert_eq!(
        stmt.sql,
        "SELECT id, (SELECT COUNT(*) FROM Comment WHERE Comment.postId = \"id\") AS commentCount FROM Post"
    );

    let stmt = find(
        Dialect::SQLite,
        "Post",
        Query::new().project(Projection::fields(["commentCount", "author"])),
    );
    assert_eq!(
        stmt.sql,
        format!(
            "SELECT (SELECT COUNT(*) FROM Comment WHERE Comment.postId = Post.\"id\") AS commentCount, {} \
             FROM Post LEFT JOIN \"User\" \"author\" ON \"author\".id = Post.authorId",
            AUTHOR_COLUMNS
        )
    );
}

#[test]
fn test_build_columns_single_level() {
    let reg = registry();
    let compiler = Compiler::new(&reg, Dialect::SQLite);
    let user = compiler.schema("User").unwrap();
    let project = Projection::fields(["id", "name"]);

    assert_eq!(build_columns(&compiler, &user, Some(&project), None, None), "id, name");
    assert_eq!(
        build_columns(&compiler, &user, Some(&project), Some("\"author\""), Some("author")),
        "\"author\".id AS \"author.id\", \"author\".name AS \"author.name\""
    );
    assert_eq!(
        build_columns(&compiler, &user, None, Some("\"User\""), None),
        "\"User\".id, \"User\".name, \"User\".status"
    );
    let excluded = Projection::map().exclude("status");
    assert_eq!(build_columns(&compiler, &user, Some(&excluded), None, None), "id, name");
}

#[test]
fn test_to_many_adds_unselected_parent_key() {
    let reg = registry();
    let compiler = Compiler::new(&reg, Dialect::SQLite);
    let post = compiler.schema("Post").unwrap();

    let project = Projection::fields(["title", "comments"]);
    assert_eq!(added_parent_keys(&post, Some(&project)).unwrap(), vec!["id".to_string()]);

    let project = Projection::fields(["id", "title", "comments"]);
    assert!(added_parent_keys(&post, Some(&project)).unwrap().is_empty());
    assert!(added_parent_keys(&post, None).unwrap().is_empty());
}

#[test]
fn test_soft_delete_guard_on_find() {
    assert_eq!(
        find(Dialect::SQLite, "MeasureUnit", Query::new()).sql,
        "SELECT id, name, deletedAt FROM MeasureUnit WHERE deletedAt IS NULL"
    );
    assert_eq!(
        find_json(Dialect::SQLite, "MeasureUnit", json!({"$filter": {"name": "kg"}})).sql,
        "SELECT id, name, deletedAt FROM MeasureUnit WHERE name = ? AND deletedAt IS NULL"
    );
    // An explicit constraint on the soft-delete field wins.
    assert_eq!(
        find_json(
            Dialect::SQLite,
            "MeasureUnit",
            json!({"$filter": {"deletedAt": {"$ne": null}}})
        )
        .sql,
        "SELECT id, name, deletedAt FROM MeasureUnit WHERE deletedAt IS NOT NULL"
    );

    let reg = registry();
    let unaware = Compiler::new(&reg, Dialect::SQLite)
        .find("MeasureUnit", &Query::new(), false)
        .unwrap();
    assert_eq!(unaware.sql, "SELECT id, name, deletedAt FROM MeasureUnit");
}

#[test]
fn test_having_is_never_guarded() {
    let query = Query::new()
        .project(Projection::fields(["name"]).with_raw(raw("COUNT(*)"), Some("total")))
        .group(["name"])
        .having(Filter::new().field("total", Operator::Gt(Value::Int(1))));
    let stmt = find(Dialect::SQLite, "MeasureUnit", query);
    assert_eq!(
        stmt.sql,
        "SELECT name, COUNT(*) AS total FROM MeasureUnit WHERE deletedAt IS NULL GROUP BY name HAVING \"total\" > ?"
    );
}

#[test]
fn test_soft_delete_is_idempotent() {
    let reg = registry();
    let compiler = Compiler::new(&reg, Dialect::SQLite);
    let first = compiler
        .delete("MeasureUnit", &Filter::by_id(1), DeleteOptions::default())
        .unwrap();
    let second = compiler
        .delete("MeasureUnit", &Filter::by_id(1), DeleteOptions::soft())
        .unwrap();
    assert_eq!(
        first.sql,
        "UPDATE MeasureUnit SET deletedAt = ? WHERE id = ? AND deletedAt IS NULL"
    );
    assert_eq!(first.values, vec![Value::Int(99), Value::Int(1)]);
    assert_eq!(second, first);
}

#[test]
fn test_soft_delete_guard_even_when_constrained() {
    let reg = registry();
    let filter = Filter::new().field("deletedAt", Operator::Ne(Value::Null));
    let stmt = Compiler::new(&reg, Dialect::SQLite)
        .delete("MeasureUnit", &filter, DeleteOptions::default())
        .unwrap();
    assert_eq!(
        stmt.sql,
        "UPDATE MeasureUnit SET deletedAt = ? WHERE deletedAt IS NOT NULL AND deletedAt IS NULL"
    );
}

#[test]
fn test_hard_delete_override() {
    let reg = registry();
    let stmt = Compiler::new(&reg, Dialect::SQLite)
        .delete("MeasureUnit", &Filter::by_id(1), DeleteOptions::hard())
        .unwrap();
    assert_eq!(stmt.sql, "DELETE FROM MeasureUnit WHERE id = ?");
}

#[test]
fn test_forced_soft_delete_without_support() {
    let reg = registry();
    let err = Compiler::new(&reg, Dialect::SQLite)
        .delete("Post", &Filter::by_id(1), DeleteOptions::soft())
        .unwrap_err();
    assert!(matches!(err, RelmapError::SoftDeleteNotSupported(entity) if entity == "Post"));
}

#[test]
fn test_update_skips_soft_deleted_rows() {
    let reg = registry();
    let stmt = Compiler::new(&reg, Dialect::SQLite)
        .update("MeasureUnit", &Filter::by_id(1), &record(json!({"name": "g"})), true)
        .unwrap();
    assert_eq!(
        stmt.sql,
        "UPDATE MeasureUnit SET name = ? WHERE id = ? AND deletedAt IS NULL"
    );
}

#[test]
fn test_relation_filters() {
    assert_eq!(
        find_json(
            Dialect::SQLite,
            "Post",
            json!({"$filter": {"author": {"name": "x"}}, "$project": ["id"]})
        )
        .sql,
        "SELECT id FROM Post WHERE authorId IN (SELECT id FROM \"User\" WHERE name = ?)"
    );
    assert_eq!(
        find_json(
            Dialect::SQLite,
            "Post",
            json!({"$filter": {"comments": {"body": "hi"}}, "$project": ["id"]})
        )
        .sql,
        "SELECT id FROM Post WHERE id IN (SELECT postId FROM Comment WHERE body = ?)"
    );
    assert_eq!(
        find_json(
            Dialect::SQLite,
            "Item",
            json!({"$filter": {"tags": {"name": "rust"}}, "$project": ["id"]})
        )
        .sql,
        "SELECT id FROM Item WHERE id IN (SELECT itemId FROM ItemTag WHERE tagId IN (SELECT id FROM Tag WHERE tag_name = ?))"
    );
    assert_eq!(
        find_json(
            Dialect::SQLite,
            "Item",
            json!({"$filter": {"unit": {"name": "kg"}}, "$project": ["id"]})
        )
        .sql,
        "SELECT id FROM Item WHERE unitId IN (SELECT id FROM MeasureUnit WHERE name = ? AND deletedAt IS NULL)"
    );
}

#[test]
fn test_nested_filter_on_plain_field() {
    let reg = registry();
    let query = Query::from_json(&json!({"$filter": {"title": {"a": 1}}})).unwrap();
    let err = Compiler::new(&reg, Dialect::SQLite).find("Post", &query, true).unwrap_err();
    assert!(matches!(err, RelmapError::NotARelation { relation, .. } if relation == "title"));
}

#[test]
fn test_link_join_select() {
    let reg = registry();
    let compiler = Compiler::new(&reg, Dialect::SQLite);
    let options = SelectOptions {
        soft_delete: true,
        link: Some(LinkJoin {
            entity: "ItemTag".to_string(),
            source_key: "itemId".to_string(),
            target_key: "tagId".to_string(),
            parent_ids: vec![Value::Int(1), Value::Int(2)],
        }),
    };
    let stmt = build_select_with(&compiler, "Tag", &Query::new(), &options).unwrap();
    assert_eq!(
        stmt.sql,
        "SELECT Tag.id, Tag.tag_name AS name, ItemTag.itemId AS \"__link\" FROM Tag \
         INNER JOIN ItemTag ON ItemTag.tagId = Tag.id WHERE ItemTag.itemId IN (?, ?)"
    );
    assert_eq!(stmt.values, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn test_upsert_per_dialect() {
    let reg = registry();
    let payload = record(json!({"name": "a", "status": 1}));

    let sqlite = Compiler::new(&reg, Dialect::SQLite)
        .upsert("User", &["name"], &payload)
        .unwrap();
    assert_eq!(
        sqlite.sql,
        "INSERT INTO \"User\" (name, status) VALUES (?, ?) ON CONFLICT (name) DO UPDATE SET status = EXCLUDED.status"
    );

    let pg = Compiler::new(&reg, Dialect::Postgres)
        .upsert("User", &["name"], &payload)
        .unwrap();
    assert_eq!(
        pg.sql,
        "INSERT INTO \"User\" (name, status) VALUES ($1, $2) ON CONFLICT (name) DO UPDATE SET status = EXCLUDED.status RETURNING id"
    );

    let mysql = Compiler::new(&reg, Dialect::MySQL)
        .upsert("User", &["name"], &payload)
        .unwrap();
    assert_eq!(
        mysql.sql,
        "INSERT INTO `User` (name, status) VALUES (?, ?) ON DUPLICATE KEY UPDATE status = VALUES(status)"
    );
}

#[test]
fn test_upsert_only_conflict_columns() {
    let reg = registry();
    let stmt = Compiler::new(&reg, Dialect::Postgres)
        .upsert("User", &["name"], &record(json!({"name": "a"})))
        .unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO \"User\" (name) VALUES ($1) ON CONFLICT (name) DO NOTHING RETURNING id"
    );

    let err = Compiler::new(&reg, Dialect::Postgres)
        .upsert("User", &[], &record(json!({"name": "a"})))
        .unwrap_err();
    assert!(matches!(err, RelmapError::InvalidFilter(_)));
}

#[test]
fn test_upsert_reapplies_on_update() {
    let mut reg = SchemaRegistry::new();
    reg.entity("Setting")
        .id("id")
        .field("name", FieldOptions::default())
        .field("value", FieldOptions::default())
        .field(
            "updatedAt",
            FieldOptions::default().on_update(Generator::constant(json!(5))),
        )
        .register()
        .unwrap();
    let stmt = Compiler::new(&reg, Dialect::Postgres)
        .upsert("Setting", &["name"], &record(json!({"name": "a", "value": "v"})))
        .unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO Setting (name, value) VALUES ($1, $2) ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value, updatedAt = $3 RETURNING id"
    );
    assert_eq!(
        stmt.values,
        vec![Value::Text("a".into()), Value::Text("v".into()), Value::Int(5)]
    );
}

#[test]
fn test_upsert_keeps_insert_only_defaults() {
    let mut reg = SchemaRegistry::new();
    reg.entity("Setting")
        .id("id")
        .field("name", FieldOptions::default())
        .field(
            "createdAt",
            FieldOptions::default().on_insert(Generator::constant(json!("2024-01-01"))),
        )
        .field(
            "updatedAt",
            FieldOptions::default()
                .on_insert(Generator::constant(json!(1)))
                .on_update(Generator::constant(json!(2))),
        )
        .register()
        .unwrap();
    let compiler = Compiler::new(&reg, Dialect::Postgres);

    let stmt = compiler
        .upsert("Setting", &["name"], &record(json!({"name": "a"})))
        .unwrap();
    assert_eq!(
        stmt.sql,
        "INSERT INTO Setting (name, createdAt, updatedAt) VALUES ($1, $2, $3) ON CONFLICT (name) DO UPDATE SET updatedAt = $4 RETURNING id"
    );
    assert_eq!(
        stmt.values,
        vec![
            Value::Text("a".into()),
            Value::Text("2024-01-01".into()),
            Value::Int(1),
            Value::Int(2)
        ]
    );

    // A supplied value is still overwritten on conflict.
    let stmt = compiler
        .upsert("Setting", &["name"], &record(json!({"name": "a", "createdAt": "2020"})))
        .unwrap();
    assert!(stmt.sql.contains("DO UPDATE SET createdAt = EXCLUDED.createdAt, updatedAt = $4"));
}

#[test]
fn test_insert_runs_on_insert_generators() {
    let mut reg = SchemaRegistry::new();
    reg.entity("Event")
        .id("id")
        .field("label", FieldOptions::default())
        .field(
            "createdAt",
            FieldOptions::default().on_insert(Generator::constant(json!("2024-01-01"))),
        )
        .register()
        .unwrap();
    let compiler = Compiler::new(&reg, Dialect::SQLite);

    let stmt = compiler.insert("Event", &[record(json!({"label": "x"}))]).unwrap();
    assert_eq!(stmt.sql, "INSERT INTO Event (label, createdAt) VALUES (?, ?)");
    assert_eq!(
        stmt.values,
        vec![Value::Text("x".into()), Value::Text("2024-01-01".into())]
    );

    // Supplied values are kept.
    let stmt = compiler
        .insert("Event", &[record(json!({"label": "x", "createdAt": "2020"}))])
        .unwrap();
    assert_eq!(stmt.values[1], Value::Text("2020".into()));
}
