//! SQL dialect tests (Postgres, MySQL, MariaDB, SQLite).

use pretty_assertions::assert_eq;
use serde_json::json;

use super::{find_json, record, registry};
use crate::query::Filter;
use crate::transpiler::{Compiler, Dialect};
use crate::value::Value;

#[test]
fn test_placeholders_and_quoting() {
    let query = json!({"$filter": {"name": "a", "status": 1}, "$project": ["id"]});
    assert_eq!(
        find_json(Dialect::Postgres, "User", query.clone()).sql,
        "SELECT id FROM \"User\" WHERE name = $1 AND status = $2"
    );
    assert_eq!(
        find_json(Dialect::MySQL, "User", query.clone()).sql,
        "SELECT id FROM `User` WHERE name = ? AND status = ?"
    );
    assert_eq!(
        find_json(Dialect::MariaDB, "User", query.clone()).sql,
        "SELECT id FROM `User` WHERE name = ? AND status = ?"
    );
    assert_eq!(
        find_json(Dialect::SQLite, "User", query).sql,
        "SELECT id FROM \"User\" WHERE name = ? AND status = ?"
    );
}

#[test]
fn test_postgres_numbering_spans_set_and_where() {
    let reg = registry();
    let stmt = Compiler::new(&reg, Dialect::Postgres)
        .update("Post", &Filter::by_id(9), &record(json!({"title": "t", "body": "b"})), true)
        .unwrap();
    assert_eq!(stmt.sql, "UPDATE Post SET title = $1, body = $2 WHERE id = $3");
}

#[test]
fn test_skip_without_limit() {
    let query = json!({"$project": ["id"], "$skip": 5});
    assert_eq!(
        find_json(Dialect::SQLite, "Post", query.clone()).sql,
        "SELECT id FROM Post LIMIT -1 OFFSET 5"
    );
    assert_eq!(
        find_json(Dialect::Postgres, "Post", query.clone()).sql,
        "SELECT id FROM Post OFFSET 5"
    );
    assert_eq!(
        find_json(Dialect::MySQL, "Post", query).sql,
        "SELECT id FROM Post LIMIT 18446744073709551615 OFFSET 5"
    );
}

#[test]
fn test_case_insensitive_includes() {
    let query = json!({"$filter": {"name": {"$iincludes": "AB"}}, "$project": ["id"]});

    let pg = find_json(Dialect::Postgres, "User", query.clone());
    assert_eq!(pg.sql, "SELECT id FROM \"User\" WHERE name ILIKE $1");
    assert_eq!(pg.values, vec![Value::Text("%AB%".into())]);

    let mysql = find_json(Dialect::MySQL, "User", query.clone());
    assert_eq!(mysql.sql, "SELECT id FROM `User` WHERE LOWER(name) LIKE ?");
    assert_eq!(mysql.values, vec![Value::Text("%ab%".into())]);

    let sqlite = find_json(Dialect::SQLite, "User", query);
    assert_eq!(sqlite.sql, "SELECT id FROM \"User\" WHERE LOWER(name) LIKE ? ESCAPE '\\'");
    assert_eq!(sqlite.values, vec![Value::Text("%ab%".into())]);
}

#[test]
fn test_sqlite_like_escape() {
    let stmt = find_json(
        Dialect::SQLite,
        "User",
        json!({"$filter": {"name": {"$startsWith": "a"}}, "$project": ["id"]}),
    );
    assert_eq!(stmt.sql, "SELECT id FROM \"User\" WHERE name LIKE ? ESCAPE '\\'");
}

#[test]
fn test_regex() {
    let query = json!({"$filter": {"name": {"$regex": "^a"}}, "$project": ["id"]});
    assert_eq!(
        find_json(Dialect::Postgres, "User", query.clone()).sql,
        "SELECT id FROM \"User\" WHERE name ~ $1"
    );
    assert_eq!(
        find_json(Dialect::MySQL, "User", query).sql,
        "SELECT id FROM `User` WHERE name REGEXP ?"
    );
}

#[test]
fn test_text_search() {
    let query = json!({
        "$filter": {"$text": {"$fields": ["title", "body"], "$value": "rust"}},
        "$project": ["id"]
    });

    let pg = find_json(Dialect::Postgres, "Post", query.clone());
    assert_eq!(
        pg.sql,
        "SELECT id FROM Post WHERE to_tsvector(title || ' ' || body) @@ to_tsquery($1)"
    );
    assert_eq!(pg.values, vec![Value::Text("rust".into())]);

    assert_eq!(
        find_json(Dialect::MySQL, "Post", query.clone()).sql,
        "SELECT id FROM Post WHERE MATCH(title, body) AGAINST(?)"
    );
    assert_eq!(
        find_json(Dialect::SQLite, "Post", query).sql,
        "SELECT id FROM Post WHERE Post MATCH ?"
    );
}

#[test]
fn test_insert_id_rendering() {
    let reg = registry();
    let rows = [record(json!({"name": "a"}))];

    let pg = Compiler::new(&reg, Dialect::Postgres).insert("User", &rows).unwrap();
    assert_eq!(pg.sql, "INSERT INTO \"User\" (name) VALUES ($1) RETURNING id");

    let mariadb = Compiler::new(&reg, Dialect::MariaDB).insert("User", &rows).unwrap();
    assert_eq!(mariadb.sql, "INSERT INTO `User` (name) VALUES (?) RETURNING id");

    let mysql = Compiler::new(&reg, Dialect::MySQL).insert("User", &rows).unwrap();
    assert_eq!(mysql.sql, "INSERT INTO `User` (name) VALUES (?)");
}

#[test]
fn test_insert_default_values() {
    let reg = registry();
    let rows = [record(json!({}))];
    assert_eq!(
        Compiler::new(&reg, Dialect::Postgres).insert("User", &rows).unwrap().sql,
        "INSERT INTO \"User\" DEFAULT VALUES RETURNING id"
    );
    assert_eq!(
        Compiler::new(&reg, Dialect::SQLite).insert("User", &rows).unwrap().sql,
        "INSERT INTO \"User\" DEFAULT VALUES"
    );
    assert_eq!(
        Compiler::new(&reg, Dialect::MySQL).insert("User", &rows).unwrap().sql,
        "INSERT INTO `User` () VALUES ()"
    );
}

#[test]
fn test_transaction_statements() {
    let reg = registry();
    let pg = Compiler::new(&reg, Dialect::Postgres);
    assert_eq!(pg.begin_transaction().sql, "BEGIN TRANSACTION");
    assert_eq!(pg.commit_transaction().sql, "COMMIT");
    assert_eq!(pg.rollback_transaction().sql, "ROLLBACK");

    let mysql = Compiler::new(&reg, Dialect::MySQL);
    assert_eq!(mysql.begin_transaction().sql, "START TRANSACTION");
    assert!(mysql.begin_transaction().values.is_empty());
}

#[test]
fn test_dialect_from_url_and_name() {
    assert_eq!(Dialect::from_url("postgres://localhost/db"), Some(Dialect::Postgres));
    assert_eq!(Dialect::from_url("mysql://root@localhost/db"), Some(Dialect::MySQL));
    assert_eq!(Dialect::from_url("sqlite::memory:"), Some(Dialect::SQLite));
    assert_eq!(Dialect::from_url("oracle://db"), None);
    assert_eq!("MariaDB".parse::<Dialect>().unwrap(), Dialect::MariaDB);
    assert!("db2".parse::<Dialect>().is_err());
    assert_eq!(Dialect::SQLite.to_string(), "sqlite");
}
