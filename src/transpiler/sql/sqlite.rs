use super::super::traits::{InsertIdStrategy, SqlGenerator};

pub struct SqliteGenerator;

impl SqlGenerator for SqliteGenerator {
    fn quote_identifier(&self, id: &str) -> String {
        format!("\"{}\"", id.replace('"', "\"\""))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    // last_insert_rowid() reports the last row of a batch.
    fn insert_id_strategy(&self) -> InsertIdStrategy {
        InsertIdStrategy::LastOfBatch
    }

    // SQLite has no default LIKE escape character.
    fn like_escape(&self) -> &'static str {
        " ESCAPE '\\'"
    }

    fn text_search(&self, table: &str, _columns: &[String], placeholder: &str) -> String {
        // FTS virtual tables match against the whole table.
        format!("{} MATCH {}", table, placeholder)
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        match (limit, offset) {
            (Some(n), _) => sql.push_str(&format!(" LIMIT {}", n)),
            (None, Some(_)) => sql.push_str(" LIMIT -1"),
            (None, None) => {}
        }
        if let Some(n) = offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }
        sql
    }
}
