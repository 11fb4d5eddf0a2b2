use super::super::traits::{InsertIdStrategy, SqlGenerator};
use super::mysql::{mysql_limit_offset, mysql_upsert_clause};

/// MariaDB: MySQL rendering, but generated ids come back via RETURNING (10.5+).
pub struct MariaDbGenerator;

impl SqlGenerator for MariaDbGenerator {
    fn quote_identifier(&self, id: &str) -> String {
        format!("`{}`", id.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn begin_transaction(&self) -> &'static str {
        "START TRANSACTION"
    }

    fn insert_id_strategy(&self) -> InsertIdStrategy {
        InsertIdStrategy::Returning
    }

    fn text_search(&self, _table: &str, columns: &[String], placeholder: &str) -> String {
        format!("MATCH({}) AGAINST({})", columns.join(", "), placeholder)
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        mysql_limit_offset(limit, offset)
    }

    fn excluded(&self, column: &str) -> String {
        format!("VALUES({})", column)
    }

    fn upsert_clause(&self, conflict: &[String], assignments: &[String]) -> String {
        mysql_upsert_clause(conflict, assignments)
    }

    fn default_values(&self) -> &'static str {
        " () VALUES ()"
    }
}
