use crate::transpiler::traits::{InsertIdStrategy, SqlGenerator};

/// Largest row count MySQL accepts; stands in for "no limit".
pub(crate) const MAX_ROWS: u64 = u64::MAX;

/// MySQL Generator.
pub struct MysqlGenerator;

impl MysqlGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MysqlGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// `LIMIT` / `OFFSET` shared by MySQL and MariaDB: OFFSET requires LIMIT.
pub(crate) fn mysql_limit_offset(limit: Option<u64>, offset: Option<u64>) -> String {
    let mut sql = String::new();
    match (limit, offset) {
        (Some(n), _) => sql.push_str(&format!(" LIMIT {}", n)),
        (None, Some(_)) => sql.push_str(&format!(" LIMIT {}", MAX_ROWS)),
        (None, None) => {}
    }
    if let Some(n) = offset {
        sql.push_str(&format!(" OFFSET {}", n));
    }
    sql
}

pub(crate) fn mysql_upsert_clause(conflict: &[String], assignments: &[String]) -> String {
    if assignments.is_empty() {
        // No-op assignment keeps the duplicate row untouched.
        let key = conflict.first().map(String::as_str).unwrap_or("id");
        format!(" ON DUPLICATE KEY UPDATE {} = {}", key, key)
    } else {
        format!(" ON DUPLICATE KEY UPDATE {}", assignments.join(", "))
    }
}

impl SqlGenerator for MysqlGenerator {
    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn begin_transaction(&self) -> &'static str {
        "START TRANSACTION"
    }

    // LAST_INSERT_ID() reports the first row of a batch.
    fn insert_id_strategy(&self) -> InsertIdStrategy {
        InsertIdStrategy::FirstOfBatch
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
