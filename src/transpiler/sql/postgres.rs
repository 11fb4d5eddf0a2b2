use crate::transpiler::traits::{InsertIdStrategy, SqlGenerator};

pub struct PostgresGenerator;

impl Default for PostgresGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl PostgresGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl SqlGenerator for PostgresGenerator {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn insert_id_strategy(&self) -> InsertIdStrategy {
        InsertIdStrategy::Returning
    }

    fn ilike(&self, column: &str, placeholder: &str) -> String {
        format!("{} ILIKE {}", column, placeholder)
    }

    fn lowers_pattern(&self) -> bool {
        false
    }

    fn regex(&self, column: &str, placeholder: &str) -> String {
        format!("{} ~ {}", column, placeholder)
    }

    fn text_search(&self, _table: &str, columns: &[String], placeholder: &str) -> String {
        format!(
            "to_tsvector({}) @@ to_tsquery({})",
            columns.join(" || ' ' || "),
            placeholder
        )
    }
}
