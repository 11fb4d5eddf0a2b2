//! Dialect trait and identifier escaping.

/// SQL reserved words that must be quoted when used as identifiers.
pub const RESERVED_WORDS: &[&str] = &[
    "order",
    "group",
    "user",
    "table",
    "select",
    "from",
    "where",
    "join",
    "left",
    "right",
    "inner",
    "outer",
    "on",
    "and",
    "or",
    "not",
    "null",
    "true",
    "false",
    "limit",
    "offset",
    "as",
    "in",
    "is",
    "like",
    "between",
    "having",
    "union",
    "all",
    "distinct",
    "case",
    "when",
    "then",
    "else",
    "end",
    "create",
    "alter",
    "drop",
    "insert",
    "update",
    "delete",
    "index",
    "key",
    "primary",
    "foreign",
    "references",
    "default",
    "constraint",
    "check",
];

/// Whether an identifier must be quoted: reserved word, special characters
/// or a leading digit.
pub fn needs_escaping(name: &str) -> bool {
    let lower = name.to_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
        || name.is_empty()
        || name.chars().any(|c| !c.is_alphanumeric() && c != '_')
        || name.chars().next().is_some_and(|c| c.is_numeric())
}

/// Escape an identifier with double quotes if needed.
pub fn escape_identifier(name: &str) -> String {
    if needs_escaping(name) {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

/// How a dialect reports ids generated by an INSERT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertIdStrategy {
    /// `INSERT ... RETURNING id`, ids come back as rows.
    Returning,
    /// The driver reports the id of the first row of a multi-row insert.
    FirstOfBatch,
    /// The driver reports the id of the last row of a multi-row insert.
    LastOfBatch,
}

/// Dialect-specific SQL generation.
///
/// Everything that differs between products lives here; the builders in
/// `dml` and `conditions` only go through this table.
pub trait SqlGenerator: Send + Sync {
    /// Quote an identifier unconditionally.
    fn quote_identifier(&self, name: &str) -> String;

    /// Parameter placeholder for the 1-based `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Quote only when required. Used for names that come from the schema.
    fn escape_identifier(&self, name: &str) -> String {
        if needs_escaping(name) {
            self.quote_identifier(name)
        } else {
            name.to_string()
        }
    }

    fn begin_transaction(&self) -> &'static str {
        "BEGIN TRANSACTION"
    }

    fn commit_transaction(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback_transaction(&self) -> &'static str {
        "ROLLBACK"
    }

    fn insert_id_strategy(&self) -> InsertIdStrategy {
        InsertIdStrategy::LastOfBatch
    }

    /// Case-insensitive LIKE. Pair with [`SqlGenerator::lowers_pattern`].
    fn ilike(&self, column: &str, placeholder: &str) -> String {
        format!("LOWER({}) LIKE {}", column, placeholder)
    }

    /// Whether the bound pattern of [`SqlGenerator::ilike`] must be lower-cased.
    fn lowers_pattern(&self) -> bool {
        true
    }

    /// Suffix after a LIKE pattern naming the escape character.
    fn like_escape(&self) -> &'static str {
        ""
    }

    fn regex(&self, column: &str, placeholder: &str) -> String {
        format!("{} REGEXP {}", column, placeholder)
    }

    /// Full-text predicate over already escaped columns.
    fn text_search(&self, table: &str, columns: &[String], placeholder: &str) -> String;

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        if let Some(n) = offset {
            sql.push_str(&format!(" OFFSET {}", n));
        }
        sql
    }

    /// Reference to the value a conflicting insert tried to write.
    fn excluded(&self, column: &str) -> String {
        format!("EXCLUDED.{}", column)
    }

    /// Conflict clause of an upsert. `assignments` are rendered `col = expr`.
    fn upsert_clause(&self, conflict: &[String], assignments: &[String]) -> String {
        if assignments.is_empty() {
            format!(" ON CONFLICT ({}) DO NOTHING", conflict.join(", "))
        } else {
            format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                conflict.join(", "),
                assignments.join(", ")
            )
        }
    }

    /// Column list and VALUES keyword for an insert without columns.
    fn default_values(&self) -> &'static str {
        " DEFAULT VALUES"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("name"), "name");
        assert_eq!(escape_identifier("User"), "\"User\"");
        assert_eq!(escape_identifier("order"), "\"order\"");
        assert_eq!(escape_identifier("author.name"), "\"author.name\"");
        assert_eq!(escape_identifier("1st"), "\"1st\"");
        assert_eq!(escape_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
