//! Database configuration, read from the `[database]` table of a TOML file.
//!
//! ```toml
//! [database]
//! url = "postgres://localhost/app"
//! dialect = "postgres"   # optional, inferred from the url scheme
//! max_connections = 10   # optional, defaults to 5
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{RelmapError, RelmapResult};
use crate::transpiler::Dialect;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default)]
    pub dialect: Option<Dialect>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    database: DatabaseConfig,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            dialect: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn from_toml_str(content: &str) -> RelmapResult<Self> {
        let file: ConfigFile = toml::from_str(content).map_err(|e| RelmapError::Config(e.to_string()))?;
        Ok(file.database)
    }

    pub fn load(path: impl AsRef<Path>) -> RelmapResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RelmapError::Config(format!("{} not found", path.display())));
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// The configured dialect, else the one implied by the url scheme.
    pub fn dialect(&self) -> RelmapResult<Dialect> {
        match self.dialect {
            Some(dialect) => Ok(dialect),
            None => Dialect::from_url(&self.url)
                .ok_or_else(|| RelmapError::Config(format!("cannot infer dialect from url '{}'", self.url))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let config = DatabaseConfig::from_toml_str(
            r#"
            [database]
            url = "mysql://root@localhost/app"
            dialect = "mariadb"
            max_connections = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.url, "mysql://root@localhost/app");
        assert_eq!(config.dialect().unwrap(), Dialect::MariaDB);
        assert_eq!(config.max_connections, 12);
    }

    #[test]
    fn test_defaults_and_inference() {
        let config = DatabaseConfig::from_toml_str(
            r#"
            [database]
            url = "sqlite::memory:"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.dialect, None);
        assert_eq!(config.dialect().unwrap(), Dialect::SQLite);
    }

    #[test]
    fn test_unknown_scheme() {
        let config = DatabaseConfig::new("oracle://db");
        assert!(matches!(config.dialect(), Err(RelmapError::Config(_))));
    }

    #[test]
    fn test_missing_table() {
        let err = DatabaseConfig::from_toml_str("url = \"x\"").unwrap_err();
        assert!(matches!(err, RelmapError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = DatabaseConfig::load("/nonexistent/relmap.toml").unwrap_err();
        assert!(matches!(err, RelmapError::Config(_)));
    }
}
