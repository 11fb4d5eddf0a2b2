use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RelmapError;
use crate::transpiler::sql::mariadb::MariaDbGenerator;
use crate::transpiler::sql::mysql::MysqlGenerator;
use crate::transpiler::sql::postgres::PostgresGenerator;
use crate::transpiler::sql::sqlite::SqliteGenerator;
use crate::transpiler::traits::SqlGenerator;

/// Supported SQL Dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    #[serde(rename = "mysql")]
    MySQL,
    #[serde(rename = "mariadb")]
    MariaDB,
    #[serde(rename = "sqlite")]
    SQLite,
}

impl Dialect {
    pub fn generator(&self) -> &'static dyn SqlGenerator {
        match self {
            Dialect::Postgres => &PostgresGenerator,
            Dialect::MySQL => &MysqlGenerator,
            Dialect::MariaDB => &MariaDbGenerator,
            Dialect::SQLite => &SqliteGenerator,
        }
    }

    /// Infer the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?;
        match scheme {
            "postgres" | "postgresql" => Some(Dialect::Postgres),
            "mysql" => Some(Dialect::MySQL),
            "mariadb" => Some(Dialect::MariaDB),
            "sqlite" => Some(Dialect::SQLite),
            _ => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Postgres => "postgres",
            Dialect::MySQL => "mysql",
            Dialect::MariaDB => "mariadb",
            Dialect::SQLite => "sqlite",
        };
        f.write_str(name)
    }
}

impl FromStr for Dialect {
    type Err = RelmapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySQL),
            "mariadb" => Ok(Dialect::MariaDB),
            "sqlite" => Ok(Dialect::SQLite),
            other => Err(RelmapError::Config(format!("unknown dialect '{}'", other))),
        }
    }
}
