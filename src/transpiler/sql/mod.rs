//! Per-dialect generators.

pub mod mariadb;
pub mod mysql;
pub mod postgres;
pub mod sqlite;
