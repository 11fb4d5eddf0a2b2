//! DML (Data Manipulation Language) SQL generation.
//!
//! This module contains functions for generating SELECT, INSERT, UPDATE,
//! DELETE and upsert statements from entity schemas.

pub mod delete;
pub mod insert;
pub mod select;
pub mod update;
pub mod upsert;
