//! The low-level connection the querier drives.
//!
//! Pooling, transport and driver types stay behind this trait; the querier
//! only hands it compiled statements.

use async_trait::async_trait;

use crate::error::RelmapResult;
use crate::transpiler::Statement;
use crate::value::Record;

/// What a data-changing statement reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub affected: u64,
    /// Driver-reported generated id (`LAST_INSERT_ID()`, `last_insert_rowid()`).
    pub insert_id: Option<i64>,
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a statement that returns no rows.
    async fn run(&self, statement: &Statement) -> RelmapResult<RunOutcome>;

    /// Execute a statement and collect its rows.
    async fn query(&self, statement: &Statement) -> RelmapResult<Vec<Record>>;

    /// Hand the connection back to wherever it came from.
    async fn release(&self) -> RelmapResult<()>;
}
