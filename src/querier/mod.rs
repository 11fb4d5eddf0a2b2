//! Cascading querier.
//!
//! Wraps one [`Connection`] and drives multi-statement operations:
//! relation cascades on insert/update/delete, population of to-many
//! relations after a find, and the transaction state of the connection.
//!
//! A querier is not meant to be shared between concurrent operations; every
//! public operation takes `&mut self`. Use one querier per pooled connection.

mod cascade;
mod populate;

use std::sync::Arc;

use serde_json::Value as Json;

use crate::connection::{Connection, RunOutcome};
use crate::error::{RelmapError, RelmapResult};
use crate::query::{Filter, ProjectItem, Projection, Query};
use crate::schema::SchemaRegistry;
use crate::transpiler::{Compiler, DeleteOptions, Dialect, Statement};
use crate::value::{Record, Value, raw};

/// Transaction state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    InTransaction,
}

/// Read options for `find_*` and `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindOptions {
    /// Hide soft-deleted rows unless the filter constrains the soft-delete field.
    pub soft_delete: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self { soft_delete: true }
    }
}

impl FindOptions {
    /// Include soft-deleted rows.
    pub fn with_deleted() -> Self {
        Self { soft_delete: false }
    }
}

pub struct Querier<C: Connection> {
    conn: C,
    registry: Arc<SchemaRegistry>,
    dialect: Dialect,
    state: TransactionState,
}

impl<C: Connection> Querier<C> {
    pub fn new(conn: C, registry: Arc<SchemaRegistry>, dialect: Dialect) -> Self {
        Self {
            conn,
            registry,
            dialect,
            state: TransactionState::Idle,
        }
    }

    /// Compile-only access with this querier's registry and dialect.
    pub fn compiler(&self) -> Compiler<'_> {
        Compiler::new(&self.registry, self.dialect)
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn has_open_transaction(&self) -> bool {
        self.state == TransactionState::InTransaction
    }

    pub async fn begin_transaction(&mut self) -> RelmapResult<()> {
        if self.has_open_transaction() {
            return Err(RelmapError::PendingTransaction);
        }
        let statement = self.compiler().begin_transaction();
        self.run(&statement).await?;
        self.state = TransactionState::InTransaction;
        tracing::info!("Transaction started");
        Ok(())
    }

    pub async fn commit_transaction(&mut self) -> RelmapResult<()> {
        if !self.has_open_transaction() {
            return Err(RelmapError::NoPendingTransaction);
        }
        let statement = self.compiler().commit_transaction();
        self.run(&statement).await?;
        self.state = TransactionState::Idle;
        tracing::info!("Transaction committed");
        Ok(())
    }

    pub async fn rollback_transaction(&mut self) -> RelmapResult<()> {
        if !self.has_open_transaction() {
            return Err(RelmapError::NoPendingTransaction);
        }
        let statement = self.compiler().rollback_transaction();
        self.run(&statement).await?;
        self.state = TransactionState::Idle;
        tracing::info!("Transaction rolled back");
        Ok(())
    }

    /// Release the connection. Refused while a transaction is open.
    pub async fn release(&self) -> RelmapResult<()> {
        if self.has_open_transaction() {
            return Err(RelmapError::PendingTransaction);
        }
        self.conn.release().await
    }

    /// Insert one record and its relation cascades; returns the new id.
    pub async fn insert_one(&mut self, entity: &str, body: Record) -> RelmapResult<Json> {
        let ids = self.insert_rows(entity, vec![body]).await?;
        Ok(ids.into_iter().next().unwrap_or(Json::Null))
    }

    /// Insert several records with one multi-row statement; returns their ids.
    pub async fn insert_many(&mut self, entity: &str, bodies: Vec<Record>) -> RelmapResult<Vec<Json>> {
        self.insert_rows(entity, bodies).await
    }

    pub async fn update_one_by_id(
        &mut self,
        entity: &str,
        id: impl Into<Value>,
        body: Record,
    ) -> RelmapResult<u64> {
        let id = id.into();
        let known = vec![id.to_json()];
        self.update_rows(entity, &Filter::by_id(id), &body, Some(known))
            .await
    }

    pub async fn update_many(&mut self, entity: &str, filter: &Filter, body: Record) -> RelmapResult<u64> {
        self.update_rows(entity, filter, &body, None).await
    }

    /// Insert, or update the row conflicting on `conflict_paths`.
    pub async fn upsert_one(&mut self, entity: &str, conflict_paths: &[&str], body: Record) -> RelmapResult<u64> {
        let statement = self.compiler().upsert(entity, conflict_paths, &body)?;
        Ok(self.run(&statement).await?.affected)
    }

    pub async fn find_many(&mut self, entity: &str, query: &Query) -> RelmapResult<Vec<Record>> {
        self.find_many_with(entity, query, FindOptions::default()).await
    }

    pub async fn find_many_with(
        &mut self,
        entity: &str,
        query: &Query,
        options: FindOptions,
    ) -> RelmapResult<Vec<Record>> {
        self.find_rows(entity, query.clone(), None, options.soft_delete).await
    }

    pub async fn find_one(&mut self, entity: &str, query: &Query) -> RelmapResult<Option<Record>> {
        self.find_one_with(entity, query, FindOptions::default()).await
    }

    pub async fn find_one_with(
        &mut self,
        entity: &str,
        query: &Query,
        options: FindOptions,
    ) -> RelmapResult<Option<Record>> {
        let query = Query {
            limit: Some(1),
            ..query.clone()
        };
        let rows = self.find_rows(entity, query, None, options.soft_delete).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn find_one_by_id(
        &mut self,
        entity: &str,
        id: impl Into<Value>,
        project: Option<Projection>,
    ) -> RelmapResult<Option<Record>> {
        let query = Query {
            filter: Filter::by_id(id),
            project,
            ..Query::default()
        };
        self.find_one(entity, &query).await
    }

    /// Number of rows matching `filter`.
    pub async fn count(&mut self, entity: &str, filter: &Filter) -> RelmapResult<u64> {
        self.count_with(entity, filter, FindOptions::default()).await
    }

    pub async fn count_with(&mut self, entity: &str, filter: &Filter, options: FindOptions) -> RelmapResult<u64> {
        let query = Query {
            filter: filter.clone(),
            project: Some(Projection::List(vec![ProjectItem::Raw {
                expr: raw("COUNT(*)"),
                alias: Some("count".to_string()),
            }])),
            ..Query::default()
        };
        let rows = self.find_rows(entity, query, None, options.soft_delete).await?;
        let count = rows.first().and_then(|row| row.get("count"));
        Ok(match count {
            Some(Json::Number(n)) => n.as_u64().unwrap_or_default(),
            Some(Json::String(s)) => s.parse().unwrap_or_default(),
            _ => 0,
        })
    }

    pub async fn delete_one_by_id(
        &mut self,
        entity: &str,
        id: impl Into<Value>,
        options: DeleteOptions,
    ) -> RelmapResult<u64> {
        self.delete_rows(entity, &Filter::by_id(id), options).await
    }

    pub async fn delete_many(&mut self, entity: &str, filter: &Filter, options: DeleteOptions) -> RelmapResult<u64> {
        self.delete_rows(entity, filter, options).await
    }

    async fn run(&self, statement: &Statement) -> RelmapResult<RunOutcome> {
        tracing::debug!("run: {} ({} params)", statement.sql, statement.values.len());
        self.conn.run(statement).await
    }

    async fn query(&self, statement: &Statement) -> RelmapResult<Vec<Record>> {
        tracing::debug!("query: {} ({} params)", statement.sql, statement.values.len());
        self.conn.query(statement).await
    }
}

/// Stable map key for an id value.
pub(crate) fn key_of(value: &Json) -> String {
    value.to_string()
}
