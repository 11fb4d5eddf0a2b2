//! In-memory `Connection` that records every statement it is handed.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use relmap::connection::{Connection, RunOutcome};
use relmap::error::{RelmapError, RelmapResult};
use relmap::transpiler::Statement;
use relmap::value::Record;
use serde_json::Value as Json;
use tracing_subscriber::EnvFilter;

/// Route querier logs to the test output. `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relmap=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Canned rows for the next query whose SQL contains `pattern`.
struct Script {
    pattern: String,
    rows: Vec<Record>,
}

pub struct MockConnection {
    log: Mutex<Vec<Statement>>,
    scripts: Mutex<VecDeque<Script>>,
    next_id: Mutex<i64>,
    /// Report the id of the last inserted row instead of the first.
    last_of_batch: bool,
    released: AtomicBool,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            scripts: Mutex::new(VecDeque::new()),
            next_id: Mutex::new(1),
            last_of_batch: false,
            released: AtomicBool::new(false),
        }
    }

    pub fn reporting_last_id() -> Self {
        Self {
            last_of_batch: true,
            ..Self::new()
        }
    }

    /// Answer the next query containing `pattern` with `rows` (JSON objects).
    pub fn on_query(&self, pattern: &str, rows: Vec<Json>) {
        let rows = rows
            .into_iter()
            .filter_map(|row| match row {
                Json::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.scripts.lock().unwrap().push_back(Script {
            pattern: pattern.to_string(),
            rows,
        });
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().unwrap().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Number of `VALUES` tuples in an INSERT.
fn inserted_rows(sql: &str) -> i64 {
    sql.matches("), (").count() as i64 + 1
}

#[async_trait]
impl Connection for MockConnection {
    async fn run(&self, statement: &Statement) -> RelmapResult<RunOutcome> {
        self.log.lock().unwrap().push(statement.clone());
        if !statement.sql.starts_with("INSERT") {
            return Ok(RunOutcome {
                affected: 1,
                insert_id: None,
            });
        }
        let rows = inserted_rows(&statement.sql);
        let mut next = self.next_id.lock().unwrap();
        let first = *next;
        *next += rows;
        Ok(RunOutcome {
            affected: rows as u64,
            insert_id: Some(if self.last_of_batch { first + rows - 1 } else { first }),
        })
    }

    async fn query(&self, statement: &Statement) -> RelmapResult<Vec<Record>> {
        self.log.lock().unwrap().push(statement.clone());
        let mut scripts = self.scripts.lock().unwrap();
        let found = scripts
            .iter()
            .position(|script| statement.sql.contains(&script.pattern));
        Ok(found
            .and_then(|i| scripts.remove(i))
            .map(|script| script.rows)
            .unwrap_or_default())
    }

    async fn release(&self) -> RelmapResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(RelmapError::Connection("already released".to_string()));
        }
        Ok(())
    }
}
