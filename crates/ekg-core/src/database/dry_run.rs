//! Transport that records queries instead of sending them

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use super::{GraphTransport, Row};
use crate::error::Result;
use crate::query::Query;

/// A query as the transport received it
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedQuery {
    pub query: Query,
    pub database: String,
}

#[derive(Debug, Default)]
struct DryRunState {
    executed: Vec<ExecutedQuery>,
    responses: VecDeque<Vec<Row>>,
}

/// Records every query and answers from a scripted response queue.
///
/// Clones share their state, so a test can keep one handle and give
/// another to a [`DatabaseConnection`](super::DatabaseConnection).
#[derive(Debug, Clone, Default)]
pub struct DryRunTransport {
    state: Arc<Mutex<DryRunState>>,
    echo: bool,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log each query text at info level as it is received
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Queue the rows returned for the next query; without a queued
    /// response a query returns no rows
    pub fn push_response(&self, rows: Vec<Row>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .responses
            .push_back(rows);
    }

    pub fn executed(&self) -> Vec<ExecutedQuery> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .executed
            .clone()
    }

    /// Query texts in execution order
    pub fn texts(&self) -> Vec<String> {
        self.executed().into_iter().map(|executed| executed.query.text).collect()
    }
}

#[async_trait]
impl GraphTransport for DryRunTransport {
    async fn run(&self, query: &Query, database: &str) -> Result<Vec<Row>> {
        if self.echo {
            info!(database = %database, "{}", query.text.trim());
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.executed.push(ExecutedQuery {
            query: query.clone(),
            database: database.to_string(),
        });
        Ok(state.responses.pop_front().unwrap_or_default())
    }
}
