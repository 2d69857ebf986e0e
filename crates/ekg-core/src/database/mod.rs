//! Graph database access
//!
//! [`DatabaseConnection`] sends [`Query`] values through a
//! [`GraphTransport`]: Bolt or the Neo4j HTTP API in production, or a
//! recording dry-run transport for `--dry-run` and tests.

mod bolt;
mod credentials;
mod dry_run;
mod http;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::query::Query;

pub use bolt::BoltTransport;
pub use credentials::{Credentials, UriScheme};
pub use dry_run::{DryRunTransport, ExecutedQuery};
pub use http::{HttpTransport, HttpTransportBuilder};

/// One result row, keyed by column name
pub type Row = Map<String, Value>;

/// Additional attempts for a periodic commit that reports failed batches
const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Retried batches never shrink below this limit; smaller limits are kept as they are
const MIN_RETRY_LIMIT: u64 = 10_000;

/// Executes Cypher against a graph database
#[async_trait]
pub trait GraphTransport: Send + Sync + std::fmt::Debug {
    async fn run(&self, query: &Query, database: &str) -> Result<Vec<Row>>;
}

/// Connection to one default database
#[derive(Debug)]
pub struct DatabaseConnection {
    transport: Box<dyn GraphTransport>,
    db_name: String,
    verbose: bool,
}

impl DatabaseConnection {
    pub fn new(transport: impl GraphTransport + 'static, db_name: impl Into<String>) -> Self {
        Self {
            transport: Box::new(transport),
            db_name: db_name.into(),
            verbose: false,
        }
    }

    /// Log every query text at debug level
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Run a query against its database, or the default one.
    ///
    /// `apoc.periodic.commit` queries are retried while they report failed
    /// batches, with the `limit` parameter halved on every attempt.
    pub async fn exec_query(&self, query: Query) -> Result<Vec<Row>> {
        let database = query.database.clone().unwrap_or_else(|| self.db_name.clone());
        if self.verbose {
            debug!(database = %database, query = %query.text.trim(), "Executing query");
        }

        if !query.is_periodic_commit() {
            return self.transport.run(&query, &database).await;
        }
        self.exec_periodic_commit(query, &database).await
    }

    async fn exec_periodic_commit(&self, mut query: Query, database: &str) -> Result<Vec<Row>> {
        let mut attempts = 0;
        loop {
            let rows = self.transport.run(&query, database).await?;
            let failed_batches = rows
                .first()
                .and_then(|row| row.get("failedBatches"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            if failed_batches == 0 {
                return Ok(rows);
            }

            if attempts >= MAX_RETRY_ATTEMPTS {
                let errors = rows
                    .first()
                    .and_then(|row| row.get("batchErrors"))
                    .map(Value::to_string)
                    .unwrap_or_default();
                return Err(Error::BatchRetriesExhausted(errors));
            }
            attempts += 1;

            if let Some(limit) = query.parameters.get("limit").and_then(Value::as_u64) {
                let next = next_retry_limit(limit);
                query.parameters.insert("limit".to_string(), Value::from(next));
                warn!(failed_batches, attempt = attempts, limit = next, "Retrying periodic commit");
            }
        }
    }

    /// Run queries in order, stopping at the first error
    pub async fn exec_all(&self, queries: impl IntoIterator<Item = Query>) -> Result<()> {
        let mut count = 0usize;
        for query in queries {
            self.exec_query(query).await?;
            count += 1;
        }
        info!(queries = count, "Executed queries");
        Ok(())
    }
}

/// Connect with the transport matching the URI scheme of `credentials`
pub async fn connect(credentials: Credentials, db_name: &str, timeout_secs: u64) -> Result<DatabaseConnection> {
    let connection = match credentials.scheme()? {
        UriScheme::Bolt => DatabaseConnection::new(BoltTransport::connect(credentials, db_name).await?, db_name),
        UriScheme::Http => {
            let transport = HttpTransport::builder()
                .credentials(credentials)
                .timeout_secs(timeout_secs)
                .build()?;
            DatabaseConnection::new(transport, db_name)
        }
    };
    Ok(connection)
}

/// Half the limit, but not below [`MIN_RETRY_LIMIT`] and never above the current limit
fn next_retry_limit(limit: u64) -> u64 {
    (limit / 2).max(MIN_RETRY_LIMIT).min(limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn commit_query(limit: u64) -> Query {
        Query::new("CALL apoc.periodic.commit('MATCH (n) WITH n limit $limit RETURN count(*)', {limit: $limit})")
            .with_parameter("limit", limit)
    }

    fn failed(batches: u64) -> Vec<Row> {
        let row = json!({"failedBatches": batches, "batchErrors": {"oops": batches}});
        vec![row.as_object().unwrap().clone()]
    }

    #[tokio::test]
    async fn test_default_database_is_filled_in() {
        let transport = DryRunTransport::new();
        let connection = DatabaseConnection::new(transport.clone(), "orders");
        connection.exec_query(Query::new("MATCH (n) RETURN n")).await.unwrap();
        connection
            .exec_query(Query::new("SHOW DATABASES").on_database("system"))
            .await
            .unwrap();

        let executed = transport.executed();
        assert_eq!(executed[0].database, "orders");
        assert_eq!(executed[1].database, "system");
    }

    #[tokio::test]
    async fn test_periodic_commit_retries_with_halved_limit() {
        let transport = DryRunTransport::new();
        transport.push_response(failed(2));
        transport.push_response(failed(1));
        transport.push_response(failed(0));
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");

        connection.exec_query(commit_query(80_000)).await.unwrap();

        let limits: Vec<Value> = transport
            .executed()
            .iter()
            .map(|executed| executed.query.parameters["limit"].clone())
            .collect();
        assert_eq!(limits, vec![json!(80_000), json!(40_000), json!(20_000)]);
    }

    #[tokio::test]
    async fn test_retry_limit_has_a_floor() {
        let transport = DryRunTransport::new();
        for _ in 0..3 {
            transport.push_response(failed(1));
        }
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");

        connection.exec_query(commit_query(30_000)).await.unwrap();

        let limits: Vec<Value> = transport
            .executed()
            .iter()
            .map(|executed| executed.query.parameters["limit"].clone())
            .collect();
        assert_eq!(limits, vec![json!(30_000), json!(15_000), json!(10_000), json!(10_000)]);
    }

    #[tokio::test]
    async fn test_small_limit_is_retried_unchanged() {
        let transport = DryRunTransport::new();
        transport.push_response(failed(1));
        transport.push_response(failed(1));
        transport.push_response(failed(0));
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");

        connection.exec_query(commit_query(4_000)).await.unwrap();

        let limits: Vec<Value> = transport
            .executed()
            .iter()
            .map(|executed| executed.query.parameters["limit"].clone())
            .collect();
        assert_eq!(limits, vec![json!(4_000), json!(4_000), json!(4_000)]);
        assert_eq!(next_retry_limit(12_000), 10_000);
        assert_eq!(next_retry_limit(9_999), 9_999);
    }

    #[tokio::test]
    async fn test_retries_are_exhausted() {
        let transport = DryRunTransport::new();
        for _ in 0..=MAX_RETRY_ATTEMPTS {
            transport.push_response(failed(3));
        }
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");

        let err = connection.exec_query(commit_query(50_000)).await.unwrap_err();
        assert!(matches!(err, Error::BatchRetriesExhausted(ref errors) if errors.contains("oops")));
        assert_eq!(transport.executed().len(), MAX_RETRY_ATTEMPTS as usize + 1);
    }

    #[tokio::test]
    async fn test_connect_picks_transport_by_scheme() {
        let connection = connect(Credentials::new("http://localhost:7474", "neo4j", "x"), "orders", 5)
            .await
            .unwrap();
        assert_eq!(connection.db_name(), "orders");
        assert!(format!("{:?}", connection).contains("HttpTransport"));

        let err = connect(Credentials::new("ftp://localhost", "neo4j", "x"), "orders", 5)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E600");
    }

    #[tokio::test]
    async fn test_plain_queries_are_not_retried() {
        let transport = DryRunTransport::new();
        transport.push_response(failed(1));
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");
        connection.exec_query(Query::new("MATCH (n) RETURN n")).await.unwrap();
        assert_eq!(transport.executed().len(), 1);
    }
}
