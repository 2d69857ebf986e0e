//! Neo4j Bolt transport
//!
//! Queries run on a pooled [`neo4rs::Graph`]; parameters are converted from
//! JSON to Bolt values and result rows back to JSON.

use async_trait::async_trait;
use neo4rs::{BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType, ConfigBuilder, Graph};
use serde_json::Value;
use tracing::{debug, error, info};

use super::{Credentials, GraphTransport, Row};
use crate::error::{Error, Result};
use crate::query::Query;

/// Transport over the Bolt protocol
#[derive(Clone)]
pub struct BoltTransport {
    graph: Graph,
    credentials: Credentials,
}

impl std::fmt::Debug for BoltTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltTransport")
            .field("uri", &self.credentials.uri)
            .field("user", &self.credentials.user)
            .finish()
    }
}

impl BoltTransport {
    /// Open a connection pool; `db_name` is the database used when a query names none
    pub async fn connect(credentials: Credentials, db_name: &str) -> Result<Self> {
        let config = ConfigBuilder::default()
            .uri(credentials.uri.as_str())
            .user(credentials.user.as_str())
            .password(credentials.password.as_str())
            .db(db_name)
            .build()?;
        let graph = Graph::connect(config).await?;
        info!(uri = %credentials.uri, database = %db_name, "Connected to graph database");
        Ok(Self { graph, credentials })
    }
}

/// JSON parameter value as a Bolt value
fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(flag) => BoltType::Boolean(BoltBoolean::new(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => BoltType::Integer(BoltInteger::new(integer)),
            None => BoltType::Float(BoltFloat::new(number.as_f64().unwrap_or(f64::NAN))),
        },
        Value::String(text) => BoltType::String(BoltString::new(text)),
        Value::Array(items) => BoltType::List(BoltList::from(items.iter().map(to_bolt).collect::<Vec<_>>())),
        Value::Object(entries) => {
            let mut map = BoltMap::default();
            for (key, value) in entries {
                map.put(BoltString::new(key), to_bolt(value));
            }
            BoltType::Map(map)
        }
    }
}

#[async_trait]
impl GraphTransport for BoltTransport {
    async fn run(&self, query: &Query, database: &str) -> Result<Vec<Row>> {
        let mut bolt_query = neo4rs::query(&query.text);
        for (name, value) in &query.parameters {
            bolt_query = bolt_query.param(name, to_bolt(value));
        }

        debug!(uri = %self.credentials.uri, parameters = query.parameters.len(), "Sending query");

        let mut stream = self
            .graph
            .execute_on(database, bolt_query)
            .await
            .inspect_err(|e| error!(database = %database, "Query failed: {}", e))?;

        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            let row: Row = row
                .to()
                .map_err(|e| Error::Database(format!("cannot read result row: {}", e)))?;
            rows.push(row);
        }
        Ok(rows)
    }
}
