//! Neo4j HTTP API transport
//!
//! Every query runs in its own implicit transaction through
//! `POST {uri}/db/{database}/tx/commit`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use super::{Credentials, GraphTransport, Row, UriScheme};
use crate::error::{Error, Result};
use crate::query::Query;

/// Default request timeout; periodic queries can run for minutes
const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    statements: [Statement<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ServerError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    code: String,
    message: String,
}

impl CommitResponse {
    fn into_rows(self) -> Result<Vec<Row>> {
        if let Some(first) = self.errors.first() {
            return Err(Error::Database(format!("{}: {}", first.code, first.message)));
        }
        let Some(result) = self.results.into_iter().next() else {
            return Ok(Vec::new());
        };
        let columns = result.columns;
        Ok(result
            .data
            .into_iter()
            .map(|data| columns.iter().cloned().zip(data.row).collect())
            .collect())
    }
}

/// Transport over the Neo4j HTTP API
#[derive(Clone)]
pub struct HttpTransport {
    http_client: HttpClient,
    credentials: Credentials,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("uri", &self.credentials.uri)
            .field("user", &self.credentials.user)
            .finish()
    }
}

/// Builder for an [`HttpTransport`]
pub struct HttpTransportBuilder {
    credentials: Option<Credentials>,
    timeout_secs: Option<u64>,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransportBuilder {
    pub fn new() -> Self {
        Self {
            credentials: None,
            timeout_secs: None,
        }
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        let mut credentials = self
            .credentials
            .ok_or_else(|| Error::ConfigError("database credentials are required".to_string()))?;
        if credentials.scheme()? != UriScheme::Http {
            return Err(Error::ConfigError(format!(
                "the HTTP transport needs an http:// or https:// uri, got '{}'",
                credentials.uri
            )));
        }
        credentials.uri = credentials.uri.trim_end_matches('/').to_string();

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(HttpTransport {
            http_client,
            credentials,
        })
    }
}

impl HttpTransport {
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::new()
    }

    pub fn commit_url(&self, database: &str) -> String {
        format!("{}/db/{}/tx/commit", self.credentials.uri, database)
    }

    async fn handle_error_response<T>(&self, status: reqwest::StatusCode, response: reqwest::Response) -> Result<T> {
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 | 403 => Err(Error::Unauthorized(format!(
                "the database rejected user '{}'",
                self.credentials.user
            ))),
            404 => Err(Error::Database(format!("database or endpoint not found: {}", body))),
            500..=599 => Err(Error::Database(format!("server error ({}): {}", status, body))),
            _ => Err(Error::Database(format!("HTTP error {}: {}", status, body))),
        }
    }
}

#[async_trait]
impl GraphTransport for HttpTransport {
    async fn run(&self, query: &Query, database: &str) -> Result<Vec<Row>> {
        let url = self.commit_url(database);
        let request = CommitRequest {
            statements: [Statement {
                statement: &query.text,
                parameters: &query.parameters,
            }],
        };

        debug!(url = %url, parameters = query.parameters.len(), "Sending query");

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .json(&request)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return self.handle_error_response(status, response).await;
        }

        let body: CommitResponse = response.json().await.map_err(Error::NetworkError)?;
        body.into_rows().inspect_err(|e| error!(database = %database, "Query failed: {}", e))
    }
}
