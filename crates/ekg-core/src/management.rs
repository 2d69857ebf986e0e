//! Database administration and graph statistics

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::database::{DatabaseConnection, Row};
use crate::error::Result;
use crate::query::management as management_ql;

/// Number of nodes or relationships of one kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Count {
    pub name: String,
    pub count: u64,
}

/// Size of the graph by node label and relationship type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStatistics {
    pub nodes: Vec<Count>,
    /// Relationships grouped by their `type` property, e.g. `DF`
    pub aggregated_relationships: Vec<Count>,
    pub relationships: Vec<Count>,
}

impl GraphStatistics {
    pub fn total_nodes(&self) -> u64 {
        self.nodes.iter().map(|count| count.count).sum()
    }

    pub fn total_relationships(&self) -> u64 {
        self.relationships.iter().map(|count| count.count).sum()
    }
}

/// Administrative operations on the connected database
pub struct DatabaseManager<'a> {
    connection: &'a DatabaseConnection,
    batch_size: usize,
}

impl<'a> DatabaseManager<'a> {
    pub fn new(connection: &'a DatabaseConnection) -> Self {
        Self {
            connection,
            batch_size: 100_000,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Remove everything from the database
    ///
    /// With `replace` the database is recreated, which also drops indexes and
    /// constraints. Otherwise relationships and then nodes are deleted.
    pub async fn clear_db(&self, replace: bool) -> Result<()> {
        if replace {
            self.connection
                .exec_query(management_ql::replace_database(self.connection.db_name()))
                .await?;
        } else {
            self.connection
                .exec_query(management_ql::delete_relationships(self.batch_size))
                .await?;
            self.connection
                .exec_query(management_ql::delete_nodes(self.batch_size))
                .await?;
        }
        info!(database = %self.connection.db_name(), replace, "Cleared database");
        Ok(())
    }

    pub async fn set_constraints(&self) -> Result<()> {
        self.connection.exec_query(management_ql::sys_id_index()).await?;
        Ok(())
    }

    pub async fn all_rel_types(&self) -> Result<Vec<String>> {
        let rows = self.connection.exec_query(management_ql::all_rel_types()).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("rel_type").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Every label in use, each reported once
    pub async fn all_node_labels(&self) -> Result<BTreeSet<String>> {
        let rows = self.connection.exec_query(management_ql::all_node_labels()).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("label").and_then(Value::as_array))
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    pub async fn statistics(&self) -> Result<GraphStatistics> {
        let nodes = self.connection.exec_query(management_ql::node_count()).await?;
        let aggregated = self.connection.exec_query(management_ql::aggregated_edge_count()).await?;
        let relationships = self.connection.exec_query(management_ql::edge_count()).await?;

        let statistics = GraphStatistics {
            nodes: counts(&nodes, "label", "numberOfNodes"),
            aggregated_relationships: counts(&aggregated, "aggType", "aggNumberOfRelations"),
            relationships: counts(&relationships, "type", "numberOfRelations"),
        };
        info!(
            nodes = statistics.total_nodes(),
            relationships = statistics.total_relationships(),
            "Collected graph statistics"
        );
        Ok(statistics)
    }
}

fn counts(rows: &[Row], name_column: &str, count_column: &str) -> Vec<Count> {
    rows.iter()
        .map(|row| Count {
            name: match row.get(name_column) {
                Some(Value::String(name)) => name.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            },
            count: row.get(count_column).and_then(Value::as_u64).unwrap_or(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DryRunTransport;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_clear_db_replaces_database_on_system() {
        let transport = DryRunTransport::new();
        let connection = DatabaseConnection::new(transport.clone(), "orders");
        DatabaseManager::new(&connection).clear_db(true).await.unwrap();

        let executed = transport.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].database, "system");
        assert!(executed[0].query.text.contains("CREATE OR REPLACE DATABASE orders"));
    }

    #[tokio::test]
    async fn test_clear_db_deletes_relationships_before_nodes() {
        let transport = DryRunTransport::new();
        let connection = DatabaseConnection::new(transport.clone(), "orders");
        DatabaseManager::new(&connection)
            .batch_size(10)
            .clear_db(false)
            .await
            .unwrap();

        let executed = transport.executed();
        assert!(executed[0].query.text.contains("DELETE r"));
        assert!(executed[1].query.text.contains("DETACH DELETE n"));
        assert_eq!(executed[1].query.parameters["batch_size"], json!(10));
        assert_eq!(executed[1].database, "orders");
    }

    #[tokio::test]
    async fn test_all_node_labels_are_flattened() {
        let transport = DryRunTransport::new();
        transport.push_response(vec![
            row(json!({"label": ["Record", "EventRecord"]})),
            row(json!({"label": ["Event"]})),
            row(json!({"label": ["Record", "OrderRecord"]})),
        ]);
        let connection = DatabaseConnection::new(transport, "neo4j");
        let labels = DatabaseManager::new(&connection).all_node_labels().await.unwrap();
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        assert_eq!(labels, vec!["Event", "EventRecord", "OrderRecord", "Record"]);
    }

    #[tokio::test]
    async fn test_statistics() {
        let transport = DryRunTransport::new();
        transport.push_response(vec![
            row(json!({"label": "Event", "numberOfNodes": 12})),
            row(json!({"label": "Entity", "numberOfNodes": 3})),
        ]);
        transport.push_response(vec![row(json!({"aggType": "DF", "aggNumberOfRelations": 9}))]);
        transport.push_response(vec![
            row(json!({"type": "CORR", "numberOfRelations": 12})),
            row(json!({"type": "DF_ORDER", "numberOfRelations": 9})),
        ]);
        let connection = DatabaseConnection::new(transport, "neo4j");

        let statistics = DatabaseManager::new(&connection).statistics().await.unwrap();
        assert_eq!(statistics.total_nodes(), 15);
        assert_eq!(statistics.total_relationships(), 21);
        assert_eq!(
            statistics.aggregated_relationships,
            vec![Count {
                name: "DF".to_string(),
                count: 9
            }]
        );
    }
}
