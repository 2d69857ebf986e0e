//! DF process model discovery

use tracing::info;

use crate::database::DatabaseConnection;
use crate::error::{Error, Result};
use crate::performance::PerformanceTracker;
use crate::query::discovery::{self as discovery_ql, DfAggregation};
use crate::semantic_header::SemanticHeader;

/// Aggregates DF edges between events into DF edges between activities
pub struct ProcessDiscovery<'a> {
    connection: &'a DatabaseConnection,
    semantic_header: &'a SemanticHeader,
    aggregation: DfAggregation,
    tracker: Option<PerformanceTracker>,
}

impl<'a> ProcessDiscovery<'a> {
    pub fn new(connection: &'a DatabaseConnection, semantic_header: &'a SemanticHeader) -> Self {
        Self {
            connection,
            semantic_header,
            aggregation: DfAggregation::default(),
            tracker: None,
        }
    }

    pub fn include_label_in_df_a(mut self, include: bool) -> Self {
        self.aggregation.include_label_in_df_a = include;
        self
    }

    pub fn df_threshold(mut self, threshold: u64) -> Self {
        self.aggregation.df_threshold = threshold;
        self
    }

    pub fn relative_df_threshold(mut self, threshold: f64) -> Self {
        self.aggregation.relative_df_threshold = threshold;
        self
    }

    pub fn exclude_self_loops(mut self, exclude: bool) -> Self {
        self.aggregation.exclude_self_loops = exclude;
        self
    }

    pub fn tracker(mut self, tracker: PerformanceTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Merge `DF_A` edges between the activities observed by consecutive
    /// events of `entity_type`, counting the underlying DF edges
    pub async fn create_df_process_model(&self, entity_type: &str) -> Result<()> {
        let entity = self.semantic_header.entity(entity_type)?;
        let relative = self.aggregation.relative_df_threshold;
        if !(0.0..=1.0).contains(&relative) {
            return Err(Error::InvalidInput(format!(
                "relative DF threshold must be between 0 and 1, got {}",
                relative
            )));
        }

        self.connection
            .exec_query(discovery_ql::aggregate_df_relations(entity, &self.aggregation))
            .await?;
        if let Some(tracker) = &self.tracker {
            tracker.finished_step(format!("df process model {}", entity_type));
        }
        info!(entity = %entity_type, "Created DF process model");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DryRunTransport;
    use serde_json::json;

    fn header() -> SemanticHeader {
        SemanticHeader::from_value(json!({
            "name": "library",
            "nodes": [{
                "type": "Book",
                "infer_df": true,
                "constructor": {
                    "prevalent_record": "(record:BookRecord)",
                    "result": "(b:Entity:Book {sysId: record.bookId})"
                }
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_df_process_model() {
        let header = header();
        let transport = DryRunTransport::new();
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");
        let tracker = PerformanceTracker::new();

        ProcessDiscovery::new(&connection, &header)
            .tracker(tracker.clone())
            .create_df_process_model("Book")
            .await
            .unwrap();

        let executed = transport.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].query.text.contains("[df:DF {entityType: $entity_type}]"));
        assert!(executed[0].query.text.contains("[rel2:DF_A_BOOK "));
        assert_eq!(executed[0].query.parameters["entity_type"], json!("Book"));
        assert_eq!(tracker.steps()[0].name, "df process model Book");
    }

    #[tokio::test]
    async fn test_thresholds_reach_the_query() {
        let header = header();
        let transport = DryRunTransport::new();
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");

        ProcessDiscovery::new(&connection, &header)
            .df_threshold(3)
            .relative_df_threshold(0.25)
            .exclude_self_loops(false)
            .include_label_in_df_a(false)
            .create_df_process_model("Book")
            .await
            .unwrap();

        let query = &transport.executed()[0].query;
        assert!(query.text.contains("WHERE df_freq > $df_threshold"));
        assert!(query.text.contains("[rel2:DF_A {"));
        assert_eq!(query.parameters["df_threshold"], json!(3));
        assert_eq!(query.parameters["relative_df_threshold"], json!(0.25));
    }

    #[tokio::test]
    async fn test_rejects_bad_input_before_querying() {
        let header = header();
        let transport = DryRunTransport::new();
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");

        let err = ProcessDiscovery::new(&connection, &header)
            .create_df_process_model("Member")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EntityNotFound(_)));

        let err = ProcessDiscovery::new(&connection, &header)
            .relative_df_threshold(1.5)
            .create_df_process_model("Book")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E800");
        assert!(transport.executed().is_empty());
    }
}
