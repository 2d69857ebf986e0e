//! Event knowledge graph construction from imported records
//!
//! The builder turns the record layer into the semantic layer described by
//! a [`SemanticHeader`]: nodes per record constructor, relations between
//! them, and directly-follows (DF) edges between the events of each node.

use tracing::{debug, info};

use crate::database::DatabaseConnection;
use crate::error::Result;
use crate::performance::PerformanceTracker;
use crate::query::semantic_header as sh_ql;
use crate::semantic_header::{
    ConstructedNodes, ConstructedRelation, NodeConstructor, RelationConstructor, SemanticHeader,
};

/// Label of the events DF edges connect
pub const DEFAULT_EVENT_LABEL: &str = "Event";

/// Builds nodes and relations as the semantic header describes them
pub struct EkgBuilder<'a> {
    connection: &'a DatabaseConnection,
    semantic_header: &'a SemanticHeader,
    batch_size: usize,
    add_duration: bool,
    tracker: Option<PerformanceTracker>,
}

impl<'a> EkgBuilder<'a> {
    pub fn new(connection: &'a DatabaseConnection, semantic_header: &'a SemanticHeader) -> Self {
        Self {
            connection,
            semantic_header,
            batch_size: 5000,
            add_duration: false,
            tracker: None,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Store the time between consecutive events on DF edges
    pub fn add_duration(mut self, add_duration: bool) -> Self {
        self.add_duration = add_duration;
        self
    }

    pub fn tracker(mut self, tracker: PerformanceTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    fn finished_step(&self, name: impl Into<String>) {
        if let Some(tracker) = &self.tracker {
            tracker.finished_step(name);
        }
    }

    /// Nodes, relations and DF edges for every type in the header
    pub async fn build(&self) -> Result<()> {
        self.create_nodes_by_records(None).await?;
        self.create_relations_using_records(None).await?;
        self.create_relations_using_relations(None).await?;
        self.create_relations_using_nodes(None).await?;
        self.create_df_edges(None, DEFAULT_EVENT_LABEL).await?;
        self.merge_duplicate_df().await?;
        self.delete_parallel_df().await?;
        info!(header = %self.semantic_header.name, "Built event knowledge graph");
        Ok(())
    }

    pub async fn create_nodes_by_records(&self, node_types: Option<&[String]>) -> Result<()> {
        for constructor in self.semantic_header.node_by_record_constructors(node_types) {
            self.create_node_by_record(constructor).await?;
        }
        Ok(())
    }

    async fn create_node_by_record(&self, constructor: &NodeConstructor) -> Result<()> {
        debug!(
            result = %constructor.label_string(),
            merge = constructor.merges(),
            "Creating nodes by record"
        );
        self.connection
            .exec_query(sh_ql::create_node_by_record(constructor, self.batch_size))
            .await?;
        self.connection
            .exec_query(sh_ql::reset_created_record(self.batch_size))
            .await?;
        self.finished_step(format!("create nodes {}", constructor.label_string()));
        Ok(())
    }

    pub async fn create_relations_using_records(&self, relation_types: Option<&[String]>) -> Result<()> {
        for constructor in self.semantic_header.relations_constructed_by_record(relation_types) {
            self.connection
                .exec_query(sh_ql::create_relation_using_record(constructor, self.batch_size))
                .await?;
            self.connection
                .exec_query(sh_ql::reset_created_record(self.batch_size))
                .await?;
            self.create_corr_from_parents(constructor).await?;
            self.finished_step(format!("create relations {}", constructor.relation_type()));
        }
        Ok(())
    }

    pub async fn create_relations_using_relations(&self, relation_types: Option<&[String]>) -> Result<()> {
        for constructor in self.semantic_header.relations_constructed_by_relations(relation_types) {
            self.connection
                .exec_query(sh_ql::create_relation_by_relations(constructor, self.batch_size))
                .await?;
            self.create_corr_from_parents(constructor).await?;
            self.finished_step(format!("create relations {}", constructor.relation_type()));
        }
        Ok(())
    }

    pub async fn create_relations_using_nodes(&self, relation_types: Option<&[String]>) -> Result<()> {
        for constructor in self.semantic_header.relations_constructed_by_nodes(relation_types) {
            self.connection
                .exec_query(sh_ql::create_relation_by_nodes(constructor, self.batch_size))
                .await?;
            self.create_corr_from_parents(constructor).await?;
            self.finished_step(format!("create relations {}", constructor.relation_type()));
        }
        Ok(())
    }

    async fn create_corr_from_parents(&self, constructor: &RelationConstructor) -> Result<()> {
        if !constructor.infer_corr_from_reified_parents {
            return Ok(());
        }
        for use_from in [true, false] {
            self.connection
                .exec_query(sh_ql::infer_corr_from_parent(constructor, use_from, self.batch_size))
                .await?;
        }
        Ok(())
    }

    /// DF edges for node types with `infer_df` and for relations modelled as
    /// nodes with `infer_df`; `entity_types` filters both
    pub async fn create_df_edges(&self, entity_types: Option<&[String]>, event_label: &str) -> Result<()> {
        let nodes = self.semantic_header.nodes_with_df(entity_types).into_iter().map(ConstructedNodes::df_entity);
        let relations = self
            .semantic_header
            .relations_with_df(entity_types)
            .into_iter()
            .map(ConstructedRelation::df_entity);
        for entity in nodes.chain(relations) {
            self.connection
                .exec_query(sh_ql::create_directly_follows(
                    &entity,
                    event_label,
                    self.add_duration,
                    self.batch_size,
                ))
                .await?;
            self.finished_step(format!("create df {}", entity.entity_type));
        }
        Ok(())
    }

    pub async fn merge_duplicate_df(&self) -> Result<()> {
        for nodes in self.semantic_header.nodes.iter().filter(|nodes| nodes.merge_duplicate_df) {
            self.connection.exec_query(sh_ql::merge_duplicate_df(nodes)).await?;
            self.finished_step(format!("merge duplicate df {}", nodes.node_type));
        }
        Ok(())
    }

    /// Remove DF edges of nodes derived from a relation where the parent
    /// nodes already have a DF edge between the same events
    pub async fn delete_parallel_df(&self) -> Result<()> {
        for nodes in self.semantic_header.nodes.iter().filter(|nodes| nodes.delete_parallel_df) {
            for original in parent_node_types(nodes) {
                self.connection
                    .exec_query(sh_ql::delete_parallel_df(&nodes.node_type, &original))
                    .await?;
            }
            self.finished_step(format!("delete parallel df {}", nodes.node_type));
        }
        Ok(())
    }
}

/// Types of the nodes a relation-derived node type is built from
fn parent_node_types(nodes: &ConstructedNodes) -> Vec<String> {
    let mut parents: Vec<String> = Vec::new();
    for relation in nodes.constructors.iter().filter_map(|constructor| constructor.relation.as_ref()) {
        for node in [&relation.from_node, &relation.to_node] {
            if let Some(label) = node.labels.last() {
                if !parents.contains(label) {
                    parents.push(label.clone());
                }
            }
        }
    }
    parents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DryRunTransport;
    use serde_json::json;

    fn header() -> SemanticHeader {
        SemanticHeader::from_value(json!({
            "name": "orders",
            "version": "1",
            "nodes": [
                {
                    "type": "Event",
                    "constructor": {
                        "prevalent_record": "(record:EventRecord)",
                        "result": "(e:Event {activity: record.activity, timestamp: record.timestamp})"
                    }
                },
                {
                    "type": "Order",
                    "infer_df": true,
                    "merge_duplicate_df": true,
                    "constructor": {
                        "prevalent_record": "(record:OrderRecord)",
                        "result": "(o:Entity:Order {sysId: record.orderId})",
                        "infer_corr_from_event_record": true
                    }
                },
                {
                    "type": "OrderLine",
                    "infer_df": true,
                    "delete_parallel_df": true,
                    "constructor": {
                        "relation": "(o:Order) - [:CONTAINS] -> (p:Product)",
                        "result": "(l:Entity:OrderLine)"
                    }
                }
            ],
            "relations": [{
                "type": "PLACED_BY",
                "constructor": {
                    "prevalent_record": "(record:OrderRecord)",
                    "result": "(o:Order) - [:PLACED_BY] -> (c:Customer)",
                    "infer_corr_from_reified_parents": true,
                    "model_as_node": true
                }
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_issues_queries_in_order() {
        let header = header();
        let transport = DryRunTransport::new();
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");
        let tracker = PerformanceTracker::new();
        EkgBuilder::new(&connection, &header)
            .batch_size(100)
            .tracker(tracker.clone())
            .build()
            .await
            .unwrap();

        let texts = transport.texts();
        // two node constructors by record, each followed by a reset
        assert!(texts[0].contains("(e:Event {activity: record.activity, timestamp: record.timestamp})"));
        assert!(texts[1].contains("REMOVE record:RecordCreated"));
        assert!(texts[2].contains("MERGE (o:Entity:Order {sysId: record.orderId})"));
        assert!(texts[3].contains("REMOVE record:RecordCreated"));
        // relation by record, reset, then correlation from both parents
        assert!(texts[4].contains("(relation:PLACED_BY)"));
        assert!(texts[5].contains("REMOVE record:RecordCreated"));
        assert!(texts[6].contains("[:FROM]"));
        assert!(texts[7].contains("[:TO]"));
        // DF for both infer_df types, merge, delete parallel
        assert!(texts[8].contains("MATCH (n:Entity:Order)"));
        assert!(texts[9].contains("MATCH (n:Entity:OrderLine)"));
        assert!(texts[10].contains("count: size(rels)"));
        assert!(texts[11].contains("entityType: \"OrderLine\""));
        assert!(texts[11].contains("entityType: \"Order\""));
        assert!(texts[12].contains("entityType: \"Product\""));
        assert_eq!(texts.len(), 13);

        assert!(!tracker.steps().is_empty());
    }

    #[tokio::test]
    async fn test_node_type_filter() {
        let header = header();
        let transport = DryRunTransport::new();
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");
        let only_orders = ["Order".to_string()];
        EkgBuilder::new(&connection, &header)
            .create_nodes_by_records(Some(&only_orders))
            .await
            .unwrap();
        assert_eq!(transport.texts().len(), 2);
        assert!(transport.texts()[0].contains("Entity:Order"));
    }

    #[tokio::test]
    async fn test_df_edges_for_reified_relations_with_duration() {
        let mut header = header();
        header.relations[0].infer_df = true;
        let transport = DryRunTransport::new();
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");
        EkgBuilder::new(&connection, &header)
            .add_duration(true)
            .create_df_edges(None, DEFAULT_EVENT_LABEL)
            .await
            .unwrap();

        let texts = transport.texts();
        assert_eq!(texts.len(), 3);
        assert!(texts[0].contains("MATCH (n:Entity:Order)"));
        assert!(texts[1].contains("MATCH (n:Entity:OrderLine)"));
        assert!(texts[2].contains("MATCH (n:PLACED_BY) <-[:CORR]- (e:Event)"));
        assert!(texts[2].contains("entityType: \"PLACED_BY\""));
        assert!(texts.iter().all(|text| text.contains("SET df.duration")));

        let transport = DryRunTransport::new();
        let connection = DatabaseConnection::new(transport.clone(), "neo4j");
        let only_relation = ["PLACED_BY".to_string()];
        EkgBuilder::new(&connection, &header)
            .create_df_edges(Some(&only_relation), DEFAULT_EVENT_LABEL)
            .await
            .unwrap();
        let texts = transport.texts();
        assert_eq!(texts.len(), 1);
        assert!(!texts[0].contains("duration"));
    }

    #[test]
    fn test_parent_node_types() {
        let header = header();
        let parents = parent_node_types(header.entity("OrderLine").unwrap());
        assert_eq!(parents, vec!["Order", "Product"]);
    }
}
