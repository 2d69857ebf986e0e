//! Process discovery queries

use super::Query;
use crate::semantic_header::ConstructedNodes;

const AGGREGATE_DF: &str = "
    MATCH (c1:Activity) -[:OBSERVED]-> (e1:Event)
        -[df:$df_label {entityType: $entity_type}]->
        (e2:Event) <-[:OBSERVED]- (c2:Activity)
    $classifier_self_loops
    WITH c1, count(df) AS df_freq, c2
    MERGE (c1) -[rel2:$df_a_label {entityType: $entity_type, type: 'DF_A'}]-> (c2)
    ON CREATE SET rel2.count = df_freq
";

const AGGREGATE_DF_WITH_THRESHOLD: &str = "
    MATCH (c1:Activity) -[:OBSERVED]-> (e1:Event)
        -[df:$df_label {entityType: $entity_type}]->
        (e2:Event) <-[:OBSERVED]- (c2:Activity)
    MATCH (e1) -[:CORR]-> (n) <-[:CORR]- (e2)
    $classifier_self_loops
    WITH c1, count(df) AS df_freq, c2
    WHERE df_freq > $df_threshold
    OPTIONAL MATCH (c2) -[:OBSERVED]-> (e2b:Event)
        -[df2:$df_label {entityType: $entity_type}]->
        (e1b:Event) <-[:OBSERVED]- (c1)
    WITH c1, df_freq, count(df2) AS df_freq2, c2
    WHERE $relative_df_threshold = 0 OR df_freq * $relative_df_threshold > df_freq2
    MERGE (c1) -[rel2:$df_a_label {entityType: $entity_type, type: 'DF_A'}]-> (c2)
    ON CREATE SET rel2.count = df_freq
";

/// How DF edges between events are aggregated into DF edges between activities
#[derive(Debug, Clone, PartialEq)]
pub struct DfAggregation {
    /// Put the node type into the aggregated edge label
    pub include_label_in_df_a: bool,
    /// Keep only activity pairs followed more often than this
    pub df_threshold: u64,
    /// Drop a pair when its reverse is at least this fraction as frequent; 0 disables the check
    pub relative_df_threshold: f64,
    pub exclude_self_loops: bool,
}

impl Default for DfAggregation {
    fn default() -> Self {
        Self {
            include_label_in_df_a: true,
            df_threshold: 0,
            relative_df_threshold: 0.0,
            exclude_self_loops: true,
        }
    }
}

impl DfAggregation {
    fn uses_threshold(&self) -> bool {
        self.df_threshold > 0 || self.relative_df_threshold > 0.0
    }
}

/// Aggregate the DF edges of a node type into a DF process model over activities
pub fn aggregate_df_relations(entity: &ConstructedNodes, aggregation: &DfAggregation) -> Query {
    let self_loops = if aggregation.exclude_self_loops { "WHERE c1 <> c2" } else { "" };
    let substitutions = [
        ("df_label", entity.df_label()),
        ("df_a_label", entity.df_a_label(aggregation.include_label_in_df_a)),
        ("classifier_self_loops", self_loops.to_string()),
    ];
    let substitutions: Vec<(&str, &str)> = substitutions
        .iter()
        .map(|(name, value)| (*name, value.as_str()))
        .collect();

    let query = if aggregation.uses_threshold() {
        Query::from_template(AGGREGATE_DF_WITH_THRESHOLD, &substitutions)
            .with_parameter("df_threshold", aggregation.df_threshold)
            .with_parameter("relative_df_threshold", aggregation.relative_df_threshold)
    } else {
        Query::from_template(AGGREGATE_DF, &substitutions)
    };
    query.with_parameter("entity_type", entity.node_type.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic_header::SemanticHeader;
    use serde_json::json;

    fn orders(include_label_in_df: bool) -> ConstructedNodes {
        let header = SemanticHeader::from_value(json!({
            "name": "orders",
            "nodes": [{
                "type": "Order",
                "infer_df": true,
                "include_label_in_df": include_label_in_df,
                "constructor": {
                    "prevalent_record": "(record:OrderRecord)",
                    "result": "(o:Entity:Order {sysId: record.orderId})"
                }
            }]
        }))
        .unwrap();
        header.nodes[0].clone()
    }

    #[test]
    fn test_aggregate_without_threshold() {
        let query = aggregate_df_relations(&orders(true), &DfAggregation::default());
        assert!(query.text.contains("-[df:DF_ORDER {entityType: $entity_type}]->"));
        assert!(query.text.contains("-[rel2:DF_A_ORDER {entityType: $entity_type, type: 'DF_A'}]->"));
        assert!(query.text.contains("WHERE c1 <> c2"));
        assert!(!query.text.contains("df_freq2"));
        assert_eq!(query.parameters["entity_type"], json!("Order"));
        assert!(!query.parameters.contains_key("df_threshold"));
    }

    #[test]
    fn test_aggregate_with_threshold_keeps_self_loops() {
        let aggregation = DfAggregation {
            include_label_in_df_a: false,
            df_threshold: 5,
            relative_df_threshold: 0.5,
            exclude_self_loops: false,
        };
        let query = aggregate_df_relations(&orders(false), &aggregation);
        assert!(query.text.contains("-[df:DF {entityType: $entity_type}]->"));
        assert!(query.text.contains("-[rel2:DF_A {entityType: $entity_type, type: 'DF_A'}]->"));
        assert!(query.text.contains("WHERE df_freq > $df_threshold"));
        assert!(query.text.contains("(e1b:Event) <-[:OBSERVED]- (c1)"));
        assert!(!query.text.contains("c1 <> c2"));
        assert_eq!(query.parameters["df_threshold"], json!(5));
        assert_eq!(query.parameters["relative_df_threshold"], json!(0.5));
    }
}
