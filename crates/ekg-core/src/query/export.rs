//! Event log export query

use super::Query;
use crate::semantic_header::ConstructedNodes;

const EVENT_LOG: &str = "
    MATCH (e:Event) - [:CORR] -> (n:$node_label)
    RETURN n.sysId as caseId, e.activity as activity, e.timestamp as timestamp $extra_attributes
    ORDER BY n.ID, e.timestamp
";

/// Case id, activity and timestamp for every event of a node type
///
/// Attribute names are spliced into the query as-is and must be valid
/// identifiers.
pub fn event_log(nodes: &ConstructedNodes, extra_attributes: &[String]) -> Query {
    let extra = if extra_attributes.is_empty() {
        String::new()
    } else {
        let attributes: Vec<String> = extra_attributes
            .iter()
            .map(|attribute| format!("e.{a} as {a}", a = attribute))
            .collect();
        format!(", {}", attributes.join(","))
    };
    Query::from_template(
        EVENT_LOG,
        &[("node_label", &nodes.label_string()), ("extra_attributes", &extra)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic_header::SemanticHeader;
    use serde_json::json;

    fn orders() -> ConstructedNodes {
        let header = SemanticHeader::from_value(json!({
            "name": "orders",
            "nodes": [{
                "type": "Order",
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
    fn test_event_log_query() {
        let query = event_log(&orders(), &[]);
        assert!(query.text.contains("(n:Entity:Order)"));
        assert!(query.text.contains("e.timestamp as timestamp \n"));
    }

    #[test]
    fn test_event_log_with_extra_attributes() {
        let query = event_log(&orders(), &["resource".to_string(), "cost".to_string()]);
        assert!(query.text.contains("e.timestamp as timestamp , e.resource as resource,e.cost as cost"));
    }
}
