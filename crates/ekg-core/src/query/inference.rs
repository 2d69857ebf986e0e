//! Queries that infer missing correlations between events and items
//!
//! Items (boxes, pallets, ...) are moved by resources at locations. When an
//! event only correlates with its resource, the item it handled is taken
//! from the closest load event at the same location.

use super::Query;
use crate::semantic_header::ConstructedNodes;

const MATCH_ENTITY_WITH_BATCH_POSITION: &str = "
    MATCH (e:Event) - [:CORR] -> (n:$entity_labels)
    MATCH (e) - [:CORR] -> (bp:$position_labels)
    MERGE (n) - [:AT_POS] -> (bp)
";

const PROPAGATE_DOWNWARDS_ONE_LEVEL: &str = "
    MATCH (f1:Event) - [:CORR] -> (resource:$resource_labels)
    MATCH (f1) <- [:OBSERVED] - (a1:Activity) - [:AT] -> (l:Location)
    MATCH (a1) --> (:EntityType {name: $entity_type})
    WITH f1, resource, l
    CALL {WITH f1, resource, l
        MATCH (f0:Event) <- [:OBSERVED] - (a0:Activity) - [:LOADS] -> (:EntityType {name: $entity_type})
        MATCH (a0) - [:AT] -> (l)
        MATCH (f0) - [:CORR] -> (resource)
        WHERE f0.timestamp <= f1.timestamp
        RETURN f0 as f0_first_prec
        ORDER BY f0.timestamp DESC
        LIMIT 1
    }
    WITH f1, [(f0_first_prec) - [:CORR] -> (n:$entity_labels) | n] as related_n
    FOREACH (n in related_n |
        MERGE (f1) - [:CORR] -> (n)
    )
";

const PROPAGATE_UPWARDS_MULTIPLE_LEVELS: &str = "
    MATCH (f2:Event) - [:CORR] -> (n:$entity_labels)
    MATCH (f2) - [:CORR] -> (resource:$resource_labels)
    MATCH (f2) <- [:OBSERVED] - (a2:Activity) - [:AT] -> (l:Location) - [:PART_OF*0..] -> (k:Location)
    WITH f2, k, resource, n
    CALL {WITH f2, k, resource
        MATCH (f0:Event) <- [:OBSERVED] - (a0:Activity)
        MATCH (a0) - [:$operation_type] -> (:EntityType {name: $entity_type})
        MATCH (a0) - [:AT] -> (k)
        MATCH (f0) - [:CORR] -> (resource)
        WHERE f0.timestamp $comparison f2.timestamp
        RETURN f0 as f0_first
        ORDER BY f0.timestamp $order_type
        LIMIT 1
    }
    MERGE (f0_first) - [:CORR] -> (n)
";

const PROPAGATE_DOWNWARDS_WITH_BATCHING: &str = "
    MATCH (f2:Event) - [:CORR] -> (bp:$position_labels)
    MATCH (f2) - [:CORR] -> (resource:$resource_labels)
    MATCH (f2) <- [:OBSERVED] - (a2:Activity) - [:AT] -> (l:Location) - [:PART_OF*0..] -> (k:Location)
    MATCH (a2) --> (:EntityType {name: $entity_type})
    WITH f2, resource, k, bp
    CALL {WITH f2, resource, k
        MATCH (f0:Event) <- [:OBSERVED] - (a0:Activity) - [:LOADS] -> (:EntityType {name: $entity_type})
        MATCH (a0) - [:AT] -> (k)
        MATCH (f0) - [:CORR] -> (resource)
        WHERE f0.timestamp <= f2.timestamp
        RETURN f0 as f0_first_prec
        ORDER BY f0.timestamp DESC
        LIMIT 1
    }
    WITH f2, [(f0_first_prec) - [:CORR] -> (n:$entity_labels) - [:AT_POS] -> (bp) | n] as related_n
    FOREACH (n in related_n |
        MERGE (f2) - [:CORR] -> (n)
    )
";

/// Whether upward propagation looks for load or unload events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operation {
    /// The last load at or before the event
    #[default]
    Load,
    /// The first unload at or after the event
    Unload,
}

impl Operation {
    fn relation_type(self) -> &'static str {
        match self {
            Self::Load => "LOADS",
            Self::Unload => "UNLOADS",
        }
    }

    fn comparison(self) -> &'static str {
        match self {
            Self::Load => "<=",
            Self::Unload => ">=",
        }
    }

    fn order(self) -> &'static str {
        match self {
            Self::Load => "DESC",
            Self::Unload => "ASC",
        }
    }
}

/// Link each item to the batch positions its events share with it
pub fn match_entity_with_batch_position(entity: &ConstructedNodes, position: &ConstructedNodes) -> Query {
    Query::from_template(
        MATCH_ENTITY_WITH_BATCH_POSITION,
        &[
            ("entity_labels", &entity.label_string()),
            ("position_labels", &position.label_string()),
        ],
    )
}

/// Correlate an event with the item loaded last by its resource at the same location
pub fn propagate_downwards_one_level(entity: &ConstructedNodes, resource: &ConstructedNodes) -> Query {
    Query::from_template(
        PROPAGATE_DOWNWARDS_ONE_LEVEL,
        &[
            ("entity_labels", &entity.label_string()),
            ("resource_labels", &resource.label_string()),
        ],
    )
    .with_parameter("entity_type", entity.node_type.clone())
}

/// Correlate the nearest load (or unload) event at an enclosing location with the item
pub fn propagate_upwards_multiple_levels(
    entity: &ConstructedNodes,
    resource: &ConstructedNodes,
    operation: Operation,
) -> Query {
    Query::from_template(
        PROPAGATE_UPWARDS_MULTIPLE_LEVELS,
        &[
            ("entity_labels", &entity.label_string()),
            ("resource_labels", &resource.label_string()),
            ("operation_type", operation.relation_type()),
            ("comparison", operation.comparison()),
            ("order_type", operation.order()),
        ],
    )
    .with_parameter("entity_type", entity.node_type.clone())
}

/// Like [`propagate_downwards_one_level`] across enclosing locations, restricted
/// to items at the event's batch position
pub fn propagate_downwards_with_batching(
    entity: &ConstructedNodes,
    position: &ConstructedNodes,
    resource: &ConstructedNodes,
) -> Query {
    Query::from_template(
        PROPAGATE_DOWNWARDS_WITH_BATCHING,
        &[
            ("entity_labels", &entity.label_string()),
            ("position_labels", &position.label_string()),
            ("resource_labels", &resource.label_string()),
        ],
    )
    .with_parameter("entity_type", entity.node_type.clone())
}
