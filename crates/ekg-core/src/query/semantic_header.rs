//! Queries that build the event knowledge graph from imported records

use super::{Query, substitute};
use crate::semantic_header::{ConstructedNodes, DfEntity, NodeConstructor, RelationConstructor};

const RECORD_NAME: &str = "record";

const CREATE_NODE_BY_RECORD: &str = "
    CALL apoc.periodic.commit(
        'MATCH ($record)
        WHERE NOT record:RecordCreated $conditions
            WITH $record_name limit $limit
            $merge_or_create ($result_node)
            SET $record_name:RecordCreated
            $set_label_str
            $set_property_str
            MERGE (record) <- [:PREVALENCE] - ($result_node_name)
            $infer_corr_str
            $infer_observed_str
            RETURN count(*)',
            {limit: $limit})
";

const INFERRED_RELATIONSHIP: &str = "
            CALL {WITH record, $result_node_name
                MATCH ($event_node) - [:PREVALENCE] -> (record:$record_labels) <- [:PREVALENCE] - ($result_node_name)
                MERGE (event) - [:$relation_type] -> ($result_node_name)}";

const INFER_CORR: &str = "
            WITH record, $result_node_name
            MATCH (event:$event_label) - [:PREVALENCE] -> (record) <- [:PREVALENCE] - ($result_node_name)
            MERGE (event) - [:$corr_type] -> ($result_node_name)";

const INFER_OBSERVED: &str = "
            WITH record, $result_node_name
            MATCH (event:$event_label) - [:PREVALENCE] -> (record) <- [:PREVALENCE] - ($result_node_name)
            CREATE (event) <- [:OBSERVED] - ($result_node_name)";

const RESET_CREATED_RECORD: &str = "
    CALL apoc.periodic.commit(
        'MATCH (record:RecordCreated)
            WITH record limit $limit
            REMOVE record:RecordCreated
            RETURN count(*)',
            {limit: $limit})
";

const MERGE_REIFIED_RELATION: &str = "
            MERGE ($from_node_name) -[:FROM] -> (relation:$relation_label_str) - [:TO] -> ($to_node_name)";

const MERGE_REIFIED_RELATION_WITH_RECORD: &str = "
            MERGE ($from_node_name) -[:FROM] -> (relation:$relation_label_str) - [:TO] -> ($to_node_name)
            MERGE (relation) - [:PREVALENCE] -> (record)";

const MERGE_RELATION: &str = "MERGE ($from_node_name) -[$rel_pattern] -> ($to_node_name)";

const CREATE_RELATION_USING_RECORD: &str = "
    CALL apoc.periodic.commit('
        MATCH (record:$record_labels)
        WHERE NOT record:RecordCreated
        WITH record limit $limit
        MATCH ($from_node) - [:PREVALENCE] -> (record)
        MATCH ($to_node) - [:PREVALENCE] -> (record)
        $merge_str
        $set_property_str
        SET record:RecordCreated
        RETURN COUNT(*)',
        {limit: $limit})
";

const CREATE_RELATION_BY_RELATIONS: &str = "
    CALL apoc.periodic.iterate(
        '$relation_queries
        RETURN distinct $from_node_name, $to_node_name',
        '$merge_str',
        {batchSize: $batch_size})
";

const CREATE_RELATION_BY_NODES: &str = "
    CALL apoc.periodic.iterate(
        'MATCH ($from_node)
        MATCH ($to_node)
        RETURN distinct $from_node_name, $to_node_name',
        '$merge_str',
        {batchSize: $batch_size})
";

const INFER_CORR_FROM_PARENT: &str = "
    CALL apoc.periodic.commit('
        MATCH (e:Event) --> ($node) - [:$from_or_to] - (relation:$relation_label_str)
        WHERE NOT EXISTS ((e) - [:CORR] -> (relation))
        WITH DISTINCT relation, e limit $limit
        MERGE (e) - [:CORR] -> (relation)
        RETURN COUNT(*)',
        {limit: $limit})
";

const CREATE_DIRECTLY_FOLLOWS: &str = "
    CALL apoc.periodic.iterate(
        'MATCH (n:$entity_labels_string) <-[:$corr_type_string]- (e:$event_label)
        WITH n, e as nodes ORDER BY e.timestamp, ID(e)
        WITH n, collect(nodes) as nodeList
        UNWIND range(0, size(nodeList)-2) AS i
        WITH n, nodeList[i] as first, nodeList[i+1] as second
        RETURN first, second',
        'MERGE (first) -[df:$df_entity {entityType: \"$entity_type\"}]->(second)
         SET df.type = \"DF\"$duration_str',
        {batchSize: $batch_size})
";

const DF_DURATION: &str = "
         SET df.duration = duration.inSeconds(first.timestamp, second.timestamp)";

const MERGE_DUPLICATE_DF: &str = "
    MATCH (n1:Event)-[r:$df_entity {entityType: '$entity_type'}]->(n2:Event)
    WITH n1, n2, collect(r) AS rels
    WHERE size(rels) > 1
    UNWIND rels AS r
    DELETE r
    MERGE (n1)-[:$df_entity {entityType: '$entity_type', count: size(rels), type: 'DF'}]->(n2)
";

const DELETE_PARALLEL_DF: &str = "
    MATCH (e1:Event) -[df:DF {entityType: \"$type\"}]-> (e2:Event)
    WHERE (e1:Event) -[:DF {entityType: \"$original_entity_type\"}]-> (e2:Event)
    DELETE df
";

/// Create the result nodes of a record-based node constructor
///
/// Records are marked `RecordCreated` as they are processed so the query
/// can run in limited batches; reset the marker afterwards with
/// [`reset_created_record`].
pub fn create_node_by_record(constructor: &NodeConstructor, batch_size: usize) -> Query {
    let result_node_name = constructor.result.name();
    let mut infer_corr_str = String::new();
    let mut infer_observed_str = "";

    if !constructor.inferred_relationships.is_empty() {
        infer_corr_str.push_str("\n            WITH record, $result_node_name");
        for relationship in &constructor.inferred_relationships {
            infer_corr_str.push_str(&substitute(
                INFERRED_RELATIONSHIP,
                &[
                    ("event_node", &relationship.event.pattern_named("event")),
                    ("record_labels", &relationship.labels_str()),
                    ("relation_type", &relationship.relation_type),
                ],
            ));
        }
    } else if constructor.infer_corr_from_event_record || constructor.infer_corr_from_entity_record {
        infer_corr_str.push_str(INFER_CORR);
    } else if constructor.infer_observed {
        infer_observed_str = INFER_OBSERVED;
    }

    let set_labels = constructor.set_result_labels_query();
    let set_properties = constructor.set_result_properties_query();
    let structure = substitute(
        CREATE_NODE_BY_RECORD,
        &[
            ("merge_or_create", if constructor.merges() { "MERGE" } else { "CREATE" }),
            ("set_label_str", if set_labels.is_some() { "SET $set_labels" } else { "" }),
            ("set_property_str", if set_properties.is_some() { "SET $set_result_properties" } else { "" }),
            ("infer_corr_str", &infer_corr_str),
            ("infer_observed_str", infer_observed_str),
        ],
    );

    Query::from_template(
        &structure,
        &[
            ("record", &constructor.prevalent_record_pattern(RECORD_NAME, Some("RecordCreated"))),
            ("record_name", RECORD_NAME),
            ("conditions", &constructor.where_condition(RECORD_NAME, true)),
            ("result_node", &constructor.result.pattern()),
            ("result_node_name", result_node_name),
            ("set_result_properties", set_properties.as_deref().unwrap_or_default()),
            ("set_labels", set_labels.as_deref().unwrap_or_default()),
            ("corr_type", &constructor.corr_type),
            ("event_label", &constructor.event_label),
        ],
    )
    .with_parameter("limit", batch_size)
}

/// Remove the `RecordCreated` marker from all records
pub fn reset_created_record(batch_size: usize) -> Query {
    Query::new(RESET_CREATED_RECORD).with_parameter("limit", batch_size)
}

fn relation_merge_str(constructor: &RelationConstructor, with_record: bool) -> &'static str {
    match (constructor.model_as_node, with_record) {
        (true, true) => MERGE_REIFIED_RELATION_WITH_RECORD,
        (true, false) => MERGE_REIFIED_RELATION,
        (false, _) => MERGE_RELATION,
    }
}

fn relation_substitutions(constructor: &RelationConstructor) -> Vec<(&'static str, String)> {
    vec![
        ("from_node", constructor.from_node_pattern()),
        ("from_node_name", constructor.from_node.name().to_string()),
        ("to_node", constructor.to_node_pattern()),
        ("to_node_name", constructor.to_node.name().to_string()),
        ("rel_pattern", constructor.result.pattern(Some("relation"), false)),
        ("relation_label_str", constructor.result.types_str()),
        ("record_labels", constructor.record_labels()),
        ("relation_queries", constructor.relations_query()),
        (
            "set_property_str",
            constructor
                .set_result_properties_query("relation")
                .map(|properties| format!("SET {}", properties))
                .unwrap_or_default(),
        ),
    ]
}

fn relation_query(template: &str, constructor: &RelationConstructor, with_record: bool) -> Query {
    let structure = substitute(template, &[("merge_str", relation_merge_str(constructor, with_record))]);
    let substitutions = relation_substitutions(constructor);
    let substitutions: Vec<(&str, &str)> = substitutions
        .iter()
        .map(|(key, value)| (*key, value.as_str()))
        .collect();
    Query::from_template(&structure, &substitutions)
}

/// Relate the nodes that share a prevalent record
pub fn create_relation_using_record(constructor: &RelationConstructor, batch_size: usize) -> Query {
    relation_query(CREATE_RELATION_USING_RECORD, constructor, true).with_parameter("limit", batch_size)
}

/// Relate the end nodes of a chain of existing relations
pub fn create_relation_by_relations(constructor: &RelationConstructor, batch_size: usize) -> Query {
    relation_query(CREATE_RELATION_BY_RELATIONS, constructor, false).with_parameter("batch_size", batch_size)
}

/// Relate every matching pair of from and to nodes
pub fn create_relation_by_nodes(constructor: &RelationConstructor, batch_size: usize) -> Query {
    relation_query(CREATE_RELATION_BY_NODES, constructor, false).with_parameter("batch_size", batch_size)
}

/// Correlate events of a parent node with the reified relation
pub fn infer_corr_from_parent(constructor: &RelationConstructor, use_from: bool, batch_size: usize) -> Query {
    let (node, from_or_to) = if use_from {
        (constructor.from_node_pattern(), "FROM")
    } else {
        (constructor.to_node_pattern(), "TO")
    };
    Query::from_template(
        INFER_CORR_FROM_PARENT,
        &[
            ("node", &node),
            ("from_or_to", from_or_to),
            ("relation_label_str", &constructor.result.types_str()),
        ],
    )
    .with_parameter("limit", batch_size)
}

/// Directly-follows edges between the time-ordered events of each entity
///
/// With `add_duration` each edge also stores the time between its events.
pub fn create_directly_follows(
    entity: &DfEntity,
    event_label: &str,
    add_duration: bool,
    batch_size: usize,
) -> Query {
    let batch_size = batch_size.to_string();
    Query::from_template(
        CREATE_DIRECTLY_FOLLOWS,
        &[
            ("entity_labels_string", &entity.labels),
            ("corr_type_string", &entity.corr_types),
            ("event_label", event_label),
            ("df_entity", &entity.df_label),
            ("entity_type", &entity.entity_type),
            ("duration_str", if add_duration { DF_DURATION } else { "" }),
            ("batch_size", &batch_size),
        ],
    )
}

/// Collapse parallel DF edges of one node type into a single counted edge
pub fn merge_duplicate_df(nodes: &ConstructedNodes) -> Query {
    Query::from_template(
        MERGE_DUPLICATE_DF,
        &[("df_entity", &nodes.df_label()), ("entity_type", &nodes.node_type)],
    )
}

/// Delete DF edges of a derived type that run parallel to DF edges of the original type
pub fn delete_parallel_df(derived_type: &str, original_type: &str) -> Query {
    Query::from_template(
        DELETE_PARALLEL_DF,
        &[("type", derived_type), ("original_entity_type", original_type)],
    )
}
