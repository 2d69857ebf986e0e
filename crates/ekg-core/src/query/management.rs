//! Database administration and statistics queries

use super::Query;

const ALL_REL_TYPES: &str = "MATCH () - [rel] - () RETURN DISTINCT type(rel) AS rel_type";

const ALL_NODE_LABELS: &str = "MATCH (n) RETURN DISTINCT labels(n) AS label";

const REPLACE_DATABASE: &str = "
    CREATE OR REPLACE DATABASE $db_name
    WAIT
";

const DELETE_RELATIONSHIPS: &str = "
    CALL apoc.periodic.iterate(
        'MATCH () - [r] -> () RETURN r',
        'DELETE r',
        {batchSize: $batch_size, parallel: false})
";

const DELETE_NODES: &str = "
    CALL apoc.periodic.iterate(
        'MATCH (n) RETURN n',
        'DETACH DELETE n',
        {batchSize: $batch_size, parallel: false})
";

const SYS_ID_INDEX: &str = "CREATE INDEX entity_sys_id_index IF NOT EXISTS FOR (n:Entity) ON (n.sysId)";

const UNIQUE_EVENT_ID: &str = "
    CREATE CONSTRAINT unique_event_ids IF NOT EXISTS
    FOR (e:Event) REQUIRE e.ID IS UNIQUE
";

const NODE_COUNT: &str = "
    MATCH (n)
    WITH n, CASE labels(n)[0]
        WHEN 'Event' THEN 0
        WHEN 'Entity' THEN 1
        WHEN 'Class' THEN 2
        WHEN 'Log' THEN 3
        ELSE 4
    END AS sortOrder
    WITH labels(n)[0] AS label, count(n) AS numberOfNodes, sortOrder
    RETURN label, numberOfNodes ORDER BY sortOrder
";

const AGGREGATED_EDGE_COUNT: &str = "
    MATCH () - [r] -> ()
    WHERE r.type IS NOT NULL
    WITH r, CASE toUpper(r.type)
        WHEN 'REL' THEN 0
        WHEN 'DF' THEN 1
        ELSE 2
    END as sortOrder
    WITH toUpper(r.type) as aggType, count(r) as aggNumberOfRelations, sortOrder
    RETURN aggType, aggNumberOfRelations ORDER BY sortOrder
";

const EDGE_COUNT: &str = "
    MATCH () - [r] -> ()
    WITH r, CASE type(r)
        WHEN 'CORR' THEN 0
        WHEN 'OBSERVED' THEN 1
        WHEN 'HAS' THEN 2
        ELSE 3
    END as sortOrder
    WITH type(r) as type, count(r) as numberOfRelations, sortOrder
    RETURN type, numberOfRelations ORDER BY sortOrder
";

pub fn all_rel_types() -> Query {
    Query::new(ALL_REL_TYPES)
}

pub fn all_node_labels() -> Query {
    Query::new(ALL_NODE_LABELS)
}

/// Drop and recreate the database; runs against `system`
pub fn replace_database(db_name: &str) -> Query {
    Query::from_template(REPLACE_DATABASE, &[("db_name", db_name)]).on_database("system")
}

pub fn delete_relationships(batch_size: usize) -> Query {
    Query::new(DELETE_RELATIONSHIPS).with_parameter("batch_size", batch_size)
}

pub fn delete_nodes(batch_size: usize) -> Query {
    Query::new(DELETE_NODES).with_parameter("batch_size", batch_size)
}

pub fn sys_id_index() -> Query {
    Query::new(SYS_ID_INDEX)
}

pub fn unique_event_id_constraint() -> Query {
    Query::new(UNIQUE_EVENT_ID)
}

pub fn node_count() -> Query {
    Query::new(NODE_COUNT)
}

pub fn aggregated_edge_count() -> Query {
    Query::new(AGGREGATED_EDGE_COUNT)
}

pub fn edge_count() -> Query {
    Query::new(EDGE_COUNT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_database_targets_system() {
        let query = replace_database("orders");
        assert!(query.text.contains("CREATE OR REPLACE DATABASE orders"));
        assert_eq!(query.database.as_deref(), Some("system"));
    }

    #[test]
    fn test_clear_queries_are_batched() {
        assert!(delete_relationships(1000).text.contains("DELETE r"));
        assert!(delete_nodes(1000).text.contains("DETACH DELETE n"));
        assert_eq!(delete_nodes(1000).parameters["batch_size"], 1000);
    }

    #[test]
    fn test_count_queries_return_named_columns() {
        assert!(node_count().text.contains("RETURN label, numberOfNodes"));
        assert!(edge_count().text.contains("RETURN type, numberOfRelations"));
        assert!(aggregated_edge_count().text.contains("RETURN aggType, aggNumberOfRelations"));
    }
}
