//! Queries that load records into the graph

use serde_json::Value;

use super::Query;
use crate::dataset::DatetimeObject;

/// Which records a property filter deletes
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyFilter {
    /// Delete records whose value is listed
    Exclude(Vec<Value>),
    /// Delete records whose value is not listed
    Include(Vec<Value>),
    /// Delete records that lack the property
    RequireProperty,
}

const LOAD_CSV: &str = "
    CALL apoc.periodic.iterate(
        'CALL apoc.load.csv($file_name, {nullValues: [\"\"], mapping: $mapping}) YIELD map AS row RETURN row',
        'CREATE (record:$labels) SET record += row SET record.justImported = True',
        {batchSize: $batch_size, parallel: false, retries: 1,
        params: {file_name: $file_name}})
";

const IMPORT_BATCH: &str = "
    UNWIND $batch AS row
    CALL apoc.create.node($labels, row {.*, justImported: true}) YIELD node
    RETURN count(*)
";

const MAKE_TIMESTAMP_DATE: &str = "
    CALL apoc.periodic.iterate(
        'MATCH (e:$labels) WHERE e.$attribute IS NOT NULL AND e.justImported = True
        WITH e, $timezone_dt as timezone_dt
        WITH e, datetime(apoc.date.convertFormat(timezone_dt, $dt_format, $convert_to)) as converted
        RETURN e, converted',
        'SET e.$attribute = converted',
        {batchSize: $batch_size, parallel: false,
        params: {timezone_offset: $timezone_offset, dt_format: $dt_format, convert_to: $convert_to}})
";

const CONVERT_EPOCH: &str = "
    CALL apoc.periodic.iterate(
        'MATCH (e:$labels) WHERE e.$attribute IS NOT NULL AND e.justImported = True
        WITH e, e.$attribute as timezone_dt
        WITH e, apoc.date.format(timezone_dt, $unit, $dt_format) as converted
        RETURN e, converted',
        'SET e.$attribute = converted',
        {batchSize: $batch_size, parallel: false,
        params: {unit: $unit, dt_format: $dt_format}})
";

const FILTER_BY_VALUES: &str = "
    MATCH (e:$labels {justImported: true})
    WHERE $negation e.$prop IN $values
    DETACH DELETE e
";

const FILTER_MISSING_PROPERTY: &str = "
    MATCH (e:$labels {justImported: true})
    WHERE e.$prop IS NULL
    DETACH DELETE e
";

const FINALIZE_IMPORT: &str = "
    CALL apoc.periodic.iterate(
        'MATCH (e:$labels)
        WHERE e.justImported = True
        RETURN e',
        'REMOVE e.justImported',
        {batchSize: $batch_size, parallel: false})
";

/// Create one record per row of a CSV file in the import directory
///
/// The file name travels as a parameter so quotes in it stay literal.
pub fn create_nodes_by_loading_csv(file_name: &str, labels: &str, mapping: &str, batch_size: usize) -> Query {
    let batch_size = batch_size.to_string();
    Query::from_template(
        LOAD_CSV,
        &[("labels", labels), ("mapping", mapping), ("batch_size", &batch_size)],
    )
    .with_parameter("file_name", file_name)
}

/// Create one record per batch row; the row becomes the node's properties
pub fn create_nodes_by_importing_batch(batch: Vec<Value>, labels: &[String]) -> Query {
    Query::new(IMPORT_BATCH)
        .with_parameter("labels", labels.to_vec())
        .with_parameter("batch", batch)
}

/// Parse string timestamps into Cypher datetimes, appending the timezone offset
///
/// Formats such as `yyyy-MM-dd'T'HH:mm:ss` contain quotes, so the format,
/// target and offset are passed as parameters.
pub fn make_timestamp_date(labels: &str, attribute: &str, datetime: &DatetimeObject, batch_size: usize) -> Query {
    let timezone_dt = if datetime.timezone_offset.is_empty() {
        format!("e.{}", attribute)
    } else {
        format!("e.{} + $timezone_offset", attribute)
    };
    let batch_size = batch_size.to_string();
    Query::from_template(
        MAKE_TIMESTAMP_DATE,
        &[
            ("labels", labels),
            ("attribute", attribute),
            ("timezone_dt", &timezone_dt),
            ("batch_size", &batch_size),
        ],
    )
    .with_parameter("timezone_offset", datetime.timezone_offset.clone())
    .with_parameter("dt_format", datetime.format.clone())
    .with_parameter("convert_to", datetime.target_format())
}

/// Format epoch values as strings in the attribute's datetime format
pub fn convert_epoch_to_timestamp(
    labels: &str,
    attribute: &str,
    datetime: &DatetimeObject,
    batch_size: usize,
) -> Query {
    Query::from_template(CONVERT_EPOCH, &[("labels", labels), ("attribute", attribute)])
        .with_parameter("batch_size", batch_size)
        .with_parameter("unit", datetime.unit.clone().unwrap_or_else(|| "ms".to_string()))
        .with_parameter("dt_format", datetime.format.clone())
}

/// Delete freshly imported records according to a property filter
pub fn filter_records_by_property(labels: &str, prop: &str, filter: &PropertyFilter) -> Query {
    match filter {
        PropertyFilter::Exclude(values) => {
            Query::from_template(FILTER_BY_VALUES, &[("labels", labels), ("prop", prop), ("negation", "")])
                .with_parameter("values", values.clone())
        }
        PropertyFilter::Include(values) => {
            Query::from_template(FILTER_BY_VALUES, &[("labels", labels), ("prop", prop), ("negation", "NOT")])
                .with_parameter("values", values.clone())
        }
        PropertyFilter::RequireProperty => {
            Query::from_template(FILTER_MISSING_PROPERTY, &[("labels", labels), ("prop", prop)])
        }
    }
}

/// Clear the marker that identifies records of the running import
pub fn finalize_import(labels: &str, batch_size: usize) -> Query {
    Query::from_template(FINALIZE_IMPORT, &[("labels", labels)]).with_parameter("batch_size", batch_size)
}
