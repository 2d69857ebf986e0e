//! Semantic header
//!
//! The semantic header maps domain concepts onto the graph: which labels
//! records get (`records`), which nodes are derived from records (`nodes`)
//! and which relations connect them (`relations`). Entries are written as
//! Cypher-like patterns and parsed into typed constructors on load.

mod constructors;
mod pattern;

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::dataset::one_or_many;
use crate::error::{Error, Result};

pub use constructors::{
    ConstructedNodes, ConstructedRelation, DfEntity, InferredRelationship, NodeConstructor, RecordConstructor,
    RelationConstructor,
};
pub use pattern::{NodePattern, NodeRender, Property, RecordPattern, RelationshipPattern};

/// A parsed semantic header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticHeader {
    pub name: String,
    pub version: String,
    pub records: Vec<RecordConstructor>,
    pub nodes: Vec<ConstructedNodes>,
    pub relations: Vec<ConstructedRelation>,
}

#[derive(Debug, Deserialize)]
struct RawSemanticHeader {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: Option<Value>,
    #[serde(default, deserialize_with = "one_or_many")]
    records: Vec<RawRecord>,
    #[serde(default, deserialize_with = "one_or_many")]
    nodes: Vec<RawNodes>,
    #[serde(default, deserialize_with = "one_or_many")]
    relations: Vec<RawRelation>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRecord {
    Pattern(String),
    Object {
        prevalent_record: Option<String>,
        record_labels: String,
        #[serde(default)]
        required_attributes: Vec<String>,
        #[serde(default)]
        optional_attributes: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawNodes {
    #[serde(rename = "type")]
    node_type: String,
    include: Option<bool>,
    #[serde(default, deserialize_with = "one_or_many")]
    constructor: Vec<RawNodeConstructor>,
    infer_df: Option<bool>,
    include_label_in_df: Option<bool>,
    merge_duplicate_df: Option<bool>,
    delete_parallel_df: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawNodeConstructor {
    prevalent_record: Option<String>,
    node: Option<String>,
    relation: Option<String>,
    result: String,
    set_labels: Option<String>,
    infer_observed: Option<bool>,
    infer_corr_from_event_record: Option<bool>,
    infer_corr_from_entity_record: Option<bool>,
    infer_corr_from_reified_parents: Option<bool>,
    #[serde(default, deserialize_with = "one_or_many")]
    inferred_relationships: Vec<RawInferredRelationship>,
    event_label: Option<String>,
    corr_type: Option<String>,
    infer_reified_relation: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawInferredRelationship {
    event: Option<String>,
    record_labels: Option<String>,
    relation_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    #[serde(rename = "type")]
    relation_type: String,
    include: Option<bool>,
    #[serde(default, deserialize_with = "one_or_many")]
    constructor: Vec<RawRelationConstructor>,
    infer_df: Option<bool>,
    include_label_in_df: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawRelationConstructor {
    prevalent_record: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    nodes: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    relations: Vec<String>,
    from_node: Option<String>,
    to_node: Option<String>,
    result: String,
    set_optional_properties: Option<String>,
    model_as_node: Option<bool>,
    infer_corr_from_reified_parents: Option<bool>,
}

fn parse_optional<T>(value: Option<&str>, parse: impl Fn(&str) -> Result<T>) -> Result<Option<T>> {
    value.map(parse).transpose()
}

impl TryFrom<RawRecord> for RecordConstructor {
    type Error = Error;

    fn try_from(raw: RawRecord) -> Result<Self> {
        match raw {
            RawRecord::Pattern(description) => RecordConstructor::parse(&description),
            RawRecord::Object {
                prevalent_record,
                record_labels,
                required_attributes,
                optional_attributes,
            } => {
                let prevalent_record =
                    NodePattern::parse(prevalent_record.as_deref().unwrap_or("(record:Record)"))?;
                Ok(RecordConstructor {
                    node_name: prevalent_record.name.clone(),
                    prevalent_record,
                    record_labels: record_labels.split(':').map(str::to_string).collect(),
                    required_attributes,
                    optional_attributes,
                })
            }
        }
    }
}

impl TryFrom<RawInferredRelationship> for InferredRelationship {
    type Error = Error;

    fn try_from(raw: RawInferredRelationship) -> Result<Self> {
        Ok(InferredRelationship {
            event: NodePattern::parse(raw.event.as_deref().unwrap_or("(event:Event)"))?,
            record_labels: raw
                .record_labels
                .as_deref()
                .unwrap_or("EventRecord")
                .split(':')
                .map(str::to_string)
                .collect(),
            relation_type: raw.relation_type.unwrap_or_else(|| "CORR".to_string()),
        })
    }
}

impl TryFrom<RawNodeConstructor> for NodeConstructor {
    type Error = Error;

    fn try_from(raw: RawNodeConstructor) -> Result<Self> {
        Ok(NodeConstructor {
            prevalent_record: parse_optional(raw.prevalent_record.as_deref(), RecordPattern::parse)?,
            node: parse_optional(raw.node.as_deref(), NodePattern::parse)?,
            relation: parse_optional(raw.relation.as_deref(), RelationshipPattern::parse)?,
            result: NodePattern::parse(&raw.result)?,
            set_labels: raw.set_labels,
            infer_observed: raw.infer_observed.unwrap_or(false),
            infer_corr_from_event_record: raw.infer_corr_from_event_record.unwrap_or(false),
            infer_corr_from_entity_record: raw.infer_corr_from_entity_record.unwrap_or(false),
            infer_corr_from_reified_parents: raw.infer_corr_from_reified_parents.unwrap_or(false),
            inferred_relationships: raw
                .inferred_relationships
                .into_iter()
                .map(InferredRelationship::try_from)
                .collect::<Result<_>>()?,
            event_label: raw.event_label.unwrap_or_else(|| "Event".to_string()),
            corr_type: raw.corr_type.unwrap_or_else(|| "CORR".to_string()),
            infer_reified_relation: raw.infer_reified_relation.unwrap_or(false),
        })
    }
}

impl TryFrom<RawNodes> for ConstructedNodes {
    type Error = Error;

    fn try_from(raw: RawNodes) -> Result<Self> {
        let infer_df = raw.infer_df.unwrap_or(false);
        Ok(ConstructedNodes {
            node_type: raw.node_type,
            constructors: raw
                .constructor
                .into_iter()
                .map(NodeConstructor::try_from)
                .collect::<Result<_>>()?,
            infer_df,
            include_label_in_df: infer_df && raw.include_label_in_df.unwrap_or(false),
            merge_duplicate_df: infer_df && raw.merge_duplicate_df.unwrap_or(false),
            delete_parallel_df: infer_df && raw.delete_parallel_df.unwrap_or(false),
        })
    }
}

impl TryFrom<RawRelationConstructor> for RelationConstructor {
    type Error = Error;

    fn try_from(raw: RawRelationConstructor) -> Result<Self> {
        let result = RelationshipPattern::parse(&raw.result)?;
        let from_node = match raw.from_node.as_deref() {
            Some(description) => NodePattern::parse(description)?,
            None => result.from_node.clone(),
        };
        let to_node = match raw.to_node.as_deref() {
            Some(description) => NodePattern::parse(description)?,
            None => result.to_node.clone(),
        };
        let optional_properties = match raw.set_optional_properties.as_deref() {
            Some(properties) => properties
                .split(',')
                .filter(|property| !property.trim().is_empty())
                .map(Property::parse)
                .collect::<Result<_>>()?,
            None => Vec::new(),
        };

        Ok(RelationConstructor {
            prevalent_record: parse_optional(raw.prevalent_record.as_deref(), RecordPattern::parse)?,
            nodes: raw
                .nodes
                .iter()
                .map(|node| NodePattern::parse(node))
                .collect::<Result<_>>()?,
            relations: raw
                .relations
                .iter()
                .map(|relation| RelationshipPattern::parse(relation))
                .collect::<Result<_>>()?,
            from_node,
            to_node,
            result,
            optional_properties,
            model_as_node: raw.model_as_node.unwrap_or(false),
            infer_corr_from_reified_parents: raw.infer_corr_from_reified_parents.unwrap_or(false),
        })
    }
}

impl TryFrom<RawRelation> for ConstructedRelation {
    type Error = Error;

    fn try_from(raw: RawRelation) -> Result<Self> {
        let infer_df = raw.infer_df.unwrap_or(false);
        Ok(ConstructedRelation {
            relation_type: raw.relation_type,
            constructors: raw
                .constructor
                .into_iter()
                .map(RelationConstructor::try_from)
                .collect::<Result<_>>()?,
            infer_df,
            include_label_in_df: infer_df && raw.include_label_in_df.unwrap_or(false),
        })
    }
}

/// Keep entries whose type is listed; `None` keeps everything
fn selected(types: Option<&[String]>, name: &str) -> bool {
    types.is_none_or(|types| types.iter().any(|t| t == name))
}

impl SemanticHeader {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let header = Self::from_json_str(&contents)?;
        info!(
            path = %path.display(),
            name = %header.name,
            records = header.records.len(),
            nodes = header.nodes.len(),
            relations = header.relations.len(),
            "Loaded semantic header"
        );
        Ok(header)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(contents)?;
        Self::from_value(document)
    }

    pub fn from_value(document: Value) -> Result<Self> {
        let raw: RawSemanticHeader = serde_json::from_value(document)
            .map_err(|e| Error::InvalidSemanticHeader(e.to_string()))?;

        let version = match raw.version {
            Some(Value::String(version)) => version,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        let records = raw
            .records
            .into_iter()
            .map(RecordConstructor::try_from)
            .collect::<Result<Vec<_>>>()?;

        let nodes = raw
            .nodes
            .into_iter()
            .filter(|node| node.include.unwrap_or(true))
            .map(ConstructedNodes::try_from)
            .collect::<Result<Vec<_>>>()?;

        let relations = raw
            .relations
            .into_iter()
            .filter(|relation| relation.include.unwrap_or(true))
            .map(ConstructedRelation::try_from)
            .collect::<Result<Vec<_>>>()?;

        debug!(records = records.len(), nodes = nodes.len(), "Parsed semantic header");
        Ok(Self {
            name: raw.name,
            version,
            records,
            nodes,
            relations,
        })
    }

    /// Node type by name
    pub fn entity(&self, node_type: &str) -> Result<&ConstructedNodes> {
        self.nodes
            .iter()
            .find(|node| node.node_type == node_type)
            .ok_or_else(|| Error::EntityNotFound(node_type.to_string()))
    }

    pub fn node_by_record_constructors(&self, node_types: Option<&[String]>) -> Vec<&NodeConstructor> {
        self.nodes
            .iter()
            .filter(|node| selected(node_types, &node.node_type))
            .flat_map(|node| node.constructors.iter())
            .filter(|constructor| constructor.constructed_by_record())
            .collect()
    }

    pub fn relations_constructed_by_record(&self, relation_types: Option<&[String]>) -> Vec<&RelationConstructor> {
        self.relation_constructors(relation_types, RelationConstructor::constructed_by_record)
    }

    pub fn relations_constructed_by_relations(
        &self,
        relation_types: Option<&[String]>,
    ) -> Vec<&RelationConstructor> {
        self.relation_constructors(relation_types, RelationConstructor::constructed_by_relations)
    }

    pub fn relations_constructed_by_nodes(&self, relation_types: Option<&[String]>) -> Vec<&RelationConstructor> {
        self.relation_constructors(relation_types, RelationConstructor::constructed_by_nodes)
    }

    fn relation_constructors(
        &self,
        relation_types: Option<&[String]>,
        by: fn(&RelationConstructor) -> bool,
    ) -> Vec<&RelationConstructor> {
        self.relations
            .iter()
            .filter(|relation| selected(relation_types, &relation.relation_type))
            .flat_map(|relation| relation.constructors.iter())
            .filter(|constructor| by(constructor))
            .collect()
    }

    /// Node types that get directly-follows edges
    pub fn nodes_with_df(&self, node_types: Option<&[String]>) -> Vec<&ConstructedNodes> {
        self.nodes
            .iter()
            .filter(|node| node.infer_df && selected(node_types, &node.node_type))
            .collect()
    }

    /// Relations modelled as nodes that get directly-follows edges
    pub fn relations_with_df(&self, relation_types: Option<&[String]>) -> Vec<&ConstructedRelation> {
        self.relations
            .iter()
            .filter(|relation| relation.infer_df && relation.model_as_node())
            .filter(|relation| selected(relation_types, &relation.relation_type))
            .collect()
    }
}
