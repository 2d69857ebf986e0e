//! Record, node and relation constructors

use std::collections::BTreeSet;

use super::pattern::{NodePattern, Property, RecordPattern, RelationshipPattern, split_where, strip_optional};
use crate::error::{Error, Result};

/// Labels records receive when their required attributes are present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordConstructor {
    pub node_name: String,
    /// `(record:Record [WHERE condition])`
    pub prevalent_record: NodePattern,
    pub record_labels: Vec<String>,
    pub required_attributes: Vec<String>,
    pub optional_attributes: Vec<String>,
}

impl RecordConstructor {
    /// Parse `(name:Label1:Label2 [WHERE condition] {a, b, OPTIONAL c})`
    pub fn parse(description: &str) -> Result<Self> {
        let stripped: String = description.chars().filter(|c| *c != '(' && *c != ')').collect();
        let (name, rest) = stripped.split_once(':').ok_or_else(|| Error::InvalidPattern {
            pattern: description.to_string(),
            message: "a record constructor needs labels".to_string(),
        })?;
        let node_name = match name.trim() {
            "" => "record".to_string(),
            name => name.to_string(),
        };
        let rest = rest.trim();

        let (head, properties) = match rest.split_once('{') {
            Some((head, properties)) => (head, properties.replace('}', "")),
            None => (rest, String::new()),
        };
        let (labels, condition) = match split_where(head) {
            Some((labels, condition)) => (labels, Some(condition)),
            None => (head, None),
        };

        let record_labels: Vec<String> = labels
            .replace(' ', "")
            .split(':')
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .collect();
        if record_labels.is_empty() {
            return Err(Error::InvalidPattern {
                pattern: description.to_string(),
                message: "a record constructor needs labels".to_string(),
            });
        }

        let prevalent_record = match condition {
            Some(condition) if !condition.is_empty() => {
                NodePattern::parse(&format!("({}:Record WHERE {})", node_name, condition))?
            }
            _ => NodePattern::parse(&format!("({}:Record)", node_name))?,
        };

        let mut required_attributes = Vec::new();
        let mut optional_attributes = Vec::new();
        for property in properties.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match strip_optional(property) {
                Some(optional) => optional_attributes.push(optional.to_string()),
                None => required_attributes.push(property.to_string()),
            }
        }

        Ok(Self {
            node_name,
            prevalent_record,
            record_labels,
            required_attributes,
            optional_attributes,
        })
    }

    /// Labels joined by `:`
    pub fn record_labels_pattern(&self) -> String {
        self.record_labels.join(":")
    }

    pub fn label_list(&self) -> String {
        let quoted: Vec<String> = self.record_labels.iter().map(|l| format!("\"{}\"", l)).collect();
        format!("[{}]", quoted.join(","))
    }

    pub fn prevalent_record_pattern(&self, record_name: &str) -> String {
        self.prevalent_record.pattern_named(record_name)
    }

    /// WHERE condition of the prevalent record, empty when unconditioned
    pub fn where_condition(&self) -> &str {
        &self.prevalent_record.where_condition
    }

    pub fn required_attributes_not_null(&self, record_name: &str) -> String {
        self.required_attributes
            .iter()
            .map(|attribute| format!("{}.{} IS NOT NULL", record_name, attribute))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// A relationship inferred between an event and a newly created node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredRelationship {
    pub event: NodePattern,
    pub record_labels: Vec<String>,
    pub relation_type: String,
}

impl InferredRelationship {
    pub fn labels_str(&self) -> String {
        self.record_labels.join(":")
    }
}

/// One way of creating nodes of a node type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConstructor {
    pub prevalent_record: Option<RecordPattern>,
    pub node: Option<NodePattern>,
    pub relation: Option<RelationshipPattern>,
    pub result: NodePattern,
    pub set_labels: Option<String>,
    pub infer_observed: bool,
    pub infer_corr_from_event_record: bool,
    pub infer_corr_from_entity_record: bool,
    pub infer_corr_from_reified_parents: bool,
    pub inferred_relationships: Vec<InferredRelationship>,
    pub event_label: String,
    pub corr_type: String,
    pub infer_reified_relation: bool,
}

impl NodeConstructor {
    pub fn constructed_by_record(&self) -> bool {
        self.prevalent_record.is_some()
    }

    pub fn constructed_by_node(&self) -> bool {
        self.node.is_some()
    }

    pub fn constructed_by_relation(&self) -> bool {
        self.relation.is_some()
    }

    pub fn label_string(&self) -> String {
        self.result.label_str()
    }

    /// Result labels as quoted, comma separated names
    pub fn labels(&self) -> String {
        self.result
            .labels
            .iter()
            .map(|label| format!("\"{}\"", label))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn prevalent_record_pattern(&self, node_name: &str, forbidden_label: Option<&str>) -> String {
        self.prevalent_record
            .as_ref()
            .map(|record| record.pattern(node_name, forbidden_label))
            .unwrap_or_else(|| node_name.to_string())
    }

    /// Record attributes referenced by the result's identifying properties
    pub fn keys(&self) -> Vec<&str> {
        self.result
            .required_properties
            .iter()
            .filter(|property| property.ref_node.is_some())
            .filter_map(|property| property.ref_attribute.as_deref())
            .collect()
    }

    /// Checks that every key is present and known on the record
    pub fn where_condition(&self, node_name: &str, include_start_and: bool) -> String {
        let condition = self
            .keys()
            .iter()
            .map(|key| format!("{n}.{k} IS NOT NULL AND {n}.{k} <> \"Unknown\"", n = node_name, k = key))
            .collect::<Vec<_>>()
            .join(" AND ");
        if !condition.is_empty() && include_start_and {
            format!("AND {}", condition)
        } else {
            condition
        }
    }

    /// `SET` body for optional result properties
    pub fn set_result_properties_query(&self) -> Option<String> {
        if self.result.optional_properties.is_empty() {
            return None;
        }
        Some(
            self.result
                .optional_properties
                .iter()
                .map(|property| property.set_pattern(Some(&self.result.name)))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn idt_properties_query(&self, node_name: &str) -> String {
        self.result
            .required_properties
            .iter()
            .map(|property| format!("{}.{a} as {a}", node_name, a = property.attribute))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn set_result_labels_query(&self) -> Option<String> {
        self.set_labels
            .as_ref()
            .map(|labels| format!("{}:{}", self.result.name, labels))
    }

    /// Identified nodes are merged; nodes without identifying properties are created per record
    pub fn merges(&self) -> bool {
        !self.result.required_properties.is_empty()
    }
}

/// A node type of the graph with its constructors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructedNodes {
    pub node_type: String,
    pub constructors: Vec<NodeConstructor>,
    pub infer_df: bool,
    pub include_label_in_df: bool,
    pub merge_duplicate_df: bool,
    pub delete_parallel_df: bool,
}

impl ConstructedNodes {
    pub fn label_string(&self) -> String {
        match self.constructors.first() {
            Some(constructor) => constructor.label_string(),
            None => self.node_type.clone(),
        }
    }

    /// Distinct correlation types of all constructors, as `A|B`
    pub fn corr_type_strings(&self) -> String {
        let types: BTreeSet<&str> = self
            .constructors
            .iter()
            .map(|constructor| constructor.corr_type.as_str())
            .collect();
        types.into_iter().collect::<Vec<_>>().join("|")
    }

    pub fn df_label(&self) -> String {
        df_label(&self.node_type, self.include_label_in_df)
    }

    /// Label of the DF edges aggregated between activities
    pub fn df_a_label(&self, include_label: bool) -> String {
        if include_label {
            format!("DF_A_{}", self.node_type.to_uppercase())
        } else {
            "DF_A".to_string()
        }
    }

    pub fn df_entity(&self) -> DfEntity {
        DfEntity {
            entity_type: self.node_type.clone(),
            labels: self.label_string(),
            corr_types: self.corr_type_strings(),
            df_label: self.df_label(),
        }
    }
}

fn df_label(entity_type: &str, include_label: bool) -> String {
    if include_label {
        format!("DF_{}", entity_type.to_uppercase())
    } else {
        "DF".to_string()
    }
}

/// Nodes whose correlated events get directly-follows edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfEntity {
    /// Value of `entityType` on the DF edges
    pub entity_type: String,
    pub labels: String,
    /// Correlation relationship types, as `A|B`
    pub corr_types: String,
    pub df_label: String,
}

/// One way of creating relations of a relation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationConstructor {
    pub prevalent_record: Option<RecordPattern>,
    pub nodes: Vec<NodePattern>,
    pub relations: Vec<RelationshipPattern>,
    pub from_node: NodePattern,
    pub to_node: NodePattern,
    pub result: RelationshipPattern,
    pub optional_properties: Vec<Property>,
    pub model_as_node: bool,
    pub infer_corr_from_reified_parents: bool,
}

impl RelationConstructor {
    pub fn constructed_by_record(&self) -> bool {
        self.prevalent_record.is_some()
    }

    pub fn constructed_by_nodes(&self) -> bool {
        !self.nodes.is_empty()
    }

    pub fn constructed_by_relations(&self) -> bool {
        !self.relations.is_empty()
    }

    pub fn relation_type(&self) -> &str {
        self.result.relation_type()
    }

    pub fn record_labels(&self) -> String {
        self.prevalent_record
            .as_ref()
            .map(RecordPattern::label_str)
            .unwrap_or_default()
    }

    /// `SET` body for properties of the relation bound to `relation_name`
    pub fn set_result_properties_query(&self, relation_name: &str) -> Option<String> {
        if self.optional_properties.is_empty() {
            return None;
        }
        Some(
            self.optional_properties
                .iter()
                .map(|property| format!("{}.{}", relation_name, property.set_pattern(None)))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// One `MATCH` line per antecedent relation
    pub fn relations_query(&self) -> String {
        self.relations
            .iter()
            .map(|relation| format!("MATCH {}", relation.path_pattern()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn from_node_pattern(&self) -> String {
        self.from_node.pattern()
    }

    pub fn to_node_pattern(&self) -> String {
        self.to_node.pattern()
    }
}

/// A relation type of the graph with its constructors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructedRelation {
    pub relation_type: String,
    pub constructors: Vec<RelationConstructor>,
    /// Only honoured for relations modelled as nodes
    pub infer_df: bool,
    pub include_label_in_df: bool,
}

impl ConstructedRelation {
    /// Relations reified as nodes connect through FROM/TO edges
    pub fn model_as_node(&self) -> bool {
        self.constructors.iter().any(|constructor| constructor.model_as_node)
    }

    /// Label of the reified relation nodes
    pub fn label_string(&self) -> String {
        match self.constructors.first() {
            Some(constructor) => constructor.result.types_str(),
            None => self.relation_type.clone(),
        }
    }

    /// Events correlate with reified relations through `CORR`
    pub fn df_entity(&self) -> DfEntity {
        DfEntity {
            entity_type: self.relation_type.clone(),
            labels: self.label_string(),
            corr_types: "CORR".to_string(),
            df_label: df_label(&self.relation_type, self.include_label_in_df),
        }
    }
}
