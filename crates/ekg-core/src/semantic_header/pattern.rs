//! Node, relationship and property patterns
//!
//! Patterns are written in a Cypher-like notation inside the semantic header,
//! e.g. `(e:Event {activity: record.activity})` or
//! `(a:Book) - [r:WRITTEN_BY] -> (b:Author)`, and render back to Cypher.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static NODE_IN_RELATIONSHIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\([^()<>]*\)").expect("valid regex")
});

static RELATION_IN_RELATIONSHIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\[\]<>]*\]").expect("valid regex")
});

static WHERE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+WHERE\s+").expect("valid regex")
});

/// Split `labels WHERE condition` on the first standalone `WHERE` keyword
pub(crate) fn split_where(text: &str) -> Option<(&str, &str)> {
    WHERE_KEYWORD
        .find(text)
        .map(|keyword| (&text[..keyword.start()], text[keyword.end()..].trim()))
}

/// The property after an `OPTIONAL ` marker, `None` for required properties
pub(crate) fn strip_optional(property: &str) -> Option<&str> {
    let rest = property.trim().strip_prefix("OPTIONAL")?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim_start())
}

fn invalid(pattern: &str, message: impl Into<String>) -> Error {
    Error::InvalidPattern {
        pattern: pattern.to_string(),
        message: message.into(),
    }
}

/// A `key: value` pair inside a node pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub attribute: String,
    pub value: String,
    /// `record` in `id: record.orderId`
    pub ref_node: Option<String>,
    /// `orderId` in `id: record.orderId`
    pub ref_attribute: Option<String>,
}

impl Property {
    /// Parse `attribute: value` or `attribute = value`
    pub fn parse(description: &str) -> Result<Self> {
        let (attribute, value) = description
            .split_once(':')
            .or_else(|| description.split_once('='))
            .ok_or_else(|| invalid(description, "a property needs ':' or '='"))?;
        let attribute = attribute.trim().to_string();
        let value = value.trim().to_string();
        if attribute.is_empty() {
            return Err(invalid(description, "a property needs a name"));
        }

        let (ref_node, ref_attribute) = match value.split_once('.') {
            Some((node, attribute)) => (Some(node.to_string()), Some(attribute.to_string())),
            None => (None, None),
        };

        Ok(Self {
            attribute,
            value,
            ref_node,
            ref_attribute,
        })
    }

    /// `attribute: value`
    pub fn pattern(&self) -> String {
        format!("{}: {}", self.attribute, self.value)
    }

    /// Assignment form; with a node name existing values are kept
    pub fn set_pattern(&self, node_name: Option<&str>) -> String {
        match node_name {
            None => format!("{} = {}", self.attribute, self.value),
            Some(name) => format!(
                "{name}.{attr} = COALESCE({name}.{attr}, {value})",
                name = name,
                attr = self.attribute,
                value = self.value
            ),
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern())
    }
}

/// Rendering switches for [`NodePattern::render`]
#[derive(Debug, Clone, Copy)]
pub struct NodeRender<'a> {
    /// Use this variable name instead of the pattern's own
    pub name: Option<&'a str>,
    pub with_brackets: bool,
    pub with_properties: bool,
    /// Exclude nodes carrying this label (`n:A&B&!Forbidden`)
    pub forbidden_label: Option<&'a str>,
}

impl Default for NodeRender<'_> {
    fn default() -> Self {
        Self {
            name: None,
            with_brackets: false,
            with_properties: true,
            forbidden_label: None,
        }
    }
}

/// `(name:Label1:Label2 {prop: value, OPTIONAL prop2: value})` or
/// `(name:Label WHERE condition)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePattern {
    pub name: String,
    pub labels: Vec<String>,
    pub required_properties: Vec<Property>,
    pub optional_properties: Vec<Property>,
    pub where_condition: String,
}

impl NodePattern {
    pub fn parse(description: &str) -> Result<Self> {
        let stripped: String = description.chars().filter(|c| *c != '(' && *c != ')').collect();
        let (name, rest) = match stripped.split_once(':') {
            Some((name, rest)) => (name.trim().to_string(), Some(rest.replace('\'', "\""))),
            None => (stripped.trim().to_string(), None),
        };

        let mut labels = String::new();
        let mut where_condition = String::new();
        let mut required_properties = Vec::new();
        let mut optional_properties = Vec::new();

        if let Some(rest) = rest {
            if let Some((label_part, condition)) = split_where(&rest) {
                labels = label_part.to_string();
                where_condition = condition.to_string();
            } else if let Some((label_part, properties)) = rest.split_once(" {") {
                labels = label_part.to_string();
                for property in properties.replace('}', "").split(',') {
                    if property.trim().is_empty() {
                        continue;
                    }
                    match strip_optional(property) {
                        Some(optional) => optional_properties.push(Property::parse(optional)?),
                        None => required_properties.push(Property::parse(property)?),
                    }
                }
            } else {
                labels = rest;
            }
        }

        Ok(Self {
            name,
            labels: labels
                .trim()
                .split(':')
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(str::to_string)
                .collect(),
            required_properties,
            optional_properties,
            where_condition,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `(name)`
    pub fn bracketed_name(&self) -> String {
        format!("({})", self.name)
    }

    /// Labels joined by `:`
    pub fn label_str(&self) -> String {
        self.labels.join(":")
    }

    /// Labels as a Cypher list literal, `["A","B"]`
    pub fn label_list(&self) -> String {
        let quoted: Vec<String> = self.labels.iter().map(|l| format!("\"{}\"", l)).collect();
        format!("[{}]", quoted.join(","))
    }

    /// Property map (`{a: x}`) when properties exist, else `WHERE condition`
    pub fn condition_string(&self, with_brackets: bool, with_where: bool) -> String {
        if !self.required_properties.is_empty() {
            let properties: Vec<String> = self.required_properties.iter().map(Property::pattern).collect();
            let properties = properties.join(", ");
            if with_brackets {
                format!("{{{}}}", properties)
            } else {
                properties
            }
        } else if !self.where_condition.is_empty() {
            if with_where {
                format!("WHERE {}", self.where_condition)
            } else {
                self.where_condition.clone()
            }
        } else {
            String::new()
        }
    }

    /// `name:Labels {props}`
    pub fn pattern(&self) -> String {
        self.render(NodeRender::default())
    }

    /// Pattern with a different variable name
    pub fn pattern_named(&self, name: &str) -> String {
        self.render(NodeRender {
            name: Some(name),
            ..NodeRender::default()
        })
    }

    pub fn render(&self, options: NodeRender<'_>) -> String {
        let name = options.name.unwrap_or(&self.name);
        let mut pattern = if self.labels.is_empty() {
            name.to_string()
        } else {
            match options.forbidden_label {
                Some(forbidden) => format!("{}:{}&!{}", name, self.labels.join("&"), forbidden),
                None => format!("{}:{}", name, self.label_str()),
            }
        };

        if options.with_properties {
            let condition = self.condition_string(true, true);
            if !condition.is_empty() {
                pattern = format!("{} {}", pattern, condition);
            }
        }

        if options.with_brackets {
            format!("({})", pattern)
        } else {
            pattern
        }
    }
}

impl fmt::Display for NodePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.render(NodeRender {
                with_brackets: true,
                ..NodeRender::default()
            })
        )
    }
}

/// `(a:A) - [r:TYPE] -> (b:B)`; `<-` reverses, no arrow is undirected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipPattern {
    pub name: String,
    pub types: Vec<String>,
    pub from_node: NodePattern,
    pub to_node: NodePattern,
    pub has_direction: bool,
}

impl RelationshipPattern {
    pub fn parse(description: &str) -> Result<Self> {
        let nodes: Vec<&str> = NODE_IN_RELATIONSHIP
            .find_iter(description)
            .map(|m| m.as_str())
            .collect();
        if nodes.len() != 2 {
            return Err(invalid(
                description,
                format!("a relationship needs two nodes, found {}", nodes.len()),
            ));
        }

        let relation = RELATION_IN_RELATIONSHIP
            .find(description)
            .ok_or_else(|| invalid(description, "a relationship needs a [name:TYPE] part"))?
            .as_str()
            .trim_start_matches('[')
            .trim_end_matches(']');
        let (name, types) = match relation.split_once(':') {
            Some((name, types)) => (
                name.trim().to_string(),
                types
                    .split(':')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            None => (relation.trim().to_string(), Vec::new()),
        };

        let (from, to, has_direction) = if description.contains('>') {
            (0, 1, true)
        } else if description.contains('<') {
            (1, 0, true)
        } else {
            (0, 1, false)
        };

        Ok(Self {
            name,
            types,
            from_node: NodePattern::parse(nodes[from])?,
            to_node: NodePattern::parse(nodes[to])?,
            has_direction,
        })
    }

    /// The first type, used when creating the relationship
    pub fn relation_type(&self) -> &str {
        self.types.first().map(String::as_str).unwrap_or_default()
    }

    /// All types joined by `:`
    pub fn types_str(&self) -> String {
        self.types.join(":")
    }

    /// `name:TYPE`, optionally wrapped in brackets
    pub fn pattern(&self, name: Option<&str>, with_brackets: bool) -> String {
        let name = name.unwrap_or(&self.name);
        let pattern = if self.relation_type().is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", name, self.relation_type())
        };
        if with_brackets {
            format!("[{}]", pattern)
        } else {
            pattern
        }
    }

    /// The full path pattern including both nodes
    pub fn path_pattern(&self) -> String {
        let arrow = if self.has_direction { "->" } else { "-" };
        format!(
            "({}) - [{}] {} ({})",
            self.from_node.pattern(),
            self.pattern(None, false),
            arrow,
            self.to_node.pattern()
        )
    }
}

impl fmt::Display for RelationshipPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_pattern())
    }
}

/// The record a constructor starts from: a node or a relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPattern {
    Node(NodePattern),
    Relationship(RelationshipPattern),
}

impl RecordPattern {
    /// A description with a `-` is a relationship, anything else a node
    pub fn parse(description: &str) -> Result<Self> {
        if description.contains('-') {
            RelationshipPattern::parse(description).map(Self::Relationship)
        } else {
            NodePattern::parse(description).map(Self::Node)
        }
    }

    /// Cypher pattern using `name` as the record variable
    pub fn pattern(&self, name: &str, forbidden_label: Option<&str>) -> String {
        match self {
            Self::Node(node) => node.render(NodeRender {
                name: Some(name),
                forbidden_label,
                ..NodeRender::default()
            }),
            Self::Relationship(relationship) => relationship.path_pattern(),
        }
    }

    pub fn label_str(&self) -> String {
        match self {
            Self::Node(node) => node.label_str(),
            Self::Relationship(relationship) => relationship.types_str(),
        }
    }

    pub fn labels(&self) -> &[String] {
        match self {
            Self::Node(node) => &node.labels,
            Self::Relationship(relationship) => &relationship.types,
        }
    }
}
