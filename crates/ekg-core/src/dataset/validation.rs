//! Structural validation of raw dataset description documents
//!
//! The validator interprets the shipped JSON Schema (`type`, `properties`,
//! `required`, `items`, `minItems`, `uniqueItems` and local `$ref`s) against a
//! `serde_json::Value`. Every violation is collected; validation never stops
//! at the first problem.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::schema::{JSON_SCHEMA_TYPES, escape_pointer, schema_document};
use crate::error::{Error, Result};

/// The schema keyword a document violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemaKeyword {
    Type,
    Required,
    MinItems,
    UniqueItems,
}

impl fmt::Display for SchemaKeyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Type => "type",
            Self::Required => "required",
            Self::MinItems => "minItems",
            Self::UniqueItems => "uniqueItems",
        };
        write!(f, "{}", name)
    }
}

/// A single schema violation inside a dataset description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    /// JSON pointer to the offending value (`""` is the document root)
    pub path: String,
    pub keyword: SchemaKeyword,
    pub message: String,
}

impl SchemaViolation {
    pub fn new(path: impl Into<String>, keyword: SchemaKeyword, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            keyword,
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{} [{}]: {}", path, self.keyword, self.message)
    }
}

/// Validates dataset description documents against the shipped schema
pub struct DescriptionValidator {
    schema: Value,
}

impl DescriptionValidator {
    pub fn new() -> Result<Self> {
        Ok(Self {
            schema: schema_document()?,
        })
    }

    /// Validate a raw document, returning every violation found
    pub fn validate(&self, document: &Value) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        self.check(&self.schema, document, "", &mut violations);
        debug!(violations = violations.len(), "Validated dataset description");
        violations
    }

    /// Validate and turn violations into an error
    pub fn ensure_valid(&self, document: &Value) -> Result<()> {
        let violations = self.validate(document);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::SchemaViolations(violations))
        }
    }

    fn resolve<'a>(&'a self, node: &'a Value) -> &'a Value {
        let mut current = node;
        // Local references only; the schema has no remote ones
        while let Some(reference) = current.get("$ref").and_then(Value::as_str) {
            let Some(pointer) = reference.strip_prefix('#') else {
                break;
            };
            match self.schema.pointer(pointer) {
                Some(target) => current = target,
                None => break,
            }
        }
        current
    }

    fn check(&self, node: &Value, value: &Value, path: &str, out: &mut Vec<SchemaViolation>) {
        let node = self.resolve(node);
        let Some(schema) = node.as_object() else {
            return;
        };

        if let Some(Value::String(expected)) = schema.get("type") {
            if !type_matches(expected, value) {
                out.push(SchemaViolation::new(
                    path,
                    SchemaKeyword::Type,
                    format!("expected {}, found {}", expected, type_name(value)),
                ));
                return;
            }
        }

        match value {
            Value::Object(object) => self.check_object(schema, object, path, out),
            Value::Array(items) => self.check_array(schema, items, path, out),
            _ => {}
        }
    }

    fn check_object(
        &self,
        schema: &Map<String, Value>,
        object: &Map<String, Value>,
        path: &str,
        out: &mut Vec<SchemaViolation>,
    ) {
        if let Some(Value::Array(required)) = schema.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    out.push(SchemaViolation::new(
                        path,
                        SchemaKeyword::Required,
                        format!("missing required property '{}'", name),
                    ));
                }
            }
        }

        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (name, child) in object {
                if let Some(property_schema) = properties.get(name) {
                    let child_path = format!("{}/{}", path, escape_pointer(name));
                    self.check(property_schema, child, &child_path, out);
                }
            }
        }
    }

    fn check_array(
        &self,
        schema: &Map<String, Value>,
        items: &[Value],
        path: &str,
        out: &mut Vec<SchemaViolation>,
    ) {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                out.push(SchemaViolation::new(
                    path,
                    SchemaKeyword::MinItems,
                    format!("expected at least {} item(s), found {}", min, items.len()),
                ));
            }
        }

        if schema.get("uniqueItems").and_then(Value::as_bool) == Some(true) {
            for (index, item) in items.iter().enumerate() {
                if let Some(first) = items[..index].iter().position(|other| other == item) {
                    out.push(SchemaViolation::new(
                        format!("{}/{}", path, index),
                        SchemaKeyword::UniqueItems,
                        format!("duplicate of item {}: {}", first, item),
                    ));
                }
            }
        }

        if let Some(item_schema) = schema.get("items") {
            for (index, item) in items.iter().enumerate() {
                self.check(item_schema, item, &format!("{}/{}", path, index), out);
            }
        }
    }
}

/// An unknown type name (such as `"str"`) places no constraint on the value
fn type_matches(expected: &str, value: &Value) -> bool {
    if !JSON_SCHEMA_TYPES.contains(&expected) {
        return true;
    }
    match expected {
        "array" => value.is_array(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "object" => value.is_object(),
        "string" => value.is_string(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(document: Value) -> Vec<SchemaViolation> {
        DescriptionValidator::new().unwrap().validate(&document)
    }

    #[test]
    fn test_minimal_document_is_valid() {
        let violations = validate(json!([{
            "name": "orders",
            "file_directory": "data",
            "file_names": ["orders.csv"],
            "labels": ["Event"],
            "attributes": [{"name": "code", "columns": [{"name": "raw_code", "dtype": "string"}]}]
        }]));
        assert!(violations.is_empty(), "{:?}", violations);
    }

    #[test]
    fn test_empty_document_is_valid() {
        assert!(validate(json!([])).is_empty());
    }

    #[test]
    fn test_root_must_be_array() {
        let violations = validate(json!({"name": "orders"}));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "");
        assert_eq!(violations[0].keyword, SchemaKeyword::Type);
    }

    #[test]
    fn test_duplicate_file_names_rejected() {
        let violations = validate(json!([{
            "name": "orders",
            "file_names": ["orders.csv", "orders.csv"]
        }]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].keyword, SchemaKeyword::UniqueItems);
        assert_eq!(violations[0].path, "/0/file_names/1");
    }

    #[test]
    fn test_empty_file_names_rejected() {
        let violations = validate(json!([{"file_names": []}]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].keyword, SchemaKeyword::MinItems);
        assert_eq!(violations[0].path, "/0/file_names");
    }

    #[test]
    fn test_dtype_must_be_string() {
        let violations = validate(json!([{
            "attributes": [{"name": "code", "columns": [{"name": "raw_code", "dtype": 5}]}]
        }]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "/0/attributes/0/columns/0/dtype");
        assert_eq!(violations[0].keyword, SchemaKeyword::Type);
        assert!(violations[0].message.contains("expected string"));
    }

    #[test]
    fn test_negative_range_end_accepted() {
        let violations = validate(json!([{
            "attributes": [{
                "name": "code",
                "columns": [{"name": "raw_code", "range_start": 0, "range_end": -1}]
            }]
        }]));
        assert!(violations.is_empty());
    }

    #[test]
    fn test_range_bounds_must_be_integers() {
        let violations = validate(json!([{
            "attributes": [{"name": "code", "columns": [{"name": "raw_code", "range_start": 0.5}]}]
        }]));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("found number"));
    }

    #[test]
    fn test_attribute_name_has_no_type_constraint() {
        let violations = validate(json!([{
            "attributes": [{"name": 42, "columns": []}]
        }]));
        assert!(violations.is_empty());
    }

    #[test]
    fn test_every_violation_is_reported() {
        let violations = validate(json!([
            {"file_names": [], "labels": ["A", "A"], "add_log": "yes"},
            {"name": 3}
        ]));
        let keywords: Vec<_> = violations.iter().map(|v| v.keyword).collect();
        assert_eq!(violations.len(), 4);
        assert!(keywords.contains(&SchemaKeyword::MinItems));
        assert!(keywords.contains(&SchemaKeyword::UniqueItems));
        assert_eq!(
            keywords.iter().filter(|k| **k == SchemaKeyword::Type).count(),
            2
        );
    }

    #[test]
    fn test_violation_display() {
        let violation = SchemaViolation::new("/0/labels", SchemaKeyword::MinItems, "too short");
        assert_eq!(violation.to_string(), "/0/labels [minItems]: too short");
    }
}
