//! The shipped dataset description schema

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// JSON Schema for dataset descriptions, shipped as-is
pub const DATASET_DESCRIPTION_SCHEMA: &str =
    include_str!("../../schema/dataset_description.schema.json");

/// Primitive type names JSON Schema understands
pub const JSON_SCHEMA_TYPES: [&str; 7] = [
    "array", "boolean", "integer", "null", "number", "object", "string",
];

/// A construct in the schema itself that a validator cannot honour
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaDefect {
    /// JSON pointer into the schema document
    pub pointer: String,
    pub message: String,
}

/// Parse the shipped schema
pub fn schema_document() -> Result<Value> {
    Ok(serde_json::from_str(DATASET_DESCRIPTION_SCHEMA)?)
}

/// Report schema constructs that are not valid JSON Schema.
///
/// Defects are reported, never corrected: `attributes[].name` is declared
/// with `"type": "str"`, which no validator treats as a constraint.
pub fn schema_defects() -> Result<Vec<SchemaDefect>> {
    let schema = schema_document()?;
    let mut defects = Vec::new();
    collect_defects(&schema, String::new(), &mut defects);
    Ok(defects)
}

fn collect_defects(node: &Value, pointer: String, defects: &mut Vec<SchemaDefect>) {
    let Some(object) = node.as_object() else {
        return;
    };

    if let Some(Value::String(type_name)) = object.get("type") {
        if !JSON_SCHEMA_TYPES.contains(&type_name.as_str()) {
            defects.push(SchemaDefect {
                pointer: format!("{}/type", pointer),
                message: format!(
                    "\"{}\" is not a JSON Schema type (expected one of {})",
                    type_name,
                    JSON_SCHEMA_TYPES.join(", ")
                ),
            });
        }
    }

    for (key, child) in object {
        if child.is_object() {
            collect_defects(child, format!("{}/{}", pointer, escape_pointer(key)), defects);
        }
    }
}

/// Escape a key for use in a JSON pointer (RFC 6901)
pub(crate) fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_parses() {
        let schema = schema_document().unwrap();
        assert_eq!(schema["type"], "array");
        assert!(schema["definitions"]["CsvStructureSpecification"].is_object());
    }

    #[test]
    fn test_attribute_name_defect_is_reported() {
        let defects = schema_defects().unwrap();
        assert_eq!(defects.len(), 1);
        assert_eq!(
            defects[0].pointer,
            "/definitions/AttributeSpec/properties/name/type"
        );
        assert!(defects[0].message.contains("\"str\""));
    }

    #[test]
    fn test_defect_is_not_corrected() {
        let schema = schema_document().unwrap();
        assert_eq!(
            schema["definitions"]["AttributeSpec"]["properties"]["name"]["type"],
            "str"
        );
    }

    #[test]
    fn test_escape_pointer() {
        assert_eq!(escape_pointer("a/b~c"), "a~1b~0c");
    }
}
