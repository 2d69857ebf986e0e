//! Dataset descriptions
//!
//! A dataset description is a JSON array of CSV structure specifications.
//! Loading runs in three stages:
//! 1. structural validation against the shipped JSON Schema
//! 2. parsing into the typed model
//! 3. semantic checks the schema cannot express (unique names, separators,
//!    na-rep column counts, known dtypes)

mod schema;
mod types;
mod validation;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub use schema::{DATASET_DESCRIPTION_SCHEMA, SchemaDefect, schema_defects};
pub use types::{Attribute, Column, CsvStructure, DatetimeObject, Dtype, Sample};
pub(crate) use types::one_or_many;
pub use validation::{DescriptionValidator, SchemaKeyword, SchemaViolation};

/// A validated dataset description
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetDescription {
    pub structures: Vec<CsvStructure>,
}

/// A source column that an attribute needs but a file does not provide
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingSourceColumn {
    pub structure: String,
    pub file_name: String,
    pub attribute: String,
    pub column: String,
}

impl DatasetDescription {
    /// Load and validate a dataset description file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let description = Self::from_json_str(&contents)?;
        info!(
            path = %path.display(),
            structures = description.structures.len(),
            "Loaded dataset description"
        );
        Ok(description)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(contents)?;
        Self::from_value(document)
    }

    pub fn from_value(document: Value) -> Result<Self> {
        DescriptionValidator::new()?.ensure_valid(&document)?;

        let parsed: Vec<CsvStructure> = serde_json::from_value(document)
            .map_err(|e| Error::InvalidDescription(e.to_string()))?;

        let total = parsed.len();
        let structures: Vec<CsvStructure> = parsed
            .into_iter()
            .filter(|structure| structure.include)
            .map(|mut structure| {
                structure.normalize();
                structure
            })
            .collect();
        if structures.len() < total {
            debug!(excluded = total - structures.len(), "Dropped structures with include = false");
        }

        let description = Self { structures };
        description.check_semantics()?;
        Ok(description)
    }

    /// Serialize back into the JSON document form
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.structures)?)
    }

    pub fn structure(&self, name: &str) -> Result<&CsvStructure> {
        self.structures
            .iter()
            .find(|structure| structure.name == name)
            .ok_or_else(|| Error::StructureNotFound(name.to_string()))
    }

    pub fn files(&self) -> Vec<&str> {
        self.structures
            .iter()
            .flat_map(|structure| structure.file_names.iter().map(String::as_str))
            .collect()
    }

    fn check_semantics(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut structure_names = HashSet::new();

        for structure in &self.structures {
            if !structure_names.insert(structure.name.as_str()) {
                problems.push(format!("structure name '{}' is used more than once", structure.name));
            }
            if structure.file_names.is_empty() {
                problems.push(format!(
                    "structure '{}' defines neither file_names nor file_name",
                    structure.name
                ));
            }

            let mut attribute_names = HashSet::new();
            for attribute in &structure.attributes {
                let context = format!("{}.{}", structure.name, attribute.name);
                if !attribute_names.insert(attribute.name.as_str()) {
                    problems.push(format!("attribute '{}' is defined more than once", context));
                }
                if attribute.columns.is_empty() {
                    problems.push(format!("attribute '{}' has no columns", context));
                }
                if attribute.is_compound() && attribute.separator.is_none() {
                    problems.push(format!(
                        "attribute '{}' combines {} columns but defines no separator",
                        context,
                        attribute.columns.len()
                    ));
                }
                if !attribute.na_rep_columns.is_empty()
                    && attribute.na_rep_columns.len() != attribute.columns.len()
                {
                    problems.push(format!(
                        "attribute '{}' has {} na_rep_columns for {} columns",
                        context,
                        attribute.na_rep_columns.len(),
                        attribute.columns.len()
                    ));
                }
                for column in attribute.columns.iter().chain(&attribute.na_rep_columns) {
                    if let Err(e) = column.parsed_dtype() {
                        problems.push(format!("{} in attribute '{}'", e, context));
                    }
                }
            }

            for sample in &structure.samples {
                if sample.file_name.is_none() {
                    problems.push(format!(
                        "structure '{}' has several files, so every sample needs a file_name",
                        structure.name
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidDescription(problems.join("; ")))
        }
    }

    /// Read every CSV header and report attribute columns it lacks
    pub fn check_source_columns(&self, base_dir: &Path) -> Result<Vec<MissingSourceColumn>> {
        let mut missing = Vec::new();

        for structure in &self.structures {
            let directory = structure.directory(base_dir);
            for file_name in &structure.file_names {
                let path = directory.join(file_name);
                let delimiter = structure.delimiter()?;
                let mut reader = csv::ReaderBuilder::new()
                    .delimiter(delimiter)
                    .flexible(true)
                    .from_path(&path)?;
                let headers: HashSet<String> = reader
                    .headers()?
                    .iter()
                    .map(|header| header.trim_start_matches('\u{feff}').to_string())
                    .collect();

                for attribute in &structure.attributes {
                    for column in attribute.columns.iter().chain(&attribute.na_rep_columns) {
                        if !headers.contains(&column.name) {
                            missing.push(MissingSourceColumn {
                                structure: structure.name.clone(),
                                file_name: file_name.clone(),
                                attribute: attribute.name.clone(),
                                column: column.name.clone(),
                            });
                        }
                    }
                }
            }
        }

        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn orders() -> Value {
        json!([{
            "name": "orders",
            "file_directory": "data",
            "file_names": ["orders.csv"],
            "labels": ["Event"],
            "attributes": [
                {"name": "code", "columns": [{"name": "raw_code", "range_start": 0, "range_end": -1}]},
                {"name": "customer", "columns": [{"name": "first"}, {"name": "last"}], "separator": " "}
            ]
        }])
    }

    #[test]
    fn test_load_valid_description() {
        let description = DatasetDescription::from_value(orders()).unwrap();
        assert_eq!(description.structures.len(), 1);
        let structure = description.structure("orders").unwrap();
        assert_eq!(structure.attributes[0].columns[0].range_end, Some(-1));
    }

    #[test]
    fn test_schema_violations_surface_as_error() {
        let err = DatasetDescription::from_value(json!([{
            "name": "orders", "file_directory": "d", "file_names": ["orders.csv", "orders.csv"]
        }]))
        .unwrap_err();
        match err {
            Error::SchemaViolations(violations) => {
                assert_eq!(violations[0].keyword, SchemaKeyword::UniqueItems)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_round_trip() {
        let description = DatasetDescription::from_value(orders()).unwrap();
        let text = description.to_json_string().unwrap();
        let document: Value = serde_json::from_str(&text).unwrap();
        assert!(DescriptionValidator::new().unwrap().validate(&document).is_empty());
        assert_eq!(DatasetDescription::from_json_str(&text).unwrap(), description);
    }

    #[test]
    fn test_excluded_structures_are_dropped() {
        let description = DatasetDescription::from_value(json!([
            {"name": "a", "file_directory": "d", "file_names": ["a.csv"], "include": false},
            {"name": "b", "file_directory": "d", "file_names": ["b.csv"]}
        ]))
        .unwrap();
        assert_eq!(description.files(), vec!["b.csv"]);
    }

    #[test]
    fn test_compound_attribute_requires_separator() {
        let err = DatasetDescription::from_value(json!([{
            "name": "a", "file_directory": "d", "file_names": ["a.csv"],
            "attributes": [{"name": "x", "columns": [{"name": "c1"}, {"name": "c2"}]}]
        }]))
        .unwrap_err();
        assert!(err.to_string().contains("no separator"));
    }

    #[test]
    fn test_na_rep_columns_must_match() {
        let err = DatasetDescription::from_value(json!([{
            "name": "a", "file_directory": "d", "file_names": ["a.csv"],
            "attributes": [{
                "name": "x", "columns": [{"name": "c1"}],
                "na_rep_columns": [{"name": "n1"}, {"name": "n2"}]
            }]
        }]))
        .unwrap_err();
        assert!(err.to_string().contains("2 na_rep_columns for 1 columns"));
    }

    #[test]
    fn test_unknown_dtype_rejected() {
        let err = DatasetDescription::from_value(json!([{
            "name": "a", "file_directory": "d", "file_names": ["a.csv"],
            "attributes": [{"name": "x", "columns": [{"name": "c1", "dtype": "decimal"}]}]
        }]))
        .unwrap_err();
        assert_eq!(err.code(), "E002");
    }

    #[test]
    fn test_non_string_attribute_name_is_description_error() {
        let err = DatasetDescription::from_value(json!([{
            "name": "a", "file_directory": "d", "file_names": ["a.csv"],
            "attributes": [{"name": 7, "columns": [{"name": "c1"}]}]
        }]))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidDescription(_)));
    }

    #[test]
    fn test_duplicate_structure_names() {
        let err = DatasetDescription::from_value(json!([
            {"name": "a", "file_directory": "d", "file_names": ["a.csv"]},
            {"name": "a", "file_directory": "d", "file_names": ["b.csv"]}
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("used more than once"));
    }

    #[test]
    fn test_check_source_columns() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/orders.csv"), "raw_code,first\nABC123,Ann\n").unwrap();

        let description = DatasetDescription::from_value(orders()).unwrap();
        let missing = description.check_source_columns(dir.path()).unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].column, "last");
        assert_eq!(missing[0].attribute, "customer");
    }

    #[test]
    fn test_check_source_columns_rejects_multibyte_separator() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/orders.csv"), "raw_code§first\nABC123§Ann\n").unwrap();

        let mut document = orders();
        document[0]["seperator"] = json!("§");
        let description = DatasetDescription::from_value(document).unwrap();
        let err = description.check_source_columns(dir.path()).unwrap_err();
        assert_eq!(err.code(), "E002");
        assert!(err.to_string().contains("single character"));
    }

    #[test]
    fn test_structure_not_found() {
        let description = DatasetDescription::from_value(orders()).unwrap();
        assert!(matches!(
            description.structure("missing"),
            Err(Error::StructureNotFound(_))
        ));
    }
}
