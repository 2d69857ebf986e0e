//! Typed dataset description model

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn is_default_encoding(value: &String) -> bool {
    value == "utf-8"
}

fn default_separator() -> String {
    ",".to_string()
}

fn default_decimal() -> String {
    ".".to_string()
}

fn is_default_decimal(value: &String) -> bool {
    value == "."
}

/// Accept either a single object or a list of objects
pub(crate) fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
        None => Vec::new(),
    })
}

/// One group of CSV files sharing a layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvStructure {
    pub name: String,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub include: bool,
    pub file_directory: String,
    #[serde(default)]
    pub file_names: Vec<String>,
    #[serde(default, skip_serializing)]
    pub file_name: Option<String>,
    #[serde(default = "default_encoding", skip_serializing_if = "is_default_encoding")]
    pub encoding: String,
    /// Field separator; the key keeps the spelling used by existing descriptions
    #[serde(default = "default_separator")]
    pub seperator: String,
    #[serde(default = "default_decimal", skip_serializing_if = "is_default_decimal")]
    pub decimal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub true_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub false_values: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub add_log: bool,
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub add_index: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub split_combined_events: bool,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<Sample>,
    #[serde(default, skip_serializing)]
    pub sample: Option<Sample>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
}

impl fmt::Display for CsvStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl CsvStructure {
    /// Fold the single-value aliases into their list forms
    pub(crate) fn normalize(&mut self) {
        if self.file_names.is_empty() {
            if let Some(file_name) = self.file_name.take() {
                self.file_names.push(file_name);
            }
        }
        self.file_name = None;

        if let Some(sample) = self.sample.take() {
            if self.samples.is_empty() {
                self.samples.push(sample);
            }
        }
        if self.file_names.len() == 1 {
            for sample in &mut self.samples {
                if sample.file_name.is_none() {
                    sample.file_name = Some(self.file_names[0].clone());
                }
            }
        }

        if self.labels.as_deref() == Some(&["Record".to_string()][..]) {
            self.labels = None;
        }
    }

    /// Directory of the source files, relative to `base`
    /// The separator as a CSV delimiter byte
    pub fn delimiter(&self) -> Result<u8> {
        match self.seperator.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(Error::InvalidDescription(format!(
                "separator '{}' of structure '{}' must be a single character",
                self.seperator, self.name
            ))),
        }
    }

    pub fn directory(&self, base: &Path) -> PathBuf {
        self.file_directory
            .split(['\\', '/'])
            .filter(|part| !part.is_empty())
            .fold(base.to_path_buf(), |path, part| path.join(part))
    }

    /// Directory holding cached preprocessed tables
    pub fn preprocessed_directory(&self, base: &Path) -> PathBuf {
        self.directory(base).join("preprocessed_files")
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn has_datetime_attribute(&self) -> bool {
        self.attributes.iter().any(Attribute::is_datetime)
    }

    pub fn sample_for(&self, file_name: &str) -> Option<&Sample> {
        self.samples
            .iter()
            .find(|sample| sample.file_name.as_deref() == Some(file_name))
    }

    /// Source columns that must exist in every file of this structure
    pub fn required_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for attribute in &self.attributes {
            for column in attribute.columns.iter().chain(&attribute.na_rep_columns) {
                if !columns.contains(&column.name.as_str()) {
                    columns.push(&column.name);
                }
            }
        }
        columns
    }

    /// Datetime conversions per attribute, in declaration order
    pub fn datetime_formats(&self) -> Vec<(&str, &DatetimeObject)> {
        self.attributes
            .iter()
            .filter_map(|attribute| {
                attribute
                    .datetime_object
                    .as_ref()
                    .map(|datetime| (attribute.name.as_str(), datetime))
            })
            .collect()
    }

    /// Datetime conversions as they apply to imported records.
    ///
    /// Splitting combined events folds `startTimestamp` and
    /// `completeTimestamp` into a single `timestamp` property.
    pub fn record_datetime_formats(&self) -> Vec<(&str, &DatetimeObject)> {
        let formats = self.datetime_formats();
        if !self.split_combined_events {
            return formats;
        }
        let mut folded: Vec<(&str, &DatetimeObject)> = Vec::with_capacity(formats.len());
        for (name, datetime) in formats {
            if name == "startTimestamp" || name == "completeTimestamp" {
                if !folded.iter().any(|(existing, _)| *existing == "timestamp") {
                    folded.push(("timestamp", datetime));
                }
            } else {
                folded.push((name, datetime));
            }
        }
        folded
    }
}

/// Row sampling definition for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub use_random_sample: bool,
    pub population_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_format: Option<String>,
}

/// A node property derived from one or more source columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub na_rep_columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub na_rep_value: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_object: Option<DatetimeObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_exclude_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_include_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_filter: Option<bool>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_primary_key: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_foreign_key: bool,
}

impl Attribute {
    pub fn is_compound(&self) -> bool {
        self.columns.len() > 1
    }

    pub fn is_datetime(&self) -> bool {
        self.datetime_object.is_some()
    }

    /// Filtering defaults to on whenever a value list is present
    pub fn uses_filter(&self) -> bool {
        self.use_filter.unwrap_or(
            self.filter_exclude_values.is_some() || self.filter_include_values.is_some(),
        )
    }
}

/// One source column of an attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nan_values: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<i64>,
}

impl Column {
    pub fn has_range(&self) -> bool {
        self.range_start.is_some() || self.range_end.is_some()
    }

    pub fn parsed_dtype(&self) -> Result<Option<Dtype>> {
        self.dtype.as_deref().map(Dtype::parse).transpose()
    }
}

/// Datetime conversion applied once records are in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatetimeObject {
    pub format: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timezone_offset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert_to: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_epoch: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl DatetimeObject {
    /// Target format for conversion.
    ///
    /// An explicit `convert_to` wins; otherwise formats with an hour field
    /// convert to `ISO_DATE_TIME` and all others to `ISO_DATE`.
    pub fn target_format(&self) -> &str {
        match &self.convert_to {
            Some(target) => target,
            None if self.format.contains(['h', 'k', 'H', 'K']) => "ISO_DATE_TIME",
            None => "ISO_DATE",
        }
    }

    pub fn date_type(&self) -> &'static str {
        if self.target_format() == "ISO_DATE" {
            "DATE"
        } else {
            "DATE_TIME"
        }
    }
}

/// Column types understood by the preprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    Str,
    Int,
    Float,
    Bool,
}

impl Dtype {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "str" | "string" | "object" => Ok(Self::Str),
            "int" | "int64" | "Int64" | "int32" | "Int32" => Ok(Self::Int),
            "float" | "float64" | "float32" | "Float64" => Ok(Self::Float),
            "bool" | "boolean" => Ok(Self::Bool),
            other => Err(Error::InvalidDescription(format!(
                "unknown dtype '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Str => "string",
            Self::Int => "int64",
            Self::Float => "float64",
            Self::Bool => "bool",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn structure(value: Value) -> CsvStructure {
        let mut structure: CsvStructure = serde_json::from_value(value).unwrap();
        structure.normalize();
        structure
    }

    #[test]
    fn test_defaults() {
        let s = structure(json!({"name": "orders", "file_directory": "data", "file_names": ["a.csv"]}));
        assert!(s.include);
        assert_eq!(s.seperator, ",");
        assert_eq!(s.decimal, ".");
        assert_eq!(s.encoding, "utf-8");
        assert!(s.add_index);
        assert!(!s.add_log);
        assert!(s.labels.is_none());
    }

    #[test]
    fn test_single_file_name_alias() {
        let s = structure(json!({"name": "orders", "file_directory": "data", "file_name": "a.csv"}));
        assert_eq!(s.file_names, vec!["a.csv"]);
        assert!(s.file_name.is_none());
    }

    #[test]
    fn test_record_label_means_no_labels() {
        let s = structure(json!({
            "name": "orders", "file_directory": "data", "file_names": ["a.csv"], "labels": ["Record"]
        }));
        assert!(s.labels.is_none());
    }

    #[test]
    fn test_single_sample_gets_default_file_name() {
        let s = structure(json!({
            "name": "orders", "file_directory": "data", "file_names": ["a.csv"],
            "sample": {"population_column": "case", "ids": [1, 2]}
        }));
        assert_eq!(s.samples.len(), 1);
        assert_eq!(s.sample_for("a.csv").unwrap().population_column, "case");
    }

    #[test]
    fn test_directory_splits_backslashes() {
        let s = structure(json!({"name": "o", "file_directory": "data\\raw", "file_names": ["a.csv"]}));
        assert_eq!(s.directory(Path::new("/base")), PathBuf::from("/base/data/raw"));
    }

    #[test]
    fn test_required_columns_are_deduplicated() {
        let s = structure(json!({
            "name": "o", "file_directory": "d", "file_names": ["a.csv"],
            "attributes": [
                {"name": "a", "columns": [{"name": "x"}], "na_rep_columns": [{"name": "y"}]},
                {"name": "b", "columns": [{"name": "x"}]}
            ]
        }));
        assert_eq!(s.required_columns(), vec!["x", "y"]);
    }

    #[test]
    fn test_uses_filter_defaults() {
        let attribute: Attribute = serde_json::from_value(json!({
            "name": "a", "columns": [{"name": "x"}], "filter_exclude_values": ["z"]
        }))
        .unwrap();
        assert!(attribute.uses_filter());

        let attribute: Attribute = serde_json::from_value(json!({
            "name": "a", "columns": [{"name": "x"}], "filter_exclude_values": ["z"], "use_filter": false
        }))
        .unwrap();
        assert!(!attribute.uses_filter());
    }

    #[test]
    fn test_datetime_target_format() {
        let datetime = |format: &str, convert_to: Option<&str>| DatetimeObject {
            format: format.to_string(),
            timezone_offset: String::new(),
            convert_to: convert_to.map(str::to_string),
            is_epoch: false,
            unit: None,
        };
        assert_eq!(datetime("y-M-d H:m:s", None).target_format(), "ISO_DATE_TIME");
        assert_eq!(datetime("y-M-d", None).target_format(), "ISO_DATE");
        assert_eq!(datetime("y-M-d", None).date_type(), "DATE");
        assert_eq!(
            datetime("y-M-d H:m", Some("ISO_LOCAL_DATE")).target_format(),
            "ISO_LOCAL_DATE"
        );
    }

    #[test]
    fn test_split_events_fold_timestamps() {
        let s = structure(json!({
            "name": "o", "file_directory": "d", "file_names": ["a.csv"], "split_combined_events": true,
            "attributes": [
                {"name": "startTimestamp", "columns": [{"name": "s"}], "datetime_object": {"format": "y-M-d"}},
                {"name": "completeTimestamp", "columns": [{"name": "c"}], "datetime_object": {"format": "y-M-d"}},
                {"name": "due", "columns": [{"name": "d"}], "datetime_object": {"format": "y-M-d"}}
            ]
        }));
        let names: Vec<&str> = s.record_datetime_formats().into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["timestamp", "due"]);
        assert_eq!(s.datetime_formats().len(), 3);
    }

    #[test]
    fn test_dtype_parse() {
        assert_eq!(Dtype::parse("Int64").unwrap(), Dtype::Int);
        assert_eq!(Dtype::parse("object").unwrap(), Dtype::Str);
        assert!(Dtype::parse("decimal128").is_err());
    }
}
