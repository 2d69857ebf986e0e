//! Error types for ekg

use thiserror::Error;

use crate::dataset::SchemaViolation;

/// Result type alias using ekg's Error
pub type Result<T> = std::result::Result<T, Error>;

/// ekg error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Dataset description errors (E001-E099)
    #[error("Dataset description is invalid: {} schema violation(s). Run `ekg validate` for details.", .0.len())]
    SchemaViolations(Vec<SchemaViolation>),

    #[error("Invalid dataset description: {0}")]
    InvalidDescription(String),

    #[error("Structure '{0}' not found in the dataset description.")]
    StructureNotFound(String),

    // Preprocessing errors (E100-E199)
    #[error("The file extension of '{0}' is not supported. Use .csv.")]
    UnsupportedFileType(String),

    #[error("Column '{column}' is not present in '{file}'.")]
    MissingColumn { file: String, column: String },

    #[error("Cannot convert value '{value}' in column '{column}' to {dtype}")]
    InvalidValue {
        column: String,
        value: String,
        dtype: String,
    },

    #[error("Combined events cannot be split: {0}")]
    SplitEvents(String),

    #[error("Invalid sample definition: {0}")]
    InvalidSample(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // Semantic header errors (E200-E299)
    #[error("Invalid semantic header pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalid semantic header: {0}")]
    InvalidSemanticHeader(String),

    #[error("Entity '{0}' is not defined in the semantic header.")]
    EntityNotFound(String),

    // Database errors (E300-E399)
    #[error("Network error: {0}. Check that the database is reachable.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unauthorized: {0}. Set EKG_DB_PASSWORD or NEO4J_PASSWORD.")]
    Unauthorized(String),

    #[error("Maximum attempts reached for batched query: {0}")]
    BatchRetriesExhausted(String),

    #[error("Bolt error: {0}")]
    Bolt(#[from] neo4rs::Error),

    // Export errors (E400-E499)
    #[error("Cannot export event log: {0}")]
    Export(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaViolations(_) => "E001",
            Self::InvalidDescription(_) => "E002",
            Self::StructureNotFound(_) => "E003",
            Self::UnsupportedFileType(_) => "E100",
            Self::MissingColumn { .. } => "E101",
            Self::InvalidValue { .. } => "E102",
            Self::SplitEvents(_) => "E103",
            Self::InvalidSample(_) => "E104",
            Self::Csv(_) => "E105",
            Self::InvalidPattern { .. } => "E200",
            Self::InvalidSemanticHeader(_) => "E201",
            Self::EntityNotFound(_) => "E202",
            Self::NetworkError(_) => "E300",
            Self::Database(_) => "E301",
            Self::Unauthorized(_) => "E302",
            Self::BatchRetriesExhausted(_) => "E303",
            Self::Bolt(_) => "E304",
            Self::Export(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Json(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::SchemaViolations(_) | Self::InvalidDescription(_) => {
                Some("ekg validate <dataset_description.json>".to_string())
            }
            Self::MissingColumn { .. } => {
                Some("ekg validate <dataset_description.json> --check-files".to_string())
            }
            Self::NetworkError(_) | Self::Bolt(_) => Some("ekg config get database.uri".to_string()),
            Self::Unauthorized(_) => Some("export EKG_DB_PASSWORD=<password>".to_string()),
            Self::ConfigError(_) => Some("ekg config list".to_string()),
            Self::EntityNotFound(_) => Some("Check the `nodes` section of the semantic header".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidDescription("x".into()).code(), "E002");
        assert_eq!(Error::UnsupportedFileType("a.xlsx".into()).code(), "E100");
        assert_eq!(Error::Database("boom".into()).code(), "E301");
        assert_eq!(Error::Other("x".into()).code(), "E9999");
    }

    #[test]
    fn test_missing_column_message() {
        let err = Error::MissingColumn {
            file: "orders.csv".to_string(),
            column: "raw_code".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("raw_code"));
        assert!(msg.contains("orders.csv"));
        assert!(err.suggestion().unwrap().contains("--check-files"));
    }

    #[test]
    fn test_schema_violations_message_counts() {
        let err = Error::SchemaViolations(vec![
            SchemaViolation::new("/0/file_names", crate::dataset::SchemaKeyword::MinItems, "empty"),
        ]);
        assert!(err.to_string().contains("1 schema violation"));
    }
}
