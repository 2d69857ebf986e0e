//! EKG Core Library
//!
//! This crate provides the core functionality for ekg, including:
//! - Dataset descriptions (JSON schema, validation, typed model)
//! - CSV preprocessing (typing, datetimes, compound attributes, sampling)
//! - Semantic headers (record, node and relation constructors)
//! - Cypher query library and graph database access
//! - Record import and event knowledge graph construction
//! - Database management, statistics and event log export
//! - Item inference and DF process discovery
//! - Step performance tracking

pub mod builder;
pub mod config;
pub mod database;
pub mod dataset;
pub mod error;
pub mod export;
pub mod import;
pub mod management;
pub mod modules;
pub mod performance;
pub mod preprocess;
pub mod query;
pub mod semantic_header;
pub mod table;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::builder::EkgBuilder;
    pub use crate::config::Config;
    pub use crate::database::{DatabaseConnection, DryRunTransport, HttpTransport};
    pub use crate::dataset::DatasetDescription;
    pub use crate::error::{Error, Result};
    pub use crate::import::{ImportMode, Importer};
    pub use crate::preprocess::Preprocessor;
    pub use crate::semantic_header::SemanticHeader;
}
