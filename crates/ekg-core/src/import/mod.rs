//! Record import
//!
//! For every structure and file of a dataset description the importer
//! preprocesses the file, decides which labels each row gets, loads the rows
//! as `Record` nodes and then converts datetimes, applies the property
//! filters and clears the import marker.

mod labels;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::database::DatabaseConnection;
use crate::dataset::{CsvStructure, DatasetDescription};
use crate::error::Result;
use crate::performance::PerformanceTracker;
use crate::preprocess::Preprocessor;
use crate::query::importer::{self as importer_ql, PropertyFilter};
use crate::semantic_header::RecordConstructor;
use crate::table::{CellValue, ColumnKind, Table};

pub use labels::{LabelResolver, RECORD_LABEL};

/// Column holding each row's optional labels while grouping
const LABELS_COLUMN: &str = "labels";

/// How rows reach the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Write CSV files into the database's import directory and load them there
    #[default]
    LoadCsv,
    /// Send rows as query parameters
    Batch,
}

/// Imports the files of a dataset description as records
pub struct Importer<'a> {
    connection: &'a DatabaseConnection,
    description: &'a DatasetDescription,
    records: &'a [RecordConstructor],
    preprocessor: Preprocessor,
    import_directory: PathBuf,
    batch_size: usize,
    use_sample: bool,
    mode: ImportMode,
    tracker: Option<PerformanceTracker>,
}

impl<'a> Importer<'a> {
    pub fn new(
        connection: &'a DatabaseConnection,
        description: &'a DatasetDescription,
        records: &'a [RecordConstructor],
        preprocessor: Preprocessor,
        import_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            connection,
            description,
            records,
            preprocessor,
            import_directory: import_directory.into(),
            batch_size: 5000,
            use_sample: false,
            mode: ImportMode::default(),
            tracker: None,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn use_sample(mut self, use_sample: bool) -> Self {
        self.use_sample = use_sample;
        self
    }

    pub fn mode(mut self, mode: ImportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn tracker(mut self, tracker: PerformanceTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    fn finished_step(&self, name: impl Into<String>) {
        if let Some(tracker) = &self.tracker {
            tracker.finished_step(name);
        }
    }

    /// Import every file of every structure
    pub async fn import_data(&self) -> Result<usize> {
        let resolver = LabelResolver::new(self.records);
        let mut imported = 0;

        for structure in &self.description.structures {
            let required_labels = resolver.required_labels_str(structure);
            info!(structure = %structure.name, labels = %required_labels, "Importing structure");

            for file_name in &structure.file_names {
                let mut table = self.preprocessor.read_data_set(structure, file_name, self.use_sample)?;
                let optional_labels = resolver.optional_labels(structure, &table);
                table.set_column(LABELS_COLUMN, optional_labels.into_iter().map(CellValue::Str).collect())?;

                imported += self.import_nodes(&table, file_name, &required_labels).await?;
                self.finished_step(format!("import {}", file_name));

                if structure.has_datetime_attribute() {
                    self.reformat_timestamps(structure, &required_labels).await?;
                }
                self.filter_nodes(structure, &required_labels).await?;
                self.finalize_import(&required_labels).await?;
                self.finished_step(format!("finalize {}", file_name));
            }
        }

        info!(records = imported, "Import finished");
        Ok(imported)
    }

    async fn import_nodes(&self, table: &Table, file_name: &str, required_labels: &str) -> Result<usize> {
        let mapping = column_mapping(table);
        let groups = table.group_by(LABELS_COLUMN)?;

        for (optional_labels, group) in &groups {
            let labels = format!("{}{}", required_labels, optional_labels);
            debug!(file = %file_name, labels = %labels, rows = group.len(), "Importing group");

            match self.mode {
                ImportMode::LoadCsv => {
                    let group_file = grouped_file_name(file_name, optional_labels);
                    self.save_group(group, &group_file)?;
                    let query = importer_ql::create_nodes_by_loading_csv(&group_file, &labels, &mapping, self.batch_size);
                    self.connection.exec_query(query).await?;
                }
                ImportMode::Batch => {
                    let label_list: Vec<String> = labels
                        .split(':')
                        .filter(|label| !label.is_empty())
                        .map(str::to_string)
                        .collect();
                    for batch in group.to_json_rows().chunks(self.batch_size) {
                        let query = importer_ql::create_nodes_by_importing_batch(batch.to_vec(), &label_list);
                        self.connection.exec_query(query).await?;
                    }
                }
            }
        }

        Ok(table.len())
    }

    fn save_group(&self, group: &Table, group_file: &str) -> Result<()> {
        fs::create_dir_all(&self.import_directory)?;
        let path = self.import_directory.join(group_file);
        group.write_csv(&path)?;
        debug!(path = %path.display(), "Saved grouped records");
        Ok(())
    }

    async fn reformat_timestamps(&self, structure: &CsvStructure, labels: &str) -> Result<()> {
        for (attribute, datetime) in structure.record_datetime_formats() {
            if datetime.is_epoch {
                let query = importer_ql::convert_epoch_to_timestamp(labels, attribute, datetime, self.batch_size);
                self.connection.exec_query(query).await?;
            }
            let query = importer_ql::make_timestamp_date(labels, attribute, datetime, self.batch_size);
            self.connection.exec_query(query).await?;
        }
        Ok(())
    }

    async fn filter_nodes(&self, structure: &CsvStructure, labels: &str) -> Result<()> {
        for (attribute, filter) in property_filters(structure) {
            debug!(attribute = %attribute, filter = ?filter, "Filtering records");
            let query = importer_ql::filter_records_by_property(labels, attribute, &filter);
            self.connection.exec_query(query).await?;
        }
        Ok(())
    }

    async fn finalize_import(&self, labels: &str) -> Result<()> {
        let query = importer_ql::finalize_import(labels, self.batch_size);
        self.connection.exec_query(query).await?;
        Ok(())
    }
}

/// Filters to apply per attribute after import
pub fn property_filters(structure: &CsvStructure) -> Vec<(&str, PropertyFilter)> {
    let mut filters = Vec::new();
    for attribute in structure.attributes.iter().filter(|attribute| attribute.uses_filter()) {
        let name = attribute.name.as_str();
        match (&attribute.filter_exclude_values, &attribute.filter_include_values) {
            (None, None) => filters.push((name, PropertyFilter::RequireProperty)),
            (exclude, include) => {
                if let Some(values) = exclude {
                    filters.push((name, PropertyFilter::Exclude(values.clone())));
                }
                if let Some(values) = include {
                    filters.push((name, PropertyFilter::Include(values.clone())));
                }
            }
        }
    }
    filters
}

/// `{col:{type:"INTEGER"},...}` for the non-string columns of a table
pub fn column_mapping(table: &Table) -> String {
    let entries: Vec<String> = table
        .columns()
        .iter()
        .filter(|column| *column != LABELS_COLUMN)
        .filter_map(|column| match table.column_kind(column) {
            Some(kind @ (ColumnKind::Integer | ColumnKind::Float | ColumnKind::Boolean)) => {
                Some(format!("{}:{{type:\"{}\"}}", column, kind.cypher_type()))
            }
            _ => None,
        })
        .collect();
    format!("{{{}}}", entries.join(","))
}

/// `orders.csv` for rows without optional labels, else `orders_CancelRecord.csv`
pub fn grouped_file_name(file_name: &str, optional_labels: &str) -> String {
    if optional_labels.is_empty() {
        return file_name.to_string();
    }
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name);
    format!("{}_{}.csv", stem, optional_labels.replace(':', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouped_file_name() {
        assert_eq!(grouped_file_name("orders.csv", ""), "orders.csv");
        assert_eq!(grouped_file_name("orders.csv", ":CancelRecord"), "orders__CancelRecord.csv");
    }

    #[test]
    fn test_column_mapping_skips_strings_and_labels() {
        let mut table = Table::new(vec![
            "id".to_string(),
            "amount".to_string(),
            "paid".to_string(),
            "name".to_string(),
            "labels".to_string(),
        ]);
        table
            .push_row(vec![
                CellValue::Int(1),
                CellValue::Float(2.5),
                CellValue::Bool(true),
                "x".into(),
                "".into(),
            ])
            .unwrap();
        assert_eq!(
            column_mapping(&table),
            "{id:{type:\"INTEGER\"},amount:{type:\"FLOAT\"},paid:{type:\"BOOLEAN\"}}"
        );
    }

    #[test]
    fn test_property_filters_without_lists_require_property() {
        let structure: CsvStructure = serde_json::from_value(serde_json::json!({
            "name": "orders",
            "file_directory": "data",
            "file_names": ["orders.csv"],
            "attributes": [
                {"name": "status", "use_filter": true},
                {"name": "kind", "filter_exclude_values": ["void"]},
                {"name": "shop", "filter_include_values": ["north"], "use_filter": true},
                {"name": "note", "filter_exclude_values": ["x"], "use_filter": false},
            ]
        }))
        .unwrap();

        let filters = property_filters(&structure);
        assert_eq!(
            filters,
            vec![
                ("status", PropertyFilter::RequireProperty),
                ("kind", PropertyFilter::Exclude(vec![serde_json::json!("void")])),
                ("shop", PropertyFilter::Include(vec![serde_json::json!("north")])),
            ]
        );
    }
}
