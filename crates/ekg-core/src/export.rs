//! Event log export per node type

use std::path::{Path, PathBuf};

use tracing::info;

use crate::database::DatabaseConnection;
use crate::error::{Error, Result};
use crate::query::{self, export as export_ql};
use crate::semantic_header::SemanticHeader;
use crate::table::{CellValue, Table};

const IDX_COLUMN: &str = "idx";

/// Reads event logs of node types back out of the graph
pub struct EventLogExporter<'a> {
    connection: &'a DatabaseConnection,
    semantic_header: &'a SemanticHeader,
}

impl<'a> EventLogExporter<'a> {
    pub fn new(connection: &'a DatabaseConnection, semantic_header: &'a SemanticHeader) -> Self {
        Self {
            connection,
            semantic_header,
        }
    }

    /// Case id, activity, timestamp and the extra attributes of every event
    /// correlated with a node of `entity_type`, ordered per case
    pub async fn event_log(&self, entity_type: &str, extra_attributes: &[String]) -> Result<Table> {
        let nodes = self.semantic_header.entity(entity_type)?;
        if let Some(invalid) = extra_attributes.iter().find(|attribute| !query::is_identifier(attribute)) {
            return Err(Error::Export(format!("'{}' is not a valid attribute name", invalid)));
        }

        let rows = self
            .connection
            .exec_query(export_ql::event_log(nodes, extra_attributes))
            .await?;

        let mut columns: Vec<String> = ["caseId", "activity", "timestamp"]
            .into_iter()
            .map(str::to_string)
            .collect();
        columns.extend(extra_attributes.iter().cloned());

        let mut table = Table::new(columns.clone());
        for row in &rows {
            let cells = columns
                .iter()
                .map(|column| row.get(column).map(CellValue::from_json).unwrap_or(CellValue::Null))
                .collect();
            table.push_row(cells)?;
        }
        info!(entity = %entity_type, events = table.len(), "Read event log");
        Ok(table)
    }

    /// Write the event log to `<directory>/<entity_type>.csv` with an index column
    pub async fn save_event_log(
        &self,
        entity_type: &str,
        extra_attributes: &[String],
        directory: &Path,
    ) -> Result<PathBuf> {
        let log = self.event_log(entity_type, extra_attributes).await?;
        let path = directory.join(format!("{}.csv", entity_type));
        with_index(&log)?.write_csv(&path)?;
        info!(path = %path.display(), "Saved event log");
        Ok(path)
    }
}

fn with_index(log: &Table) -> Result<Table> {
    let mut columns = vec![IDX_COLUMN.to_string()];
    columns.extend(log.columns().iter().cloned());
    let mut indexed = Table::new(columns);
    for (index, row) in log.rows().iter().enumerate() {
        let mut cells = Vec::with_capacity(row.len() + 1);
        cells.push(CellValue::Int(index as i64));
        cells.extend(row.iter().cloned());
        indexed.push_row(cells)?;
    }
    Ok(indexed)
}
