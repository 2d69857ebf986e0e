//! Record labels per structure and per row

use tracing::debug;

use crate::dataset::CsvStructure;
use crate::semantic_header::RecordConstructor;
use crate::table::{CellValue, Table};

/// Label every imported record carries
pub const RECORD_LABEL: &str = "Record";

/// One comparison of a prevalent record's WHERE condition
#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Equals(String, String),
    StartsWith(String, String),
    EndsWith(String, String),
}

impl Condition {
    /// Parse `AND`-joined comparisons like `record.status = "done"`; other
    /// comparisons are ignored
    fn parse_all(where_condition: &str) -> Vec<Self> {
        where_condition
            .split("AND")
            .filter_map(|condition| {
                let condition = condition.trim();
                if let Some((column, value)) = condition.split_once('=') {
                    Some(Self::Equals(column_name(column), literal(value)))
                } else if let Some((column, value)) = condition.split_once("STARTS WITH") {
                    Some(Self::StartsWith(column_name(column), literal(value)))
                } else {
                    condition
                        .split_once("ENDS WITH")
                        .map(|(column, value)| Self::EndsWith(column_name(column), literal(value)))
                }
            })
            .collect()
    }

    fn column(&self) -> &str {
        match self {
            Self::Equals(column, _) | Self::StartsWith(column, _) | Self::EndsWith(column, _) => column,
        }
    }

    fn holds(&self, cell: &CellValue) -> bool {
        if cell.is_null() {
            return false;
        }
        let text = cell.to_string();
        match self {
            Self::Equals(_, value) => text == *value,
            Self::StartsWith(_, value) => text.starts_with(value.as_str()),
            Self::EndsWith(_, value) => text.ends_with(value.as_str()),
        }
    }
}

fn column_name(reference: &str) -> String {
    let reference = reference.trim();
    match reference.split_once('.') {
        Some((_, column)) => column.trim().to_string(),
        None => reference.to_string(),
    }
}

fn literal(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

/// Decides which record labels the rows of a structure receive
#[derive(Debug, Clone, Copy)]
pub struct LabelResolver<'a> {
    records: &'a [RecordConstructor],
}

impl<'a> LabelResolver<'a> {
    pub fn new(records: &'a [RecordConstructor]) -> Self {
        Self { records }
    }

    fn applies_to(structure: &CsvStructure, record: &RecordConstructor) -> bool {
        match &structure.labels {
            Some(labels) => record.record_labels.iter().any(|label| labels.contains(label)),
            None => !record.record_labels.is_empty(),
        }
    }

    /// Attribute names as they appear on imported records
    fn declared_attribute(structure: &CsvStructure, name: &str) -> Option<bool> {
        if structure.split_combined_events {
            match name {
                "timestamp" => {
                    return structure
                        .attribute("startTimestamp")
                        .or_else(|| structure.attribute("completeTimestamp"))
                        .map(|attribute| attribute.optional);
                }
                "lifecycle" => return Some(false),
                _ => {}
            }
        }
        if name == "log" && structure.add_log {
            return Some(false);
        }
        structure.attribute(name).map(|attribute| attribute.optional)
    }

    fn always_present(structure: &CsvStructure, record: &RecordConstructor) -> bool {
        record
            .required_attributes
            .iter()
            .filter(|attribute| *attribute != "index")
            .all(|attribute| Self::declared_attribute(structure, attribute) == Some(false))
    }

    /// Labels every record of the structure gets, in first-seen order.
    ///
    /// Constructors with a WHERE condition never contribute: only some rows
    /// may satisfy it.
    pub fn required_labels(&self, structure: &CsvStructure) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for record in self.records {
            if !Self::applies_to(structure, record) || !record.where_condition().is_empty() {
                continue;
            }
            if Self::always_present(structure, record) {
                for label in &record.record_labels {
                    if !labels.contains(label) {
                        labels.push(label.clone());
                    }
                }
            }
        }
        labels
    }

    /// `Record:<required labels>`
    pub fn required_labels_str(&self, structure: &CsvStructure) -> String {
        std::iter::once(RECORD_LABEL.to_string())
            .chain(self.required_labels(structure))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Additional labels per row, each rendered as `:Label:Other` (empty when none)
    pub fn optional_labels(&self, structure: &CsvStructure, table: &Table) -> Vec<String> {
        let mut row_labels: Vec<Vec<&str>> = vec![Vec::new(); table.len()];
        let required = self.required_labels(structure);

        if let Some(labels) = &structure.labels {
            let all_required = labels.iter().all(|label| required.contains(label))
                && required.iter().all(|label| labels.contains(label));
            if all_required {
                return vec![String::new(); table.len()];
            }
        }

        for record in self.records {
            if !Self::applies_to(structure, record) {
                continue;
            }
            if record.record_labels.iter().all(|label| required.contains(label)) {
                continue;
            }

            let mask = self.matching_rows(structure, table, record);
            let matched = mask.iter().filter(|m| **m).count();
            debug!(
                structure = %structure.name,
                labels = %record.record_labels_pattern(),
                rows = matched,
                "Resolved optional labels"
            );
            for (labels, _) in row_labels.iter_mut().zip(&mask).filter(|(_, m)| **m) {
                for label in &record.record_labels {
                    if !labels.contains(&label.as_str()) {
                        labels.push(label);
                    }
                }
            }
        }

        row_labels
            .into_iter()
            .map(|labels| labels.iter().map(|label| format!(":{}", label)).collect())
            .collect()
    }

    /// Rows that have every required attribute and satisfy the WHERE condition
    fn matching_rows(&self, structure: &CsvStructure, table: &Table, record: &RecordConstructor) -> Vec<bool> {
        let mut mask = vec![true; table.len()];

        for attribute in &record.required_attributes {
            if attribute == "index" || attribute == "log" {
                continue;
            }
            match Self::declared_attribute(structure, attribute) {
                None => return vec![false; table.len()],
                Some(false) => {}
                Some(true) => Self::restrict(&mut mask, table, attribute, |cell| !cell.is_null()),
            }
        }

        if mask.iter().any(|m| *m) {
            for condition in Condition::parse_all(record.where_condition()) {
                Self::restrict(&mut mask, table, condition.column(), |cell| condition.holds(cell));
            }
        }
        mask
    }

    /// Clear rows whose cell fails `keep`; a missing column fails every row
    fn restrict(mask: &mut [bool], table: &Table, column: &str, keep: impl Fn(&CellValue) -> bool) {
        match table.column(column) {
            Some(cells) => {
                for (flag, cell) in mask.iter_mut().zip(cells) {
                    *flag = *flag && keep(cell);
                }
            }
            None => mask.iter_mut().for_each(|flag| *flag = false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetDescription;
    use serde_json::json;

    fn structure(labels: serde_json::Value) -> CsvStructure {
        let description = DatasetDescription::from_value(json!([{
            "name": "orders",
            "file_directory": "data",
            "file_names": ["orders.csv"],
            "labels": labels,
            "attributes": [
                {"name": "orderId", "columns": [{"name": "id"}]},
                {"name": "activity", "columns": [{"name": "act"}]},
                {"name": "status", "columns": [{"name": "status"}]},
                {"name": "amount", "columns": [{"name": "amount"}], "optional": true}
            ]
        }]))
        .unwrap();
        description.structures[0].clone()
    }

    fn records() -> Vec<RecordConstructor> {
        vec![
            RecordConstructor::parse("(record:EventRecord {activity})").unwrap(),
            RecordConstructor::parse("(record:OrderRecord {orderId})").unwrap(),
            RecordConstructor::parse("(record:AmountRecord {orderId, amount})").unwrap(),
            RecordConstructor::parse("(record:CancelRecord WHERE record.status = \"cancelled\" {orderId})").unwrap(),
            RecordConstructor::parse("(record:CustomerRecord {customerId})").unwrap(),
        ]
    }

    fn table() -> Table {
        let mut table = Table::new(vec![
            "orderId".to_string(),
            "activity".to_string(),
            "status".to_string(),
            "amount".to_string(),
        ]);
        table
            .push_row(vec!["o1".into(), "create".into(), "open".into(), CellValue::Float(3.5)])
            .unwrap();
        table
            .push_row(vec!["o2".into(), "cancel".into(), "cancelled".into(), CellValue::Null])
            .unwrap();
        table
    }

    #[test]
    fn test_required_labels_without_structure_labels() {
        let records = records();
        let resolver = LabelResolver::new(&records);
        let structure = structure(json!(["Record"]));
        assert_eq!(resolver.required_labels(&structure), vec!["EventRecord", "OrderRecord"]);
        assert_eq!(resolver.required_labels_str(&structure), "Record:EventRecord:OrderRecord");
    }

    #[test]
    fn test_required_labels_limited_to_structure_labels() {
        let records = records();
        let resolver = LabelResolver::new(&records);
        let structure = structure(json!(["OrderRecord", "CancelRecord"]));
        assert_eq!(resolver.required_labels_str(&structure), "Record:OrderRecord");
    }

    #[test]
    fn test_optional_labels_per_row() {
        let records = records();
        let resolver = LabelResolver::new(&records);
        let structure = structure(json!(["Record"]));
        let labels = resolver.optional_labels(&structure, &table());
        assert_eq!(labels, vec![":AmountRecord".to_string(), ":CancelRecord".to_string()]);
    }

    #[test]
    fn test_no_optional_labels_when_all_required() {
        let records = records();
        let resolver = LabelResolver::new(&records);
        let structure = structure(json!(["EventRecord", "OrderRecord"]));
        assert_eq!(resolver.optional_labels(&structure, &table()), vec![String::new(), String::new()]);
    }

    #[test]
    fn test_condition_parsing() {
        let conditions = Condition::parse_all("record.a = \"x\" AND record.b STARTS WITH \"pre\" AND c ENDS WITH \"end\"");
        assert_eq!(
            conditions,
            vec![
                Condition::Equals("a".to_string(), "x".to_string()),
                Condition::StartsWith("b".to_string(), "pre".to_string()),
                Condition::EndsWith("c".to_string(), "end".to_string()),
            ]
        );
        assert!(conditions[1].holds(&"prefix".into()));
        assert!(!conditions[2].holds(&CellValue::Null));
    }
}
