//! In-memory tables produced by preprocessing

use std::cmp::Ordering;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A single typed cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Value kinds a column can hold, as the graph database sees them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    String,
}

impl ColumnKind {
    pub fn cypher_type(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "FLOAT",
            Self::Boolean => "BOOLEAN",
            Self::String => "STRING",
        }
    }
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON literal from a description (`na_rep_value`, ids, ...)
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            Value::String(s) => Self::Str(s.clone()),
            other => Self::Str(other.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Str(s) => Value::String(s.clone()),
        }
    }

    /// Field text for CSV files read by the database; nulls are empty
    pub fn to_csv_field(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            other => other.to_string(),
        }
    }

    fn kind(&self) -> Option<ColumnKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ColumnKind::Boolean),
            Self::Int(_) => Some(ColumnKind::Integer),
            Self::Float(_) => Some(ColumnKind::Float),
            Self::Str(_) => Some(ColumnKind::String),
        }
    }

    /// Total order used for sorting: numbers, then strings, then booleans, nulls last
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        fn rank(value: &CellValue) -> u8 {
            match value {
                CellValue::Int(_) | CellValue::Float(_) => 0,
                CellValue::Str(_) => 1,
                CellValue::Bool(_) => 2,
                CellValue::Null => 3,
            }
        }

        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(a), Self::Float(b)) => (*a as f64).total_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "nan"),
            Self::Bool(true) => write!(f, "True"),
            Self::Bool(false) => write!(f, "False"),
            Self::Int(i) => write!(f, "{}", i),
            // Integral floats keep their trailing ".0"
            Self::Float(x) if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 => {
                write!(f, "{:.1}", x)
            }
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Named columns over rows of cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn push_row(&mut self, row: Vec<CellValue>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::InvalidInput(format!(
                "row has {} cells but the table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&CellValue> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|cells| cells.get(index))
    }

    /// All values of one column
    pub fn column(&self, name: &str) -> Option<Vec<&CellValue>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Add a column, or replace its values when it already exists
    pub fn set_column(&mut self, name: &str, values: Vec<CellValue>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(Error::InvalidInput(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }
        match self.column_index(name) {
            Some(index) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[index] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) {
        if let Some(index) = self.column_index(name) {
            self.columns.remove(index);
            for row in &mut self.rows {
                row.remove(index);
            }
        }
    }

    /// Keep rows for which `keep(row_index)` holds
    pub fn retain_rows(&mut self, mut keep: impl FnMut(usize) -> bool) {
        let mut index = 0;
        self.rows.retain(|_| {
            let kept = keep(index);
            index += 1;
            kept
        });
    }

    /// Remove columns where every value is null
    pub fn drop_null_columns(&mut self) {
        let empty: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(index, _)| self.rows.iter().all(|row| row[*index].is_null()))
            .map(|(_, name)| name.clone())
            .collect();
        for name in empty {
            self.drop_column(&name);
        }
    }

    /// Indices of rows where every value is null
    pub fn null_rows(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.iter().all(CellValue::is_null))
            .map(|(index, _)| index)
            .collect()
    }

    /// Kind of a column's non-null values; mixed numbers are floats
    pub fn column_kind(&self, name: &str) -> Option<ColumnKind> {
        let index = self.column_index(name)?;
        let mut kind: Option<ColumnKind> = None;
        for row in &self.rows {
            let Some(cell_kind) = row[index].kind() else {
                continue;
            };
            kind = Some(match (kind, cell_kind) {
                (None, k) => k,
                (Some(a), b) if a == b => a,
                (Some(ColumnKind::Integer), ColumnKind::Float)
                | (Some(ColumnKind::Float), ColumnKind::Integer) => ColumnKind::Float,
                _ => ColumnKind::String,
            });
        }
        kind
    }

    /// Split into sub-tables keyed by one column, which is removed.
    ///
    /// Groups come back sorted by key.
    pub fn group_by(&self, name: &str) -> Result<Vec<(String, Table)>> {
        let index = self.column_index(name).ok_or_else(|| {
            Error::InvalidInput(format!("cannot group by missing column '{}'", name))
        })?;
        let columns: Vec<String> = self
            .columns
            .iter()
            .filter(|column| *column != name)
            .cloned()
            .collect();

        let mut groups: std::collections::BTreeMap<String, Table> = Default::default();
        for row in &self.rows {
            let key = match &row[index] {
                CellValue::Null => String::new(),
                other => other.to_string(),
            };
            let mut cells = row.clone();
            cells.remove(index);
            groups
                .entry(key)
                .or_insert_with(|| Table::new(columns.clone()))
                .rows
                .push(cells);
        }
        Ok(groups.into_iter().collect())
    }

    /// Rows as JSON objects, for parameterised batch queries
    pub fn to_json_rows(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let object: serde_json::Map<String, Value> = self
                    .columns
                    .iter()
                    .zip(row)
                    .filter(|(_, cell)| !cell.is_null())
                    .map(|(column, cell)| (column.clone(), cell.to_json()))
                    .collect();
                Value::Object(object)
            })
            .collect()
    }

    /// Write as CSV with a header row; nulls become empty fields
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(CellValue::to_csv_field))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write as JSON Lines: the column names first, then one array per row
    pub fn write_jsonl(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &self.columns)?;
        writeln!(writer)?;
        for row in &self.rows {
            serde_json::to_writer(&mut writer, row)?;
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_jsonl(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::InvalidInput(format!("{} is empty", path.display())))??;
        let mut table = Table::new(serde_json::from_str(&header)?);
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            table.push_row(serde_json::from_str(&line)?)?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_table() -> Table {
        let mut table = Table::new(vec!["id".into(), "amount".into(), "labels".into()]);
        table
            .push_row(vec![CellValue::Int(1), CellValue::Float(2.5), ":Order".into()])
            .unwrap();
        table
            .push_row(vec![CellValue::Int(2), CellValue::Null, "".into()])
            .unwrap();
        table
            .push_row(vec![CellValue::Int(3), CellValue::Int(4), ":Order".into()])
            .unwrap();
        table
    }

    #[test]
    fn test_display_keeps_float_point_and_capitalised_bools() {
        assert_eq!(CellValue::Float(5.0).to_string(), "5.0");
        assert_eq!(CellValue::Float(1.25).to_string(), "1.25");
        assert_eq!(CellValue::Bool(true).to_string(), "True");
        assert_eq!(CellValue::Int(-3).to_string(), "-3");
    }

    #[test]
    fn test_csv_field() {
        assert_eq!(CellValue::Null.to_csv_field(), "");
        assert_eq!(CellValue::Bool(false).to_csv_field(), "false");
    }

    #[test]
    fn test_column_kind() {
        let table = sample_table();
        assert_eq!(table.column_kind("id"), Some(ColumnKind::Integer));
        assert_eq!(table.column_kind("amount"), Some(ColumnKind::Float));
        assert_eq!(table.column_kind("labels"), Some(ColumnKind::String));
    }

    #[test]
    fn test_group_by_sorted_and_removes_key() {
        let groups = sample_table().group_by("labels").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "");
        assert_eq!(groups[0].1.len(), 1);
        assert_eq!(groups[1].0, ":Order");
        assert_eq!(groups[1].1.len(), 2);
        assert!(!groups[1].1.has_column("labels"));
    }

    #[test]
    fn test_drop_null_columns_and_rows() {
        let mut table = Table::new(vec!["a".into(), "b".into()]);
        table.push_row(vec![CellValue::Null, CellValue::Null]).unwrap();
        table.push_row(vec![CellValue::Int(1), CellValue::Null]).unwrap();
        table.drop_null_columns();
        assert_eq!(table.columns(), ["a"]);
        assert_eq!(table.null_rows(), vec![0]);
    }

    #[test]
    fn test_jsonl_round_trip_keeps_types() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache/orders.jsonl");
        let mut table = sample_table();
        table
            .push_row(vec![CellValue::Int(4), CellValue::Float(7.0), CellValue::Bool(true)])
            .unwrap();
        table.write_jsonl(&path).unwrap();
        let read = Table::read_jsonl(&path).unwrap();
        assert_eq!(read, table);
    }

    #[test]
    fn test_write_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        sample_table().write_csv(&path).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text, "id,amount,labels\n1,2.5,:Order\n2,,\n3,4,:Order\n");
    }

    #[test]
    fn test_push_row_checks_width() {
        let mut table = Table::new(vec!["a".into()]);
        assert!(table.push_row(vec![]).is_err());
    }

    #[test]
    fn test_sort_cmp_nulls_last() {
        let mut values = vec![CellValue::Null, "b".into(), "a".into()];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(values, vec!["a".into(), "b".into(), CellValue::Null]);
    }
}
