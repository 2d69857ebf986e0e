//! CSV preprocessing
//!
//! Turns one source file of a [`CsvStructure`] into a [`Table`] whose
//! columns are the structure's attributes, ready to be imported as records.
//! Preprocessed tables are cached as JSON Lines next to the source files.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::dataset::{Attribute, CsvStructure, Dtype, Sample};
use crate::error::{Error, Result};
use crate::table::{CellValue, Table};

/// Literals read as missing values when no explicit list is given
pub const DEFAULT_NA_VALUES: [&str; 19] = [
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

const DEFAULT_TRUE_VALUES: [&str; 3] = ["True", "TRUE", "true"];
const DEFAULT_FALSE_VALUES: [&str; 3] = ["False", "FALSE", "false"];

/// Fallback formats for sample bounds and untyped population columns
const FALLBACK_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
];

/// Reads and preprocesses the files of a dataset description
#[derive(Debug, Clone)]
pub struct Preprocessor {
    base_dir: PathBuf,
    use_preprocessed_files: bool,
    store_preprocessed_files: bool,
    seed: u64,
}

impl Preprocessor {
    /// `base_dir` is the directory `file_directory` entries are relative to
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            use_preprocessed_files: false,
            store_preprocessed_files: true,
            seed: 1,
        }
    }

    pub fn use_preprocessed_files(mut self, enabled: bool) -> Self {
        self.use_preprocessed_files = enabled;
        self
    }

    pub fn store_preprocessed_files(mut self, enabled: bool) -> Self {
        self.store_preprocessed_files = enabled;
        self
    }

    /// Seed for random samples
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Location of the cached table for a file
    pub fn preprocessed_path(&self, structure: &CsvStructure, file_name: &str, use_sample: bool) -> PathBuf {
        let stem = file_stem(file_name);
        let name = if use_sample && !structure.samples.is_empty() {
            format!("{}_sample.jsonl", stem)
        } else {
            format!("{}.jsonl", stem)
        };
        structure.preprocessed_directory(&self.base_dir).join(name)
    }

    /// Read one file of a structure, from the cache when allowed
    pub fn read_data_set(&self, structure: &CsvStructure, file_name: &str, use_sample: bool) -> Result<Table> {
        let cache_path = self.preprocessed_path(structure, file_name, use_sample);

        if self.use_preprocessed_files {
            if cache_path.exists() {
                info!(file = %file_name, cache = %cache_path.display(), "Using preprocessed file");
                return Table::read_jsonl(&cache_path);
            }
            warn!(
                file = %file_name,
                cache = %cache_path.display(),
                "No preprocessed file found, preprocessing the file instead"
            );
        }

        let table = self.prepare(structure, file_name, use_sample)?;
        if self.store_preprocessed_files {
            table.write_jsonl(&cache_path)?;
            debug!(cache = %cache_path.display(), "Stored preprocessed file");
        }
        Ok(table)
    }

    /// Preprocess a file without touching the cache
    pub fn prepare(&self, structure: &CsvStructure, file_name: &str, use_sample: bool) -> Result<Table> {
        if !file_name.ends_with(".csv") {
            return Err(Error::UnsupportedFileType(file_name.to_string()));
        }

        let sample = if use_sample && structure.has_datetime_attribute() {
            let sample = structure.sample_for(file_name);
            if sample.is_none() {
                warn!(structure = %structure.name, file = %file_name, "No sample population has been defined");
            }
            sample
        } else {
            None
        };

        let mut columns = structure.required_columns();
        if let Some(sample) = sample {
            if !columns.contains(&sample.population_column.as_str()) {
                columns.push(&sample.population_column);
            }
        }

        let mut source = self.read_source(structure, file_name, &columns)?;
        if let Some(sample) = sample {
            self.apply_sample(sample, &mut source)?;
        }
        let positions: Vec<usize> = (0..source.len()).collect();

        let mut frame = Frame {
            table: build_attribute_table(structure, &source)?,
            positions,
        };

        if structure.split_combined_events {
            frame = split_combined_events(structure, frame)?;
        }

        if structure.add_log {
            let values = vec![CellValue::from(file_name); frame.table.len()];
            frame.table.set_column("log", values)?;
        }
        if structure.add_index {
            let values = frame
                .positions
                .iter()
                .map(|&position| CellValue::Int(position as i64))
                .collect();
            frame.table.set_column("index", values)?;
        }

        frame.table.drop_null_columns();
        let null_rows: HashSet<usize> = frame.table.null_rows().into_iter().collect();
        if !null_rows.is_empty() {
            frame.table.retain_rows(|row| !null_rows.contains(&row));
            let mut row = 0;
            frame.positions.retain(|_| {
                let kept = !null_rows.contains(&row);
                row += 1;
                kept
            });
        }

        let stem = file_stem(file_name);
        let lifecycles = frame.table.column("lifecycle").map(|values| {
            values
                .into_iter()
                .map(|value| value.to_string())
                .collect::<Vec<_>>()
        });
        let record_ids = frame
            .positions
            .iter()
            .enumerate()
            .map(|(row, position)| match (&lifecycles, structure.split_combined_events) {
                (Some(lifecycles), true) => {
                    CellValue::Str(format!("{}_{}_{}", position, lifecycles[row], stem))
                }
                _ => CellValue::Str(format!("{}_{}", position, stem)),
            })
            .collect();
        frame.table.set_column("recordId", record_ids)?;

        info!(
            structure = %structure.name,
            file = %file_name,
            rows = frame.table.len(),
            columns = frame.table.columns().len(),
            "Preprocessed file"
        );
        Ok(frame.table)
    }

    fn read_source(&self, structure: &CsvStructure, file_name: &str, columns: &[&str]) -> Result<Table> {
        let path = structure.directory(&self.base_dir).join(file_name);
        let text = read_text(&path, &structure.encoding)?;

        let delimiter = structure.delimiter()?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(text.as_bytes());
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|header| header.trim_start_matches('\u{feff}').to_string())
            .collect();

        let indices = columns
            .iter()
            .map(|column| {
                headers
                    .iter()
                    .position(|header| header == column)
                    .ok_or_else(|| Error::MissingColumn {
                        file: file_name.to_string(),
                        column: column.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); columns.len()];
        for record in reader.records() {
            let record = record?;
            for (slot, &index) in indices.iter().enumerate() {
                let value = record.get(index).unwrap_or("");
                raw[slot].push(if DEFAULT_NA_VALUES.contains(&value) {
                    None
                } else {
                    Some(value.to_string())
                });
            }
        }

        let dtypes = column_dtypes(structure)?;
        let mut table = Table::new(columns.iter().map(|c| c.to_string()).collect());
        let typed = columns
            .iter()
            .zip(raw)
            .map(|(column, values)| {
                type_column(column, values, dtypes.get(*column).copied(), structure)
            })
            .collect::<Result<Vec<_>>>()?;

        let rows = typed.first().map(Vec::len).unwrap_or(0);
        for row in 0..rows {
            table.push_row(typed.iter().map(|column| column[row].clone()).collect())?;
        }
        Ok(table)
    }

    fn apply_sample(&self, sample: &Sample, table: &mut Table) -> Result<()> {
        let population: Vec<CellValue> = table
            .column(&sample.population_column)
            .ok_or_else(|| Error::InvalidSample(format!(
                "population column '{}' was not read",
                sample.population_column
            )))?
            .into_iter()
            .cloned()
            .collect();
        let before = table.len();

        if sample.use_random_sample {
            let size = sample.size.ok_or_else(|| {
                Error::InvalidSample("a random sample needs a size".to_string())
            })?;
            let mut unique: Vec<String> = Vec::new();
            for value in population.iter().filter(|value| !value.is_null()) {
                let key = value.to_string();
                if !unique.contains(&key) {
                    unique.push(key);
                }
            }
            if size > unique.len() {
                return Err(Error::InvalidSample(format!(
                    "sample size {} exceeds the {} distinct values of '{}'",
                    size,
                    unique.len(),
                    sample.population_column
                )));
            }
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
            let selection: HashSet<&String> = unique.choose_multiple(&mut rng, size).collect();
            table.retain_rows(|row| {
                !population[row].is_null() && selection.contains(&population[row].to_string())
            });
        } else if let Some(ids) = &sample.ids {
            let ids: HashSet<String> = ids
                .iter()
                .map(|id| CellValue::from_json(id).to_string())
                .collect();
            table.retain_rows(|row| !population[row].is_null() && ids.contains(&population[row].to_string()));
        } else if let Some(between) = &sample.between {
            let [start, end] = between.as_slice() else {
                return Err(Error::InvalidSample(format!(
                    "'between' needs a start and an end, found {} value(s)",
                    between.len()
                )));
            };
            let format = sample.datetime_format.as_deref();
            let start = parse_bound(start, format)?;
            let end = parse_bound(end, format)?;
            let moments = population
                .iter()
                .map(|value| match value {
                    CellValue::Null => Ok(None),
                    other => parse_moment(&other.to_string(), format).map(Some).ok_or_else(|| {
                        Error::InvalidSample(format!(
                            "cannot parse '{}' in '{}' as a datetime",
                            other, sample.population_column
                        ))
                    }),
                })
                .collect::<Result<Vec<_>>>()?;
            table.retain_rows(|row| matches!(moments[row], Some(moment) if moment >= start && moment <= end));
        }

        debug!(
            population_column = %sample.population_column,
            before,
            after = table.len(),
            "Applied sample"
        );
        Ok(())
    }
}

/// A table plus the source row position of every row
struct Frame {
    table: Table,
    positions: Vec<usize>,
}

fn file_stem(file_name: &str) -> &str {
    file_name.strip_suffix(".csv").unwrap_or(file_name)
}

fn read_text(path: &Path, encoding: &str) -> Result<String> {
    let bytes = fs::read(path)?;
    match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
        "utf-8" | "utf8" | "utf-8-sig" => String::from_utf8(bytes).map_err(|e| {
            Error::InvalidInput(format!("{} is not valid UTF-8: {}", path.display(), e))
        }),
        "latin-1" | "latin1" | "iso-8859-1" => Ok(bytes.iter().map(|&b| b as char).collect()),
        other => Err(Error::InvalidInput(format!(
            "encoding '{}' is not supported (use utf-8 or latin-1)",
            other
        ))),
    }
}

/// First declared dtype per source column
fn column_dtypes(structure: &CsvStructure) -> Result<HashMap<String, Dtype>> {
    let mut dtypes: HashMap<String, Dtype> = HashMap::new();
    for attribute in &structure.attributes {
        for column in &attribute.columns {
            let Some(dtype) = column.parsed_dtype()? else {
                continue;
            };
            match dtypes.get(&column.name) {
                None => {
                    dtypes.insert(column.name.clone(), dtype);
                }
                Some(existing) if *existing != dtype => {
                    warn!(
                        column = %column.name,
                        first = %existing,
                        ignored = %dtype,
                        "Multiple dtypes defined for column"
                    );
                }
                Some(_) => {}
            }
        }
    }
    Ok(dtypes)
}

fn parse_float(value: &str, decimal: &str) -> Option<f64> {
    if decimal == "." {
        value.trim().parse().ok()
    } else {
        value.trim().replace(decimal, ".").parse().ok()
    }
}

fn parse_bool(value: &str, structure: &CsvStructure) -> Option<bool> {
    if structure.true_values.iter().any(|v| v == value) || DEFAULT_TRUE_VALUES.contains(&value) {
        Some(true)
    } else if structure.false_values.iter().any(|v| v == value) || DEFAULT_FALSE_VALUES.contains(&value) {
        Some(false)
    } else {
        None
    }
}

fn type_column(
    column: &str,
    values: Vec<Option<String>>,
    dtype: Option<Dtype>,
    structure: &CsvStructure,
) -> Result<Vec<CellValue>> {
    let dtype = match dtype {
        Some(dtype) => dtype,
        None => infer_dtype(&values, structure),
    };

    values
        .into_iter()
        .map(|value| {
            let Some(value) = value else {
                return Ok(CellValue::Null);
            };
            let invalid = || Error::InvalidValue {
                column: column.to_string(),
                value: value.clone(),
                dtype: dtype.to_string(),
            };
            Ok(match dtype {
                Dtype::Str => CellValue::Str(value.clone()),
                Dtype::Int => CellValue::Int(value.trim().parse().map_err(|_| invalid())?),
                Dtype::Float => CellValue::Float(parse_float(&value, &structure.decimal).ok_or_else(invalid)?),
                Dtype::Bool => CellValue::Bool(parse_bool(&value, structure).ok_or_else(invalid)?),
            })
        })
        .collect()
}

fn infer_dtype(values: &[Option<String>], structure: &CsvStructure) -> Dtype {
    let present: Vec<&str> = values.iter().flatten().map(String::as_str).collect();
    if present.is_empty() {
        return Dtype::Str;
    }
    if present.iter().all(|value| value.trim().parse::<i64>().is_ok()) {
        Dtype::Int
    } else if present.iter().all(|value| parse_float(value, &structure.decimal).is_some()) {
        Dtype::Float
    } else if present.iter().all(|value| parse_bool(value, structure).is_some()) {
        Dtype::Bool
    } else {
        Dtype::Str
    }
}

/// Slice by characters; negative bounds count from the end
pub fn slice_chars(value: &str, start: Option<i64>, end: Option<i64>) -> String {
    let chars: Vec<char> = value.chars().collect();
    let len = chars.len() as i64;
    let clamp = |index: i64| {
        if index < 0 {
            (len + index).max(0)
        } else {
            index.min(len)
        }
    };
    let start = start.map(clamp).unwrap_or(0);
    let end = end.map(clamp).unwrap_or(len);
    if start >= end {
        return String::new();
    }
    chars[start as usize..end as usize].iter().collect()
}

/// Derive one attribute's values from the source table
fn attribute_values(attribute: &Attribute, source: &Table) -> Result<Vec<CellValue>> {
    let source_column = |name: &str| -> Result<Vec<CellValue>> {
        source
            .column(name)
            .map(|values| values.into_iter().cloned().collect())
            .ok_or_else(|| Error::MissingColumn {
                file: attribute.name.clone(),
                column: name.to_string(),
            })
    };

    let mut parts: Vec<Vec<CellValue>> = Vec::with_capacity(attribute.columns.len());
    for (i, column) in attribute.columns.iter().enumerate() {
        let mut values = source_column(&column.name)?;

        if column.has_range() {
            for value in values.iter_mut().filter(|value| !value.is_null()) {
                *value = CellValue::Str(slice_chars(&value.to_string(), column.range_start, column.range_end));
            }
        }

        if !column.nan_values.is_empty() {
            for value in values.iter_mut() {
                if !value.is_null() && column.nan_values.contains(&value.to_string()) {
                    *value = CellValue::Null;
                }
            }
        }

        if let Some(na_rep_column) = attribute.na_rep_columns.get(i) {
            let replacements = source_column(&na_rep_column.name)?;
            for (value, replacement) in values.iter_mut().zip(replacements) {
                if value.is_null() {
                    *value = replacement;
                }
            }
        }

        if let Some(na_rep_value) = &attribute.na_rep_value {
            let replacement = CellValue::from_json(na_rep_value);
            for value in values.iter_mut().filter(|value| value.is_null()) {
                *value = replacement.clone();
            }
        }

        parts.push(values);
    }

    if !attribute.is_compound() {
        return Ok(parts.into_iter().next().unwrap_or_default());
    }

    let separator = attribute.separator.as_deref().unwrap_or_default();
    Ok((0..source.len())
        .map(|row| {
            let present: Vec<String> = parts
                .iter()
                .map(|part| &part[row])
                .filter(|value| !value.is_null())
                .map(CellValue::to_string)
                .collect();
            if present.is_empty() {
                CellValue::Null
            } else {
                CellValue::Str(present.join(separator))
            }
        })
        .collect())
}

fn build_attribute_table(structure: &CsvStructure, source: &Table) -> Result<Table> {
    let names: Vec<String> = structure.attributes.iter().map(|a| a.name.clone()).collect();
    let columns = structure
        .attributes
        .iter()
        .map(|attribute| attribute_values(attribute, source))
        .collect::<Result<Vec<_>>>()?;

    let mut table = Table::new(names);
    for row in 0..source.len() {
        table.push_row(columns.iter().map(|column| column[row].clone()).collect())?;
    }
    Ok(table)
}

const START_TIMESTAMP: &str = "startTimestamp";
const COMPLETE_TIMESTAMP: &str = "completeTimestamp";

/// Turn start/complete timestamps into one row per lifecycle transition
fn split_combined_events(structure: &CsvStructure, frame: Frame) -> Result<Frame> {
    if structure.attribute("timestamp").is_some() {
        return Err(Error::SplitEvents(
            "an attribute named timestamp is already defined".to_string(),
        ));
    }

    let start = structure.attribute(START_TIMESTAMP);
    let complete = structure.attribute(COMPLETE_TIMESTAMP);
    let lifecycles: Vec<(&str, &str)> = match (start, complete) {
        (Some(start), Some(complete)) => {
            let start_format = start.datetime_object.as_ref().map(|d| &d.format);
            let complete_format = complete.datetime_object.as_ref().map(|d| &d.format);
            if start_format != complete_format {
                return Err(Error::SplitEvents(
                    "startTimestamp and completeTimestamp have a different format".to_string(),
                ));
            }
            vec![(START_TIMESTAMP, "start"), (COMPLETE_TIMESTAMP, "complete")]
        }
        (Some(_), None) => vec![(START_TIMESTAMP, "start")],
        (None, Some(_)) => vec![(COMPLETE_TIMESTAMP, "complete")],
        (None, None) => {
            return Err(Error::SplitEvents(
                "neither startTimestamp nor completeTimestamp is defined".to_string(),
            ));
        }
    };

    let source = &frame.table;
    let mut columns: Vec<String> = Vec::with_capacity(source.columns().len() + 1);
    for column in source.columns() {
        match column.as_str() {
            START_TIMESTAMP | COMPLETE_TIMESTAMP => {
                if !columns.iter().any(|c| c == "timestamp") {
                    columns.push("timestamp".to_string());
                }
            }
            _ => columns.push(column.clone()),
        }
    }
    columns.push("lifecycle".to_string());

    // (timestamp, source position, lifecycle order, row)
    let mut rows: Vec<(CellValue, usize, usize, Vec<CellValue>)> = Vec::new();
    for (order, (timestamp_column, lifecycle)) in lifecycles.iter().enumerate() {
        for row in 0..source.len() {
            let timestamp = source.get(row, timestamp_column).cloned().unwrap_or(CellValue::Null);
            let out = columns
                .iter()
                .map(|column| match column.as_str() {
                    "timestamp" => timestamp.clone(),
                    "lifecycle" => CellValue::from(*lifecycle),
                    other => source.get(row, other).cloned().unwrap_or(CellValue::Null),
                })
                .collect();
            rows.push((timestamp, frame.positions[row], order, out));
        }
    }

    rows.sort_by(|a, b| {
        a.0.sort_cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut table = Table::new(columns);
    let mut positions = Vec::with_capacity(rows.len());
    for (_, position, _, row) in rows {
        table.push_row(row)?;
        positions.push(position);
    }
    Ok(Frame { table, positions })
}

fn parse_moment(value: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    let formats: Vec<&str> = match format {
        Some(format) => vec![format],
        None => FALLBACK_DATETIME_FORMATS.to_vec(),
    };
    formats.into_iter().find_map(|format| {
        NaiveDateTime::parse_from_str(value, format)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(value, format)
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
    })
}

fn parse_bound(value: &str, format: Option<&str>) -> Result<NaiveDateTime> {
    parse_moment(value, format)
        .or_else(|| parse_moment(value, None))
        .ok_or_else(|| Error::InvalidSample(format!("cannot parse sample bound '{}'", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    fn structure(value: Value) -> CsvStructure {
        crate::dataset::DatasetDescription::from_value(json!([value]))
            .unwrap()
            .structures
            .remove(0)
    }

    fn write(dir: &TempDir, name: &str, contents: &str) {
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join(name), contents).unwrap();
    }

    fn preprocessor(dir: &TempDir) -> Preprocessor {
        Preprocessor::new(dir.path()).store_preprocessed_files(false)
    }

    #[test]
    fn test_slice_chars() {
        assert_eq!(slice_chars("ABC123", Some(0), Some(-1)), "ABC12");
        assert_eq!(slice_chars("ABC123", Some(3), None), "123");
        assert_eq!(slice_chars("ABC123", Some(-3), None), "123");
        assert_eq!(slice_chars("ABC", Some(5), Some(9)), "");
        assert_eq!(slice_chars("ABC", Some(-10), Some(2)), "AB");
    }

    #[test]
    fn test_rejects_non_csv() {
        let dir = TempDir::new().unwrap();
        let s = structure(json!({"name": "o", "file_directory": "data", "file_names": ["o.xlsx"]}));
        let err = preprocessor(&dir).prepare(&s, "o.xlsx", false).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType(_)));
    }

    #[test]
    fn test_missing_column() {
        let dir = TempDir::new().unwrap();
        write(&dir, "o.csv", "a,b\n1,2\n");
        let s = structure(json!({
            "name": "o", "file_directory": "data", "file_names": ["o.csv"],
            "attributes": [{"name": "x", "columns": [{"name": "c"}]}]
        }));
        let err = preprocessor(&dir).prepare(&s, "o.csv", false).unwrap_err();
        assert!(matches!(err, Error::MissingColumn { ref column, .. } if column == "c"));
    }

    #[test]
    fn test_attribute_pipeline() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "orders.csv",
            "raw_code,first,last,alt,qty,flag\nABC123,Ann,Lee,,3,yes\nXYZ789,,Kim,backup,NA,no\n,,,,,\n",
        );
        let s = structure(json!({
            "name": "orders", "file_directory": "data", "file_names": ["orders.csv"],
            "true_values": ["yes"], "false_values": ["no"],
            "attributes": [
                {"name": "code", "columns": [{"name": "raw_code", "range_start": 0, "range_end": -1}]},
                {"name": "customer", "columns": [{"name": "first"}, {"name": "last"}], "separator": " "},
                {"name": "first_name", "columns": [{"name": "first"}], "na_rep_columns": [{"name": "alt"}]},
                {"name": "qty", "columns": [{"name": "qty"}], "na_rep_value": 0},
                {"name": "flag", "columns": [{"name": "flag"}]}
            ]
        }));
        let table = preprocessor(&dir).prepare(&s, "orders.csv", false).unwrap();

        assert_eq!(table.get(0, "code"), Some(&CellValue::from("ABC12")));
        assert_eq!(table.get(0, "customer"), Some(&CellValue::from("Ann Lee")));
        assert_eq!(table.get(1, "customer"), Some(&CellValue::from("Kim")));
        assert_eq!(table.get(1, "first_name"), Some(&CellValue::from("backup")));
        assert_eq!(table.get(1, "qty"), Some(&CellValue::Int(0)));
        assert_eq!(table.get(0, "flag"), Some(&CellValue::Bool(true)));
        assert_eq!(table.get(1, "flag"), Some(&CellValue::Bool(false)));
        assert_eq!(table.get(1, "recordId"), Some(&CellValue::from("1_orders")));
        // the empty third row only keeps the filled quantity, index and recordId
        assert_eq!(table.get(2, "qty"), Some(&CellValue::Int(0)));
        assert_eq!(table.get(2, "index"), Some(&CellValue::Int(2)));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_nan_values_and_forced_dtype() {
        let dir = TempDir::new().unwrap();
        write(&dir, "o.csv", "code;amount\n007;1,5\nunknown;2\n");
        let s = structure(json!({
            "name": "o", "file_directory": "data", "file_names": ["o.csv"],
            "seperator": ";", "decimal": ",", "add_index": false,
            "attributes": [
                {"name": "code", "columns": [{"name": "code", "dtype": "str", "nan_values": ["unknown"]}]},
                {"name": "amount", "columns": [{"name": "amount", "dtype": "float"}]}
            ]
        }));
        let table = preprocessor(&dir).prepare(&s, "o.csv", false).unwrap();
        assert_eq!(table.columns(), ["code", "amount", "recordId"]);
        assert_eq!(table.get(0, "code"), Some(&CellValue::from("007")));
        assert_eq!(table.get(1, "code"), Some(&CellValue::Null));
        assert_eq!(table.get(0, "amount"), Some(&CellValue::Float(1.5)));
        assert_eq!(table.get(1, "amount"), Some(&CellValue::Float(2.0)));
    }

    #[test]
    fn test_invalid_forced_dtype() {
        let dir = TempDir::new().unwrap();
        write(&dir, "o.csv", "n\nabc\n");
        let s = structure(json!({
            "name": "o", "file_directory": "data", "file_names": ["o.csv"],
            "attributes": [{"name": "n", "columns": [{"name": "n", "dtype": "int"}]}]
        }));
        let err = preprocessor(&dir).prepare(&s, "o.csv", false).unwrap_err();
        assert_eq!(err.code(), "E102");
    }

    #[test]
    fn test_add_log_and_drop_null_columns() {
        let dir = TempDir::new().unwrap();
        write(&dir, "o.csv", "a,b\n1,\n2,\n");
        let s = structure(json!({
            "name": "o", "file_directory": "data", "file_names": ["o.csv"], "add_log": true,
            "attributes": [
                {"name": "a", "columns": [{"name": "a"}]},
                {"name": "b", "columns": [{"name": "b"}]}
            ]
        }));
        let table = preprocessor(&dir).prepare(&s, "o.csv", false).unwrap();
        assert_eq!(table.columns(), ["a", "log", "index", "recordId"]);
        assert_eq!(table.get(1, "log"), Some(&CellValue::from("o.csv")));
    }

    fn event_structure(extra: Value) -> CsvStructure {
        let mut value = json!({
            "name": "events", "file_directory": "data", "file_names": ["events.csv"],
            "attributes": [
                {"name": "case", "columns": [{"name": "case"}]},
                {"name": "startTimestamp", "columns": [{"name": "start"}],
                 "datetime_object": {"format": "y-M-d H:m"}},
                {"name": "completeTimestamp", "columns": [{"name": "end"}],
                 "datetime_object": {"format": "y-M-d H:m"}}
            ]
        });
        if let (Some(target), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            for (key, v) in extra {
                target.insert(key.clone(), v.clone());
            }
        }
        structure(value)
    }

    #[test]
    fn test_split_combined_events() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "events.csv",
            "case,start,end\nc1,2024-01-01 10:00,2024-01-01 12:00\nc2,2024-01-01 11:00,2024-01-01 11:30\n",
        );
        let s = event_structure(json!({"split_combined_events": true}));
        let table = preprocessor(&dir).prepare(&s, "events.csv", false).unwrap();

        assert_eq!(table.columns(), ["case", "timestamp", "lifecycle", "index", "recordId"]);
        let order: Vec<String> = table
            .column("recordId")
            .unwrap()
            .into_iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(
            order,
            vec!["0_start_events", "1_start_events", "1_complete_events", "0_complete_events"]
        );
    }

    #[test]
    fn test_split_rejects_existing_timestamp() {
        let dir = TempDir::new().unwrap();
        write(&dir, "o.csv", "t\n2024\n");
        let s = structure(json!({
            "name": "o", "file_directory": "data", "file_names": ["o.csv"], "split_combined_events": true,
            "attributes": [{"name": "timestamp", "columns": [{"name": "t"}]}]
        }));
        let err = preprocessor(&dir).prepare(&s, "o.csv", false).unwrap_err();
        assert!(matches!(err, Error::SplitEvents(_)));
    }

    #[test]
    fn test_sample_by_ids() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "events.csv",
            "case,start,end\n1,2024-01-01 10:00,x\n2,2024-01-02 10:00,x\n3,2024-01-03 10:00,x\n",
        );
        let s = event_structure(json!({"sample": {"population_column": "case", "ids": [1, 3]}}));
        let table = preprocessor(&dir).prepare(&s, "events.csv", true).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1, "case"), Some(&CellValue::Int(3)));
        // positions are taken after sampling
        assert_eq!(table.get(1, "recordId"), Some(&CellValue::from("1_events")));
    }

    #[test]
    fn test_sample_between_dates() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "events.csv",
            "case,start,end\n1,2024-01-01 10:00,x\n2,2024-01-02 10:00,x\n3,2024-01-03 10:00,x\n",
        );
        let s = event_structure(json!({"sample": {
            "population_column": "start",
            "between": ["2024-01-02", "2024-01-03 10:00:00"],
            "datetime_format": "%Y-%m-%d %H:%M"
        }}));
        let table = preprocessor(&dir).prepare(&s, "events.csv", true).unwrap();
        let cases: Vec<&CellValue> = table.column("case").unwrap();
        assert_eq!(cases, vec![&CellValue::Int(2), &CellValue::Int(3)]);
    }

    #[test]
    fn test_random_sample_is_seeded() {
        let dir = TempDir::new().unwrap();
        let mut csv = String::from("case,start,end\n");
        for i in 0..20 {
            csv.push_str(&format!("{},2024-01-01 10:00,x\n", i % 10));
        }
        write(&dir, "events.csv", &csv);
        let s = event_structure(json!({"sample": {
            "population_column": "case", "use_random_sample": true, "size": 3
        }}));
        let first = preprocessor(&dir).prepare(&s, "events.csv", true).unwrap();
        let second = preprocessor(&dir).prepare(&s, "events.csv", true).unwrap();
        assert_eq!(first, second);
        let distinct: HashSet<String> = first
            .column("case")
            .unwrap()
            .into_iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(distinct.len(), 3);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn test_sample_ignored_without_datetime_attribute() {
        let dir = TempDir::new().unwrap();
        write(&dir, "o.csv", "case\n1\n2\n");
        let s = structure(json!({
            "name": "o", "file_directory": "data", "file_names": ["o.csv"],
            "sample": {"population_column": "case", "ids": [1]},
            "attributes": [{"name": "case", "columns": [{"name": "case"}]}]
        }));
        let table = preprocessor(&dir).prepare(&s, "o.csv", true).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_cache_is_written_and_reused() {
        let dir = TempDir::new().unwrap();
        write(&dir, "o.csv", "a\n1\n2\n");
        let s = structure(json!({
            "name": "o", "file_directory": "data", "file_names": ["o.csv"],
            "attributes": [{"name": "a", "columns": [{"name": "a"}]}]
        }));
        let processor = Preprocessor::new(dir.path());
        let table = processor.read_data_set(&s, "o.csv", false).unwrap();
        let cache = processor.preprocessed_path(&s, "o.csv", false);
        assert!(cache.ends_with("data/preprocessed_files/o.jsonl"));
        assert!(cache.exists());

        // the cached table wins over the changed source
        write(&dir, "o.csv", "a\n9\n");
        let cached = processor
            .clone()
            .use_preprocessed_files(true)
            .read_data_set(&s, "o.csv", false)
            .unwrap();
        assert_eq!(cached, table);
    }

    #[test]
    fn test_missing_cache_falls_back_to_source() {
        let dir = TempDir::new().unwrap();
        write(&dir, "o.csv", "a\n1\n");
        let s = structure(json!({
            "name": "o", "file_directory": "data", "file_names": ["o.csv"],
            "attributes": [{"name": "a", "columns": [{"name": "a"}]}]
        }));
        let table = preprocessor(&dir)
            .use_preprocessed_files(true)
            .read_data_set(&s, "o.csv", false)
            .unwrap();
        assert_eq!(table.len(), 1);
    }
}
