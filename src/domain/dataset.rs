use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;

use super::value::{ColumnType, Value};
use crate::error::{FormataError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Unknown,
            nullable: true,
        }
    }

    pub fn typed(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }
}

/// Ordered rows plus column metadata. Every row is a `Vec<Value>` aligned with `columns`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "DatasetRepr")]
pub struct Dataset {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct DatasetRepr {
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<Value>>,
}

impl From<DatasetRepr> for Dataset {
    // JSON has no datetime type, so typed columns are restored from their metadata.
    fn from(repr: DatasetRepr) -> Self {
        let mut dataset = Dataset {
            columns: repr.columns,
            rows: repr.rows,
        };
        for (idx, meta) in dataset.columns.iter().enumerate() {
            if meta.column_type != ColumnType::DateTime {
                continue;
            }
            for row in dataset.rows.iter_mut() {
                if let Some(Some(v)) = row.get(idx).map(|v| v.coerce(ColumnType::DateTime)) {
                    row[idx] = v;
                }
            }
        }
        dataset
    }
}

/// One row viewed as an ordered name → value map.
pub struct Record<'a> {
    columns: &'a [ColumnMeta],
    values: &'a [Value],
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .and_then(|idx| self.values.get(idx))
    }
}

impl Serialize for Record<'_> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (meta, value) in self.columns.iter().zip(self.values) {
            map.serialize_entry(&meta.name, value)?;
        }
        map.end()
    }
}

/// Make names unique, keeping the first occurrence and suffixing repeats with `_1`, `_2`, ...
pub fn dedupe_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        let mut candidate = name.clone();
        let mut suffix = 1;
        while seen.contains(&candidate) {
            candidate = format!("{}_{}", name, suffix);
            suffix += 1;
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }
    out
}

/// Shape of a dataset plus its first rows, kept as the "before" side of a job result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetSummary {
    pub row_count: usize,
    pub columns: Vec<ColumnMeta>,
    pub sample: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn new<I, S>(column_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: column_names.into_iter().map(ColumnMeta::new).collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_columns(columns: Vec<ColumnMeta>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(FormataError::pipeline(
                "dataset",
                format!(
                    "row has {} values but dataset declares {} columns",
                    row.len(),
                    self.columns.len()
                ),
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().filter_map(move |row| row.get(idx))
    }

    pub fn null_count(&self, idx: usize) -> usize {
        self.column_values(idx).filter(|v| v.is_null()).count()
    }

    /// The column's declared type, or the type of its first non-null value when undeclared.
    pub fn effective_type(&self, idx: usize) -> ColumnType {
        match self.columns.get(idx).map(|c| c.column_type) {
            Some(ColumnType::Unknown) | None => ColumnType::infer_first(self.column_values(idx)),
            Some(declared) => declared,
        }
    }

    /// Keep the rows whose position in `keep` is `true`, preserving order.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.rows
            .retain(|_| flags.next().copied().unwrap_or(true));
    }

    pub fn remove_column(&mut self, idx: usize) -> Option<ColumnMeta> {
        if idx >= self.columns.len() {
            return None;
        }
        for row in self.rows.iter_mut() {
            row.remove(idx);
        }
        Some(self.columns.remove(idx))
    }

    /// Recompute `nullable` for every column from the current rows.
    pub fn refresh_nullability(&mut self) {
        for idx in 0..self.columns.len() {
            let has_null = self.rows.iter().any(|row| row[idx].is_null());
            self.columns[idx].nullable = has_null;
        }
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> + '_ {
        self.rows.iter().map(move |values| Record {
            columns: &self.columns,
            values,
        })
    }

    pub fn to_records(&self) -> Vec<Record<'_>> {
        self.records().collect()
    }

    /// A copy with at most `limit` rows.
    pub fn head(&self, limit: usize) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(limit).cloned().collect(),
        }
    }

    pub fn summary(&self, sample_rows: usize) -> DatasetSummary {
        DatasetSummary {
            row_count: self.rows.len(),
            columns: self.columns.clone(),
            sample: self.rows.iter().take(sample_rows).cloned().collect(),
        }
    }
}
