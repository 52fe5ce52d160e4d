use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use std::io::Cursor;
use tracing::debug;

use super::{header_names, ParseOutcome, Parser};
use crate::constants::FORMAT_EXCEL;
use crate::domain::{parse_datetime, Dataset, Value};
use crate::error::{FormataError, Result};

/// First worksheet of an `xlsx`/`xls`/`xlsm`/`ods` workbook, header in the first row.
pub struct ExcelParser;

impl Parser for ExcelParser {
    fn format(&self) -> &'static str {
        FORMAT_EXCEL
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome> {
        debug!("ExcelParser: start bytes_len={}", bytes.len());
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|e| FormataError::parse(FORMAT_EXCEL, 0, e.to_string()))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| FormataError::parse(FORMAT_EXCEL, 0, "workbook has no worksheets"))?
            .map_err(|e| FormataError::parse(FORMAT_EXCEL, 0, e.to_string()))?;

        let mut rows = range.rows();
        let header = rows
            .next()
            .ok_or_else(|| FormataError::parse(FORMAT_EXCEL, 1, "worksheet is empty"))?;
        let header_cells: Vec<String> = header.iter().map(|c| c.to_string()).collect();
        let mut dataset = Dataset::new(header_names(header_cells.iter().map(String::as_str)));
        let width = dataset.column_count();

        for cells in rows {
            let mut row: Vec<Value> = cells.iter().map(cell_value).collect();
            row.resize(width, Value::Null);
            if row.iter().all(Value::is_null) {
                continue;
            }
            dataset.push_row(row)?;
        }

        Ok(ParseOutcome {
            dataset,
            issues: Vec::new(),
        })
    }
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::String(s) => Value::from_raw(s),
        Data::Float(f) => Value::Number(*f),
        Data::Int(i) => Value::Number(*i as f64),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(_) => cell.as_datetime().map(Value::DateTime).unwrap_or(Value::Null),
        Data::DateTimeIso(s) => parse_datetime(s)
            .map(Value::DateTime)
            .unwrap_or_else(|| Value::Text(s.clone())),
        Data::DurationIso(s) => Value::Text(s.clone()),
    }
}
