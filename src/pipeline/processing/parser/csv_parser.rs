use csv::{ReaderBuilder, Trim};
use tracing::debug;

use super::{check_malformed_fraction, header_names, malformed_row, ParseOptions, ParseOutcome, Parser};
use crate::constants::FORMAT_CSV;
use crate::domain::{Dataset, Value};
use crate::error::{FormataError, Result};

/// Comma-separated input with a header row. Cells are trimmed and fully empty rows dropped.
pub struct CsvParser {
    pub delimiter: u8,
    pub options: ParseOptions,
}

impl CsvParser {
    pub fn new(options: ParseOptions) -> Self {
        Self {
            delimiter: b',',
            options,
        }
    }
}

impl Parser for CsvParser {
    fn format(&self) -> &'static str {
        FORMAT_CSV
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome> {
        debug!("CsvParser: start bytes_len={}", bytes.len());
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(FormataError::parse(FORMAT_CSV, 1, "file is empty"));
        }

        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(bytes);

        let headers = reader.headers().map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or(1);
            FormataError::parse(FORMAT_CSV, line as usize, e.to_string())
        })?;
        let mut dataset = Dataset::new(header_names(headers.iter()));
        let width = dataset.column_count();

        let mut issues = Vec::new();
        let mut total = 0usize;
        let mut malformed = 0usize;
        let mut first_bad_line = 0u64;

        for result in reader.records() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or(0);
                    total += 1;
                    malformed += 1;
                    if first_bad_line == 0 {
                        first_bad_line = line;
                    }
                    issues.push(malformed_row(FORMAT_CSV, line, format!("unreadable row: {}", e)));
                    continue;
                }
            };
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let row: Vec<Value> = record.iter().map(Value::from_raw).collect();
            if row.iter().all(Value::is_null) {
                continue;
            }
            total += 1;
            if row.len() != width {
                malformed += 1;
                if first_bad_line == 0 {
                    first_bad_line = line;
                }
                issues.push(malformed_row(
                    FORMAT_CSV,
                    line,
                    format!("expected {} fields, found {}", width, row.len()),
                ));
                continue;
            }
            dataset.push_row(row)?;
        }

        check_malformed_fraction(
            FORMAT_CSV,
            malformed,
            total,
            first_bad_line,
            self.options.max_malformed_fraction,
        )?;

        Ok(ParseOutcome { dataset, issues })
    }
}
