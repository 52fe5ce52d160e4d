//! Raw bytes → [`Dataset`].
//!
//! One [`Parser`] per file format. Parsers are lenient about individual rows: a malformed
//! row is skipped and reported as a `malformed_row` finding, and only a file that cannot be
//! read at all (or one with too many bad rows) fails with [`FormataError::Parse`].

mod csv_parser;
#[cfg(feature = "excel")]
mod excel_parser;
mod json_parser;
mod markdown_parser;

pub use csv_parser::CsvParser;
#[cfg(feature = "excel")]
pub use excel_parser::ExcelParser;
pub use json_parser::JsonParser;
pub use markdown_parser::MarkdownParser;

use std::time::Instant;
use tracing::{debug, warn};

use crate::constants::{format_from_filename, FORMAT_CSV, FORMAT_EXCEL, FORMAT_JSON, FORMAT_MARKDOWN};
use crate::domain::{codes, Dataset, Stage, ValidationError, Value};
use crate::error::{FormataError, Result};
use crate::observability::metrics;

/// A parsed dataset plus the rows that were skipped on the way.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub dataset: Dataset,
    pub issues: Vec<ValidationError>,
}

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Fraction of malformed rows tolerated before the whole parse fails.
    pub max_malformed_fraction: f64,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_malformed_fraction: 0.25,
        }
    }
}

pub trait Parser: Send + Sync {
    fn format(&self) -> &'static str;
    fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome>;
}

/// A wrapper that adds metrics to any parser implementation
pub struct MetricsParser<P: Parser> {
    inner: P,
}

impl<P: Parser> MetricsParser<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

impl<P: Parser> Parser for MetricsParser<P> {
    fn format(&self) -> &'static str {
        self.inner.format()
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome> {
        let start_time = Instant::now();
        metrics::parser::bytes(bytes.len());
        let result = self.inner.parse(bytes);
        metrics::stage::duration(Stage::Parse.as_str(), start_time.elapsed().as_secs_f64());
        match &result {
            Ok(outcome) => {
                metrics::stage::rows(Stage::Parse.as_str(), outcome.dataset.row_count());
                debug!(
                    "Parsed {} input: rows={} columns={} skipped={}",
                    self.inner.format(),
                    outcome.dataset.row_count(),
                    outcome.dataset.column_count(),
                    outcome.issues.len()
                );
            }
            Err(e) => {
                metrics::parser::parse_error(self.inner.format());
                warn!("Failed to parse {} input: {}", self.inner.format(), e);
            }
        }
        result
    }
}

/// Build the parser for a format name (see [`crate::constants`]).
pub fn parser_for(format: &str, options: ParseOptions) -> Result<Box<dyn Parser>> {
    match format {
        FORMAT_CSV => Ok(Box::new(MetricsParser::new(CsvParser::new(options)))),
        FORMAT_JSON => Ok(Box::new(MetricsParser::new(JsonParser))),
        FORMAT_MARKDOWN => Ok(Box::new(MetricsParser::new(MarkdownParser))),
        #[cfg(feature = "excel")]
        FORMAT_EXCEL => Ok(Box::new(MetricsParser::new(ExcelParser))),
        #[cfg(not(feature = "excel"))]
        FORMAT_EXCEL => Err(FormataError::UnsupportedFormat(
            "excel (built without the `excel` feature)".to_string(),
        )),
        other => Err(FormataError::UnsupportedFormat(other.to_string())),
    }
}

/// Resolve the format from the filename's extension and parse.
pub fn parse_file(filename: &str, bytes: &[u8], options: ParseOptions) -> Result<ParseOutcome> {
    let format = format_from_filename(filename)
        .ok_or_else(|| FormataError::UnsupportedFormat(filename.to_string()))?;
    parser_for(format, options)?.parse(bytes)
}

pub(crate) fn malformed_row(format: &str, line: u64, message: impl Into<String>) -> ValidationError {
    ValidationError::warning(Stage::Parse.as_str(), codes::MALFORMED_ROW, message)
        .with_value(Value::Text(format!("{} line {}", format, line)))
}

/// Header cells → column names: blanks become `column_{n}`, repeats get a numeric suffix.
pub(crate) fn header_names<'a, I>(cells: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let names = cells.into_iter().enumerate().map(|(i, cell)| {
        let cell = cell.trim();
        if cell.is_empty() {
            format!("column_{}", i + 1)
        } else {
            cell.to_string()
        }
    });
    crate::domain::dedupe_names(names)
}

/// Fail when the share of malformed rows exceeds the tolerated fraction.
pub(crate) fn check_malformed_fraction(
    format: &str,
    malformed: usize,
    total: usize,
    first_bad_line: u64,
    max_fraction: f64,
) -> Result<()> {
    if total == 0 || malformed == 0 {
        return Ok(());
    }
    let fraction = malformed as f64 / total as f64;
    if fraction > max_fraction {
        return Err(FormataError::parse(
            format,
            first_bad_line as usize,
            format!(
                "{} of {} rows are malformed ({:.0}% > {:.0}% tolerated)",
                malformed,
                total,
                fraction * 100.0,
                max_fraction * 100.0
            ),
        ));
    }
    Ok(())
}
