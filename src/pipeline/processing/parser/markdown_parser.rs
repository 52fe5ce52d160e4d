use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{header_names, malformed_row, ParseOutcome, Parser};
use crate::constants::FORMAT_MARKDOWN;
use crate::domain::{Dataset, Value};
use crate::error::{FormataError, Result};

static SEPARATOR_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\|?\s*:?-{3,}:?\s*(\|\s*:?-{3,}:?\s*)*\|?$").expect("valid separator regex")
});

/// The first pipe table in a Markdown document. Without a table, each paragraph becomes a
/// row of a single `content` column.
pub struct MarkdownParser;

impl Parser for MarkdownParser {
    fn format(&self) -> &'static str {
        FORMAT_MARKDOWN
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome> {
        debug!("MarkdownParser: start bytes_len={}", bytes.len());
        let text = std::str::from_utf8(bytes).map_err(|e| {
            FormataError::parse(FORMAT_MARKDOWN, 1, format!("invalid UTF-8: {}", e))
        })?;
        let lines: Vec<&str> = text.lines().collect();

        let table_start = lines.windows(2).position(|pair| {
            pair[0].contains('|') && SEPARATOR_ROW.is_match(pair[1].trim())
        });

        match table_start {
            Some(start) => parse_table(&lines, start),
            None => parse_paragraphs(&lines),
        }
    }
}

fn split_row(line: &str) -> Vec<&str> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);
    trimmed.split('|').map(str::trim).collect()
}

fn parse_table(lines: &[&str], start: usize) -> Result<ParseOutcome> {
    let mut dataset = Dataset::new(header_names(split_row(lines[start])));
    let width = dataset.column_count();
    let mut issues = Vec::new();

    for (offset, line) in lines[start + 2..].iter().enumerate() {
        if line.trim().is_empty() || !line.contains('|') {
            break;
        }
        let line_no = (start + 3 + offset) as u64;
        let mut row: Vec<Value> = split_row(line).into_iter().map(Value::from_raw).collect();
        if row.len() > width {
            issues.push(malformed_row(
                FORMAT_MARKDOWN,
                line_no,
                format!("expected {} cells, found {}; extra cells dropped", width, row.len()),
            ));
            row.truncate(width);
        }
        // Short rows are common in hand-written tables
        row.resize(width, Value::Null);
        if row.iter().all(Value::is_null) {
            continue;
        }
        dataset.push_row(row)?;
    }

    Ok(ParseOutcome { dataset, issues })
}

fn parse_paragraphs(lines: &[&str]) -> Result<ParseOutcome> {
    let mut dataset = Dataset::new(["content"]);
    let mut current: Vec<&str> = Vec::new();
    for line in lines.iter().chain(std::iter::once(&"")) {
        if line.trim().is_empty() {
            if !current.is_empty() {
                dataset.push_row(vec![Value::Text(current.join("\n"))])?;
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    Ok(ParseOutcome {
        dataset,
        issues: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_pipe_table() {
        let doc = "# People\n\nSome intro.\n\n| Name | Age |\n|:-----|----:|\n| Ann | 30 |\n| Bob |\n\n| x | y |\n|---|---|\n| 1 | 2 |\n";
        let outcome = MarkdownParser.parse(doc.as_bytes()).unwrap();
        let ds = outcome.dataset;
        assert_eq!(ds.column_names(), vec!["Name", "Age"]);
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.rows[1], vec![Value::from("Bob"), Value::Null]);
        assert!(outcome.issues.is_empty());
    }

    #[test]
    fn test_extra_cells_are_reported() {
        let doc = "a|b\n---|---\n1|2|3\n";
        let outcome = MarkdownParser.parse(doc.as_bytes()).unwrap();
        assert_eq!(outcome.dataset.rows[0], vec![Value::from("1"), Value::from("2")]);
        assert_eq!(outcome.issues.len(), 1);
    }

    #[test]
    fn test_paragraphs_without_table() {
        let doc = "First line\ncontinues\n\n\n\nSecond paragraph\n";
        let ds = MarkdownParser.parse(doc.as_bytes()).unwrap().dataset;
        assert_eq!(ds.column_names(), vec!["content"]);
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.rows[0][0], Value::from("First line\ncontinues"));
    }
}
