/// File format names, shared by the parser, the output writers and the HTTP surface.
/// A file's format is derived from its extension via [`format_from_filename`].

pub const FORMAT_CSV: &str = "csv";
pub const FORMAT_JSON: &str = "json";
pub const FORMAT_EXCEL: &str = "excel";
pub const FORMAT_MARKDOWN: &str = "markdown";

// Tokens that normalize to null, compared after trimming and lowercasing
pub const NULL_TOKENS: &[&str] = &["", "null", "none", "nan", "na", "n/a", "undefined"];

// Keys a JSON document may wrap its row array under
pub const JSON_WRAPPER_KEYS: &[&str] = &["records", "data", "rows", "items", "results"];

// Reserved pseudo-columns understood by the filter engine
pub const FILTER_TEXT_SEARCH: &str = "_textSearch";
pub const FILTER_DATE_RANGE: &str = "_dateRange";
pub const FILTER_NUMERIC_RANGE: &str = "_numericRange";

// Progress marks reported after each stage completes
pub const PROGRESS_PARSED: f64 = 0.1;
pub const PROGRESS_NORMALIZED: f64 = 0.2;
pub const PROGRESS_FILTERED: f64 = 0.4;
pub const PROGRESS_DENOISED: f64 = 0.6;
pub const PROGRESS_VALIDATED: f64 = 0.8;
pub const PROGRESS_FINALIZED: f64 = 0.95;

/// Map a filename to one of the format names above, by extension.
pub fn format_from_filename(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "csv" | "txt" => Some(FORMAT_CSV),
        "json" => Some(FORMAT_JSON),
        "xlsx" | "xls" | "xlsm" | "ods" => Some(FORMAT_EXCEL),
        "md" | "markdown" => Some(FORMAT_MARKDOWN),
        _ => None,
    }
}

/// Get all supported format names
pub fn get_supported_formats() -> Vec<&'static str> {
    vec![FORMAT_CSV, FORMAT_JSON, FORMAT_EXCEL, FORMAT_MARKDOWN]
}
