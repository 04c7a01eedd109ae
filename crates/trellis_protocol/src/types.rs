//! Adapter contract types.
//!
//! Every file adapter speaks this vocabulary: probe results describe a file's
//! schema without reading it whole, read results describe what an eager load
//! actually did, stream chunks carry per-chunk bookkeeping, and validation
//! results report cheap pre-read checks with severity-tagged issues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Canonical Data Types
// ============================================================================

/// Canonical semantic data type inferred for a column.
///
/// Adapters infer these from sampled values; the frame layer stores cells
/// tagged with them. `Unknown` is the fallback when inference cannot decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Null/empty value (seen during inference before any non-null value)
    Null,
    /// Boolean (true/false, yes/no, 1/0)
    Boolean,
    /// 64-bit signed integer
    Integer,
    /// 64-bit floating point
    Float,
    /// Date (no time component)
    Date,
    /// Date + time, no timezone
    Datetime,
    /// Time only (no date component)
    Time,
    /// UTF-8 string (default/fallback for typed data)
    #[default]
    String,
    /// Raw bytes
    Binary,
    /// Inference could not decide
    Unknown,
}

impl DataType {
    pub const ALL: &'static [DataType] = &[
        DataType::Null,
        DataType::Boolean,
        DataType::Integer,
        DataType::Float,
        DataType::Date,
        DataType::Datetime,
        DataType::Time,
        DataType::String,
        DataType::Binary,
        DataType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Time => "time",
            Self::String => "string",
            Self::Binary => "binary",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "null" => Some(Self::Null),
            "boolean" | "bool" => Some(Self::Boolean),
            "integer" | "int" | "int64" | "int32" | "i64" | "i32" => Some(Self::Integer),
            "float" | "float64" | "float32" | "f64" | "f32" | "decimal" => Some(Self::Float),
            "date" => Some(Self::Date),
            "datetime" | "timestamp" => Some(Self::Datetime),
            "time" => Some(Self::Time),
            "string" | "str" | "utf8" => Some(Self::String),
            "binary" => Some(Self::Binary),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Returns true if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }

    /// Returns true if this type is temporal.
    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::Datetime | DataType::Time)
    }

    /// Relaxed equivalence used by schema-rule validation: a declared type
    /// matches any width of the same family ("int" matches integer, etc.).
    pub fn matches_declared(&self, declared: &str) -> bool {
        match DataType::parse(declared) {
            Some(expected) => match expected {
                DataType::Datetime => self.is_temporal(),
                other => *self == other,
            },
            None => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Adapter Metadata
// ============================================================================

/// Compression formats an adapter can see through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Gzip,
    Zstd,
}

/// What an adapter can and cannot do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterCapabilities {
    pub supports_streaming: bool,
    pub supports_schema_inference: bool,
    pub supports_random_access: bool,
    pub supports_column_selection: bool,
    /// Soft guidance only; adapters never refuse based on this.
    pub max_recommended_file_size_mb: Option<u64>,
    pub supported_compressions: Vec<CompressionType>,
    pub supports_multiple_sheets: bool,
}

/// Static description an adapter hands the registry at registration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterMetadata {
    /// Stable identifier ("csv", "excel", "json", "parquet")
    pub adapter_id: String,
    /// Human-readable name
    pub name: String,
    pub version: String,
    /// Extensions handled, dot-prefixed and lowercased at registration
    pub file_extensions: Vec<String>,
    pub mime_types: Vec<String>,
    pub capabilities: AdapterCapabilities,
    pub description: String,
}

// ============================================================================
// Probe / Read / Stream Results
// ============================================================================

/// Column-level schema information from a probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Ordinal position in the source
    pub position: usize,
    pub inferred_type: DataType,
    pub nullable: bool,
    /// Up to 10 sampled values, rendered as JSON scalars
    pub sample_values: Vec<serde_json::Value>,
    pub null_count: usize,
    pub distinct_count_estimate: Option<usize>,
}

/// Per-sheet information for workbook formats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetInfo {
    pub sheet_name: String,
    pub sheet_index: usize,
    pub row_count_estimate: Option<usize>,
    pub column_count: Option<usize>,
}

/// Result of `probe_schema`: what the file looks like without reading it all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaProbeResult {
    pub file_path: String,
    pub file_size_bytes: u64,
    pub adapter_id: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count_estimate: Option<usize>,
    /// True when the estimate is an exact count
    pub row_count_exact: bool,
    pub encoding_detected: Option<String>,
    pub delimiter_detected: Option<String>,
    pub has_header_row: bool,
    pub sheets: Option<Vec<SheetInfo>>,
    pub compression_detected: Option<CompressionType>,
    pub probed_at: DateTime<Utc>,
    pub probe_duration_ms: f64,
    pub sample_rows_read: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Options accepted by `probe_schema` and `read_dataframe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadOptions {
    /// Columns to keep (order preserved); None keeps all
    pub columns: Option<Vec<String>>,
    pub exclude_columns: Option<Vec<String>>,
    pub row_limit: Option<usize>,
    pub skip_rows: usize,
    /// String values treated as null on read
    pub null_values: Vec<String>,
    /// Rows sampled for schema inference
    pub infer_schema_length: usize,
    /// Adapter-specific extras: "delimiter", "sheet_name", "sheet_index", ...
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            columns: None,
            exclude_columns: None,
            row_limit: None,
            skip_rows: 0,
            null_values: Vec::new(),
            infer_schema_length: 1000,
            extra: HashMap::new(),
        }
    }
}

impl ReadOptions {
    /// Fetch a string-valued extra option.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }

    /// Fetch an integer-valued extra option.
    pub fn extra_usize(&self, key: &str) -> Option<usize> {
        self.extra.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
    }
}

/// Metadata describing what an eager read actually did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResult {
    pub file_path: String,
    pub adapter_id: String,
    pub rows_read: usize,
    pub columns_read: usize,
    pub bytes_read: u64,
    pub read_duration_ms: f64,
    pub warnings: Vec<String>,
    /// True when row_limit truncated the read
    pub was_truncated: bool,
}

/// Options accepted by `stream_dataframe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    pub chunk_size_rows: usize,
    pub columns: Option<Vec<String>>,
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_size_rows: 10_000,
            columns: None,
            extra: HashMap::new(),
        }
    }
}

impl StreamOptions {
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// Bookkeeping emitted with each streamed chunk.
///
/// Chunks arrive strictly in offset order; `is_last_chunk` is true exactly
/// once, on the terminal chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub chunk_index: usize,
    pub rows_in_chunk: usize,
    pub total_rows_so_far: usize,
    pub is_last_chunk: bool,
    pub chunk_duration_ms: f64,
}

// ============================================================================
// File Validation
// ============================================================================

/// Severity of a pre-read validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSeverity {
    Error,
    Warning,
    Info,
}

impl ValidationSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warning" | "warn" => Some(Self::Warning),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

/// A single finding from `validate_file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    /// Machine-readable code, e.g. "EMPTY_FILE", "ENCODING_ERROR"
    pub code: String,
    pub message: String,
    pub line_number: Option<usize>,
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ValidationSeverity::Error,
            code: code.to_string(),
            message: message.into(),
            line_number: None,
            suggestion: None,
        }
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ValidationSeverity::Warning,
            code: code.to_string(),
            message: message.into(),
            line_number: None,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line_number = Some(line);
        self
    }
}

/// Result of `validate_file`: cheap checks, no full parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileValidationResult {
    pub file_path: String,
    pub adapter_id: String,
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub error_count: usize,
    pub warning_count: usize,
    pub validated_at: DateTime<Utc>,
    pub validation_duration_ms: f64,
}

impl FileValidationResult {
    /// Assemble a result from collected issues, computing the counts.
    pub fn from_issues(
        file_path: &str,
        adapter_id: &str,
        started_at: DateTime<Utc>,
        issues: Vec<ValidationIssue>,
    ) -> Self {
        let error_count = issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Error)
            .count();
        let warning_count = issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Warning)
            .count();
        let duration_ms = (Utc::now() - started_at).num_milliseconds() as f64;
        Self {
            file_path: file_path.to_string(),
            adapter_id: adapter_id.to_string(),
            is_valid: error_count == 0,
            issues,
            error_count,
            warning_count,
            validated_at: started_at,
            validation_duration_ms: duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_roundtrip() {
        for dt in DataType::ALL {
            let parsed = DataType::parse(dt.as_str()).unwrap();
            assert_eq!(*dt, parsed);
        }
    }

    #[test]
    fn test_data_type_aliases() {
        assert_eq!(DataType::parse("int64"), Some(DataType::Integer));
        assert_eq!(DataType::parse("f32"), Some(DataType::Float));
        assert_eq!(DataType::parse("utf8"), Some(DataType::String));
        assert_eq!(DataType::parse("nope"), None);
    }

    #[test]
    fn test_matches_declared_relaxed() {
        assert!(DataType::Integer.matches_declared("int"));
        assert!(DataType::Integer.matches_declared("i32"));
        assert!(DataType::Date.matches_declared("datetime"));
        assert!(!DataType::String.matches_declared("float"));
    }

    #[test]
    fn test_validation_result_counts() {
        let issues = vec![
            ValidationIssue::error("EMPTY_FILE", "File is empty"),
            ValidationIssue::warning("LARGE_FILE", "File is large"),
        ];
        let result = FileValidationResult::from_issues("a.csv", "csv", Utc::now(), issues);
        assert!(!result.is_valid);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.warning_count, 1);
    }

    #[test]
    fn test_read_options_extras() {
        let mut opts = ReadOptions::default();
        opts.extra
            .insert("delimiter".to_string(), serde_json::json!(";"));
        opts.extra
            .insert("sheet_index".to_string(), serde_json::json!(2));
        assert_eq!(opts.extra_str("delimiter"), Some(";"));
        assert_eq!(opts.extra_usize("sheet_index"), Some(2));
        assert_eq!(opts.extra_str("missing"), None);
    }
}
