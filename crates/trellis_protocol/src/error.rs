//! Error envelope shared by adapters and the engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Machine codes for adapter failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdapterErrorCode {
    FileNotFound,
    EmptyFile,
    EncodingError,
    ParseError,
    InvalidFormat,
    SchemaInferenceFailed,
    StreamingNotSupported,
    PasswordProtected,
    CorruptFile,
    AdapterNotFound,
    DuplicateAdapter,
    Unknown,
}

impl AdapterErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::EmptyFile => "EMPTY_FILE",
            Self::EncodingError => "ENCODING_ERROR",
            Self::ParseError => "PARSE_ERROR",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::SchemaInferenceFailed => "SCHEMA_INFERENCE_FAILED",
            Self::StreamingNotSupported => "STREAMING_NOT_SUPPORTED",
            Self::PasswordProtected => "PASSWORD_PROTECTED",
            Self::CorruptFile => "CORRUPT_FILE",
            Self::AdapterNotFound => "ADAPTER_NOT_FOUND",
            Self::DuplicateAdapter => "DUPLICATE_ADAPTER",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for AdapterErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error envelope carried by every adapter failure.
///
/// `recoverable` tells the executor whether retrying with different options
/// could help (true for most codes, false for e.g. streaming an Excel file).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{code}] {message}")]
pub struct AdapterError {
    pub code: AdapterErrorCode,
    pub message: String,
    pub file_path: Option<String>,
    pub adapter_id: Option<String>,
    pub line_number: Option<usize>,
    #[serde(default)]
    pub details: HashMap<String, String>,
    pub suggestion: Option<String>,
    pub recoverable: bool,
}

impl AdapterError {
    pub fn new(code: AdapterErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            file_path: None,
            adapter_id: None,
            line_number: None,
            details: HashMap::new(),
            suggestion: None,
            recoverable: true,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_adapter(mut self, adapter_id: impl Into<String>) -> Self {
        self.adapter_id = Some(adapter_id.into());
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line_number = Some(line);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn non_recoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::new(
            AdapterErrorCode::FileNotFound,
            format!("File not found: {}", path),
        )
        .with_path(path)
        .with_suggestion("Check the file path and ensure the file exists")
    }
}

/// Fatal outcomes of a profile extraction pass.
///
/// Per-file and per-table failures are logged and skipped; only these abort
/// the whole pass.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Governance limits exceeded: {violations:?}")]
    GovernanceLimitExceeded { violations: Vec<String> },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Timeout exceeded: {0}")]
    TimeoutExceeded(String),

    #[error("Required pattern '{field}' not matched against {subject}")]
    RequiredPatternMissing { field: String, subject: String },

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Profile error: {0}")]
    Profile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_code() {
        let err = AdapterError::new(AdapterErrorCode::ParseError, "bad row")
            .with_path("data.csv")
            .with_adapter("csv");
        let rendered = err.to_string();
        assert!(rendered.contains("PARSE_ERROR"));
        assert!(rendered.contains("bad row"));
    }

    #[test]
    fn test_recoverable_default_and_override() {
        let err = AdapterError::new(AdapterErrorCode::StreamingNotSupported, "no streaming")
            .non_recoverable();
        assert!(!err.recoverable);
        let err = AdapterError::file_not_found("x.csv");
        assert!(err.recoverable);
        assert_eq!(err.file_path.as_deref(), Some("x.csv"));
    }

    #[test]
    fn test_error_code_serde_tags() {
        let json = serde_json::to_string(&AdapterErrorCode::SchemaInferenceFailed).unwrap();
        assert_eq!(json, "\"SCHEMA_INFERENCE_FAILED\"");
    }
}
