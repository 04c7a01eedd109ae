//! JSON / JSON Lines adapter.
//!
//! Format sniffing: `.jsonl`/`.ndjson` extensions are line-delimited; for
//! `.json` the first non-whitespace byte decides (`[` is an array document)
//! and multiple `{`-prefixed lines suggest NDJSON. Line-delimited files
//! stream in row chunks; array documents are emitted as a single terminal
//! chunk.

use crate::csv_adapter::probe_columns;
use crate::stream::FrameStream;
use crate::{stat_file, AdapterResult, FileAdapter};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;
use trellis_frame::Frame;
use trellis_protocol::{
    AdapterCapabilities, AdapterError, AdapterErrorCode, AdapterMetadata, CompressionType,
    FileValidationResult, ReadOptions, ReadResult, SchemaProbeResult, StreamChunk, StreamOptions,
    ValidationIssue,
};

const ADAPTER_ID: &str = "json";
const ADAPTER_VERSION: &str = "1.0.0";

#[derive(Debug)]
pub struct JsonAdapter {
    metadata: AdapterMetadata,
}

impl Default for JsonAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonAdapter {
    pub fn new() -> Self {
        Self {
            metadata: AdapterMetadata {
                adapter_id: ADAPTER_ID.to_string(),
                name: "JSON/JSONL Adapter".to_string(),
                version: ADAPTER_VERSION.to_string(),
                file_extensions: vec![
                    ".json".to_string(),
                    ".jsonl".to_string(),
                    ".ndjson".to_string(),
                ],
                mime_types: vec![
                    "application/json".to_string(),
                    "application/x-ndjson".to_string(),
                    "application/jsonl".to_string(),
                ],
                capabilities: AdapterCapabilities {
                    supports_streaming: true,
                    supports_schema_inference: true,
                    supports_random_access: false,
                    supports_column_selection: true,
                    max_recommended_file_size_mb: Some(500),
                    supported_compressions: vec![CompressionType::None],
                    supports_multiple_sheets: false,
                },
                description: "Parse JSON and JSON Lines files with automatic format detection"
                    .to_string(),
            },
        }
    }
}

/// Decide whether a file is line-delimited JSON.
pub(crate) fn is_jsonl_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext == "jsonl" || ext == "ndjson" {
        return true;
    }
    if ext != "json" {
        return false;
    }

    let Ok(head) = crate::detect::read_head(path, 8192) else {
        return false;
    };
    let text = String::from_utf8_lossy(&head);
    let first = text.chars().find(|c| !c.is_whitespace());
    match first {
        Some('[') => false,
        Some('{') => {
            let object_lines = text
                .lines()
                .take(5)
                .filter(|line| line.trim_start().starts_with('{'))
                .count();
            object_lines > 1
        }
        _ => false,
    }
}

fn json_error(path: &Path, err: serde_json::Error) -> AdapterError {
    AdapterError::new(
        AdapterErrorCode::InvalidFormat,
        format!("Invalid JSON syntax: {}", err),
    )
    .with_path(path.display().to_string())
    .with_adapter(ADAPTER_ID)
    .with_line(err.line())
}

fn io_error(path: &Path, err: std::io::Error) -> AdapterError {
    AdapterError::new(
        AdapterErrorCode::ParseError,
        format!("Failed to read JSON file: {}", err),
    )
    .with_path(path.display().to_string())
    .with_adapter(ADAPTER_ID)
}

/// Rows parsed from either format, as JSON objects. Non-object array
/// elements are wrapped under a `value` key; a top-level object document
/// becomes a single row.
fn document_rows(value: JsonValue) -> Vec<JsonMap<String, JsonValue>> {
    match value {
        JsonValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::Object(obj) => obj,
                other => {
                    let mut obj = JsonMap::new();
                    obj.insert("value".to_string(), other);
                    obj
                }
            })
            .collect(),
        JsonValue::Object(obj) => vec![obj],
        other => {
            let mut obj = JsonMap::new();
            obj.insert("value".to_string(), other);
            vec![obj]
        }
    }
}

fn read_jsonl_rows(
    path: &Path,
    limit: Option<usize>,
) -> AdapterResult<Vec<JsonMap<String, JsonValue>>> {
    let file = std::fs::File::open(path).map_err(|e| io_error(path, e))?;
    let reader = BufReader::new(file);
    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| io_error(path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: JsonValue = serde_json::from_str(trimmed)
            .map_err(|e| json_error(path, e).with_line(i + 1))?;
        rows.extend(document_rows(value));
        if let Some(limit) = limit {
            if rows.len() >= limit {
                break;
            }
        }
    }
    Ok(rows)
}

fn read_json_rows(path: &Path) -> AdapterResult<Vec<JsonMap<String, JsonValue>>> {
    let bytes = std::fs::read(path).map_err(|e| io_error(path, e))?;
    let value: JsonValue = serde_json::from_slice(&bytes).map_err(|e| json_error(path, e))?;
    Ok(document_rows(value))
}

fn rows_to_frame(rows: &[JsonMap<String, JsonValue>]) -> Frame {
    let refs: Vec<&JsonMap<String, JsonValue>> = rows.iter().collect();
    Frame::from_json_objects(&refs)
}

fn count_newlines(path: &Path) -> std::io::Result<usize> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut buf = [0u8; 1024 * 1024];
    let mut count = 0usize;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        count += buf[..n].iter().filter(|&&b| b == b'\n').count();
    }
    Ok(count)
}

fn apply_read_options(frame: Frame, options: &ReadOptions) -> (Frame, bool) {
    let mut frame = frame;
    if options.skip_rows > 0 {
        frame = frame.slice(options.skip_rows, frame.height());
    }
    let mut truncated = false;
    if let Some(limit) = options.row_limit {
        // Truncated means rows were actually dropped; an exact-fit file is
        // not truncated.
        truncated = frame.height() > limit;
        frame = frame.head(limit);
    }
    if let Some(columns) = &options.columns {
        let existing: Vec<String> = columns
            .iter()
            .filter(|c| frame.has_column(c))
            .cloned()
            .collect();
        if !existing.is_empty() {
            frame = frame.select_existing(&existing);
        }
    }
    if let Some(exclude) = &options.exclude_columns {
        frame = frame.drop_columns(exclude);
    }
    (frame, truncated)
}

#[async_trait]
impl FileAdapter for JsonAdapter {
    fn metadata(&self) -> &AdapterMetadata {
        &self.metadata
    }

    async fn probe_schema(
        &self,
        path: &Path,
        options: &ReadOptions,
    ) -> AdapterResult<SchemaProbeResult> {
        let started_at = Utc::now();
        let timer = Instant::now();
        let file_size = stat_file(path, ADAPTER_ID)?;
        let path_buf = path.to_path_buf();
        let sample_rows = options.infer_schema_length.min(1000);

        let mut result =
            tokio::task::spawn_blocking(move || -> AdapterResult<SchemaProbeResult> {
                let is_jsonl = is_jsonl_file(&path_buf);
                let rows = if is_jsonl {
                    read_jsonl_rows(&path_buf, Some(sample_rows))?
                } else {
                    read_json_rows(&path_buf)?
                };
                let sample: Vec<_> = rows.iter().take(sample_rows).cloned().collect();
                let frame = rows_to_frame(&sample);

                let (row_count_estimate, row_count_exact) = if is_jsonl {
                    // Newline counting never parses the body.
                    match count_newlines(&path_buf) {
                        Ok(n) => (Some(n), false),
                        Err(_) => (Some(frame.height()), false),
                    }
                } else {
                    (Some(rows.len()), true)
                };

                Ok(SchemaProbeResult {
                    file_path: path_buf.display().to_string(),
                    file_size_bytes: file_size,
                    adapter_id: ADAPTER_ID.to_string(),
                    columns: probe_columns(&frame),
                    row_count_estimate,
                    row_count_exact,
                    encoding_detected: Some("utf-8".to_string()),
                    delimiter_detected: None,
                    has_header_row: true,
                    sheets: None,
                    compression_detected: None,
                    probed_at: started_at,
                    probe_duration_ms: 0.0,
                    sample_rows_read: frame.height(),
                    errors: Vec::new(),
                    warnings: Vec::new(),
                })
            })
            .await
            .map_err(|e| {
                AdapterError::new(
                    AdapterErrorCode::SchemaInferenceFailed,
                    format!("Failed to probe JSON schema: {}", e),
                )
            })??;

        result.probe_duration_ms = timer.elapsed().as_secs_f64() * 1000.0;
        Ok(result)
    }

    async fn read_dataframe(
        &self,
        path: &Path,
        options: &ReadOptions,
    ) -> AdapterResult<(Frame, ReadResult)> {
        let timer = Instant::now();
        let file_size = stat_file(path, ADAPTER_ID)?;
        let path_buf = path.to_path_buf();
        let options = options.clone();

        let (frame, was_truncated) =
            tokio::task::spawn_blocking(move || -> AdapterResult<(Frame, bool)> {
                let is_jsonl = is_jsonl_file(&path_buf);
                let rows = if is_jsonl {
                    // One row past the limit so truncation is observable.
                    let limit = options.row_limit.map(|l| l + options.skip_rows + 1);
                    read_jsonl_rows(&path_buf, limit)?
                } else {
                    read_json_rows(&path_buf)?
                };
                let frame = rows_to_frame(&rows);
                Ok(apply_read_options(frame, &options))
            })
            .await
            .map_err(|e| {
                AdapterError::new(AdapterErrorCode::Unknown, format!("read task failed: {}", e))
            })??;

        let result = ReadResult {
            file_path: path.display().to_string(),
            adapter_id: ADAPTER_ID.to_string(),
            rows_read: frame.height(),
            columns_read: frame.width(),
            bytes_read: file_size,
            read_duration_ms: timer.elapsed().as_secs_f64() * 1000.0,
            warnings: Vec::new(),
            was_truncated,
        };
        Ok((frame, result))
    }

    async fn stream_dataframe(
        &self,
        path: &Path,
        options: &StreamOptions,
    ) -> AdapterResult<FrameStream> {
        stat_file(path, ADAPTER_ID)?;
        let path_buf = path.to_path_buf();
        let options = options.clone();

        let is_jsonl = tokio::task::spawn_blocking({
            let p = path_buf.clone();
            move || is_jsonl_file(&p)
        })
        .await
        .unwrap_or(false);

        if !is_jsonl {
            // Array documents have no line structure: single terminal chunk.
            let timer = Instant::now();
            let frame = tokio::task::spawn_blocking({
                let p = path_buf.clone();
                move || -> AdapterResult<Frame> {
                    let rows = read_json_rows(&p)?;
                    let mut frame = rows_to_frame(&rows);
                    if let Some(columns) = &options.columns {
                        frame = frame.select_existing(columns);
                    }
                    Ok(frame)
                }
            })
            .await
            .map_err(|e| {
                AdapterError::new(AdapterErrorCode::Unknown, format!("read task failed: {}", e))
            })??;
            return Ok(FrameStream::single(
                frame,
                timer.elapsed().as_secs_f64() * 1000.0,
            ));
        }

        let total_rows = tokio::task::spawn_blocking({
            let p = path_buf.clone();
            move || -> AdapterResult<usize> {
                // One line = one record; count without parsing.
                let file = std::fs::File::open(&p).map_err(|e| io_error(&p, e))?;
                let mut count = 0usize;
                for line in BufReader::new(file).lines() {
                    let line = line.map_err(|e| io_error(&p, e))?;
                    if !line.trim().is_empty() {
                        count += 1;
                    }
                }
                Ok(count)
            }
        })
        .await
        .map_err(|e| {
            AdapterError::new(
                AdapterErrorCode::Unknown,
                format!("stream setup failed: {}", e),
            )
        })??;

        let (tx, stream) = FrameStream::channel();
        tokio::spawn(async move {
            let chunk_size = options.chunk_size_rows.max(1);
            let mut offset = 0usize;
            let mut chunk_index = 0usize;
            while offset < total_rows {
                let timer = Instant::now();
                let chunk = tokio::task::spawn_blocking({
                    let p = path_buf.clone();
                    let columns = options.columns.clone();
                    move || -> AdapterResult<Frame> {
                        read_jsonl_chunk(&p, offset, chunk_size, columns.as_deref())
                    }
                })
                .await;

                let frame = match chunk {
                    Ok(Ok(frame)) => frame,
                    Ok(Err(err)) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(AdapterError::new(
                                AdapterErrorCode::Unknown,
                                format!("stream chunk task failed: {}", e),
                            )))
                            .await;
                        return;
                    }
                };

                let rows = frame.height();
                if rows == 0 {
                    return;
                }
                offset += rows;
                let meta = StreamChunk {
                    chunk_index,
                    rows_in_chunk: rows,
                    total_rows_so_far: offset,
                    is_last_chunk: offset >= total_rows,
                    chunk_duration_ms: timer.elapsed().as_secs_f64() * 1000.0,
                };
                if tx.send(Ok((frame, meta))).await.is_err() {
                    return;
                }
                chunk_index += 1;
            }
        });

        Ok(stream)
    }

    async fn validate_file(&self, path: &Path) -> AdapterResult<FileValidationResult> {
        let started_at = Utc::now();
        let path_buf = path.to_path_buf();
        let issues = tokio::task::spawn_blocking(move || -> Vec<ValidationIssue> {
            let mut issues = Vec::new();
            if !path_buf.exists() {
                issues.push(
                    ValidationIssue::error(
                        "FILE_NOT_FOUND",
                        format!("File does not exist: {}", path_buf.display()),
                    )
                    .with_suggestion("Check the file path and ensure the file exists."),
                );
                return issues;
            }
            let size = std::fs::metadata(&path_buf).map(|m| m.len()).unwrap_or(0);
            if size == 0 {
                issues.push(
                    ValidationIssue::error("EMPTY_FILE", "File is empty")
                        .with_suggestion("Provide a non-empty JSON file."),
                );
                return issues;
            }

            if is_jsonl_file(&path_buf) {
                // Validate just the first few lines.
                if let Ok(file) = std::fs::File::open(&path_buf) {
                    for (i, line) in BufReader::new(file).lines().take(5).enumerate() {
                        let Ok(line) = line else {
                            issues.push(ValidationIssue::error(
                                "ENCODING_ERROR",
                                "File is not valid UTF-8",
                            ));
                            break;
                        };
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if let Err(e) = serde_json::from_str::<JsonValue>(trimmed) {
                            issues.push(
                                ValidationIssue::error(
                                    "INVALID_JSON",
                                    format!("Invalid JSON syntax at line {}: {}", i + 1, e),
                                )
                                .with_line(i + 1)
                                .with_suggestion("Fix the JSON syntax error."),
                            );
                            break;
                        }
                    }
                }
            } else {
                match std::fs::read(&path_buf) {
                    Ok(bytes) => match serde_json::from_slice::<JsonValue>(&bytes) {
                        Ok(JsonValue::Array(items)) => {
                            if items
                                .first()
                                .map(|v| !v.is_object())
                                .unwrap_or(false)
                            {
                                issues.push(
                                    ValidationIssue::warning(
                                        "NON_TABULAR",
                                        "JSON array contains non-object elements",
                                    )
                                    .with_suggestion(
                                        "JSON should be an array of objects for tabular data.",
                                    ),
                                );
                            }
                        }
                        Ok(JsonValue::Object(_)) => {
                            issues.push(
                                ValidationIssue::warning(
                                    "SINGLE_OBJECT",
                                    "JSON is a single object, not an array",
                                )
                                .with_suggestion(
                                    "For multiple records, use an array of objects or JSON \
                                     Lines format.",
                                ),
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            issues.push(
                                ValidationIssue::error(
                                    "INVALID_JSON",
                                    format!("Invalid JSON syntax at line {}: {}", e.line(), e),
                                )
                                .with_line(e.line())
                                .with_suggestion("Fix the JSON syntax error."),
                            );
                        }
                    },
                    Err(e) => {
                        issues.push(ValidationIssue::error(
                            "VALIDATION_FAILED",
                            format!("Validation failed: {}", e),
                        ));
                    }
                }
            }
            issues
        })
        .await
        .map_err(|e| {
            AdapterError::new(
                AdapterErrorCode::Unknown,
                format!("validation task failed: {}", e),
            )
        })?;

        Ok(FileValidationResult::from_issues(
            &path.display().to_string(),
            ADAPTER_ID,
            started_at,
            issues,
        ))
    }
}

fn read_jsonl_chunk(
    path: &PathBuf,
    offset: usize,
    chunk_size: usize,
    columns: Option<&[String]>,
) -> AdapterResult<Frame> {
    let file = std::fs::File::open(path).map_err(|e| io_error(path, e))?;
    let reader = BufReader::new(file);
    let mut rows: Vec<JsonMap<String, JsonValue>> = Vec::with_capacity(chunk_size);
    let mut index = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| io_error(path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if index >= offset {
            let value: JsonValue = serde_json::from_str(trimmed)
                .map_err(|e| json_error(path, e).with_line(line_no + 1))?;
            rows.extend(document_rows(value));
            if rows.len() >= chunk_size {
                break;
            }
        }
        index += 1;
    }
    let mut frame = rows_to_frame(&rows);
    if let Some(columns) = columns {
        frame = frame.select_existing(columns);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use trellis_frame::Scalar;

    fn write_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_read_array_of_objects() {
        let file = write_file(".json", r#"[{"a": 1, "b": "x"}, {"a": 2, "b": "y"}]"#);
        let adapter = JsonAdapter::new();
        let (frame, result) = adapter
            .read_dataframe(file.path(), &ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.column_names(), vec!["a", "b"]);
        assert_eq!(result.rows_read, 2);
    }

    #[tokio::test]
    async fn test_probe_regular_json_exact() {
        let file = write_file(".json", r#"[{"a": 1}, {"a": 2}, {"a": 3}]"#);
        let adapter = JsonAdapter::new();
        let probe = adapter
            .probe_schema(file.path(), &ReadOptions::default())
            .await
            .unwrap();
        assert!(probe.row_count_exact);
        assert_eq!(probe.row_count_estimate, Some(3));
        assert_eq!(probe.delimiter_detected, None);
    }

    #[tokio::test]
    async fn test_probe_jsonl_counts_newlines() {
        let file = write_file(".jsonl", "{\"a\": 1}\n{\"a\": 2}\n{\"a\": 3}\n");
        let adapter = JsonAdapter::new();
        let probe = adapter
            .probe_schema(file.path(), &ReadOptions::default())
            .await
            .unwrap();
        assert!(!probe.row_count_exact);
        assert_eq!(probe.row_count_estimate, Some(3));
    }

    #[tokio::test]
    async fn test_exact_fit_limit_is_not_truncated() {
        let file = write_file(".jsonl", "{\"a\": 1}\n{\"a\": 2}\n");
        let adapter = JsonAdapter::new();
        let mut options = ReadOptions::default();
        options.row_limit = Some(2);
        let (frame, result) = adapter.read_dataframe(file.path(), &options).await.unwrap();
        assert_eq!(frame.height(), 2);
        assert!(!result.was_truncated);

        let mut options = ReadOptions::default();
        options.row_limit = Some(1);
        let (_, result) = adapter.read_dataframe(file.path(), &options).await.unwrap();
        assert!(result.was_truncated);
    }

    #[tokio::test]
    async fn test_jsonl_streaming_chunk_accounting() {
        let file = write_file(
            ".jsonl",
            "{\"n\": 0}\n{\"n\": 1}\n{\"n\": 2}\n{\"n\": 3}\n{\"n\": 4}\n",
        );
        let adapter = JsonAdapter::new();
        let mut options = StreamOptions::default();
        options.chunk_size_rows = 2;
        let mut stream = adapter
            .stream_dataframe(file.path(), &options)
            .await
            .unwrap();

        let mut sizes = Vec::new();
        let mut cumulative = Vec::new();
        let mut flags = Vec::new();
        while let Some(item) = stream.next_chunk().await {
            let (_, meta) = item.unwrap();
            sizes.push(meta.rows_in_chunk);
            cumulative.push(meta.total_rows_so_far);
            flags.push(meta.is_last_chunk);
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(cumulative, vec![2, 4, 5]);
        assert_eq!(flags, vec![false, false, true]);
    }

    #[tokio::test]
    async fn test_regular_json_streams_single_chunk() {
        let file = write_file(".json", r#"[{"a": 1}, {"a": 2}]"#);
        let adapter = JsonAdapter::new();
        let mut stream = adapter
            .stream_dataframe(file.path(), &StreamOptions::default())
            .await
            .unwrap();
        let (frame, meta) = stream.next_chunk().await.unwrap().unwrap();
        assert_eq!(frame.height(), 2);
        assert!(meta.is_last_chunk);
        assert!(stream.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_validate_invalid_json() {
        let file = write_file(".json", "{not json");
        let adapter = JsonAdapter::new();
        let result = adapter.validate_file(file.path()).await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.issues[0].code, "INVALID_JSON");
    }

    #[tokio::test]
    async fn test_validate_single_object_warns() {
        let file = write_file(".json", r#"{"a": 1}"#);
        let adapter = JsonAdapter::new();
        let result = adapter.validate_file(file.path()).await.unwrap();
        assert!(result.is_valid);
        assert_eq!(result.issues[0].code, "SINGLE_OBJECT");
    }

    #[tokio::test]
    async fn test_missing_keys_become_null() {
        let file = write_file(".json", r#"[{"a": 1, "b": 2}, {"a": 3}]"#);
        let adapter = JsonAdapter::new();
        let (frame, _) = adapter
            .read_dataframe(file.path(), &ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(frame.column("b").unwrap().values[1], Scalar::Null);
    }

    #[test]
    fn test_jsonl_detection_by_content() {
        let file = write_file(".json", "{\"a\": 1}\n{\"a\": 2}\n");
        assert!(is_jsonl_file(file.path()));
        let file = write_file(".json", "[{\"a\": 1}]");
        assert!(!is_jsonl_file(file.path()));
    }
}
