//! CSV/TSV adapter.
//!
//! Delimiter detection samples the first ten lines and counts candidate
//! occurrences; encoding detection inspects the BOM, then tries strict UTF-8,
//! then falls back to Latin-1 (which always succeeds, so it is surfaced with
//! a low-confidence warning). Streaming runs a counting pass for chunk
//! bookkeeping, then a second pass that emits fixed-size row chunks.

use crate::detect::{
    decode_text, decode_text_strict, detect_delimiter, detect_encoding, read_head,
};
use crate::infer::{cast_raw, infer_column_type};
use crate::stream::FrameStream;
use crate::{stat_file, AdapterResult, FileAdapter};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;
use trellis_frame::{Column, Frame, Scalar};
use trellis_protocol::{
    AdapterCapabilities, AdapterError, AdapterErrorCode, AdapterMetadata, ColumnInfo,
    CompressionType, FileValidationResult, ReadOptions, ReadResult, SchemaProbeResult,
    StreamChunk, StreamOptions, ValidationIssue,
};

const ADAPTER_ID: &str = "csv";
const ADAPTER_VERSION: &str = "1.0.0";

/// Files below this size get an exact row count during probing.
const EXACT_COUNT_LIMIT: u64 = 10 * 1024 * 1024;

/// Bytes sampled for detection and schema inference.
const SNIFF_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub struct CsvAdapter {
    metadata: AdapterMetadata,
}

impl Default for CsvAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvAdapter {
    pub fn new() -> Self {
        Self {
            metadata: AdapterMetadata {
                adapter_id: ADAPTER_ID.to_string(),
                name: "CSV/TSV Adapter".to_string(),
                version: ADAPTER_VERSION.to_string(),
                file_extensions: vec![".csv".to_string(), ".tsv".to_string()],
                mime_types: vec![
                    "text/csv".to_string(),
                    "text/tab-separated-values".to_string(),
                    "application/csv".to_string(),
                ],
                capabilities: AdapterCapabilities {
                    supports_streaming: true,
                    supports_schema_inference: true,
                    supports_random_access: false,
                    supports_column_selection: true,
                    max_recommended_file_size_mb: None,
                    supported_compressions: vec![CompressionType::None],
                    supports_multiple_sheets: false,
                },
                description: "Parse CSV and TSV files with automatic delimiter and encoding \
                              detection"
                    .to_string(),
            },
        }
    }
}

/// Parsed CSV body: header names plus raw string rows.
struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn parse_text(text: &str, delimiter: char, limit: Option<usize>) -> Result<RawTable, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(|f| f.to_string()).collect());
        if let Some(limit) = limit {
            if rows.len() >= limit {
                break;
            }
        }
    }
    Ok(RawTable { headers, rows })
}

/// Build a typed frame from raw rows: type inference over the first
/// `infer_len` rows per column, non-strict cast over all of them. Values
/// matching `null_values` become null before typing.
fn build_frame(table: &RawTable, null_values: &[String], infer_len: usize) -> Frame {
    let width = table.headers.len();
    let mut columns = Vec::with_capacity(width);
    for (i, name) in table.headers.iter().enumerate() {
        let raw: Vec<&str> = table
            .rows
            .iter()
            .map(|row| row.get(i).map(String::as_str).unwrap_or(""))
            .collect();
        let is_null = |s: &str| s.is_empty() || null_values.iter().any(|n| n == s);
        let sample = raw
            .iter()
            .take(infer_len)
            .copied()
            .filter(|s| !is_null(s));
        let dtype = infer_column_type(sample);
        let values: Vec<Scalar> = raw
            .iter()
            .map(|s| {
                if is_null(s) {
                    Scalar::Null
                } else {
                    cast_raw(s, dtype)
                }
            })
            .collect();
        columns.push(Column::new(name.clone(), values));
    }
    // Column lengths are uniform by construction; unique header names are
    // the source's responsibility (the csv crate rejects duplicates).
    Frame::from_columns(columns).unwrap_or_else(|_| Frame::empty())
}

fn parse_error(path: &Path, err: csv::Error) -> AdapterError {
    AdapterError::new(
        AdapterErrorCode::ParseError,
        format!("Failed to parse CSV: {}", err),
    )
    .with_path(path.display().to_string())
    .with_adapter(ADAPTER_ID)
}

fn io_error(path: &Path, err: std::io::Error) -> AdapterError {
    AdapterError::new(
        AdapterErrorCode::Unknown,
        format!("Failed to read CSV: {}", err),
    )
    .with_path(path.display().to_string())
    .with_adapter(ADAPTER_ID)
}

/// Count data records with a full streaming pass (header excluded).
fn count_records(path: &Path, delimiter: char) -> Result<usize, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .from_path(path)?;
    let mut count = 0usize;
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        count += 1;
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
        frame = frame.select_existing(columns);
    }
    if let Some(exclude) = &options.exclude_columns {
        frame = frame.drop_columns(exclude);
    }
    (frame, truncated)
}

#[async_trait]
impl FileAdapter for CsvAdapter {
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
        let options = options.clone();

        let result = tokio::task::spawn_blocking(move || -> AdapterResult<SchemaProbeResult> {
            let head = read_head(&path_buf, SNIFF_BYTES).map_err(|e| io_error(&path_buf, e))?;
            let encoding = detect_encoding(&head);
            let sniff_text = decode_text(&head, encoding);
            let delimiter = detect_delimiter(&sniff_text);

            let mut warnings = Vec::new();
            if encoding.low_confidence() {
                warnings.push(
                    "low_confidence_encoding: fell back to latin-1; data may be misdecoded"
                        .to_string(),
                );
            }

            // Sample for schema inference. Larger files drop the sampled
            // head's trailing line, which may be cut mid-record.
            let sample_rows = options.infer_schema_length;
            let sample_text = if file_size <= SNIFF_BYTES as u64 {
                sniff_text
            } else {
                match sniff_text.rfind('\n') {
                    Some(idx) => sniff_text[..idx].to_string(),
                    None => sniff_text,
                }
            };
            let table = parse_text(&sample_text, delimiter, Some(sample_rows)).map_err(|e| {
                AdapterError::new(
                    AdapterErrorCode::SchemaInferenceFailed,
                    format!("Failed to probe schema: {}", e),
                )
                .with_path(path_buf.display().to_string())
                .with_adapter(ADAPTER_ID)
            })?;

            let frame = build_frame(&table, &options.null_values, sample_rows);
            let columns = probe_columns(&frame);

            let (row_count_estimate, row_count_exact) = if file_size < EXACT_COUNT_LIMIT {
                match count_records(&path_buf, delimiter) {
                    Ok(n) => (Some(n), true),
                    Err(_) => (Some(table.rows.len()), false),
                }
            } else if table.rows.is_empty() {
                (None, false)
            } else {
                // Estimate rows from the average sampled row size.
                let sampled_bytes = sample_text.len().min(SNIFF_BYTES);
                let avg = sampled_bytes as f64 / table.rows.len() as f64;
                let estimate = if avg > 0.0 {
                    Some((file_size as f64 / avg) as usize)
                } else {
                    None
                };
                (estimate, false)
            };

            Ok(SchemaProbeResult {
                file_path: path_buf.display().to_string(),
                file_size_bytes: file_size,
                adapter_id: ADAPTER_ID.to_string(),
                columns,
                row_count_estimate,
                row_count_exact,
                encoding_detected: Some(encoding.label().to_string()),
                delimiter_detected: Some(delimiter.to_string()),
                has_header_row: true,
                sheets: None,
                compression_detected: None,
                probed_at: started_at,
                probe_duration_ms: 0.0,
                sample_rows_read: table.rows.len(),
                errors: Vec::new(),
                warnings,
            })
        })
        .await
        .map_err(|e| {
            AdapterError::new(AdapterErrorCode::Unknown, format!("probe task failed: {}", e))
        })??;

        let mut result = result;
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

        let frame_and_flags =
            tokio::task::spawn_blocking(move || -> AdapterResult<(Frame, bool)> {
                let bytes = std::fs::read(&path_buf).map_err(|e| io_error(&path_buf, e))?;
                let encoding = detect_encoding(&bytes);
                let text = decode_text(&bytes, encoding);
                let delimiter = match options.extra_str("delimiter").and_then(|d| d.chars().next())
                {
                    Some(d) => d,
                    None => detect_delimiter(&text),
                };

                // One row past the limit so truncation is observable.
                let parse_limit = options
                    .row_limit
                    .map(|limit| limit + options.skip_rows + 1);
                let table = parse_text(&text, delimiter, parse_limit)
                    .map_err(|e| parse_error(&path_buf, e))?;
                let frame = build_frame(&table, &options.null_values, options.infer_schema_length);
                Ok(apply_read_options(frame, &options))
            })
            .await
            .map_err(|e| {
                AdapterError::new(AdapterErrorCode::Unknown, format!("read task failed: {}", e))
            })??;

        let (frame, was_truncated) = frame_and_flags;
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

        // Counting pass: total rows drive the is_last flags.
        let setup_path = path_buf.clone();
        let delimiter_hint = options.extra_str("delimiter").and_then(|d| d.chars().next());
        let (delimiter, total_rows) =
            tokio::task::spawn_blocking(move || -> AdapterResult<(char, usize)> {
                let head =
                    read_head(&setup_path, SNIFF_BYTES).map_err(|e| io_error(&setup_path, e))?;
                let encoding = detect_encoding(&head);
                let delimiter = delimiter_hint
                    .unwrap_or_else(|| detect_delimiter(&decode_text(&head, encoding)));
                let total = count_records(&setup_path, delimiter)
                    .map_err(|e| parse_error(&setup_path, e))?;
                Ok((delimiter, total))
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
            loop {
                let chunk_path = path_buf.clone();
                let columns = options.columns.clone();
                let timer = Instant::now();
                let chunk = tokio::task::spawn_blocking(move || -> AdapterResult<Frame> {
                    read_chunk(&chunk_path, delimiter, offset, chunk_size, columns.as_deref())
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
                if rows == 0 && offset < total_rows {
                    debug!(?path_buf, "csv stream ended early at offset {}", offset);
                }
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
                let is_last = meta.is_last_chunk;
                if tx.send(Ok((frame, meta))).await.is_err() {
                    // Consumer dropped the stream; close the reader side.
                    return;
                }
                if is_last {
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
            if !path_buf.is_file() {
                issues.push(
                    ValidationIssue::error(
                        "NOT_A_FILE",
                        format!("Path is not a file: {}", path_buf.display()),
                    )
                    .with_suggestion("Provide a path to a regular file."),
                );
                return issues;
            }
            let size = std::fs::metadata(&path_buf).map(|m| m.len()).unwrap_or(0);
            if size == 0 {
                issues.push(
                    ValidationIssue::error("EMPTY_FILE", "File is empty")
                        .with_suggestion("Provide a non-empty CSV file."),
                );
                return issues;
            }

            match read_head(&path_buf, SNIFF_BYTES) {
                Ok(head) => {
                    let encoding = detect_encoding(&head);
                    match decode_text_strict(&head, encoding) {
                        Ok(text) => {
                            if text.lines().next().is_none() {
                                issues.push(ValidationIssue::error(
                                    "NO_DATA",
                                    "File contains no readable lines",
                                ));
                            }
                        }
                        Err(offset) => {
                            issues.push(
                                ValidationIssue::error(
                                    "ENCODING_ERROR",
                                    format!("Encoding error at byte {}", offset),
                                )
                                .with_suggestion(format!(
                                    "Try specifying encoding explicitly. Detected: {}",
                                    encoding.label()
                                )),
                            );
                        }
                    }
                }
                Err(e) => {
                    issues.push(ValidationIssue::error(
                        "VALIDATION_FAILED",
                        format!("Validation failed: {}", e),
                    ));
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

/// Read one chunk of rows starting at `offset` (data rows, header excluded).
fn read_chunk(
    path: &PathBuf,
    delimiter: char,
    offset: usize,
    chunk_size: usize,
    columns: Option<&[String]>,
) -> AdapterResult<Frame> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .from_path(path)
        .map_err(|e| parse_error(path, e))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| parse_error(path, e))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows: Vec<Vec<String>> = Vec::with_capacity(chunk_size);
    let mut record = csv::StringRecord::new();
    let mut index = 0usize;
    while reader
        .read_record(&mut record)
        .map_err(|e| parse_error(path, e))?
    {
        if index >= offset {
            rows.push(record.iter().map(|f| f.to_string()).collect());
            if rows.len() >= chunk_size {
                break;
            }
        }
        index += 1;
    }

    let table = RawTable { headers, rows };
    let mut frame = build_frame(&table, &[], usize::MAX);
    if let Some(columns) = columns {
        frame = frame.select_existing(columns);
    }
    Ok(frame)
}

/// Turn the sampled frame into probe column descriptors.
pub(crate) fn probe_columns(frame: &Frame) -> Vec<ColumnInfo> {
    frame
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let null_count = col.null_count();
            ColumnInfo {
                name: col.name.clone(),
                position: i,
                inferred_type: col.dtype,
                nullable: null_count > 0,
                sample_values: col.values.iter().take(10).map(|v| v.to_json()).collect(),
                null_count,
                distinct_count_estimate: Some(col.distinct_count()),
            }
        })
        .collect()
}
