//! Excel adapter (.xlsx).
//!
//! Sheet selection honors `sheet_name` then `sheet_index` from the read
//! options; an unknown sheet name falls back to the first sheet with a
//! warning. The first row of the selected sheet is treated as the header
//! row. Excel files never stream: the container must be fully decompressed
//! to locate rows, so `stream_dataframe` fails with a non-recoverable
//! `STREAMING_NOT_SUPPORTED`.
//!
//! Legacy .xls (OLE compound files) and encrypted workbooks (also OLE
//! wrappers) are detected by signature and rejected before any ZIP parsing.

use crate::csv_adapter::probe_columns;
use crate::detect::read_head;
use crate::infer::number_to_scalar;
use crate::ooxml::{CellValue, XlsxWorkbook, OLE_SIGNATURE, ZIP_SIGNATURE};
use crate::stream::FrameStream;
use crate::{stat_file, AdapterResult, FileAdapter};
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use std::time::Instant;
use trellis_frame::{Column, Frame, Scalar};
use trellis_protocol::{
    AdapterCapabilities, AdapterError, AdapterErrorCode, AdapterMetadata, CompressionType,
    FileValidationResult, ReadOptions, ReadResult, SchemaProbeResult, SheetInfo, StreamOptions,
    ValidationIssue,
};

const ADAPTER_ID: &str = "excel";
const ADAPTER_VERSION: &str = "1.0.0";

/// Warn above this size; workbook parsing is memory-hungry.
const LARGE_FILE_LIMIT: u64 = 100 * 1024 * 1024;

#[derive(Debug)]
pub struct ExcelAdapter {
    metadata: AdapterMetadata,
}

impl Default for ExcelAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ExcelAdapter {
    pub fn new() -> Self {
        Self {
            metadata: AdapterMetadata {
                adapter_id: ADAPTER_ID.to_string(),
                name: "Excel Adapter".to_string(),
                version: ADAPTER_VERSION.to_string(),
                file_extensions: vec![".xlsx".to_string(), ".xls".to_string()],
                mime_types: vec![
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                        .to_string(),
                    "application/vnd.ms-excel".to_string(),
                ],
                capabilities: AdapterCapabilities {
                    supports_streaming: false,
                    supports_schema_inference: true,
                    supports_random_access: false,
                    supports_column_selection: true,
                    max_recommended_file_size_mb: Some(100),
                    supported_compressions: vec![CompressionType::None],
                    supports_multiple_sheets: true,
                },
                description: "Parse Excel (.xlsx) workbooks with multi-sheet support".to_string(),
            },
        }
    }
}

fn ooxml_error(path: &Path, err: crate::ooxml::OoxmlError) -> AdapterError {
    AdapterError::new(
        AdapterErrorCode::ParseError,
        format!("Failed to read Excel file: {}", err),
    )
    .with_path(path.display().to_string())
    .with_adapter(ADAPTER_ID)
}

/// Reject OLE containers before ZIP parsing: legacy .xls is unsupported and
/// an OLE-wrapped .xlsx means the workbook is encrypted.
fn check_signature(path: &Path) -> AdapterResult<()> {
    let head = read_head(path, 8).map_err(|e| {
        AdapterError::new(AdapterErrorCode::Unknown, format!("Cannot read file: {}", e))
            .with_path(path.display().to_string())
            .with_adapter(ADAPTER_ID)
    })?;
    if head.starts_with(&OLE_SIGNATURE) {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if ext == "xls" {
            return Err(AdapterError::new(
                AdapterErrorCode::InvalidFormat,
                "Legacy .xls (BIFF) workbooks are not supported",
            )
            .with_path(path.display().to_string())
            .with_adapter(ADAPTER_ID)
            .with_suggestion("Re-save the workbook as .xlsx"));
        }
        return Err(AdapterError::new(
            AdapterErrorCode::PasswordProtected,
            "File appears to be password protected",
        )
        .with_path(path.display().to_string())
        .with_adapter(ADAPTER_ID)
        .with_suggestion("Remove password protection before processing."));
    }
    if !head.starts_with(&ZIP_SIGNATURE) {
        return Err(AdapterError::new(
            AdapterErrorCode::CorruptFile,
            "File is not a valid Excel workbook",
        )
        .with_path(path.display().to_string())
        .with_adapter(ADAPTER_ID)
        .with_suggestion("Try opening the file in Excel and re-saving it."));
    }
    Ok(())
}

/// Pick the target sheet per options; unknown names fall back to the first
/// sheet with a warning.
fn resolve_sheet(
    names: &[String],
    options: &ReadOptions,
    warnings: &mut Vec<String>,
) -> Option<String> {
    if let Some(requested) = options.extra_str("sheet_name") {
        if names.iter().any(|n| n == requested) {
            return Some(requested.to_string());
        }
        warnings.push(format!(
            "Sheet '{}' not found, using first sheet",
            requested
        ));
        return names.first().cloned();
    }
    let index = options.extra_usize("sheet_index").unwrap_or(0);
    names.get(index).or_else(|| names.first()).cloned()
}

fn cell_to_scalar(cell: &CellValue) -> Scalar {
    match cell {
        CellValue::Empty => Scalar::Null,
        CellValue::Number(v) => number_to_scalar(*v),
        CellValue::Bool(b) => Scalar::Bool(*b),
        CellValue::Text(s) => {
            if s.is_empty() {
                Scalar::Null
            } else {
                Scalar::Str(s.clone())
            }
        }
    }
}

fn cell_to_header(cell: &CellValue, position: usize) -> String {
    match cell {
        CellValue::Text(s) if !s.is_empty() => s.clone(),
        CellValue::Number(v) => v.to_string(),
        CellValue::Bool(b) => b.to_string(),
        _ => format!("col_{}", position),
    }
}

/// Turn a sheet grid (first row = headers) into a frame.
fn grid_to_frame(rows: &[Vec<CellValue>]) -> Frame {
    let Some((header_row, data_rows)) = rows.split_first() else {
        return Frame::empty();
    };
    let headers: Vec<String> = header_row
        .iter()
        .enumerate()
        .map(|(i, c)| cell_to_header(c, i))
        .collect();
    let mut columns = Vec::with_capacity(headers.len());
    for (i, name) in headers.iter().enumerate() {
        let values: Vec<Scalar> = data_rows
            .iter()
            .map(|row| row.get(i).map(cell_to_scalar).unwrap_or(Scalar::Null))
            .collect();
        columns.push(Column::new(name.clone(), values));
    }
    Frame::from_columns(columns).unwrap_or_else(|_| Frame::empty())
}

fn apply_read_options(frame: Frame, options: &ReadOptions) -> (Frame, bool) {
    let mut frame = frame;
    if options.skip_rows > 0 {
        frame = frame.slice(options.skip_rows, frame.height());
    }
    let mut truncated = false;
    if let Some(limit) = options.row_limit {
        // Truncated means rows were actually dropped; an exact-fit sheet is
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
impl FileAdapter for ExcelAdapter {
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

        let mut result =
            tokio::task::spawn_blocking(move || -> AdapterResult<SchemaProbeResult> {
                check_signature(&path_buf)?;
                let mut workbook =
                    XlsxWorkbook::open(&path_buf).map_err(|e| ooxml_error(&path_buf, e))?;
                let names = workbook.sheet_names();
                let mut warnings = Vec::new();
                let target = resolve_sheet(&names, &options, &mut warnings);

                // The whole sheet is already in memory; only inference is
                // sample-bounded.
                let (sample, total_rows) = match &target {
                    Some(name) => {
                        let grid = workbook
                            .read_sheet(name)
                            .map_err(|e| ooxml_error(&path_buf, e))?;
                        let frame = grid_to_frame(&grid);
                        let total = frame.height();
                        (frame.head(options.infer_schema_length), total)
                    }
                    None => (Frame::empty(), 0),
                };

                let sheets: Vec<SheetInfo> = names
                    .iter()
                    .enumerate()
                    .map(|(idx, name)| SheetInfo {
                        sheet_name: name.clone(),
                        sheet_index: idx,
                        row_count_estimate: if Some(name) == target.as_ref() {
                            Some(total_rows)
                        } else {
                            None
                        },
                        column_count: if Some(name) == target.as_ref() {
                            Some(sample.width())
                        } else {
                            None
                        },
                    })
                    .collect();

                Ok(SchemaProbeResult {
                    file_path: path_buf.display().to_string(),
                    file_size_bytes: file_size,
                    adapter_id: ADAPTER_ID.to_string(),
                    columns: probe_columns(&sample),
                    row_count_estimate: Some(total_rows),
                    row_count_exact: true,
                    encoding_detected: None,
                    delimiter_detected: None,
                    has_header_row: true,
                    sheets: Some(sheets),
                    compression_detected: None,
                    probed_at: started_at,
                    probe_duration_ms: 0.0,
                    sample_rows_read: sample.height(),
                    errors: Vec::new(),
                    warnings,
                })
            })
            .await
            .map_err(|e| {
                AdapterError::new(
                    AdapterErrorCode::SchemaInferenceFailed,
                    format!("Failed to probe Excel schema: {}", e),
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

        let (frame, was_truncated, warnings) = tokio::task::spawn_blocking(
            move || -> AdapterResult<(Frame, bool, Vec<String>)> {
                check_signature(&path_buf)?;
                let mut workbook =
                    XlsxWorkbook::open(&path_buf).map_err(|e| ooxml_error(&path_buf, e))?;
                let names = workbook.sheet_names();
                let mut warnings = Vec::new();
                let target = resolve_sheet(&names, &options, &mut warnings);
                let frame = match target {
                    Some(name) => {
                        let grid = workbook
                            .read_sheet(&name)
                            .map_err(|e| ooxml_error(&path_buf, e))?;
                        grid_to_frame(&grid)
                    }
                    None => Frame::empty(),
                };
                let (frame, truncated) = apply_read_options(frame, &options);
                Ok((frame, truncated, warnings))
            },
        )
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
            warnings,
            was_truncated,
        };
        Ok((frame, result))
    }

    async fn stream_dataframe(
        &self,
        path: &Path,
        _options: &StreamOptions,
    ) -> AdapterResult<FrameStream> {
        Err(AdapterError::new(
            AdapterErrorCode::StreamingNotSupported,
            "Excel files do not support streaming due to their container format. \
             For large workbooks, convert to CSV first.",
        )
        .with_path(path.display().to_string())
        .with_adapter(ADAPTER_ID)
        .non_recoverable())
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
                        .with_suggestion("Provide a non-empty Excel file."),
                );
                return issues;
            }
            if size > LARGE_FILE_LIMIT {
                issues.push(
                    ValidationIssue::warning(
                        "LARGE_FILE",
                        format!(
                            "File is large ({:.1} MB). Processing may be slow.",
                            size as f64 / (1024.0 * 1024.0)
                        ),
                    )
                    .with_suggestion("Consider converting to CSV for better performance."),
                );
            }

            match check_signature(&path_buf) {
                Ok(()) => {
                    if let Err(e) = XlsxWorkbook::open(&path_buf) {
                        issues.push(
                            ValidationIssue::error(
                                "CORRUPT_FILE",
                                format!("File appears to be corrupt: {}", e),
                            )
                            .with_suggestion(
                                "Try opening the file in Excel and re-saving it.",
                            ),
                        );
                    }
                }
                Err(e) => {
                    issues.push(ValidationIssue {
                        severity: trellis_protocol::ValidationSeverity::Error,
                        code: e.code.as_str().to_string(),
                        message: e.message.clone(),
                        line_number: None,
                        suggestion: e.suggestion.clone(),
                    });
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::write_xlsx;
    use std::io::Write;
    use trellis_protocol::DataType;

    fn sample_workbook() -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        let rows = vec![
            vec![
                CellValue::Text("site".into()),
                CellValue::Text("cd".into()),
                CellValue::Text("ok".into()),
            ],
            vec![
                CellValue::Text("s1".into()),
                CellValue::Number(12.5),
                CellValue::Bool(true),
            ],
            vec![
                CellValue::Text("s2".into()),
                CellValue::Number(13.0),
                CellValue::Bool(false),
            ],
        ];
        write_xlsx(file.as_file(), "Measurements", &rows).unwrap();
        file
    }

    #[tokio::test]
    async fn test_probe_lists_sheets() {
        let file = sample_workbook();
        let adapter = ExcelAdapter::new();
        let probe = adapter
            .probe_schema(file.path(), &ReadOptions::default())
            .await
            .unwrap();
        let sheets = probe.sheets.unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].sheet_name, "Measurements");
        assert_eq!(probe.columns.len(), 3);
        assert_eq!(probe.columns[1].inferred_type, DataType::Float);
    }

    #[tokio::test]
    async fn test_read_values() {
        let file = sample_workbook();
        let adapter = ExcelAdapter::new();
        let (frame, _) = adapter
            .read_dataframe(file.path(), &ReadOptions::default())
            .await
            .unwrap();
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.column("cd").unwrap().values[0], Scalar::Float(12.5));
        assert_eq!(frame.column("ok").unwrap().values[1], Scalar::Bool(false));
    }

    #[tokio::test]
    async fn test_unknown_sheet_falls_back_with_warning() {
        let file = sample_workbook();
        let adapter = ExcelAdapter::new();
        let mut options = ReadOptions::default();
        options
            .extra
            .insert("sheet_name".to_string(), serde_json::json!("Nope"));
        let (frame, result) = adapter.read_dataframe(file.path(), &options).await.unwrap();
        assert_eq!(frame.height(), 2);
        assert!(result.warnings[0].contains("not found"));
    }

    #[tokio::test]
    async fn test_streaming_not_supported() {
        let file = sample_workbook();
        let adapter = ExcelAdapter::new();
        let err = adapter
            .stream_dataframe(file.path(), &StreamOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, AdapterErrorCode::StreamingNotSupported);
        assert!(!err.recoverable);
    }

    #[tokio::test]
    async fn test_validate_ole_reports_password_protected() {
        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        file.write_all(&OLE_SIGNATURE).unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        let adapter = ExcelAdapter::new();
        let result = adapter.validate_file(file.path()).await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.issues[0].code, "PASSWORD_PROTECTED");
    }

    #[tokio::test]
    async fn test_validate_legacy_xls_rejected() {
        let mut file = tempfile::Builder::new().suffix(".xls").tempfile().unwrap();
        file.write_all(&OLE_SIGNATURE).unwrap();
        file.write_all(&[0u8; 64]).unwrap();
        let adapter = ExcelAdapter::new();
        let result = adapter.validate_file(file.path()).await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.issues[0].code, "INVALID_FORMAT");
    }

    #[tokio::test]
    async fn test_validate_garbage_is_corrupt() {
        let mut file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        file.write_all(b"definitely not a workbook").unwrap();
        let adapter = ExcelAdapter::new();
        let result = adapter.validate_file(file.path()).await.unwrap();
        assert!(!result.is_valid);
        assert_eq!(result.issues[0].code, "CORRUPT_FILE");
    }
}
