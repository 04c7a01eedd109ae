//! Output writers.
//!
//! Frames write to Parquet (through Arrow record batches), CSV, or a
//! single-sheet XLSX workbook. Plan artifacts write as canonical JSON so a
//! re-serialized artifact hashes identically to the in-memory one. The
//! artifact layout under an output root is:
//!
//! ```text
//! {output_root}/
//!   {partition_dir}/{sanitized_name}.{parquet|csv|xlsx}
//!   manifest.json
//!   lookup.json
//!   request_graph.json
//! ```

use arrow::array::{
    ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType as ArrowType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use trellis_adapters::ooxml::{write_xlsx, CellValue};
use trellis_frame::{Frame, Scalar};
use trellis_plan::{canonical_json, PlanArtifacts};
use trellis_protocol::DataType;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Workbook(#[from] trellis_adapters::ooxml::OoxmlError),

    #[error("Serialization error: {0}")]
    Canonical(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Convert a frame into one Arrow record batch, choosing the array type per
/// column dtype and stringifying anything irregular.
pub fn frame_to_record_batch(frame: &Frame) -> SinkResult<RecordBatch> {
    let mut fields = Vec::with_capacity(frame.width());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(frame.width());

    for column in frame.columns() {
        let (arrow_type, array): (ArrowType, ArrayRef) = match column.dtype {
            DataType::Integer => {
                let values: Vec<Option<i64>> = column
                    .values
                    .iter()
                    .map(|v| match v {
                        Scalar::Int(i) => Some(*i),
                        Scalar::Float(f) => Some(*f as i64),
                        _ => None,
                    })
                    .collect();
                (ArrowType::Int64, Arc::new(Int64Array::from(values)))
            }
            DataType::Float => {
                let values: Vec<Option<f64>> =
                    column.values.iter().map(Scalar::as_f64).collect();
                (ArrowType::Float64, Arc::new(Float64Array::from(values)))
            }
            DataType::Boolean => {
                let values: Vec<Option<bool>> =
                    column.values.iter().map(Scalar::as_bool).collect();
                (ArrowType::Boolean, Arc::new(BooleanArray::from(values)))
            }
            DataType::Date => {
                let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
                let values: Vec<Option<i32>> = column
                    .values
                    .iter()
                    .map(|v| match v {
                        Scalar::Date(d) => Some((*d - epoch).num_days() as i32),
                        _ => None,
                    })
                    .collect();
                (ArrowType::Date32, Arc::new(Date32Array::from(values)))
            }
            DataType::Datetime => {
                let values: Vec<Option<i64>> = column
                    .values
                    .iter()
                    .map(|v| match v {
                        Scalar::Datetime(dt) => Some(dt.and_utc().timestamp_micros()),
                        _ => None,
                    })
                    .collect();
                (
                    ArrowType::Timestamp(TimeUnit::Microsecond, None),
                    Arc::new(TimestampMicrosecondArray::from(values)),
                )
            }
            _ => {
                let values: Vec<Option<String>> = column
                    .values
                    .iter()
                    .map(|v| {
                        if v.is_null() {
                            None
                        } else {
                            Some(v.to_string())
                        }
                    })
                    .collect();
                (ArrowType::Utf8, Arc::new(StringArray::from(values)))
            }
        };
        fields.push(Field::new(column.name.clone(), arrow_type, true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    Ok(RecordBatch::try_new(schema, arrays)?)
}

pub fn write_parquet(frame: &Frame, path: &Path) -> SinkResult<()> {
    let batch = frame_to_record_batch(frame)?;
    let file = std::fs::File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(&batch)?;
    writer.close()?;
    info!(path = %path.display(), rows = frame.height(), "wrote parquet output");
    Ok(())
}

pub fn write_csv(frame: &Frame, path: &Path) -> SinkResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(frame.column_names())?;
    for row in 0..frame.height() {
        let record: Vec<String> = frame
            .columns()
            .iter()
            .map(|c| c.values[row].to_string())
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = frame.height(), "wrote csv output");
    Ok(())
}

pub fn write_workbook(frame: &Frame, path: &Path, sheet_name: &str) -> SinkResult<()> {
    let mut rows: Vec<Vec<CellValue>> = Vec::with_capacity(frame.height() + 1);
    rows.push(
        frame
            .column_names()
            .into_iter()
            .map(|n| CellValue::Text(n.to_string()))
            .collect(),
    );
    for row in 0..frame.height() {
        rows.push(
            frame
                .columns()
                .iter()
                .map(|c| match &c.values[row] {
                    Scalar::Null => CellValue::Empty,
                    Scalar::Bool(b) => CellValue::Bool(*b),
                    Scalar::Int(i) => CellValue::Number(*i as f64),
                    Scalar::Float(f) => CellValue::Number(*f),
                    other => CellValue::Text(other.to_string()),
                })
                .collect(),
        );
    }
    let file = std::fs::File::create(path)?;
    write_xlsx(file, sheet_name, &rows)?;
    info!(path = %path.display(), rows = frame.height(), "wrote xlsx output");
    Ok(())
}

/// Write one output frame in the requested format, returning the full path.
pub fn write_output(
    frame: &Frame,
    dir: &Path,
    filename: &str,
    format: &str,
) -> SinkResult<std::path::PathBuf> {
    std::fs::create_dir_all(dir)?;
    let (path, result) = match format {
        "parquet" => {
            let path = dir.join(format!("{}.parquet", filename));
            (path.clone(), write_parquet(frame, &path))
        }
        "csv" => {
            let path = dir.join(format!("{}.csv", filename));
            (path.clone(), write_csv(frame, &path))
        }
        "xlsx" | "excel" => {
            let path = dir.join(format!("{}.xlsx", filename));
            (path.clone(), write_workbook(frame, &path, "Data"))
        }
        other => return Err(SinkError::UnsupportedFormat(other.to_string())),
    };
    result.map(|_| path)
}

/// Write the three plan artifact files as canonical JSON, so what lands on
/// disk serializes identically to what the manifest hashed.
pub fn write_plan_artifacts(artifacts: &PlanArtifacts, dir: &Path) -> SinkResult<()> {
    std::fs::create_dir_all(dir)?;
    let manifest =
        canonical_json(&artifacts.manifest).map_err(|e| SinkError::Canonical(e.to_string()))?;
    let lookup =
        canonical_json(&artifacts.lookup).map_err(|e| SinkError::Canonical(e.to_string()))?;
    let request_graph = canonical_json(&artifacts.request_graph)
        .map_err(|e| SinkError::Canonical(e.to_string()))?;
    std::fs::write(dir.join("manifest.json"), manifest)?;
    std::fs::write(dir.join("lookup.json"), lookup)?;
    std::fs::write(dir.join("request_graph.json"), request_graph)?;
    info!(dir = %dir.display(), "wrote plan artifacts");
    Ok(())
}
