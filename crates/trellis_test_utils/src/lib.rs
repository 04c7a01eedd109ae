//! Fixture builders for Trellis tests.
//!
//! Writes small on-disk files in every supported format plus a reference
//! extraction profile, so integration tests exercise real adapter I/O
//! without hand-rolling fixtures in each test module.

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType as ArrowType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::Value as JsonValue;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A temp directory of fixture files; dropped with the tests.
pub struct FixtureDir {
    dir: TempDir,
}

impl Default for FixtureDir {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create fixture dir"),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }

    pub fn write_text(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("write fixture");
        path
    }

    pub fn write_json(&self, name: &str, value: &JsonValue) -> PathBuf {
        self.write_text(name, &value.to_string())
    }

    pub fn write_jsonl(&self, name: &str, rows: &[JsonValue]) -> PathBuf {
        let mut content = String::new();
        for row in rows {
            content.push_str(&row.to_string());
            content.push('\n');
        }
        self.write_text(name, &content)
    }

    /// A 5-row, 3-column Parquet file (id, name, value).
    pub fn write_sample_parquet(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", ArrowType::Int64, false),
            Field::new("name", ArrowType::Utf8, true),
            Field::new("value", ArrowType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])) as ArrayRef,
                Arc::new(StringArray::from(vec!["a", "b", "c", "d", "e"])) as ArrayRef,
                Arc::new(Float64Array::from(vec![0.1, 0.2, 0.3, 0.4, 0.5])) as ArrayRef,
            ],
        )
        .expect("build record batch");
        let file = std::fs::File::create(&path).expect("create parquet fixture");
        let mut writer = ArrowWriter::try_new(file, schema, None).expect("parquet writer");
        writer.write(&batch).expect("write batch");
        writer.close().expect("close writer");
        path
    }

    /// A small workbook written through the sink layer.
    pub fn write_sample_xlsx(&self, name: &str, frame: &trellis_frame::Frame) -> PathBuf {
        let path = self.dir.path().join(name);
        trellis_sinks::write_workbook(frame, &path, "Data").expect("write workbook");
        path
    }
}

/// A run document fixture shaped like a CD-SEM run export.
pub fn run_document(lot: &str, site_count: usize) -> JsonValue {
    let sites: Vec<JsonValue> = (0..site_count)
        .map(|i| {
            serde_json::json!({
                "site": format!("s{}", i + 1),
                "cd": 10.0 + i as f64,
                "depth": 5.0 + i as f64 / 2.0
            })
        })
        .collect();
    serde_json::json!({
        "summary": {"lot": lot, "recipe": "RCP-1", "tool": "SEM-01"},
        "sites": sites
    })
}

/// A reference profile covering both levels and one default output.
pub fn sample_profile_yaml() -> &'static str {
    r#"
meta:
  profile_id: sample_runs
  title: Sample Run Extraction
datasource:
  format: json
context_defaults:
  defaults: { tool: "UNKNOWN" }
  content_patterns:
    - field: lot
      path: "$.summary.lot"
    - field: tool
      path: "$.summary.tool"
levels:
  - name: run
    tables:
      - id: summary
        select: { strategy: flat_object, path: "$.summary" }
        stable_columns: [lot, recipe, tool]
      - id: sites
        select: { strategy: array_of_objects, path: "$.sites[*]" }
        stable_columns: [site, cd]
outputs:
  defaults:
    - id: run_wide
      from_level: run
      from_tables: [summary]
    - id: site_long
      from_level: run
      from_tables: [sites]
  aggregations:
    - id: site_stats
      from_table: sites
      group_by: [site]
      aggregations:
        cd: mean
"#
}

/// CSV content with a header and `rows` numbered data rows.
pub fn numbered_csv(rows: usize) -> String {
    let mut content = String::from("id,name,value\n");
    for i in 0..rows {
        content.push_str(&format!("{},row{},{}\n", i + 1, i + 1, (i + 1) as f64 / 2.0));
    }
    content
}

/// Write `content` with a suffix-preserving temp name.
pub fn named_temp(suffix: &str, content: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("create temp file");
    file.write_all(content).expect("write temp file");
    file
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_dir_writes() {
        let dir = FixtureDir::new();
        let json = dir.write_json("run.json", &run_document("L1", 2));
        assert!(json.exists());
        let parquet = dir.write_sample_parquet("data.parquet");
        assert!(parquet.exists());
    }

    #[test]
    fn test_numbered_csv_shape() {
        let csv = numbered_csv(3);
        assert_eq!(csv.lines().count(), 4);
        assert!(csv.starts_with("id,name,value"));
    }
}
