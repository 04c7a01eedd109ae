//! headers_data: explicit header array plus row array.
//!
//! The object at `path` holds column names under `headers_key` and rows
//! under `data_key`. Headers can also be synthesized (`infer_headers`) or
//! supplied (`default_headers`). Short rows pad with null; long rows
//! truncate with a warning.

use super::{get_at_path, json_kind, Context};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use trellis_frame::{Column, Frame, Scalar};
use trellis_profile::SelectConfig;

pub fn extract(data: &JsonValue, select: &SelectConfig, _context: &Context) -> Frame {
    let Some(value) = get_at_path(data, &select.path) else {
        return Frame::empty();
    };
    let Some(obj) = value.as_object() else {
        warn!(path = %select.path, got = json_kind(&value), "expected object");
        return Frame::empty();
    };

    let rows = data_rows(obj, select);
    let headers = resolve_headers(obj, select, &rows);
    if headers.is_empty() {
        warn!(path = %select.path, "no headers found");
        return Frame::empty();
    }
    if rows.is_empty() {
        debug!(path = %select.path, "no data rows found");
        return Frame::with_schema(&headers);
    }

    build_frame(&headers, rows)
}

fn resolve_headers(
    obj: &serde_json::Map<String, JsonValue>,
    select: &SelectConfig,
    rows: &[Vec<JsonValue>],
) -> Vec<String> {
    if let Some(key) = &select.headers_key {
        if let Some(JsonValue::Array(headers)) = obj.get(key) {
            return headers
                .iter()
                .map(|h| match h {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
        }
    }
    if select.infer_headers {
        if let Some(first) = rows.first() {
            return (0..first.len()).map(|i| format!("col_{}", i)).collect();
        }
    }
    select.default_headers.clone().unwrap_or_default()
}

fn data_rows(obj: &serde_json::Map<String, JsonValue>, select: &SelectConfig) -> Vec<Vec<JsonValue>> {
    let Some(key) = &select.data_key else {
        return Vec::new();
    };
    let Some(JsonValue::Array(rows)) = obj.get(key) else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| match row {
            JsonValue::Array(values) => values.clone(),
            // Dict rows contribute values in insertion order.
            JsonValue::Object(map) => map.values().cloned().collect(),
            other => vec![other.clone()],
        })
        .collect()
}

fn build_frame(headers: &[String], rows: Vec<Vec<JsonValue>>) -> Frame {
    let width = headers.len();
    let mut truncated = 0usize;
    let mut columns: Vec<Vec<Scalar>> = vec![Vec::with_capacity(rows.len()); width];

    for row in &rows {
        if row.len() > width {
            truncated += 1;
        }
        for (i, column) in columns.iter_mut().enumerate() {
            let value = row.get(i).map(Scalar::from_json).unwrap_or(Scalar::Null);
            column.push(value);
        }
    }
    if truncated > 0 {
        warn!(rows = truncated, "rows wider than headers were truncated");
    }

    let columns = headers
        .iter()
        .zip(columns)
        .map(|(name, values)| Column::new(name.clone(), values))
        .collect();
    Frame::from_columns(columns).unwrap_or_else(|_| Frame::empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn select(path: &str) -> SelectConfig {
        SelectConfig {
            path: path.to_string(),
            headers_key: Some("headers".to_string()),
            data_key: Some("rows".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_basic_headers_and_rows() {
        let data = json!({
            "stats": {
                "headers": ["site", "cd"],
                "rows": [["s1", 10], ["s2", 20]]
            }
        });
        let frame = extract(&data, &select("$.stats"), &Context::new());
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.column_names(), vec!["site", "cd"]);
        assert_eq!(frame.column("cd").unwrap().values[1], Scalar::Int(20));
    }

    #[test]
    fn test_short_rows_pad_long_rows_truncate() {
        let data = json!({
            "stats": {
                "headers": ["a", "b"],
                "rows": [[1], [1, 2, 3]]
            }
        });
        let frame = extract(&data, &select("$.stats"), &Context::new());
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.column("b").unwrap().values[0], Scalar::Null);
        assert_eq!(frame.column("b").unwrap().values[1], Scalar::Int(2));
        assert_eq!(frame.width(), 2);
    }

    #[test]
    fn test_dict_rows_use_insertion_order() {
        let data = json!({
            "stats": {
                "headers": ["x", "y"],
                "rows": [{"x": 1, "y": 2}]
            }
        });
        let frame = extract(&data, &select("$.stats"), &Context::new());
        assert_eq!(frame.column("x").unwrap().values[0], Scalar::Int(1));
        assert_eq!(frame.column("y").unwrap().values[0], Scalar::Int(2));
    }

    #[test]
    fn test_infer_headers() {
        let data = json!({"stats": {"rows": [[1, 2, 3]]}});
        let mut cfg = select("$.stats");
        cfg.headers_key = None;
        cfg.infer_headers = true;
        let frame = extract(&data, &cfg, &Context::new());
        assert_eq!(frame.column_names(), vec!["col_0", "col_1", "col_2"]);
    }

    #[test]
    fn test_default_headers_fallback() {
        let data = json!({"stats": {"rows": [[1, 2]]}});
        let mut cfg = select("$.stats");
        cfg.headers_key = None;
        cfg.default_headers = Some(vec!["left".to_string(), "right".to_string()]);
        let frame = extract(&data, &cfg, &Context::new());
        assert_eq!(frame.column_names(), vec!["left", "right"]);
    }

    #[test]
    fn test_empty_rows_keep_schema() {
        let data = json!({"stats": {"headers": ["a", "b"], "rows": []}});
        let frame = extract(&data, &select("$.stats"), &Context::new());
        assert_eq!(frame.height(), 0);
        assert_eq!(frame.column_names(), vec!["a", "b"]);
    }
}
