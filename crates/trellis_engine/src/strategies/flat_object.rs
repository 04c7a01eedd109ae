//! flat_object: one JSON object becomes a single-row frame.
//!
//! Keys become columns. Nested objects either flatten recursively into
//! compound column names or encode as JSON-string scalars.

use super::{get_at_path, json_kind, Context};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::warn;
use trellis_frame::Frame;
use trellis_profile::SelectConfig;

pub fn extract(data: &JsonValue, select: &SelectConfig, _context: &Context) -> Frame {
    let Some(value) = get_at_path(data, &select.path) else {
        return Frame::empty();
    };
    let Some(obj) = value.as_object() else {
        warn!(path = %select.path, got = json_kind(&value), "expected object");
        return Frame::empty();
    };

    let mut flat = if select.flatten_nested {
        flatten(obj, &select.flatten_separator, "")
    } else {
        stringify_nested(obj)
    };

    if let Some(fields) = &select.fields {
        flat.retain(|key, _| fields.iter().any(|f| f == key));
    }

    Frame::from_single_object(&flat)
}

/// Recursively flatten nested objects into compound keys; arrays encode as
/// JSON strings.
fn flatten(
    obj: &JsonMap<String, JsonValue>,
    separator: &str,
    prefix: &str,
) -> JsonMap<String, JsonValue> {
    let mut out = JsonMap::new();
    for (key, value) in obj {
        let compound = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}{}{}", prefix, separator, key)
        };
        match value {
            JsonValue::Object(nested) => {
                out.extend(flatten(nested, separator, &compound));
            }
            JsonValue::Array(_) => {
                out.insert(compound, JsonValue::String(value.to_string()));
            }
            other => {
                out.insert(compound, other.clone());
            }
        }
    }
    out
}

/// Encode nested objects and arrays as JSON-string scalars.
fn stringify_nested(obj: &JsonMap<String, JsonValue>) -> JsonMap<String, JsonValue> {
    obj.iter()
        .map(|(key, value)| {
            let scalar = match value {
                JsonValue::Object(_) | JsonValue::Array(_) => {
                    JsonValue::String(value.to_string())
                }
                other => other.clone(),
            };
            (key.clone(), scalar)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_frame::Scalar;

    fn select(path: &str) -> SelectConfig {
        SelectConfig {
            path: path.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_row_from_object() {
        let data = json!({"summary": {"lot": "L1", "count": 3}});
        let frame = extract(&data, &select("$.summary"), &Context::new());
        assert_eq!(frame.height(), 1);
        assert_eq!(frame.column("lot").unwrap().values[0], Scalar::Str("L1".into()));
        assert_eq!(frame.column("count").unwrap().values[0], Scalar::Int(3));
    }

    #[test]
    fn test_missing_path_is_empty() {
        let data = json!({"a": 1});
        let frame = extract(&data, &select("$.nope"), &Context::new());
        assert!(frame.is_empty());
        assert_eq!(frame.width(), 0);
    }

    #[test]
    fn test_non_object_is_empty() {
        let data = json!({"a": [1, 2]});
        let frame = extract(&data, &select("$.a"), &Context::new());
        assert!(frame.is_empty());
    }

    #[test]
    fn test_nested_stringified_by_default() {
        let data = json!({"s": {"meta": {"x": 1}, "tags": [1, 2]}});
        let frame = extract(&data, &select("$.s"), &Context::new());
        assert_eq!(
            frame.column("meta").unwrap().values[0],
            Scalar::Str("{\"x\":1}".into())
        );
        assert_eq!(
            frame.column("tags").unwrap().values[0],
            Scalar::Str("[1,2]".into())
        );
    }

    #[test]
    fn test_flatten_nested() {
        let data = json!({"s": {"meta": {"x": 1, "inner": {"y": 2}}}});
        let mut cfg = select("$.s");
        cfg.flatten_nested = true;
        let frame = extract(&data, &cfg, &Context::new());
        assert_eq!(frame.column("meta_x").unwrap().values[0], Scalar::Int(1));
        assert_eq!(
            frame.column("meta_inner_y").unwrap().values[0],
            Scalar::Int(2)
        );
    }

    #[test]
    fn test_fields_whitelist() {
        let data = json!({"s": {"a": 1, "b": 2, "c": 3}});
        let mut cfg = select("$.s");
        cfg.fields = Some(vec!["a".to_string(), "c".to_string()]);
        let frame = extract(&data, &cfg, &Context::new());
        assert_eq!(frame.width(), 2);
        assert!(frame.has_column("a"));
        assert!(!frame.has_column("b"));
    }
}
