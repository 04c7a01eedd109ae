//! array_of_objects: each object in a list becomes a row.
//!
//! The column set is the union of keys across the objects in first-seen
//! order; missing keys become null.

use super::{get_at_path, json_kind, Context};
use crate::jsonpath::strip_trailing_wildcard;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::warn;
use trellis_frame::Frame;
use trellis_profile::SelectConfig;

pub fn extract(data: &JsonValue, select: &SelectConfig, _context: &Context) -> Frame {
    let path = strip_trailing_wildcard(&select.path);
    let Some(value) = get_at_path(data, path) else {
        return Frame::empty();
    };
    let Some(items) = value.as_array() else {
        warn!(path = %select.path, got = json_kind(&value), "expected list");
        return Frame::empty();
    };
    if items.is_empty() {
        return Frame::empty();
    }

    let filtered: Vec<JsonMap<String, JsonValue>> = items
        .iter()
        .filter_map(|v| v.as_object())
        .map(|obj| match &select.fields {
            Some(fields) => obj
                .iter()
                .filter(|(k, _)| fields.iter().any(|f| f == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => obj.clone(),
        })
        .collect();

    let refs: Vec<&JsonMap<String, JsonValue>> = filtered.iter().collect();
    Frame::from_json_objects(&refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_frame::Scalar;

    fn select(path: &str) -> SelectConfig {
        SelectConfig {
            path: path.to_string(),
            strategy: trellis_profile::Strategy::ArrayOfObjects,
            ..Default::default()
        }
    }

    #[test]
    fn test_union_of_keys() {
        let data = json!({"sites": [{"a": 1, "b": 2}, {"a": 3, "c": 4}]});
        let frame = extract(&data, &select("$.sites[*]"), &Context::new());
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.column_names(), vec!["a", "b", "c"]);
        assert_eq!(frame.column("b").unwrap().values[1], Scalar::Null);
    }

    #[test]
    fn test_empty_list_is_empty_frame() {
        let data = json!({"sites": []});
        let frame = extract(&data, &select("$.sites"), &Context::new());
        assert!(frame.is_empty());
    }

    #[test]
    fn test_non_list_is_empty() {
        let data = json!({"sites": {"a": 1}});
        let frame = extract(&data, &select("$.sites"), &Context::new());
        assert!(frame.is_empty());
    }

    #[test]
    fn test_fields_whitelist() {
        let data = json!({"sites": [{"a": 1, "b": 2}]});
        let mut cfg = select("$.sites");
        cfg.fields = Some(vec!["b".to_string()]);
        let frame = extract(&data, &cfg, &Context::new());
        assert_eq!(frame.column_names(), vec!["b"]);
    }
}
