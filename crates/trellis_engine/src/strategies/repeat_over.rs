//! repeat_over: composite iteration strategy.
//!
//! Iterates over an array, substitutes the element index into the base
//! path, runs the base strategy per element, injects declared parent fields
//! into each extracted row, and diagonally concatenates the results in
//! iteration order.

use super::{dispatch, get_at_path, Context};
use crate::jsonpath::substitute_index;
use serde_json::Value as JsonValue;
use tracing::{error, warn};
use trellis_frame::{Frame, Scalar};
use trellis_profile::SelectConfig;

pub fn extract(data: &JsonValue, select: &SelectConfig, context: &Context) -> Frame {
    let Some(repeat) = &select.repeat_over else {
        error!("repeat_over strategy requires a repeat_over config");
        return Frame::empty();
    };

    let Some(array_value) = get_at_path(data, &repeat.path) else {
        return Frame::empty();
    };
    let Some(items) = array_value.as_array() else {
        warn!(path = %repeat.path, "repeat_over path is not an array");
        return Frame::empty();
    };

    let mut frames: Vec<Frame> = Vec::with_capacity(items.len());
    for (index, element) in items.iter().enumerate() {
        let element_path = substitute_index(&select.path, &repeat.as_var, index);
        let element_select = SelectConfig {
            path: element_path,
            repeat_over: None,
            ..select.clone()
        };

        let mut frame = dispatch(select.strategy, data, &element_select, context);
        if frame.is_empty() {
            continue;
        }

        // Pull declared parent fields into every row of this iteration.
        if let Some(parent) = element.as_object() {
            for (target_col, source_path) in &repeat.inject_fields {
                let value = nested_value(parent, source_path)
                    .map(|v| Scalar::from_json(&v))
                    .unwrap_or(Scalar::Null);
                frame = frame.with_scalar_column(target_col, value);
            }
        }

        frames.push(frame);
    }

    Frame::concat_diagonal(&frames)
}

/// Simple dotted lookup inside one element: "$.name.sub" or "name.sub".
fn nested_value(obj: &serde_json::Map<String, JsonValue>, path: &str) -> Option<JsonValue> {
    let trimmed = path.strip_prefix("$.").unwrap_or(path);
    let mut current = obj.get(trimmed.split('.').next()?)?;
    for part in trimmed.split('.').skip(1) {
        current = current.get(part)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use trellis_profile::RepeatOver;

    fn doc() -> JsonValue {
        json!({
            "sites": [
                {"name": "s1", "stats": {"headers": ["cd"], "rows": [[10], [11]]}},
                {"name": "s2", "stats": {"headers": ["cd", "depth"], "rows": [[20, 5]]}}
            ]
        })
    }

    fn select(inject: &[(&str, &str)]) -> SelectConfig {
        let mut inject_fields = BTreeMap::new();
        for (k, v) in inject {
            inject_fields.insert(k.to_string(), v.to_string());
        }
        SelectConfig {
            strategy: trellis_profile::Strategy::HeadersData,
            path: "$.sites[{site}].stats".to_string(),
            headers_key: Some("headers".to_string()),
            data_key: Some("rows".to_string()),
            repeat_over: Some(RepeatOver {
                path: "$.sites".to_string(),
                as_var: "site".to_string(),
                inject_fields,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_iterates_and_concatenates_in_order() {
        let frame = extract(&doc(), &select(&[]), &Context::new());
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.column("cd").unwrap().values[0], Scalar::Int(10));
        assert_eq!(frame.column("cd").unwrap().values[2], Scalar::Int(20));
        // Union of columns: depth only exists for the second site.
        assert_eq!(frame.column("depth").unwrap().values[0], Scalar::Null);
        assert_eq!(frame.column("depth").unwrap().values[2], Scalar::Int(5));
    }

    #[test]
    fn test_inject_fields_from_parent() {
        let frame = extract(&doc(), &select(&[("site_name", "$.name")]), &Context::new());
        assert_eq!(
            frame.column("site_name").unwrap().values[0],
            Scalar::Str("s1".into())
        );
        assert_eq!(
            frame.column("site_name").unwrap().values[2],
            Scalar::Str("s2".into())
        );
    }

    #[test]
    fn test_empty_array_yields_empty_frame() {
        let data = json!({"sites": []});
        let frame = extract(&data, &select(&[]), &Context::new());
        assert!(frame.is_empty());
        assert_eq!(frame.width(), 0);
    }

    #[test]
    fn test_missing_array_yields_empty_frame() {
        let data = json!({"other": 1});
        let frame = extract(&data, &select(&[]), &Context::new());
        assert!(frame.is_empty());
    }
}
