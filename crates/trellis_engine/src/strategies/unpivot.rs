//! unpivot: wide-to-long transformation.
//!
//! Navigates to a list or object, coerces it to a frame, then unpivots the
//! `value_vars` columns into `var_name`/`value_name` pairs with `id_vars`
//! carried through. Declared columns that are absent from the data are
//! silently dropped.

use super::{get_at_path, value_to_frame, Context};
use serde_json::Value as JsonValue;
use tracing::warn;
use trellis_frame::Frame;
use trellis_profile::SelectConfig;

pub fn extract(data: &JsonValue, select: &SelectConfig, _context: &Context) -> Frame {
    let Some(value) = get_at_path(data, &select.path) else {
        return Frame::empty();
    };
    let frame = value_to_frame(&value);
    if frame.is_empty() {
        return frame;
    }

    let id_vars: Vec<String> = select
        .id_vars
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|c| frame.has_column(c))
        .collect();
    let value_vars: Vec<String> = select
        .value_vars
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|c| frame.has_column(c))
        .collect();

    if value_vars.is_empty() {
        warn!(path = %select.path, "no value_vars columns found in data");
        return frame;
    }

    match frame.unpivot(&id_vars, &value_vars, &select.var_name, &select.value_name) {
        Ok(long) => long,
        Err(e) => {
            warn!(error = %e, "unpivot failed");
            frame
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_frame::Scalar;

    fn select(path: &str, id_vars: &[&str], value_vars: &[&str]) -> SelectConfig {
        SelectConfig {
            path: path.to_string(),
            strategy: trellis_profile::Strategy::Unpivot,
            id_vars: Some(id_vars.iter().map(|s| s.to_string()).collect()),
            value_vars: Some(value_vars.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_wide_to_long() {
        let data = json!({
            "params": [
                {"site": "s1", "cd": 10, "depth": 5},
                {"site": "s2", "cd": 20, "depth": 6}
            ]
        });
        let frame = extract(
            &data,
            &select("$.params", &["site"], &["cd", "depth"]),
            &Context::new(),
        );
        assert_eq!(frame.height(), 4);
        assert_eq!(frame.column_names(), vec!["site", "variable", "value"]);
        assert_eq!(
            frame.column("variable").unwrap().values[2],
            Scalar::Str("depth".into())
        );
    }

    #[test]
    fn test_missing_value_vars_returns_wide() {
        let data = json!({"params": [{"a": 1}]});
        let frame = extract(&data, &select("$.params", &[], &["nope"]), &Context::new());
        assert_eq!(frame.column_names(), vec!["a"]);
    }

    #[test]
    fn test_dict_coerces_to_single_row() {
        let data = json!({"params": {"site": "s1", "cd": 10}});
        let frame = extract(&data, &select("$.params", &["site"], &["cd"]), &Context::new());
        assert_eq!(frame.height(), 1);
        assert_eq!(
            frame.column("value").unwrap().values[0],
            Scalar::Int(10)
        );
    }

    #[test]
    fn test_custom_names() {
        let data = json!({"p": [{"k": 1}]});
        let mut cfg = select("$.p", &[], &["k"]);
        cfg.var_name = "parameter".to_string();
        cfg.value_name = "reading".to_string();
        let frame = extract(&data, &cfg, &Context::new());
        assert_eq!(frame.column_names(), vec!["parameter", "reading"]);
    }
}
