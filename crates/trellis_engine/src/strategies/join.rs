//! join: relate two JSONPath locations of the same document.
//!
//! Extracts `left.path` and `right.path` as frames and joins on
//! `left.key = right.key`. Differently-named keys rename the right side to
//! the left name before joining. A missing key logs an error and returns
//! the left frame unchanged.

use super::{get_at_path, value_to_frame, Context};
use crate::jsonpath::strip_trailing_wildcard;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::error;
use trellis_frame::Frame;
use trellis_profile::SelectConfig;

pub fn extract(data: &JsonValue, select: &SelectConfig, _context: &Context) -> Frame {
    let (Some(left_cfg), Some(right_cfg)) = (&select.left, &select.right) else {
        error!("join strategy requires 'left' and 'right' config");
        return Frame::empty();
    };

    let Some(left_value) = get_at_path(data, strip_trailing_wildcard(&left_cfg.path)) else {
        return Frame::empty();
    };
    let left = value_to_frame(&left_value);
    if left.is_empty() {
        return Frame::empty();
    }

    let Some(right_value) = get_at_path(data, strip_trailing_wildcard(&right_cfg.path)) else {
        return left;
    };
    let mut right = value_to_frame(&right_value);
    if right.is_empty() {
        return left;
    }

    if !left.has_column(&left_cfg.key) {
        error!(key = %left_cfg.key, "left key not found in left frame");
        return left;
    }
    if !right.has_column(&right_cfg.key) {
        error!(key = %right_cfg.key, "right key not found in right frame");
        return left;
    }

    // Align key names so the join produces a single key column.
    if left_cfg.key != right_cfg.key {
        let mut renames = HashMap::new();
        renames.insert(right_cfg.key.clone(), left_cfg.key.clone());
        right = right.rename(&renames);
    }

    match left.join(&right, &[left_cfg.key.clone()], select.how) {
        Ok(joined) => joined,
        Err(e) => {
            error!(error = %e, "join failed");
            left
        }
    }
}
