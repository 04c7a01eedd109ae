//! Extraction strategies.
//!
//! Six built-in strategies turn nested source data into flat frames. The
//! set is closed and dispatch is a match over the profile's strategy tag;
//! `repeat_over` is the one composite, wrapping a base strategy and running
//! it once per array element. Strategy failures never propagate: a missing
//! path or a type mismatch logs a warning and yields an empty frame.

pub mod array_of_objects;
pub mod flat_object;
pub mod headers_data;
pub mod join;
pub mod repeat_over;
pub mod unpivot;

use crate::jsonpath;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::warn;
use trellis_frame::Frame;
use trellis_profile::{SelectConfig, Strategy};

/// Shared context type passed to every strategy.
pub type Context = BTreeMap<String, JsonValue>;

/// Extract one table from parsed source data.
pub fn extract_table(data: &JsonValue, select: &SelectConfig, context: &Context) -> Frame {
    if select.repeat_over.is_some() {
        return repeat_over::extract(data, select, context);
    }
    dispatch(select.strategy, data, select, context)
}

/// Run one concrete (non-composite) strategy.
pub(crate) fn dispatch(
    strategy: Strategy,
    data: &JsonValue,
    select: &SelectConfig,
    context: &Context,
) -> Frame {
    // An explicit headers/data pair wins regardless of the declared tag;
    // iteration configs historically relied on this.
    if select.headers_key.is_some() && select.data_key.is_some() {
        return headers_data::extract(data, select, context);
    }
    match strategy {
        Strategy::FlatObject => flat_object::extract(data, select, context),
        Strategy::HeadersData => headers_data::extract(data, select, context),
        Strategy::ArrayOfObjects => array_of_objects::extract(data, select, context),
        Strategy::Unpivot => unpivot::extract(data, select, context),
        Strategy::Join => join::extract(data, select, context),
    }
}

/// Navigate to a path, logging on miss.
pub(crate) fn get_at_path(data: &JsonValue, path: &str) -> Option<JsonValue> {
    let result = jsonpath::evaluate(data, path);
    if result.is_none() {
        warn!(path, "no data found at path");
    }
    result
}

/// Coerce a navigated value into a frame: arrays of objects become rows, a
/// single object becomes one row, anything else is empty.
pub(crate) fn value_to_frame(value: &JsonValue) -> Frame {
    match value {
        JsonValue::Array(items) => {
            let objects: Vec<&serde_json::Map<String, JsonValue>> =
                items.iter().filter_map(|v| v.as_object()).collect();
            if objects.len() < items.len() {
                warn!(
                    dropped = items.len() - objects.len(),
                    "non-object array elements dropped"
                );
            }
            Frame::from_json_objects(&objects)
        }
        JsonValue::Object(obj) => Frame::from_single_object(obj),
        other => {
            warn!(kind = %json_kind(other), "expected list or object");
            Frame::empty()
        }
    }
}

pub(crate) fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
