//! Row-level population strategies.
//!
//! Applied per frame after extraction and normalization: keep everything,
//! drop rows matching exclusion rules, drop statistical outliers, or sample
//! down to a target size. Sampling is seeded so equal inputs reproduce the
//! same rows.

use serde_json::Value as JsonValue;
use tracing::warn;
use trellis_frame::{Frame, Scalar};
use trellis_protocol::DataType;

/// Apply a named population strategy with its JSON configuration.
pub fn apply_strategy(frame: Frame, strategy: &str, config: &JsonValue) -> Frame {
    if frame.is_empty() {
        return frame;
    }
    match strategy {
        "all" => frame,
        "valid_only" => apply_valid_only(frame, config),
        "outliers_excluded" => apply_outliers_excluded(frame, config),
        "sample" => apply_sample(frame, config),
        other => {
            warn!(strategy = other, "unknown population strategy");
            frame
        }
    }
}

fn apply_valid_only(mut frame: Frame, config: &JsonValue) -> Frame {
    let rules = config
        .get("exclude_rules")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    for rule in rules {
        let Some(column) = rule.get("column").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(col) = frame.column(column) else {
            continue;
        };
        let condition = rule
            .get("condition")
            .and_then(|v| v.as_str())
            .unwrap_or("equals");
        let operand = rule
            .get("value")
            .map(Scalar::from_json)
            .unwrap_or(Scalar::Null);

        // Rows matching the exclusion are dropped.
        let mask: Vec<bool> = col
            .values
            .iter()
            .map(|value| {
                let excluded = match condition {
                    "equals" => value.loose_eq(&operand),
                    "not_equals" => !value.loose_eq(&operand),
                    "is_null" => value.is_null(),
                    "contains" => value.to_string().contains(&operand.to_string()),
                    other => {
                        warn!(condition = other, "unknown exclude condition");
                        false
                    }
                };
                !excluded
            })
            .collect();
        frame = frame.filter(&mask);
    }
    frame
}

fn numeric_columns(frame: &Frame) -> Vec<String> {
    frame
        .columns()
        .iter()
        .filter(|c| matches!(c.dtype, DataType::Integer | DataType::Float))
        .map(|c| c.name.clone())
        .collect()
}

fn apply_outliers_excluded(mut frame: Frame, config: &JsonValue) -> Frame {
    let method = config
        .get("method")
        .and_then(|v| v.as_str())
        .unwrap_or("iqr");
    let threshold = config
        .get("threshold")
        .and_then(|v| v.as_f64())
        .unwrap_or(1.5);
    let apply_to: Vec<String> = config
        .get("apply_to")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .filter(|v: &Vec<String>| !v.is_empty())
        .unwrap_or_else(|| numeric_columns(&frame));

    for column in apply_to {
        if !frame.has_column(&column) {
            continue;
        }
        let bounds = match method {
            "iqr" => {
                let q1 = frame.column_quantile(&column, 0.25);
                let q3 = frame.column_quantile(&column, 0.75);
                match (q1, q3) {
                    (Some(q1), Some(q3)) => {
                        let iqr = q3 - q1;
                        Some((q1 - threshold * iqr, q3 + threshold * iqr))
                    }
                    _ => None,
                }
            }
            "percentile" => {
                let lower = threshold / 100.0;
                match (
                    frame.column_quantile(&column, lower),
                    frame.column_quantile(&column, 1.0 - lower),
                ) {
                    (Some(lo), Some(hi)) => Some((lo, hi)),
                    _ => None,
                }
            }
            "zscore" => None,
            other => {
                warn!(method = other, "unknown outlier method");
                None
            }
        };

        if method == "zscore" {
            let (mean, std) = (frame.column_mean(&column), frame.column_std(&column));
            let (Some(mean), Some(std)) = (mean, std) else {
                continue;
            };
            if std == 0.0 {
                continue;
            }
            let col = frame.column(&column).expect("checked above");
            let mask: Vec<bool> = col
                .values
                .iter()
                .map(|v| match v.as_f64() {
                    Some(x) => ((x - mean) / std).abs() <= threshold,
                    None => true,
                })
                .collect();
            frame = frame.filter(&mask);
        } else if let Some((lo, hi)) = bounds {
            let col = frame.column(&column).expect("checked above");
            let mask: Vec<bool> = col
                .values
                .iter()
                .map(|v| match v.as_f64() {
                    Some(x) => x >= lo && x <= hi,
                    None => true,
                })
                .collect();
            frame = frame.filter(&mask);
        }
    }
    frame
}

fn apply_sample(frame: Frame, config: &JsonValue) -> Frame {
    let method = config
        .get("method")
        .and_then(|v| v.as_str())
        .unwrap_or("random");
    let size = config
        .get("size")
        .and_then(|v| v.as_u64())
        .unwrap_or(1000) as usize;
    let seed = config.get("seed").and_then(|v| v.as_u64()).unwrap_or(42);

    if frame.height() <= size {
        return frame;
    }

    match method {
        "first_n" => frame.head(size),
        "stratified" => {
            match config.get("stratify_by").and_then(|v| v.as_str()) {
                Some(column) if frame.has_column(column) => {
                    stratified_sample(frame, column, size, seed)
                }
                _ => frame.sample_n(size, seed),
            }
        }
        _ => frame.sample_n(size, seed),
    }
}

/// Per-stratum size proportional to its share, then a seeded sample inside
/// each stratum. Strata keep their first-seen order.
fn stratified_sample(frame: Frame, column: &str, size: usize, seed: u64) -> Frame {
    let col = frame.column(column).expect("caller checked");
    let mut order: Vec<String> = Vec::new();
    let mut strata: std::collections::HashMap<String, Vec<usize>> =
        std::collections::HashMap::new();
    for (i, value) in col.values.iter().enumerate() {
        let key = value.key();
        if !strata.contains_key(&key) {
            order.push(key.clone());
        }
        strata.entry(key).or_default().push(i);
    }

    let total = frame.height();
    let mut samples = Vec::new();
    for key in order {
        let indices = &strata[&key];
        let stratum_size = ((indices.len() as f64 / total as f64) * size as f64) as usize;
        let stratum_size = stratum_size.max(1);
        let stratum = frame.take(indices);
        samples.push(if stratum.height() > stratum_size {
            stratum.sample_n(stratum_size, seed)
        } else {
            stratum
        });
    }
    Frame::concat_diagonal(&samples)
}
