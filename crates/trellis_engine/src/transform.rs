//! Normalization and column transformations.
//!
//! Ordered, individually optional steps: NaN substitution, numeric
//! coercion, row filters, unit normalization, type coercion, renames, PII
//! masking, calculated columns, and per-table column transforms. Every
//! per-column step catches its own failure and logs it; the pipeline as a
//! whole never raises.

use crate::expr;
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, warn};
use trellis_frame::{Column, Frame, Scalar};
use trellis_profile::{
    CalculatedColumn, ColumnTransform, Profile, RowFilter, TypeCoercion, UnitMapping,
};

/// Fraction of sampled values allowed to fail a numeric cast before the
/// cast is abandoned.
const COERCION_NULL_BUDGET: f64 = 0.5;

const COERCION_SAMPLE: usize = 10;

pub struct TransformPipeline {
    unit_mappings: BTreeMap<String, UnitMapping>,
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_unit_mappings() -> BTreeMap<String, UnitMapping> {
    let mut map = BTreeMap::new();
    let mut add = |unit: &str, factor: f64| {
        map.insert(
            unit.to_string(),
            UnitMapping {
                canonical: "nm".to_string(),
                factor,
            },
        );
    };
    add("nm", 1.0);
    add("um", 1000.0);
    add("μm", 1000.0);
    add("mm", 1_000_000.0);
    add("m", 1_000_000_000.0);
    add("angstrom", 0.1);
    add("Å", 0.1);
    map
}

impl TransformPipeline {
    /// Build a pipeline; profile unit mappings merge over the built-in
    /// length table.
    pub fn new(unit_mappings: Option<&BTreeMap<String, UnitMapping>>) -> Self {
        let mut mappings = default_unit_mappings();
        if let Some(extra) = unit_mappings {
            for (unit, mapping) in extra {
                mappings.insert(unit.clone(), mapping.clone());
            }
        }
        Self {
            unit_mappings: mappings,
        }
    }

    pub fn for_profile(profile: &Profile) -> Self {
        Self::new(Some(&profile.normalization.unit_mappings))
    }

    /// Profile-level normalization in declaration order.
    pub fn apply_normalization(&self, mut frame: Frame, profile: &Profile) -> Frame {
        if frame.is_empty() {
            return frame;
        }
        let norm = &profile.normalization;
        if !norm.nan_values.is_empty() {
            frame = self.replace_nan_values(frame, &norm.nan_values);
        }
        if norm.numeric_coercion {
            frame = self.coerce_numeric(frame);
        }
        if !profile.row_filters.is_empty() {
            frame = self.apply_row_filters(frame, &profile.row_filters);
        }
        if norm.units_policy == "normalize" {
            frame = self.normalize_units(frame, &norm.column_units);
        }
        // "strip" passes values through untouched; units are dropped
        // semantically, not numerically.
        frame
    }

    /// Replace exact string matches of any `nan_values` entry with null.
    fn replace_nan_values(&self, mut frame: Frame, nan_values: &[String]) -> Frame {
        let names: Vec<String> = frame.column_names().iter().map(|s| s.to_string()).collect();
        for name in names {
            let is_string = frame
                .column(&name)
                .map(|c| c.dtype == trellis_protocol::DataType::String)
                .unwrap_or(false);
            if !is_string {
                continue;
            }
            let _ = frame.map_column(&name, |v| match v {
                Scalar::Str(s) if nan_values.iter().any(|n| n == s) => Scalar::Null,
                other => other.clone(),
            });
        }
        frame
    }

    /// Attempt to cast string columns to float; keep the cast only when the
    /// sampled null-introduction rate stays under the budget.
    fn coerce_numeric(&self, mut frame: Frame) -> Frame {
        let names: Vec<String> = frame.column_names().iter().map(|s| s.to_string()).collect();
        for name in names {
            let Some(column) = frame.column(&name) else {
                continue;
            };
            if column.dtype != trellis_protocol::DataType::String {
                continue;
            }
            let sample: Vec<&str> = column
                .values
                .iter()
                .filter_map(|v| v.as_str())
                .take(COERCION_SAMPLE)
                .collect();
            if sample.is_empty() {
                continue;
            }
            let failures = sample
                .iter()
                .filter(|s| s.trim().parse::<f64>().is_err())
                .count();
            if (failures as f64) < sample.len() as f64 * COERCION_NULL_BUDGET {
                let _ = frame.map_column(&name, |v| match v {
                    Scalar::Str(s) => s
                        .trim()
                        .parse::<f64>()
                        .map(Scalar::Float)
                        .unwrap_or(Scalar::Null),
                    other => other.clone(),
                });
                debug!(column = %name, "coerced string column to float");
            }
        }
        frame
    }

    /// Sequentially apply declared row filters; idempotent by construction.
    pub fn apply_row_filters(&self, mut frame: Frame, filters: &[RowFilter]) -> Frame {
        for filter in filters {
            if frame.is_empty() {
                return frame;
            }
            let Some(column) = frame.column(&filter.column) else {
                continue;
            };
            let mask: Vec<bool> = column
                .values
                .iter()
                .map(|value| row_filter_keeps(value, filter))
                .collect();
            frame = frame.filter(&mask);
        }
        frame
    }

    /// Convert each known-unit column to its canonical unit.
    fn normalize_units(&self, mut frame: Frame, column_units: &BTreeMap<String, String>) -> Frame {
        for (column, unit) in column_units {
            if !frame.has_column(column) {
                warn!(column = %column, "column not found for unit normalization");
                continue;
            }
            let Some(source) = self.unit_mappings.get(unit) else {
                warn!(unit = %unit, "unknown source unit");
                continue;
            };
            let Some(target) = self.unit_mappings.get(&source.canonical) else {
                warn!(unit = %source.canonical, "unknown target unit");
                continue;
            };
            let factor = source.factor / target.factor;
            let _ = frame.map_column(column, |v| match v.as_f64() {
                Some(value) => Scalar::Float(value * factor),
                None => v.clone(),
            });
        }
        frame
    }

    /// Explicit per-column type coercions.
    pub fn apply_type_coercion(&self, mut frame: Frame, coercions: &[TypeCoercion]) -> Frame {
        for coercion in coercions {
            if !frame.has_column(&coercion.column) {
                continue;
            }
            let result = match coercion.to_type.as_str() {
                "datetime" => {
                    let format = coercion.format.as_deref().unwrap_or("%Y-%m-%d %H:%M:%S");
                    frame.map_column(&coercion.column, |v| match v {
                        Scalar::Str(s) => NaiveDateTime::parse_from_str(s, format)
                            .map(Scalar::Datetime)
                            .unwrap_or(Scalar::Null),
                        other => other.clone(),
                    })
                }
                "date" => {
                    let format = coercion.format.as_deref().unwrap_or("%Y-%m-%d");
                    frame.map_column(&coercion.column, |v| match v {
                        Scalar::Str(s) => NaiveDate::parse_from_str(s, format)
                            .map(Scalar::Date)
                            .unwrap_or(Scalar::Null),
                        other => other.clone(),
                    })
                }
                "string" => {
                    let strip = coercion.strip;
                    let upper = coercion.uppercase;
                    let lower = coercion.lowercase;
                    frame.map_column(&coercion.column, move |v| {
                        if v.is_null() {
                            return Scalar::Null;
                        }
                        let mut s = v.to_string();
                        if strip {
                            s = s.trim().to_string();
                        }
                        if upper {
                            s = s.to_uppercase();
                        }
                        if lower {
                            s = s.to_lowercase();
                        }
                        Scalar::Str(s)
                    })
                }
                "float" => frame.map_column(&coercion.column, |v| match v {
                    Scalar::Str(s) => s
                        .trim()
                        .parse::<f64>()
                        .map(Scalar::Float)
                        .unwrap_or(Scalar::Null),
                    other => other.as_f64().map(Scalar::Float).unwrap_or(Scalar::Null),
                }),
                "int" => frame.map_column(&coercion.column, |v| match v {
                    Scalar::Int(i) => Scalar::Int(*i),
                    Scalar::Float(f) => Scalar::Int(*f as i64),
                    Scalar::Str(s) => s
                        .trim()
                        .parse::<i64>()
                        .map(Scalar::Int)
                        .unwrap_or(Scalar::Null),
                    Scalar::Bool(b) => Scalar::Int(*b as i64),
                    _ => Scalar::Null,
                }),
                "bool" => frame.map_column(&coercion.column, |v| match v {
                    Scalar::Bool(b) => Scalar::Bool(*b),
                    Scalar::Int(i) => Scalar::Bool(*i != 0),
                    Scalar::Str(s) => match s.to_lowercase().as_str() {
                        "true" | "1" | "yes" => Scalar::Bool(true),
                        "false" | "0" | "no" => Scalar::Bool(false),
                        _ => Scalar::Null,
                    },
                    _ => Scalar::Null,
                }),
                other => {
                    warn!(to_type = other, "unknown type coercion target");
                    Ok(())
                }
            };
            if let Err(e) = result {
                error!(column = %coercion.column, error = %e, "type coercion failed");
            }
        }
        frame
    }

    /// Rename columns that are actually present.
    pub fn apply_column_renames(
        &self,
        frame: Frame,
        renames: &BTreeMap<String, String>,
    ) -> Frame {
        if renames.is_empty() {
            return frame;
        }
        let map: HashMap<String, String> = renames
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        frame.rename(&map)
    }

    /// Mask PII columns character-for-character (or with a fixed-length
    /// mask). Newlines count as characters too; masked values keep them.
    pub fn apply_pii_masking(
        &self,
        mut frame: Frame,
        columns: &[String],
        mask_char: char,
        preserve_length: bool,
    ) -> Frame {
        for column in columns {
            if !frame.has_column(column) {
                continue;
            }
            let result = frame.map_column(column, |v| {
                if v.is_null() {
                    return Scalar::Null;
                }
                let text = v.to_string();
                let masked = if preserve_length {
                    std::iter::repeat(mask_char).take(text.chars().count()).collect()
                } else {
                    std::iter::repeat(mask_char).take(8).collect::<String>()
                };
                Scalar::Str(masked)
            });
            match result {
                Ok(()) => debug!(column = %column, "masked PII column"),
                Err(e) => error!(column = %column, error = %e, "PII masking failed"),
            }
        }
        frame
    }

    /// Evaluate calculated-column expressions; failures leave the frame
    /// unchanged for that column.
    pub fn apply_calculated_columns(
        &self,
        mut frame: Frame,
        calculations: &[CalculatedColumn],
    ) -> Frame {
        for calc in calculations {
            match expr::evaluate_arithmetic(&frame, &calc.expression) {
                Ok(mut values) => {
                    if let Some(round_to) = calc.round_to {
                        let scale = 10f64.powi(round_to as i32);
                        values = values
                            .into_iter()
                            .map(|v| match v {
                                Scalar::Float(f) => Scalar::Float((f * scale).round() / scale),
                                other => other,
                            })
                            .collect();
                    }
                    if frame.has_column(&calc.name) {
                        let name = calc.name.clone();
                        let mut idx = 0usize;
                        let _ = frame.map_column(&name, |_| {
                            let v = values[idx].clone();
                            idx += 1;
                            v
                        });
                    } else {
                        let _ = frame.add_column(Column::new(calc.name.clone(), values));
                    }
                }
                Err(e) => {
                    error!(column = %calc.name, error = %e, "calculated column failed");
                }
            }
        }
        frame
    }

    /// Per-table named transforms, applied before profile normalization.
    pub fn apply_column_transforms(
        &self,
        mut frame: Frame,
        transforms: &[ColumnTransform],
    ) -> Frame {
        for transform in transforms {
            if !frame.has_column(&transform.source) {
                warn!(column = %transform.source, "transform source column not found");
                continue;
            }
            frame = self.apply_single_transform(frame, transform);
        }
        frame
    }

    fn apply_single_transform(&self, mut frame: Frame, transform: &ColumnTransform) -> Frame {
        let source = transform.source.clone();
        let target = transform.target_column().to_string();
        let arg_f64 = |key: &str| {
            transform
                .args
                .get(key)
                .and_then(JsonValue::as_f64)
        };

        let mapped: Option<Box<dyn Fn(&Scalar) -> Scalar>> = match transform.transform.as_str() {
            "rename" => {
                let mut renames = HashMap::new();
                renames.insert(source, target);
                return frame.rename(&renames);
            }
            "unit_convert" => {
                let factor = arg_f64("factor").unwrap_or(1.0);
                Some(Box::new(move |v: &Scalar| match v.as_f64() {
                    Some(value) => Scalar::Float(value * factor),
                    None => v.clone(),
                }))
            }
            "uppercase" => Some(Box::new(|v: &Scalar| match v {
                Scalar::Str(s) => Scalar::Str(s.to_uppercase()),
                other => other.clone(),
            })),
            "lowercase" => Some(Box::new(|v: &Scalar| match v {
                Scalar::Str(s) => Scalar::Str(s.to_lowercase()),
                other => other.clone(),
            })),
            "strip" => Some(Box::new(|v: &Scalar| match v {
                Scalar::Str(s) => Scalar::Str(s.trim().to_string()),
                other => other.clone(),
            })),
            "round" => {
                let decimals = arg_f64("decimals").unwrap_or(2.0) as i32;
                let scale = 10f64.powi(decimals);
                Some(Box::new(move |v: &Scalar| match v {
                    Scalar::Float(f) => Scalar::Float((f * scale).round() / scale),
                    other => other.clone(),
                }))
            }
            other => {
                warn!(transform = other, "unknown transform type");
                None
            }
        };

        if let Some(map) = mapped {
            if target == transform.source {
                let _ = frame.map_column(&transform.source, |v| map(v));
            } else {
                // Distinct target: derive a new column from the source.
                let values: Vec<Scalar> = frame
                    .column(&transform.source)
                    .map(|c| c.values.iter().map(|v| map(v)).collect())
                    .unwrap_or_default();
                if frame.has_column(&target) {
                    let mut idx = 0usize;
                    let _ = frame.map_column(&target, |_| {
                        let v = values[idx].clone();
                        idx += 1;
                        v
                    });
                } else {
                    let _ = frame.add_column(Column::new(target, values));
                }
            }
        }
        frame
    }
}

fn row_filter_keeps(value: &Scalar, filter: &RowFilter) -> bool {
    let operand = Scalar::from_json(&filter.value);
    match filter.op.as_str() {
        "equals" => value.loose_eq(&operand),
        "not_equals" => !value.loose_eq(&operand),
        "gt" => matches!(value.compare(&operand), Some(std::cmp::Ordering::Greater)),
        "gte" => matches!(
            value.compare(&operand),
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        ),
        "lt" => matches!(value.compare(&operand), Some(std::cmp::Ordering::Less)),
        "lte" => matches!(
            value.compare(&operand),
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        ),
        "between" => {
            let min = filter.min.as_ref().map(Scalar::from_json);
            let max = filter.max.as_ref().map(Scalar::from_json);
            match (min, max) {
                (Some(min), Some(max)) => {
                    matches!(
                        value.compare(&min),
                        Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                    ) && matches!(
                        value.compare(&max),
                        Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                    )
                }
                _ => true,
            }
        }
        "in" => filter
            .values
            .iter()
            .any(|v| value.loose_eq(&Scalar::from_json(v))),
        "not_in" => !filter
            .values
            .iter()
            .any(|v| value.loose_eq(&Scalar::from_json(v))),
        "is_null" => value.is_null(),
        "is_not_null" => !value.is_null(),
        "contains" => value.to_string().contains(&operand.to_string()),
        "startswith" => value.to_string().starts_with(&operand.to_string()),
        "endswith" => value.to_string().ends_with(&operand.to_string()),
        other => {
            warn!(op = other, "unknown row filter op");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_profile::load_profile_from_str;

    fn str_column(name: &str, values: &[&str]) -> Column {
        Column::new(
            name,
            values.iter().map(|v| Scalar::Str(v.to_string())).collect(),
        )
    }

    fn profile(norm: &str) -> Profile {
        let yaml = format!(
            "meta: {{ profile_id: p, title: T }}\n\
             levels:\n  - name: run\n    tables:\n      - id: t\n        select: {{ strategy: flat_object, path: \"$\" }}\n\
             {}",
            norm
        );
        load_profile_from_str(&yaml).unwrap()
    }

    #[test]
    fn test_nan_replacement_then_coercion() {
        let frame = Frame::from_columns(vec![str_column("v", &["1.5", "NA", "2.5"])]).unwrap();
        let profile = profile("normalization:\n  nan_values: [\"NA\"]\n");
        let pipeline = TransformPipeline::for_profile(&profile);
        let out = pipeline.apply_normalization(frame, &profile);
        let col = out.column("v").unwrap();
        assert_eq!(col.values[0], Scalar::Float(1.5));
        assert_eq!(col.values[1], Scalar::Null);
        assert_eq!(col.values[2], Scalar::Float(2.5));
    }

    #[test]
    fn test_coercion_respects_null_budget() {
        // More than half the sample is non-numeric: column stays string.
        let frame =
            Frame::from_columns(vec![str_column("v", &["a", "b", "c", "1", "2"])]).unwrap();
        let profile = profile("");
        let pipeline = TransformPipeline::for_profile(&profile);
        let out = pipeline.apply_normalization(frame, &profile);
        assert_eq!(
            out.column("v").unwrap().values[0],
            Scalar::Str("a".into())
        );
    }

    #[test]
    fn test_row_filters_idempotent() {
        let frame = Frame::from_columns(vec![Column::new(
            "n",
            vec![Scalar::Int(1), Scalar::Int(5), Scalar::Int(10)],
        )])
        .unwrap();
        let filters = vec![RowFilter {
            column: "n".to_string(),
            op: "gte".to_string(),
            value: json!(5),
            min: None,
            max: None,
            values: Vec::new(),
        }];
        let pipeline = TransformPipeline::default();
        let once = pipeline.apply_row_filters(frame, &filters);
        assert_eq!(once.height(), 2);
        let twice = pipeline.apply_row_filters(once.clone(), &filters);
        assert_eq!(twice.height(), once.height());
    }

    #[test]
    fn test_between_and_in_filters() {
        let frame = Frame::from_columns(vec![Column::new(
            "n",
            vec![Scalar::Int(1), Scalar::Int(5), Scalar::Int(10)],
        )])
        .unwrap();
        let pipeline = TransformPipeline::default();
        let between = vec![RowFilter {
            column: "n".to_string(),
            op: "between".to_string(),
            value: JsonValue::Null,
            min: Some(json!(2)),
            max: Some(json!(9)),
            values: Vec::new(),
        }];
        assert_eq!(pipeline.apply_row_filters(frame.clone(), &between).height(), 1);

        let within = vec![RowFilter {
            column: "n".to_string(),
            op: "in".to_string(),
            value: JsonValue::Null,
            min: None,
            max: None,
            values: vec![json!(1), json!(10)],
        }];
        assert_eq!(pipeline.apply_row_filters(frame, &within).height(), 2);
    }

    #[test]
    fn test_unit_normalization_to_nm() {
        let frame = Frame::from_columns(vec![Column::new(
            "cd",
            vec![Scalar::Float(1.5), Scalar::Float(2.0)],
        )])
        .unwrap();
        let profile = profile(
            "normalization:\n  units_policy: normalize\n  column_units: { cd: um }\n",
        );
        let pipeline = TransformPipeline::for_profile(&profile);
        let out = pipeline.apply_normalization(frame, &profile);
        assert_eq!(out.column("cd").unwrap().values[0], Scalar::Float(1500.0));
    }

    #[test]
    fn test_type_coercion_datetime() {
        let frame =
            Frame::from_columns(vec![str_column("ts", &["2024-01-02 03:04:05", "junk"])]).unwrap();
        let coercions = vec![TypeCoercion {
            column: "ts".to_string(),
            to_type: "datetime".to_string(),
            format: None,
            strip: false,
            uppercase: false,
            lowercase: false,
        }];
        let out = TransformPipeline::default().apply_type_coercion(frame, &coercions);
        assert!(matches!(
            out.column("ts").unwrap().values[0],
            Scalar::Datetime(_)
        ));
        assert_eq!(out.column("ts").unwrap().values[1], Scalar::Null);
    }

    #[test]
    fn test_pii_masking_preserves_length_and_newlines() {
        let frame =
            Frame::from_columns(vec![str_column("operator", &["jane\ndoe", "bo"])]).unwrap();
        let out = TransformPipeline::default().apply_pii_masking(
            frame,
            &["operator".to_string()],
            '*',
            true,
        );
        assert_eq!(
            out.column("operator").unwrap().values[0],
            Scalar::Str("********".into())
        );
        assert_eq!(
            out.column("operator").unwrap().values[1],
            Scalar::Str("**".into())
        );
    }

    #[test]
    fn test_pii_fixed_mask() {
        let frame = Frame::from_columns(vec![str_column("who", &["someone long"])]).unwrap();
        let out = TransformPipeline::default().apply_pii_masking(
            frame,
            &["who".to_string()],
            '#',
            false,
        );
        assert_eq!(
            out.column("who").unwrap().values[0],
            Scalar::Str("########".into())
        );
    }

    #[test]
    fn test_calculated_column_with_rounding() {
        let frame = Frame::from_columns(vec![
            Column::new("a", vec![Scalar::Float(1.0), Scalar::Float(2.0)]),
            Column::new("b", vec![Scalar::Float(3.0), Scalar::Float(7.0)]),
        ])
        .unwrap();
        let calcs = vec![CalculatedColumn {
            name: "ratio".to_string(),
            expression: "a / b".to_string(),
            round_to: Some(2),
        }];
        let out = TransformPipeline::default().apply_calculated_columns(frame, &calcs);
        assert_eq!(out.column("ratio").unwrap().values[0], Scalar::Float(0.33));
    }

    #[test]
    fn test_column_transforms() {
        let frame = Frame::from_columns(vec![
            str_column("name", &["  abc  "]),
            Column::new("cd_um", vec![Scalar::Float(2.0)]),
        ])
        .unwrap();
        let transforms = vec![
            ColumnTransform {
                source: "name".to_string(),
                target: None,
                transform: "strip".to_string(),
                args: BTreeMap::new(),
            },
            ColumnTransform {
                source: "cd_um".to_string(),
                target: Some("cd_nm".to_string()),
                transform: "unit_convert".to_string(),
                args: [("factor".to_string(), json!(1000))].into_iter().collect(),
            },
        ];
        let out = TransformPipeline::default().apply_column_transforms(frame, &transforms);
        assert_eq!(
            out.column("name").unwrap().values[0],
            Scalar::Str("abc".into())
        );
        assert_eq!(out.column("cd_nm").unwrap().values[0], Scalar::Float(2000.0));
        // Source column survives a derived-target transform
        assert!(out.has_column("cd_um"));
    }

    #[test]
    fn test_renames_only_present_columns() {
        let frame = Frame::from_columns(vec![str_column("old", &["x"])]).unwrap();
        let mut renames = BTreeMap::new();
        renames.insert("old".to_string(), "new".to_string());
        renames.insert("ghost".to_string(), "nope".to_string());
        let out = TransformPipeline::default().apply_column_renames(frame, &renames);
        assert!(out.has_column("new"));
        assert!(!out.has_column("nope"));
    }
}
