//! Output composition.
//!
//! Builds the named `output_id -> Frame` map from an extraction result:
//! concatenates the declared source tables, applies run/image context per
//! the caller's toggles, computes aggregations and join outputs, and
//! renders templated filenames. Context merging happens here and only here.

use crate::executor::ExtractionResult;
use chrono::Local;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use trellis_frame::{AggFunc, Frame, Scalar};
use trellis_profile::{AggregationConfig, JoinOutputConfig, OutputConfig, Profile};

/// Caller-facing toggles for context application.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub include_run_context: bool,
    pub include_image_context: bool,
    /// Whitelists; None means every key.
    pub run_context_keys: Option<Vec<String>>,
    pub image_context_keys: Option<Vec<String>>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            include_run_context: true,
            include_image_context: false,
            run_context_keys: None,
            image_context_keys: None,
        }
    }
}

/// Column that links a frame row to its image context.
const IMAGE_ID_COLUMN: &str = "image_id";

#[derive(Debug, Default)]
pub struct OutputBuilder;

impl OutputBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build every declared output, honoring an optional whitelist.
    pub fn build_outputs(
        &self,
        result: &ExtractionResult,
        profile: &Profile,
        options: &ContextOptions,
        selected_outputs: Option<&[String]>,
    ) -> BTreeMap<String, Frame> {
        let mut outputs = BTreeMap::new();
        let selected = |id: &str| {
            selected_outputs
                .map(|list| list.iter().any(|s| s == id))
                .unwrap_or(true)
        };

        for config in profile
            .outputs
            .defaults
            .iter()
            .chain(profile.outputs.optional_outputs.iter())
        {
            if !selected(&config.id) {
                continue;
            }
            let frame = self.build_output(config, result, options);
            if !frame.is_empty() {
                outputs.insert(config.id.clone(), frame);
            }
        }

        for config in &profile.outputs.aggregations {
            if !selected(&config.id) {
                continue;
            }
            let frame = self.build_aggregation(config, &result.tables);
            if !frame.is_empty() {
                let id = config
                    .output_table
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| config.id.clone());
                outputs.insert(id, frame);
            }
        }

        for config in &profile.outputs.joins {
            if !selected(&config.id) {
                continue;
            }
            let frame = self.build_join(config, &result.tables);
            if !frame.is_empty() {
                outputs.insert(config.id.clone(), frame);
            }
        }

        outputs
    }

    fn build_output(
        &self,
        config: &OutputConfig,
        result: &ExtractionResult,
        options: &ContextOptions,
    ) -> Frame {
        let mut frames = Vec::new();
        for table_id in &config.from_tables {
            match result.tables.get(table_id) {
                Some(frame) => frames.push(frame.clone()),
                None => debug!(table = %table_id, output = %config.id, "table not found"),
            }
        }
        if frames.is_empty() {
            return Frame::empty();
        }
        let mut frame = Frame::concat_diagonal(&frames);

        if config.include_context && options.include_run_context {
            frame = apply_run_context(
                frame,
                &result.run_context,
                options.run_context_keys.as_deref(),
            );
        }
        if config.include_context && options.include_image_context {
            frame = apply_image_context(
                frame,
                &result.image_contexts,
                options.image_context_keys.as_deref(),
            );
        }
        frame
    }

    fn build_aggregation(
        &self,
        config: &AggregationConfig,
        tables: &BTreeMap<String, Frame>,
    ) -> Frame {
        let Some(frame) = tables.get(&config.from_table) else {
            warn!(table = %config.from_table, "table not found for aggregation");
            return Frame::empty();
        };
        self.apply_aggregation(frame, &config.group_by, &config.aggregations)
    }

    /// Group and aggregate; unknown functions and absent columns are
    /// skipped with a warning.
    pub fn apply_aggregation(
        &self,
        frame: &Frame,
        group_by: &[String],
        aggregations: &BTreeMap<String, String>,
    ) -> Frame {
        if frame.is_empty() {
            return frame.clone();
        }
        let valid_group_by: Vec<String> = group_by
            .iter()
            .filter(|c| frame.has_column(c))
            .cloned()
            .collect();
        if valid_group_by.is_empty() {
            warn!("no valid group_by columns found");
            return frame.clone();
        }

        let mut aggs: Vec<(String, AggFunc)> = Vec::new();
        for (column, func_name) in aggregations {
            if !frame.has_column(column) {
                continue;
            }
            match AggFunc::parse(func_name) {
                Some(func) => aggs.push((column.clone(), func)),
                None => warn!(func = %func_name, "unknown aggregation function"),
            }
        }
        if aggs.is_empty() {
            warn!("no valid aggregations found");
            return frame.clone();
        }

        frame
            .group_by_agg(&valid_group_by, &aggs)
            .unwrap_or_else(|e| {
                warn!(error = %e, "aggregation failed");
                frame.clone()
            })
    }

    fn build_join(&self, config: &JoinOutputConfig, tables: &BTreeMap<String, Frame>) -> Frame {
        let Some(left) = tables.get(&config.left_table) else {
            warn!(table = %config.left_table, "left table not found for join");
            return Frame::empty();
        };
        let Some(right) = tables.get(&config.right_table) else {
            warn!(table = %config.right_table, "right table not found for join");
            return left.clone();
        };

        // Join keys absent on either side are dropped.
        let keys: Vec<String> = config
            .on
            .iter()
            .filter(|k| left.has_column(k) && right.has_column(k))
            .cloned()
            .collect();
        if keys.is_empty() {
            warn!("no valid join columns found");
            return left.clone();
        }
        left.join(right, &keys, config.how).unwrap_or_else(|e| {
            warn!(error = %e, "join output failed");
            left.clone()
        })
    }

    /// Render the profile's filename template with context substitutions.
    pub fn output_filename(
        &self,
        profile: &Profile,
        context: &BTreeMap<String, JsonValue>,
        output_id: &str,
    ) -> String {
        let naming = &profile.outputs.file_naming;
        let timestamp = Local::now().format(&naming.timestamp_format).to_string();

        let mut name = naming.template.clone();
        name = name.replace("{profile_id}", profile.profile_id());
        name = name.replace("{profile_title}", profile.title());
        name = name.replace("{timestamp}", &timestamp);
        name = name.replace("{output_id}", output_id);
        for (key, value) in context {
            let rendered = match value {
                JsonValue::String(s) => s.clone(),
                JsonValue::Null => String::new(),
                other => other.to_string(),
            };
            name = name.replace(&format!("{{{}}}", key), &rendered);
        }

        if naming.sanitize {
            sanitize_filename(&name)
        } else {
            name
        }
    }
}

/// Add run-context columns for keys not already present as columns.
pub(crate) fn apply_run_context(
    mut frame: Frame,
    run_context: &BTreeMap<String, JsonValue>,
    keys: Option<&[String]>,
) -> Frame {
    for (key, value) in run_context {
        if let Some(allowed) = keys {
            if !allowed.iter().any(|k| k == key) {
                continue;
            }
        }
        frame = frame.with_scalar_column(key, Scalar::from_json(value));
    }
    frame
}

/// Left-join image context onto frames carrying an `image_id` column.
pub(crate) fn apply_image_context(
    mut frame: Frame,
    image_contexts: &BTreeMap<String, BTreeMap<String, JsonValue>>,
    keys: Option<&[String]>,
) -> Frame {
    if image_contexts.is_empty() || !frame.has_column(IMAGE_ID_COLUMN) {
        return frame;
    }

    // Union of context keys across images, in sorted order.
    let mut context_keys: Vec<String> = Vec::new();
    for ctx in image_contexts.values() {
        for key in ctx.keys() {
            if let Some(allowed) = keys {
                if !allowed.iter().any(|k| k == key) {
                    continue;
                }
            }
            if !context_keys.contains(key) {
                context_keys.push(key.clone());
            }
        }
    }

    let ids: Vec<String> = frame
        .column(IMAGE_ID_COLUMN)
        .map(|c| c.values.iter().map(|v| v.to_string()).collect())
        .unwrap_or_default();

    for key in context_keys {
        if frame.has_column(&key) {
            continue;
        }
        let values: Vec<Scalar> = ids
            .iter()
            .map(|id| {
                image_contexts
                    .get(id)
                    .and_then(|ctx| ctx.get(&key))
                    .map(Scalar::from_json)
                    .unwrap_or(Scalar::Null)
            })
            .collect();
        let _ = frame.add_column(trellis_frame::Column::new(key, values));
    }
    frame
}

/// Replace filesystem-hostile characters, collapse runs of underscores, and
/// trim the ends.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    let mut collapsed = String::with_capacity(replaced.len());
    let mut last_underscore = false;
    for c in replaced.chars() {
        if c == '_' {
            if !last_underscore {
                collapsed.push('_');
            }
            last_underscore = true;
        } else {
            collapsed.push(c);
            last_underscore = false;
        }
    }
    collapsed.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use trellis_frame::Column;
    use trellis_profile::load_profile_from_str;

    fn result_with_tables(tables: Vec<(&str, Frame)>) -> ExtractionResult {
        let mut result = ExtractionResult::default();
        for (id, frame) in tables {
            result.tables.insert(id.to_string(), frame);
        }
        result
    }

    fn simple_frame(name: &str, values: &[i64]) -> Frame {
        Frame::from_columns(vec![Column::new(
            name,
            values.iter().map(|&v| Scalar::Int(v)).collect(),
        )])
        .unwrap()
    }

    fn profile(outputs: &str) -> Profile {
        let yaml = format!(
            r#"meta: {{ profile_id: p, title: My Title }}
levels:
  - name: run
    tables:
      - id: t1
        select: {{ strategy: flat_object, path: "$" }}
      - id: t2
        select: {{ strategy: flat_object, path: "$" }}
{}"#,
            outputs
        );
        load_profile_from_str(&yaml).unwrap()
    }

    #[test]
    fn test_build_output_concats_and_applies_run_context() {
        let profile = profile(
            r#"outputs:
  defaults:
    - id: combined
      from_level: run
      from_tables: [t1, t2]
"#,
        );
        let mut result = result_with_tables(vec![
            ("t1", simple_frame("a", &[1])),
            ("t2", simple_frame("b", &[2])),
        ]);
        result
            .run_context
            .insert("LotID".to_string(), json!("LOT1"));

        let outputs = OutputBuilder::new().build_outputs(
            &result,
            &profile,
            &ContextOptions::default(),
            None,
        );
        let combined = &outputs["combined"];
        assert_eq!(combined.height(), 2);
        assert!(combined.has_column("LotID"));
        assert_eq!(
            combined.column("LotID").unwrap().values[0],
            Scalar::Str("LOT1".into())
        );
    }

    #[test]
    fn test_context_toggle_off() {
        let profile = profile(
            r#"outputs:
  defaults:
    - id: raw
      from_level: run
      from_tables: [t1]
"#,
        );
        let mut result = result_with_tables(vec![("t1", simple_frame("a", &[1]))]);
        result.run_context.insert("LotID".to_string(), json!("L"));
        let options = ContextOptions {
            include_run_context: false,
            ..Default::default()
        };
        let outputs = OutputBuilder::new().build_outputs(&result, &profile, &options, None);
        assert!(!outputs["raw"].has_column("LotID"));
    }

    #[test]
    fn test_run_context_key_whitelist() {
        let profile = profile(
            r#"outputs:
  defaults:
    - id: o
      from_level: run
      from_tables: [t1]
"#,
        );
        let mut result = result_with_tables(vec![("t1", simple_frame("a", &[1]))]);
        result.run_context.insert("LotID".to_string(), json!("L"));
        result
            .run_context
            .insert("Recipe".to_string(), json!("R"));
        let options = ContextOptions {
            run_context_keys: Some(vec!["LotID".to_string()]),
            ..Default::default()
        };
        let outputs = OutputBuilder::new().build_outputs(&result, &profile, &options, None);
        assert!(outputs["o"].has_column("LotID"));
        assert!(!outputs["o"].has_column("Recipe"));
    }

    #[test]
    fn test_image_context_left_join() {
        let frame = Frame::from_columns(vec![
            Column::new(
                "image_id",
                vec![Scalar::Str("IMG1".into()), Scalar::Str("IMG2".into())],
            ),
            Column::new("cd", vec![Scalar::Int(1), Scalar::Int(2)]),
        ])
        .unwrap();
        let mut contexts = BTreeMap::new();
        contexts.insert(
            "IMG1".to_string(),
            [("ImageName".to_string(), json!("a.png"))]
                .into_iter()
                .collect(),
        );
        let out = apply_image_context(frame, &contexts, None);
        assert_eq!(
            out.column("ImageName").unwrap().values[0],
            Scalar::Str("a.png".into())
        );
        assert_eq!(out.column("ImageName").unwrap().values[1], Scalar::Null);
    }

    #[test]
    fn test_aggregation_output_naming() {
        let profile = profile(
            r#"outputs:
  aggregations:
    - id: stats
      from_table: t1
      group_by: [g]
      aggregations:
        v: mean
        w: first
"#,
        );
        let frame = Frame::from_columns(vec![
            Column::new(
                "g",
                vec![Scalar::Str("x".into()), Scalar::Str("x".into())],
            ),
            Column::new("v", vec![Scalar::Int(2), Scalar::Int(4)]),
            Column::new("w", vec![Scalar::Int(7), Scalar::Int(8)]),
        ])
        .unwrap();
        let result = result_with_tables(vec![("t1", frame)]);
        let outputs = OutputBuilder::new().build_outputs(
            &result,
            &profile,
            &ContextOptions::default(),
            None,
        );
        let stats = &outputs["stats"];
        assert!(stats.has_column("v_mean"));
        // first keeps the source column name
        assert!(stats.has_column("w"));
        assert_eq!(stats.column("v_mean").unwrap().values[0], Scalar::Float(3.0));
    }

    #[test]
    fn test_join_output_drops_missing_keys() {
        let profile = profile(
            r#"outputs:
  joins:
    - id: joined
      left_table: t1
      right_table: t2
      on: [k, missing]
      how: inner
"#,
        );
        let left = Frame::from_columns(vec![
            Column::new("k", vec![Scalar::Int(1)]),
            Column::new("a", vec![Scalar::Int(10)]),
        ])
        .unwrap();
        let right = Frame::from_columns(vec![
            Column::new("k", vec![Scalar::Int(1)]),
            Column::new("b", vec![Scalar::Int(20)]),
        ])
        .unwrap();
        let result = result_with_tables(vec![("t1", left), ("t2", right)]);
        let outputs = OutputBuilder::new().build_outputs(
            &result,
            &profile,
            &ContextOptions::default(),
            None,
        );
        assert_eq!(outputs["joined"].height(), 1);
        assert!(outputs["joined"].has_column("b"));
    }

    #[test]
    fn test_selected_outputs_whitelist() {
        let profile = profile(
            r#"outputs:
  defaults:
    - id: keep
      from_level: run
      from_tables: [t1]
    - id: skip
      from_level: run
      from_tables: [t1]
"#,
        );
        let result = result_with_tables(vec![("t1", simple_frame("a", &[1]))]);
        let outputs = OutputBuilder::new().build_outputs(
            &result,
            &profile,
            &ContextOptions::default(),
            Some(&["keep".to_string()]),
        );
        assert!(outputs.contains_key("keep"));
        assert!(!outputs.contains_key("skip"));
    }

    #[test]
    fn test_filename_template_and_sanitize() {
        let profile = profile(
            r#"outputs:
  file_naming:
    template: "{profile_id}_{lot}_{output_id}"
"#,
        );
        let mut context = BTreeMap::new();
        context.insert("lot".to_string(), json!("LOT/1"));
        let name = OutputBuilder::new().output_filename(&profile, &context, "wide");
        assert_eq!(name, "p_LOT_1_wide");
    }

    #[test]
    fn test_sanitize_collapses_and_trims() {
        assert_eq!(sanitize_filename("_a<>b//c_"), "a_b_c");
        assert_eq!(sanitize_filename("x: y"), "x_ y");
    }
}
