//! Structural profile validation.
//!
//! Runs once at load time so extraction never has to re-check invariants:
//! identifiers present, `(level, table.id)` unique, regex patterns compile,
//! outputs reference declared levels, aggregations and joins reference
//! declared tables, strategy-specific fields present.

use crate::model::{FilterNode, Profile, Strategy};
use regex::Regex;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct ProfileValidationResult {
    pub profile_id: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn validate_profile(profile: &Profile) -> ProfileValidationResult {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    if profile.meta.profile_id.is_empty() {
        errors.push("Profile must have a profile_id".to_string());
    }
    if profile.meta.title.is_empty() {
        errors.push("Profile must have a title".to_string());
    }

    if profile.levels.is_empty() {
        warnings.push("Profile has no levels defined".to_string());
    }

    let mut seen_tables: HashSet<(String, String)> = HashSet::new();
    let mut declared_tables: HashSet<&str> = HashSet::new();
    for level in &profile.levels {
        if level.tables.is_empty() {
            warnings.push(format!("Level '{}' has no tables defined", level.name));
        }
        for table in &level.tables {
            if table.id.is_empty() {
                errors.push(format!("Table in level '{}' has no id", level.name));
                continue;
            }
            declared_tables.insert(table.id.as_str());
            if !seen_tables.insert((level.name.clone(), table.id.clone())) {
                errors.push(format!(
                    "Duplicate table id '{}' in level '{}'",
                    table.id, level.name
                ));
            }
            if table.select.path.is_empty() {
                errors.push(format!(
                    "Table '{}' in level '{}' has no select path",
                    table.id, level.name
                ));
            }
            validate_select(table, &mut errors);
        }
    }

    if let Some(defaults) = &profile.context_defaults {
        for pattern in &defaults.regex_patterns {
            if pattern.pattern.is_empty() {
                if pattern.required {
                    errors.push(format!(
                        "Required regex pattern '{}' has no pattern defined",
                        pattern.field
                    ));
                }
                continue;
            }
            if let Err(e) = Regex::new(&pattern.pattern) {
                errors.push(format!(
                    "Invalid regex pattern for '{}': {}",
                    pattern.field, e
                ));
            }
        }
    }

    for ctx in &profile.contexts {
        if ctx.name.is_empty() {
            errors.push("Context configuration has no name".to_string());
        }
        if ctx.level.is_empty() {
            warnings.push(format!("Context '{}' has no level specified", ctx.name));
        }
    }

    if let Some(filters) = &profile.datasource.filters {
        validate_filter_node(filters, &mut errors);
    }

    let level_names: HashSet<&str> = profile.levels.iter().map(|l| l.name.as_str()).collect();
    if profile.outputs.defaults.is_empty() && profile.outputs.optional_outputs.is_empty() {
        warnings.push("Profile has no outputs defined".to_string());
    }
    for output in profile
        .outputs
        .defaults
        .iter()
        .chain(profile.outputs.optional_outputs.iter())
    {
        if output.from_level.is_empty() {
            errors.push(format!("Output '{}' has no from_level specified", output.id));
        } else if !level_names.contains(output.from_level.as_str()) {
            errors.push(format!(
                "Output '{}' references unknown level '{}'",
                output.id, output.from_level
            ));
        }
    }

    for agg in &profile.outputs.aggregations {
        if !declared_tables.contains(agg.from_table.as_str()) {
            errors.push(format!(
                "Aggregation '{}' references unknown table '{}'",
                agg.id, agg.from_table
            ));
        }
    }
    for join in &profile.outputs.joins {
        for table in [&join.left_table, &join.right_table] {
            if !declared_tables.contains(table.as_str()) {
                errors.push(format!(
                    "Join output '{}' references unknown table '{}'",
                    join.id, table
                ));
            }
        }
    }

    ProfileValidationResult {
        profile_id: profile.meta.profile_id.clone(),
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Strategy-specific field requirements, enforced at load (not extract) time.
fn validate_select(table: &crate::model::TableConfig, errors: &mut Vec<String>) {
    let select = &table.select;
    match select.strategy {
        Strategy::HeadersData => {
            if select.headers_key.is_none()
                && !select.infer_headers
                && select.default_headers.is_none()
            {
                errors.push(format!(
                    "Table '{}': headers_data strategy requires 'headers_key', \
                     'infer_headers', or 'default_headers'",
                    table.id
                ));
            }
            if select.data_key.is_none() {
                errors.push(format!(
                    "Table '{}': headers_data strategy requires 'data_key'",
                    table.id
                ));
            }
        }
        Strategy::Unpivot => {
            if select
                .value_vars
                .as_ref()
                .map(|v| v.is_empty())
                .unwrap_or(true)
            {
                errors.push(format!(
                    "Table '{}': unpivot strategy requires 'value_vars'",
                    table.id
                ));
            }
        }
        Strategy::Join => {
            match &select.left {
                Some(side) if !side.path.is_empty() && !side.key.is_empty() => {}
                _ => errors.push(format!(
                    "Table '{}': join strategy requires 'left.path' and 'left.key'",
                    table.id
                )),
            }
            match &select.right {
                Some(side) if !side.path.is_empty() && !side.key.is_empty() => {}
                _ => errors.push(format!(
                    "Table '{}': join strategy requires 'right.path' and 'right.key'",
                    table.id
                )),
            }
        }
        Strategy::FlatObject | Strategy::ArrayOfObjects => {}
    }

    if let Some(repeat) = &select.repeat_over {
        if repeat.path.is_empty() {
            errors.push(format!("Table '{}': repeat_over.path is required", table.id));
        }
        if repeat.as_var.is_empty() {
            errors.push(format!("Table '{}': repeat_over.as is required", table.id));
        } else if !is_identifier(&repeat.as_var) {
            errors.push(format!(
                "Table '{}': repeat_over.as must be an identifier, got '{}'",
                table.id, repeat.as_var
            ));
        }
    }
}

/// `repeat_over` substitution variables must be identifier-shaped so `{var}`
/// never collides with literal braces inside a path segment.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_filter_node(node: &FilterNode, errors: &mut Vec<String>) {
    const OPS: &[&str] = &[
        "equals",
        "not_equals",
        "contains",
        "startswith",
        "endswith",
        "matches",
        "gt",
        "gte",
        "lt",
        "lte",
        "in",
        "not_in",
    ];
    match node {
        FilterNode::Group { children, .. } => {
            for child in children {
                validate_filter_node(child, errors);
            }
        }
        FilterNode::Predicate(p) => {
            if !OPS.contains(&p.op.as_str()) {
                errors.push(format!("Unknown file filter operator: {}", p.op));
            }
            if p.op == "matches" {
                if let Some(pattern) = p.value.as_str() {
                    if let Err(e) = Regex::new(pattern) {
                        errors.push(format!("Invalid file filter regex '{}': {}", pattern, e));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_profile_from_str;

    fn base_yaml(extra: &str) -> String {
        format!(
            r#"
meta: {{ profile_id: p, title: T }}
levels:
  - name: run
    tables:
      - id: t1
        select: {{ strategy: flat_object, path: "$" }}
{}"#,
            extra
        )
    }

    #[test]
    fn test_duplicate_table_ids_rejected() {
        let yaml = r#"
meta: { profile_id: p, title: T }
levels:
  - name: run
    tables:
      - id: t1
        select: { strategy: flat_object, path: "$" }
      - id: t1
        select: { strategy: flat_object, path: "$" }
"#;
        let err = load_profile_from_str(yaml).unwrap_err();
        assert!(format!("{:?}", err).contains("Duplicate table id"));
    }

    #[test]
    fn test_dangling_output_level_rejected() {
        let yaml = base_yaml(
            r#"outputs:
  defaults:
    - id: o1
      from_level: missing
      from_tables: [t1]
"#,
        );
        let err = load_profile_from_str(&yaml).unwrap_err();
        assert!(format!("{:?}", err).contains("unknown level"));
    }

    #[test]
    fn test_dangling_aggregation_table_rejected() {
        let yaml = base_yaml(
            r#"outputs:
  aggregations:
    - id: a1
      from_table: nope
      group_by: [g]
"#,
        );
        let err = load_profile_from_str(&yaml).unwrap_err();
        assert!(format!("{:?}", err).contains("unknown table"));
    }

    #[test]
    fn test_headers_data_requires_keys() {
        let yaml = r#"
meta: { profile_id: p, title: T }
levels:
  - name: run
    tables:
      - id: t1
        select: { strategy: headers_data, path: "$.stats" }
"#;
        let err = load_profile_from_str(yaml).unwrap_err();
        let rendered = format!("{:?}", err);
        assert!(rendered.contains("headers_key"));
        assert!(rendered.contains("data_key"));
    }

    #[test]
    fn test_repeat_over_var_must_be_identifier() {
        let yaml = r#"
meta: { profile_id: p, title: T }
levels:
  - name: run
    tables:
      - id: t1
        select:
          strategy: flat_object
          path: "$.x[{bad var}]"
          repeat_over: { path: "$.x", as: "bad var" }
"#;
        let err = load_profile_from_str(yaml).unwrap_err();
        assert!(format!("{:?}", err).contains("identifier"));
    }

    #[test]
    fn test_warnings_do_not_invalidate() {
        let yaml = "meta: { profile_id: p, title: T }\n";
        let profile = load_profile_from_str(yaml).unwrap();
        let report = validate_profile(&profile);
        assert!(report.valid);
        assert!(!report.warnings.is_empty());
    }
}
