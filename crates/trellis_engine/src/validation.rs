//! Extraction validation.
//!
//! Checks extracted frames against the profile's expectations: per-table
//! stable columns and value constraints, then profile-level schema, row,
//! and aggregate rules. Findings carry the table id and a machine code;
//! validation reports everything and never raises.

use crate::expr;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::{error, warn};
use trellis_frame::Frame;
use trellis_profile::{
    AggregateRule, AggregateRuleType, ConstraintType, OnFail, Profile, SchemaRules,
    StableColumnsMode, TableConfig, ValueConstraint,
};

/// One validation finding with a machine-readable code.
#[derive(Debug, Clone)]
pub struct Finding {
    pub table_id: String,
    pub code: String,
    pub message: String,
}

impl Finding {
    fn new(table_id: &str, code: &str, message: String) -> Self {
        Self {
            table_id: table_id.to_string(),
            code: code.to_string(),
            message,
        }
    }
}

/// Per-table validation outcome.
#[derive(Debug, Clone)]
pub struct TableValidation {
    pub table_id: String,
    pub valid: bool,
    pub errors: Vec<Finding>,
    pub warnings: Vec<Finding>,
    pub missing_columns: Vec<String>,
    pub extra_columns: Vec<String>,
}

/// Whole-extraction validation outcome.
#[derive(Debug, Clone, Default)]
pub struct ValidationSummary {
    pub profile_id: String,
    pub valid: bool,
    pub total_tables: usize,
    pub valid_tables: usize,
    pub table_results: Vec<TableValidation>,
    pub profile_errors: Vec<Finding>,
    pub profile_warnings: Vec<Finding>,
}

impl ValidationSummary {
    pub fn error_count(&self) -> usize {
        self.table_results.iter().map(|r| r.errors.len()).sum::<usize>()
            + self.profile_errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.table_results
            .iter()
            .map(|r| r.warnings.len())
            .sum::<usize>()
            + self.profile_warnings.len()
    }
}

#[derive(Debug, Default)]
pub struct ValidationEngine;

impl ValidationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Validate one table against its declaration.
    pub fn validate_table(&self, frame: &Frame, table: &TableConfig) -> TableValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut missing = Vec::new();
        let mut extra = Vec::new();

        if !table.stable_columns.is_empty() {
            let actual: Vec<&str> = frame.column_names();
            missing = table
                .stable_columns
                .iter()
                .filter(|c| !actual.contains(&c.as_str()))
                .cloned()
                .collect();
            if !table.stable_columns_subset {
                extra = actual
                    .iter()
                    .filter(|c| !table.stable_columns.iter().any(|s| s == *c))
                    .map(|c| c.to_string())
                    .collect();
            }

            // `ignore` still records the mismatch lists; it just emits no
            // findings.
            let mut report = |code: &str, message: String| match table.stable_columns_mode {
                StableColumnsMode::Error => errors.push(Finding::new(&table.id, code, message)),
                StableColumnsMode::Warn => warnings.push(Finding::new(&table.id, code, message)),
                StableColumnsMode::Ignore => {}
            };
            if !missing.is_empty() {
                report(
                    "STABLE_COLUMNS_MISSING",
                    format!("Missing stable columns: {:?}", missing),
                );
            }
            if !extra.is_empty() {
                report(
                    "STABLE_COLUMNS_EXTRA",
                    format!("Unexpected columns: {:?}", extra),
                );
            }
        }

        for constraint in &table.validation_constraints {
            for finding in check_constraint(frame, &table.id, constraint) {
                match table.stable_columns_mode {
                    StableColumnsMode::Error => errors.push(finding),
                    StableColumnsMode::Warn => warnings.push(finding),
                    StableColumnsMode::Ignore => {}
                }
            }
        }

        TableValidation {
            table_id: table.id.clone(),
            valid: errors.is_empty(),
            errors,
            warnings,
            missing_columns: missing,
            extra_columns: extra,
        }
    }

    /// Validate every extracted table plus the profile-level rule blocks.
    pub fn validate_extraction(
        &self,
        tables: &BTreeMap<String, Frame>,
        profile: &Profile,
    ) -> ValidationSummary {
        let mut table_results = Vec::new();

        for (_, table) in profile.all_tables() {
            match tables.get(&table.id) {
                Some(frame) => {
                    let result = self.validate_table(frame, table);
                    for finding in &result.warnings {
                        warn!(table = %finding.table_id, code = %finding.code, "{}", finding.message);
                    }
                    for finding in &result.errors {
                        error!(table = %finding.table_id, code = %finding.code, "{}", finding.message);
                    }
                    table_results.push(result);
                }
                None => {
                    // A table that produced no rows anywhere is not an error.
                    table_results.push(TableValidation {
                        table_id: table.id.clone(),
                        valid: true,
                        errors: Vec::new(),
                        warnings: vec![Finding::new(
                            &table.id,
                            "TABLE_NOT_EXTRACTED",
                            format!("Table {} not extracted", table.id),
                        )],
                        missing_columns: Vec::new(),
                        extra_columns: Vec::new(),
                    });
                }
            }
        }

        let mut profile_errors = Vec::new();
        let mut profile_warnings = Vec::new();

        if let Some(schema_rules) = &profile.schema_rules {
            for (table_id, frame) in tables {
                profile_errors.extend(check_schema_rules(frame, table_id, schema_rules));
            }
        }

        for rule in &profile.row_rules {
            for (table_id, frame) in tables {
                if let Some(finding) = check_row_rule(frame, table_id, rule) {
                    match rule.on_fail {
                        OnFail::Error => profile_errors.push(finding),
                        _ => profile_warnings.push(finding),
                    }
                }
            }
        }

        for rule in &profile.aggregate_rules {
            for (table_id, frame) in tables {
                if let Some(finding) = check_aggregate_rule(frame, table_id, rule) {
                    match rule.on_fail {
                        OnFail::Error => profile_errors.push(finding),
                        _ => profile_warnings.push(finding),
                    }
                }
            }
        }

        for finding in &profile_errors {
            error!(table = %finding.table_id, code = %finding.code, "{}", finding.message);
        }
        for finding in &profile_warnings {
            warn!(table = %finding.table_id, code = %finding.code, "{}", finding.message);
        }

        let valid = table_results.iter().all(|r| r.valid) && profile_errors.is_empty();
        ValidationSummary {
            profile_id: profile.profile_id().to_string(),
            valid,
            total_tables: table_results.len(),
            valid_tables: table_results.iter().filter(|r| r.valid).count(),
            table_results,
            profile_errors,
            profile_warnings,
        }
    }
}

fn check_constraint(frame: &Frame, table_id: &str, constraint: &ValueConstraint) -> Vec<Finding> {
    let mut findings = Vec::new();
    let Some(column) = frame.column(&constraint.column) else {
        return findings;
    };

    match constraint.constraint_type {
        ConstraintType::Range => {
            if let Some(min) = constraint.min {
                let below = column
                    .values
                    .iter()
                    .filter(|v| v.as_f64().map(|x| x < min).unwrap_or(false))
                    .count();
                if below > 0 {
                    findings.push(Finding::new(
                        table_id,
                        "RANGE_VIOLATION",
                        format!(
                            "Column {} has {} values below {}",
                            constraint.column, below, min
                        ),
                    ));
                }
            }
            if let Some(max) = constraint.max {
                let above = column
                    .values
                    .iter()
                    .filter(|v| v.as_f64().map(|x| x > max).unwrap_or(false))
                    .count();
                if above > 0 {
                    findings.push(Finding::new(
                        table_id,
                        "RANGE_VIOLATION",
                        format!(
                            "Column {} has {} values above {}",
                            constraint.column, above, max
                        ),
                    ));
                }
            }
        }
        ConstraintType::NotNull => {
            let nulls = column.null_count();
            if nulls > 0 {
                findings.push(Finding::new(
                    table_id,
                    "NOT_NULL_VIOLATION",
                    format!("Column {} has {} null values", constraint.column, nulls),
                ));
            }
        }
        ConstraintType::Regex => {
            if let Some(pattern) = &constraint.pattern {
                match Regex::new(pattern) {
                    Ok(regex) => {
                        let mismatches = column
                            .values
                            .iter()
                            .filter(|v| !v.is_null() && !regex.is_match(&v.to_string()))
                            .count();
                        if mismatches > 0 {
                            findings.push(Finding::new(
                                table_id,
                                "REGEX_VIOLATION",
                                format!(
                                    "Column {} has {} values not matching pattern {}",
                                    constraint.column, mismatches, pattern
                                ),
                            ));
                        }
                    }
                    Err(e) => findings.push(Finding::new(
                        table_id,
                        "REGEX_VIOLATION",
                        format!("Regex validation error for {}: {}", constraint.column, e),
                    )),
                }
            }
        }
    }
    findings
}

fn check_schema_rules(frame: &Frame, table_id: &str, rules: &SchemaRules) -> Vec<Finding> {
    let mut findings = Vec::new();

    for required in &rules.required_columns {
        if !frame.has_column(required) {
            findings.push(Finding::new(
                table_id,
                "REQUIRED_COLUMN_MISSING",
                format!("Required column missing: {}", required),
            ));
        }
    }

    for (column, declared) in &rules.column_types {
        let Some(col) = frame.column(column) else {
            continue;
        };
        if !col.dtype.matches_declared(declared) {
            findings.push(Finding::new(
                table_id,
                "COLUMN_TYPE_MISMATCH",
                format!(
                    "Column {} type mismatch: expected {}, got {}",
                    column, declared, col.dtype
                ),
            ));
        }
    }

    for column in &rules.unique_columns {
        let Some(col) = frame.column(column) else {
            continue;
        };
        let total = col.len();
        let unique = col.distinct_count();
        if unique < total {
            findings.push(Finding::new(
                table_id,
                "UNIQUE_VIOLATION",
                format!("Column {} has {} duplicate values", column, total - unique),
            ));
        }
    }

    findings
}

fn check_row_rule(
    frame: &Frame,
    table_id: &str,
    rule: &trellis_profile::RowRule,
) -> Option<Finding> {
    let conditions = match expr::parse_conditions(&rule.expression) {
        Ok(conditions) => conditions,
        Err(e) => {
            return Some(Finding::new(
                table_id,
                "ROW_RULE_INVALID",
                format!("Row rule evaluation error for '{}': {}", rule.name, e),
            ));
        }
    };
    let violations = expr::count_violations(frame, &conditions);
    if violations == 0 {
        return None;
    }
    let message = rule
        .message
        .clone()
        .unwrap_or_else(|| format!("Row rule '{}' failed", rule.name));
    Some(Finding::new(
        table_id,
        "ROW_RULE_VIOLATION",
        format!("{} ({} rows)", message, violations),
    ))
}

fn check_aggregate_rule(frame: &Frame, table_id: &str, rule: &AggregateRule) -> Option<Finding> {
    let message = rule
        .message
        .clone()
        .unwrap_or_else(|| format!("Aggregate rule '{}' failed", rule.name));

    match rule.rule_type {
        AggregateRuleType::RowCount => {
            let actual = frame.height() as f64;
            if let Some(min) = rule.min {
                if actual < min {
                    return Some(Finding::new(
                        table_id,
                        "ROW_COUNT",
                        format!("{}: row count {} < min {}", message, actual, min),
                    ));
                }
            }
            if let Some(max) = rule.max {
                if actual > max {
                    return Some(Finding::new(
                        table_id,
                        "ROW_COUNT",
                        format!("{}: row count {} > max {}", message, actual, max),
                    ));
                }
            }
            None
        }
        AggregateRuleType::UniqueCount => {
            let column = rule.column.as_deref()?;
            let col = frame.column(column)?;
            let actual = col.distinct_count() as f64;
            let min = rule.min?;
            if actual < min {
                return Some(Finding::new(
                    table_id,
                    "UNIQUE_COUNT",
                    format!("{}: unique count {} < min {}", message, actual, min),
                ));
            }
            None
        }
        AggregateRuleType::NullRatio => {
            let column = rule.column.as_deref()?;
            let col = frame.column(column)?;
            let max = rule.max?;
            if col.len() == 0 {
                return None;
            }
            let ratio = col.null_count() as f64 / col.len() as f64;
            if ratio > max {
                return Some(Finding::new(
                    table_id,
                    "NULL_RATIO",
                    format!(
                        "{}: null ratio {:.2}% > max {:.2}%",
                        message,
                        ratio * 100.0,
                        max * 100.0
                    ),
                ));
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_frame::{Column, Scalar};
    use trellis_profile::load_profile_from_str;

    fn frame(values: &[(&str, Vec<Scalar>)]) -> Frame {
        Frame::from_columns(
            values
                .iter()
                .map(|(n, v)| Column::new(*n, v.clone()))
                .collect(),
        )
        .unwrap()
    }

    fn ints(vals: &[i64]) -> Vec<Scalar> {
        vals.iter().map(|&v| Scalar::Int(v)).collect()
    }

    #[test]
    fn test_stable_columns_missing_error_mode() {
        let yaml = r#"
meta: { profile_id: p, title: T }
levels:
  - name: run
    tables:
      - id: t
        select: { strategy: flat_object, path: "$" }
        stable_columns: [a, b]
        stable_columns_mode: error
"#;
        let profile = load_profile_from_str(yaml).unwrap();
        let table = profile.table("t").unwrap();
        let result =
            ValidationEngine::new().validate_table(&frame(&[("a", ints(&[1]))]), table);
        assert!(!result.valid);
        assert_eq!(result.missing_columns, vec!["b"]);
        assert_eq!(result.errors[0].code, "STABLE_COLUMNS_MISSING");
    }

    #[test]
    fn test_extra_columns_only_when_not_subset() {
        let yaml = r#"
meta: { profile_id: p, title: T }
levels:
  - name: run
    tables:
      - id: strict
        select: { strategy: flat_object, path: "$" }
        stable_columns: [a]
        stable_columns_subset: false
      - id: loose
        select: { strategy: flat_object, path: "$" }
        stable_columns: [a]
"#;
        let profile = load_profile_from_str(yaml).unwrap();
        let data = frame(&[("a", ints(&[1])), ("extra", ints(&[2]))]);
        let engine = ValidationEngine::new();

        let strict = engine.validate_table(&data, profile.table("strict").unwrap());
        assert_eq!(strict.extra_columns, vec!["extra"]);
        assert_eq!(strict.warnings[0].code, "STABLE_COLUMNS_EXTRA");

        let loose = engine.validate_table(&data, profile.table("loose").unwrap());
        assert!(loose.extra_columns.is_empty());
        assert!(loose.warnings.is_empty());
    }

    #[test]
    fn test_ignore_mode_records_but_does_not_report() {
        let yaml = r#"
meta: { profile_id: p, title: T }
levels:
  - name: run
    tables:
      - id: t
        select: { strategy: flat_object, path: "$" }
        stable_columns: [a, b]
        stable_columns_mode: ignore
"#;
        let profile = load_profile_from_str(yaml).unwrap();
        let result = ValidationEngine::new()
            .validate_table(&frame(&[("a", ints(&[1]))]), profile.table("t").unwrap());
        assert!(result.valid);
        assert!(result.errors.is_empty() && result.warnings.is_empty());
        assert_eq!(result.missing_columns, vec!["b"]);
    }

    #[test]
    fn test_value_constraints() {
        let yaml = r#"
meta: { profile_id: p, title: T }
levels:
  - name: run
    tables:
      - id: t
        select: { strategy: flat_object, path: "$" }
        stable_columns_mode: error
        validation_constraints:
          - { column: cd, type: range, min: 0, max: 100 }
          - { column: site, type: not_null }
          - { column: site, type: regex, pattern: "^s[0-9]+$" }
"#;
        let profile = load_profile_from_str(yaml).unwrap();
        let data = frame(&[
            ("cd", vec![Scalar::Int(-5), Scalar::Int(50), Scalar::Int(500)]),
            (
                "site",
                vec![Scalar::Str("s1".into()), Scalar::Null, Scalar::Str("bad".into())],
            ),
        ]);
        let result =
            ValidationEngine::new().validate_table(&data, profile.table("t").unwrap());
        let codes: Vec<&str> = result.errors.iter().map(|f| f.code.as_str()).collect();
        assert!(codes.contains(&"RANGE_VIOLATION"));
        assert!(codes.contains(&"NOT_NULL_VIOLATION"));
        assert!(codes.contains(&"REGEX_VIOLATION"));
    }

    #[test]
    fn test_profile_level_rules() {
        let yaml = r#"
meta: { profile_id: p, title: T }
levels:
  - name: run
    tables:
      - id: t
        select: { strategy: flat_object, path: "$" }
schema_rules:
  required_columns: [cd]
  column_types: { cd: int }
  unique_columns: [site]
row_rules:
  - name: cd_positive
    expression: "cd > 0"
    on_fail: error
aggregate_rules:
  - name: enough_rows
    type: row_count
    min: 10
    on_fail: warn
"#;
        let profile = load_profile_from_str(yaml).unwrap();
        let mut tables = BTreeMap::new();
        tables.insert(
            "t".to_string(),
            frame(&[
                ("cd", ints(&[1, -2, 3])),
                (
                    "site",
                    vec![
                        Scalar::Str("s1".into()),
                        Scalar::Str("s1".into()),
                        Scalar::Str("s2".into()),
                    ],
                ),
            ]),
        );
        let summary = ValidationEngine::new().validate_extraction(&tables, &profile);
        assert!(!summary.valid);
        let codes: Vec<&str> = summary
            .profile_errors
            .iter()
            .map(|f| f.code.as_str())
            .collect();
        assert!(codes.contains(&"UNIQUE_VIOLATION"));
        assert!(codes.contains(&"ROW_RULE_VIOLATION"));
        let warn_codes: Vec<&str> = summary
            .profile_warnings
            .iter()
            .map(|f| f.code.as_str())
            .collect();
        assert!(warn_codes.contains(&"ROW_COUNT"));
    }

    #[test]
    fn test_missing_table_is_warning_only() {
        let yaml = r#"
meta: { profile_id: p, title: T }
levels:
  - name: run
    tables:
      - id: t
        select: { strategy: flat_object, path: "$" }
"#;
        let profile = load_profile_from_str(yaml).unwrap();
        let summary =
            ValidationEngine::new().validate_extraction(&BTreeMap::new(), &profile);
        assert!(summary.valid);
        assert_eq!(summary.table_results[0].warnings[0].code, "TABLE_NOT_EXTRACTED");
    }
}
