//! Predicate-tree filtering of candidate files.
//!
//! Two node kinds: a leaf predicate over one file attribute, and an
//! AND/OR/NOT group over children. String comparisons are case-insensitive
//! unless the predicate opts out. An absent filter passes every file.

use crate::discovery::FileMeta;
use chrono::NaiveDateTime;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::warn;
use trellis_profile::{CaseSensitivity, FilterNode, FilterPredicate, GroupOp, PredicateField};

/// Evaluate a file against an optional filter tree.
pub fn matches(file: &FileMeta, filter: Option<&FilterNode>) -> bool {
    match filter {
        None => true,
        Some(node) => eval_node(file, node),
    }
}

/// Filter a candidate list, preserving order.
pub fn filter_files<'a>(
    files: &'a [FileMeta],
    filter: Option<&FilterNode>,
) -> Vec<&'a FileMeta> {
    files.iter().filter(|f| matches(f, filter)).collect()
}

fn eval_node(file: &FileMeta, node: &FilterNode) -> bool {
    match node {
        FilterNode::Group { op, children } => {
            if children.is_empty() {
                return true;
            }
            match op {
                GroupOp::And => children.iter().all(|c| eval_node(file, c)),
                GroupOp::Or => children.iter().any(|c| eval_node(file, c)),
                // NOT applies to the first child only.
                GroupOp::Not => !eval_node(file, &children[0]),
            }
        }
        FilterNode::Predicate(p) => eval_predicate(file, p),
    }
}

/// The value a predicate compares against, already typed per field.
enum FieldValue {
    Text(String),
    Size(u64),
    Timestamp(NaiveDateTime),
}

fn field_value(file: &FileMeta, field: PredicateField) -> Option<FieldValue> {
    match field {
        PredicateField::Filename => Some(FieldValue::Text(file.filename())),
        PredicateField::Extension => Some(FieldValue::Text(file.extension())),
        PredicateField::Path => Some(FieldValue::Text(file.parent())),
        PredicateField::FullPath => Some(FieldValue::Text(file.path.display().to_string())),
        PredicateField::Size => Some(FieldValue::Size(file.size)),
        PredicateField::ModifiedDate => file
            .modified
            .map(|m| FieldValue::Timestamp(m.naive_local())),
    }
}

fn eval_predicate(file: &FileMeta, p: &FilterPredicate) -> bool {
    let Some(value) = field_value(file, p.field) else {
        return false;
    };

    match value {
        FieldValue::Text(text) => eval_text(&text, p),
        FieldValue::Size(size) => eval_numeric(size as f64, p),
        FieldValue::Timestamp(ts) => eval_timestamp(ts, p),
    }
}

fn operand_str(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn eval_text(text: &str, p: &FilterPredicate) -> bool {
    let mut lhs = text.to_string();
    let mut rhs = operand_str(&p.value);
    if p.case == CaseSensitivity::Insensitive {
        lhs = lhs.to_lowercase();
        rhs = rhs.to_lowercase();
    }

    match p.op.as_str() {
        "equals" => lhs == rhs,
        "not_equals" => lhs != rhs,
        "contains" => lhs.contains(&rhs),
        "startswith" => lhs.starts_with(&rhs),
        "endswith" => lhs.ends_with(&rhs),
        "matches" => match Regex::new(&operand_str(&p.value)) {
            Ok(re) => re.is_match(text),
            Err(_) => false,
        },
        "in" => p.values.iter().any(|v| {
            let mut candidate = operand_str(v);
            if p.case == CaseSensitivity::Insensitive {
                candidate = candidate.to_lowercase();
            }
            candidate == lhs
        }),
        "not_in" => !p.values.iter().any(|v| {
            let mut candidate = operand_str(v);
            if p.case == CaseSensitivity::Insensitive {
                candidate = candidate.to_lowercase();
            }
            candidate == lhs
        }),
        "gt" => lhs > rhs,
        "gte" => lhs >= rhs,
        "lt" => lhs < rhs,
        "lte" => lhs <= rhs,
        other => {
            warn!(op = other, "unknown filter operator, predicate passes");
            true
        }
    }
}

fn eval_numeric(lhs: f64, p: &FilterPredicate) -> bool {
    let rhs = p.value.as_f64();
    match p.op.as_str() {
        "equals" => rhs.map(|r| lhs == r).unwrap_or(false),
        "not_equals" => rhs.map(|r| lhs != r).unwrap_or(true),
        "gt" => rhs.map(|r| lhs > r).unwrap_or(false),
        "gte" => rhs.map(|r| lhs >= r).unwrap_or(false),
        "lt" => rhs.map(|r| lhs < r).unwrap_or(false),
        "lte" => rhs.map(|r| lhs <= r).unwrap_or(false),
        "in" => p.values.iter().filter_map(|v| v.as_f64()).any(|r| lhs == r),
        "not_in" => !p.values.iter().filter_map(|v| v.as_f64()).any(|r| lhs == r),
        other => {
            warn!(op = other, "unsupported size operator, predicate passes");
            true
        }
    }
}

fn parse_timestamp(value: &JsonValue) -> Option<NaiveDateTime> {
    let text = value.as_str()?;
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn eval_timestamp(lhs: NaiveDateTime, p: &FilterPredicate) -> bool {
    let Some(rhs) = parse_timestamp(&p.value) else {
        return false;
    };
    match p.op.as_str() {
        "equals" => lhs == rhs,
        "not_equals" => lhs != rhs,
        "gt" => lhs > rhs,
        "gte" => lhs >= rhs,
        "lt" => lhs < rhs,
        "lte" => lhs <= rhs,
        other => {
            warn!(op = other, "unsupported date operator, predicate passes");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn meta(name: &str, size: u64) -> FileMeta {
        FileMeta {
            path: PathBuf::from(format!("/data/runs/{}", name)),
            size,
            modified: None,
        }
    }

    fn predicate(field: PredicateField, op: &str, value: JsonValue) -> FilterNode {
        FilterNode::Predicate(FilterPredicate {
            field,
            op: op.to_string(),
            value,
            values: Vec::new(),
            case: CaseSensitivity::Insensitive,
        })
    }

    #[test]
    fn test_no_filter_passes_all() {
        assert!(matches(&meta("a.json", 1), None));
    }

    #[test]
    fn test_extension_equals_case_insensitive() {
        let filter = predicate(PredicateField::Extension, "equals", json!(".JSON"));
        assert!(matches(&meta("run.json", 1), Some(&filter)));
        assert!(!matches(&meta("run.csv", 1), Some(&filter)));
    }

    #[test]
    fn test_size_comparison() {
        let filter = predicate(PredicateField::Size, "gt", json!(100));
        assert!(matches(&meta("big.json", 200), Some(&filter)));
        assert!(!matches(&meta("small.json", 50), Some(&filter)));
    }

    #[test]
    fn test_matches_regex() {
        let filter = predicate(
            PredicateField::Filename,
            "matches",
            json!("^LOT[0-9]+_"),
        );
        assert!(matches(&meta("LOT42_run.json", 1), Some(&filter)));
        assert!(!matches(&meta("run_LOT42.json", 1), Some(&filter)));
    }

    #[test]
    fn test_group_and_or_not() {
        let group = FilterNode::Group {
            op: GroupOp::And,
            children: vec![
                predicate(PredicateField::Extension, "equals", json!(".json")),
                FilterNode::Group {
                    op: GroupOp::Not,
                    children: vec![predicate(
                        PredicateField::Filename,
                        "contains",
                        json!("skip"),
                    )],
                },
            ],
        };
        assert!(matches(&meta("run.json", 1), Some(&group)));
        assert!(!matches(&meta("skip_run.json", 1), Some(&group)));
        assert!(!matches(&meta("run.csv", 1), Some(&group)));
    }

    #[test]
    fn test_in_list() {
        let filter = FilterNode::Predicate(FilterPredicate {
            field: PredicateField::Filename,
            op: "in".to_string(),
            value: JsonValue::Null,
            values: vec![json!("a.json"), json!("B.JSON")],
            case: CaseSensitivity::Insensitive,
        });
        assert!(matches(&meta("b.json", 1), Some(&filter)));
        assert!(!matches(&meta("c.json", 1), Some(&filter)));
    }

    #[test]
    fn test_filter_files_preserves_order() {
        let files = vec![meta("a.json", 1), meta("b.csv", 1), meta("c.json", 1)];
        let filter = predicate(PredicateField::Extension, "equals", json!(".json"));
        let kept = filter_files(&files, Some(&filter));
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].filename(), "a.json");
        assert_eq!(kept[1].filename(), "c.json");
    }
}
