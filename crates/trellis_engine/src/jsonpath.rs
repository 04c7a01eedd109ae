//! Minimal JSONPath evaluation over parsed JSON.
//!
//! Supports the subset profiles actually use: `$`, dot-notation keys,
//! bracket indices, bracket-quoted keys, and the `[*]` wildcard. Multiple
//! matches come back as an array; a single match comes back as the value
//! itself.

use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// Parse a path into segments. Returns None on malformed bracket syntax.
fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let body = path.strip_prefix('$').unwrap_or(path);
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0usize;

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                if i > start {
                    segments.push(Segment::Key(chars[start..i].iter().collect()));
                }
            }
            '[' => {
                i += 1;
                if i < chars.len() && chars[i] == '*' {
                    segments.push(Segment::Wildcard);
                    i += 1;
                } else if i < chars.len() && (chars[i] == '\'' || chars[i] == '"') {
                    let quote = chars[i];
                    i += 1;
                    let start = i;
                    while i < chars.len() && chars[i] != quote {
                        i += 1;
                    }
                    if i >= chars.len() {
                        return None;
                    }
                    segments.push(Segment::Key(chars[start..i].iter().collect()));
                    i += 1;
                } else {
                    let start = i;
                    while i < chars.len() && chars[i] != ']' {
                        i += 1;
                    }
                    if i >= chars.len() {
                        return None;
                    }
                    let token: String = chars[start..i].iter().collect();
                    let index = token.trim().parse::<usize>().ok()?;
                    segments.push(Segment::Index(index));
                }
                if i >= chars.len() || chars[i] != ']' {
                    return None;
                }
                i += 1;
            }
            _ => {
                // Bare leading key without '$.' prefix.
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                segments.push(Segment::Key(chars[start..i].iter().collect()));
            }
        }
    }
    Some(segments)
}

/// Evaluate a path. Zero matches yield None; one match yields the value;
/// several (via wildcards) yield an array of matches.
pub fn evaluate(data: &JsonValue, path: &str) -> Option<JsonValue> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "$" {
        return Some(data.clone());
    }
    let segments = parse_path(trimmed)?;

    let mut current: Vec<&JsonValue> = vec![data];
    for segment in &segments {
        let mut next: Vec<&JsonValue> = Vec::new();
        for node in current {
            match segment {
                Segment::Key(key) => {
                    if let Some(v) = node.get(key) {
                        next.push(v);
                    }
                }
                Segment::Index(idx) => {
                    if let Some(v) = node.get(idx) {
                        next.push(v);
                    }
                }
                Segment::Wildcard => match node {
                    JsonValue::Array(items) => next.extend(items.iter()),
                    JsonValue::Object(map) => next.extend(map.values()),
                    _ => {}
                },
            }
        }
        if next.is_empty() {
            return None;
        }
        current = next;
    }

    match current.len() {
        0 => None,
        1 => Some(current[0].clone()),
        _ => Some(JsonValue::Array(current.into_iter().cloned().collect())),
    }
}

/// Strip a trailing `[*]` when the caller expects a literal array reference.
pub fn strip_trailing_wildcard(path: &str) -> &str {
    path.strip_suffix("[*]").unwrap_or(path)
}

/// Substitute `{var}` occurrences with an index. Only identifier-shaped
/// variable names are substituted, so literal braces elsewhere survive.
pub fn substitute_index(path: &str, var: &str, index: usize) -> String {
    if !var
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c.is_ascii_alphanumeric() && (i > 0 || !c.is_ascii_digit()))
    {
        return path.to_string();
    }
    path.replace(&format!("{{{}}}", var), &index.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> JsonValue {
        json!({
            "summary": {"lot": "L1", "count": 3},
            "sites": [
                {"name": "s1", "cd": 10},
                {"name": "s2", "cd": 20}
            ]
        })
    }

    #[test]
    fn test_root() {
        let d = doc();
        assert_eq!(evaluate(&d, "$"), Some(d.clone()));
        assert_eq!(evaluate(&d, ""), Some(d));
    }

    #[test]
    fn test_dot_navigation() {
        let d = doc();
        assert_eq!(evaluate(&d, "$.summary.lot"), Some(json!("L1")));
        assert_eq!(evaluate(&d, "$.summary.missing"), None);
    }

    #[test]
    fn test_bracket_index() {
        let d = doc();
        assert_eq!(evaluate(&d, "$.sites[1].name"), Some(json!("s2")));
        assert_eq!(evaluate(&d, "$.sites[5]"), None);
    }

    #[test]
    fn test_wildcard_collects() {
        let d = doc();
        assert_eq!(
            evaluate(&d, "$.sites[*].cd"),
            Some(json!([10, 20]))
        );
    }

    #[test]
    fn test_quoted_key() {
        let d = json!({"odd key": {"x": 1}});
        assert_eq!(evaluate(&d, "$['odd key'].x"), Some(json!(1)));
    }

    #[test]
    fn test_bare_key_without_dollar() {
        let d = doc();
        assert_eq!(evaluate(&d, "summary.count"), Some(json!(3)));
    }

    #[test]
    fn test_substitute_index() {
        assert_eq!(
            substitute_index("$.sites[{site}].stats", "site", 2),
            "$.sites[2].stats"
        );
        // Non-identifier vars never substitute
        assert_eq!(
            substitute_index("$.x[{bad var}]", "bad var", 2),
            "$.x[{bad var}]"
        );
    }

    #[test]
    fn test_strip_wildcard() {
        assert_eq!(strip_trailing_wildcard("$.sites[*]"), "$.sites");
        assert_eq!(strip_trailing_wildcard("$.sites"), "$.sites");
    }
}
