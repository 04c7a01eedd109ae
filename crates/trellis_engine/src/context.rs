//! Per-file context resolution.
//!
//! Values resolve through four levels, lowest priority first:
//! 1. static defaults from the profile
//! 2. regex patterns over the filename / parent path / full path
//! 3. JSONPath content patterns over the parsed file
//! 4. user overrides, restricted to the allow-list
//!
//! A required pattern that fails to match raises, warns, or signals the
//! executor to skip the file, per its `on_fail` setting.

use crate::jsonpath;
use chrono::NaiveDateTime;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};
use trellis_profile::{ContentPattern, OnFail, Profile, RegexPattern, RegexScope};
use trellis_protocol::EngineError;

/// Resolved context plus resolution side effects.
#[derive(Debug, Clone, Default)]
pub struct ContextOutcome {
    pub context: BTreeMap<String, JsonValue>,
    pub warnings: Vec<String>,
    /// True when an `on_fail: skip_file` pattern missed; the executor drops
    /// the file.
    pub skip_file: bool,
}

#[derive(Debug, Default)]
pub struct ContextExtractor;

impl ContextExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(
        &self,
        profile: &Profile,
        file_path: &Path,
        file_content: Option<&JsonValue>,
        user_overrides: Option<&BTreeMap<String, JsonValue>>,
    ) -> Result<ContextOutcome, EngineError> {
        let mut outcome = ContextOutcome::default();
        let Some(defaults) = profile.context_defaults.as_ref() else {
            if let Some(overrides) = user_overrides {
                // No allow-list configured means every override applies.
                outcome.context.extend(overrides.clone());
            }
            return Ok(outcome);
        };

        // Level 1: static defaults.
        outcome.context.extend(defaults.defaults.clone());

        // Level 2: regex over the path.
        for pattern in &defaults.regex_patterns {
            self.apply_regex(pattern, file_path, &mut outcome)?;
            if outcome.skip_file {
                return Ok(outcome);
            }
        }

        // Level 3: JSONPath over parsed content.
        if let Some(content) = file_content {
            for pattern in &defaults.content_patterns {
                self.apply_content(pattern, content, &mut outcome)?;
                if outcome.skip_file {
                    return Ok(outcome);
                }
            }
        }

        // Level 4: allow-listed user overrides.
        if let Some(overrides) = user_overrides {
            for (key, value) in overrides {
                if defaults.allow_user_override.is_empty()
                    || defaults.allow_user_override.contains(key)
                {
                    outcome.context.insert(key.clone(), value.clone());
                } else {
                    let msg = format!("User override for '{}' not allowed; ignored", key);
                    warn!("{}", msg);
                    outcome.warnings.push(msg);
                }
            }
        }

        debug!(
            keys = outcome.context.len(),
            file = %file_path.display(),
            "context resolved"
        );
        Ok(outcome)
    }

    fn apply_regex(
        &self,
        pattern: &RegexPattern,
        file_path: &Path,
        outcome: &mut ContextOutcome,
    ) -> Result<(), EngineError> {
        let subject = scope_value(pattern.scope, file_path);
        let regex = match Regex::new(&pattern.pattern) {
            Ok(re) => re,
            Err(e) => {
                // Load-time validation compiles patterns; a failure here
                // means the profile bypassed the loader.
                let msg = format!("Invalid regex for '{}': {}", pattern.field, e);
                warn!("{}", msg);
                outcome.warnings.push(msg);
                return Ok(());
            }
        };

        let captured = regex
            .captures(&subject)
            .and_then(|caps| caps.name(&pattern.field).map(|m| m.as_str().to_string()));

        match captured {
            Some(raw) => {
                let value = apply_transform(&raw, pattern);
                outcome.context.insert(pattern.field.clone(), value);
            }
            None if pattern.required => {
                self.on_pattern_miss(&pattern.field, &subject, pattern.on_fail, outcome)?;
            }
            None => {}
        }
        Ok(())
    }

    fn apply_content(
        &self,
        pattern: &ContentPattern,
        content: &JsonValue,
        outcome: &mut ContextOutcome,
    ) -> Result<(), EngineError> {
        let path = if pattern.path.starts_with('$') {
            pattern.path.clone()
        } else {
            format!("$.{}", pattern.path)
        };
        match jsonpath::evaluate(content, &path) {
            Some(value) if !value.is_null() => {
                outcome.context.insert(pattern.field.clone(), value);
            }
            _ => {
                if let Some(default) = &pattern.default {
                    outcome
                        .context
                        .insert(pattern.field.clone(), default.clone());
                } else if pattern.required {
                    self.on_pattern_miss(&pattern.field, &pattern.path, pattern.on_fail, outcome)?;
                }
            }
        }
        Ok(())
    }

    fn on_pattern_miss(
        &self,
        field: &str,
        subject: &str,
        on_fail: OnFail,
        outcome: &mut ContextOutcome,
    ) -> Result<(), EngineError> {
        match on_fail {
            OnFail::Error => Err(EngineError::RequiredPatternMissing {
                field: field.to_string(),
                subject: subject.to_string(),
            }),
            OnFail::SkipFile => {
                let msg = format!(
                    "Required pattern '{}' not matched in {}; skipping file",
                    field, subject
                );
                warn!("{}", msg);
                outcome.warnings.push(msg);
                outcome.skip_file = true;
                Ok(())
            }
            OnFail::Warn => {
                let msg = format!("Required pattern '{}' not matched in {}", field, subject);
                warn!("{}", msg);
                outcome.warnings.push(msg);
                Ok(())
            }
        }
    }
}

fn scope_value(scope: RegexScope, path: &Path) -> String {
    match scope {
        RegexScope::Filename => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        RegexScope::Path => path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        RegexScope::FullPath => path.display().to_string(),
    }
}

fn apply_transform(raw: &str, pattern: &RegexPattern) -> JsonValue {
    let Some(transform) = pattern.transform.as_deref() else {
        return JsonValue::String(raw.to_string());
    };
    match transform {
        "parse_date" => {
            let format = pattern
                .transform_args
                .get("format")
                .and_then(|v| v.as_str())
                .unwrap_or("%Y%m%d");
            match chrono::NaiveDate::parse_from_str(raw, format) {
                Ok(date) => JsonValue::String(date.format("%Y-%m-%d").to_string()),
                Err(_) => match NaiveDateTime::parse_from_str(raw, format) {
                    Ok(dt) => JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
                    Err(_) => JsonValue::String(raw.to_string()),
                },
            }
        }
        "uppercase" => JsonValue::String(raw.to_uppercase()),
        "lowercase" => JsonValue::String(raw.to_lowercase()),
        "strip" => JsonValue::String(raw.trim().to_string()),
        other => {
            warn!(transform = other, "unknown context transform, value kept");
            JsonValue::String(raw.to_string())
        }
    }
}
