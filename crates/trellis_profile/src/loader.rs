//! YAML -> Profile loading.

use crate::model::Profile;
use crate::validate::validate_profile;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("IO error reading profile: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid profile: {0:?}")]
    Invalid(Vec<String>),
}

/// Load and structurally validate a profile from a YAML file.
pub fn load_profile(path: &Path) -> Result<Profile, ProfileError> {
    let content = std::fs::read_to_string(path)?;
    load_profile_from_str(&content)
}

/// Load and structurally validate a profile from YAML text.
pub fn load_profile_from_str(yaml: &str) -> Result<Profile, ProfileError> {
    let profile: Profile = serde_yaml::from_str(yaml)?;
    let report = validate_profile(&profile);
    if !report.valid {
        return Err(ProfileError::Invalid(report.errors));
    }
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StableColumnsMode, Strategy};

    const SAMPLE: &str = r#"
schema_version: "1.0.0"
version: 3
meta:
  profile_id: cd_sem_runs
  title: CD-SEM Run Extraction
datasource:
  id: cd_sem
  format: json
  filters:
    type: group
    op: AND
    children:
      - field: extension
        op: equals
        value: ".json"
      - field: filename
        op: contains
        value: run
context_defaults:
  defaults:
    jobname: DEFAULT
  regex_patterns:
    - field: lot_id
      pattern: "^(?P<lot_id>[A-Z0-9]+)_"
      scope: filename
      required: true
      on_fail: warn
  content_patterns:
    - field: recipe
      path: "$.summary.recipe"
  allow_user_override: [jobname]
contexts:
  - name: run_context
    level: run
    key_map:
      LotID: "$.lot"
levels:
  - name: run
    tables:
      - id: summary
        label: Run Summary
        select:
          strategy: flat_object
          path: "$.summary"
        stable_columns: [lot, recipe]
        stable_columns_mode: error
      - id: sites
        select:
          strategy: array_of_objects
          path: "$.sites[*]"
normalization:
  nan_values: ["NA", "-"]
  units_policy: normalize
outputs:
  defaults:
    - id: run_wide
      from_level: run
      from_tables: [summary]
  aggregations:
    - id: site_stats
      from_table: sites
      group_by: [site]
      aggregations:
        cd: mean
governance:
  limits:
    max_files_per_run: 10
"#;

    #[test]
    fn test_load_sample_profile() {
        let profile = load_profile_from_str(SAMPLE).unwrap();
        assert_eq!(profile.profile_id(), "cd_sem_runs");
        assert_eq!(profile.version, 3);
        assert_eq!(profile.levels.len(), 1);
        assert_eq!(profile.all_tables().len(), 2);

        let (level, summary) = profile.all_tables()[0];
        assert_eq!(level, "run");
        assert_eq!(summary.select.strategy, Strategy::FlatObject);
        assert_eq!(summary.stable_columns_mode, StableColumnsMode::Error);
        assert!(summary.stable_columns_subset);

        let limits = profile.governance_limits();
        assert_eq!(limits.max_files_per_run, 10);
        // Unset limits keep their defaults
        assert_eq!(limits.max_file_size_mb, 500);
    }

    #[test]
    fn test_filter_tree_parses() {
        let profile = load_profile_from_str(SAMPLE).unwrap();
        match profile.datasource.filters.as_ref().unwrap() {
            crate::model::FilterNode::Group { op, children } => {
                assert_eq!(*op, crate::model::GroupOp::And);
                assert_eq!(children.len(), 2);
            }
            _ => panic!("expected group"),
        }
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let yaml = r#"
meta:
  profile_id: bad
  title: Bad
levels:
  - name: run
    tables:
      - id: t
        select: { strategy: flat_object, path: "$" }
context_defaults:
  regex_patterns:
    - field: x
      pattern: "(unclosed"
"#;
        let err = load_profile_from_str(yaml).unwrap_err();
        match err {
            ProfileError::Invalid(errors) => {
                assert!(errors.iter().any(|e| e.contains("Invalid regex")));
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_repeat_over_as_alias() {
        let yaml = r#"
meta: { profile_id: p, title: T }
levels:
  - name: image
    tables:
      - id: per_site
        select:
          strategy: headers_data
          path: "$.sites[{site}].stats"
          headers_key: headers
          data_key: rows
          repeat_over:
            path: "$.sites"
            as: site
            inject_fields:
              site_name: "$.name"
"#;
        let profile = load_profile_from_str(yaml).unwrap();
        let table = profile.table("per_site").unwrap();
        let repeat = table.select.repeat_over.as_ref().unwrap();
        assert_eq!(repeat.as_var, "site");
        assert_eq!(repeat.inject_fields["site_name"], "$.name");
    }
}
