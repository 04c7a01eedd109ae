//! End-to-end flows: extract -> validate -> outputs -> sinks, and plan
//! freezing, over real files on disk.

use std::collections::BTreeMap;
use trellis_engine::{ContextOptions, FileMeta, OutputBuilder, ProfileExecutor, ValidationEngine};
use trellis_frame::Scalar;
use trellis_plan::{
    AggregationType, DataRoots, DerivedRequirementsManifest, EnvironmentProfile, JobContext,
    MappingManifest, PlanBuilder, RequiredMetric, SourceType,
};
use trellis_profile::load_profile_from_str;
use trellis_test_utils::{run_document, sample_profile_yaml, FixtureDir};
use uuid::Uuid;

#[tokio::test]
async fn extraction_to_outputs_roundtrip() {
    let fixtures = FixtureDir::new();
    let f1 = fixtures.write_json("LOT1_run.json", &run_document("LOT1", 3));
    let f2 = fixtures.write_json("LOT2_run.json", &run_document("LOT2", 2));
    let profile = load_profile_from_str(sample_profile_yaml()).unwrap();

    let files = vec![FileMeta::from_path(&f1), FileMeta::from_path(&f2)];
    let result = ProfileExecutor::new()
        .execute(&profile, &files, None, None)
        .await
        .unwrap();

    // Two files accumulated per table, in caller-supplied order.
    assert_eq!(result.tables["summary"].height(), 2);
    assert_eq!(result.tables["sites"].height(), 5);
    assert_eq!(
        result.tables["summary"].column("lot").unwrap().values[0],
        Scalar::Str("LOT1".into())
    );

    // Context separation: run context keys never leak into tables.
    assert!(!result.tables["sites"].has_column("lot"));

    let summary = ValidationEngine::new().validate_extraction(&result.tables, &profile);
    assert!(summary.valid, "unexpected findings: {:?}", summary.profile_errors);

    let outputs = OutputBuilder::new().build_outputs(
        &result,
        &profile,
        &ContextOptions::default(),
        None,
    );
    // Run context merged only at output time.
    assert!(outputs["site_long"].has_column("lot"));
    assert!(outputs.contains_key("site_stats"));
    assert!(outputs["site_stats"].has_column("cd_mean"));

    // Write and re-read one output through the parquet sink and adapter.
    let out_path =
        trellis_sinks::write_output(&outputs["site_long"], fixtures.path(), "site_long", "parquet")
            .unwrap();
    let registry = trellis_adapters::create_default_registry();
    let adapter = registry.select_for(&out_path, None).unwrap();
    let probe = adapter
        .probe_schema(&out_path, &Default::default())
        .await
        .unwrap();
    assert!(probe.row_count_exact);
    assert_eq!(probe.row_count_estimate, Some(5));
}

#[tokio::test]
async fn context_priority_resolution() {
    let fixtures = FixtureDir::new();
    let yaml = r#"
meta: { profile_id: ctx, title: Context }
datasource: { format: json }
context_defaults:
  defaults: { jobname: DEFAULT }
  regex_patterns:
    - field: jobname
      pattern: "^(?P<jobname>[A-Z0-9]+)_"
      scope: filename
  content_patterns:
    - field: jobname
      path: "$.summary.jobname"
  allow_user_override: [jobname]
levels:
  - name: run
    tables:
      - id: summary
        select: { strategy: flat_object, path: "$.summary" }
"#;
    let profile = load_profile_from_str(yaml).unwrap();
    let file = fixtures.write_json(
        "LOTABC_run.json",
        &serde_json::json!({"summary": {"jobname": "FROM_CONTENT", "x": 1}}),
    );
    let files = vec![FileMeta::from_path(&file)];

    let mut overrides = BTreeMap::new();
    overrides.insert("jobname".to_string(), serde_json::json!("USER"));
    let result = ProfileExecutor::new()
        .execute(&profile, &files, Some(&overrides), None)
        .await
        .unwrap();
    assert_eq!(result.run_context["jobname"], serde_json::json!("USER"));

    // Without the override the content pattern wins over the regex.
    let result = ProfileExecutor::new()
        .execute(&profile, &files, None, None)
        .await
        .unwrap();
    assert_eq!(
        result.run_context["jobname"],
        serde_json::json!("FROM_CONTENT")
    );
}

#[tokio::test]
async fn repeat_over_extraction_from_disk() {
    let fixtures = FixtureDir::new();
    let yaml = r#"
meta: { profile_id: iter, title: Iteration }
datasource: { format: json }
levels:
  - name: image
    tables:
      - id: per_site_stats
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
    let doc = serde_json::json!({
        "sites": [
            {"name": "s1", "stats": {"headers": ["cd"], "rows": [[10], [11]]}},
            {"name": "s2", "stats": {"headers": ["cd"], "rows": [[20]]}}
        ]
    });
    let file = fixtures.write_json("iter.json", &doc);
    let result = ProfileExecutor::new()
        .execute(&profile, &[FileMeta::from_path(&file)], None, None)
        .await
        .unwrap();

    let frame = &result.tables["per_site_stats"];
    assert_eq!(frame.height(), 3);
    assert_eq!(
        frame.column("site_name").unwrap().values[2],
        Scalar::Str("s2".into())
    );
}

#[test]
fn plan_artifacts_written_as_canonical_json() {
    let fixtures = FixtureDir::new();
    let drm = DerivedRequirementsManifest {
        template_id: Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap(),
        required_contexts: Vec::new(),
        required_metrics: vec![RequiredMetric {
            name: "CD".to_string(),
            aggregation_type: AggregationType::Mean,
            unit: None,
        }],
    };
    let mappings = MappingManifest {
        project_id: Uuid::parse_str("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee").unwrap(),
        context_mappings: Vec::new(),
        metrics_mappings: Vec::new(),
    };
    let environment = EnvironmentProfile {
        id: Uuid::parse_str("99999999-8888-7777-6666-555555555555").unwrap(),
        project_id: None,
        name: "Test".to_string(),
        source: SourceType::Filesystem,
        roots: DataRoots {
            templates_root: "/templates".to_string(),
            output_root: "/output".to_string(),
            dataagg_rel: "{run_key}/DataAgg/{category}".to_string(),
        },
        job_contexts: vec![JobContext {
            name: "Sides".to_string(),
            key: "side".to_string(),
            values: vec!["Left".to_string(), "Right".to_string()],
            aliases: BTreeMap::new(),
        }],
        primary_job_context_key: "side".to_string(),
        encoding_policy: vec!["utf-8".to_string()],
        access_roles: Vec::new(),
    };

    let builder = PlanBuilder::new();
    let project_id = Uuid::new_v4();
    let artifacts = builder
        .build_plan(&drm, &mappings, &environment, project_id)
        .unwrap();
    trellis_sinks::write_plan_artifacts(&artifacts, fixtures.path()).unwrap();

    // The on-disk lookup re-hashes to the manifest's lookup digest.
    let lookup_text =
        std::fs::read_to_string(fixtures.path().join("lookup.json")).unwrap();
    let lookup_value: serde_json::Value = serde_json::from_str(&lookup_text).unwrap();
    let rehash = trellis_plan::sha1_hex_of(&lookup_value).unwrap();
    assert_eq!(rehash, artifacts.manifest.lookup_sha1);

    // Determinism across runs.
    let again = builder
        .build_plan(&drm, &mappings, &environment, project_id)
        .unwrap();
    assert_eq!(again.manifest.request_graph_sha1, artifacts.manifest.request_graph_sha1);
}
