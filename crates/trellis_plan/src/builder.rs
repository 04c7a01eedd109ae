//! Plan assembly.

use crate::artifacts::{
    Lookup, PlanArtifacts, PlanManifest, RequestGraph, RequestGraphPartition,
};
use crate::canonical::CanonicalError;
use crate::models::{DerivedRequirementsManifest, EnvironmentProfile, MappingManifest};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

const CODE_VERSION: &str = "2.0.0";

#[derive(Debug, Default)]
pub struct PlanBuilder;

impl PlanBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the frozen artifact triple. Without scanned data, the request
    /// graph seeds one pending partition per primary-context value; callers
    /// that already enumerated partitions use `build_plan_with_partitions`.
    pub fn build_plan(
        &self,
        drm: &DerivedRequirementsManifest,
        mappings: &MappingManifest,
        environment: &EnvironmentProfile,
        project_id: Uuid,
    ) -> Result<PlanArtifacts, CanonicalError> {
        let seeds: Vec<RequestGraphPartition> = environment
            .primary_context()
            .map(|ctx| {
                ctx.values
                    .iter()
                    .map(|value| RequestGraphPartition {
                        run_key: "pending".to_string(),
                        job_context_value: value.clone(),
                        file_paths: Vec::new(),
                        deduped: false,
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.build_plan_with_partitions(drm, mappings, environment, project_id, seeds)
    }

    /// Build from explicitly enumerated partitions.
    pub fn build_plan_with_partitions(
        &self,
        drm: &DerivedRequirementsManifest,
        mappings: &MappingManifest,
        environment: &EnvironmentProfile,
        project_id: Uuid,
        partitions: Vec<RequestGraphPartition>,
    ) -> Result<PlanArtifacts, CanonicalError> {
        info!(%project_id, "building plan");

        let lookup = self.build_lookup(environment);

        let mut request_graph = RequestGraph::default();
        for partition in partitions {
            request_graph.add_partition(partition);
        }
        request_graph.deduplicate();
        request_graph.sort_stable();
        info!(
            partitions = request_graph.total_partitions,
            deduped = request_graph.deduped_count,
            "request graph built"
        );

        let manifest = PlanManifest {
            drm_sha1: PlanManifest::calculate_sha1(drm)?,
            mappings_sha1: PlanManifest::calculate_sha1(mappings)?,
            environment_sha1: PlanManifest::calculate_sha1(environment)?,
            lookup_sha1: PlanManifest::calculate_sha1(&lookup)?,
            request_graph_sha1: PlanManifest::calculate_sha1(&request_graph)?,
            code_version: CODE_VERSION.to_string(),
            frozen_at: Utc::now(),
        };

        Ok(PlanArtifacts {
            id: Uuid::new_v4(),
            project_id,
            lookup,
            request_graph,
            manifest,
            created_at: Utc::now(),
        })
    }

    /// Expand the environment's folder template for every valid value of
    /// the primary job-context dimension. `{run_key}` stays a template
    /// placeholder; `{category}` takes the context value.
    fn build_lookup(&self, environment: &EnvironmentProfile) -> Lookup {
        let mut folders = BTreeMap::new();
        if let Some(primary) = environment.primary_context() {
            for value in &primary.values {
                let rel = environment
                    .roots
                    .dataagg_rel
                    .replace("{category}", value);
                folders.insert(
                    value.clone(),
                    format!("{}/{}", environment.roots.output_root, rel),
                );
            }
        }
        Lookup {
            fs_root: environment.roots.templates_root.clone(),
            fs_dataagg: environment.roots.output_root.clone(),
            job_context_folders: folders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AggregationType, ContextMapping, DataRoots, JobContext, MappingSourceType, MetricMapping,
        RequiredContext, RequiredMetric, SourceType,
    };

    fn sample_inputs() -> (
        DerivedRequirementsManifest,
        MappingManifest,
        EnvironmentProfile,
    ) {
        let template_id = Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap();
        let project_id = Uuid::parse_str("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee").unwrap();
        let drm = DerivedRequirementsManifest {
            template_id,
            required_contexts: vec![RequiredContext {
                name: "side".to_string(),
                description: String::new(),
            }],
            required_metrics: vec![RequiredMetric {
                name: "CD".to_string(),
                aggregation_type: AggregationType::Mean,
                unit: Some("nm".to_string()),
            }],
        };
        let mappings = MappingManifest {
            project_id,
            context_mappings: vec![ContextMapping {
                context_name: "side".to_string(),
                source_type: MappingSourceType::Column,
                source_column: Some("SpaceCD_Side".to_string()),
                constant_value: None,
            }],
            metrics_mappings: vec![MetricMapping {
                metric_name: "CD".to_string(),
                source_column: "Space CD (nm)".to_string(),
                aggregation_semantics: AggregationType::Mean,
                rename_to: None,
            }],
        };
        let environment = EnvironmentProfile {
            id: Uuid::parse_str("99999999-8888-7777-6666-555555555555").unwrap(),
            project_id: Some(project_id),
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
                aliases: std::collections::BTreeMap::new(),
            }],
            primary_job_context_key: "side".to_string(),
            encoding_policy: vec!["utf-8".to_string()],
            access_roles: Vec::new(),
        };
        (drm, mappings, environment)
    }

    #[test]
    fn test_lookup_expands_primary_values() {
        let (drm, mappings, env) = sample_inputs();
        let artifacts = PlanBuilder::new()
            .build_plan(&drm, &mappings, &env, Uuid::new_v4())
            .unwrap();
        assert_eq!(artifacts.lookup.fs_root, "/templates");
        assert_eq!(artifacts.lookup.fs_dataagg, "/output");
        assert_eq!(
            artifacts.lookup.job_context_folders["Left"],
            "/output/{run_key}/DataAgg/Left"
        );
        assert_eq!(artifacts.lookup.job_context_folders.len(), 2);
    }

    #[test]
    fn test_manifest_deterministic_across_runs() {
        let (drm, mappings, env) = sample_inputs();
        let project_id = Uuid::new_v4();
        let builder = PlanBuilder::new();
        let a = builder
            .build_plan(&drm, &mappings, &env, project_id)
            .unwrap();
        let b = builder
            .build_plan(&drm, &mappings, &env, project_id)
            .unwrap();
        assert_eq!(a.manifest.drm_sha1, b.manifest.drm_sha1);
        assert_eq!(a.manifest.mappings_sha1, b.manifest.mappings_sha1);
        assert_eq!(a.manifest.environment_sha1, b.manifest.environment_sha1);
        assert_eq!(a.manifest.lookup_sha1, b.manifest.lookup_sha1);
        assert_eq!(a.manifest.request_graph_sha1, b.manifest.request_graph_sha1);
        // frozen_at differs between runs and never feeds a hash.
        assert_eq!(a.manifest.code_version, "2.0.0");
    }

    #[test]
    fn test_partitions_dedupe_and_sort() {
        let (drm, mappings, env) = sample_inputs();
        let partitions = vec![
            RequestGraphPartition {
                run_key: "R2".to_string(),
                job_context_value: "Left".to_string(),
                file_paths: vec!["a.csv".to_string()],
                deduped: false,
            },
            RequestGraphPartition {
                run_key: "R1".to_string(),
                job_context_value: "Left".to_string(),
                file_paths: vec!["b.csv".to_string()],
                deduped: false,
            },
            RequestGraphPartition {
                run_key: "R1".to_string(),
                job_context_value: "Left".to_string(),
                file_paths: vec!["c.csv".to_string()],
                deduped: false,
            },
        ];
        let artifacts = PlanBuilder::new()
            .build_plan_with_partitions(&drm, &mappings, &env, Uuid::new_v4(), partitions)
            .unwrap();
        let graph = &artifacts.request_graph;
        assert_eq!(graph.total_partitions, 2);
        assert_eq!(graph.deduped_count, 1);
        assert_eq!(graph.partitions[0].run_key, "R1");
        assert_eq!(graph.partitions[1].run_key, "R2");
    }
}
