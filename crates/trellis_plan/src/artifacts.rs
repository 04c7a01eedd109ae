//! Frozen plan artifact types.

use crate::canonical::{sha1_hex_of, CanonicalError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Filesystem lookup: roots plus per-context-value folders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lookup {
    pub fs_root: String,
    pub fs_dataagg: String,
    /// job-context value -> expanded folder path template
    pub job_context_folders: BTreeMap<String, String>,
}

/// One unit of downstream work, keyed by `(run_key, job_context_value)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGraphPartition {
    pub run_key: String,
    pub job_context_value: String,
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub deduped: bool,
}

impl RequestGraphPartition {
    pub fn partition_key(&self) -> (String, String) {
        (self.run_key.clone(), self.job_context_value.clone())
    }
}

/// Sorted, deduped list of partitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestGraph {
    pub partitions: Vec<RequestGraphPartition>,
    pub total_partitions: usize,
    pub deduped_count: usize,
}

impl RequestGraph {
    pub fn add_partition(&mut self, partition: RequestGraphPartition) {
        self.partitions.push(partition);
        self.total_partitions = self.partitions.len();
    }

    /// Drop later occurrences of each `(run_key, value)` key, counting the
    /// collapses.
    pub fn deduplicate(&mut self) {
        let mut seen = std::collections::HashSet::new();
        let mut kept = Vec::with_capacity(self.partitions.len());
        for mut partition in self.partitions.drain(..) {
            if seen.insert(partition.partition_key()) {
                kept.push(partition);
            } else {
                partition.deduped = true;
                self.deduped_count += 1;
            }
        }
        self.partitions = kept;
        self.total_partitions = self.partitions.len();
    }

    /// Stable lexicographic order by `(run_key, value)`.
    pub fn sort_stable(&mut self) {
        self.partitions
            .sort_by(|a, b| a.partition_key().cmp(&b.partition_key()));
    }
}

/// Digest manifest. `frozen_at` sits beside the hashes and is never itself
/// an input to any of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanManifest {
    pub drm_sha1: String,
    pub mappings_sha1: String,
    pub environment_sha1: String,
    pub lookup_sha1: String,
    pub request_graph_sha1: String,
    pub code_version: String,
    pub frozen_at: DateTime<Utc>,
}

impl PlanManifest {
    /// SHA-1 over the canonical JSON of any serializable input.
    pub fn calculate_sha1<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
        sha1_hex_of(value)
    }
}

/// The complete frozen triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanArtifacts {
    pub id: Uuid,
    pub project_id: Uuid,
    pub lookup: Lookup,
    pub request_graph: RequestGraph,
    pub manifest: PlanManifest,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(run: &str, value: &str) -> RequestGraphPartition {
        RequestGraphPartition {
            run_key: run.to_string(),
            job_context_value: value.to_string(),
            file_paths: Vec::new(),
            deduped: false,
        }
    }

    #[test]
    fn test_deduplicate_counts_collapses() {
        let mut graph = RequestGraph::default();
        graph.add_partition(partition("R1", "Left"));
        graph.add_partition(partition("R1", "Left"));
        graph.add_partition(partition("R1", "Right"));
        assert_eq!(graph.total_partitions, 3);

        graph.deduplicate();
        assert_eq!(graph.total_partitions, 2);
        assert_eq!(graph.deduped_count, 1);

        // No two surviving partitions share a key.
        let mut keys: Vec<_> = graph.partitions.iter().map(|p| p.partition_key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), graph.partitions.len());
    }

    #[test]
    fn test_sort_stable_lexicographic() {
        let mut graph = RequestGraph::default();
        graph.add_partition(partition("R2", "Left"));
        graph.add_partition(partition("R1", "Right"));
        graph.add_partition(partition("R1", "Left"));
        graph.sort_stable();
        let keys: Vec<_> = graph
            .partitions
            .iter()
            .map(|p| (p.run_key.as_str(), p.job_context_value.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![("R1", "Left"), ("R1", "Right"), ("R2", "Left")]
        );
    }

    #[test]
    fn test_manifest_hash_is_hex() {
        let digest =
            PlanManifest::calculate_sha1(&serde_json::json!({"key": "value"})).unwrap();
        assert_eq!(digest.len(), 40);
    }
}
