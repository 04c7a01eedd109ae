//! Plan input models: the derived-requirements manifest, the mapping
//! manifest, and the environment profile.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Derived Requirements Manifest
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationType {
    Mean,
    Median,
    Min,
    Max,
    Std,
    Count,
    Sum,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Min => "min",
            Self::Max => "max",
            Self::Std => "std",
            Self::Count => "count",
            Self::Sum => "sum",
        }
    }
}

/// A context dimension the downstream consumer requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredContext {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A metric the downstream consumer requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredMetric {
    pub name: String,
    pub aggregation_type: AggregationType,
    #[serde(default)]
    pub unit: Option<String>,
}

/// What the downstream template needs from the data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedRequirementsManifest {
    pub template_id: Uuid,
    #[serde(default)]
    pub required_contexts: Vec<RequiredContext>,
    #[serde(default)]
    pub required_metrics: Vec<RequiredMetric>,
}

// ============================================================================
// Mapping Manifest
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSourceType {
    Column,
    Constant,
    Context,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMapping {
    pub context_name: String,
    pub source_type: MappingSourceType,
    #[serde(default)]
    pub source_column: Option<String>,
    #[serde(default)]
    pub constant_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricMapping {
    pub metric_name: String,
    pub source_column: String,
    pub aggregation_semantics: AggregationType,
    /// Output column name override; avoids collisions when `first`/`last`
    /// aggregations keep the source name.
    #[serde(default)]
    pub rename_to: Option<String>,
}

/// How required contexts and metrics map onto extracted columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingManifest {
    pub project_id: Uuid,
    #[serde(default)]
    pub context_mappings: Vec<ContextMapping>,
    #[serde(default)]
    pub metrics_mappings: Vec<MetricMapping>,
}

// ============================================================================
// Environment Profile
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Filesystem,
    Adls,
    Sql,
}

/// One job-context dimension (e.g. "Sides" with values Left/Right).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    pub name: String,
    pub key: String,
    pub values: Vec<String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl JobContext {
    /// Resolve a raw value through the alias table to its canonical form.
    pub fn resolve_value(&self, value: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.as_str() == value)
            .map(String::as_str)
            .or_else(|| self.aliases.get(value).map(String::as_str))
    }
}

fn default_dataagg_rel() -> String {
    "{run_key}/DataAgg/{category}".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRoots {
    pub templates_root: String,
    pub output_root: String,
    #[serde(default = "default_dataagg_rel")]
    pub dataagg_rel: String,
}

fn default_primary_key() -> String {
    "side".to_string()
}

fn default_encoding_policy() -> Vec<String> {
    vec![
        "utf-8".to_string(),
        "utf-8-sig".to_string(),
        "cp1252".to_string(),
    ]
}

/// Environment configuration: where data lives, which job-context taxonomy
/// applies, and who may read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentProfile {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    pub name: String,
    pub source: SourceType,
    pub roots: DataRoots,
    #[serde(default)]
    pub job_contexts: Vec<JobContext>,
    #[serde(default = "default_primary_key")]
    pub primary_job_context_key: String,
    #[serde(default = "default_encoding_policy")]
    pub encoding_policy: Vec<String>,
    #[serde(default)]
    pub access_roles: Vec<String>,
}

impl EnvironmentProfile {
    pub fn primary_context(&self) -> Option<&JobContext> {
        self.job_contexts
            .iter()
            .find(|c| c.key == self.primary_job_context_key)
    }

    pub fn context_by_key(&self, key: &str) -> Option<&JobContext> {
        self.job_contexts.iter().find(|c| c.key == key)
    }

    /// Load from a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }
}
