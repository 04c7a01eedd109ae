//! Frozen plan artifacts.
//!
//! The plan builder turns a derived-requirements manifest, a mapping
//! manifest, and an environment profile into an immutable artifact triple:
//! a lookup (filesystem roots + per-partition folders), a request graph
//! (sorted, deduped partitions), and a manifest of SHA-1 digests over
//! canonical serializations. Equal logical inputs always produce
//! byte-identical hashes.

pub mod artifacts;
pub mod builder;
pub mod canonical;
pub mod models;

pub use artifacts::{Lookup, PlanArtifacts, PlanManifest, RequestGraph, RequestGraphPartition};
pub use builder::PlanBuilder;
pub use canonical::{canonical_json, sha1_hex_of};
pub use models::{
    AggregationType, ContextMapping, DataRoots, DerivedRequirementsManifest, EnvironmentProfile,
    JobContext, MappingManifest, MappingSourceType, MetricMapping, RequiredContext,
    RequiredMetric, SourceType,
};
