//! Declarative extraction profiles.
//!
//! A profile is the single source of truth for what to extract from a
//! datasource, how to partition and transform it, and which governance rules
//! apply. Profiles load from YAML, are validated structurally once, and are
//! never mutated by the engine.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_profile, load_profile_from_str, ProfileError};
pub use model::*;
pub use validate::{validate_profile, ProfileValidationResult};
