//! Shared vocabulary for the Trellis extraction engine.
//!
//! This crate defines the types exchanged between the adapter layer, the
//! profile engine, and the plan builder: the canonical semantic data types,
//! the adapter error envelope, and the probe/read/stream metadata records.
//! It carries no I/O of its own.

pub mod error;
pub mod types;

pub use error::{AdapterError, AdapterErrorCode, EngineError};
pub use types::{
    AdapterCapabilities, AdapterMetadata, ColumnInfo, CompressionType, DataType,
    FileValidationResult, ReadOptions, ReadResult, SchemaProbeResult, SheetInfo, StreamChunk,
    StreamOptions, ValidationIssue, ValidationSeverity,
};
