//! File adapters for the Trellis engine.
//!
//! Each adapter implements the same four asynchronous operations over one
//! file format family:
//!
//! 1. `probe_schema` — discover columns/types in O(sample) time
//! 2. `read_dataframe` — eager load into a [`Frame`]
//! 3. `stream_dataframe` — finite chunked stream with bounded memory
//! 4. `validate_file` — cheap pre-read checks
//!
//! The [`AdapterRegistry`] maps adapter ids, file extensions, and MIME types
//! to adapter instances; `create_default_registry` installs the four built-in
//! adapters (CSV, Excel, JSON, Parquet).

pub mod csv_adapter;
pub mod detect;
pub mod excel_adapter;
pub mod infer;
pub mod json_adapter;
pub mod ooxml;
pub mod parquet_adapter;
pub mod registry;
pub mod stream;

use async_trait::async_trait;
use std::path::Path;
use trellis_frame::Frame;
use trellis_protocol::{
    AdapterError, AdapterMetadata, FileValidationResult, ReadOptions, ReadResult,
    SchemaProbeResult, StreamOptions,
};

pub use registry::{create_default_registry, AdapterRegistry};
pub use stream::FrameStream;

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// The four-operation adapter contract.
///
/// Adapters are stateless; all methods may suspend on I/O and run blocking
/// work on the runtime's blocking pool.
#[async_trait]
pub trait FileAdapter: Send + Sync + std::fmt::Debug {
    /// Static adapter description used by the registry.
    fn metadata(&self) -> &AdapterMetadata;

    /// Probe the file's schema without reading all data.
    async fn probe_schema(
        &self,
        path: &Path,
        options: &ReadOptions,
    ) -> AdapterResult<SchemaProbeResult>;

    /// Eagerly read the file into a frame.
    async fn read_dataframe(
        &self,
        path: &Path,
        options: &ReadOptions,
    ) -> AdapterResult<(Frame, ReadResult)>;

    /// Stream the file as chunks. Finite and non-restartable; dropping the
    /// returned stream closes the underlying reader.
    async fn stream_dataframe(
        &self,
        path: &Path,
        options: &StreamOptions,
    ) -> AdapterResult<FrameStream>;

    /// Cheap pre-read validation (existence, signature, encoding).
    async fn validate_file(&self, path: &Path) -> AdapterResult<FileValidationResult>;
}

/// Shared existence/emptiness gate used by probe, read, and stream before
/// touching a file. Returns the file size on success.
pub(crate) fn stat_file(path: &Path, adapter_id: &str) -> AdapterResult<u64> {
    if !path.exists() {
        return Err(AdapterError::file_not_found(&path.display().to_string())
            .with_adapter(adapter_id));
    }
    let meta = std::fs::metadata(path).map_err(|e| {
        AdapterError::new(
            trellis_protocol::AdapterErrorCode::Unknown,
            format!("Cannot stat file: {}", e),
        )
        .with_path(path.display().to_string())
        .with_adapter(adapter_id)
    })?;
    if meta.len() == 0 {
        return Err(AdapterError::new(
            trellis_protocol::AdapterErrorCode::EmptyFile,
            format!("File is empty: {}", path.display()),
        )
        .with_path(path.display().to_string())
        .with_adapter(adapter_id));
    }
    Ok(meta.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_protocol::AdapterErrorCode;

    #[test]
    fn test_stat_file_missing_and_empty() {
        let err = stat_file(Path::new("/does/not/exist.csv"), "csv").unwrap_err();
        assert_eq!(err.code, AdapterErrorCode::FileNotFound);

        let file = tempfile::NamedTempFile::new().unwrap();
        let err = stat_file(file.path(), "csv").unwrap_err();
        assert_eq!(err.code, AdapterErrorCode::EmptyFile);
    }
}
