//! Central adapter registry.
//!
//! Adapters register once at startup; lookups go through three maps keyed by
//! adapter id, lowercased dot-prefixed extension, and lowercased MIME type.
//! A MIME hint always takes precedence over extension inference.

use crate::csv_adapter::CsvAdapter;
use crate::excel_adapter::ExcelAdapter;
use crate::json_adapter::JsonAdapter;
use crate::parquet_adapter::ParquetAdapter;
use crate::{AdapterResult, FileAdapter};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use trellis_protocol::{AdapterError, AdapterErrorCode, AdapterMetadata};

/// One registry entry, serializable for diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryEntry {
    pub adapter_id: String,
    pub metadata: AdapterMetadata,
    pub registered_at: DateTime<Utc>,
    pub is_builtin: bool,
}

/// Snapshot of registry state for diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryState {
    pub adapters: Vec<RegistryEntry>,
    pub extension_map: HashMap<String, String>,
    pub mime_map: HashMap<String, String>,
}

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn FileAdapter>>,
    extension_map: HashMap<String, String>,
    mime_map: HashMap<String, String>,
    registered_at: HashMap<String, DateTime<Utc>>,
    builtin: HashMap<String, bool>,
}

fn normalize_extension(ext: &str) -> String {
    let lower = ext.to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, populating the extension and MIME maps from its
    /// metadata. Fails when the id is already taken.
    pub fn register(
        &mut self,
        adapter: Arc<dyn FileAdapter>,
        is_builtin: bool,
    ) -> AdapterResult<()> {
        let meta = adapter.metadata().clone();
        let adapter_id = meta.adapter_id.clone();

        if self.adapters.contains_key(&adapter_id) {
            return Err(AdapterError::new(
                AdapterErrorCode::DuplicateAdapter,
                format!(
                    "Adapter '{}' is already registered. Use a different adapter_id \
                     or unregister the existing adapter first.",
                    adapter_id
                ),
            )
            .with_adapter(adapter_id));
        }

        for ext in &meta.file_extensions {
            self.extension_map
                .insert(normalize_extension(ext), adapter_id.clone());
        }
        for mime in &meta.mime_types {
            self.mime_map.insert(mime.to_lowercase(), adapter_id.clone());
        }
        self.registered_at.insert(adapter_id.clone(), Utc::now());
        self.builtin.insert(adapter_id.clone(), is_builtin);
        self.adapters.insert(adapter_id, adapter);
        Ok(())
    }

    /// Remove an adapter and every extension/MIME mapping that points to it.
    pub fn unregister(&mut self, adapter_id: &str) -> AdapterResult<()> {
        let adapter = self.adapters.remove(adapter_id).ok_or_else(|| {
            AdapterError::new(
                AdapterErrorCode::AdapterNotFound,
                format!("Adapter '{}' is not registered", adapter_id),
            )
            .with_adapter(adapter_id)
        })?;

        let meta = adapter.metadata();
        for ext in &meta.file_extensions {
            let key = normalize_extension(ext);
            if self.extension_map.get(&key).map(String::as_str) == Some(adapter_id) {
                self.extension_map.remove(&key);
            }
        }
        for mime in &meta.mime_types {
            let key = mime.to_lowercase();
            if self.mime_map.get(&key).map(String::as_str) == Some(adapter_id) {
                self.mime_map.remove(&key);
            }
        }
        self.registered_at.remove(adapter_id);
        self.builtin.remove(adapter_id);
        Ok(())
    }

    /// Look up an adapter by id.
    pub fn get(&self, adapter_id: &str) -> AdapterResult<Arc<dyn FileAdapter>> {
        self.adapters.get(adapter_id).cloned().ok_or_else(|| {
            let mut available: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
            available.sort_unstable();
            AdapterError::new(
                AdapterErrorCode::AdapterNotFound,
                format!(
                    "No adapter found with ID '{}'. Available adapters: {}",
                    adapter_id,
                    if available.is_empty() {
                        "none".to_string()
                    } else {
                        available.join(", ")
                    }
                ),
            )
            .with_adapter(adapter_id)
        })
    }

    /// Auto-select an adapter for a file. A MIME hint wins over extension
    /// inference.
    pub fn select_for(
        &self,
        path: &Path,
        mime_hint: Option<&str>,
    ) -> AdapterResult<Arc<dyn FileAdapter>> {
        if let Some(mime) = mime_hint {
            if let Some(id) = self.mime_map.get(&mime.to_lowercase()) {
                return Ok(self.adapters[id].clone());
            }
        }

        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        if let Some(id) = self.extension_map.get(&ext) {
            return Ok(self.adapters[id].clone());
        }

        let mut supported: Vec<&str> = self.extension_map.keys().map(String::as_str).collect();
        supported.sort_unstable();
        Err(AdapterError::new(
            AdapterErrorCode::AdapterNotFound,
            format!(
                "No adapter found for file '{}' (extension: '{}'). Supported extensions: {}",
                path.display(),
                ext,
                if supported.is_empty() {
                    "none".to_string()
                } else {
                    supported.join(", ")
                }
            ),
        )
        .with_path(path.display().to_string()))
    }

    pub fn list_adapters(&self) -> Vec<AdapterMetadata> {
        let mut metas: Vec<AdapterMetadata> = self
            .adapters
            .values()
            .map(|a| a.metadata().clone())
            .collect();
        metas.sort_by(|a, b| a.adapter_id.cmp(&b.adapter_id));
        metas
    }

    /// Serializable snapshot for diagnostics.
    pub fn state(&self) -> RegistryState {
        let mut entries: Vec<RegistryEntry> = self
            .adapters
            .iter()
            .map(|(id, adapter)| RegistryEntry {
                adapter_id: id.clone(),
                metadata: adapter.metadata().clone(),
                registered_at: self.registered_at[id],
                is_builtin: self.builtin.get(id).copied().unwrap_or(false),
            })
            .collect();
        entries.sort_by(|a, b| a.adapter_id.cmp(&b.adapter_id));
        RegistryState {
            adapters: entries,
            extension_map: self.extension_map.clone(),
            mime_map: self.mime_map.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn contains(&self, adapter_id: &str) -> bool {
        self.adapters.contains_key(adapter_id)
    }
}

/// Build a registry with the built-in adapters installed, in declaration
/// order: CSV, Excel, JSON, Parquet.
pub fn create_default_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    // Unwraps are safe: the registry starts empty and built-in ids are unique.
    registry
        .register(Arc::new(CsvAdapter::new()), true)
        .expect("builtin csv adapter");
    registry
        .register(Arc::new(ExcelAdapter::new()), true)
        .expect("builtin excel adapter");
    registry
        .register(Arc::new(JsonAdapter::new()), true)
        .expect("builtin json adapter");
    registry
        .register(Arc::new(ParquetAdapter::new()), true)
        .expect("builtin parquet adapter");
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_registry_has_four_adapters() {
        let registry = create_default_registry();
        assert_eq!(registry.len(), 4);
        for id in ["csv", "excel", "json", "parquet"] {
            assert!(registry.contains(id), "missing adapter {}", id);
        }
    }

    #[test]
    fn test_select_by_extension() {
        let registry = create_default_registry();
        let adapter = registry
            .select_for(&PathBuf::from("data.CSV"), None)
            .unwrap();
        assert_eq!(adapter.metadata().adapter_id, "csv");
        let adapter = registry
            .select_for(&PathBuf::from("wafer.parquet"), None)
            .unwrap();
        assert_eq!(adapter.metadata().adapter_id, "parquet");
    }

    #[test]
    fn test_mime_hint_beats_extension() {
        let registry = create_default_registry();
        let adapter = registry
            .select_for(&PathBuf::from("data.bin"), Some("application/json"))
            .unwrap();
        assert_eq!(adapter.metadata().adapter_id, "json");
    }

    #[test]
    fn test_unknown_extension_lists_supported() {
        let registry = create_default_registry();
        let err = registry
            .select_for(&PathBuf::from("data.unknown"), None)
            .unwrap_err();
        assert_eq!(err.code, AdapterErrorCode::AdapterNotFound);
        assert!(err.message.contains(".csv"));
        assert!(err.message.contains(".parquet"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = create_default_registry();
        let err = registry
            .register(Arc::new(CsvAdapter::new()), false)
            .unwrap_err();
        assert_eq!(err.code, AdapterErrorCode::DuplicateAdapter);
    }

    #[test]
    fn test_unregister_removes_mappings() {
        let mut registry = create_default_registry();
        registry.unregister("csv").unwrap();
        assert!(!registry.contains("csv"));
        assert!(registry.select_for(&PathBuf::from("a.csv"), None).is_err());
        // TSV mapping was owned by csv too
        assert!(registry.select_for(&PathBuf::from("a.tsv"), None).is_err());
    }
}
