//! Profile execution.
//!
//! One extraction pass: governance pre-flight, access check, audit start,
//! file filtering, then per file load -> context -> per-table strategy ->
//! per-table transforms -> accumulate. Per-file and per-table failures are
//! logged and skipped; governance, access, and timeout failures abort the
//! pass. Contexts are returned beside the tables, never merged into them.

use crate::context::ContextExtractor;
use crate::discovery::FileMeta;
use crate::file_filter;
use crate::jsonpath;
use crate::output::{apply_image_context, apply_run_context};
use crate::population;
use crate::strategies;
use crate::transform::TransformPipeline;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};
use trellis_adapters::{create_default_registry, AdapterRegistry};
use trellis_frame::Frame;
use trellis_profile::Profile;
use trellis_protocol::{EngineError, ReadOptions, SchemaProbeResult};

/// Everything one extraction pass produced. Tables and contexts stay
/// separate; merge helpers are explicit.
#[derive(Debug, Default)]
pub struct ExtractionResult {
    pub tables: BTreeMap<String, Frame>,
    pub run_context: BTreeMap<String, JsonValue>,
    /// image_id -> context values
    pub image_contexts: BTreeMap<String, BTreeMap<String, JsonValue>>,
    /// file path -> resolved context
    pub file_contexts: BTreeMap<String, BTreeMap<String, JsonValue>>,
    pub validation_warnings: Vec<String>,
}

impl ExtractionResult {
    /// Copy of the tables with run-context columns added. `table_ids`
    /// restricts which tables are returned.
    pub fn apply_run_context(&self, table_ids: Option<&[String]>) -> BTreeMap<String, Frame> {
        self.tables
            .iter()
            .filter(|(id, _)| {
                table_ids
                    .map(|ids| ids.iter().any(|t| t == *id))
                    .unwrap_or(true)
            })
            .map(|(id, frame)| {
                (
                    id.clone(),
                    apply_run_context(frame.clone(), &self.run_context, None),
                )
            })
            .collect()
    }

    /// Copy of the tables with contexts applied per the toggles.
    pub fn tables_with_context(
        &self,
        include_run_context: bool,
        include_image_context: bool,
    ) -> BTreeMap<String, Frame> {
        self.tables
            .iter()
            .map(|(id, frame)| {
                let mut frame = frame.clone();
                if include_run_context {
                    frame = apply_run_context(frame, &self.run_context, None);
                }
                if include_image_context {
                    frame = apply_image_context(frame, &self.image_contexts, None);
                }
                (id.clone(), frame)
            })
            .collect()
    }
}

pub struct ProfileExecutor {
    registry: AdapterRegistry,
    caller_roles: Vec<String>,
}

impl Default for ProfileExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileExecutor {
    pub fn new() -> Self {
        Self {
            registry: create_default_registry(),
            caller_roles: vec!["all".to_string()],
        }
    }

    pub fn with_registry(registry: AdapterRegistry) -> Self {
        Self {
            registry,
            caller_roles: vec!["all".to_string()],
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.caller_roles = roles;
        self
    }

    /// Execute a full extraction pass over the candidate files.
    pub async fn execute(
        &self,
        profile: &Profile,
        files: &[FileMeta],
        user_overrides: Option<&BTreeMap<String, JsonValue>>,
        selected_tables: Option<&[String]>,
    ) -> Result<ExtractionResult, EngineError> {
        self.check_governance_limits(profile, files)?;
        self.check_read_access(profile)?;

        let audit = profile
            .governance
            .as_ref()
            .and_then(|g| g.audit.as_ref())
            .map(|a| a.log_access)
            .unwrap_or(false);
        if audit {
            info!(
                profile_id = profile.profile_id(),
                files = files.len(),
                roles = ?self.caller_roles,
                "AUDIT: profile extraction started"
            );
        }

        let filter = profile.datasource.filters.as_ref();
        let selected_files = file_filter::filter_files(files, filter);
        if selected_files.len() < files.len() {
            info!(
                before = files.len(),
                after = selected_files.len(),
                "file filter applied"
            );
        }

        let mut result = ExtractionResult::default();
        let extractor = ContextExtractor::new();
        let pipeline = TransformPipeline::for_profile(profile);
        let parse_timeout =
            Duration::from_secs(profile.governance_limits().parse_timeout_seconds);

        for file in selected_files {
            // Per-file failures drop the file, never the batch.
            let content = match timeout(parse_timeout, self.load_file(file, profile)).await {
                Ok(Ok(content)) => content,
                Ok(Err(e)) => {
                    error!(file = %file.path.display(), error = %e, "could not load file");
                    result
                        .validation_warnings
                        .push(format!("Could not load {}: {}", file.path.display(), e));
                    continue;
                }
                Err(_) => {
                    return Err(EngineError::TimeoutExceeded(format!(
                        "parsing {} exceeded {}s",
                        file.path.display(),
                        parse_timeout.as_secs()
                    )));
                }
            };

            let outcome =
                match extractor.extract(profile, &file.path, Some(&content), user_overrides) {
                    Ok(outcome) => outcome,
                    Err(e @ EngineError::RequiredPatternMissing { .. }) => return Err(e),
                    Err(e) => {
                        error!(file = %file.path.display(), error = %e, "context resolution failed");
                        continue;
                    }
                };
            result.validation_warnings.extend(outcome.warnings.clone());
            if outcome.skip_file {
                continue;
            }

            if result.run_context.is_empty() {
                result.run_context = outcome.context.clone();
            }
            result
                .file_contexts
                .insert(file.path.display().to_string(), outcome.context.clone());
            self.collect_image_contexts(profile, &content, &mut result);

            for (_level, table) in profile.all_tables() {
                if let Some(selected) = selected_tables {
                    if !selected.iter().any(|t| t == &table.id) {
                        continue;
                    }
                }

                let mut frame =
                    strategies::extract_table(&content, &table.select, &outcome.context);
                if frame.is_empty() {
                    continue;
                }

                if !table.column_transforms.is_empty() {
                    frame = pipeline.apply_column_transforms(frame, &table.column_transforms);
                }

                match result.tables.remove(&table.id) {
                    Some(existing) => {
                        result.tables.insert(
                            table.id.clone(),
                            Frame::concat_diagonal(&[existing, frame]),
                        );
                    }
                    None => {
                        result.tables.insert(table.id.clone(), frame);
                    }
                }
            }
        }

        self.finalize_tables(profile, &pipeline, &mut result);

        if audit {
            let total_rows: usize = result.tables.values().map(Frame::height).sum();
            info!(
                profile_id = profile.profile_id(),
                tables = result.tables.len(),
                rows = total_rows,
                "AUDIT: profile extraction completed"
            );
        }
        Ok(result)
    }

    /// Probe a file's schema under the profile's preview timeout.
    pub async fn probe_file(
        &self,
        profile: &Profile,
        path: &Path,
    ) -> Result<SchemaProbeResult, EngineError> {
        let adapter = self.registry.select_for(path, None)?;
        let preview_timeout =
            Duration::from_secs(profile.governance_limits().preview_timeout_seconds);
        match timeout(
            preview_timeout,
            adapter.probe_schema(path, &ReadOptions::default()),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(EngineError::TimeoutExceeded(format!(
                "schema probe of {} exceeded {}s",
                path.display(),
                preview_timeout.as_secs()
            ))),
        }
    }

    fn check_governance_limits(
        &self,
        profile: &Profile,
        files: &[FileMeta],
    ) -> Result<(), EngineError> {
        let Some(limits) = profile.governance.as_ref().and_then(|g| g.limits.as_ref()) else {
            return Ok(());
        };
        let mut violations = Vec::new();

        if files.len() > limits.max_files_per_run {
            violations.push(format!(
                "File count {} exceeds limit {}",
                files.len(),
                limits.max_files_per_run
            ));
        }

        let max_file_bytes = limits.max_file_size_mb * 1024 * 1024;
        for file in files {
            if file.size > max_file_bytes {
                violations.push(format!(
                    "File {} ({:.1}MB) exceeds limit {}MB",
                    file.filename(),
                    file.size as f64 / (1024.0 * 1024.0),
                    limits.max_file_size_mb
                ));
            }
        }

        let total: u64 = files.iter().map(|f| f.size).sum();
        let max_total = limits.max_total_size_gb * 1024 * 1024 * 1024;
        if total > max_total {
            violations.push(format!(
                "Total size {:.2}GB exceeds limit {}GB",
                total as f64 / (1024.0 * 1024.0 * 1024.0),
                limits.max_total_size_gb
            ));
        }

        let table_count = profile.all_tables().len();
        let max_tables = limits.max_tables_per_level * profile.levels.len().max(1);
        if table_count > max_tables {
            violations.push(format!(
                "Table count {} exceeds limit {}",
                table_count, max_tables
            ));
        }

        if violations.is_empty() {
            Ok(())
        } else {
            for violation in &violations {
                error!("Governance limit violation: {}", violation);
            }
            Err(EngineError::GovernanceLimitExceeded { violations })
        }
    }

    fn check_read_access(&self, profile: &Profile) -> Result<(), EngineError> {
        let Some(access) = profile.governance.as_ref().and_then(|g| g.access.as_ref()) else {
            return Ok(());
        };
        if access.read.iter().any(|r| r == "all") {
            return Ok(());
        }
        if self.caller_roles.iter().any(|r| access.read.contains(r)) {
            return Ok(());
        }
        Err(EngineError::AccessDenied(format!(
            "Action 'read' requires one of {:?}, caller has {:?}",
            access.read, self.caller_roles
        )))
    }

    /// Load a file's content as JSON: JSON documents parse natively, tabular
    /// formats load through their adapter and wrap as `{"data": rows}`.
    async fn load_file(&self, file: &FileMeta, profile: &Profile) -> Result<JsonValue, EngineError> {
        let declared = profile.datasource.format.to_lowercase();
        let adapter = match self.registry.get(&declared) {
            Ok(adapter) => {
                let ext = file.extension();
                let handles_ext = adapter
                    .metadata()
                    .file_extensions
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(&ext));
                if handles_ext {
                    adapter
                } else {
                    // Declared format does not match this file; fall back to
                    // extension inference.
                    self.registry.select_for(&file.path, None)?
                }
            }
            Err(_) => self.registry.select_for(&file.path, None)?,
        };

        if adapter.metadata().adapter_id == "json" {
            let path = file.path.clone();
            let value = tokio::task::spawn_blocking(move || -> Result<JsonValue, EngineError> {
                let bytes = std::fs::read(&path)?;
                serde_json::from_slice(&bytes)
                    .map_err(|e| EngineError::Profile(format!("invalid JSON: {}", e)))
            })
            .await
            .map_err(|e| EngineError::Profile(format!("load task failed: {}", e)))??;
            return Ok(value);
        }

        let options = self.read_options_for(profile, adapter.metadata().adapter_id.as_str());
        let (frame, _) = adapter.read_dataframe(&file.path, &options).await?;
        let rows: Vec<JsonValue> = frame
            .to_json_rows()
            .into_iter()
            .map(JsonValue::Object)
            .collect();
        Ok(serde_json::json!({ "data": rows }))
    }

    /// Map datasource options onto adapter read options.
    fn read_options_for(&self, profile: &Profile, adapter_id: &str) -> ReadOptions {
        let mut options = ReadOptions::default();
        if let Some(section) = profile.datasource.options.get(adapter_id) {
            if let Some(map) = section.as_object() {
                for (key, value) in map {
                    match key.as_str() {
                        "skip_rows" => {
                            options.skip_rows =
                                value.as_u64().map(|v| v as usize).unwrap_or(0);
                        }
                        "null_values" => {
                            options.null_values = value
                                .as_array()
                                .map(|arr| {
                                    arr.iter()
                                        .filter_map(|v| v.as_str().map(str::to_string))
                                        .collect()
                                })
                                .unwrap_or_default();
                        }
                        other => {
                            options.extra.insert(other.to_string(), value.clone());
                        }
                    }
                }
            }
        }
        options
    }

    /// Pull image-level contexts out of the parsed content per the
    /// profile's image context configs.
    fn collect_image_contexts(
        &self,
        profile: &Profile,
        content: &JsonValue,
        result: &mut ExtractionResult,
    ) {
        for config in profile.contexts.iter().filter(|c| c.level == "image") {
            let id_key = config
                .primary_keys
                .first()
                .map(String::as_str)
                .unwrap_or("image_id");
            for path in &config.paths {
                let Some(value) = jsonpath::evaluate(content, path) else {
                    continue;
                };
                let items: Vec<&serde_json::Map<String, JsonValue>> = match &value {
                    JsonValue::Array(items) => items.iter().filter_map(|v| v.as_object()).collect(),
                    JsonValue::Object(obj) => vec![obj],
                    _ => continue,
                };
                for item in items {
                    let Some(id) = item.get(id_key).map(|v| match v {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    }) else {
                        warn!(key = id_key, "image context entry missing its id");
                        continue;
                    };
                    let mut ctx = BTreeMap::new();
                    if config.key_map.is_empty() {
                        for (k, v) in item {
                            if !v.is_object() && !v.is_array() {
                                ctx.insert(k.clone(), v.clone());
                            }
                        }
                    } else {
                        for (target, source) in &config.key_map {
                            let source_path = source.strip_prefix("$.").unwrap_or(source);
                            if let Some(v) =
                                jsonpath::evaluate(&JsonValue::Object(item.clone()), source_path)
                            {
                                ctx.insert(target.clone(), v);
                            }
                        }
                    }
                    result.image_contexts.insert(id, ctx);
                }
            }
        }
    }

    /// Post-accumulation pipeline per table: profile normalization, type
    /// coercion, renames, PII masking, calculated columns, then the
    /// population strategy.
    fn finalize_tables(
        &self,
        profile: &Profile,
        pipeline: &TransformPipeline,
        result: &mut ExtractionResult,
    ) {
        let pii: Vec<String> = profile
            .governance
            .as_ref()
            .and_then(|g| g.compliance.as_ref())
            .map(|c| {
                let mut columns = c.pii_columns.clone();
                for extra in &c.mask_in_preview {
                    if !columns.contains(extra) {
                        columns.push(extra.clone());
                    }
                }
                columns
            })
            .unwrap_or_default();
        let (mask_char, preserve_length) = profile
            .governance
            .as_ref()
            .and_then(|g| g.compliance.as_ref())
            .map(|c| (c.mask_char.chars().next().unwrap_or('*'), c.preserve_length))
            .unwrap_or(('*', true));

        let strategy_name = profile.population.default_strategy.clone();
        let strategy_config = profile
            .population
            .strategies
            .get(&strategy_name)
            .cloned()
            .unwrap_or(JsonValue::Null);

        let table_ids: Vec<String> = result.tables.keys().cloned().collect();
        for table_id in table_ids {
            let Some(frame) = result.tables.remove(&table_id) else {
                continue;
            };
            let mut frame = pipeline.apply_normalization(frame, profile);
            if !profile.type_coercion.is_empty() {
                frame = pipeline.apply_type_coercion(frame, &profile.type_coercion);
            }
            if !profile.column_renames.is_empty() {
                frame = pipeline.apply_column_renames(frame, &profile.column_renames);
            }
            if !pii.is_empty() {
                frame = pipeline.apply_pii_masking(frame, &pii, mask_char, preserve_length);
            }
            if !profile.calculated_columns.is_empty() {
                frame = pipeline.apply_calculated_columns(frame, &profile.calculated_columns);
            }
            if strategy_name != "all" {
                frame = population::apply_strategy(frame, &strategy_name, &strategy_config);
            }
            result.tables.insert(table_id, frame);
        }
    }
}
