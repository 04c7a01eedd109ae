//! Profile data model.
//!
//! Field names and defaults mirror the YAML dialect: `meta`, `datasource`,
//! `population`, `context_defaults`, `contexts`, `levels`, `normalization`,
//! `outputs`, validation rule blocks, `governance`, and opaque `ui` hints.
//! Map-like blocks use `BTreeMap` so downstream artifacts iterate in a
//! stable order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trellis_frame::JoinHow;

fn default_true() -> bool {
    true
}

fn default_schema_version() -> String {
    "1.0.0".to_string()
}

fn default_on_validation_fail() -> String {
    "continue".to_string()
}

fn default_quarantine_table() -> String {
    "validation_failures".to_string()
}

fn default_version() -> u32 {
    1
}

// ============================================================================
// Profile root
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Monotonically increasing profile version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub meta: ProfileMeta,
    #[serde(default)]
    pub datasource: Datasource,
    #[serde(default)]
    pub population: Population,
    #[serde(default)]
    pub context_defaults: Option<ContextDefaults>,
    #[serde(default)]
    pub contexts: Vec<ContextConfig>,
    #[serde(default)]
    pub levels: Vec<LevelConfig>,
    #[serde(default)]
    pub normalization: Normalization,
    #[serde(default)]
    pub column_renames: BTreeMap<String, String>,
    #[serde(default)]
    pub calculated_columns: Vec<CalculatedColumn>,
    #[serde(default)]
    pub type_coercion: Vec<TypeCoercion>,
    #[serde(default)]
    pub row_filters: Vec<RowFilter>,
    #[serde(default)]
    pub outputs: Outputs,
    #[serde(default)]
    pub schema_rules: Option<SchemaRules>,
    #[serde(default)]
    pub row_rules: Vec<RowRule>,
    #[serde(default)]
    pub aggregate_rules: Vec<AggregateRule>,
    /// What happens to rows failing validation downstream; the engine only
    /// carries the declaration.
    #[serde(default = "default_on_validation_fail")]
    pub on_validation_fail: String,
    #[serde(default = "default_quarantine_table")]
    pub quarantine_table: String,
    #[serde(default)]
    pub governance: Option<Governance>,
    /// Presentation hints; carried opaquely, never interpreted by the engine.
    #[serde(default)]
    pub ui: Option<UiConfig>,
}

impl Profile {
    pub fn profile_id(&self) -> &str {
        &self.meta.profile_id
    }

    pub fn title(&self) -> &str {
        &self.meta.title
    }

    /// Every `(level_name, table)` pair in declaration order.
    pub fn all_tables(&self) -> Vec<(&str, &TableConfig)> {
        self.levels
            .iter()
            .flat_map(|level| level.tables.iter().map(move |t| (level.name.as_str(), t)))
            .collect()
    }

    pub fn table(&self, table_id: &str) -> Option<&TableConfig> {
        self.all_tables()
            .into_iter()
            .find(|(_, t)| t.id == table_id)
            .map(|(_, t)| t)
    }

    pub fn governance_limits(&self) -> GovernanceLimits {
        self.governance
            .as_ref()
            .and_then(|g| g.limits.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileMeta {
    #[serde(default)]
    pub profile_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_version")]
    pub revision: u32,
}

// ============================================================================
// Datasource & file filter
// ============================================================================

fn default_format() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datasource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    /// Declared source format; extension inference is the fallback.
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub filters: Option<FilterNode>,
    /// Format-specific options ("csv": {delimiter, ...}, "excel": {...}).
    #[serde(default)]
    pub options: serde_json::Value,
}

impl Default for Datasource {
    fn default() -> Self {
        Self {
            id: String::new(),
            label: String::new(),
            format: default_format(),
            filters: None,
            options: serde_json::Value::Null,
        }
    }
}

/// Predicate tree for candidate-file filtering.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group {
        op: GroupOp,
        #[serde(default)]
        children: Vec<FilterNode>,
    },
    Predicate(FilterPredicate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterPredicate {
    #[serde(default = "default_predicate_field")]
    pub field: PredicateField,
    #[serde(default = "default_predicate_op")]
    pub op: String,
    #[serde(default)]
    pub value: serde_json::Value,
    /// `in`/`not_in` read their operand list from here.
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
    #[serde(default = "default_case")]
    pub case: CaseSensitivity,
}

fn default_predicate_field() -> PredicateField {
    PredicateField::Filename
}

fn default_predicate_op() -> String {
    "equals".to_string()
}

fn default_case() -> CaseSensitivity {
    CaseSensitivity::Insensitive
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateField {
    Filename,
    Extension,
    Path,
    FullPath,
    Size,
    ModifiedDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseSensitivity {
    Sensitive,
    Insensitive,
}

// The YAML dialect tags nodes with `type: group` / `type: predicate` but
// omitting the tag historically meant "predicate". Deserialize through an
// intermediate shape so both spellings load.
impl<'de> Deserialize<'de> for FilterNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawNode {
            #[serde(default, rename = "type")]
            node_type: Option<String>,
            #[serde(default)]
            op: Option<String>,
            #[serde(default)]
            children: Option<Vec<FilterNode>>,
            #[serde(default)]
            field: Option<PredicateField>,
            #[serde(default)]
            value: Option<serde_json::Value>,
            #[serde(default)]
            values: Option<Vec<serde_json::Value>>,
            #[serde(default)]
            case: Option<CaseSensitivity>,
        }

        let raw = RawNode::deserialize(deserializer)?;
        let is_group = match raw.node_type.as_deref() {
            Some("group") => true,
            Some("predicate") => false,
            _ => raw.children.is_some(),
        };

        if is_group {
            let op = match raw.op.as_deref().map(str::to_uppercase).as_deref() {
                Some("OR") => GroupOp::Or,
                Some("NOT") => GroupOp::Not,
                _ => GroupOp::And,
            };
            Ok(FilterNode::Group {
                op,
                children: raw.children.unwrap_or_default(),
            })
        } else {
            Ok(FilterNode::Predicate(FilterPredicate {
                field: raw.field.unwrap_or_else(default_predicate_field),
                op: raw.op.unwrap_or_else(default_predicate_op),
                value: raw.value.unwrap_or(serde_json::Value::Null),
                values: raw.values.unwrap_or_default(),
                case: raw.case.unwrap_or_else(default_case),
            }))
        }
    }
}

// ============================================================================
// Population
// ============================================================================

fn default_population_strategy() -> String {
    "all".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Population {
    #[serde(default = "default_population_strategy")]
    pub default_strategy: String,
    /// Named strategy configurations, interpreted by the engine.
    #[serde(default)]
    pub strategies: BTreeMap<String, serde_json::Value>,
}

impl Default for Population {
    fn default() -> Self {
        Self {
            default_strategy: default_population_strategy(),
            strategies: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Context resolution
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    #[default]
    Warn,
    Error,
    SkipFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegexScope {
    #[default]
    Filename,
    Path,
    FullPath,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexPattern {
    pub field: String,
    pub pattern: String,
    #[serde(default)]
    pub scope: RegexScope,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default)]
    pub transform_args: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub on_fail: OnFail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPattern {
    pub field: String,
    /// JSONPath into the parsed file content.
    pub path: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub on_fail: OnFail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextDefaults {
    #[serde(default)]
    pub defaults: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub regex_patterns: Vec<RegexPattern>,
    #[serde(default)]
    pub content_patterns: Vec<ContentPattern>,
    /// Only these keys accept user overrides; everything else is dropped.
    #[serde(default)]
    pub allow_user_override: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub name: String,
    /// Level this context attaches to ("run", "image", ...).
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub key_map: BTreeMap<String, String>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub time_fields: Vec<String>,
}

// ============================================================================
// Levels, tables, selection strategies
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelConfig {
    pub name: String,
    #[serde(default)]
    pub apply_context: String,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StableColumnsMode {
    #[default]
    Warn,
    Error,
    Ignore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub select: SelectConfig,
    #[serde(default)]
    pub stable_columns: Vec<String>,
    #[serde(default)]
    pub stable_columns_mode: StableColumnsMode,
    #[serde(default = "default_true")]
    pub stable_columns_subset: bool,
    #[serde(default)]
    pub validation_constraints: Vec<ValueConstraint>,
    #[serde(default)]
    pub column_transforms: Vec<ColumnTransform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    FlatObject,
    HeadersData,
    ArrayOfObjects,
    Unpivot,
    Join,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlatObject => "flat_object",
            Self::HeadersData => "headers_data",
            Self::ArrayOfObjects => "array_of_objects",
            Self::Unpivot => "unpivot",
            Self::Join => "join",
        }
    }
}

fn default_path() -> String {
    "$".to_string()
}

fn default_separator() -> String {
    "_".to_string()
}

fn default_var_name() -> String {
    "variable".to_string()
}

fn default_value_name() -> String {
    "value".to_string()
}

/// Strategy-tagged selection contract for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_path")]
    pub path: String,
    // headers_data
    #[serde(default)]
    pub headers_key: Option<String>,
    #[serde(default)]
    pub data_key: Option<String>,
    #[serde(default)]
    pub infer_headers: bool,
    #[serde(default)]
    pub default_headers: Option<Vec<String>>,
    // flat_object / array_of_objects
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub flatten_nested: bool,
    #[serde(default = "default_separator")]
    pub flatten_separator: String,
    // unpivot
    #[serde(default)]
    pub id_vars: Option<Vec<String>>,
    #[serde(default)]
    pub value_vars: Option<Vec<String>>,
    #[serde(default = "default_var_name")]
    pub var_name: String,
    #[serde(default = "default_value_name")]
    pub value_name: String,
    // join
    #[serde(default)]
    pub left: Option<JoinSide>,
    #[serde(default)]
    pub right: Option<JoinSide>,
    #[serde(default)]
    pub how: JoinHow,
    // composite iteration
    #[serde(default)]
    pub repeat_over: Option<RepeatOver>,
}

impl Default for SelectConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            path: default_path(),
            headers_key: None,
            data_key: None,
            infer_headers: false,
            default_headers: None,
            fields: None,
            flatten_nested: false,
            flatten_separator: default_separator(),
            id_vars: None,
            value_vars: None,
            var_name: default_var_name(),
            value_name: default_value_name(),
            left: None,
            right: None,
            how: JoinHow::default(),
            repeat_over: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSide {
    pub path: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatOver {
    /// JSONPath to the array to iterate over.
    pub path: String,
    /// Variable substituted into the base path as `{var}`.
    #[serde(rename = "as", alias = "as_var")]
    pub as_var: String,
    /// Parent-element fields injected into every extracted row.
    #[serde(default)]
    pub inject_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueConstraint {
    pub column: String,
    #[serde(rename = "type")]
    pub constraint_type: ConstraintType,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    Range,
    NotNull,
    Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnTransform {
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
    pub transform: String,
    #[serde(default)]
    pub args: BTreeMap<String, serde_json::Value>,
}

impl ColumnTransform {
    pub fn target_column(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.source)
    }
}

// ============================================================================
// Normalization & transform declarations
// ============================================================================

fn default_units_policy() -> String {
    "preserve".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalization {
    /// String values replaced with null before any typing.
    #[serde(default)]
    pub nan_values: Vec<String>,
    #[serde(default = "default_units_policy")]
    pub units_policy: String,
    /// unit -> {canonical, factor}; merged over the built-in length table.
    #[serde(default)]
    pub unit_mappings: BTreeMap<String, UnitMapping>,
    /// column -> source unit, consumed by `units_policy: normalize`.
    #[serde(default)]
    pub column_units: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub numeric_coercion: bool,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            nan_values: Vec::new(),
            units_policy: default_units_policy(),
            unit_mappings: BTreeMap::new(),
            column_units: BTreeMap::new(),
            numeric_coercion: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitMapping {
    pub canonical: String,
    pub factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatedColumn {
    pub name: String,
    /// Restricted arithmetic over column refs and numeric literals.
    pub expression: String,
    #[serde(default)]
    pub round_to: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeCoercion {
    pub column: String,
    pub to_type: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub strip: bool,
    #[serde(default)]
    pub uppercase: bool,
    #[serde(default)]
    pub lowercase: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    #[serde(default = "default_predicate_op")]
    pub op: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub min: Option<serde_json::Value>,
    #[serde(default)]
    pub max: Option<serde_json::Value>,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
}

// ============================================================================
// Outputs
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outputs {
    #[serde(default)]
    pub defaults: Vec<OutputConfig>,
    #[serde(default, alias = "long_form_optional")]
    pub optional_outputs: Vec<OutputConfig>,
    #[serde(default)]
    pub aggregations: Vec<AggregationConfig>,
    #[serde(default)]
    pub joins: Vec<JoinOutputConfig>,
    #[serde(default)]
    pub file_naming: FileNaming,
}

fn default_output_format() -> String {
    "parquet".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub id: String,
    #[serde(default)]
    pub from_level: String,
    #[serde(default)]
    pub from_tables: Vec<String>,
    #[serde(default = "default_true")]
    pub include_context: bool,
    #[serde(default = "default_output_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub id: String,
    pub from_table: String,
    #[serde(default)]
    pub group_by: Vec<String>,
    /// column -> aggregation function name. Sorted map keeps output column
    /// order stable across runs.
    #[serde(default)]
    pub aggregations: BTreeMap<String, String>,
    #[serde(default)]
    pub output_table: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinOutputConfig {
    pub id: String,
    pub left_table: String,
    pub right_table: String,
    #[serde(default)]
    pub on: Vec<String>,
    #[serde(default)]
    pub how: JoinHow,
}

fn default_name_template() -> String {
    "{profile_id}_{timestamp}".to_string()
}

fn default_timestamp_format() -> String {
    "%Y%m%d_%H%M%S".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNaming {
    #[serde(default = "default_name_template")]
    pub template: String,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    #[serde(default = "default_true")]
    pub sanitize: bool,
}

impl Default for FileNaming {
    fn default() -> Self {
        Self {
            template: default_name_template(),
            timestamp_format: default_timestamp_format(),
            sanitize: true,
        }
    }
}

// ============================================================================
// Validation rule declarations
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaRules {
    #[serde(default)]
    pub required_columns: Vec<String>,
    #[serde(default)]
    pub column_types: BTreeMap<String, String>,
    #[serde(default)]
    pub unique_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRule {
    pub name: String,
    /// AND-joined comparisons, e.g. "cd > 0 AND depth <= 100".
    pub expression: String,
    #[serde(default)]
    pub on_fail: OnFail,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateRule {
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: AggregateRuleType,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub on_fail: OnFail,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateRuleType {
    RowCount,
    UniqueCount,
    NullRatio,
}

// ============================================================================
// Governance
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Governance {
    #[serde(default)]
    pub access: Option<GovernanceAccess>,
    #[serde(default)]
    pub audit: Option<GovernanceAudit>,
    #[serde(default)]
    pub compliance: Option<GovernanceCompliance>,
    #[serde(default)]
    pub limits: Option<GovernanceLimits>,
}

fn default_read_roles() -> Vec<String> {
    vec!["all".to_string()]
}

fn default_admin_roles() -> Vec<String> {
    vec!["admin".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceAccess {
    #[serde(default = "default_read_roles")]
    pub read: Vec<String>,
    #[serde(default = "default_admin_roles")]
    pub modify: Vec<String>,
    #[serde(default = "default_admin_roles")]
    pub delete: Vec<String>,
}

fn default_retention_days() -> u32 {
    365
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceAudit {
    #[serde(default = "default_true")]
    pub log_access: bool,
    #[serde(default = "default_true")]
    pub log_modifications: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_classification() -> String {
    "internal".to_string()
}

fn default_mask_char() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceCompliance {
    #[serde(default = "default_classification")]
    pub data_classification: String,
    #[serde(default)]
    pub pii_columns: Vec<String>,
    #[serde(default)]
    pub mask_in_preview: Vec<String>,
    #[serde(default = "default_mask_char")]
    pub mask_char: String,
    #[serde(default = "default_true")]
    pub preserve_length: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceLimits {
    #[serde(default = "GovernanceLimits::default_max_files")]
    pub max_files_per_run: usize,
    #[serde(default = "GovernanceLimits::default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "GovernanceLimits::default_max_total_size_gb")]
    pub max_total_size_gb: u64,
    #[serde(default = "GovernanceLimits::default_max_rows_output")]
    pub max_rows_output: usize,
    #[serde(default = "GovernanceLimits::default_max_tables_per_level")]
    pub max_tables_per_level: usize,
    #[serde(default = "GovernanceLimits::default_max_columns_per_table")]
    pub max_columns_per_table: usize,
    #[serde(default = "GovernanceLimits::default_parse_timeout")]
    pub parse_timeout_seconds: u64,
    #[serde(default = "GovernanceLimits::default_preview_timeout")]
    pub preview_timeout_seconds: u64,
}

impl GovernanceLimits {
    fn default_max_files() -> usize {
        1000
    }
    fn default_max_file_size_mb() -> u64 {
        500
    }
    fn default_max_total_size_gb() -> u64 {
        10
    }
    fn default_max_rows_output() -> usize {
        10_000_000
    }
    fn default_max_tables_per_level() -> usize {
        50
    }
    fn default_max_columns_per_table() -> usize {
        500
    }
    fn default_parse_timeout() -> u64 {
        3600
    }
    fn default_preview_timeout() -> u64 {
        30
    }
}

impl Default for GovernanceLimits {
    fn default() -> Self {
        Self {
            max_files_per_run: Self::default_max_files(),
            max_file_size_mb: Self::default_max_file_size_mb(),
            max_total_size_gb: Self::default_max_total_size_gb(),
            max_rows_output: Self::default_max_rows_output(),
            max_tables_per_level: Self::default_max_tables_per_level(),
            max_columns_per_table: Self::default_max_columns_per_table(),
            parse_timeout_seconds: Self::default_parse_timeout(),
            preview_timeout_seconds: Self::default_preview_timeout(),
        }
    }
}

// ============================================================================
// UI hints (opaque)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_true")]
    pub show_file_preview: bool,
    #[serde(default)]
    pub max_preview_files: Option<u32>,
    #[serde(default)]
    pub table_selection: Option<serde_json::Value>,
    #[serde(default)]
    pub preview: Option<serde_json::Value>,
    #[serde(default)]
    pub default_name_template: Option<String>,
    #[serde(default)]
    pub formats: Vec<String>,
}
