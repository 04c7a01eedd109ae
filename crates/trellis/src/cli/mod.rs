//! CLI commands: probe, validate, extract, plan.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use std::path::PathBuf;
use tracing::info;
use trellis_engine::{
    discover_files, ContextOptions, FileMeta, OutputBuilder, ProfileExecutor, ValidationEngine,
};
use trellis_plan::{
    DerivedRequirementsManifest, EnvironmentProfile, MappingManifest, PlanBuilder,
};
use trellis_profile::load_profile;
use trellis_protocol::ValidationSeverity;
use uuid::Uuid;

/// Outcome of a command for exit-code purposes.
pub enum ExitStatus {
    Success,
    /// An error-severity finding occurred; exit non-zero.
    Failure,
}

#[derive(Parser)]
#[command(name = "trellis", about = "Profile-driven tabular extraction engine")]
pub struct Cli {
    /// Verbose console output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Probe a file's schema without reading all data
    Probe {
        /// File to probe
        file: PathBuf,
    },
    /// Run pre-read validation checks on a file
    Validate {
        /// File to validate
        file: PathBuf,
    },
    /// Execute a profile over a set of files and write outputs
    Extract {
        /// Profile YAML path
        #[arg(short, long)]
        profile: PathBuf,
        /// Input files
        files: Vec<PathBuf>,
        /// Discover candidate files under this directory (in addition to
        /// any explicit files)
        #[arg(long)]
        source_dir: Option<PathBuf>,
        /// Restrict extraction to these table ids
        #[arg(short, long = "table")]
        tables: Vec<String>,
        /// Restrict outputs to these output ids
        #[arg(short, long = "output")]
        outputs: Vec<String>,
        /// Directory for output files
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,
        /// Output format: parquet, csv, or xlsx
        #[arg(long, default_value = "parquet")]
        format: String,
        /// Add image-level context columns to outputs
        #[arg(long)]
        include_image_context: bool,
    },
    /// Build frozen plan artifacts from plan inputs
    Plan {
        /// Environment profile YAML path
        #[arg(long)]
        environment: PathBuf,
        /// Derived requirements manifest JSON path
        #[arg(long)]
        drm: PathBuf,
        /// Mapping manifest JSON path
        #[arg(long)]
        mappings: PathBuf,
        /// Project id (random when omitted)
        #[arg(long)]
        project_id: Option<Uuid>,
        /// Directory for the artifact files
        #[arg(long, default_value = "plan")]
        out_dir: PathBuf,
    },
}

pub async fn run(cli: Cli) -> Result<ExitStatus> {
    match cli.command {
        Command::Probe { file } => probe(file).await,
        Command::Validate { file } => validate(file).await,
        Command::Extract {
            profile,
            files,
            source_dir,
            tables,
            outputs,
            out_dir,
            format,
            include_image_context,
        } => {
            extract(
                profile,
                files,
                source_dir,
                tables,
                outputs,
                out_dir,
                format,
                include_image_context,
            )
            .await
        }
        Command::Plan {
            environment,
            drm,
            mappings,
            project_id,
            out_dir,
        } => plan(environment, drm, mappings, project_id, out_dir),
    }
}

async fn probe(file: PathBuf) -> Result<ExitStatus> {
    let registry = trellis_adapters::create_default_registry();
    let adapter = registry.select_for(&file, None)?;
    let result = adapter
        .probe_schema(&file, &Default::default())
        .await
        .context("schema probe failed")?;

    println!(
        "{} ({} bytes, adapter: {})",
        result.file_path, result.file_size_bytes, result.adapter_id
    );
    println!(
        "rows: {}{}  encoding: {}  delimiter: {:?}",
        result
            .row_count_estimate
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string()),
        if result.row_count_exact { " (exact)" } else { " (estimate)" },
        result.encoding_detected.as_deref().unwrap_or("-"),
        result.delimiter_detected.as_deref().unwrap_or("-"),
    );
    if let Some(sheets) = &result.sheets {
        let names: Vec<&str> = sheets.iter().map(|s| s.sheet_name.as_str()).collect();
        println!("sheets: {}", names.join(", "));
    }

    let mut table = Table::new();
    table.set_header(vec!["#", "column", "type", "nullable", "nulls"]);
    for column in &result.columns {
        table.add_row(vec![
            column.position.to_string(),
            column.name.clone(),
            column.inferred_type.to_string(),
            column.nullable.to_string(),
            column.null_count.to_string(),
        ]);
    }
    println!("{table}");
    Ok(ExitStatus::Success)
}

async fn validate(file: PathBuf) -> Result<ExitStatus> {
    let registry = trellis_adapters::create_default_registry();
    let adapter = registry.select_for(&file, None)?;
    let result = adapter.validate_file(&file).await?;

    if result.issues.is_empty() {
        println!("{}: OK", result.file_path);
        return Ok(ExitStatus::Success);
    }
    for issue in &result.issues {
        println!(
            "[{}] {}: {}{}",
            issue.severity.as_str(),
            issue.code,
            issue.message,
            issue
                .suggestion
                .as_deref()
                .map(|s| format!(" ({})", s))
                .unwrap_or_default()
        );
    }
    if result
        .issues
        .iter()
        .any(|i| i.severity == ValidationSeverity::Error)
    {
        Ok(ExitStatus::Failure)
    } else {
        Ok(ExitStatus::Success)
    }
}

async fn extract(
    profile_path: PathBuf,
    files: Vec<PathBuf>,
    source_dir: Option<PathBuf>,
    tables: Vec<String>,
    outputs: Vec<String>,
    out_dir: PathBuf,
    format: String,
    include_image_context: bool,
) -> Result<ExitStatus> {
    let profile = load_profile(&profile_path)
        .with_context(|| format!("loading profile {}", profile_path.display()))?;

    let mut metas: Vec<FileMeta> = files.iter().map(|p| FileMeta::from_path(p)).collect();
    if let Some(root) = &source_dir {
        metas.extend(discover_files(root, None));
    }
    if metas.is_empty() {
        bail!("no input files: pass file paths or --source-dir");
    }

    let executor = ProfileExecutor::new();
    let selected_tables = if tables.is_empty() {
        None
    } else {
        Some(tables.as_slice())
    };
    let result = executor
        .execute(&profile, &metas, None, selected_tables)
        .await?;

    for warning in &result.validation_warnings {
        info!("{}", warning);
    }

    let summary = ValidationEngine::new().validate_extraction(&result.tables, &profile);
    for finding in summary
        .profile_errors
        .iter()
        .chain(summary.table_results.iter().flat_map(|r| r.errors.iter()))
    {
        eprintln!("[error] {} {}: {}", finding.table_id, finding.code, finding.message);
    }

    let options = ContextOptions {
        include_image_context,
        ..Default::default()
    };
    let selected_outputs = if outputs.is_empty() {
        None
    } else {
        Some(outputs.as_slice())
    };
    let builder = OutputBuilder::new();
    let built = builder.build_outputs(&result, &profile, &options, selected_outputs);

    for (output_id, frame) in &built {
        let filename = builder.output_filename(&profile, &result.run_context, output_id);
        let path = trellis_sinks::write_output(frame, &out_dir, &filename, &format)?;
        println!("{}: {} rows -> {}", output_id, frame.height(), path.display());
    }

    if summary.valid {
        Ok(ExitStatus::Success)
    } else {
        Ok(ExitStatus::Failure)
    }
}

fn plan(
    environment: PathBuf,
    drm: PathBuf,
    mappings: PathBuf,
    project_id: Option<Uuid>,
    out_dir: PathBuf,
) -> Result<ExitStatus> {
    let environment_text = std::fs::read_to_string(&environment)
        .with_context(|| format!("reading {}", environment.display()))?;
    let environment: EnvironmentProfile = EnvironmentProfile::from_yaml(&environment_text)
        .context("parsing environment profile")?;

    let drm_text =
        std::fs::read_to_string(&drm).with_context(|| format!("reading {}", drm.display()))?;
    let drm: DerivedRequirementsManifest =
        serde_json::from_str(&drm_text).context("parsing DRM")?;

    let mappings_text = std::fs::read_to_string(&mappings)
        .with_context(|| format!("reading {}", mappings.display()))?;
    let mappings: MappingManifest =
        serde_json::from_str(&mappings_text).context("parsing mapping manifest")?;

    let project_id = project_id.unwrap_or_else(Uuid::new_v4);
    let artifacts = PlanBuilder::new()
        .build_plan(&drm, &mappings, &environment, project_id)
        .context("building plan")?;
    trellis_sinks::write_plan_artifacts(&artifacts, &out_dir)?;

    println!("plan frozen at {}", artifacts.manifest.frozen_at);
    println!("  drm_sha1:           {}", artifacts.manifest.drm_sha1);
    println!("  mappings_sha1:      {}", artifacts.manifest.mappings_sha1);
    println!("  environment_sha1:   {}", artifacts.manifest.environment_sha1);
    println!("  lookup_sha1:        {}", artifacts.manifest.lookup_sha1);
    println!("  request_graph_sha1: {}", artifacts.manifest.request_graph_sha1);
    println!("  partitions:         {}", artifacts.request_graph.total_partitions);
    Ok(ExitStatus::Success)
}
