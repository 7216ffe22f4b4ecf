//! Command handlers

use anyhow::{bail, Context, Result};
use flowstate_core::models::{
    EngineConfig, Metadata, ReportFormat, WorkflowPriority, WorkflowStatus,
};
use flowstate_core::workflow::WorkflowDocument;
use flowstate_core::{EngineError, WorkflowSystem};
use std::path::Path;

/// Options of the `run` command
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workflow: Option<String>,
    pub runs: usize,
    pub priority: WorkflowPriority,
    pub metadata: Metadata,
    pub format: ReportFormat,
    pub stats: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workflow: None,
            runs: 1,
            priority: WorkflowPriority::Normal,
            metadata: Metadata::new(),
            format: ReportFormat::Json,
            stats: false,
        }
    }
}

/// Load the engine configuration from `path` or the default location
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => EngineConfig::default_config_path()?,
    };

    let config = EngineConfig::load_from_file(&path)
        .with_context(|| format!("Failed to load config: {}", path.display()))?;
    if let Err(errors) = config.validate() {
        bail!(
            "Invalid configuration in {}:\n  {}",
            path.display(),
            errors.join("\n  ")
        );
    }
    Ok(config)
}

/// Handle the run command. Returns the rendered reports.
pub async fn run_document(
    config: EngineConfig,
    file: &Path,
    options: &RunOptions,
) -> Result<(Vec<String>, Vec<WorkflowStatus>)> {
    if options.runs == 0 {
        bail!("--runs must be at least 1");
    }

    let document = WorkflowDocument::from_file(file)?;
    let system = WorkflowSystem::new(config);
    document.register(&system)?;

    let validation = system.validate();
    for warning in &validation.warnings {
        tracing::warn!(workflow = %document.name, "{}", warning);
    }
    if !validation.is_valid() {
        let errors: Vec<String> = validation
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        bail!(
            "Workflow '{}' is invalid:\n  {}",
            document.name,
            errors.join("\n  ")
        );
    }

    let name = options.workflow.as_deref().unwrap_or(&document.name);
    let mut metadata = document.metadata.clone();
    metadata.extend(options.metadata.clone());

    system.start_system().await;

    let mut ids = Vec::with_capacity(options.runs);
    for _ in 0..options.runs {
        let id = system
            .create_workflow(name, &document.initial_state, options.priority, metadata.clone())
            .with_context(|| format!("Initial state '{}' is not registered", document.initial_state))?;
        if !system.start_workflow(id).await {
            bail!("Failed to start workflow {}", id);
        }
        ids.push(id);
    }

    let mut reports = Vec::with_capacity(ids.len() + 1);
    let mut statuses = Vec::with_capacity(ids.len());
    for id in ids {
        let run = system
            .wait_for_completion(id)
            .await
            .ok_or(EngineError::WorkflowNotFound(id))?;
        statuses.push(run.status);

        let report = system
            .export_workflow_report(id, options.format)
            .with_context(|| format!("Failed to render report for workflow {}", id))?;
        reports.push(report);
    }

    if options.stats {
        let stats = system
            .export_system_stats(options.format)
            .context("Failed to render system statistics")?;
        reports.push(stats);
    }

    system.stop_system().await;
    Ok((reports, statuses))
}

/// Handle run command
pub async fn handle_run(config: EngineConfig, file: &Path, options: RunOptions) -> Result<()> {
    let (reports, statuses) = run_document(config, file, &options).await?;

    for report in &reports {
        println!("{}", report.trim_end());
    }

    let unfinished = statuses
        .iter()
        .filter(|status| **status != WorkflowStatus::Completed)
        .count();
    if unfinished > 0 {
        bail!("{} of {} run(s) did not complete", unfinished, statuses.len());
    }
    Ok(())
}

/// Handle validate command
pub fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let document = WorkflowDocument::from_file(file)?;
    let system = WorkflowSystem::default();
    let registration = document.register(&system);
    let mut result = system.validate();
    if let Err(e) = registration {
        result.add_error("document", format!("{:#}", e));
    }

    if json {
        let json_output = serde_json::json!({
            "valid": result.is_valid(),
            "errors": result.errors,
            "warnings": result.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&json_output)?);
    } else {
        println!("Validating workflow: {}", document.name);
        println!("File: {}", file.display());
        println!();

        if result.is_valid() {
            println!("✓ Workflow is valid");
            println!();
            println!("Summary:");
            println!("  Name:            {}", document.name);
            if let Some(desc) = &document.description {
                println!("  Description:     {}", desc);
            }
            println!("  Initial state:   {}", document.initial_state);
            println!("  Total states:    {}", document.states.len());
            println!("  Transitions:     {}", document.transitions.len());
        } else {
            println!("✗ Workflow validation failed");
            println!();
            println!("Errors:");
            for error in &result.errors {
                println!("  ✗ {}: {}", error.field, error.message);
            }
        }

        if !result.warnings.is_empty() {
            println!();
            println!("Warnings:");
            for warning in &result.warnings {
                println!("  ⚠  {}", warning);
            }
        }
    }

    if !result.is_valid() {
        bail!("Workflow validation failed with {} error(s)", result.errors.len());
    }
    Ok(())
}

/// Handle config --init: write defaults, keeping existing values
pub fn handle_config_init(path: &Path) -> Result<()> {
    let config = if path.exists() {
        println!("Configuration file already exists. Keeping existing values...");
        EngineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load existing config: {}", path.display()))?
    } else {
        println!("Creating new configuration with defaults...");
        EngineConfig::default()
    };

    if let Err(errors) = config.validate() {
        bail!("Configuration is invalid:\n  {}", errors.join("\n  "));
    }

    config
        .save_to_file(path)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    println!("✓ Configuration saved to {}", path.display());
    Ok(())
}

/// Handle config without --init: print the effective configuration
pub fn handle_config_show(path: &Path) -> Result<()> {
    let config = EngineConfig::load_from_file(path)
        .with_context(|| format!("Failed to load config: {}", path.display()))?;

    println!("Config file: {}", path.display());
    if !path.exists() {
        println!("(not found, showing defaults)");
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
