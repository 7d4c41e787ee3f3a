// ABOUTME: Command implementations for the skein CLI
// ABOUTME: Handles execution of the run and validate commands

use anyhow::Result;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::args::Args;
use super::config::Config;
use crate::engine::{WorkflowEngine, WorkflowResult, WorkflowStatus};
use crate::parser::{WorkflowParser, WorkflowValidator};
use crate::tasks::HttpCallHandler;

/// How long detached processes may keep running once the workflow has finished.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RunOptions {
    pub workflow: PathBuf,
    pub input: Option<String>,
    pub input_file: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub max_concurrent: usize,
}

/// Builds an engine wired with the configured limits and HTTP client.
pub fn build_engine(config: &Config, max_concurrent: usize) -> WorkflowEngine {
    let http = HttpCallHandler::new(config.http.timeout(), config.http.user_agent.as_deref());
    WorkflowEngine::new()
        .with_call_handler("http", Arc::new(http))
        .with_max_concurrent_tasks(max_concurrent)
        .with_max_retry_delay(config.retry.max_delay())
}

async fn read_input(options: &RunOptions) -> Result<Value> {
    match &options.input_file {
        Some(path) => {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                anyhow::anyhow!("Failed to read input file '{}': {}", path.display(), e)
            })?;
            serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Invalid JSON in '{}': {}", path.display(), e))
        }
        None => Args::parse_input(options.input.as_deref()),
    }
}

/// Execute a workflow command
pub async fn run_workflow(options: RunOptions, config: &Config) -> Result<()> {
    info!("Starting workflow execution: {}", options.workflow.display());

    let input = read_input(&options).await?;
    let workflow = WorkflowParser::new()
        .parse_file(&options.workflow)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse workflow: {}", e))?;
    info!("Loaded workflow: {}", workflow.qualified_name());

    let engine = build_engine(config, options.max_concurrent);
    let result = engine
        .execute_workflow(workflow, input)
        .await
        .map_err(|e| anyhow::anyhow!("Workflow execution failed: {}", e))?;

    if let Err(e) = engine.scheduler().shutdown(SHUTDOWN_TIMEOUT).await {
        warn!("Detached processes did not finish: {}", e);
    }

    if let Some(output_path) = &options.output {
        let json_content = serde_json::to_string_pretty(&result)
            .map_err(|e| anyhow::anyhow!("Failed to serialize results to JSON: {}", e))?;
        tokio::fs::write(output_path, json_content).await.map_err(|e| {
            anyhow::anyhow!(
                "Failed to write output file '{}': {}",
                output_path.display(),
                e
            )
        })?;
        info!("Results written to: {}", output_path.display());
    } else {
        print_result(&result)?;
    }

    match result.status {
        WorkflowStatus::Completed => Ok(()),
        status => Err(anyhow::anyhow!(
            "Workflow execution finished with status: {}",
            status
        )),
    }
}

fn print_result(result: &WorkflowResult) -> Result<()> {
    println!(
        "Workflow '{}' ({}) finished with status: {}",
        result.workflow_name, result.instance_id, result.status
    );
    for task in &result.tasks {
        println!("  {} [{}]: {}", task.path, task.kind, task.status);
        if let Some(error) = &task.error {
            println!("    Error: {}", error);
        }
    }
    if let Some(output) = &result.output {
        println!("Output: {}", serde_json::to_string_pretty(output)?);
    }
    Ok(())
}

/// Validate a workflow file
pub async fn validate_workflow(
    workflow_path: PathBuf,
    strict: bool,
    _config: &Config,
) -> Result<()> {
    info!("Validating workflow: {}", workflow_path.display());

    let workflow = WorkflowParser::new()
        .parse_file(&workflow_path)
        .await
        .map_err(|e| anyhow::anyhow!("Workflow validation failed: {}", e))?;

    let report = WorkflowValidator::new()
        .with_strict_mode(strict)
        .validate(&workflow)
        .map_err(|e| anyhow::anyhow!("Workflow validation failed: {}", e))?;

    for warning in &report.warnings {
        warn!("{}", warning);
        println!("  warning: {}", warning);
    }
    if report.has_errors() {
        for error in &report.errors {
            println!("  error: {}", error);
        }
        return Err(anyhow::anyhow!(
            "Workflow '{}' has {} validation error(s)",
            workflow.document.name,
            report.errors.len()
        ));
    }

    println!("✓ Workflow '{}' is valid", workflow.qualified_name());
    println!("  Tasks: {}", workflow.task_names().len());
    println!("  Functions: {}", workflow.use_.functions.len());

    info!("Workflow validation completed successfully");
    Ok(())
}
