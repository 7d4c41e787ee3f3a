// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides workflow builders, a temp environment and stub call and process collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs;

use skein::engine::{TaskError, WorkflowResult, WorkflowStatus};
use skein::parser::Workflow;
use skein::tasks::{CallHandler, ProcessResult, ProcessRunner};

/// Builds workflow YAML from named task snippets.
pub struct TestWorkflowBuilder {
    name: String,
    version: String,
    errors: Vec<(String, String)>,
    functions: Vec<(String, String)>,
    tasks: Vec<(String, String)>,
}

impl TestWorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            errors: Vec::new(),
            functions: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// `body` is the YAML of the task definition, without the task name.
    pub fn with_task(mut self, name: &str, body: &str) -> Self {
        self.tasks.push((name.to_string(), body.to_string()));
        self
    }

    pub fn with_error(mut self, name: &str, body: &str) -> Self {
        self.errors.push((name.to_string(), body.to_string()));
        self
    }

    pub fn with_function(mut self, name: &str, body: &str) -> Self {
        self.functions.push((name.to_string(), body.to_string()));
        self
    }

    pub fn add_set_task(self, name: &str, value: &str) -> Self {
        let body = format!("set: {}", value);
        self.with_task(name, &body)
    }

    pub fn to_yaml(&self) -> String {
        let mut yaml = format!(
            "document:\n  name: {}\n  version: {}\n  namespace: test\n",
            self.name, self.version
        );

        if !self.errors.is_empty() || !self.functions.is_empty() {
            yaml.push_str("use:\n");
            if !self.errors.is_empty() {
                yaml.push_str("  errors:\n");
                for (name, body) in &self.errors {
                    yaml.push_str(&format!("    {}:\n{}", name, indent(body, 6)));
                }
            }
            if !self.functions.is_empty() {
                yaml.push_str("  functions:\n");
                for (name, body) in &self.functions {
                    yaml.push_str(&format!("    {}:\n{}", name, indent(body, 6)));
                }
            }
        }

        yaml.push_str("do:\n");
        for (name, body) in &self.tasks {
            yaml.push_str(&format!("  - {}:\n{}", name, indent(body, 6)));
        }
        yaml
    }

    pub fn build(&self) -> Workflow {
        Workflow::from_yaml(&self.to_yaml()).expect("test workflow should parse")
    }

    pub async fn write_to_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        fs::write(path, self.to_yaml()).await?;
        Ok(())
    }
}

fn indent(body: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    body.trim_matches('\n')
        .lines()
        .map(|line| format!("{}{}\n", pad, line))
        .collect()
}

pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn workflow_file(&self, name: &str) -> PathBuf {
        self.path().join(format!("{}.yaml", name))
    }

    pub fn output_file(&self, name: &str) -> PathBuf {
        self.path().join(format!("{}_output.json", name))
    }

    pub async fn create_workflow_file(&self, name: &str, builder: &TestWorkflowBuilder) -> PathBuf {
        let workflow_file = self.workflow_file(name);
        builder
            .write_to_file(&workflow_file)
            .await
            .expect("Failed to write workflow file");
        workflow_file
    }
}

/// Call handler that records its arguments and echoes them back.
#[derive(Default)]
pub struct RecordingCallHandler {
    pub calls: Mutex<Vec<Value>>,
    delay: Duration,
    failures: AtomicUsize,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl RecordingCallHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails the first `count` calls with a 503 communication error.
    pub fn failing(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CallHandler for RecordingCallHandler {
    async fn call(&self, arguments: &Value, _input: &Value) -> Result<Value, TaskError> {
        self.calls.lock().unwrap().push(arguments.clone());

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TaskError::communication("service unavailable").with_status(503));
        }
        Ok(arguments.clone())
    }
}

/// Process runner returning a fixed result and recording each configuration.
pub struct StubProcessRunner {
    result: ProcessResult,
    pub runs: Mutex<Vec<Value>>,
}

impl StubProcessRunner {
    pub fn new(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            result: ProcessResult {
                code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl ProcessRunner for StubProcessRunner {
    async fn run(&self, process: &Value, _input: &Value) -> Result<ProcessResult, TaskError> {
        self.runs.lock().unwrap().push(process.clone());
        Ok(self.result.clone())
    }
}

pub fn task_status(result: &WorkflowResult, path: &str) -> Option<String> {
    result
        .get_task_result(path)
        .map(|task| task.status.to_string())
}

pub fn assert_completed(result: &WorkflowResult) {
    assert_eq!(
        result.status,
        WorkflowStatus::Completed,
        "workflow did not complete: {:?}",
        result.error
    );
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

pub async fn read_json_output(
    file_path: &Path,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(file_path).await?;
    let json: serde_json::Value = serde_json::from_str(&content)?;
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_builder() {
        let builder = TestWorkflowBuilder::new("test_workflow")
            .add_set_task("first", "1")
            .with_task("second", "set:\n  value: 2\nthen: end");

        let yaml = builder.to_yaml();
        assert!(yaml.contains("name: test_workflow"));
        assert!(yaml.contains("  - first:\n      set: 1\n"));
        assert!(yaml.contains("      then: end\n"));

        let workflow = builder.build();
        assert_eq!(workflow.task_names(), vec!["first", "second"]);
    }

    #[test]
    fn test_environment_setup() {
        let env = TestEnvironment::new();
        assert!(env.path().exists());
        assert!(env
            .workflow_file("test")
            .to_string_lossy()
            .contains("test.yaml"));
    }
}
