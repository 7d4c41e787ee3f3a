// ABOUTME: Run task executing an external process through the registered runner for its kind
// ABOUTME: Maps the process result onto the task output according to the declared return mode

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::engine::error::{ExecutionError, Result, TaskError};
use crate::engine::executor::{TaskBehavior, TaskExecutor};
use crate::parser::{ProcessReturnType, RunDefinition};
use crate::tasks::{ProcessResult, ProcessRunner};

pub struct RunTask {
    definition: RunDefinition,
    runner: OnceLock<Arc<dyn ProcessRunner>>,
}

/// Shapes a finished process into the task output.
pub fn process_output(result: &ProcessResult, mode: ProcessReturnType) -> Value {
    match mode {
        ProcessReturnType::Stdout => {
            let stdout = result.stdout.trim();
            serde_json::from_str(stdout).unwrap_or_else(|_| Value::String(stdout.to_string()))
        }
        ProcessReturnType::Stderr => Value::String(result.stderr.trim().to_string()),
        ProcessReturnType::Code => Value::from(result.code),
        ProcessReturnType::All => json!({
            "code": result.code,
            "stdout": result.stdout,
            "stderr": result.stderr,
        }),
        ProcessReturnType::None => Value::Null,
    }
}

impl RunTask {
    pub fn new(definition: RunDefinition) -> Self {
        Self {
            definition,
            runner: OnceLock::new(),
        }
    }
}

#[async_trait]
impl TaskBehavior for RunTask {
    async fn initialize(&self, executor: &TaskExecutor) -> Result<()> {
        let kind = self.definition.process;
        let runner = executor.services().processes.get(kind).ok_or_else(|| {
            TaskError::validation(format!("no process runner is registered for '{}'", kind))
        })?;
        self.runner
            .set(runner)
            .map_err(|_| super::already_initialized(executor.path()))?;
        Ok(())
    }

    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        let Some(runner) = self.runner.get().cloned() else {
            return Err(ExecutionError::configuration(
                executor.path(),
                "run task was not initialized",
            ));
        };
        let input = executor.input().await;
        let configuration = executor
            .evaluate(&self.definition.configuration, &input)
            .await?;
        let permit = executor.services().scheduler.acquire().await?;

        if !self.definition.await_ {
            let path = executor.path().to_string();
            let process_input = input.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match runner.run(&configuration, &process_input).await {
                    Ok(result) => {
                        debug!("Detached process of {} exited with {}", path, result.code)
                    }
                    Err(error) => warn!("Detached process of {} failed: {}", path, error),
                }
            });
            return executor
                .set_result(input, executor.definition().then_directive())
                .await;
        }

        let result = match runner.run(&configuration, &input).await {
            Ok(result) => result,
            Err(error) => return executor.set_error(error).await,
        };
        drop(permit);

        if !result.success() {
            let stderr = result.stderr.trim();
            let detail = if stderr.is_empty() {
                format!("process exited with code {}", result.code)
            } else {
                format!("process exited with code {}: {}", result.code, stderr)
            };
            return executor.set_error(TaskError::runtime(detail)).await;
        }
        info!(
            "Task {} ran {} process successfully",
            executor.path(),
            self.definition.process
        );

        executor
            .set_result(
                process_output(&result, self.definition.return_),
                executor.definition().then_directive(),
            )
            .await
    }
}
