// ABOUTME: Call task dispatching to a registered protocol handler or a workflow-level function
// ABOUTME: Functions run as a child task so they are suspended and resumed like any other task

use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::engine::error::{ExecutionError, Result, TaskError};
use crate::engine::executor::{ChildRun, TaskBehavior, TaskExecutor, TaskOutcome};
use crate::parser::{CallDefinition, TaskDefinition};
use crate::tasks::CallHandler;

const FUNCTION_SEGMENT: &str = "function";

enum CallTarget {
    Handler(Arc<dyn CallHandler>),
    Function(Arc<TaskDefinition>),
}

pub struct CallTask {
    definition: CallDefinition,
    target: OnceLock<CallTarget>,
}

impl CallTask {
    pub fn new(definition: CallDefinition) -> Self {
        Self {
            definition,
            target: OnceLock::new(),
        }
    }

    async fn call_handler(
        &self,
        executor: &TaskExecutor,
        handler: &Arc<dyn CallHandler>,
    ) -> Result<()> {
        let input = executor.input().await;
        let arguments = executor.evaluate(&self.definition.with, &input).await?;

        let _permit = executor.services().scheduler.acquire().await?;
        debug!(
            "Task {} calling '{}' handler",
            executor.path(),
            self.definition.call
        );
        match handler.call(&arguments, &input).await {
            Ok(output) => {
                executor
                    .set_result(output, executor.definition().then_directive())
                    .await
            }
            Err(error) => executor.set_error(error).await,
        }
    }

    async fn call_function(
        &self,
        executor: &TaskExecutor,
        function: &Arc<TaskDefinition>,
    ) -> Result<()> {
        let run = match executor.sub_tasks().await?.into_iter().last() {
            Some(instance) => {
                executor
                    .resume_child(instance, Arc::clone(function))
                    .await?
            }
            None => {
                let input = executor.input().await;
                let arguments = executor.evaluate(&self.definition.with, &input).await?;
                let function_input = if arguments.is_null() { input } else { arguments };
                info!(
                    "Task {} invoking function '{}'",
                    executor.path(),
                    self.definition.call
                );
                let child = executor
                    .create_child(
                        &self.definition.call,
                        Arc::clone(function),
                        FUNCTION_SEGMENT,
                        &function_input,
                        executor.context().await,
                        false,
                    )
                    .await?;
                executor.run_child(&child).await?
            }
        };
        self.finish(executor, run).await
    }

    async fn finish(&self, executor: &TaskExecutor, run: ChildRun) -> Result<()> {
        match run.outcome {
            TaskOutcome::Completed { output, .. } | TaskOutcome::Skipped { output, .. } => {
                executor.set_context_data(run.context_data).await;
                executor
                    .set_result(output, executor.definition().then_directive())
                    .await
            }
            TaskOutcome::Faulted(error) => executor.set_error(error).await,
            TaskOutcome::Cancelled => executor.child_cancelled().await,
        }
    }
}

#[async_trait]
impl TaskBehavior for CallTask {
    async fn initialize(&self, executor: &TaskExecutor) -> Result<()> {
        let services = executor.services();
        let name = &self.definition.call;
        let target = if let Some(handler) = services.calls.get(name) {
            CallTarget::Handler(handler)
        } else if let Some(function) = services.workflow.function(name) {
            CallTarget::Function(Arc::clone(function))
        } else {
            return Err(TaskError::validation(format!(
                "no call handler or function named '{}' is available",
                name
            ))
            .into());
        };
        self.target
            .set(target)
            .map_err(|_| super::already_initialized(executor.path()))?;
        Ok(())
    }

    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        match self.target.get() {
            Some(CallTarget::Handler(handler)) => self.call_handler(executor, handler).await,
            Some(CallTarget::Function(function)) => self.call_function(executor, function).await,
            None => Err(ExecutionError::configuration(
                executor.path(),
                "call task was not initialized",
            )),
        }
    }
}

