// ABOUTME: Bounded iteration running its body once per item of a collection captured at initialization
// ABOUTME: Binds the item and its index as arguments and stops on end, exit, fault or a false while guard

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::engine::context::ExecutionContext;
use crate::engine::error::{ExecutionError, Result, TaskError};
use crate::engine::executor::{ChildRun, TaskBehavior, TaskExecutor, TaskOutcome};
use crate::parser::{FlowDirective, ForDefinition, TaskDefinition};

pub struct ForTask {
    definition: ForDefinition,
    body: Arc<TaskDefinition>,
    items: OnceLock<Vec<Value>>,
}

enum Step {
    Next(Value),
    Done,
}

impl ForTask {
    pub fn new(definition: ForDefinition) -> Self {
        let body = Arc::new(TaskDefinition::loop_body(definition.do_.clone()));
        Self {
            definition,
            body,
            items: OnceLock::new(),
        }
    }

    fn bindings(&self, index: usize, item: &Value) -> Map<String, Value> {
        let mut bindings = Map::new();
        bindings.insert(self.definition.for_.each.clone(), item.clone());
        bindings.insert(self.definition.for_.at.clone(), Value::from(index));
        bindings
    }

    async fn advance(&self, executor: &TaskExecutor, run: ChildRun) -> Result<Step> {
        let (output, next) = match run.outcome {
            TaskOutcome::Completed { output, next } | TaskOutcome::Skipped { output, next } => {
                (output, next)
            }
            TaskOutcome::Faulted(error) => {
                executor.set_error(error).await?;
                return Ok(Step::Done);
            }
            TaskOutcome::Cancelled => {
                executor.child_cancelled().await?;
                return Ok(Step::Done);
            }
        };
        executor.set_context_data(run.context_data).await;

        match next {
            FlowDirective::Continue => Ok(Step::Next(output)),
            FlowDirective::End => {
                executor.set_result(output, FlowDirective::End).await?;
                Ok(Step::Done)
            }
            FlowDirective::Exit => {
                executor
                    .set_result(output, executor.definition().then_directive())
                    .await?;
                Ok(Step::Done)
            }
            FlowDirective::Goto(_) => {
                executor
                    .set_error(TaskError::configuration(
                        "cannot continue at a named task from within a loop",
                    ))
                    .await?;
                Ok(Step::Done)
            }
        }
    }
}

#[async_trait]
impl TaskBehavior for ForTask {
    async fn initialize(&self, executor: &TaskExecutor) -> Result<()> {
        let input = executor.input().await;
        let collection = executor
            .evaluate(&Value::String(self.definition.for_.in_.clone()), &input)
            .await?;
        let items = match collection {
            Value::Null => Vec::new(),
            Value::Array(items) => items,
            other => {
                return Err(ExecutionError::configuration(
                    executor.path(),
                    format!("'for.in' must evaluate to an array, got {}", other),
                ))
            }
        };
        debug!("Task {} iterates over {} items", executor.path(), items.len());
        self.items
            .set(items)
            .map_err(|_| super::already_initialized(executor.path()))?;
        Ok(())
    }

    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        let items = self.items.get().cloned().unwrap_or_default();
        let mut output = executor.input().await;
        let sub_tasks = executor.sub_tasks().await?;

        let mut index = 0;
        if let Some(last) = sub_tasks.last() {
            index = sub_tasks.len() - 1;
            let run = executor
                .resume_child(last.clone(), Arc::clone(&self.body))
                .await?;
            match self.advance(executor, run).await? {
                Step::Next(next) => {
                    output = next;
                    index += 1;
                }
                Step::Done => return Ok(()),
            }
        }

        while let Some(item) = items.get(index) {
            let bindings = self.bindings(index, item);
            if let Some(condition) = &self.definition.while_ {
                if !executor
                    .evaluate_condition(condition, &output, Some(&bindings))
                    .await?
                {
                    debug!("Task {} stops before item {}", executor.path(), index);
                    break;
                }
            }

            let mut context: ExecutionContext = executor.context().await;
            context.arguments.extend(bindings);
            let child = executor
                .create_child(
                    "do",
                    Arc::clone(&self.body),
                    &format!("for/{}/do", index),
                    &output,
                    context,
                    false,
                )
                .await?;

            let run = executor.run_child(&child).await?;
            match self.advance(executor, run).await? {
                Step::Next(next) => {
                    output = next;
                    index += 1;
                }
                Step::Done => return Ok(()),
            }
        }

        executor
            .set_result(output, executor.definition().then_directive())
            .await
    }
}
