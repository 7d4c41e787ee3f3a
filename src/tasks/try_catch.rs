// ABOUTME: Error-catching composite with optional retry policy and catch handler
// ABOUTME: Retries run as new sibling instances so every attempt stays on record

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::engine::error::{Result, TaskError};
use crate::engine::executor::{ChildRun, TaskBehavior, TaskExecutor, TaskOutcome};
use crate::engine::instance::TaskInstance;
use crate::engine::scheduler::RetryPolicy;
use crate::parser::{ErrorFilter, FlowDirective, TaskDefinition, TryDefinition};

const BODY_SEGMENT: &str = "try";
const HANDLER_SEGMENT: &str = "catch/do";

pub struct TryTask {
    definition: TryDefinition,
    body: Arc<TaskDefinition>,
    handler: Option<Arc<TaskDefinition>>,
}

/// Whether the filter's declared fields all match the error.
pub fn filter_matches(filter: &ErrorFilter, error: &TaskError) -> bool {
    if let Some(type_) = &filter.type_ {
        let matches = error.type_ == *type_ || error.type_.ends_with(&format!("/{}", type_));
        if !matches {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if error.status != status {
            return false;
        }
    }
    let title = Some(error.title.clone());
    let fields = [
        (&filter.instance, &error.instance),
        (&filter.title, &title),
        (&filter.detail, &error.detail),
    ];
    let matches = fields
        .into_iter()
        .all(|(expected, actual)| expected.is_none() || expected == actual);
    matches
}

impl TryTask {
    pub fn new(definition: TryDefinition) -> Self {
        let body = Arc::new(TaskDefinition::sequence(definition.try_.clone()));
        let handler = definition
            .catch
            .do_
            .as_ref()
            .map(|tasks| Arc::new(TaskDefinition::sequence(tasks.clone())));
        Self {
            definition,
            body,
            handler,
        }
    }

    fn error_bindings(&self, error: &TaskError) -> Map<String, Value> {
        let mut bindings = Map::new();
        bindings.insert(
            self.definition.catch.error_variable().to_string(),
            serde_json::to_value(error).unwrap_or(Value::Null),
        );
        bindings
    }

    async fn guards_pass(
        &self,
        executor: &TaskExecutor,
        when: Option<&String>,
        except_when: Option<&String>,
        bindings: &Map<String, Value>,
    ) -> Result<bool> {
        let input = executor.input().await;
        if let Some(condition) = when {
            if !executor
                .evaluate_condition(condition, &input, Some(bindings))
                .await?
            {
                return Ok(false);
            }
        }
        if let Some(condition) = except_when {
            if executor
                .evaluate_condition(condition, &input, Some(bindings))
                .await?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn catches(&self, executor: &TaskExecutor, error: &TaskError) -> Result<bool> {
        let catch = &self.definition.catch;
        if let Some(filter) = &catch.errors {
            if !filter_matches(&filter.with, error) {
                return Ok(false);
            }
        }
        let bindings = self.error_bindings(error);
        self.guards_pass(
            executor,
            catch.when.as_ref(),
            catch.except_when.as_ref(),
            &bindings,
        )
        .await
    }

    /// The retry policy to apply to `error`, if any.
    async fn retry_policy(
        &self,
        executor: &TaskExecutor,
        error: &TaskError,
    ) -> Result<Option<RetryPolicy>> {
        let Some(definition) = &self.definition.catch.retry else {
            return Ok(None);
        };
        let bindings = self.error_bindings(error);
        let applies = self
            .guards_pass(
                executor,
                definition.when.as_ref(),
                definition.except_when.as_ref(),
                &bindings,
            )
            .await?;
        if !applies {
            return Ok(None);
        }
        let cap = executor.services().scheduler.max_retry_delay();
        Ok(Some(RetryPolicy::from_definition(definition, cap)))
    }

    async fn wait_for_retry(&self, executor: &TaskExecutor, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        debug!("Task {} retrying in {:?}", executor.path(), delay);
        tokio::select! {
            _ = executor.cancellation().cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    async fn run_handler(&self, executor: &TaskExecutor, error: &TaskError) -> Result<()> {
        let Some(handler) = &self.handler else {
            return Ok(());
        };
        info!("Task {} handling caught error: {}", executor.path(), error);
        let input = executor.input().await;
        let mut context = executor.context().await;
        context.arguments.extend(self.error_bindings(error));
        let child = executor
            .create_child(
                "catch",
                Arc::clone(handler),
                HANDLER_SEGMENT,
                &input,
                context,
                false,
            )
            .await?;
        let run = executor.run_child(&child).await?;
        self.finish_handler(executor, run).await
    }

    async fn finish_handler(&self, executor: &TaskExecutor, run: ChildRun) -> Result<()> {
        match run.outcome {
            TaskOutcome::Completed { output, next } | TaskOutcome::Skipped { output, next } => {
                executor.set_context_data(run.context_data).await;
                executor.set_result(output, self.continuation(executor, next)).await
            }
            TaskOutcome::Faulted(error) => executor.set_error(error).await,
            TaskOutcome::Cancelled => executor.child_cancelled().await,
        }
    }

    fn continuation(&self, executor: &TaskExecutor, next: FlowDirective) -> FlowDirective {
        if next == FlowDirective::End {
            FlowDirective::End
        } else {
            executor.definition().then_directive()
        }
    }

    fn first_fault_age(instance: &TaskInstance) -> Duration {
        instance
            .retries
            .first()
            .map(|attempt| (Utc::now() - attempt.at).to_std().unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskBehavior for TryTask {
    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        let input = executor.input().await;
        let context = executor.context().await;
        let sub_tasks = executor.sub_tasks().await?;

        let mut run = match sub_tasks.last() {
            Some(last) if last.path.ends_with(HANDLER_SEGMENT) => {
                let Some(handler) = &self.handler else {
                    return Ok(());
                };
                let run = executor
                    .resume_child(last.clone(), Arc::clone(handler))
                    .await?;
                return self.finish_handler(executor, run).await;
            }
            Some(last) => {
                executor
                    .resume_child(last.clone(), Arc::clone(&self.body))
                    .await?
            }
            None => {
                let child = executor
                    .create_child(
                        "try",
                        Arc::clone(&self.body),
                        BODY_SEGMENT,
                        &input,
                        context.clone(),
                        false,
                    )
                    .await?;
                executor.run_child(&child).await?
            }
        };

        loop {
            let error = match run.outcome {
                TaskOutcome::Completed { output, next } | TaskOutcome::Skipped { output, next } => {
                    executor.set_context_data(run.context_data).await;
                    return executor
                        .set_result(output, self.continuation(executor, next))
                        .await;
                }
                TaskOutcome::Cancelled => return executor.child_cancelled().await,
                TaskOutcome::Faulted(error) => error,
            };

            if !self.catches(executor, &error).await? {
                debug!("Task {} does not catch: {}", executor.path(), error);
                return executor.set_error(error).await;
            }

            if let Some(policy) = self.retry_policy(executor, &error).await? {
                let instance = executor.instance().await;
                let attempts = instance.retries.len() as u32;
                if policy.allows(attempts, Self::first_fault_age(&instance)) {
                    executor.retry(error.clone()).await?;
                    self.wait_for_retry(executor, policy.calculate_delay(attempts))
                        .await;
                    executor.mark_running().await?;

                    let child = executor
                        .create_child(
                            "retry",
                            Arc::clone(&self.body),
                            &format!("retry/{}", attempts),
                            &input,
                            context.clone(),
                            false,
                        )
                        .await?;
                    run = executor.run_child(&child).await?;
                    continue;
                }
                info!(
                    "Task {} exhausted its retries after {} attempts",
                    executor.path(),
                    attempts
                );
                if self.handler.is_none() {
                    return executor.set_error(error).await;
                }
            }

            if self.handler.is_some() {
                return self.run_handler(executor, &error).await;
            }
            return executor
                .set_result(Value::Null, executor.definition().then_directive())
                .await;
        }
    }
}
