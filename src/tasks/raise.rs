// ABOUTME: Raise task faulting with an inline or workflow-level error definition
// ABOUTME: Every error field may be an expression evaluated against the task input

use async_trait::async_trait;
use serde_json::Value;
use std::sync::OnceLock;

use crate::engine::error::{ErrorType, ExecutionError, Result, TaskError};
use crate::engine::executor::{TaskBehavior, TaskExecutor};
use crate::parser::task::RaiseDefinition;
use crate::parser::{ErrorDefinition, ErrorReference};

pub struct RaiseTask {
    definition: RaiseDefinition,
    error: OnceLock<ErrorDefinition>,
}

impl RaiseTask {
    pub fn new(definition: RaiseDefinition) -> Self {
        Self {
            definition,
            error: OnceLock::new(),
        }
    }

    async fn evaluate_text(
        executor: &TaskExecutor,
        text: &str,
        input: &Value,
    ) -> Result<String> {
        let value = executor
            .evaluate(&Value::String(text.to_string()), input)
            .await?;
        Ok(match value {
            Value::String(text) => text,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    async fn build_error(
        &self,
        executor: &TaskExecutor,
        definition: &ErrorDefinition,
    ) -> Result<TaskError> {
        let input = executor.input().await;

        let raw_type = Self::evaluate_text(executor, &definition.type_, &input).await?;
        let kind = ErrorType::from_type(&raw_type);
        let type_ = match kind {
            Some(kind) if !raw_type.contains('/') => kind.uri(),
            _ => raw_type,
        };

        let status = match executor.evaluate(&definition.status, &input).await? {
            Value::Number(number) => number.as_u64().map(|n| n as u16),
            Value::String(text) => text.trim().parse::<u16>().ok(),
            _ => None,
        }
        .or_else(|| kind.map(|kind| kind.default_status()))
        .unwrap_or(500);

        let title = match &definition.title {
            Some(title) => Self::evaluate_text(executor, title, &input).await?,
            None => kind
                .map(|kind| kind.title().to_string())
                .unwrap_or_else(|| type_.clone()),
        };
        let detail = match &definition.detail {
            Some(detail) => Some(Self::evaluate_text(executor, detail, &input).await?),
            None => None,
        };
        let instance = match &definition.instance {
            Some(instance) => Self::evaluate_text(executor, instance, &input).await?,
            None => executor.path().to_string(),
        };

        Ok(TaskError {
            type_,
            status,
            title,
            detail,
            instance: Some(instance),
        })
    }
}

#[async_trait]
impl TaskBehavior for RaiseTask {
    async fn initialize(&self, executor: &TaskExecutor) -> Result<()> {
        let error = match &self.definition.error {
            ErrorReference::Inline(error) => error.clone(),
            ErrorReference::Named(name) => executor
                .services()
                .workflow
                .error(name)
                .cloned()
                .ok_or_else(|| {
                    ExecutionError::configuration(
                        executor.path(),
                        format!("no error named '{}' is declared in use.errors", name),
                    )
                })?,
        };
        self.error
            .set(error)
            .map_err(|_| super::already_initialized(executor.path()))?;
        Ok(())
    }

    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        let Some(definition) = self.error.get() else {
            return Err(ExecutionError::configuration(
                executor.path(),
                "raise task was not initialized",
            ));
        };
        let error = self.build_error(executor, definition).await?;
        executor.set_error(error).await
    }
}
