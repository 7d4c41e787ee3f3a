// ABOUTME: Emit task publishing a CloudEvent built from templated attributes
// ABOUTME: Completes with the published event envelope as output

use async_trait::async_trait;
use serde_json::Map;
use tracing::info;

use crate::engine::error::{Result, TaskError};
use crate::engine::executor::{TaskBehavior, TaskExecutor};
use crate::events::CloudEvent;
use crate::parser::task::EmitDefinition;

pub struct EmitTask {
    definition: EmitDefinition,
}

impl EmitTask {
    pub fn new(definition: EmitDefinition) -> Self {
        Self { definition }
    }
}

#[async_trait]
impl TaskBehavior for EmitTask {
    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        let input = executor.input().await;
        let mut attributes = Map::new();
        for (name, value) in &self.definition.event.with {
            let evaluated = executor.evaluate(value, &input).await?;
            if !evaluated.is_null() {
                attributes.insert(name.clone(), evaluated);
            }
        }

        let event = match CloudEvent::from_attributes(attributes) {
            Ok(event) => event,
            Err(error) => {
                return executor
                    .set_error(TaskError::validation(error.to_string()))
                    .await
            }
        };
        let output = event.to_value();
        if let Err(error) = executor.services().events.publish(event).await {
            return executor
                .set_error(TaskError::communication(error.to_string()))
                .await;
        }
        info!(
            "Task {} emitted event {}",
            executor.path(),
            output.get("type").and_then(serde_json::Value::as_str).unwrap_or_default()
        );

        executor
            .set_result(output, executor.definition().then_directive())
            .await
    }
}
