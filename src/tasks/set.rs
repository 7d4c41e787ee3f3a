// ABOUTME: Set task evaluating its value expression against the task input
// ABOUTME: The evaluated value becomes the task output verbatim

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::error::Result;
use crate::engine::executor::{TaskBehavior, TaskExecutor};

pub struct SetTask {
    value: Value,
}

impl SetTask {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

#[async_trait]
impl TaskBehavior for SetTask {
    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        let input = executor.input().await;
        let output = executor.evaluate(&self.value, &input).await?;
        executor
            .set_result(output, executor.definition().then_directive())
            .await
    }
}
