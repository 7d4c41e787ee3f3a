// ABOUTME: Wait task sleeping for a fixed duration before passing its input through
// ABOUTME: Cancellation interrupts the timer through the executor's worker

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::engine::error::Result;
use crate::engine::executor::{TaskBehavior, TaskExecutor};

pub struct WaitTask {
    duration: Duration,
}

impl WaitTask {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl TaskBehavior for WaitTask {
    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        debug!("Task {} waiting {:?}", executor.path(), self.duration);
        tokio::time::sleep(self.duration).await;
        let input = executor.input().await;
        executor
            .set_result(input, executor.definition().then_directive())
            .await
    }
}
