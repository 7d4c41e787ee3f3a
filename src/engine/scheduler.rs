// ABOUTME: Concurrency limits for external leaf work and retry backoff calculation
// ABOUTME: Semaphore-gated permits for call/run tasks plus the retry policy used by try tasks

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::{ExecutionError, Result};
use crate::parser::{BackoffStrategy, RetryPolicyDefinition};

pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

pub struct TaskScheduler {
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    max_retry_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceStats {
    pub max_concurrent: usize,
    pub available_permits: usize,
    pub active_tasks: usize,
}

impl TaskScheduler {
    /// Create a new task scheduler with specified concurrency limit
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }

    /// Upper bound applied to every computed retry delay
    pub fn with_max_retry_delay(mut self, max_delay: Duration) -> Self {
        self.max_retry_delay = max_delay;
        self
    }

    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    /// Wait for a slot to run one external call or process.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ExecutionError::SystemError("Semaphore closed".to_string()))?;
        debug!(
            "Acquired execution permit ({} remaining)",
            self.semaphore.available_permits()
        );
        Ok(permit)
    }

    /// Get current resource usage statistics
    pub fn get_resource_stats(&self) -> ResourceStats {
        ResourceStats {
            max_concurrent: self.max_concurrent,
            available_permits: self.semaphore.available_permits(),
            active_tasks: self.max_concurrent - self.semaphore.available_permits(),
        }
    }

    /// Wait for all currently executing tasks to complete
    pub async fn wait_for_completion(&self) -> Result<()> {
        let _permits = self
            .semaphore
            .acquire_many(self.max_concurrent as u32)
            .await
            .map_err(|_| ExecutionError::SystemError("Semaphore closed".to_string()))?;

        Ok(())
    }

    /// Gracefully shutdown the scheduler
    pub async fn shutdown(&self, timeout_duration: Duration) -> Result<()> {
        info!("Shutting down task scheduler...");

        match timeout(timeout_duration, self.wait_for_completion()).await {
            Ok(result) => {
                self.semaphore.close();
                result
            }
            Err(_) => {
                warn!("Scheduler shutdown timed out after {:?}", timeout_duration);
                self.semaphore.close();
                Err(ExecutionError::SystemError(format!(
                    "Shutdown timed out after {:?}",
                    timeout_duration
                )))
            }
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Resolved retry settings for a try task.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub backoff: BackoffStrategy,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
    pub max_duration: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            backoff: BackoffStrategy::Constant,
            multiplier: 2.0,
            max_delay: DEFAULT_MAX_RETRY_DELAY,
            max_attempts: None,
            max_duration: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_definition(definition: &RetryPolicyDefinition, max_delay: Duration) -> Self {
        let limit = definition.limit.as_ref();
        let attempt = limit.and_then(|limit| limit.attempt.as_ref());
        let max_duration = attempt
            .and_then(|attempt| attempt.duration.as_ref())
            .or_else(|| limit.and_then(|limit| limit.duration.as_ref()))
            .map(|duration| duration.to_duration());

        Self {
            delay: definition
                .delay
                .as_ref()
                .map(|delay| delay.to_duration())
                .unwrap_or(Duration::ZERO),
            backoff: definition.backoff,
            multiplier: definition.multiplier.unwrap_or(2.0),
            max_delay: definition
                .max_delay
                .as_ref()
                .map(|delay| delay.to_duration().min(max_delay))
                .unwrap_or(max_delay),
            max_attempts: attempt.and_then(|attempt| attempt.count),
            max_duration,
        }
    }

    /// Calculate delay for a specific retry attempt (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.delay.as_millis() as f64;
        let delay_ms = match self.backoff {
            BackoffStrategy::Constant => base_ms,
            BackoffStrategy::Linear => base_ms * (attempt as f64 + 1.0),
            BackoffStrategy::Exponential => base_ms * self.multiplier.powi(attempt as i32),
        };

        let delay = Duration::from_millis(delay_ms.max(0.0) as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }

    /// Whether another attempt is allowed after `attempts` retries and `elapsed` since the first fault.
    pub fn allows(&self, attempts: u32, elapsed: Duration) -> bool {
        if let Some(max_attempts) = self.max_attempts {
            if attempts >= max_attempts {
                return false;
            }
        }
        if let Some(max_duration) = self.max_duration {
            if elapsed >= max_duration {
                return false;
            }
        }
        true
    }
}
