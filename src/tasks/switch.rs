// ABOUTME: Conditional branch selection over ordered named cases
// ABOUTME: At most one case may match; the matching case's directive becomes the continuation

use async_trait::async_trait;
use tracing::debug;

use crate::engine::error::{Result, TaskError};
use crate::engine::executor::{TaskBehavior, TaskExecutor};
use crate::parser::SwitchDefinition;

pub struct SwitchTask {
    definition: SwitchDefinition,
}

impl SwitchTask {
    pub fn new(definition: SwitchDefinition) -> Self {
        Self { definition }
    }
}

#[async_trait]
impl TaskBehavior for SwitchTask {
    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        let input = executor.input().await;

        let mut matched = Vec::new();
        for (name, case) in &self.definition.cases {
            let Some(condition) = &case.when else {
                continue;
            };
            if executor.evaluate_condition(condition, &input, None).await? {
                matched.push((name, case));
            }
        }

        let next = match matched.as_slice() {
            [(name, case)] => {
                debug!("Task {} matched case '{}'", executor.path(), name);
                case.then.clone().unwrap_or_default()
            }
            [] => match self.definition.cases.values().find(|case| case.when.is_none()) {
                Some(default) => default.then.clone().unwrap_or_default(),
                None => executor.definition().then_directive(),
            },
            many => {
                let names: Vec<&str> = many.iter().map(|(name, _)| name.as_str()).collect();
                return executor
                    .set_error(TaskError::configuration(format!(
                        "multiple switch cases matched: {}",
                        names.join(", ")
                    )))
                    .await;
            }
        };

        executor.set_result(input, next).await
    }
}
