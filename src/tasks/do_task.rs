// ABOUTME: Sequential composite running a named task list one child at a time
// ABOUTME: Threads output and context data forward and applies each child's flow directive

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::engine::context::ExecutionContext;
use crate::engine::error::{ExecutionError, Result, TaskError};
use crate::engine::executor::{ChildRun, TaskBehavior, TaskExecutor, TaskOutcome};
use crate::parser::{FlowDirective, TaskList};

pub struct DoTask {
    tasks: TaskList,
    /// Children live under `do/<seq>/<name>` when set, `<seq>/<name>` otherwise
    prefixed: bool,
    /// Unknown `then` targets complete the block with the directive instead of faulting
    hands_off_flow: bool,
}

/// Where the sequence goes after a child finishes.
enum Step {
    Next(usize, Value),
    Done,
}

impl DoTask {
    pub fn new(tasks: TaskList, prefixed: bool) -> Self {
        Self {
            tasks,
            prefixed,
            hands_off_flow: false,
        }
    }

    pub fn handing_off_flow(mut self, hands_off_flow: bool) -> Self {
        self.hands_off_flow = hands_off_flow;
        self
    }

    fn segment(&self, sequence: usize, name: &str) -> String {
        if self.prefixed {
            format!("do/{}/{}", sequence, name)
        } else {
            format!("{}/{}", sequence, name)
        }
    }

    async fn advance(
        &self,
        executor: &TaskExecutor,
        index: usize,
        run: ChildRun,
        context: &mut ExecutionContext,
    ) -> Result<Step> {
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

        context.data = run.context_data;
        executor.set_context_data(context.data.clone()).await;

        let own_then = executor.definition().then_directive();
        let step = match next {
            FlowDirective::Continue if index + 1 < self.tasks.len() => {
                Step::Next(index + 1, output)
            }
            FlowDirective::Continue | FlowDirective::Exit => {
                executor.set_result(output, own_then).await?;
                Step::Done
            }
            FlowDirective::End => {
                executor.set_result(output, FlowDirective::End).await?;
                Step::Done
            }
            FlowDirective::Goto(target) => match self.tasks.index_of(&target) {
                Some(position) => {
                    debug!("Task {} continues at '{}'", executor.path(), target);
                    Step::Next(position, output)
                }
                None if self.hands_off_flow => {
                    executor
                        .set_result(output, FlowDirective::Goto(target))
                        .await?;
                    Step::Done
                }
                None => {
                    executor
                        .set_error(TaskError::configuration(format!(
                            "cannot continue at unknown task '{}'",
                            target
                        )))
                        .await?;
                    Step::Done
                }
            },
        };
        Ok(step)
    }
}

#[async_trait]
impl TaskBehavior for DoTask {
    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        let mut context = executor.context().await;
        let mut input = executor.input().await;
        let sub_tasks = executor.sub_tasks().await?;
        let mut sequence = sub_tasks.len();

        let mut index = 0;
        if let Some(last) = sub_tasks.last() {
            index = self.tasks.index_of(&last.name).ok_or_else(|| {
                ExecutionError::configuration(
                    executor.path(),
                    format!("no task named '{}' to resume", last.name),
                )
            })?;
            let definition = self.tasks.get_index(index).map(|(_, d)| Arc::clone(d));
            let Some(definition) = definition else {
                return Ok(());
            };
            debug!("Task {} resuming at {}", executor.path(), last.path);
            let run = executor.resume_child(last.clone(), definition).await?;
            match self.advance(executor, index, run, &mut context).await? {
                Step::Next(next, output) => {
                    index = next;
                    input = output;
                }
                Step::Done => return Ok(()),
            }
        }

        loop {
            let Some((name, definition)) = self.tasks.get_index(index) else {
                return Err(ExecutionError::configuration(
                    executor.path(),
                    format!("task index {} out of range", index),
                ));
            };
            let child = executor
                .create_child(
                    name,
                    Arc::clone(definition),
                    &self.segment(sequence, name),
                    &input,
                    context.clone(),
                    false,
                )
                .await?;
            sequence += 1;

            let run = executor.run_child(&child).await?;
            match self.advance(executor, index, run, &mut context).await? {
                Step::Next(next, output) => {
                    index = next;
                    input = output;
                }
                Step::Done => return Ok(()),
            }
        }
    }
}
