// ABOUTME: Concurrent composite running every branch at once from the same input
// ABOUTME: First fault wins; with compete the first completion wins, otherwise branches are joined

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::engine::context::merge_branch_data;
use crate::engine::error::Result;
use crate::engine::executor::{cancel_all, ChildRun, TaskBehavior, TaskExecutor, TaskOutcome};
use crate::engine::instance::join_path;
use crate::parser::TaskList;

pub struct ForkTask {
    branches: TaskList,
    compete: bool,
}

type BranchFuture = BoxFuture<'static, (String, String, ChildRun)>;

fn await_branch(name: String, child: TaskExecutor) -> BranchFuture {
    async move {
        let outcome = child.outcome().await;
        let context_data = child.context().await.data;
        (
            name,
            child.path().to_string(),
            ChildRun {
                outcome,
                context_data,
            },
        )
    }
    .boxed()
}

impl ForkTask {
    pub fn new(branches: TaskList, compete: bool) -> Self {
        Self { branches, compete }
    }
}

#[async_trait]
impl TaskBehavior for ForkTask {
    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        let input = executor.input().await;
        let context = executor.context().await;
        let snapshot = context.data.clone();
        let existing: HashMap<String, _> = executor
            .sub_tasks()
            .await?
            .into_iter()
            .map(|instance| (instance.path.clone(), instance))
            .collect();

        let mut pending: FuturesUnordered<BranchFuture> = FuturesUnordered::new();
        let mut started = Vec::new();
        for (index, (name, definition)) in self.branches.iter().enumerate() {
            let segment = format!("fork/{}/{}", index, name);
            let child = match existing.get(&join_path(executor.path(), &segment)) {
                Some(instance) if instance.status.is_terminal() => {
                    let run = executor.child_result(instance).await?;
                    let path = instance.path.clone();
                    pending.push(future::ready((name.clone(), path, run)).boxed());
                    continue;
                }
                Some(instance) => {
                    executor
                        .attach_child(instance.clone(), Arc::clone(definition))
                        .await?
                }
                None => {
                    executor
                        .create_child(
                            name,
                            Arc::clone(definition),
                            &segment,
                            &input,
                            context.clone(),
                            false,
                        )
                        .await?
                }
            };
            started.push((name.clone(), child));
        }

        let starts = started.iter().map(|(_, child)| executor.start_child(child));
        for result in future::join_all(starts).await {
            result?;
        }
        for (name, child) in started {
            pending.push(await_branch(name, child));
        }
        debug!(
            "Task {} waiting on {} branches",
            executor.path(),
            pending.len()
        );

        let mut merged = snapshot.clone();
        let mut outputs = Map::new();
        while let Some((name, path, run)) = pending.next().await {
            let mut children = executor.lock_children().await;
            children.shift_remove(&path);

            match run.outcome {
                TaskOutcome::Faulted(error) => {
                    let others: Vec<TaskExecutor> =
                        children.drain(..).map(|(_, child)| child).collect();
                    cancel_all(others).await;
                    drop(children);
                    return executor.set_error(error).await;
                }
                TaskOutcome::Completed { output, .. } if self.compete => {
                    info!("Branch {} won the race in {}", name, executor.path());
                    let others: Vec<TaskExecutor> =
                        children.drain(..).map(|(_, child)| child).collect();
                    cancel_all(others).await;
                    drop(children);
                    merge_branch_data(&mut merged, &snapshot, &run.context_data);
                    executor.set_context_data(merged).await;
                    return executor
                        .set_result(output, executor.definition().then_directive())
                        .await;
                }
                TaskOutcome::Completed { output, .. } => {
                    merge_branch_data(&mut merged, &snapshot, &run.context_data);
                    outputs.insert(name, output);
                }
                TaskOutcome::Skipped { .. } => {}
                TaskOutcome::Cancelled => {
                    if !executor.is_cancelled() {
                        drop(children);
                        executor.cancel_children().await;
                        return executor.child_cancelled().await;
                    }
                }
            }
        }

        executor.set_context_data(merged).await;
        executor
            .set_result(Value::Object(outputs), executor.definition().then_directive())
            .await
    }
}
