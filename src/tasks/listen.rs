// ABOUTME: Event-driven task waiting on correlated events, single-shot or streaming
// ABOUTME: Streaming mode runs an extension child per event and acknowledges only once it is scheduled

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::engine::error::{Result, TaskError};
use crate::engine::executor::{ChildRun, TaskBehavior, TaskExecutor, TaskOutcome};
use crate::engine::instance::{join_path, TaskInstance};
use crate::events::{CloudEvent, EventError, StreamedEvent};
use crate::parser::{
    EventConsumptionStrategy, EventFilterDefinition, EventReadMode, ForeachDefinition,
    ListenDefinition, ListenerDefinition, TaskDefinition,
};

pub struct ListenTask {
    definition: ListenDefinition,
    body: Option<Arc<TaskDefinition>>,
}

type EventFuture = BoxFuture<'static, (String, ChildRun)>;

fn await_child(child: TaskExecutor) -> EventFuture {
    async move {
        let outcome = child.outcome().await;
        let context_data = child.context().await.data;
        (
            child.path().to_string(),
            ChildRun {
                outcome,
                context_data,
            },
        )
    }
    .boxed()
}

enum Handled {
    Continue,
    Stop,
}

impl ListenTask {
    pub fn new(definition: ListenDefinition) -> Self {
        let body = definition
            .foreach
            .as_ref()
            .and_then(|foreach| foreach.do_.as_ref())
            .map(|tasks| Arc::new(TaskDefinition::sequence(tasks.clone())));
        Self { definition, body }
    }

    fn read(&self, event: &CloudEvent) -> Value {
        match self.definition.listen.read {
            EventReadMode::Data => event.data.clone().unwrap_or(Value::Null),
            EventReadMode::Envelope => event.to_value(),
        }
    }

    async fn resolve_filter(
        &self,
        executor: &TaskExecutor,
        input: &Value,
        filter: &EventFilterDefinition,
    ) -> Result<EventFilterDefinition> {
        let mut with = IndexMap::new();
        for (attribute, value) in &filter.with {
            with.insert(attribute.clone(), executor.evaluate(value, input).await?);
        }
        Ok(EventFilterDefinition { with })
    }

    /// The listener with its filter attributes evaluated against the task input.
    async fn resolve_listener(
        &self,
        executor: &TaskExecutor,
        input: &Value,
    ) -> Result<ListenerDefinition> {
        let listener = &self.definition.listen;
        let to = match &listener.to {
            EventConsumptionStrategy::One(filter) => {
                EventConsumptionStrategy::One(self.resolve_filter(executor, input, filter).await?)
            }
            EventConsumptionStrategy::Any(filters) => {
                let mut resolved = Vec::with_capacity(filters.len());
                for filter in filters {
                    resolved.push(self.resolve_filter(executor, input, filter).await?);
                }
                EventConsumptionStrategy::Any(resolved)
            }
            EventConsumptionStrategy::All(filters) => {
                let mut resolved = Vec::with_capacity(filters.len());
                for filter in filters {
                    resolved.push(self.resolve_filter(executor, input, filter).await?);
                }
                EventConsumptionStrategy::All(resolved)
            }
        };
        Ok(ListenerDefinition {
            to,
            read: listener.read,
        })
    }

    async fn listen_once(
        &self,
        executor: &TaskExecutor,
        listener: ListenerDefinition,
    ) -> Result<()> {
        executor.mark_waiting().await?;
        let correlator = Arc::clone(&executor.services().correlator);
        let correlated = correlator
            .correlate(&listener, executor.cancellation().clone())
            .await;

        let context = match correlated {
            Ok(context) => context,
            Err(EventError::Cancelled) => return Ok(()),
            Err(error) => {
                return executor
                    .set_error(TaskError::communication(error.to_string()))
                    .await
            }
        };
        info!(
            "Task {} correlated {} event(s)",
            executor.path(),
            context.events.len()
        );

        let mut values: Vec<Value> = context.events.iter().map(|e| self.read(e)).collect();
        let output = match listener.to {
            EventConsumptionStrategy::All(_) => Value::Array(values),
            _ if values.is_empty() => Value::Null,
            _ => values.swap_remove(0),
        };
        executor
            .set_result(output, executor.definition().then_directive())
            .await
    }

    async fn export(
        &self,
        executor: &TaskExecutor,
        foreach: &ForeachDefinition,
        output: &Value,
    ) -> Result<()> {
        if let Some(expression) = foreach.export.as_ref().and_then(|e| e.as_.as_ref()) {
            let data = executor.evaluate(expression, output).await?;
            executor.set_context_data(data).await;
        }
        Ok(())
    }

    /// Schedules the handler for one event, then acknowledges it.
    async fn accept(
        &self,
        executor: &TaskExecutor,
        foreach: &ForeachDefinition,
        streamed: StreamedEvent,
        existing: &HashMap<String, TaskInstance>,
        pending: &mut FuturesUnordered<EventFuture>,
        last_output: &mut Value,
    ) -> Result<()> {
        let mut item = self.read(&streamed.event);
        if let Some(expression) = foreach.output.as_ref().and_then(|o| o.as_.as_ref()) {
            item = executor.evaluate(expression, &item).await?;
        }

        let Some(body) = &self.body else {
            self.export(executor, foreach, &item).await?;
            *last_output = item;
            streamed.ack().await?;
            return Ok(());
        };

        let segment = format!("foreach/{}", streamed.offset);
        let path = join_path(executor.path(), &segment);
        let child = match existing.get(&path) {
            Some(instance) if instance.status.is_terminal() => {
                debug!("Event {} already handled by {}", streamed.offset, path);
                let run = executor.child_result(instance).await?;
                pending.push(future::ready((path, run)).boxed());
                streamed.ack().await?;
                return Ok(());
            }
            Some(instance) => {
                executor
                    .attach_child(instance.clone(), Arc::clone(body))
                    .await?
            }
            None => {
                let mut context = executor.context().await;
                context
                    .arguments
                    .insert(foreach.item.clone(), item.clone());
                context
                    .arguments
                    .insert(foreach.at.clone(), Value::from(streamed.offset));
                executor
                    .create_child("foreach", Arc::clone(body), &segment, &item, context, true)
                    .await?
            }
        };

        executor.start_child(&child).await?;
        streamed.ack().await?;
        debug!("Acknowledged event {} for {}", streamed.offset, path);
        pending.push(await_child(child));
        Ok(())
    }

    async fn handle(
        &self,
        executor: &TaskExecutor,
        foreach: &ForeachDefinition,
        path: String,
        run: ChildRun,
        last_output: &mut Value,
    ) -> Result<Handled> {
        executor.lock_children().await.shift_remove(&path);
        match run.outcome {
            TaskOutcome::Completed { output, .. } | TaskOutcome::Skipped { output, .. } => {
                self.export(executor, foreach, &output).await?;
                *last_output = output;
                Ok(Handled::Continue)
            }
            TaskOutcome::Faulted(error) => {
                executor.cancel_children().await;
                executor.set_error(error).await?;
                Ok(Handled::Stop)
            }
            TaskOutcome::Cancelled => {
                if executor.is_cancelled() {
                    return Ok(Handled::Stop);
                }
                executor.cancel_children().await;
                executor.child_cancelled().await?;
                Ok(Handled::Stop)
            }
        }
    }

    async fn listen_stream(
        &self,
        executor: &TaskExecutor,
        listener: ListenerDefinition,
        foreach: &ForeachDefinition,
    ) -> Result<()> {
        let existing: HashMap<String, TaskInstance> = executor
            .sub_tasks()
            .await?
            .into_iter()
            .map(|instance| (instance.path.clone(), instance))
            .collect();

        let correlator = Arc::clone(&executor.services().correlator);
        let mut stream = correlator
            .stream(&listener, executor.cancellation().clone())
            .await?;

        let mut pending: FuturesUnordered<EventFuture> = FuturesUnordered::new();
        let mut last_output = Value::Null;
        let mut open = true;

        loop {
            tokio::select! {
                item = stream.next(), if open => match item {
                    Some(Ok(streamed)) => {
                        self.accept(
                            executor,
                            foreach,
                            streamed,
                            &existing,
                            &mut pending,
                            &mut last_output,
                        )
                        .await?;
                    }
                    Some(Err(error)) => {
                        executor.cancel_children().await;
                        let message = format!("event stream failed: {}", error);
                        return executor.set_error(TaskError::communication(message)).await;
                    }
                    None => {
                        debug!("Event stream for {} closed", executor.path());
                        open = false;
                    }
                },
                Some((path, run)) = pending.next(), if !pending.is_empty() => {
                    let handled = self
                        .handle(executor, foreach, path, run, &mut last_output)
                        .await?;
                    if let Handled::Stop = handled {
                        return Ok(());
                    }
                }
                else => break,
            }
        }

        if executor.is_cancelled() {
            return Ok(());
        }
        executor
            .set_result(last_output, executor.definition().then_directive())
            .await
    }
}

#[async_trait]
impl TaskBehavior for ListenTask {
    async fn run(&self, executor: &TaskExecutor) -> Result<()> {
        let input = executor.input().await;
        let listener = self.resolve_listener(executor, &input).await?;
        match &self.definition.foreach {
            Some(foreach) => self.listen_stream(executor, listener, foreach).await,
            None => self.listen_once(executor, listener).await,
        }
    }
}
