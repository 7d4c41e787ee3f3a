// ABOUTME: Task executor base shared by every task kind
// ABOUTME: Drives one task instance through its lifecycle and publishes exactly one terminal outcome

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::context::ExecutionContext;
use super::error::{ExecutionError, Result, TaskError};
use super::factory::TaskExecutorFactory;
use super::instance::{join_path, NewTaskInstance, TaskInstance, TaskStatus};
use super::services::EngineServices;
use crate::parser::{FlowDirective, TaskDefinition};

/// The single terminal signal a task executor publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { output: Value, next: FlowDirective },
    Skipped { output: Value, next: FlowDirective },
    Faulted(TaskError),
    Cancelled,
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed { .. } => TaskStatus::Completed,
            TaskOutcome::Skipped { .. } => TaskStatus::Skipped,
            TaskOutcome::Faulted(_) => TaskStatus::Faulted,
            TaskOutcome::Cancelled => TaskStatus::Cancelled,
        }
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            TaskOutcome::Completed { output, .. } | TaskOutcome::Skipped { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

/// Outcome of a child together with the context data it finished with.
#[derive(Debug, Clone)]
pub struct ChildRun {
    pub outcome: TaskOutcome,
    pub context_data: Value,
}

/// Kind-specific behavior plugged into a [`TaskExecutor`].
///
/// `run` owns the kind's algorithm: it creates and awaits children through
/// the executor and must end by calling `set_result` or `set_error`. An error
/// escaping `run` faults the task if it is not terminal yet.
#[async_trait]
pub trait TaskBehavior: Send + Sync {
    /// One-time, fallible resolution of referenced resources.
    async fn initialize(&self, _executor: &TaskExecutor) -> Result<()> {
        Ok(())
    }

    async fn run(&self, executor: &TaskExecutor) -> Result<()>;
}

struct ExecutorInner {
    services: EngineServices,
    definition: Arc<TaskDefinition>,
    behavior: Box<dyn TaskBehavior>,
    path: String,
    instance: Mutex<TaskInstance>,
    context: RwLock<ExecutionContext>,
    input: RwLock<Value>,
    initialized: AtomicBool,
    cancelling: AtomicBool,
    children: Mutex<IndexMap<String, TaskExecutor>>,
    outcome: watch::Sender<Option<TaskOutcome>>,
    cancellation: CancellationToken,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Active object bound to one task instance.
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl TaskExecutor {
    pub fn new(
        services: EngineServices,
        instance: TaskInstance,
        definition: Arc<TaskDefinition>,
        behavior: Box<dyn TaskBehavior>,
        cancellation: CancellationToken,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(ExecutorInner {
                services,
                definition,
                behavior,
                path: instance.path.clone(),
                instance: Mutex::new(instance),
                context: RwLock::new(ExecutionContext::default()),
                input: RwLock::new(Value::Null),
                initialized: AtomicBool::new(false),
                cancelling: AtomicBool::new(false),
                children: Mutex::new(IndexMap::new()),
                outcome,
                cancellation,
                worker: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn definition(&self) -> &Arc<TaskDefinition> {
        &self.inner.definition
    }

    pub fn services(&self) -> &EngineServices {
        &self.inner.services
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    /// True once cancellation was requested, even before the token fires.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelling.load(Ordering::SeqCst) || self.inner.cancellation.is_cancelled()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Snapshot of the task instance record.
    pub async fn instance(&self) -> TaskInstance {
        self.inner.instance.lock().await.clone()
    }

    pub async fn status(&self) -> TaskStatus {
        self.inner.instance.lock().await.status
    }

    /// The transformed input the behavior runs against.
    pub async fn input(&self) -> Value {
        self.inner.input.read().await.clone()
    }

    pub async fn context(&self) -> ExecutionContext {
        self.inner.context.read().await.clone()
    }

    pub async fn set_context_data(&self, data: Value) {
        self.inner.context.write().await.data = data;
    }

    /// Expression arguments for this task, optionally extended with extra bindings.
    pub async fn evaluation_arguments(
        &self,
        extra: Option<&Map<String, Value>>,
    ) -> Map<String, Value> {
        let workflow = self.inner.services.workflow_descriptor();
        let mut arguments = self.inner.context.read().await.evaluation_arguments(&workflow);
        if let Some(extra) = extra {
            for (name, value) in extra {
                arguments.insert(name.clone(), value.clone());
            }
        }
        arguments
    }

    pub async fn evaluate(&self, expression: &Value, input: &Value) -> Result<Value> {
        self.evaluate_with(expression, input, None).await
    }

    pub async fn evaluate_with(
        &self,
        expression: &Value,
        input: &Value,
        extra: Option<&Map<String, Value>>,
    ) -> Result<Value> {
        let arguments = self.evaluation_arguments(extra).await;
        Ok(self
            .inner
            .services
            .expressions
            .evaluate(expression, input, &arguments)
            .await?)
    }

    pub async fn evaluate_condition(
        &self,
        expression: &str,
        input: &Value,
        extra: Option<&Map<String, Value>>,
    ) -> Result<bool> {
        let arguments = self.evaluation_arguments(extra).await;
        Ok(self
            .inner
            .services
            .expressions
            .evaluate_condition(expression, input, &arguments)
            .await?)
    }

    /// Loads input and context from the document store, applies `input.from`
    /// and runs the kind's own initialization. Failures fault the task.
    #[instrument(skip(self), fields(path = %self.inner.path))]
    pub async fn initialize(&self) -> Result<()> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.status().await.is_terminal() {
            return Ok(());
        }

        if let Err(error) = self.prepare().await {
            warn!("Task {} failed to initialize: {}", self.inner.path, error);
            self.set_error(error.into()).await?;
        }
        Ok(())
    }

    async fn prepare(&self) -> Result<()> {
        let (input_reference, context_reference) = {
            let instance = self.inner.instance.lock().await;
            (
                instance.input_reference.clone(),
                instance.context_reference.clone(),
            )
        };

        let documents = &self.inner.services.documents;
        let raw_input = documents.get(&input_reference).await?;
        if let Some(reference) = context_reference {
            let context: ExecutionContext =
                serde_json::from_value(documents.get(&reference).await?)?;
            *self.inner.context.write().await = context;
        }

        let input = match self.inner.definition.input.as_ref().and_then(|i| i.from.as_ref()) {
            Some(expression) => self.evaluate(expression, &raw_input).await?,
            None => raw_input,
        };
        *self.inner.input.write().await = input;

        self.inner.behavior.initialize(self).await
    }

    /// Starts (or resumes) the task. Returns once the worker is scheduled.
    #[instrument(skip(self), fields(path = %self.inner.path))]
    pub async fn execute(&self) -> Result<()> {
        let status = self.status().await;
        if status.is_terminal() {
            if self.try_outcome().is_some() {
                return Ok(());
            }
            let instance = self.instance().await;
            let outcome = stored_outcome(&self.inner.services, &instance).await?;
            self.inner.outcome.send_if_modified(|current| {
                if current.is_none() {
                    *current = Some(outcome.outcome);
                    true
                } else {
                    false
                }
            });
            return Ok(());
        }
        if self.worker_active() {
            return Ok(());
        }

        if status == TaskStatus::Pending {
            if let Some(condition) = &self.inner.definition.if_ {
                let input = self.input().await;
                match self.evaluate_condition(condition, &input, None).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("Task {} condition not met, skipping", self.inner.path);
                        return self.skip(input).await;
                    }
                    Err(error) => return self.set_error(error.into()).await,
                }
            }
        }

        self.mark_running().await?;

        let executor = self.clone();
        let handle = tokio::spawn(async move { executor.drive().await });
        if let Ok(mut worker) = self.inner.worker.lock() {
            *worker = Some(handle);
        }
        Ok(())
    }

    fn worker_active(&self) -> bool {
        self.inner
            .worker
            .lock()
            .map(|worker| worker.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }

    fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.inner.worker.lock().ok().and_then(|mut worker| worker.take())
    }

    async fn drive(self) {
        let token = self.inner.cancellation.clone();
        let result = tokio::select! {
            _ = token.cancelled() => None,
            result = self.run_behavior() => Some(result),
        };

        match result {
            None => {
                self.cancel_children().await;
                if let Err(error) = self.finish_cancelled().await {
                    warn!("Failed to cancel task {}: {}", self.inner.path, error);
                    self.settle_unpersisted(TaskOutcome::Cancelled).await;
                }
            }
            Some(Err(error)) => {
                if self.status().await.is_terminal() {
                    debug!(
                        "Task {} returned after reaching a terminal state: {}",
                        self.inner.path, error
                    );
                    return;
                }
                self.cancel_children().await;
                let error = TaskError::from(error);
                if let Err(failure) = self.set_error(error.clone()).await {
                    warn!("Failed to fault task {}: {}", self.inner.path, failure);
                    self.settle_unpersisted(TaskOutcome::Faulted(error)).await;
                }
            }
            Some(Ok(())) => {}
        }
    }

    async fn run_behavior(&self) -> Result<()> {
        let Some(limit) = self.inner.definition.timeout else {
            return self.inner.behavior.run(self).await;
        };

        match tokio::time::timeout(limit, self.inner.behavior.run(self)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Task {} timed out after {:?}", self.inner.path, limit);
                self.cancel_children().await;
                self.set_error(TaskError::timeout(format!(
                    "task did not complete within {:?}",
                    limit
                )))
                .await
            }
        }
    }

    fn publish(&self, outcome: TaskOutcome) {
        self.inner.outcome.send_replace(Some(outcome));
    }

    /// Applies a transition to a copy of the record and keeps it only once the
    /// facade has stored it. A dropped or failed write leaves the record as it was.
    async fn commit<F>(&self, instance: &mut TaskInstance, transition: F) -> Result<()>
    where
        F: FnOnce(&mut TaskInstance) -> Result<()>,
    {
        let mut updated = instance.clone();
        transition(&mut updated)?;
        self.inner.services.facade.update_task(&updated).await?;
        *instance = updated;
        Ok(())
    }

    /// Settles the instance in memory when the facade rejected its terminal write,
    /// so waiters still receive exactly one outcome.
    async fn settle_unpersisted(&self, outcome: TaskOutcome) {
        let mut instance = self.inner.instance.lock().await;
        if instance.status.is_terminal() {
            return;
        }
        let outcome = match outcome {
            TaskOutcome::Faulted(error) if error.instance.is_none() => {
                TaskOutcome::Faulted(error.with_instance(instance.path.clone()))
            }
            outcome => outcome,
        };
        let marked = match &outcome {
            TaskOutcome::Faulted(error) => instance.mark_faulted(error.clone()),
            _ => instance.mark_cancelled(),
        };
        match marked {
            Ok(()) => {
                warn!("Task {} settled as {} without persisting", instance.path, instance.status);
                self.publish(outcome);
            }
            Err(error) => warn!("Failed to settle task {}: {}", instance.path, error),
        }
    }

    /// Waits for the terminal outcome. Never returns for a suspended task until it resumes.
    pub async fn outcome(&self) -> TaskOutcome {
        let mut rx = self.inner.outcome.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return TaskOutcome::Cancelled;
            }
        }
    }

    pub fn try_outcome(&self) -> Option<TaskOutcome> {
        self.inner.outcome.borrow().clone()
    }

    pub async fn mark_running(&self) -> Result<()> {
        let mut instance = self.inner.instance.lock().await;
        if instance.status == TaskStatus::Running {
            return Ok(());
        }
        self.commit(&mut instance, |record| record.mark_running()).await?;
        debug!("Task {} is running", instance.path);
        Ok(())
    }

    pub async fn mark_waiting(&self) -> Result<()> {
        let mut instance = self.inner.instance.lock().await;
        self.commit(&mut instance, |record| record.mark_waiting()).await?;
        debug!("Task {} is waiting", instance.path);
        Ok(())
    }

    /// Records a retry attempt; the owning try task resumes with `mark_running`.
    pub async fn retry(&self, cause: TaskError) -> Result<()> {
        let mut instance = self.inner.instance.lock().await;
        self.commit(&mut instance, |record| record.mark_retrying(cause))
            .await?;
        info!(
            "Task {} retrying (attempt {})",
            instance.path,
            instance.retries.len()
        );
        Ok(())
    }

    async fn skip(&self, input: Value) -> Result<()> {
        let next = self.inner.definition.then_directive();
        let mut instance = self.inner.instance.lock().await;
        let reference = self.inner.services.documents.set(input.clone()).await?;
        self.commit(&mut instance, |record| {
            record.mark_skipped(reference, next.clone())
        })
        .await?;
        self.publish(TaskOutcome::Skipped {
            output: input,
            next,
        });
        Ok(())
    }

    /// Completes the task. A second terminal call is an `InvalidTransition`.
    #[instrument(skip(self, output), fields(path = %self.inner.path))]
    pub async fn set_result(&self, output: Value, next: FlowDirective) -> Result<()> {
        let mut instance = self.inner.instance.lock().await;
        if instance.status.is_terminal() {
            return Err(ExecutionError::InvalidTransition {
                path: instance.path.clone(),
                from: instance.status,
                to: TaskStatus::Completed,
            });
        }

        let definition = &self.inner.definition;
        let output = match definition.output.as_ref().and_then(|o| o.as_.as_ref()) {
            Some(expression) => self.evaluate(expression, &output).await?,
            None => output,
        };
        if let Some(expression) = definition.export.as_ref().and_then(|e| e.as_.as_ref()) {
            let data = self.evaluate(expression, &output).await?;
            self.set_context_data(data).await;
        }

        let documents = &self.inner.services.documents;
        let output_reference = documents.set(output.clone()).await?;
        let context = serde_json::to_value(&*self.inner.context.read().await)?;
        let context_reference = documents.set(context).await?;
        self.commit(&mut instance, |record| {
            record.context_reference = Some(context_reference);
            record.mark_completed(output_reference, next.clone())
        })
        .await?;

        info!("Task {} completed (then: {})", instance.path, next);
        self.publish(TaskOutcome::Completed { output, next });
        Ok(())
    }

    /// Faults the task. A second terminal call is an `InvalidTransition`.
    #[instrument(skip(self, error), fields(path = %self.inner.path))]
    pub async fn set_error(&self, error: TaskError) -> Result<()> {
        let mut instance = self.inner.instance.lock().await;
        if instance.status.is_terminal() {
            return Err(ExecutionError::InvalidTransition {
                path: instance.path.clone(),
                from: instance.status,
                to: TaskStatus::Faulted,
            });
        }

        let error = match error.instance {
            Some(_) => error,
            None => error.with_instance(instance.path.clone()),
        };
        self.commit(&mut instance, |record| record.mark_faulted(error.clone()))
            .await?;

        warn!("Task {} faulted: {}", instance.path, error);
        self.publish(TaskOutcome::Faulted(error));
        Ok(())
    }

    async fn finish_cancelled(&self) -> Result<()> {
        let mut instance = self.inner.instance.lock().await;
        if instance.status.is_terminal() {
            return Ok(());
        }
        self.commit(&mut instance, |record| record.mark_cancelled())
            .await?;

        warn!("Task {} cancelled", instance.path);
        self.publish(TaskOutcome::Cancelled);
        Ok(())
    }

    /// Stops the subtree depth-first and marks the instance cancelled.
    pub fn cancel(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.inner.cancelling.store(true, Ordering::SeqCst);
            self.cancel_children().await;
            self.inner.cancellation.cancel();
            if let Some(worker) = self.take_worker() {
                let _ = worker.await;
            }
            if let Err(error) = self.finish_cancelled().await {
                self.settle_unpersisted(TaskOutcome::Cancelled).await;
                return Err(error);
            }
            Ok(())
        }
        .boxed()
    }

    /// Pauses the subtree, keeping every non-terminal instance resumable.
    pub fn suspend(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.suspend_children().await?;
            if let Some(worker) = self.take_worker() {
                worker.abort();
                let _ = worker.await;
            }
            // children created while the worker was stopping
            self.suspend_children().await?;

            let mut instance = self.inner.instance.lock().await;
            if instance.status.is_terminal() || instance.status == TaskStatus::Suspended {
                return Ok(());
            }
            self.commit(&mut instance, |record| record.mark_suspended())
                .await?;
            info!("Task {} suspended", instance.path);
            Ok(())
        }
        .boxed()
    }

    async fn suspend_children(&self) -> Result<()> {
        let children: Vec<TaskExecutor> =
            self.inner.children.lock().await.values().cloned().collect();
        for child in children {
            if !child.status().await.is_terminal() {
                child.suspend().await?;
            }
        }
        Ok(())
    }

    /// Removes every tracked child and cancels the ones still running.
    pub async fn cancel_children(&self) {
        let children = self.drain_children().await;
        cancel_all(children).await;
    }

    pub async fn drain_children(&self) -> Vec<TaskExecutor> {
        let mut children = self.inner.children.lock().await;
        children.drain(..).map(|(_, child)| child).collect()
    }

    /// Exclusive access to the tracked child set.
    pub async fn lock_children(&self) -> MutexGuard<'_, IndexMap<String, TaskExecutor>> {
        self.inner.children.lock().await
    }

    /// Child instances recorded under this task, in creation order.
    pub async fn sub_tasks(&self) -> Result<Vec<TaskInstance>> {
        self.inner.services.facade.get_sub_tasks(&self.inner.path).await
    }

    /// Records a new child instance and builds its executor.
    pub async fn create_child(
        &self,
        name: &str,
        definition: Arc<TaskDefinition>,
        segment: &str,
        input: &Value,
        context: ExecutionContext,
        is_extension: bool,
    ) -> Result<TaskExecutor> {
        let services = &self.inner.services;
        let input_reference = services.documents.set(input.clone()).await?;
        let context_reference = services.documents.set(serde_json::to_value(&context)?).await?;

        let instance = services
            .facade
            .create_task(NewTaskInstance {
                workflow_instance: services.instance_id.clone(),
                name: name.to_string(),
                path: join_path(&self.inner.path, segment),
                parent: Some(self.inner.path.clone()),
                kind: definition.kind_name().to_string(),
                is_extension,
                input_reference,
                context_reference: Some(context_reference),
                metadata: definition.metadata.clone(),
            })
            .await?;
        debug!("Created child task {}", instance.path);

        self.track(instance, definition).await
    }

    /// Returns the tracked executor for an existing child instance, rebuilding it if needed.
    pub async fn attach_child(
        &self,
        instance: TaskInstance,
        definition: Arc<TaskDefinition>,
    ) -> Result<TaskExecutor> {
        if let Some(existing) = self.inner.children.lock().await.get(&instance.path) {
            return Ok(existing.clone());
        }
        self.track(instance, definition).await
    }

    async fn track(
        &self,
        mut instance: TaskInstance,
        definition: Arc<TaskDefinition>,
    ) -> Result<TaskExecutor> {
        let path = instance.path.clone();
        let created = TaskExecutorFactory::create(
            self.inner.services.clone(),
            instance.clone(),
            definition,
            self.inner.cancellation.child_token(),
        );

        match created {
            Ok(child) => {
                self.inner.children.lock().await.insert(path, child.clone());
                Ok(child)
            }
            Err(error) => {
                let error = TaskError::from(error).with_instance(path);
                instance.mark_faulted(error.clone())?;
                self.inner.services.facade.update_task(&instance).await?;
                Err(ExecutionError::Faulted(error))
            }
        }
    }

    /// Initializes the child if this executor has not yet done so, then executes it.
    pub async fn start_child(&self, child: &TaskExecutor) -> Result<()> {
        if !child.is_initialized() {
            child.initialize().await?;
        }
        child.execute().await
    }

    pub async fn run_child(&self, child: &TaskExecutor) -> Result<ChildRun> {
        self.start_child(child).await?;
        let outcome = child.outcome().await;
        let context_data = child.context().await.data;
        Ok(ChildRun {
            outcome,
            context_data,
        })
    }

    /// Outcome of a child that already reached a terminal status.
    pub async fn child_result(&self, instance: &TaskInstance) -> Result<ChildRun> {
        stored_outcome(&self.inner.services, instance).await
    }

    /// Re-enters an existing child: terminal ones report their stored outcome,
    /// the others are resumed and awaited.
    pub async fn resume_child(
        &self,
        instance: TaskInstance,
        definition: Arc<TaskDefinition>,
    ) -> Result<ChildRun> {
        if instance.status.is_terminal() {
            return self.child_result(&instance).await;
        }
        let child = self.attach_child(instance, definition).await?;
        self.run_child(&child).await
    }

    /// Faults this task for a child that was cancelled from outside.
    pub async fn child_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Ok(());
        }
        self.set_error(TaskError::runtime("child task was cancelled"))
            .await
    }
}

/// Cancels each executor that has not reached a terminal status.
pub async fn cancel_all(children: Vec<TaskExecutor>) {
    for child in children {
        if child.status().await.is_terminal() {
            continue;
        }
        if let Err(error) = child.cancel().await {
            warn!("Failed to cancel task {}: {}", child.path(), error);
        }
    }
}

async fn stored_outcome(services: &EngineServices, instance: &TaskInstance) -> Result<ChildRun> {
    let documents = &services.documents;
    let context_data = match &instance.context_reference {
        Some(reference) => {
            let context: ExecutionContext =
                serde_json::from_value(documents.get(reference).await?)?;
            context.data
        }
        None => ExecutionContext::default().data,
    };

    let outcome = match instance.status {
        TaskStatus::Completed | TaskStatus::Skipped => {
            let reference = instance
                .output_reference
                .as_ref()
                .ok_or_else(|| ExecutionError::DocumentNotFound {
                    reference: format!("{}#output", instance.path),
                })?;
            let output = documents.get(reference).await?;
            let next = instance.next.clone().unwrap_or_default();
            if instance.status == TaskStatus::Completed {
                TaskOutcome::Completed { output, next }
            } else {
                TaskOutcome::Skipped { output, next }
            }
        }
        TaskStatus::Faulted => TaskOutcome::Faulted(
            instance
                .error
                .clone()
                .unwrap_or_else(|| TaskError::runtime("task faulted without an error")),
        ),
        TaskStatus::Cancelled => TaskOutcome::Cancelled,
        status => {
            return Err(ExecutionError::SystemError(format!(
                "task {} is not terminal ({})",
                instance.path, status
            )))
        }
    };

    Ok(ChildRun {
        outcome,
        context_data,
    })
}
