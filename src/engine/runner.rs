// ABOUTME: Workflow runner creating the root task instance and driving it to an outcome
// ABOUTME: Keeps each instance's records so suspended runs can be resumed later

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::context::ExecutionContext;
use super::error::{ExecutionError, Result};
use super::executor::TaskExecutor;
use super::facade::{DocumentStore, MemoryDocumentStore, MemoryWorkflowFacade, WorkflowFacade};
use super::factory::TaskExecutorFactory;
use super::instance::{NewTaskInstance, ROOT_PATH};
use super::result::{WorkflowResult, WorkflowStatus};
use super::scheduler::{TaskScheduler, DEFAULT_MAX_RETRY_DELAY};
use super::services::EngineServices;
use crate::events::{EventBus, EventCorrelator, MemoryEventBroker};
use crate::expression::{ExpressionEngine, ExpressionEvaluator};
use crate::parser::{ProcessKind, Workflow};
use crate::tasks::{CallHandler, CallRegistry, ProcessRegistry, ProcessRunner};

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

#[derive(Clone)]
struct InstanceStores {
    facade: Arc<dyn WorkflowFacade>,
    documents: Arc<dyn DocumentStore>,
    started_at: DateTime<Utc>,
}

/// Entry point for running workflows.
pub struct WorkflowEngine {
    calls: Arc<CallRegistry>,
    processes: Arc<ProcessRegistry>,
    events: Arc<dyn EventBus>,
    correlator: Arc<dyn EventCorrelator>,
    expressions: Arc<dyn ExpressionEvaluator>,
    scheduler: Arc<TaskScheduler>,
    instances: Mutex<HashMap<String, InstanceStores>>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("calls", &self.calls.names())
            .finish()
    }
}

impl WorkflowEngine {
    pub fn new() -> Self {
        let broker = Arc::new(MemoryEventBroker::new());
        Self {
            calls: Arc::new(CallRegistry::new()),
            processes: Arc::new(ProcessRegistry::new()),
            events: broker.clone(),
            correlator: broker,
            expressions: Arc::new(ExpressionEngine::new()),
            scheduler: Arc::new(
                TaskScheduler::new(DEFAULT_MAX_CONCURRENT_TASKS)
                    .with_max_retry_delay(DEFAULT_MAX_RETRY_DELAY),
            ),
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_call_handler(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn CallHandler>,
    ) -> Self {
        Arc::make_mut(&mut self.calls).register(name, handler);
        self
    }

    pub fn with_process_runner(
        mut self,
        kind: ProcessKind,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Arc::make_mut(&mut self.processes).register(kind, runner);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_event_correlator(mut self, correlator: Arc<dyn EventCorrelator>) -> Self {
        self.correlator = correlator;
        self
    }

    /// Limits concurrently running call and run tasks.
    pub fn with_max_concurrent_tasks(mut self, max_concurrent: usize) -> Self {
        let max_delay = self.scheduler.max_retry_delay();
        self.scheduler =
            Arc::new(TaskScheduler::new(max_concurrent.max(1)).with_max_retry_delay(max_delay));
        self
    }

    pub fn with_max_retry_delay(mut self, max_delay: Duration) -> Self {
        let max_concurrent = self.scheduler.get_resource_stats().max_concurrent;
        self.scheduler =
            Arc::new(TaskScheduler::new(max_concurrent).with_max_retry_delay(max_delay));
        self
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    fn services(
        &self,
        instance_id: &str,
        workflow: Arc<Workflow>,
        stores: &InstanceStores,
    ) -> EngineServices {
        EngineServices {
            instance_id: instance_id.to_string(),
            workflow,
            facade: Arc::clone(&stores.facade),
            documents: Arc::clone(&stores.documents),
            expressions: Arc::clone(&self.expressions),
            events: Arc::clone(&self.events),
            correlator: Arc::clone(&self.correlator),
            calls: Arc::clone(&self.calls),
            processes: Arc::clone(&self.processes),
            scheduler: Arc::clone(&self.scheduler),
        }
    }

    fn stores(&self, instance_id: &str) -> Result<InstanceStores> {
        let instances = self
            .instances
            .lock()
            .map_err(|_| ExecutionError::SystemError("instance registry poisoned".to_string()))?;
        instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| ExecutionError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            })
    }

    /// Creates the root instance at `/` and starts it.
    #[instrument(skip(self, workflow, input), fields(workflow = %workflow.qualified_name()))]
    pub async fn start(&self, workflow: Arc<Workflow>, input: Value) -> Result<WorkflowRun> {
        let instance_id = uuid::Uuid::new_v4().to_string();
        let stores = InstanceStores {
            facade: Arc::new(MemoryWorkflowFacade::new()),
            documents: Arc::new(MemoryDocumentStore::new()),
            started_at: Utc::now(),
        };
        self.instances
            .lock()
            .map_err(|_| ExecutionError::SystemError("instance registry poisoned".to_string()))?
            .insert(instance_id.clone(), stores.clone());

        let services = self.services(&instance_id, Arc::clone(&workflow), &stores);
        let definition = workflow.root_definition();
        let input_reference = stores.documents.set(input).await?;
        let context_reference = stores
            .documents
            .set(serde_json::to_value(ExecutionContext::default())?)
            .await?;
        let instance = stores
            .facade
            .create_task(NewTaskInstance {
                workflow_instance: instance_id.clone(),
                name: workflow.document.name.clone(),
                path: ROOT_PATH.to_string(),
                parent: None,
                kind: definition.kind_name().to_string(),
                is_extension: false,
                input_reference,
                context_reference: Some(context_reference),
                metadata: definition.metadata.clone(),
            })
            .await?;

        info!(
            "Starting workflow {} as instance {}",
            workflow.qualified_name(),
            instance_id
        );
        let root = TaskExecutorFactory::create(
            services.clone(),
            instance,
            definition,
            CancellationToken::new(),
        )?;
        WorkflowRun::launch(root, services, stores.started_at).await
    }

    /// Rebuilds the root executor of a suspended instance and resumes it.
    #[instrument(skip(self, workflow))]
    pub async fn resume(&self, workflow: Arc<Workflow>, instance_id: &str) -> Result<WorkflowRun> {
        let stores = self.stores(instance_id)?;
        let instance = stores
            .facade
            .get_task(ROOT_PATH)
            .await?
            .ok_or_else(|| ExecutionError::TaskNotFound {
                path: ROOT_PATH.to_string(),
            })?;

        info!("Resuming workflow instance {} ({})", instance_id, instance.status);
        let services = self.services(instance_id, Arc::clone(&workflow), &stores);
        let root = TaskExecutorFactory::create(
            services.clone(),
            instance,
            workflow.root_definition(),
            CancellationToken::new(),
        )?;
        WorkflowRun::launch(root, services, stores.started_at).await
    }

    /// Runs a workflow to its outcome.
    pub async fn execute_workflow(
        &self,
        workflow: Workflow,
        input: Value,
    ) -> Result<WorkflowResult> {
        let run = self.start(Arc::new(workflow), input).await?;
        run.wait().await
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one started workflow instance.
#[derive(Clone)]
pub struct WorkflowRun {
    root: TaskExecutor,
    services: EngineServices,
    started_at: DateTime<Utc>,
    suspended: Arc<watch::Sender<bool>>,
}

impl WorkflowRun {
    async fn launch(
        root: TaskExecutor,
        services: EngineServices,
        started_at: DateTime<Utc>,
    ) -> Result<Self> {
        let (suspended, _) = watch::channel(false);
        root.initialize().await?;
        root.execute().await?;
        Ok(Self {
            root,
            services,
            started_at,
            suspended: Arc::new(suspended),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.services.instance_id
    }

    pub fn root(&self) -> &TaskExecutor {
        &self.root
    }

    /// Waits for the root outcome, or returns a suspended result once `suspend` is called.
    pub async fn wait(&self) -> Result<WorkflowResult> {
        let mut suspended = self.suspended.subscribe();
        let outcome = tokio::select! {
            outcome = self.root.outcome() => Some(outcome),
            _ = suspended.wait_for(|flag| *flag) => None,
        };

        let instances = self.services.facade.list_tasks().await?;
        let mut result = WorkflowResult::new(
            self.services.workflow.document.name.clone(),
            self.services.instance_id.clone(),
            self.started_at,
        );
        result.finish(outcome, &instances);
        match result.status {
            WorkflowStatus::Faulted => warn!(
                "Workflow instance {} faulted",
                self.services.instance_id
            ),
            status => info!(
                "Workflow instance {} finished as {}",
                self.services.instance_id, status
            ),
        }
        Ok(result)
    }

    pub async fn cancel(&self) -> Result<()> {
        self.root.cancel().await
    }

    pub async fn suspend(&self) -> Result<()> {
        self.root.suspend().await?;
        self.suspended.send_replace(true);
        Ok(())
    }

    /// Resumes a suspended run on the same executors.
    pub async fn resume(&self) -> Result<()> {
        self.suspended.send_replace(false);
        self.root.execute().await
    }
}
