// ABOUTME: Explicit construction context handed to every task executor
// ABOUTME: Bundles the collaborators a workflow instance needs instead of resolving them globally

use serde_json::{json, Value};
use std::sync::Arc;

use super::facade::{DocumentStore, WorkflowFacade};
use super::scheduler::TaskScheduler;
use crate::events::{EventBus, EventCorrelator};
use crate::expression::ExpressionEvaluator;
use crate::parser::Workflow;
use crate::tasks::{CallRegistry, ProcessRegistry};

/// Collaborators shared by every executor of one workflow instance.
#[derive(Clone)]
pub struct EngineServices {
    pub instance_id: String,
    pub workflow: Arc<Workflow>,
    pub facade: Arc<dyn WorkflowFacade>,
    pub documents: Arc<dyn DocumentStore>,
    pub expressions: Arc<dyn ExpressionEvaluator>,
    pub events: Arc<dyn EventBus>,
    pub correlator: Arc<dyn EventCorrelator>,
    pub calls: Arc<CallRegistry>,
    pub processes: Arc<ProcessRegistry>,
    pub scheduler: Arc<TaskScheduler>,
}

impl EngineServices {
    /// The `workflow` value visible to expressions.
    pub fn workflow_descriptor(&self) -> Value {
        let document = &self.workflow.document;
        json!({
            "id": self.instance_id,
            "name": document.name,
            "namespace": document.namespace,
            "version": document.version,
        })
    }
}
