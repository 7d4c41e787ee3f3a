// ABOUTME: Workflow facade and document store contracts with in-memory implementations
// ABOUTME: Persists flat, path-keyed task instances and the payload documents they reference

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::error::{ExecutionError, Result};
use super::instance::{NewTaskInstance, TaskInstance};

/// Task instance persistence for one workflow instance.
#[async_trait]
pub trait WorkflowFacade: Send + Sync {
    async fn create_task(&self, request: NewTaskInstance) -> Result<TaskInstance>;

    /// Direct children of `parent`, in creation order.
    async fn get_sub_tasks(&self, parent: &str) -> Result<Vec<TaskInstance>>;

    async fn get_task(&self, path: &str) -> Result<Option<TaskInstance>>;

    async fn update_task(&self, instance: &TaskInstance) -> Result<()>;

    async fn list_tasks(&self) -> Result<Vec<TaskInstance>>;
}

/// Payload storage; tasks keep references instead of inlining large documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, reference: &str) -> Result<Value>;

    async fn set(&self, document: Value) -> Result<String>;
}

#[derive(Default)]
pub struct MemoryWorkflowFacade {
    tasks: RwLock<IndexMap<String, TaskInstance>>,
}

impl MemoryWorkflowFacade {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowFacade for MemoryWorkflowFacade {
    async fn create_task(&self, request: NewTaskInstance) -> Result<TaskInstance> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&request.path) {
            return Err(ExecutionError::DuplicateTask { path: request.path });
        }

        let instance = TaskInstance::new(request);
        debug!("Created task instance {} ({})", instance.path, instance.kind);
        tasks.insert(instance.path.clone(), instance.clone());
        Ok(instance)
    }

    async fn get_sub_tasks(&self, parent: &str) -> Result<Vec<TaskInstance>> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|task| task.parent.as_deref() == Some(parent))
            .cloned()
            .collect())
    }

    async fn get_task(&self, path: &str) -> Result<Option<TaskInstance>> {
        Ok(self.tasks.read().await.get(path).cloned())
    }

    async fn update_task(&self, instance: &TaskInstance) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&instance.path) {
            Some(existing) => {
                *existing = instance.clone();
                Ok(())
            }
            None => Err(ExecutionError::TaskNotFound {
                path: instance.path.clone(),
            }),
        }
    }

    async fn list_tasks(&self) -> Result<Vec<TaskInstance>> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, Value>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, reference: &str) -> Result<Value> {
        self.documents
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| ExecutionError::DocumentNotFound {
                reference: reference.to_string(),
            })
    }

    async fn set(&self, document: Value) -> Result<String> {
        let reference = uuid::Uuid::new_v4().to_string();
        self.documents
            .write()
            .await
            .insert(reference.clone(), document);
        Ok(reference)
    }
}
