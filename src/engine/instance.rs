// ABOUTME: Task instance records and the per-instance status state machine
// ABOUTME: Flat, path-keyed runtime records holding status, document references and retry history

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::error::{ExecutionError, Result, TaskError};
use crate::parser::FlowDirective;

pub const ROOT_PATH: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Waiting,
    Suspended,
    Retrying,
    Skipped,
    Cancelled,
    Faulted,
    Completed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Skipped
                | TaskStatus::Cancelled
                | TaskStatus::Faulted
                | TaskStatus::Completed
        )
    }

    /// Terminal states that produced an output a parent can continue from.
    pub fn is_successful(&self) -> bool {
        matches!(self, TaskStatus::Skipped | TaskStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Suspended => "suspended",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Faulted => "faulted",
            TaskStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub number: u32,
    pub at: DateTime<Utc>,
    pub cause: TaskError,
}

/// Everything needed to record a new instance, handed to the workflow facade.
#[derive(Debug, Clone)]
pub struct NewTaskInstance {
    pub workflow_instance: String,
    pub name: String,
    pub path: String,
    pub parent: Option<String>,
    pub kind: String,
    pub is_extension: bool,
    pub input_reference: String,
    pub context_reference: Option<String>,
    pub metadata: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: String,
    pub workflow_instance: String,
    pub name: String,
    pub path: String,
    pub parent: Option<String>,
    pub kind: String,
    pub is_extension: bool,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub input_reference: String,
    pub output_reference: Option<String>,
    pub context_reference: Option<String>,
    pub error: Option<TaskError>,
    pub retries: Vec<RetryAttempt>,
    pub next: Option<FlowDirective>,
    pub metadata: IndexMap<String, Value>,
}

impl TaskInstance {
    pub fn new(request: NewTaskInstance) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_instance: request.workflow_instance,
            name: request.name,
            path: request.path,
            parent: request.parent,
            kind: request.kind,
            is_extension: request.is_extension,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            input_reference: request.input_reference,
            output_reference: None,
            context_reference: request.context_reference,
            error: None,
            retries: Vec::new(),
            next: None,
            metadata: request.metadata,
        }
    }

    fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if self.status.is_terminal() {
            return Err(ExecutionError::InvalidTransition {
                path: self.path.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn finish(&mut self, to: TaskStatus) -> Result<()> {
        self.transition(to)?;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn mark_waiting(&mut self) -> Result<()> {
        self.transition(TaskStatus::Waiting)
    }

    pub fn mark_suspended(&mut self) -> Result<()> {
        self.transition(TaskStatus::Suspended)
    }

    pub fn mark_retrying(&mut self, cause: TaskError) -> Result<()> {
        self.transition(TaskStatus::Retrying)?;
        self.retries.push(RetryAttempt {
            number: self.retries.len() as u32 + 1,
            at: Utc::now(),
            cause,
        });
        Ok(())
    }

    pub fn mark_completed(&mut self, output_reference: String, next: FlowDirective) -> Result<()> {
        self.finish(TaskStatus::Completed)?;
        self.output_reference = Some(output_reference);
        self.next = Some(next);
        Ok(())
    }

    pub fn mark_skipped(&mut self, output_reference: String, next: FlowDirective) -> Result<()> {
        self.finish(TaskStatus::Skipped)?;
        self.output_reference = Some(output_reference);
        self.next = Some(next);
        Ok(())
    }

    pub fn mark_faulted(&mut self, error: TaskError) -> Result<()> {
        self.finish(TaskStatus::Faulted)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.finish(TaskStatus::Cancelled)
    }

    /// The last path segment, used to order siblings on re-entry.
    pub fn segment(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Appends a relative segment to a task path; the root is `/`.
pub fn join_path(parent: &str, segment: &str) -> String {
    format!(
        "{}/{}",
        parent.trim_end_matches('/'),
        segment.trim_start_matches('/')
    )
}
