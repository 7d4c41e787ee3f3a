// ABOUTME: Workflow run result types aggregated from the recorded task instances
// ABOUTME: Summarizes per-task statuses and the root outcome of one workflow instance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::error::TaskError;
use super::executor::TaskOutcome;
use super::instance::{TaskInstance, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub path: String,
    pub name: String,
    pub kind: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub retries: usize,
    pub error: Option<TaskError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_name: String,
    pub instance_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub status: WorkflowStatus,
    pub output: Option<Value>,
    pub error: Option<TaskError>,
    pub tasks: Vec<TaskResult>,
    pub summary: WorkflowSummary,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Completed,
    Faulted,
    Cancelled,
    Suspended,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub faulted_tasks: usize,
    pub skipped_tasks: usize,
    pub cancelled_tasks: usize,
    pub success_rate: f64,
}

impl From<&TaskInstance> for TaskResult {
    fn from(instance: &TaskInstance) -> Self {
        let duration = match (instance.started_at, instance.ended_at) {
            (Some(start), Some(end)) => Some((end - start).to_std().unwrap_or(Duration::ZERO)),
            _ => None,
        };
        Self {
            path: instance.path.clone(),
            name: instance.name.clone(),
            kind: instance.kind.clone(),
            status: instance.status,
            started_at: instance.started_at,
            ended_at: instance.ended_at,
            duration,
            retries: instance.retries.len(),
            error: instance.error.clone(),
        }
    }
}

impl TaskResult {
    pub fn is_successful(&self) -> bool {
        self.status.is_successful()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, TaskStatus::Faulted | TaskStatus::Cancelled)
    }
}

impl WorkflowResult {
    pub fn new(workflow_name: String, instance_id: String, start_time: DateTime<Utc>) -> Self {
        Self {
            workflow_name,
            instance_id,
            start_time,
            end_time: None,
            duration: None,
            status: WorkflowStatus::Suspended,
            output: None,
            error: None,
            tasks: Vec::new(),
            summary: WorkflowSummary::default(),
        }
    }

    /// Records the root outcome; `None` means the run was suspended.
    pub fn finish(&mut self, outcome: Option<TaskOutcome>, instances: &[TaskInstance]) {
        self.tasks = instances.iter().map(TaskResult::from).collect();
        self.status = match outcome {
            Some(TaskOutcome::Completed { output, .. })
            | Some(TaskOutcome::Skipped { output, .. }) => {
                self.output = Some(output);
                WorkflowStatus::Completed
            }
            Some(TaskOutcome::Faulted(error)) => {
                self.error = Some(error);
                WorkflowStatus::Faulted
            }
            Some(TaskOutcome::Cancelled) => WorkflowStatus::Cancelled,
            None => WorkflowStatus::Suspended,
        };

        let end = Utc::now();
        self.end_time = Some(end);
        self.duration = Some((end - self.start_time).to_std().unwrap_or(Duration::ZERO));
        self.update_summary();
    }

    pub fn get_task_result(&self, path: &str) -> Option<&TaskResult> {
        self.tasks.iter().find(|t| t.path == path)
    }

    pub fn is_completed(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }

    pub fn has_failures(&self) -> bool {
        self.tasks.iter().any(|t| t.is_failed())
    }

    fn update_summary(&mut self) {
        let count = |status: TaskStatus| self.tasks.iter().filter(|t| t.status == status).count();
        let total = self.tasks.len();
        let completed = count(TaskStatus::Completed);

        let success_rate = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        self.summary = WorkflowSummary {
            total_tasks: total,
            completed_tasks: completed,
            faulted_tasks: count(TaskStatus::Faulted),
            skipped_tasks: count(TaskStatus::Skipped),
            cancelled_tasks: count(TaskStatus::Cancelled),
            success_rate,
        };
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Faulted => write!(f, "faulted"),
            WorkflowStatus::Cancelled => write!(f, "cancelled"),
            WorkflowStatus::Suspended => write!(f, "suspended"),
        }
    }
}
