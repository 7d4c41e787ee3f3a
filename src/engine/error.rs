// ABOUTME: Error types for task execution engine operations
// ABOUTME: Defines internal execution errors and the problem-details TaskError that faults tasks

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::instance::TaskStatus;

const ERROR_TYPE_BASE: &str = "https://serverlessworkflow.io/spec/1.0.0/errors";

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Configuration error for task {path}: {message}")]
    Configuration { path: String, message: String },

    #[error("Invalid status transition for task {path}: {from} -> {to}")]
    InvalidTransition {
        path: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task not found: {path}")]
    TaskNotFound { path: String },

    #[error("Task already exists: {path}")]
    DuplicateTask { path: String },

    #[error("Document not found: {reference}")]
    DocumentNotFound { reference: String },

    #[error("Workflow instance not found: {instance_id}")]
    InstanceNotFound { instance_id: String },

    #[error("Task faulted: {0}")]
    Faulted(TaskError),

    #[error("Expression error: {0}")]
    ExpressionError(#[from] crate::expression::ExpressionError),

    #[error("Event error: {0}")]
    EventError(#[from] crate::events::EventError),

    #[error("Parser error: {0}")]
    ParserError(#[from] crate::parser::ParserError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("System error: {0}")]
    SystemError(String),
}

impl ExecutionError {
    pub fn configuration(path: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionError::Configuration {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Error categories a task can fault with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Configuration,
    Validation,
    Expression,
    Communication,
    Runtime,
    Timeout,
    Authentication,
    Authorization,
}

impl ErrorType {
    pub const ALL: [ErrorType; 8] = [
        ErrorType::Configuration,
        ErrorType::Validation,
        ErrorType::Expression,
        ErrorType::Communication,
        ErrorType::Runtime,
        ErrorType::Timeout,
        ErrorType::Authentication,
        ErrorType::Authorization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Configuration => "configuration",
            ErrorType::Validation => "validation",
            ErrorType::Expression => "expression",
            ErrorType::Communication => "communication",
            ErrorType::Runtime => "runtime",
            ErrorType::Timeout => "timeout",
            ErrorType::Authentication => "authentication",
            ErrorType::Authorization => "authorization",
        }
    }

    pub fn uri(&self) -> String {
        format!("{}/{}", ERROR_TYPE_BASE, self.as_str())
    }

    pub fn default_status(&self) -> u16 {
        match self {
            ErrorType::Configuration | ErrorType::Validation | ErrorType::Expression => 400,
            ErrorType::Authentication => 401,
            ErrorType::Authorization => 403,
            ErrorType::Timeout => 408,
            ErrorType::Communication | ErrorType::Runtime => 500,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ErrorType::Configuration => "Configuration Error",
            ErrorType::Validation => "Validation Error",
            ErrorType::Expression => "Expression Error",
            ErrorType::Communication => "Communication Error",
            ErrorType::Runtime => "Runtime Error",
            ErrorType::Timeout => "Timeout",
            ErrorType::Authentication => "Authentication Error",
            ErrorType::Authorization => "Authorization Error",
        }
    }

    /// Accepts either a full type URI or the bare category name.
    pub fn from_type(value: &str) -> Option<Self> {
        let name = value.rsplit('/').next().unwrap_or(value);
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Problem-details error carried by a faulted task instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: u16,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl TaskError {
    pub fn new(kind: ErrorType, detail: impl Into<String>) -> Self {
        Self {
            type_: kind.uri(),
            status: kind.default_status(),
            title: kind.title().to_string(),
            detail: Some(detail.into()),
            instance: None,
        }
    }

    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Configuration, detail)
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Validation, detail)
    }

    pub fn expression(detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Expression, detail)
    }

    pub fn communication(detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Communication, detail)
    }

    pub fn runtime(detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Runtime, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(ErrorType::Timeout, detail)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn kind(&self) -> Option<ErrorType> {
        ErrorType::from_type(&self.type_)
    }

    pub fn is(&self, kind: ErrorType) -> bool {
        self.kind() == Some(kind)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.status)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        if let Some(instance) = &self.instance {
            write!(f, " at {}", instance)?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskError {}

impl From<ExecutionError> for TaskError {
    fn from(error: ExecutionError) -> Self {
        match error {
            ExecutionError::Faulted(error) => error,
            ExecutionError::Configuration { path, message } => {
                TaskError::configuration(message).with_instance(path)
            }
            ExecutionError::ExpressionError(e) => TaskError::expression(e.to_string()),
            ExecutionError::ParserError(e) => TaskError::configuration(e.to_string()),
            ExecutionError::EventError(e) => TaskError::communication(e.to_string()),
            ExecutionError::TaskNotFound { .. } | ExecutionError::DocumentNotFound { .. } => {
                TaskError::configuration(error.to_string())
            }
            other => TaskError::runtime(other.to_string()),
        }
    }
}

impl From<TaskError> for ExecutionError {
    fn from(error: TaskError) -> Self {
        ExecutionError::Faulted(error)
    }
}
