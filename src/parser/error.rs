// ABOUTME: Error types for workflow document parsing and validation
// ABOUTME: Defines specific error types for parser module operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Failed to read workflow file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid workflow format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Task '{task}' has no kind; expected one of {expected:?}")]
    MissingTaskKind { task: String, expected: Vec<String> },

    #[error("Invalid task configuration for '{task}': {reason}")]
    InvalidTaskConfig { task: String, reason: String },

    #[error("Task '{task}' jumps to unknown sibling '{target}'")]
    UnknownFlowTarget { task: String, target: String },

    #[error("Task '{task}' raises unknown error '{error}'")]
    UnknownError { task: String, error: String },

    #[error("Invalid template syntax in '{field}': {error}")]
    InvalidTemplate { field: String, error: String },

    #[error("Duplicate task name: {task}")]
    DuplicateTask { task: String },

    #[error("Empty workflow: no tasks defined")]
    EmptyWorkflow,
}

pub type Result<T> = std::result::Result<T, ParserError>;
