// ABOUTME: Main library module for the skein workflow runtime
// ABOUTME: Exports all core modules and provides the public API

pub mod cli;
pub mod engine;
pub mod events;
pub mod expression;
pub mod parser;
pub mod tasks;

pub use cli::{App, Args, Config};
pub use engine::{
    TaskError, TaskExecutor, TaskStatus, WorkflowEngine, WorkflowResult, WorkflowRun,
    WorkflowStatus,
};
pub use events::{CloudEvent, MemoryEventBroker};
pub use parser::{TaskDefinition, Workflow, WorkflowParser, WorkflowValidator};
pub use tasks::{CallHandler, ProcessRunner};

pub type Result<T> = anyhow::Result<T>;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
