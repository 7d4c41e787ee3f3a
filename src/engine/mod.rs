// ABOUTME: Task execution engine module for the skein workflow runtime
// ABOUTME: Handles task instances, the executor state machine, scheduling and workflow runs

pub mod context;
pub mod error;
pub mod executor;
pub mod facade;
pub mod factory;
pub mod instance;
pub mod result;
pub mod runner;
pub mod scheduler;
pub mod services;

pub use context::ExecutionContext;
pub use error::{ErrorType, ExecutionError, Result, TaskError};
pub use executor::{ChildRun, TaskBehavior, TaskExecutor, TaskOutcome};
pub use facade::{DocumentStore, MemoryDocumentStore, MemoryWorkflowFacade, WorkflowFacade};
pub use factory::TaskExecutorFactory;
pub use instance::{TaskInstance, TaskStatus, ROOT_PATH};
pub use result::{TaskResult, WorkflowResult, WorkflowStatus, WorkflowSummary};
pub use runner::{WorkflowEngine, WorkflowRun};
pub use scheduler::{RetryPolicy, TaskScheduler};
pub use services::EngineServices;
