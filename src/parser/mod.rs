// ABOUTME: Parser module for YAML workflow definitions
// ABOUTME: Exports workflow parsing, validation, and the task definition tree

pub mod error;
pub mod task;
pub mod validation;
pub mod workflow;

pub use error::{ParserError, ValidationError};
pub use task::{
    BackoffStrategy, CallDefinition, CatchDefinition, CompositeDefinition, DurationDefinition,
    ErrorDefinition, ErrorFilter, ErrorReference, EventConsumptionStrategy, EventFilterDefinition,
    EventReadMode, ExtensionDefinition, FlowDirective, ForDefinition, ForeachDefinition,
    ForkDefinition, ListenDefinition, ListenerDefinition, ProcessKind, ProcessReturnType,
    RetryPolicyDefinition, RunDefinition, SwitchCaseDefinition, SwitchDefinition, TaskDefinition,
    TaskKind, TaskList, TryDefinition,
};
pub use validation::{ValidationReport, WorkflowValidator};
pub use workflow::{Workflow, WorkflowDocument, WorkflowParser, WorkflowResources};
