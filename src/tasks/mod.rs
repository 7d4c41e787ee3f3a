// ABOUTME: Task behaviors for every task kind plus the call and process collaborator registries
// ABOUTME: Call handlers and process runners are the seams where external protocols plug in

pub mod call;
pub mod do_task;
pub mod emit;
pub mod for_each;
pub mod fork;
pub mod http;
pub mod listen;
pub mod raise;
pub mod run;
pub mod set;
pub mod shell;
pub mod switch;
pub mod try_catch;
pub mod wait;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::error::{ExecutionError, TaskError};
use crate::parser::ProcessKind;

pub use call::CallTask;
pub use do_task::DoTask;
pub use emit::EmitTask;
pub use for_each::ForTask;
pub use fork::ForkTask;
pub use http::HttpCallHandler;
pub use listen::ListenTask;
pub use raise::RaiseTask;
pub use run::RunTask;
pub use set::SetTask;
pub use shell::ShellProcessRunner;
pub use switch::SwitchTask;
pub use try_catch::TryTask;
pub use wait::WaitTask;

/// A behavior's resolved configuration was already captured by an earlier `initialize`.
pub(crate) fn already_initialized(path: &str) -> ExecutionError {
    ExecutionError::configuration(path, "task configuration was already resolved")
}

/// Protocol client behind `call: <name>`.
#[async_trait]
pub trait CallHandler: Send + Sync {
    async fn call(&self, arguments: &Value, input: &Value) -> Result<Value, TaskError>;
}

#[derive(Clone)]
pub struct CallRegistry {
    handlers: HashMap<String, Arc<dyn CallHandler>>,
}

impl CallRegistry {
    /// Registry with the built-in handlers.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("http", Arc::new(HttpCallHandler::default()));
        registry
    }

    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn CallHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CallHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs one kind of process for `run` tasks.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, process: &Value, input: &Value) -> Result<ProcessResult, TaskError>;
}

#[derive(Clone)]
pub struct ProcessRegistry {
    runners: HashMap<ProcessKind, Arc<dyn ProcessRunner>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(ProcessKind::Shell, Arc::new(ShellProcessRunner));
        registry
    }

    pub fn empty() -> Self {
        Self {
            runners: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: ProcessKind, runner: Arc<dyn ProcessRunner>) {
        self.runners.insert(kind, runner);
    }

    pub fn get(&self, kind: ProcessKind) -> Option<Arc<dyn ProcessRunner>> {
        self.runners.get(&kind).cloned()
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}
