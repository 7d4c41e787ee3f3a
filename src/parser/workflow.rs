// ABOUTME: Workflow document structure and YAML parsing entry points
// ABOUTME: Defines the Workflow root, its reusable resources and the async parser

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use super::error::{ParserError, Result, ValidationError};
use super::task::{ErrorDefinition, TaskDefinition, TaskList};
use tokio::fs;

fn default_dsl() -> String {
    "1.0.0".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    pub document: WorkflowDocument,
    #[serde(rename = "use", default)]
    pub use_: WorkflowResources,
    #[serde(rename = "do")]
    pub do_: TaskList,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDocument {
    #[serde(default = "default_dsl")]
    pub dsl: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub title: Option<String>,
    pub summary: Option<String>,
}

/// Named definitions that tasks may reference instead of inlining.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowResources {
    #[serde(default)]
    pub errors: IndexMap<String, ErrorDefinition>,
    #[serde(default)]
    pub functions: IndexMap<String, Arc<TaskDefinition>>,
}

impl Workflow {
    /// Parse workflow from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ParserError::IoError)?;
        Self::from_yaml(&content)
    }

    /// Parse workflow from YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let workflow: Workflow = serde_yaml::from_str(content).map_err(ParserError::YamlError)?;
        workflow.validate_structure()?;
        Ok(workflow)
    }

    fn validate_structure(&self) -> Result<()> {
        if self.document.name.trim().is_empty() {
            return Err(ParserError::MissingField("document.name".to_string()));
        }

        if self.do_.is_empty() {
            return Err(ParserError::ValidationError(ValidationError::EmptyWorkflow));
        }

        Ok(())
    }

    /// `namespace.name:version`, used to tag workflow instances.
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}:{}",
            self.document.namespace, self.document.name, self.document.version
        )
    }

    /// The implicit top-level sequential task that owns the workflow's `do` list.
    pub fn root_definition(&self) -> Arc<TaskDefinition> {
        Arc::new(TaskDefinition::sequence(self.do_.clone()))
    }

    pub fn task_names(&self) -> Vec<String> {
        self.do_.names()
    }

    pub fn get_task(&self, name: &str) -> Option<&Arc<TaskDefinition>> {
        self.do_.get(name)
    }

    pub fn error(&self, name: &str) -> Option<&ErrorDefinition> {
        self.use_.errors.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&Arc<TaskDefinition>> {
        self.use_.functions.get(name)
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowParser;

impl WorkflowParser {
    pub fn new() -> Self {
        Self
    }

    pub async fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Workflow> {
        let content = fs::read_to_string(path.as_ref())
            .await
            .map_err(ParserError::IoError)?;
        self.parse_string(&content)
    }

    pub fn parse_string(&self, content: &str) -> Result<Workflow> {
        Workflow::from_yaml(content)
    }
}

impl Default for WorkflowParser {
    fn default() -> Self {
        Self::new()
    }
}
