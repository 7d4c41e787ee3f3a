// ABOUTME: Expression module for evaluating workflow templates against task data
// ABOUTME: Defines the evaluator contract and its handlebars implementation

pub mod context;
pub mod engine;
pub mod error;
pub mod helpers;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use context::is_truthy;
pub use engine::ExpressionEngine;
pub use error::{ExpressionError, Result};

/// Evaluates expressions against a task's input and its scoped arguments.
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate an expression (string, object or array) to a JSON value.
    async fn evaluate(
        &self,
        expression: &Value,
        input: &Value,
        arguments: &Map<String, Value>,
    ) -> Result<Value>;

    async fn evaluate_condition(
        &self,
        expression: &str,
        input: &Value,
        arguments: &Map<String, Value>,
    ) -> Result<bool>;
}
