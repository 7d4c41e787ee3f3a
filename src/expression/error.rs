// ABOUTME: Error types for expression evaluation
// ABOUTME: Wraps handlebars render and syntax failures plus JSON conversion errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExpressionError {
    #[error("Expression render error: {0}")]
    RenderError(#[from] handlebars::RenderError),

    #[error("Expression syntax error: {0}")]
    SyntaxError(String),

    #[error("Expression '{expression}' produced an invalid result: {reason}")]
    InvalidResult { expression: String, reason: String },

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExpressionError>;
