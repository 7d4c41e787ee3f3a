// ABOUTME: Handlebars-backed expression evaluator used by every task executor
// ABOUTME: Renders templates, resolves typed references and walks JSON structures recursively

use async_trait::async_trait;
use handlebars::Handlebars;
use serde_json::{Map, Value};

use super::context::{evaluation_data, is_single_mustache, is_truthy, lookup_path, pure_reference};
use super::error::{ExpressionError, Result};
use super::helpers;
use super::ExpressionEvaluator;

#[derive(Clone)]
pub struct ExpressionEngine {
    handlebars: Handlebars<'static>,
}

impl ExpressionEngine {
    /// Create a new expression engine with all built-in helpers
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.set_strict_mode(false);
        handlebars.set_dev_mode(false);

        // Expressions produce data, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        helpers::register_helpers(&mut handlebars);

        Self { handlebars }
    }

    pub fn render_template(&self, template: &str, data: &Value) -> Result<String> {
        self.handlebars
            .render_template(template, data)
            .map_err(ExpressionError::RenderError)
    }

    /// Evaluate a single string expression to a JSON value.
    ///
    /// A pure `{{path}}` reference yields the referenced value unchanged, a
    /// single mustache block is rendered and read back as JSON when it parses,
    /// and anything else renders to a string.
    pub fn evaluate_str(&self, expression: &str, data: &Value) -> Result<Value> {
        if !self.has_templates(expression) {
            return Ok(Value::String(expression.to_string()));
        }

        if let Some(path) = pure_reference(expression) {
            return Ok(lookup_path(data, path).cloned().unwrap_or(Value::Null));
        }

        let rendered = self.render_template(expression, data)?;
        if is_single_mustache(expression) {
            return Ok(serde_json::from_str(&rendered).unwrap_or(Value::String(rendered)));
        }

        Ok(Value::String(rendered))
    }

    /// Recursively resolve templates in JSON values
    pub fn resolve_json_templates(&self, value: &Value, data: &Value) -> Result<Value> {
        match value {
            Value::String(s) => self.evaluate_str(s, data),
            Value::Array(arr) => {
                let resolved: Result<Vec<Value>> = arr
                    .iter()
                    .map(|v| self.resolve_json_templates(v, data))
                    .collect();
                Ok(Value::Array(resolved?))
            }
            Value::Object(obj) => {
                let mut resolved_obj = Map::new();
                for (key, val) in obj {
                    let resolved_key = if self.has_templates(key) {
                        self.render_template(key, data)?
                    } else {
                        key.clone()
                    };
                    resolved_obj.insert(resolved_key, self.resolve_json_templates(val, data)?);
                }
                Ok(Value::Object(resolved_obj))
            }
            other => Ok(other.clone()),
        }
    }

    /// Validate template syntax without rendering
    pub fn validate_template(&self, template: &str) -> Result<()> {
        handlebars::Template::compile(template)
            .map(|_| ())
            .map_err(|e| ExpressionError::SyntaxError(e.to_string()))
    }

    /// Check if a string contains template expressions
    pub fn has_templates(&self, text: &str) -> bool {
        text.contains("{{") && text.contains("}}")
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExpressionEvaluator for ExpressionEngine {
    async fn evaluate(
        &self,
        expression: &Value,
        input: &Value,
        arguments: &Map<String, Value>,
    ) -> Result<Value> {
        let data = evaluation_data(input, arguments);
        self.resolve_json_templates(expression, &data)
    }

    async fn evaluate_condition(
        &self,
        expression: &str,
        input: &Value,
        arguments: &Map<String, Value>,
    ) -> Result<bool> {
        let data = evaluation_data(input, arguments);
        let value = self.evaluate_str(expression, &data)?;
        Ok(is_truthy(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn arguments(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_pure_reference_keeps_type() {
        let engine = ExpressionEngine::new();
        let result = engine
            .evaluate(&json!("{{input.items}}"), &json!({"items": [1, 2, 3]}), &Map::new())
            .await
            .unwrap();
        assert_eq!(result, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_object_expression_is_walked() {
        let engine = ExpressionEngine::new();
        let result = engine
            .evaluate(
                &json!({
                    "greeting": "Hello {{input.name}}!",
                    "count": "{{length input.tags}}",
                    "fixed": 3
                }),
                &json!({"name": "Ada", "tags": ["a", "b"]}),
                &Map::new(),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"greeting": "Hello Ada!", "count": 2, "fixed": 3}));
    }

    #[tokio::test]
    async fn test_arguments_are_visible() {
        let engine = ExpressionEngine::new();
        let result = engine
            .evaluate(
                &json!("{{item}}-{{index}}"),
                &Value::Null,
                &arguments(json!({"item": "x", "index": 2})),
            )
            .await
            .unwrap();
        assert_eq!(result, json!("x-2"));
    }

    #[tokio::test]
    async fn test_conditions() {
        let engine = ExpressionEngine::new();
        let input = json!({"value": 15, "status": "ok"});
        assert!(engine
            .evaluate_condition("{{gt input.value 10}}", &input, &Map::new())
            .await
            .unwrap());
        assert!(!engine
            .evaluate_condition("{{eq input.status \"failed\"}}", &input, &Map::new())
            .await
            .unwrap());
        assert!(engine
            .evaluate_condition("{{input.status}}", &input, &Map::new())
            .await
            .unwrap());
        assert!(!engine
            .evaluate_condition("{{input.missing}}", &input, &Map::new())
            .await
            .unwrap());
    }

    #[test]
    fn test_validate_template() {
        let engine = ExpressionEngine::new();
        assert!(engine.validate_template("{{input.a}}").is_ok());
        assert!(engine.validate_template("{{#if input.a}}").is_err());
    }
}
