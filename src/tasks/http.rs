// ABOUTME: HTTP call handler backing `call: http` tasks
// ABOUTME: Builds a reqwest request from the evaluated call arguments and maps non-success responses to errors

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use super::CallHandler;
use crate::engine::error::TaskError;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpCallHandler {
    http_client: Client,
    timeout: Duration,
}

/// Arguments accepted by `call: http`
#[derive(Debug, Clone, Deserialize)]
pub struct HttpCallArguments {
    #[serde(default = "default_method")]
    pub method: String,
    pub endpoint: Endpoint,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub query: IndexMap<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub output: HttpOutputFormat,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Uri(String),
    Object { uri: String },
}

impl Endpoint {
    pub fn uri(&self) -> &str {
        match self {
            Endpoint::Uri(uri) | Endpoint::Object { uri } => uri,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpOutputFormat {
    #[default]
    Content,
    Response,
    Raw,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpCallHandler {
    pub fn new(timeout: Duration, user_agent: Option<&str>) -> Self {
        let mut builder = Client::builder();
        if let Some(user_agent) = user_agent {
            builder = builder.user_agent(user_agent.to_string());
        }
        Self {
            http_client: builder.build().unwrap_or_default(),
            timeout,
        }
    }

    fn method(name: &str) -> Result<reqwest::Method, TaskError> {
        match name.to_uppercase().as_str() {
            "GET" => Ok(reqwest::Method::GET),
            "POST" => Ok(reqwest::Method::POST),
            "PUT" => Ok(reqwest::Method::PUT),
            "PATCH" => Ok(reqwest::Method::PATCH),
            "DELETE" => Ok(reqwest::Method::DELETE),
            "HEAD" => Ok(reqwest::Method::HEAD),
            "OPTIONS" => Ok(reqwest::Method::OPTIONS),
            _ => Err(TaskError::validation(format!(
                "Unsupported HTTP method: {}",
                name
            ))),
        }
    }
}

impl Default for HttpCallHandler {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT, None)
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl CallHandler for HttpCallHandler {
    async fn call(&self, arguments: &Value, _input: &Value) -> Result<Value, TaskError> {
        let arguments: HttpCallArguments = serde_json::from_value(arguments.clone())
            .map_err(|e| TaskError::validation(format!("Invalid http call arguments: {}", e)))?;
        let method = Self::method(&arguments.method)?;
        let uri = arguments.endpoint.uri();

        let mut request = self
            .http_client
            .request(method, uri)
            .timeout(self.timeout);

        for (key, value) in &arguments.headers {
            request = request.header(key, value);
        }
        if !arguments.query.is_empty() {
            let query: Vec<(String, String)> = arguments
                .query
                .iter()
                .map(|(key, value)| (key.clone(), query_value(value)))
                .collect();
            request = request.query(&query);
        }
        if let Some(body) = &arguments.body {
            request = request.json(body);
        }

        debug!("HTTP {} {}", arguments.method.to_uppercase(), uri);
        let response = request.send().await.map_err(|e| {
            TaskError::communication(format!("HTTP request to {} failed: {}", uri, e))
        })?;

        let status = response.status();
        let headers: serde_json::Map<String, Value> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), Value::String(value.to_string())))
            })
            .collect();
        let bytes = response.bytes().await.map_err(|e| {
            TaskError::communication(format!("Failed to read response from {}: {}", uri, e))
        })?;
        let text = String::from_utf8_lossy(&bytes).to_string();

        if !status.is_success() {
            return Err(TaskError::communication(format!(
                "HTTP call to {} failed with status {}: {}",
                uri, status, text
            ))
            .with_status(status.as_u16()));
        }
        info!("HTTP call to {} returned {}", uri, status);

        let content = serde_json::from_slice(&bytes).unwrap_or(Value::String(text.clone()));
        Ok(match arguments.output {
            HttpOutputFormat::Content => content,
            HttpOutputFormat::Raw => Value::String(text),
            HttpOutputFormat::Response => json!({
                "statusCode": status.as_u16(),
                "headers": headers,
                "content": content,
            }),
        })
    }
}
