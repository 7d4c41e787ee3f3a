// ABOUTME: CloudEvent envelope used by emit and listen tasks
// ABOUTME: Builds events from templated attributes and matches them against listener filters

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{EventError, Result};

pub const SPEC_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub specversion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(flatten)]
    pub extensions: IndexMap<String, Value>,
}

impl CloudEvent {
    pub fn new(source: impl Into<String>, type_: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            type_: type_.into(),
            specversion: SPEC_VERSION.to_string(),
            time: Some(Utc::now().to_rfc3339()),
            subject: None,
            datacontenttype: None,
            data: None,
            extensions: IndexMap::new(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Builds an event from evaluated attributes, defaulting `id`, `specversion` and `time`.
    pub fn from_attributes(attributes: Map<String, Value>) -> Result<Self> {
        let mut attributes = attributes;
        attributes
            .entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        attributes
            .entry("specversion")
            .or_insert_with(|| Value::String(SPEC_VERSION.to_string()));
        attributes
            .entry("time")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));

        for required in ["source", "type"] {
            match attributes.get(required) {
                Some(Value::String(value)) if !value.is_empty() => {}
                _ => {
                    return Err(EventError::InvalidEvent(format!(
                        "attribute '{}' is required and must be a non-empty string",
                        required
                    )))
                }
            }
        }

        serde_json::from_value(Value::Object(attributes)).map_err(EventError::JsonError)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Every filter attribute must be contained in the event's attribute of the same name.
    pub fn matches(&self, filter: &IndexMap<String, Value>) -> bool {
        let envelope = self.to_value();
        filter.iter().all(|(attribute, expected)| {
            envelope
                .get(attribute)
                .map(|actual| contains(actual, expected))
                .unwrap_or(false)
        })
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected.iter().all(|(key, value)| {
            actual
                .get(key)
                .map(|candidate| contains(candidate, value))
                .unwrap_or(false)
        }),
        _ => actual == expected,
    }
}
