// ABOUTME: Handlebars helper functions available inside workflow expressions
// ABOUTME: Implements json, uuid, timestamp, env, case, default, join and length helpers

use chrono::Utc;
use handlebars::{Context, Handlebars, Helper, Output, RenderContext, RenderError};
use serde_json::Value;
use std::env;
use uuid::Uuid;

/// Writes the parameter as compact JSON so a single-mustache expression yields a typed value
pub fn json_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> std::result::Result<(), RenderError> {
    let value = h.param(0).map(|v| v.value().clone()).unwrap_or(Value::Null);
    let encoded = serde_json::to_string(&value)
        .map_err(|e| RenderError::new(format!("json helper failed to encode value: {}", e)))?;
    out.write(&encoded)?;
    Ok(())
}

/// Timestamp helper - formats current time, RFC 3339 unless a format string is given
pub fn timestamp_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> std::result::Result<(), RenderError> {
    let now = Utc::now();
    let formatted = match h.param(0).and_then(|v| v.value().as_str()) {
        Some(format) => now.format(format).to_string(),
        None => now.to_rfc3339(),
    };
    out.write(&formatted)?;
    Ok(())
}

/// UUID helper - generates a new UUID v4
pub fn uuid_helper(
    _h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> std::result::Result<(), RenderError> {
    let uuid = Uuid::new_v4().to_string();
    out.write(&uuid)?;
    Ok(())
}

/// Environment variable helper - gets environment variable value
pub fn env_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> std::result::Result<(), RenderError> {
    let var_name = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .ok_or_else(|| RenderError::new("env helper requires variable name parameter"))?;

    let default_value = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    let value = env::var(var_name).unwrap_or_else(|_| default_value.to_string());
    out.write(&value)?;
    Ok(())
}

pub fn upper_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> std::result::Result<(), RenderError> {
    let input = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .ok_or_else(|| RenderError::new("upper helper requires input parameter"))?;

    out.write(&input.to_uppercase())?;
    Ok(())
}

pub fn lower_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> std::result::Result<(), RenderError> {
    let input = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .ok_or_else(|| RenderError::new("lower helper requires input parameter"))?;

    out.write(&input.to_lowercase())?;
    Ok(())
}

/// Join helper - `{{join input.tags ", "}}`
pub fn join_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> std::result::Result<(), RenderError> {
    let array = h
        .param(0)
        .and_then(|v| v.value().as_array())
        .ok_or_else(|| RenderError::new("join helper requires array parameter"))?;

    let separator = h.param(1).and_then(|v| v.value().as_str()).unwrap_or(",");

    let joined = array
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(separator);
    out.write(&joined)?;
    Ok(())
}

/// Default helper - falls back when the value is null or an empty string
pub fn default_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> std::result::Result<(), RenderError> {
    let value = h.param(0).map(|v| v.value().clone()).unwrap_or(Value::Null);

    let default_value = h
        .param(1)
        .map(|v| v.value().clone())
        .ok_or_else(|| RenderError::new("default helper requires default value parameter"))?;

    let chosen = match &value {
        Value::Null => default_value,
        Value::String(s) if s.is_empty() => default_value,
        _ => value,
    };

    match chosen {
        Value::String(s) => out.write(&s)?,
        other => out.write(&other.to_string())?,
    }
    Ok(())
}

/// Length helper - element count for arrays and objects, character count for strings
pub fn length_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _rc: &mut RenderContext,
    out: &mut dyn Output,
) -> std::result::Result<(), RenderError> {
    let length = match h.param(0).map(|v| v.value()) {
        Some(Value::Array(items)) => items.len(),
        Some(Value::Object(map)) => map.len(),
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::Null) | None => 0,
        Some(_) => {
            return Err(RenderError::new(
                "length helper requires an array, object or string",
            ))
        }
    };
    out.write(&length.to_string())?;
    Ok(())
}

/// Register all built-in helpers with a Handlebars instance
pub fn register_helpers(handlebars: &mut Handlebars) {
    handlebars.register_helper("json", Box::new(json_helper));
    handlebars.register_helper("timestamp", Box::new(timestamp_helper));
    handlebars.register_helper("uuid", Box::new(uuid_helper));
    handlebars.register_helper("env", Box::new(env_helper));
    handlebars.register_helper("upper", Box::new(upper_helper));
    handlebars.register_helper("lower", Box::new(lower_helper));
    handlebars.register_helper("join", Box::new(join_helper));
    handlebars.register_helper("default", Box::new(default_helper));
    handlebars.register_helper("length", Box::new(length_helper));
}
