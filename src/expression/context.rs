// ABOUTME: Evaluation data assembly and typed path lookup for expressions
// ABOUTME: Merges task input with scoped arguments and resolves dotted references to JSON values

use serde_json::{Map, Value};

/// Builds the object expressions render against: `{ input, <arguments...> }`.
///
/// Arguments carry `context`, `workflow` and any subtree bindings (loop item,
/// loop index, caught error). An argument named `input` never shadows the data.
pub fn evaluation_data(input: &Value, arguments: &Map<String, Value>) -> Value {
    let mut data = Map::with_capacity(arguments.len() + 1);
    for (key, value) in arguments {
        data.insert(key.clone(), value.clone());
    }
    data.insert("input".to_string(), input.clone());
    Value::Object(data)
}

/// Returns the path inside a pure `{{ path }}` reference, if the expression is one.
pub fn pure_reference(expression: &str) -> Option<&str> {
    let trimmed = expression.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?.trim();

    if inner.is_empty() || inner.contains("{{") || inner.contains("}}") {
        return None;
    }

    let is_path = inner
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']' | '@'));
    // helpers and literals are not references
    let starts_like_path = inner
        .chars()
        .next()
        .map(|c| c.is_alphabetic() || c == '_' || c == '@')
        .unwrap_or(false);

    let reserved = matches!(inner, "true" | "false" | "null" | "uuid" | "timestamp");
    if is_path && starts_like_path && !reserved {
        Some(inner)
    } else {
        None
    }
}

/// True when the expression is exactly one mustache block, e.g. `{{gt input.a 1}}`.
pub fn is_single_mustache(expression: &str) -> bool {
    let trimmed = expression.trim();
    trimmed.starts_with("{{") && trimmed.ends_with("}}") && trimmed.matches("{{").count() == 1
}

/// Resolves a dotted handlebars-style path (`a.b.[0]`, `a.b.0`) against JSON data.
pub fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for raw in path.split('.') {
        let segment = raw.trim_start_matches('[').trim_end_matches(']');
        if segment.is_empty() || segment == "this" {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Condition truthiness: `true`, non-zero numbers, non-empty strings other than
/// `"false"`, and non-empty collections.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty() && s != "false" && s != "0"
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
