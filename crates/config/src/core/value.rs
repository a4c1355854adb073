//! Property values and delimiter handling
//!
//! Values are plain [`serde_json::Value`]s. A layer with a list delimiter
//! stores a string containing that delimiter as an ordered sequence of
//! trimmed elements; `\` before the delimiter keeps it literal.

use indexmap::IndexMap;

/// A configuration value: a scalar or an ordered sequence of scalars
pub type Value = serde_json::Value;

/// Ordered key/value snapshot, as produced by configuration sources
pub type Snapshot = IndexMap<String, Value>;

/// Default list delimiter
pub const DEFAULT_LIST_DELIMITER: char = ',';

/// Split `raw` on `delimiter`, trimming every element.
///
/// Empty elements are kept, so `","` yields two empty strings. A delimiter
/// preceded by a backslash is kept as a literal character.
pub fn split_delimited(raw: &str, delimiter: char) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&delimiter) {
            current.push(delimiter);
            chars.next();
        } else if c == delimiter {
            tokens.push(current.trim().to_owned());
            current.clear();
        } else {
            current.push(c);
        }
    }
    tokens.push(current.trim().to_owned());
    tokens
}

/// Expand `value` into the individual elements a write would store.
///
/// Strings containing the delimiter are split, sequences are flattened,
/// every other scalar is a single element.
pub fn expand(value: Value, delimiter: Option<char>) -> Vec<Value> {
    match value {
        Value::String(s) => match delimiter {
            Some(d) if s.contains(d) => split_delimited(&s, d)
                .into_iter()
                .map(Value::String)
                .collect(),
            _ => vec![Value::String(s)],
        },
        Value::Array(items) => items
            .into_iter()
            .flat_map(|item| expand(item, delimiter))
            .collect(),
        other => vec![other],
    }
}

/// Stored representation of `value` for a replacing write.
///
/// A single element collapses back to a scalar.
pub fn normalize(value: Value, delimiter: Option<char>) -> Value {
    if !needs_expansion(&value, delimiter) {
        return value;
    }
    let mut elements = expand(value, delimiter);
    if elements.len() == 1 {
        elements.pop().unwrap_or(Value::Null)
    } else {
        Value::Array(elements)
    }
}

fn needs_expansion(value: &Value, delimiter: Option<char>) -> bool {
    match (value, delimiter) {
        (Value::String(s), Some(d)) => s.contains(d),
        (Value::Array(_), _) => true,
        _ => false,
    }
}

/// Elements `value` contributes to a list read.
pub(crate) fn list_elements(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Render a value as the raw string seen by cached properties.
///
/// Sequences are joined with [`DEFAULT_LIST_DELIMITER`]; an empty sequence
/// or null has no string form.
pub fn to_raw_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(to_raw_string).collect();
            if parts.is_empty() {
                None
            } else {
                let separator = DEFAULT_LIST_DELIMITER.to_string();
                Some(parts.join(separator.as_str()))
            }
        }
        Value::Object(_) => Some(value.to_string()),
    }
}
