//! Input guard for tool calls.
//!
//! Everything a tool writes ends up in a flat file or the next prompt, so
//! oversized or deeply nested argument payloads are refused up front.

use serde_json::Value;

/// Maximum depth for JSON parameter nesting
const MAX_JSON_DEPTH: usize = 6;

/// Maximum length of any single string argument (characters)
const MAX_STRING_LENGTH: usize = 10_000;

/// Result of a safety check
#[derive(Debug, Clone, PartialEq)]
pub enum SafetyVerdict {
    /// Safe to proceed
    Allow,
    /// Blocked with reason
    Block(String),
}

/// Validate tool input parameters: bounded nesting, bounded string sizes.
pub fn validate_input(params: &Value) -> SafetyVerdict {
    if json_depth(params) > MAX_JSON_DEPTH {
        return SafetyVerdict::Block(format!(
            "Parameter nesting depth exceeds maximum of {}",
            MAX_JSON_DEPTH
        ));
    }

    if let Some(field) = find_large_string(params, MAX_STRING_LENGTH) {
        return SafetyVerdict::Block(format!(
            "Parameter '{}' exceeds {} characters",
            field, MAX_STRING_LENGTH
        ));
    }

    SafetyVerdict::Allow
}

fn json_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        Value::Array(arr) => 1 + arr.iter().map(json_depth).max().unwrap_or(0),
        _ => 1,
    }
}

fn find_large_string(value: &Value, max_len: usize) -> Option<String> {
    match value {
        Value::String(s) if s.chars().count() > max_len => Some("(root)".to_string()),
        Value::Object(map) => map.iter().find_map(|(key, val)| match val {
            Value::String(s) if s.chars().count() > max_len => Some(key.clone()),
            _ => find_large_string(val, max_len).map(|inner| format!("{}.{}", key, inner)),
        }),
        Value::Array(arr) => arr.iter().enumerate().find_map(|(i, val)| {
            find_large_string(val, max_len).map(|inner| format!("[{}].{}", i, inner))
        }),
        _ => None,
    }
}
