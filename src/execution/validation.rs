//! Argument validation for the `validate` stage.
//!
//! Only two checks run before a call is sent: the payload must be a JSON
//! object, and tools whose raw name contains a keyword from
//! [`REQUIRED_FIELDS`] must carry the matching field. Full schema validation
//! is left to the server.

use serde_json::{Map, Value};

use super::errors::ExecutionError;

/// `(keyword in raw tool name, required argument)`.
pub const REQUIRED_FIELDS: &[(&str, &str)] = &[("file", "path"), ("search", "query")];

/// Parse a raw argument payload. An empty payload is `{}`.
pub fn parse_arguments(raw: &str) -> Result<Map<String, Value>, ExecutionError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ExecutionError::Validation {
            reason: format!(
                "Invalid tool arguments JSON: expected an object, got {}",
                json_type_name(&other)
            ),
        }),
        Err(e) => Err(ExecutionError::Validation {
            reason: format!("Invalid tool arguments JSON: {e}"),
        }),
    }
}

/// Check the keyword-driven required fields for `raw_tool_name`.
pub fn check_required_fields(
    raw_tool_name: &str,
    arguments: &Map<String, Value>,
) -> Result<(), ExecutionError> {
    let lower = raw_tool_name.to_lowercase();
    for (keyword, field) in REQUIRED_FIELDS {
        if lower.contains(keyword) && arguments.get(*field).map_or(true, Value::is_null) {
            return Err(ExecutionError::Validation {
                reason: format!("Missing required field '{field}' for tool '{raw_tool_name}'"),
            });
        }
    }
    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
