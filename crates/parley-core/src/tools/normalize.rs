//! Normalization of both tool-call encodings into [`ToolCallRequest`].
//!
//! Everything downstream of detection (execution, history append, memory
//! stats) only ever sees the canonical request.

use serde_json::{Map, Value};
use tracing::warn;

use parley_types::tool::{ToolCallEncoding, ToolCallRequest};

/// Build the canonical request for a detected call.
///
/// - native: `tool_id` is the function name; `action` comes from an
///   `action` argument when present, else the function name
/// - textual: `tool_id` is the matched name; `action` is the payload's
///   `action`; params are the payload's `params` object when present, else
///   the remaining payload fields
pub fn normalize(encoding: &ToolCallEncoding, correlation_id: impl Into<String>) -> ToolCallRequest {
    let correlation_id = correlation_id.into();
    match encoding {
        ToolCallEncoding::Native(call) => {
            let mut args = parse_arguments(&call.name, &call.arguments);
            let action = match args.remove("action") {
                Some(Value::String(action)) => action,
                Some(other) => {
                    args.insert("action".to_string(), other);
                    call.name.clone()
                }
                None => call.name.clone(),
            };
            ToolCallRequest {
                tool_id: call.name.clone(),
                action,
                params: Value::Object(args),
                correlation_id,
            }
        }
        ToolCallEncoding::Textual(call) => {
            let mut payload = match &call.payload {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            let action = match payload.remove("action") {
                Some(Value::String(action)) => action,
                _ => call.tool_name.clone(),
            };
            let params = match payload.remove("params") {
                Some(Value::Object(params)) => Value::Object(params),
                Some(other) => {
                    payload.insert("params".to_string(), other);
                    Value::Object(payload)
                }
                None => Value::Object(payload),
            };
            ToolCallRequest {
                tool_id: call.tool_name.clone(),
                action,
                params,
                correlation_id,
            }
        }
    }
}

fn parse_arguments(tool: &str, arguments: &str) -> Map<String, Value> {
    if arguments.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            let mut map = Map::new();
            map.insert("input".to_string(), other);
            map
        }
        Err(e) => {
            warn!(tool, error = %e, "Tool call arguments are not valid JSON");
            Map::new()
        }
    }
}
