//! Tool result sanitation.
//!
//! Every [`ToolExecutionResult`] passes through a [`ResultSanitizer`] before
//! it is echoed to the model or retained for memory write-back.

use serde_json::Value;

use parley_types::tool::ToolExecutionResult;

const REDACTED: &str = "[REDACTED]";

/// A sanitized result and how many values were redacted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub result: ToolExecutionResult,
    pub redactions: u32,
}

pub trait ResultSanitizer: Send + Sync {
    fn sanitize(&self, result: ToolExecutionResult) -> Sanitized;
}

/// Redacts values under credential-looking keys and caps long strings.
#[derive(Debug, Clone)]
pub struct RedactingSanitizer {
    sensitive_keys: Vec<String>,
    max_string_chars: usize,
}

impl Default for RedactingSanitizer {
    fn default() -> Self {
        Self {
            sensitive_keys: [
                "api_key",
                "apikey",
                "password",
                "passwd",
                "secret",
                "token",
                "authorization",
                "cookie",
                "private_key",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_string_chars: 4_000,
        }
    }
}

impl RedactingSanitizer {
    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase().replace('-', "_");
        self.sensitive_keys.iter().any(|s| key.contains(s.as_str()))
    }

    fn scrub(&self, value: &mut Value, redactions: &mut u32) {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    if self.is_sensitive(key) && !child.is_null() {
                        *child = Value::String(REDACTED.to_string());
                        *redactions += 1;
                    } else {
                        self.scrub(child, redactions);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.scrub(item, redactions);
                }
            }
            Value::String(s) => {
                if s.chars().count() > self.max_string_chars {
                    let truncated: String = s.chars().take(self.max_string_chars).collect();
                    *s = format!("{truncated}…");
                }
            }
            _ => {}
        }
    }
}

impl ResultSanitizer for RedactingSanitizer {
    fn sanitize(&self, mut result: ToolExecutionResult) -> Sanitized {
        let mut redactions = 0;
        self.scrub(&mut result.data, &mut redactions);
        Sanitized { result, redactions }
    }
}
