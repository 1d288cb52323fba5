//! HTTP tool gateway.
//!
//! Tools run in a separate service. The gateway exposes two endpoints:
//!
//! - `GET  {base}/tools` with an `X-User-Id` header returns the user's tool
//!   schemas as a JSON array.
//! - `POST {base}/execute` takes a call and returns a result envelope
//!   (`{"success", "data", "error"}`).
//!
//! Without a configured base URL the gateway offers no tools.

use serde::Serialize;
use tracing::debug;

use parley_core::tools::host::ToolHost;
use parley_types::error::ToolError;
use parley_types::llm::ToolSchema;
use parley_types::tool::{ToolCallRequest, ToolResultEnvelope};

#[derive(Clone)]
pub struct HttpToolGateway {
    client: reqwest::Client,
    base_url: Option<String>,
}

#[derive(Serialize)]
struct ExecuteBody<'a> {
    user_id: &'a str,
    tool_id: &'a str,
    action: &'a str,
    params: &'a serde_json::Value,
    correlation_id: &'a str,
}

impl HttpToolGateway {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    fn base(&self) -> Result<&str, ToolError> {
        self.base_url
            .as_deref()
            .ok_or_else(|| ToolError::Unavailable("no tool gateway configured".to_string()))
    }
}

impl ToolHost for HttpToolGateway {
    async fn list_tools(&self, user_id: &str) -> Result<Vec<ToolSchema>, ToolError> {
        let Some(base) = self.base_url.as_deref() else {
            return Ok(Vec::new());
        };

        let response = self
            .client
            .get(format!("{base}/tools"))
            .header("x-user-id", user_id)
            .send()
            .await
            .map_err(|e| ToolError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ToolError::Unavailable(format!(
                "tool listing returned HTTP {}",
                response.status()
            )));
        }
        let tools: Vec<ToolSchema> = response
            .json()
            .await
            .map_err(|e| ToolError::Unavailable(format!("invalid tool listing: {e}")))?;
        debug!(user_id, count = tools.len(), "Tool schemas loaded");
        Ok(tools)
    }

    async fn execute(&self, user_id: &str, request: &ToolCallRequest) -> Result<serde_json::Value, ToolError> {
        let base = self.base()?;
        let response = self
            .client
            .post(format!("{base}/execute"))
            .json(&ExecuteBody {
                user_id,
                tool_id: &request.tool_id,
                action: &request.action,
                params: &request.params,
                correlation_id: &request.correlation_id,
            })
            .send()
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ToolError::UnknownTool(request.tool_id.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Execution(format!("HTTP {status}: {body}")));
        }

        let envelope: ToolResultEnvelope = response
            .json()
            .await
            .map_err(|e| ToolError::Execution(format!("invalid tool result: {e}")))?;
        if envelope.success {
            Ok(envelope.data)
        } else {
            Err(ToolError::Execution(
                envelope.error.unwrap_or_else(|| "tool reported failure".to_string()),
            ))
        }
    }
}
