//! Tool execution with nested timeouts.
//!
//! Native calls in one batch run concurrently; textual calls run one after
//! another in detection order. Every call is bounded by its own timeout
//! nested inside a batch-wide deadline. A timeout or tool error becomes a
//! failed-but-recorded result, never an error for the caller.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use parley_types::error::ToolError;
use parley_types::tool::{ToolCallRequest, ToolExecutionResult, ToolExecutionStats};

use super::host::ToolHost;
use super::sanitize::ResultSanitizer;

/// One executed call, still tied to the id the model (or parser) gave it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedCall {
    pub call_id: String,
    pub request: ToolCallRequest,
    pub result: ToolExecutionResult,
    pub redactions: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ToolTimeouts {
    pub per_call: Duration,
    pub batch: Duration,
}

pub struct ToolRunner<T> {
    host: Arc<T>,
    sanitizer: Box<dyn ResultSanitizer>,
    timeouts: ToolTimeouts,
}

impl<T: ToolHost> ToolRunner<T> {
    pub fn new(host: Arc<T>, sanitizer: Box<dyn ResultSanitizer>, timeouts: ToolTimeouts) -> Self {
        Self {
            host,
            sanitizer,
            timeouts,
        }
    }

    pub fn host(&self) -> &T {
        &self.host
    }

    /// Run calls concurrently. Results come back in the order of `calls`.
    pub async fn run_parallel(
        &self,
        user_id: &str,
        calls: Vec<(String, ToolCallRequest)>,
    ) -> Vec<ExecutedCall> {
        let deadline = Instant::now() + self.timeouts.batch;
        join_all(
            calls
                .into_iter()
                .map(|(call_id, request)| self.run_one(user_id, call_id, request, deadline)),
        )
        .await
    }

    /// Run calls one at a time, in order, under a shared batch deadline.
    pub async fn run_sequential(
        &self,
        user_id: &str,
        calls: Vec<(String, ToolCallRequest)>,
    ) -> Vec<ExecutedCall> {
        let deadline = Instant::now() + self.timeouts.batch;
        let mut executed = Vec::with_capacity(calls.len());
        for (call_id, request) in calls {
            executed.push(self.run_one(user_id, call_id, request, deadline).await);
        }
        executed
    }

    async fn run_one(
        &self,
        user_id: &str,
        call_id: String,
        request: ToolCallRequest,
        batch_deadline: Instant,
    ) -> ExecutedCall {
        let start = Instant::now();
        let call_deadline = (start + self.timeouts.per_call).min(batch_deadline);

        let outcome = match timeout_at(call_deadline, self.host.execute(user_id, &request)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(
                call_deadline.saturating_duration_since(start).as_millis() as u64,
            )),
        };
        let execution_time_ms = start.elapsed().as_millis() as u64;

        let raw = match outcome {
            Ok(data) => {
                debug!(user_id, tool = %request.tool_id, action = %request.action, execution_time_ms, "Tool call succeeded");
                ToolExecutionResult {
                    tool_used: request.tool_id.clone(),
                    success: true,
                    data,
                    error: None,
                    execution_time_ms,
                }
            }
            Err(e) => {
                warn!(user_id, tool = %request.tool_id, action = %request.action, error = %e, "Tool call failed");
                ToolExecutionResult {
                    tool_used: request.tool_id.clone(),
                    success: false,
                    data: serde_json::Value::Null,
                    error: Some(e.to_string()),
                    execution_time_ms,
                }
            }
        };

        let sanitized = self.sanitizer.sanitize(raw);
        ExecutedCall {
            call_id,
            request,
            result: sanitized.result,
            redactions: sanitized.redactions,
        }
    }
}

/// Aggregate success/failure/redaction counts over executed calls.
pub fn stats_for(calls: &[ExecutedCall]) -> ToolExecutionStats {
    calls.iter().fold(ToolExecutionStats::default(), |mut stats, call| {
        if call.result.success {
            stats.succeeded += 1;
        } else {
            stats.failed += 1;
        }
        stats.redactions += call.redactions;
        stats
    })
}
