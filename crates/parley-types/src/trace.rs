//! Per-request flow trace.
//!
//! An append-only log of stage transitions keyed by the request's correlation
//! id. Used for observability only; nothing reads it to make decisions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    Completed,
    Degraded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStage {
    pub stage: String,
    pub service: String,
    pub status: StageStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTrace {
    pub correlation_id: String,
    stages: Vec<FlowStage>,
}

impl FlowTrace {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            stages: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: FlowStage) {
        self.stages.push(stage);
    }

    /// Shorthand for recording a stage without payload.
    pub fn step(
        &mut self,
        stage: &str,
        service: &str,
        status: StageStatus,
        duration_ms: u64,
        decision: Option<String>,
    ) {
        self.record(FlowStage {
            stage: stage.to_string(),
            service: service.to_string(),
            status,
            duration_ms,
            data: serde_json::Value::Null,
            decision,
        });
    }

    pub fn stages(&self) -> &[FlowStage] {
        &self.stages
    }

    pub fn has_stage(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s.stage == stage)
    }
}
