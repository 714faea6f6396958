//! Pipeline step domain model

use crate::errors::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Sentinel input type for steps that take no input
pub const VOID_INPUT: &str = "void";

/// An adapter a step invokes - the seam to external services
#[async_trait]
pub trait Capability: Send + Sync {
    async fn call(&self, input: Value) -> Result<Value, EngineError>;
}

/// Outcome of the most recent execution of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    NotRun,
    Completed,
    Failed,
}

/// Runtime counters for one step, shared across runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMetrics {
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: StepStatus,
    pub executions: u64,
    pub failures: u64,
    /// Wall-clock seconds of the most recent execution
    pub execution_time: f64,
}

/// A single step in a processing pipeline
#[derive(Clone)]
pub struct PipelineStep {
    pub name: String,

    /// The function/adapter this step invokes
    pub capability: Arc<dyn Capability>,

    /// Documentation tag; `"void"` marks an input-less first step
    pub input_type: String,

    /// Documentation tag for the produced value
    pub output_type: String,

    /// Abort the pipeline if this step fails
    pub required: bool,

    metrics: Arc<Mutex<StepMetrics>>,
}

impl PipelineStep {
    pub fn new(
        name: &str,
        capability: Arc<dyn Capability>,
        input_type: &str,
        output_type: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            capability,
            input_type: input_type.to_string(),
            output_type: output_type.to_string(),
            required: true,
            metrics: Arc::new(Mutex::new(StepMetrics::default())),
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn takes_no_input(&self) -> bool {
        self.input_type == VOID_INPUT
    }

    pub fn metrics(&self) -> StepMetrics {
        self.metrics.lock().expect("step metrics lock").clone()
    }

    pub(crate) fn record_start(&self, at: DateTime<Utc>) {
        let mut metrics = self.metrics.lock().expect("step metrics lock");
        metrics.last_run = Some(at);
        metrics.executions += 1;
    }

    pub(crate) fn record_success(&self, elapsed_secs: f64) {
        let mut metrics = self.metrics.lock().expect("step metrics lock");
        metrics.last_status = StepStatus::Completed;
        metrics.execution_time = elapsed_secs;
    }

    pub(crate) fn record_failure(&self, elapsed_secs: f64) {
        let mut metrics = self.metrics.lock().expect("step metrics lock");
        metrics.last_status = StepStatus::Failed;
        metrics.failures += 1;
        metrics.execution_time = elapsed_secs;
    }
}

impl std::fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStep")
            .field("name", &self.name)
            .field("input_type", &self.input_type)
            .field("output_type", &self.output_type)
            .field("required", &self.required)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Capability for Upper {
        async fn call(&self, input: Value) -> Result<Value, EngineError> {
            let text = input.as_str().unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_capability_call() {
        let step = PipelineStep::new("upper", Arc::new(Upper), "text", "text");
        let out = step.capability.call(json!("hello")).await.unwrap();
        assert_eq!(out, json!("HELLO"));
    }

    #[test]
    fn test_metrics_recording() {
        let step = PipelineStep::new("upper", Arc::new(Upper), "text", "text");
        assert_eq!(step.metrics().executions, 0);

        step.record_start(Utc::now());
        step.record_failure(0.2);
        step.record_start(Utc::now());
        step.record_success(0.1);

        let metrics = step.metrics();
        assert_eq!(metrics.executions, 2);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.last_status, StepStatus::Completed);
        assert!(metrics.last_run.is_some());
    }

    #[test]
    fn test_void_sentinel() {
        let step = PipelineStep::new("gen", Arc::new(Upper), VOID_INPUT, "summary");
        assert!(step.takes_no_input());
        assert!(step.required);
        assert!(!step.optional().required);
    }
}
