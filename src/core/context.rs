//! Pipeline execution context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Status of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// The mutable record of one pipeline execution
///
/// Created once per orchestrator invocation; step outputs accumulate in
/// `results` keyed by step name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    /// Generated, time-stamped run id
    pub pipeline_id: String,

    pub start_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    pub status: RunStatus,

    /// Which kind of source triggered the run (email, slack, summary, ...)
    pub source_type: String,

    #[serde(default)]
    pub source_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Step name -> step output
    #[serde(default)]
    pub results: HashMap<String, Value>,
}

impl PipelineContext {
    pub fn new(pipeline_name: &str, source_type: &str) -> Self {
        let now = Utc::now();
        Self {
            pipeline_id: format!("{}-{}", pipeline_name, now.format("%Y%m%d%H%M%S%3f")),
            start_time: now,
            end_time: None,
            status: RunStatus::Running,
            source_type: source_type.to_string(),
            source_id: String::new(),
            error: None,
            metadata: HashMap::new(),
            results: HashMap::new(),
        }
    }

    pub fn add_result(&mut self, step_name: &str, result: Value) {
        self.results.insert(step_name.to_string(), result);
    }

    pub fn get_result(&self, step_name: &str) -> Option<&Value> {
        self.results.get(step_name)
    }

    pub fn add_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Close the run with the given status
    pub fn complete(&mut self, status: RunStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }

    /// Close the run as failed, recording the error
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.complete(RunStatus::Failed);
    }

    /// Wall-clock duration of the run, if it has ended
    pub fn duration_secs(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds() as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_results_accumulate() {
        let mut ctx = PipelineContext::new("email", "email");
        ctx.add_result("fetch", json!([1, 2, 3]));
        ctx.add_result("extract", json!(["a"]));

        assert_eq!(ctx.get_result("fetch"), Some(&json!([1, 2, 3])));
        assert_eq!(ctx.get_result("missing"), None);
    }

    #[test]
    fn test_fail_sets_error_and_end_time() {
        let mut ctx = PipelineContext::new("email", "email");
        ctx.fail("step exploded");

        assert_eq!(ctx.status, RunStatus::Failed);
        assert_eq!(ctx.error.as_deref(), Some("step exploded"));
        assert!(ctx.end_time.is_some());
        assert!(ctx.duration_secs().is_some());
    }

    #[test]
    fn test_pipeline_id_carries_name() {
        let ctx = PipelineContext::new("summary", "summary");
        assert!(ctx.pipeline_id.starts_with("summary-"));
    }
}
