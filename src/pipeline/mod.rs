//! Pipeline orchestrator
//!
//! Executes a named ordered sequence of steps against a tracked context,
//! feeding each step's output to the next.

use crate::core::context::{PipelineContext, RunStatus};
use crate::core::step::PipelineStep;
use crate::errors::EngineError;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

/// A named ordered sequence of steps, bound to a trigger message type
#[derive(Debug, Clone)]
pub struct PipelineDef {
    pub name: String,

    /// Queue message type that triggers this pipeline
    pub message_type: String,

    /// Recorded as the context's source_type
    pub source_type: String,

    pub steps: Vec<PipelineStep>,
}

impl PipelineDef {
    pub fn new(name: &str, message_type: &str, steps: Vec<PipelineStep>) -> Self {
        Self {
            name: name.to_string(),
            message_type: message_type.to_string(),
            source_type: name.to_string(),
            steps,
        }
    }
}

/// Orchestrator construction options
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound on the run-history ring; oldest evicted first
    pub max_history: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_history: 200 }
    }
}

/// Runs registered pipelines and keeps a bounded history of their contexts
pub struct Orchestrator {
    pipelines: RwLock<HashMap<String, PipelineDef>>,
    history: Mutex<VecDeque<PipelineContext>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Arc<Self> {
        info!("pipeline orchestrator initialized");
        Arc::new(Self {
            pipelines: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            config,
        })
    }

    pub async fn register_pipeline(&self, def: PipelineDef) {
        info!(
            "registered pipeline '{}' ({} steps, trigger '{}')",
            def.name,
            def.steps.len(),
            def.message_type
        );
        let mut pipelines = self.pipelines.write().await;
        pipelines.insert(def.name.clone(), def);
    }

    pub async fn pipeline_names(&self) -> Vec<String> {
        let pipelines = self.pipelines.read().await;
        let mut names: Vec<String> = pipelines.keys().cloned().collect();
        names.sort();
        names
    }

    /// `(message_type, pipeline_name)` pairs for handler registration
    pub async fn triggers(&self) -> Vec<(String, String)> {
        let pipelines = self.pipelines.read().await;
        let mut triggers: Vec<(String, String)> = pipelines
            .values()
            .map(|def| (def.message_type.clone(), def.name.clone()))
            .collect();
        triggers.sort();
        triggers
    }

    /// Execute a pipeline's steps strictly in order.
    ///
    /// Step failures are reported through the returned context, not as an
    /// `Err`; only an unknown pipeline name is an error.
    pub async fn run_pipeline(
        &self,
        name: &str,
        input: Value,
    ) -> Result<PipelineContext, EngineError> {
        let def = {
            let pipelines = self.pipelines.read().await;
            pipelines
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::NotFound(format!("pipeline '{}'", name)))?
        };

        info!("starting {} pipeline", def.name);
        let mut context = PipelineContext::new(&def.name, &def.source_type);
        context.add_metadata("input", input.clone());

        let mut current = input;

        for step in &def.steps {
            info!("executing step: {}", step.name);
            step.record_start(Utc::now());

            let step_input = if step.takes_no_input() {
                Value::Null
            } else {
                current.clone()
            };

            let started = Instant::now();
            match step.capability.call(step_input).await {
                Ok(result) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    step.record_success(elapsed);
                    info!("step {} completed in {:.2}s", step.name, elapsed);
                    context.add_result(&step.name, result.clone());
                    current = result;
                }
                Err(err) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    step.record_failure(elapsed);
                    error!("error in step {}: {}", step.name, err);

                    if step.required {
                        context.fail(format!("required step {} failed: {}", step.name, err));
                        self.push_history(context.clone()).await;
                        error!("{} pipeline failed: {}", def.name, err);
                        return Ok(context);
                    }

                    // Optional step: keep going, feeding the previous value
                    // to the next step; no result entry is stored
                    warn!(
                        "optional step {} failed, continuing with previous value",
                        step.name
                    );
                }
            }
        }

        context.complete(RunStatus::Completed);
        self.push_history(context.clone()).await;
        info!("{} pipeline completed successfully", def.name);
        Ok(context)
    }

    /// Completed and failed run contexts, oldest first.
    pub async fn history(&self) -> Vec<PipelineContext> {
        let history = self.history.lock().await;
        history.iter().cloned().collect()
    }

    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    async fn push_history(&self, context: PipelineContext) {
        let mut history = self.history.lock().await;
        history.push_back(context);
        while history.len() > self.config.max_history {
            history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::{Capability, VOID_INPUT};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    /// Records inputs, returns a canned value
    struct Echo {
        output: Value,
        seen: Arc<StdMutex<Vec<Value>>>,
    }

    impl Echo {
        fn new(output: Value) -> (Arc<Self>, Arc<StdMutex<Vec<Value>>>) {
            let seen = Arc::new(StdMutex::new(Vec::new()));
            (
                Arc::new(Self {
                    output,
                    seen: seen.clone(),
                }),
                seen,
            )
        }
    }

    #[async_trait]
    impl Capability for Echo {
        async fn call(&self, input: Value) -> Result<Value, EngineError> {
            self.seen.lock().unwrap().push(input);
            Ok(self.output.clone())
        }
    }

    struct Fail;

    #[async_trait]
    impl Capability for Fail {
        async fn call(&self, _input: Value) -> Result<Value, EngineError> {
            Err(EngineError::Temporary("boom".into()))
        }
    }

    #[tokio::test]
    async fn test_output_feeds_next_step() {
        let (first, _) = Echo::new(json!("X"));
        let (second, seen) = Echo::new(json!("done"));
        let def = PipelineDef::new(
            "chain",
            "process_chain",
            vec![
                PipelineStep::new("step1", first, "query", "data"),
                PipelineStep::new("step2", second, "data", "result"),
            ],
        );

        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_pipeline(def).await;

        let context = orchestrator
            .run_pipeline("chain", json!({"max_results": 5}))
            .await
            .unwrap();

        assert_eq!(context.status, RunStatus::Completed);
        assert_eq!(context.get_result("step1"), Some(&json!("X")));
        assert_eq!(context.get_result("step2"), Some(&json!("done")));

        // Step 2 was called with exactly step 1's output
        assert_eq!(*seen.lock().unwrap(), vec![json!("X")]);
    }

    #[tokio::test]
    async fn test_required_step_failure_aborts_but_keeps_results() {
        let (first, _) = Echo::new(json!("X"));
        let def = PipelineDef::new(
            "failing",
            "process_failing",
            vec![
                PipelineStep::new("step1", first, "query", "data"),
                PipelineStep::new("step2", Arc::new(Fail), "data", "result"),
            ],
        );

        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_pipeline(def).await;

        let context = orchestrator.run_pipeline("failing", json!(null)).await.unwrap();

        assert_eq!(context.status, RunStatus::Failed);
        assert!(context.error.as_deref().unwrap().contains("step2"));
        // Step 1's result survives the failure
        assert_eq!(context.get_result("step1"), Some(&json!("X")));
        assert!(context.get_result("step2").is_none());
        assert!(context.end_time.is_some());

        // The failed run is in the history
        assert_eq!(orchestrator.history_len().await, 1);
    }

    #[tokio::test]
    async fn test_optional_step_failure_continues_with_previous_value() {
        let (first, _) = Echo::new(json!("X"));
        let (third, seen) = Echo::new(json!("end"));
        let def = PipelineDef::new(
            "tolerant",
            "process_tolerant",
            vec![
                PipelineStep::new("step1", first, "query", "data"),
                PipelineStep::new("step2", Arc::new(Fail), "data", "data").optional(),
                PipelineStep::new("step3", third, "data", "result"),
            ],
        );

        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_pipeline(def).await;

        let context = orchestrator.run_pipeline("tolerant", json!(null)).await.unwrap();

        assert_eq!(context.status, RunStatus::Completed);
        assert!(context.get_result("step2").is_none());
        // Step 3 saw step 1's output, not a null from the failed step
        assert_eq!(*seen.lock().unwrap(), vec![json!("X")]);
    }

    #[tokio::test]
    async fn test_void_first_step_gets_null_input() {
        let (only, seen) = Echo::new(json!({"total": 0}));
        let def = PipelineDef::new(
            "summary",
            "generate_summary",
            vec![PipelineStep::new("generate", only, VOID_INPUT, "summary")],
        );

        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_pipeline(def).await;

        let context = orchestrator
            .run_pipeline("summary", json!({"ignored": true}))
            .await
            .unwrap();

        assert_eq!(context.status, RunStatus::Completed);
        assert_eq!(*seen.lock().unwrap(), vec![Value::Null]);
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_not_found() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let err = orchestrator
            .run_pipeline("missing", json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_clearable() {
        let orchestrator = Orchestrator::new(OrchestratorConfig { max_history: 2 });
        let (only, _) = Echo::new(json!(1));
        orchestrator
            .register_pipeline(PipelineDef::new(
                "tiny",
                "process_tiny",
                vec![PipelineStep::new("only", only, "query", "result")],
            ))
            .await;

        for _ in 0..5 {
            orchestrator.run_pipeline("tiny", json!(null)).await.unwrap();
        }
        assert_eq!(orchestrator.history_len().await, 2);

        orchestrator.clear_history().await;
        assert_eq!(orchestrator.history_len().await, 0);
    }

    #[tokio::test]
    async fn test_step_metrics_track_runs() {
        let (first, _) = Echo::new(json!("X"));
        let step = PipelineStep::new("step1", first, "query", "data");
        let def = PipelineDef::new("metered", "process_metered", vec![step.clone()]);

        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_pipeline(def).await;

        orchestrator.run_pipeline("metered", json!(null)).await.unwrap();
        orchestrator.run_pipeline("metered", json!(null)).await.unwrap();

        let metrics = step.metrics();
        assert_eq!(metrics.executions, 2);
        assert_eq!(metrics.failures, 0);
        assert_eq!(metrics.last_status, crate::core::step::StepStatus::Completed);
    }
}
