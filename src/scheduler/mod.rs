//! Recurring-job scheduler
//!
//! Maintains the schedule table, computes next-fire times, and on a fixed
//! tick enqueues due jobs into the message queue. Retry of a fired job is the
//! queue's responsibility; the scheduler only counts enqueue failures.

use crate::core::context::RunStatus;
use crate::core::schedule::{Schedule, ScheduleUpdate};
use crate::core::Priority;
use crate::errors::EngineError;
use crate::pipeline::Orchestrator;
use crate::queue::{self, MessageQueue};
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Scheduler construction options
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seconds between schedule-table scans
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
        }
    }
}

/// Drives schedules into the message queue and bridges queue messages to
/// pipeline runs
pub struct Scheduler {
    queue: Arc<MessageQueue>,
    orchestrator: Arc<Orchestrator>,
    schedules: Mutex<HashMap<String, Schedule>>,
    config: SchedulerConfig,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<MessageQueue>,
        orchestrator: Arc<Orchestrator>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        info!("pipeline scheduler initialized");
        Arc::new(Self {
            queue,
            orchestrator,
            schedules: Mutex::new(HashMap::new()),
            config,
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        })
    }

    /// The reference deployment's standing schedules: email every 10 minutes,
    /// slack every 5, daily summary at 08:00.
    pub async fn install_default_schedules(&self) {
        self.add_schedule(
            Schedule::interval("email-processing", "Email Processing", "process_email", 600)
                .with_description("Process new emails every 10 minutes")
                .with_parameters(HashMap::from([
                    ("max_results".to_string(), json!(20)),
                    ("filter".to_string(), json!("unread")),
                ])),
        )
        .await;

        self.add_schedule(
            Schedule::interval("slack-processing", "Slack Processing", "process_slack", 300)
                .with_description("Process new Slack messages every 5 minutes")
                .with_parameters(HashMap::from([("max_results".to_string(), json!(50))])),
        )
        .await;

        self.add_schedule(
            Schedule::daily(
                "daily-summary",
                "Daily Summary",
                "generate_daily_summary",
                "08:00",
            )
            .with_description("Generate daily summary at 8:00 AM"),
        )
        .await;
    }

    pub async fn add_schedule(&self, mut schedule: Schedule) {
        schedule.update_next_run(Utc::now());
        let mut schedules = self.schedules.lock().await;
        info!("added schedule {}: {}", schedule.id, schedule.name);
        schedules.insert(schedule.id.clone(), schedule);
    }

    pub async fn remove_schedule(&self, schedule_id: &str) -> bool {
        let mut schedules = self.schedules.lock().await;
        if schedules.remove(schedule_id).is_some() {
            info!("removed schedule {}", schedule_id);
            true
        } else {
            warn!("schedule {} not found", schedule_id);
            false
        }
    }

    pub async fn get_schedule(&self, schedule_id: &str) -> Option<Schedule> {
        self.schedules.lock().await.get(schedule_id).cloned()
    }

    /// All schedules, sorted by id for stable listings
    pub async fn get_schedules(&self) -> Vec<Schedule> {
        let schedules = self.schedules.lock().await;
        let mut all: Vec<Schedule> = schedules.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn update_schedule(&self, schedule_id: &str, update: ScheduleUpdate) -> bool {
        let mut schedules = self.schedules.lock().await;
        let Some(schedule) = schedules.get_mut(schedule_id) else {
            warn!("schedule {} not found", schedule_id);
            return false;
        };

        update.apply(schedule);
        schedule.update_next_run(Utc::now());
        info!("updated schedule {}", schedule_id);
        true
    }

    pub async fn enable_schedule(&self, schedule_id: &str) -> bool {
        let mut schedules = self.schedules.lock().await;
        let Some(schedule) = schedules.get_mut(schedule_id) else {
            warn!("schedule {} not found", schedule_id);
            return false;
        };

        schedule.enabled = true;
        schedule.update_next_run(Utc::now());
        info!("enabled schedule {}", schedule_id);
        true
    }

    /// Disabling clears `next_run`
    pub async fn disable_schedule(&self, schedule_id: &str) -> bool {
        let mut schedules = self.schedules.lock().await;
        let Some(schedule) = schedules.get_mut(schedule_id) else {
            warn!("schedule {} not found", schedule_id);
            return false;
        };

        schedule.enabled = false;
        schedule.next_run = None;
        info!("disabled schedule {}", schedule_id);
        true
    }

    /// Enqueue a schedule's job immediately, regardless of `next_run`.
    /// Still requires the schedule to be enabled.
    pub async fn run_now(&self, schedule_id: &str) -> bool {
        let mut schedules = self.schedules.lock().await;
        let Some(schedule) = schedules.get_mut(schedule_id) else {
            warn!("schedule {} not found", schedule_id);
            return false;
        };

        if !schedule.enabled {
            warn!("schedule {} is disabled", schedule_id);
            return false;
        }

        let now = Utc::now();
        match self.enqueue_task(schedule).await {
            Ok(()) => {
                schedule.last_run = Some(now);
                schedule.runs += 1;
                schedule.update_next_run(now);
                info!("manually ran schedule {}", schedule_id);
                true
            }
            Err(err) => {
                error!("error enqueueing schedule {}: {}", schedule_id, err);
                schedule.failures += 1;
                schedule.update_next_run(now);
                false
            }
        }
    }

    /// Load schedules from a JSON array file, replacing same-id entries.
    pub async fn load_schedules(&self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let loaded: Vec<Schedule> =
            serde_json::from_str(&content).context("Failed to parse schedules file")?;

        let count = loaded.len();
        for schedule in loaded {
            self.add_schedule(schedule).await;
        }
        info!("loaded {} schedules from {}", count, path.display());
        Ok(count)
    }

    /// Save all schedules to a JSON array file.
    pub async fn save_schedules(&self, path: &Path) -> Result<()> {
        let schedules = self.get_schedules().await;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(&schedules)
            .context("Failed to serialize schedules")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Start the attached queue (if stopped), register one queue handler per
    /// registered pipeline, and run the scheduling loop.
    pub async fn start(self: &Arc<Self>, blocking: bool) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        if !self.queue.is_running() {
            self.queue.start(false).await;
        }

        register_pipeline_handlers(&self.queue, &self.orchestrator).await;

        if blocking {
            info!("starting scheduler (blocking)");
            self.clone().run_loop().await;
        } else {
            info!("starting scheduler (background)");
            let scheduler = self.clone();
            let handle = tokio::spawn(async move { scheduler.run_loop().await });
            *self.worker.lock().await = Some(handle);
        }
    }

    /// Signal the loop to exit and join it with a bounded timeout.
    pub async fn stop(&self) {
        info!("stopping scheduler");
        self.running.store(false, Ordering::SeqCst);

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                warn!("scheduler loop did not stop within 2s");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run_loop(self: Arc<Self>) {
        info!("scheduler loop started");
        let mut tick = tokio::time::interval(self.config.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.running.load(Ordering::SeqCst) {
            tick.tick().await;
            self.fire_due_schedules().await;
        }

        info!("scheduler loop stopped");
    }

    async fn fire_due_schedules(&self) {
        let mut schedules = self.schedules.lock().await;
        let now = Utc::now();

        for schedule in schedules.values_mut() {
            if !schedule.is_due(now) {
                continue;
            }

            info!("executing schedule {}: {}", schedule.id, schedule.name);
            match self.enqueue_task(schedule).await {
                Ok(()) => {
                    schedule.last_run = Some(now);
                    schedule.runs += 1;
                }
                Err(err) => {
                    // The job is not retried here; retry is the queue's job
                    // once the message is in it
                    error!("error executing schedule {}: {}", schedule.id, err);
                    schedule.failures += 1;
                }
            }
            schedule.update_next_run(now);
        }
    }

    /// Enqueue one job for a schedule: message type is the schedule's target,
    /// payload is its parameters plus schedule metadata, priority is high.
    async fn enqueue_task(&self, schedule: &Schedule) -> Result<(), EngineError> {
        let mut payload = schedule.parameters.clone();
        payload.insert("schedule_id".to_string(), json!(schedule.id));
        payload.insert("schedule_name".to_string(), json!(schedule.name));
        payload.insert(
            "schedule_run_time".to_string(),
            json!(Utc::now().to_rfc3339()),
        );

        self.queue
            .enqueue(&schedule.target, payload, Priority::High, None)
            .await;
        Ok(())
    }
}

/// Register one queue handler per registered pipeline: a message of the
/// pipeline's trigger type runs that pipeline with the message payload as
/// input. A failed run is reported as a handler error so the queue retries it.
pub async fn register_pipeline_handlers(queue: &MessageQueue, orchestrator: &Arc<Orchestrator>) {
    for (message_type, pipeline_name) in orchestrator.triggers().await {
        let orchestrator = orchestrator.clone();
        let name = pipeline_name.clone();
        queue
            .register_handler(
                &message_type,
                queue::handler(move |message| {
                    let orchestrator = orchestrator.clone();
                    let name = name.clone();
                    async move {
                        let input =
                            Value::Object(message.payload.clone().into_iter().collect());
                        let context = orchestrator.run_pipeline(&name, input).await?;
                        if context.status == RunStatus::Failed {
                            return Err(EngineError::Pipeline {
                                pipeline: name,
                                message: context
                                    .error
                                    .unwrap_or_else(|| "unknown error".to_string()),
                            });
                        }
                        info!(
                            "pipeline run {} completed for message {}",
                            context.pipeline_id, message.id
                        );
                        Ok(())
                    }
                }),
            )
            .await;
    }
}
