mod cli;
mod core;
mod errors;
mod pipeline;
mod processors;
mod queue;
mod scheduler;
mod server;

use anyhow::{Context, Result};
use chrono::Utc;
use crate::cli::commands::{
    QueueAction, QueueCommand, RunCommand, ScheduleAction, ScheduleCommand, ServeCommand,
};
use crate::cli::output::*;
use crate::cli::{Cli, Command};
use crate::core::context::RunStatus;
use crate::core::schedule::Schedule;
use crate::core::EngineConfig;
use crate::pipeline::{Orchestrator, OrchestratorConfig};
use crate::processors::{HeuristicExtractor, MemoryGraph};
use crate::queue::{MessageQueue, QueueConfig, QueueStatsReport};
use crate::scheduler::{Scheduler, SchedulerConfig};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Load configuration
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, &config).await?,
        Command::Schedule(cmd) => manage_schedules(cmd, &config).await?,
        Command::Queue(cmd) => manage_queue(cmd, &config).await?,
        Command::Serve(cmd) => serve(cmd, &config).await?,
    }

    Ok(())
}

/// Build the orchestrator with the built-in pipelines wired to the default
/// in-process extractor and graph store.
async fn build_orchestrator() -> Arc<Orchestrator> {
    let orchestrator = Orchestrator::new(OrchestratorConfig::default());
    processors::register_builtin_pipelines(
        &orchestrator,
        Arc::new(HeuristicExtractor),
        MemoryGraph::new(),
    )
    .await;
    orchestrator
}

fn schedules_path(config: &EngineConfig) -> PathBuf {
    config.scheduler.schedules_file.clone().unwrap_or_else(|| {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        data_dir.join("conveyor").join("schedules.json")
    })
}

/// Build a scheduler with schedules from the schedules file, or the default
/// set when no file exists yet.
async fn build_scheduler(
    queue: Arc<MessageQueue>,
    orchestrator: Arc<Orchestrator>,
    config: &EngineConfig,
    install_defaults: bool,
) -> Arc<Scheduler> {
    let scheduler = Scheduler::new(
        queue,
        orchestrator,
        SchedulerConfig {
            tick: Duration::from_secs(config.scheduler.tick_secs.max(1)),
        },
    );

    let path = schedules_path(config);
    if path.exists() {
        if let Err(err) = scheduler.load_schedules(&path).await {
            error!("{:#}", err);
        }
    } else if install_defaults {
        scheduler.install_default_schedules().await;
    }

    scheduler
}

async fn run_pipeline(cmd: &RunCommand, _config: &EngineConfig) -> Result<()> {
    let orchestrator = build_orchestrator().await;

    // Assemble the input object; values that parse as JSON stay typed
    let mut input = serde_json::Map::new();
    for (key, value) in &cmd.param {
        let parsed = serde_json::from_str(value).unwrap_or_else(|_| json!(value));
        input.insert(key.clone(), parsed);
    }

    let context = orchestrator
        .run_pipeline(&cmd.pipeline, Value::Object(input))
        .await
        .with_context(|| format!("Failed to run pipeline '{}'", cmd.pipeline))?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&context)?);
    } else {
        println!("{} {}", INFO, format_context(&context));
        for (step, result) in &context.results {
            let rendered = serde_json::to_string(result)?;
            let short = if rendered.len() > 120 {
                format!("{}...", &rendered[..120])
            } else {
                rendered
            };
            println!("  {} = {}", style(step).cyan(), style(short).dim());
        }
    }

    if context.status == RunStatus::Failed {
        println!(
            "{} {}",
            CROSS,
            style(context.error.as_deref().unwrap_or("pipeline failed")).red()
        );
        std::process::exit(1);
    }

    println!("{} {} {}", CHECK, style(&cmd.pipeline).bold(), style("completed").green());
    Ok(())
}

async fn manage_schedules(cmd: &ScheduleCommand, config: &EngineConfig) -> Result<()> {
    let queue = MessageQueue::new(QueueConfig::from(&config.queue));
    let orchestrator = build_orchestrator().await;
    let scheduler = build_scheduler(queue.clone(), orchestrator.clone(), config, true).await;
    let path = schedules_path(config);

    match &cmd.action {
        ScheduleAction::List { json } => {
            let schedules = scheduler.get_schedules().await;
            if *json {
                println!("{}", serde_json::to_string_pretty(&schedules)?);
            } else if schedules.is_empty() {
                println!("{} No schedules configured", INFO);
            } else {
                for schedule in &schedules {
                    println!("{}", format_schedule(schedule));
                }
            }
        }
        ScheduleAction::Show { id, json } => match scheduler.get_schedule(id).await {
            Some(schedule) => {
                if *json {
                    println!("{}", serde_json::to_string_pretty(&schedule)?);
                } else {
                    println!("{}", format_schedule(&schedule));
                    if let Some(description) = &schedule.description {
                        println!("  {}", style(description).dim());
                    }
                }
            }
            None => {
                println!("{} Schedule '{}' not found", WARN, id);
                std::process::exit(1);
            }
        },
        ScheduleAction::Add { file } => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file))?;
            let value: Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", file))?;

            let schedules: Vec<Schedule> = if value.is_array() {
                serde_json::from_value(value).context("Failed to parse schedules")?
            } else {
                vec![serde_json::from_value(value).context("Failed to parse schedule")?]
            };

            let count = schedules.len();
            for schedule in schedules {
                println!("{} Added schedule {}", CHECK, style(&schedule.id).bold());
                scheduler.add_schedule(schedule).await;
            }
            scheduler.save_schedules(&path).await?;
            info!("saved {} schedules to {}", count, path.display());
        }
        ScheduleAction::Remove { id } => {
            if scheduler.remove_schedule(id).await {
                scheduler.save_schedules(&path).await?;
                println!("{} Removed schedule {}", CHECK, style(id).bold());
            } else {
                println!("{} Schedule '{}' not found", WARN, id);
                std::process::exit(1);
            }
        }
        ScheduleAction::Enable { id } => {
            if scheduler.enable_schedule(id).await {
                scheduler.save_schedules(&path).await?;
                println!("{} Enabled schedule {}", CHECK, style(id).bold());
            } else {
                println!("{} Schedule '{}' not found", WARN, id);
                std::process::exit(1);
            }
        }
        ScheduleAction::Disable { id } => {
            if scheduler.disable_schedule(id).await {
                scheduler.save_schedules(&path).await?;
                println!("{} Disabled schedule {}", CHECK, style(id).bold());
            } else {
                println!("{} Schedule '{}' not found", WARN, id);
                std::process::exit(1);
            }
        }
        ScheduleAction::RunNow { id } => {
            scheduler::register_pipeline_handlers(&queue, &orchestrator).await;
            queue.start(false).await;

            if !scheduler.run_now(id).await {
                println!("{} Could not run schedule '{}'", CROSS, id);
                queue.stop().await;
                std::process::exit(1);
            }

            // Wait for the enqueued job to finish
            let deadline = std::time::Instant::now() + Duration::from_secs(30);
            loop {
                let stats = queue.stats().await;
                if stats.current_size == 0 && stats.processed + stats.failed >= 1 {
                    break;
                }
                if std::time::Instant::now() > deadline {
                    println!("{} Timed out waiting for the job to finish", WARN);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            queue.stop().await;
            scheduler.save_schedules(&path).await?;

            let stats = queue.stats().await;
            if stats.failed > 0 {
                println!("{} Schedule '{}' ran but the job failed", CROSS, id);
                std::process::exit(1);
            }
            println!("{} Ran schedule {}", CHECK, style(id).bold());
        }
    }

    Ok(())
}

async fn manage_queue(cmd: &QueueCommand, config: &EngineConfig) -> Result<()> {
    match &cmd.action {
        QueueAction::Start { persistence_file } => {
            let mut queue_config = QueueConfig::from(&config.queue);
            if let Some(path) = persistence_file {
                queue_config.persistence_file = Some(PathBuf::from(path));
            }
            if queue_config.persistence_file.is_none() {
                queue_config.persistence_file = Some(config.snapshot_path());
            }

            let queue = MessageQueue::new(queue_config);
            let orchestrator = build_orchestrator().await;
            scheduler::register_pipeline_handlers(&queue, &orchestrator).await;

            queue.start(false).await;
            println!("{} Queue worker started (ctrl-c to stop)", INFO);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = tokio::time::sleep(Duration::from_secs(10)) => {
                        let stats = queue.stats().await;
                        info!(
                            "queue stats: enqueued={} processed={} retried={} failed={} size={}",
                            stats.enqueued, stats.processed, stats.retried, stats.failed,
                            stats.current_size
                        );
                    }
                }
            }

            println!("{} Shutting down queue worker", INFO);
            queue.stop().await;
        }
        QueueAction::Stats { persistence_file } => {
            let path = persistence_file
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| config.snapshot_path());

            let snapshot = queue::persistence::read_snapshot(&path)
                .with_context(|| format!("Failed to load snapshot from {}", path.display()))?;

            let uptime =
                (Utc::now() - snapshot.stats.start_time).num_milliseconds() as f64 / 1000.0;
            let report = QueueStatsReport {
                enqueued: snapshot.stats.enqueued,
                processed: snapshot.stats.processed,
                retried: snapshot.stats.retried,
                failed: snapshot.stats.failed,
                current_size: snapshot.queue.len(),
                uptime_seconds: uptime,
                processed_messages: snapshot.processed.len(),
                messages_per_second: snapshot.stats.processed as f64 / uptime.max(1.0),
            };
            println!("{}", format_queue_stats(&report));
        }
    }

    Ok(())
}

async fn serve(cmd: &ServeCommand, config: &EngineConfig) -> Result<()> {
    let mut queue_config = QueueConfig::from(&config.queue);
    if queue_config.persistence_file.is_none() {
        queue_config.persistence_file = Some(config.snapshot_path());
    }

    let queue = MessageQueue::new(queue_config);
    let orchestrator = build_orchestrator().await;
    let scheduler = build_scheduler(
        queue.clone(),
        orchestrator.clone(),
        config,
        !cmd.no_default_schedules,
    )
    .await;

    scheduler.start(false).await;

    let state = server::AppState {
        orchestrator: orchestrator.clone(),
        queue: queue.clone(),
        token: config.webhook_token(),
    };
    if state.token.is_none() {
        println!(
            "{} No webhook token configured; trigger requests will be rejected",
            WARN
        );
    }

    let host = cmd.host.clone().unwrap_or_else(|| config.server.host.clone());
    let port = cmd.port.unwrap_or(config.server.port);

    tokio::select! {
        result = server::serve(state, &host, port) => {
            if let Err(err) = result {
                error!("webhook server error: {:#}", err);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("{} Shutting down", INFO);
        }
    }

    scheduler.stop().await;
    queue.stop().await;
    scheduler.save_schedules(&schedules_path(config)).await?;

    Ok(())
}
