//! CLI output formatting

use crate::core::context::{PipelineContext, RunStatus};
use crate::core::schedule::Schedule;
use crate::queue::QueueStatsReport;
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏰ ", "@ ");

/// Format a run status for display
pub fn format_run_status(status: RunStatus) -> String {
    match status {
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Completed => style("COMPLETED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// One-line summary of a pipeline run
pub fn format_context(context: &PipelineContext) -> String {
    let duration = context
        .duration_secs()
        .map(|secs| format!(" in {:.2}s", secs))
        .unwrap_or_default();
    format!(
        "{} - {}{} ({} step results)",
        style(&context.pipeline_id).bold(),
        format_run_status(context.status),
        duration,
        context.results.len()
    )
}

/// One-line summary of a schedule
pub fn format_schedule(schedule: &Schedule) -> String {
    let state = if schedule.enabled {
        style("enabled").green().to_string()
    } else {
        style("disabled").dim().to_string()
    };
    let next = match &schedule.next_run {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    };
    format!(
        "{} {} [{}] -> {} ({}) next: {} runs: {} failures: {}",
        CLOCK,
        style(&schedule.id).bold(),
        schedule.name,
        style(&schedule.target).cyan(),
        state,
        style(next).dim(),
        schedule.runs,
        schedule.failures
    )
}

/// Multi-line queue statistics block
pub fn format_queue_stats(stats: &QueueStatsReport) -> String {
    let uptime = format_uptime(stats.uptime_seconds);
    format!(
        "Queue Statistics\n\
         ---------------\n\
         Enqueued messages:  {}\n\
         Processed messages: {}\n\
         Retried messages:   {}\n\
         Failed messages:    {}\n\
         Current queue size: {}\n\
         History size:       {}\n\
         Uptime:             {}\n\
         Processing rate:    {:.2} messages/second",
        stats.enqueued,
        stats.processed,
        stats.retried,
        stats.failed,
        stats.current_size,
        stats.processed_messages,
        uptime,
        stats.messages_per_second
    )
}

fn format_uptime(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let secs = total % 60;
    format!("{}d {}h {}m {}s", days, hours, minutes, secs)
}
