//! Schedule JSON import/export wire format

use conveyor::core::schedule::{ScheduleType, ScheduleUpdate};
use conveyor::pipeline::{Orchestrator, OrchestratorConfig};
use conveyor::queue::{MessageQueue, QueueConfig};
use conveyor::scheduler::{Scheduler, SchedulerConfig};
use std::sync::Arc;

fn scheduler() -> Arc<Scheduler> {
    Scheduler::new(
        MessageQueue::new(QueueConfig::default()),
        Orchestrator::new(OrchestratorConfig::default()),
        SchedulerConfig::default(),
    )
}

#[tokio::test]
async fn schedules_load_from_wire_format_json() {
    let dir = std::env::temp_dir().join("conveyor-import-tests");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("schedules.json");

    std::fs::write(
        &path,
        r#"[
            {
                "id": "email-processing",
                "name": "Email Processing",
                "type": "interval",
                "target": "process_email",
                "interval_seconds": 600,
                "parameters": {"max_results": 20},
                "enabled": true
            },
            {
                "id": "daily-summary",
                "name": "Daily Summary",
                "type": "daily",
                "target": "generate_daily_summary",
                "daily_time": "08:00"
            },
            {
                "id": "weekly-report",
                "name": "Weekly Report",
                "type": "cron",
                "target": "generate_report",
                "cron_expression": "0 9 * * 1",
                "enabled": false
            }
        ]"#,
    )
    .unwrap();

    let scheduler = scheduler();
    let count = scheduler.load_schedules(&path).await.unwrap();
    assert_eq!(count, 3);

    let email = scheduler.get_schedule("email-processing").await.unwrap();
    assert_eq!(email.schedule_type, ScheduleType::Interval);
    assert_eq!(email.interval_seconds, Some(600));
    assert_eq!(email.parameters["max_results"], serde_json::json!(20));
    assert!(email.next_run.is_some(), "enabled schedule gets a next_run");

    let summary = scheduler.get_schedule("daily-summary").await.unwrap();
    assert_eq!(summary.schedule_type, ScheduleType::Daily);
    let next = summary.next_run.unwrap();
    assert!(next > chrono::Utc::now());

    // Disabled on import stays disabled with no next_run
    let report = scheduler.get_schedule("weekly-report").await.unwrap();
    assert!(!report.enabled);
    assert!(report.next_run.is_none());

    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn save_and_reload_preserves_runtime_counters() {
    let dir = std::env::temp_dir().join("conveyor-import-tests");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("counters.json");
    std::fs::remove_file(&path).ok();

    let first = scheduler();
    first
        .add_schedule(conveyor::Schedule::interval("s1", "Every 5", "echo", 5))
        .await;
    first
        .update_schedule(
            "s1",
            ScheduleUpdate {
                description: Some("test schedule".to_string()),
                ..Default::default()
            },
        )
        .await;
    first.save_schedules(&path).await.unwrap();

    let second = scheduler();
    second.load_schedules(&path).await.unwrap();
    let loaded = second.get_schedule("s1").await.unwrap();
    assert_eq!(loaded.description.as_deref(), Some("test schedule"));
    assert_eq!(loaded.runs, 0);
    assert_eq!(loaded.target, "echo");

    std::fs::remove_file(&path).ok();
}
