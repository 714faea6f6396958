//! Action item extraction and storage seams, plus the built-in pipelines
//!
//! The extraction service and the graph store are external collaborators;
//! they appear here as traits with in-process default implementations so the
//! engine runs end to end without either service.

use crate::core::step::{Capability, PipelineStep, VOID_INPUT};
use crate::errors::{with_retry, EngineError, RetryPolicy};
use crate::pipeline::{Orchestrator, PipelineDef};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Where a piece of content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Email,
    Slack,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Email => "email",
            SourceKind::Slack => "slack",
        }
    }
}

/// An action item as extracted from content, before storage
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractedItem {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

fn default_priority() -> String {
    "medium".to_string()
}

/// A stored action item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItemRecord {
    pub id: String,
    pub content: String,
    pub source: String,
    pub source_id: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub priority: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Source-specific extras (subject/sender for email, channel for slack)
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

/// Extraction service seam: `extract_action_items(content, kind) -> items`
#[async_trait]
pub trait ActionItemExtractor: Send + Sync {
    async fn extract_action_items(
        &self,
        content: &str,
        kind: SourceKind,
    ) -> Result<Vec<ExtractedItem>, EngineError>;
}

/// Graph storage seam
#[async_trait]
pub trait ActionGraph: Send + Sync {
    async fn create_action_item(&self, item: ActionItemRecord) -> Result<String, EngineError>;

    async fn link_action_to_person(
        &self,
        item_id: &str,
        person: &str,
        relation: &str,
    ) -> Result<(), EngineError>;

    async fn link_action_to_project(&self, item_id: &str, project: &str)
        -> Result<(), EngineError>;

    async fn get_action_items_by_status(
        &self,
        status: &str,
    ) -> Result<Vec<ActionItemRecord>, EngineError>;
}

/// Phrase-spotting extractor; good enough to exercise the pipelines without
/// the external extraction service.
pub struct HeuristicExtractor;

const REQUEST_MARKERS: [&str; 7] = [
    "please",
    "can you",
    "could you",
    "need to",
    "needs to",
    "action item",
    "todo",
];

const URGENT_MARKERS: [&str; 4] = ["urgent", "asap", "eod", "immediately"];
const RELAXED_MARKERS: [&str; 2] = ["no rush", "when you get a chance"];

impl HeuristicExtractor {
    fn extract_from_sentence(sentence: &str) -> Option<ExtractedItem> {
        let lowered = sentence.to_lowercase();
        if !REQUEST_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            return None;
        }

        let assignee = sentence
            .split_whitespace()
            .find_map(|word| word.strip_prefix('@'))
            .map(|name| name.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|name| !name.is_empty());

        let priority = if URGENT_MARKERS.iter().any(|m| lowered.contains(m)) {
            "high"
        } else if RELAXED_MARKERS.iter().any(|m| lowered.contains(m)) {
            "low"
        } else {
            "medium"
        };

        let today = Utc::now().date_naive();
        let due_date = if lowered.contains("today") || lowered.contains("eod") {
            Some(today.to_string())
        } else if lowered.contains("tomorrow") {
            Some((today + chrono::Duration::days(1)).to_string())
        } else {
            None
        };

        Some(ExtractedItem {
            content: sentence.trim().to_string(),
            assignee,
            due_date,
            priority: priority.to_string(),
            project: None,
        })
    }
}

#[async_trait]
impl ActionItemExtractor for HeuristicExtractor {
    async fn extract_action_items(
        &self,
        content: &str,
        kind: SourceKind,
    ) -> Result<Vec<ExtractedItem>, EngineError> {
        let items: Vec<ExtractedItem> = content
            .split(['.', '!', '?', '\n'])
            .filter_map(Self::extract_from_sentence)
            .collect();
        info!(
            "extracted {} action items from {} content",
            items.len(),
            kind.as_str()
        );
        Ok(items)
    }
}

/// In-memory graph store
pub struct MemoryGraph {
    items: Mutex<HashMap<String, ActionItemRecord>>,
    person_links: Mutex<Vec<(String, String, String)>>,
    project_links: Mutex<Vec<(String, String)>>,
}

impl MemoryGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(HashMap::new()),
            person_links: Mutex::new(Vec::new()),
            project_links: Mutex::new(Vec::new()),
        })
    }

    pub async fn person_links(&self) -> Vec<(String, String, String)> {
        self.person_links.lock().await.clone()
    }
}

#[async_trait]
impl ActionGraph for MemoryGraph {
    async fn create_action_item(&self, item: ActionItemRecord) -> Result<String, EngineError> {
        let id = item.id.clone();
        self.items.lock().await.insert(id.clone(), item);
        Ok(id)
    }

    async fn link_action_to_person(
        &self,
        item_id: &str,
        person: &str,
        relation: &str,
    ) -> Result<(), EngineError> {
        if !self.items.lock().await.contains_key(item_id) {
            return Err(EngineError::NotFound(format!("action item {}", item_id)));
        }
        self.person_links.lock().await.push((
            item_id.to_string(),
            person.to_string(),
            relation.to_string(),
        ));
        Ok(())
    }

    async fn link_action_to_project(
        &self,
        item_id: &str,
        project: &str,
    ) -> Result<(), EngineError> {
        if !self.items.lock().await.contains_key(item_id) {
            return Err(EngineError::NotFound(format!("action item {}", item_id)));
        }
        self.project_links
            .lock()
            .await
            .push((item_id.to_string(), project.to_string()));
        Ok(())
    }

    async fn get_action_items_by_status(
        &self,
        status: &str,
    ) -> Result<Vec<ActionItemRecord>, EngineError> {
        let items = self.items.lock().await;
        let mut matching: Vec<ActionItemRecord> = items
            .values()
            .filter(|item| item.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}

/// Stub email source; a real deployment swaps in the mail adapter here.
pub struct EmailSource;

#[async_trait]
impl Capability for EmailSource {
    async fn call(&self, query: Value) -> Result<Value, EngineError> {
        info!("fetching emails with query: {}", query);
        Ok(json!([{
            "id": "email123",
            "subject": "Project update meeting",
            "from": "john@example.com",
            "body": "Let's have a project update meeting tomorrow at 2pm. \
                     Jane, can you prepare the slides? \
                     Bob, please update the timeline for the landing page.",
            "date": "2023-05-01T10:30:00Z"
        }]))
    }
}

/// Stub Slack source
pub struct SlackSource;

#[async_trait]
impl Capability for SlackSource {
    async fn call(&self, query: Value) -> Result<Value, EngineError> {
        info!("fetching slack messages with query: {}", query);
        Ok(json!([{
            "id": "slack123",
            "text": "@sarah can you review the PR by EOD? It's urgent for the release tomorrow.",
            "user": {"name": "Tom", "email": "tom@example.com"},
            "channel_id": "C01234567",
            "timestamp": "1620000000.000000"
        }]))
    }
}

/// Extracts and stores action items from a batch of emails
pub struct ExtractEmailActions {
    pub extractor: Arc<dyn ActionItemExtractor>,
    pub graph: Arc<dyn ActionGraph>,
    /// Extraction calls go out to a flaky service; retry temporary failures
    pub retry: RetryPolicy,
}

#[async_trait]
impl Capability for ExtractEmailActions {
    async fn call(&self, input: Value) -> Result<Value, EngineError> {
        let emails = input
            .as_array()
            .ok_or_else(|| EngineError::Permanent("expected an array of emails".into()))?;

        let mut created_ids = Vec::new();
        for email in emails {
            let subject = email["subject"].as_str().unwrap_or("No Subject");
            let sender = email["from"].as_str().unwrap_or("Unknown");
            let body = email["body"].as_str().unwrap_or_default();
            let source_id = email["id"].as_str().unwrap_or_default();

            let content = format!("Subject: {}\n\nFrom: {}\n\n{}", subject, sender, body);
            let items = with_retry(&self.retry, || {
                self.extractor.extract_action_items(&content, SourceKind::Email)
            })
            .await?;

            for item in items {
                let record = ActionItemRecord {
                    id: Uuid::new_v4().to_string(),
                    content: item.content.clone(),
                    source: "email".to_string(),
                    source_id: source_id.to_string(),
                    created_at: Utc::now().to_rfc3339(),
                    due_date: item.due_date.clone(),
                    priority: item.priority.clone(),
                    status: "pending".to_string(),
                    assignee: item.assignee.clone(),
                    project: item.project.clone(),
                    extra: HashMap::from([
                        ("subject".to_string(), json!(subject)),
                        ("sender".to_string(), json!(sender)),
                    ]),
                };

                let id = self.graph.create_action_item(record).await?;

                if let Some(assignee) = &item.assignee {
                    self.graph
                        .link_action_to_person(&id, assignee, "ASSIGNED_TO")
                        .await?;
                }
                if !sender.is_empty() {
                    self.graph
                        .link_action_to_person(&id, sender, "SENT_BY")
                        .await?;
                }
                if let Some(project) = &item.project {
                    self.graph.link_action_to_project(&id, project).await?;
                }

                created_ids.push(id);
            }
        }

        info!("processed {} action items from email", created_ids.len());
        Ok(json!(created_ids))
    }
}

/// Extracts and stores action items from a batch of Slack messages
pub struct ExtractSlackActions {
    pub extractor: Arc<dyn ActionItemExtractor>,
    pub graph: Arc<dyn ActionGraph>,
    pub retry: RetryPolicy,
}

#[async_trait]
impl Capability for ExtractSlackActions {
    async fn call(&self, input: Value) -> Result<Value, EngineError> {
        let messages = input
            .as_array()
            .ok_or_else(|| EngineError::Permanent("expected an array of messages".into()))?;

        let mut created_ids = Vec::new();
        for message in messages {
            let text = message["text"].as_str().unwrap_or_default();
            let channel_id = message["channel_id"].as_str().unwrap_or("Unknown");
            let source_id = message["id"].as_str().unwrap_or_default();
            let sender = message["user"]["email"]
                .as_str()
                .or_else(|| message["user"]["name"].as_str())
                .or_else(|| message["user"].as_str());

            let sender_line = sender
                .map(|who| format!("From: {}", who))
                .unwrap_or_default();
            let content = format!("{}\n\nChannel: {}\n\n{}", sender_line, channel_id, text);
            let items = with_retry(&self.retry, || {
                self.extractor.extract_action_items(&content, SourceKind::Slack)
            })
            .await?;

            for item in items {
                let record = ActionItemRecord {
                    id: Uuid::new_v4().to_string(),
                    content: item.content.clone(),
                    source: "slack".to_string(),
                    source_id: source_id.to_string(),
                    created_at: Utc::now().to_rfc3339(),
                    due_date: item.due_date.clone(),
                    priority: item.priority.clone(),
                    status: "pending".to_string(),
                    assignee: item.assignee.clone(),
                    project: item.project.clone(),
                    extra: HashMap::from([
                        ("channel_id".to_string(), json!(channel_id)),
                        ("timestamp".to_string(), message["timestamp"].clone()),
                    ]),
                };

                let id = self.graph.create_action_item(record).await?;

                if let Some(assignee) = &item.assignee {
                    self.graph
                        .link_action_to_person(&id, assignee, "ASSIGNED_TO")
                        .await?;
                }
                if let Some(sender) = sender {
                    self.graph
                        .link_action_to_person(&id, sender, "SENT_BY")
                        .await?;
                }
                if let Some(project) = &item.project {
                    self.graph.link_action_to_project(&id, project).await?;
                }

                created_ids.push(id);
            }
        }

        info!(
            "processed {} action items from slack messages",
            created_ids.len()
        );
        Ok(json!(created_ids))
    }
}

/// Builds the daily summary of pending action items
pub struct BuildSummary {
    pub graph: Arc<dyn ActionGraph>,
}

#[async_trait]
impl Capability for BuildSummary {
    async fn call(&self, _input: Value) -> Result<Value, EngineError> {
        let mut pending = self.graph.get_action_items_by_status("pending").await?;

        // High priority first, then earliest due date
        pending.sort_by_key(|item| {
            let priority_rank = match item.priority.as_str() {
                "high" => 0,
                "medium" => 1,
                "low" => 2,
                _ => 3,
            };
            (
                priority_rank,
                item.due_date.clone().unwrap_or_else(|| "9999-12-31".to_string()),
            )
        });

        let mut items_by_project: HashMap<String, Vec<Value>> = HashMap::new();
        for item in &pending {
            let project = item.project.clone().unwrap_or_else(|| "Unassigned".to_string());
            items_by_project
                .entry(project)
                .or_default()
                .push(json!(item));
        }

        let by_priority = |priority: &str| -> Vec<Value> {
            pending
                .iter()
                .filter(|item| item.priority == priority)
                .map(|item| json!(item))
                .collect()
        };

        let today = Utc::now().date_naive().to_string();
        let summary = json!({
            "date": today,
            "total_items": pending.len(),
            "projects": items_by_project.keys().cloned().collect::<Vec<_>>(),
            "items_by_project": items_by_project,
            "items_by_priority": {
                "high": by_priority("high"),
                "medium": by_priority("medium"),
                "low": by_priority("low"),
            },
            "action_items": pending.iter().map(|item| json!(item)).collect::<Vec<_>>(),
        });

        info!(
            "generated summary with {} action items across {} projects",
            pending.len(),
            summary["projects"].as_array().map(|p| p.len()).unwrap_or(0)
        );
        Ok(summary)
    }
}

/// Delivery sink for the daily summary; logs instead of sending mail.
pub struct DeliverSummary {
    pub recipient: String,
}

#[async_trait]
impl Capability for DeliverSummary {
    async fn call(&self, summary: Value) -> Result<Value, EngineError> {
        let total = summary["total_items"].as_u64().unwrap_or(0);
        info!("delivering summary with {} items to {}", total, self.recipient);
        Ok(json!({
            "status": "sent",
            "recipient": self.recipient,
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }
}

/// Register the reference deployment's three pipelines: email, slack, summary.
pub async fn register_builtin_pipelines(
    orchestrator: &Orchestrator,
    extractor: Arc<dyn ActionItemExtractor>,
    graph: Arc<dyn ActionGraph>,
) {
    orchestrator
        .register_pipeline(PipelineDef::new(
            "email",
            "process_email",
            vec![
                PipelineStep::new("retrieve_email", Arc::new(EmailSource), "email_query", "email_data"),
                PipelineStep::new(
                    "process_email",
                    Arc::new(ExtractEmailActions {
                        extractor: extractor.clone(),
                        graph: graph.clone(),
                        retry: RetryPolicy::default(),
                    }),
                    "email_data",
                    "action_item_ids",
                ),
            ],
        ))
        .await;

    orchestrator
        .register_pipeline(PipelineDef::new(
            "slack",
            "process_slack",
            vec![
                PipelineStep::new(
                    "retrieve_slack_messages",
                    Arc::new(SlackSource),
                    "slack_query",
                    "slack_data",
                ),
                PipelineStep::new(
                    "process_slack_message",
                    Arc::new(ExtractSlackActions {
                        extractor: extractor.clone(),
                        graph: graph.clone(),
                        retry: RetryPolicy::default(),
                    }),
                    "slack_data",
                    "action_item_ids",
                ),
            ],
        ))
        .await;

    orchestrator
        .register_pipeline(PipelineDef::new(
            "summary",
            "generate_daily_summary",
            vec![
                PipelineStep::new(
                    "generate_summary",
                    Arc::new(BuildSummary {
                        graph: graph.clone(),
                    }),
                    VOID_INPUT,
                    "summary",
                ),
                PipelineStep::new(
                    "send_summary_email",
                    Arc::new(DeliverSummary {
                        recipient: "user@example.com".to_string(),
                    }),
                    "summary",
                    "notification_status",
                ),
            ],
        ))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::RunStatus;
    use crate::pipeline::OrchestratorConfig;

    #[tokio::test]
    async fn test_heuristic_extractor_finds_requests() {
        let extractor = HeuristicExtractor;
        let content = "Hello all. Jane, can you prepare the slides? \
                       The weather is nice. @bob please update the timeline";

        let items = extractor
            .extract_action_items(content, SourceKind::Email)
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert!(items[0].content.contains("prepare the slides"));
        assert_eq!(items[1].assignee.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_heuristic_extractor_priority_and_due() {
        let extractor = HeuristicExtractor;
        let items = extractor
            .extract_action_items(
                "@sarah can you review the PR by EOD? It's urgent",
                SourceKind::Slack,
            )
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].priority, "high");
        assert!(items[0].due_date.is_some());
    }

    #[tokio::test]
    async fn test_memory_graph_links_require_item() {
        let graph = MemoryGraph::new();
        let missing = graph.link_action_to_person("nope", "alice", "ASSIGNED_TO").await;
        assert!(matches!(missing, Err(EngineError::NotFound(_))));

        let id = graph
            .create_action_item(ActionItemRecord {
                id: "item-1".to_string(),
                content: "do the thing".to_string(),
                source: "email".to_string(),
                source_id: "e1".to_string(),
                created_at: Utc::now().to_rfc3339(),
                due_date: None,
                priority: "medium".to_string(),
                status: "pending".to_string(),
                assignee: None,
                project: None,
                extra: HashMap::new(),
            })
            .await
            .unwrap();

        graph
            .link_action_to_person(&id, "alice", "ASSIGNED_TO")
            .await
            .unwrap();
        assert_eq!(graph.person_links().await.len(), 1);

        let pending = graph.get_action_items_by_status("pending").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(graph
            .get_action_items_by_status("done")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_email_pipeline_end_to_end() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let graph = MemoryGraph::new();
        register_builtin_pipelines(&orchestrator, Arc::new(HeuristicExtractor), graph.clone())
            .await;

        let context = orchestrator
            .run_pipeline("email", json!({"max_results": 10}))
            .await
            .unwrap();

        assert_eq!(context.status, RunStatus::Completed);
        let ids = context.get_result("process_email").unwrap().as_array().unwrap();
        // The sample email carries two requests
        assert_eq!(ids.len(), 2);

        let stored = graph.get_action_items_by_status("pending").await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|item| item.source == "email"));
    }

    #[tokio::test]
    async fn test_summary_pipeline_groups_by_priority() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let graph = MemoryGraph::new();
        register_builtin_pipelines(&orchestrator, Arc::new(HeuristicExtractor), graph.clone())
            .await;

        // Feed the graph through the slack pipeline first (urgent item)
        orchestrator.run_pipeline("slack", json!({})).await.unwrap();

        let context = orchestrator.run_pipeline("summary", json!(null)).await.unwrap();
        assert_eq!(context.status, RunStatus::Completed);

        let summary = context.get_result("generate_summary").unwrap();
        assert!(summary["total_items"].as_u64().unwrap() >= 1);
        assert!(!summary["items_by_priority"]["high"].as_array().unwrap().is_empty());

        let delivery = context.get_result("send_summary_email").unwrap();
        assert_eq!(delivery["status"], "sent");
    }
}
