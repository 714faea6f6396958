//! Message domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Message priority; lower sorts first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// One unit of work moving through the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Generated unique id
    pub id: Uuid,

    /// Type tag used for handler lookup
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque payload handed to handlers
    pub payload: HashMap<String, Value>,

    pub priority: Priority,

    pub created_at: DateTime<Utc>,

    /// When set, the message must not be delivered before this time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,

    pub retry_count: u32,

    pub max_retries: u32,

    pub processed: bool,

    /// Last failure text, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl Message {
    pub fn new(kind: impl Into<String>, payload: HashMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            priority: Priority::Medium,
            created_at: Utc::now(),
            scheduled_time: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            processed: false,
            error: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scheduled_time(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_time = Some(at);
        self
    }

    /// A message is eligible for execution iff it has no scheduled time or
    /// that time has passed.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.scheduled_time {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// The timestamp used for ordering: `scheduled_time` if set, else `created_at`.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.scheduled_time.unwrap_or(self.created_at)
    }
}

/// Input for [`crate::queue::MessageQueue::enqueue_batch`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: HashMap<String, Value>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
    }

    #[test]
    fn test_readiness() {
        let now = Utc::now();
        let immediate = Message::new("echo", HashMap::new());
        assert!(immediate.is_ready(now));

        let later = Message::new("echo", HashMap::new())
            .with_scheduled_time(now + Duration::seconds(30));
        assert!(!later.is_ready(now));
        assert!(later.is_ready(now + Duration::seconds(31)));
    }

    #[test]
    fn test_effective_time_prefers_schedule() {
        let now = Utc::now();
        let msg = Message::new("echo", HashMap::new());
        assert_eq!(msg.effective_time(), msg.created_at);

        let scheduled = msg.clone().with_scheduled_time(now + Duration::seconds(5));
        assert_eq!(scheduled.effective_time(), now + Duration::seconds(5));
    }

    #[test]
    fn test_serde_round_trip_uses_type_field() {
        let msg = Message::new("process_email", HashMap::new());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "process_email");

        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind, "process_email");
        assert_eq!(back.id, msg.id);
    }
}
