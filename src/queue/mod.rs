//! Priority message queue with retry, backoff, and snapshot persistence

pub mod persistence;

pub use persistence::QueueSnapshot;

use crate::core::message::{Message, MessageSpec, Priority};
use crate::errors::EngineError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Result of one handler invocation
pub type HandlerResult = Result<(), EngineError>;

/// A function registered against a message type
pub type Handler = Arc<dyn Fn(Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wrap an async closure into a [`Handler`]
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Queue construction options
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Snapshot file; `None` disables persistence
    pub persistence_file: Option<PathBuf>,

    /// Bound on the processed-message history (oldest evicted first)
    pub max_messages: usize,

    /// How often the idle worker writes a snapshot
    pub persistence_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            persistence_file: None,
            max_messages: 1000,
            persistence_interval: Duration::from_secs(60),
        }
    }
}

impl From<&crate::core::config::QueueSettings> for QueueConfig {
    fn from(settings: &crate::core::config::QueueSettings) -> Self {
        Self {
            persistence_file: settings.persistence_file.clone(),
            max_messages: settings.max_messages,
            persistence_interval: Duration::from_secs(settings.persistence_interval_secs),
        }
    }
}

/// Lifetime counters, persisted with snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub processed: u64,
    pub retried: u64,
    pub failed: u64,
    pub start_time: DateTime<Utc>,
}

impl QueueStats {
    pub fn new() -> Self {
        Self {
            enqueued: 0,
            processed: 0,
            retried: 0,
            failed: 0,
            start_time: Utc::now(),
        }
    }
}

impl Default for QueueStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view returned by [`MessageQueue::stats`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatsReport {
    pub enqueued: u64,
    pub processed: u64,
    pub retried: u64,
    pub failed: u64,
    pub current_size: usize,
    pub uptime_seconds: f64,
    pub processed_messages: usize,
    pub messages_per_second: f64,
}

/// Heap entry ordered by `(priority, effective_time, insertion order)`
#[derive(Debug, Clone)]
struct QueuedEntry {
    message: Message,
    seq: u64,
}

impl QueuedEntry {
    fn key(&self) -> (Priority, DateTime<Utc>, u64) {
        (self.message.priority, self.message.effective_time(), self.seq)
    }
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedEntry {}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

/// Everything guarded by the queue's single lock. Snapshots iterate this
/// structure in place; nothing ever drains it to serialize it.
struct QueueInner {
    heap: BinaryHeap<Reverse<QueuedEntry>>,
    next_seq: u64,
    history: VecDeque<Message>,
    stats: QueueStats,
}

impl QueueInner {
    fn push(&mut self, message: Message) {
        let entry = QueuedEntry {
            message,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.heap.push(Reverse(entry));
    }

    fn push_history(&mut self, message: Message, max_messages: usize) {
        self.history.push_back(message);
        while self.history.len() > max_messages {
            self.history.pop_front();
        }
    }

    fn pending_messages(&self) -> Vec<Message> {
        self.heap
            .iter()
            .map(|Reverse(entry)| entry.message.clone())
            .collect()
    }
}

enum Polled {
    Ready(Box<Message>),
    NotDue(Duration),
    Empty,
}

/// Thread-safe priority queue with handler dispatch, retry, and persistence
pub struct MessageQueue {
    inner: Mutex<QueueInner>,
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
    config: QueueConfig,
    running: AtomicBool,
    wakeup: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MessageQueue {
    /// Create a queue, loading a persisted snapshot if one exists.
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let mut inner = QueueInner {
            heap: BinaryHeap::new(),
            next_seq: 0,
            history: VecDeque::new(),
            stats: QueueStats::new(),
        };

        if let Some(path) = &config.persistence_file {
            if path.exists() {
                match persistence::read_snapshot(path) {
                    Ok(snapshot) => {
                        for message in snapshot.queue {
                            inner.push(message);
                        }
                        inner.history = snapshot.processed.into();
                        // Loaded counters replace the running totals wholesale,
                        // matching the snapshot format's semantics
                        inner.stats = snapshot.stats;
                        info!(
                            "loaded {} queued and {} processed messages from {}",
                            inner.heap.len(),
                            inner.history.len(),
                            path.display()
                        );
                    }
                    Err(err) => error!("error loading persisted queue: {:#}", err),
                }
            }
        }

        info!("message queue initialized");
        Arc::new(Self {
            inner: Mutex::new(inner),
            handlers: RwLock::new(HashMap::new()),
            config,
            running: AtomicBool::new(false),
            wakeup: Notify::new(),
            worker: Mutex::new(None),
        })
    }

    /// Register a handler for a message type. Multiple handlers per type are
    /// invoked in registration order.
    pub async fn register_handler(&self, message_type: &str, handler: Handler) {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(message_type.to_string())
            .or_default()
            .push(handler);
        info!("registered handler for message type '{}'", message_type);
    }

    /// Add a message to the queue and return its generated id.
    pub async fn enqueue(
        &self,
        message_type: &str,
        payload: HashMap<String, Value>,
        priority: Priority,
        scheduled_time: Option<DateTime<Utc>>,
    ) -> Uuid {
        let mut message = Message::new(message_type, payload).with_priority(priority);
        message.scheduled_time = scheduled_time;
        self.enqueue_message(message).await
    }

    /// Add a pre-built message; used by the retry path and batch enqueue.
    pub async fn enqueue_message(&self, message: Message) -> Uuid {
        let id = message.id;
        let kind = message.kind.clone();

        let snapshot_due = {
            let mut inner = self.inner.lock().await;
            inner.push(message);
            inner.stats.enqueued += 1;
            // Snapshot every 10 enqueues when persistence is configured
            self.config.persistence_file.is_some() && inner.stats.enqueued % 10 == 0
        };

        info!("enqueued {} message with id {}", kind, id);

        if snapshot_due {
            if let Err(err) = self.save_snapshot().await {
                error!("error persisting queue: {:#}", err);
            }
        }

        self.wakeup.notify_one();
        id
    }

    /// Enqueue several messages; ids are returned in input order.
    pub async fn enqueue_batch(&self, specs: Vec<MessageSpec>) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            ids.push(
                self.enqueue(&spec.kind, spec.payload, spec.priority, spec.scheduled_time)
                    .await,
            );
        }
        info!("enqueued batch of {} messages", ids.len());
        ids
    }

    /// Start the worker loop, either on this task or a background task.
    pub async fn start(self: &Arc<Self>, blocking: bool) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        if blocking {
            info!("starting message queue processing (blocking)");
            self.clone().run_loop().await;
        } else {
            info!("starting message queue processing (background)");
            let queue = self.clone();
            let handle = tokio::spawn(async move { queue.run_loop().await });
            *self.worker.lock().await = Some(handle);
        }
    }

    /// Signal the worker to exit, join it, and write a final snapshot.
    pub async fn stop(&self) {
        info!("stopping message queue processing");
        self.running.store(false, Ordering::SeqCst);
        self.wakeup.notify_one();

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("queue worker did not stop within 5s");
            }
        }

        if self.config.persistence_file.is_some() {
            if let Err(err) = self.save_snapshot().await {
                error!("error persisting queue on stop: {:#}", err);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current counters plus derived figures.
    pub async fn stats(&self) -> QueueStatsReport {
        let inner = self.inner.lock().await;
        let uptime = (Utc::now() - inner.stats.start_time).num_milliseconds() as f64 / 1000.0;
        QueueStatsReport {
            enqueued: inner.stats.enqueued,
            processed: inner.stats.processed,
            retried: inner.stats.retried,
            failed: inner.stats.failed,
            current_size: inner.heap.len(),
            uptime_seconds: uptime,
            processed_messages: inner.history.len(),
            messages_per_second: inner.stats.processed as f64 / uptime.max(1.0),
        }
    }

    /// Ids of messages still waiting in the queue.
    pub async fn pending_ids(&self) -> Vec<Uuid> {
        let inner = self.inner.lock().await;
        inner
            .heap
            .iter()
            .map(|Reverse(entry)| entry.message.id)
            .collect()
    }

    /// Terminal messages, oldest first.
    pub async fn history(&self) -> Vec<Message> {
        let inner = self.inner.lock().await;
        inner.history.iter().cloned().collect()
    }

    /// Serialize the queue under its own lock and write the snapshot.
    pub async fn save_snapshot(&self) -> anyhow::Result<()> {
        let Some(path) = &self.config.persistence_file else {
            return Ok(());
        };

        let snapshot = {
            let inner = self.inner.lock().await;
            QueueSnapshot {
                queue: inner.pending_messages(),
                processed: inner.history.iter().cloned().collect(),
                stats: inner.stats.clone(),
                timestamp: Utc::now(),
            }
        };

        persistence::write_snapshot(path, &snapshot)
    }

    async fn run_loop(self: Arc<Self>) {
        info!("message processing loop started");
        let mut last_snapshot = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            match self.poll_next().await {
                Polled::Ready(message) => self.dispatch(*message).await,
                Polled::NotDue(until) => {
                    // The head message is scheduled in the future; yield
                    // briefly rather than spinning
                    tokio::time::sleep(until.min(Duration::from_millis(100))).await;
                }
                Polled::Empty => {
                    if self.config.persistence_file.is_some()
                        && last_snapshot.elapsed() >= self.config.persistence_interval
                    {
                        if let Err(err) = self.save_snapshot().await {
                            error!("error persisting queue: {:#}", err);
                        }
                        last_snapshot = Instant::now();
                    }

                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!("message processing loop stopped");
    }

    async fn poll_next(&self) -> Polled {
        let mut inner = self.inner.lock().await;
        let Some(Reverse(head)) = inner.heap.peek() else {
            return Polled::Empty;
        };

        let now = Utc::now();
        if !head.message.is_ready(now) {
            let until = head
                .message
                .effective_time()
                .signed_duration_since(now)
                .to_std()
                .unwrap_or(Duration::from_millis(0));
            return Polled::NotDue(until);
        }

        match inner.heap.pop() {
            Some(Reverse(entry)) => Polled::Ready(Box::new(entry.message)),
            None => Polled::Empty,
        }
    }

    async fn dispatch(&self, mut message: Message) {
        let handlers = {
            let handlers = self.handlers.read().await;
            handlers.get(&message.kind).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            warn!("no handlers for message type '{}'", message.kind);
            message.error = Some("no handlers registered".to_string());
            message.processed = true;
            let mut inner = self.inner.lock().await;
            inner.stats.failed += 1;
            inner.push_history(message, self.config.max_messages);
            return;
        }

        let mut success = true;
        for handler in &handlers {
            if let Err(err) = handler(message.clone()).await {
                error!("error handling message {}: {}", message.id, err);
                message.error = Some(err.to_string());
                success = false;
            }
        }

        if success {
            message.processed = true;
            message.error = None;
            let mut inner = self.inner.lock().await;
            inner.stats.processed += 1;
            inner.push_history(message, self.config.max_messages);
        } else if message.retry_count < message.max_retries {
            message.retry_count += 1;
            let delay = 2u64.saturating_pow(message.retry_count);
            message.scheduled_time = Some(Utc::now() + ChronoDuration::seconds(delay as i64));
            info!(
                "requeueing message {} for retry {}/{} in {}s",
                message.id, message.retry_count, message.max_retries, delay
            );
            let mut inner = self.inner.lock().await;
            inner.stats.retried += 1;
            inner.push(message);
        } else {
            warn!(
                "message {} failed after {} retries",
                message.id, message.max_retries
            );
            message.processed = true;
            let mut inner = self.inner.lock().await;
            inner.stats.failed += 1;
            inner.push_history(message, self.config.max_messages);
        }
    }
}
