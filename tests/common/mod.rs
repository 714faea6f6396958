//! Shared test doubles and helpers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conveyor::core::step::Capability;
use conveyor::errors::EngineError;
use conveyor::queue::{handler, Handler};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Handler that records each invocation time
pub fn recording_handler() -> (Handler, Arc<Mutex<Vec<DateTime<Utc>>>>) {
    let times: Arc<Mutex<Vec<DateTime<Utc>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = times.clone();
    let handler = handler(move |_message| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(Utc::now());
            Ok(())
        }
    });
    (handler, times)
}

/// Capability that always fails with a temporary error
pub struct AlwaysFails;

#[async_trait]
impl Capability for AlwaysFails {
    async fn call(&self, _input: Value) -> Result<Value, EngineError> {
        Err(EngineError::Temporary("deliberate failure".into()))
    }
}

/// Poll until `check` passes or the timeout elapses
pub async fn wait_for<F>(timeout: Duration, check: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + timeout;
    while !check() {
        assert!(
            Instant::now() < deadline,
            "condition not met within {:?}",
            timeout
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
