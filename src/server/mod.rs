//! Webhook trigger surface
//!
//! Accepts an HTTP request, validates a shared bearer token, and runs the
//! matching pipeline on a spawned task so the response returns immediately.

use crate::pipeline::Orchestrator;
use crate::queue::MessageQueue;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared state for the webhook server
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub queue: Arc<MessageQueue>,
    /// Shared bearer token; `None` rejects every trigger request
    pub token: Option<String>,
}

/// Build the router: `POST /webhook/{pipeline}` and `GET /health`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/{pipeline}", post(trigger_pipeline))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until the task is cancelled.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("webhook server started on http://{}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn authorized(state: &AppState, headers: &HeaderMap, body: &Value) -> bool {
    let Some(expected) = &state.token else {
        warn!("no webhook token configured");
        return false;
    };

    // Authorization header first, then a token field in the body
    let from_header = headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let token = from_header.or_else(|| body["token"].as_str());

    match token {
        Some(token) => token == expected,
        None => {
            warn!("no token found in request");
            false
        }
    }
}

async fn trigger_pipeline(
    State(state): State<AppState>,
    Path(pipeline): Path<String>,
    headers: HeaderMap,
    raw_body: Bytes,
) -> (StatusCode, Json<Value>) {
    // An empty body is allowed (summary has no parameters); bad JSON is not
    let body = if raw_body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&raw_body) {
            Ok(value) => value,
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "Invalid JSON"})),
                );
            }
        }
    };

    if !authorized(&state, &headers, &body) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid webhook token"})),
        );
    }

    if !state
        .orchestrator
        .pipeline_names()
        .await
        .contains(&pipeline)
    {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown pipeline '{}'", pipeline)})),
        );
    }

    info!("received webhook for pipeline '{}'", pipeline);

    // Run in the background; the caller gets an immediate acknowledgement
    let orchestrator = state.orchestrator.clone();
    let name = pipeline.clone();
    tokio::spawn(async move {
        match orchestrator.run_pipeline(&name, body).await {
            Ok(context) => {
                if let Some(err) = &context.error {
                    error!("{} pipeline error: {}", name, err);
                } else {
                    info!("{} pipeline completed: {}", name, context.pipeline_id);
                }
            }
            Err(err) => error!("error running {} pipeline: {}", name, err),
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "processing",
            "message": format!("{} processing started", pipeline),
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.queue.stats().await;
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "pipeline_history_count": state.orchestrator.history_len().await,
        "queue": stats,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::OrchestratorConfig;
    use crate::queue::QueueConfig;

    fn state(token: Option<&str>) -> AppState {
        AppState {
            orchestrator: Orchestrator::new(OrchestratorConfig::default()),
            queue: MessageQueue::new(QueueConfig::default()),
            token: token.map(str::to_string),
        }
    }

    #[test]
    fn test_bearer_header_accepted() {
        let state = state(Some("secret"));
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer secret".parse().unwrap());
        assert!(authorized(&state, &headers, &Value::Null));
    }

    #[test]
    fn test_body_token_accepted() {
        let state = state(Some("secret"));
        let headers = HeaderMap::new();
        assert!(authorized(&state, &headers, &json!({"token": "secret"})));
    }

    #[test]
    fn test_wrong_or_missing_token_rejected() {
        let state = state(Some("secret"));
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer nope".parse().unwrap());
        assert!(!authorized(&state, &headers, &Value::Null));
        assert!(!authorized(&state, &HeaderMap::new(), &Value::Null));
    }

    #[test]
    fn test_unconfigured_token_rejects_all() {
        let state = state(None);
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer anything".parse().unwrap());
        assert!(!authorized(&state, &headers, &Value::Null));
    }
}
