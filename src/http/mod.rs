//! Hook API — HTTP endpoints on loopback.
//!
//! Hook programs are one-shot clients: they POST JSON and either fire and
//! forget (`/notify`) or block (`/approve`, `/send_message`). Binding to
//! loopback is the whole authentication story; do not widen the bind address
//! without adding a token scheme.

use crate::approval::{self, ApprovalParams};
use crate::state::BridgeState;
use crate::telegram::{format, TelegramBridge};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// `/send_message` long-polls are capped regardless of what the hook asks.
const SEND_MESSAGE_MAX_WAIT_SECS: u64 = 120;

/// Shared state for the hook API.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<BridgeState>,
    pub telegram: Arc<TelegramBridge>,
    /// Default `/approve` timeout from config.
    pub default_timeout_secs: u64,
}

/// Build the axum router for the hook API.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/notify", post(notify))
        .route("/approve", post(approve))
        .route("/check_auto_approve", post(check_auto_approve))
        .route("/register_agent", post(register_agent))
        .route("/unregister_agent", post(unregister_agent))
        .route("/send_message", post(send_message))
        .route("/status", get(status))
        .with_state(state)
}

fn default_agent_id() -> String {
    "main".to_string()
}

fn default_agent_name() -> String {
    "Claude Code".to_string()
}

fn default_level() -> String {
    "info".to_string()
}

/// Simple notification (no response needed).
#[derive(Debug, Deserialize)]
struct NotifyBody {
    #[serde(default = "default_agent_id")]
    #[allow(dead_code)]
    agent_id: String,
    #[serde(default = "default_agent_name")]
    agent_name: String,
    message: String,
    #[serde(default = "default_level")]
    level: String,
}

/// Request requiring operator approval.
#[derive(Debug, Deserialize)]
struct ApproveBody {
    #[serde(default = "default_agent_id")]
    agent_id: String,
    #[serde(default = "default_agent_name")]
    agent_name: String,
    tool_name: String,
    #[serde(default)]
    tool_input: String,
    #[serde(default)]
    description: String,
    /// Seconds; falls back to the configured default when absent.
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AgentBody {
    #[serde(default = "default_agent_id")]
    agent_id: String,
    #[serde(default = "default_agent_name")]
    agent_name: String,
}

/// Poll for operator messages queued for a specific agent.
#[derive(Debug, Deserialize)]
struct MessagePollBody {
    #[serde(default = "default_agent_id")]
    agent_id: String,
    #[serde(default = "default_poll_timeout")]
    timeout: u64,
}

fn default_poll_timeout() -> u64 {
    30
}

/// POST /notify — forward a hook notification to the operator.
/// 500 only when both the markup and the plain send fail.
async fn notify(State(state): State<AppState>, Json(body): Json<NotifyBody>) -> impl IntoResponse {
    let (markdown, plain) = format::notification(&body.agent_name, &body.message, &body.level);
    match state.telegram.send_two_tier(&markdown, &plain, None).await {
        Ok(sent) => {
            let status = if sent.plain_fallback { "sent_plain" } else { "sent" };
            (StatusCode::OK, Json(json!({ "status": status })))
        }
        Err(e) => {
            tracing::error!("Failed to send notification: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": e.to_string() })),
            )
        }
    }
}

/// POST /approve — blocks until the operator decides or the timeout fires.
async fn approve(State(state): State<AppState>, Json(body): Json<ApproveBody>) -> impl IntoResponse {
    let params = ApprovalParams {
        agent_id: body.agent_id,
        agent_name: body.agent_name,
        tool_name: body.tool_name,
        tool_input: body.tool_input,
        description: body.description,
        timeout_secs: body.timeout.unwrap_or(state.default_timeout_secs),
    };
    let outcome = approval::request_approval(&state.bridge, &state.telegram, params).await;
    Json(json!({
        "decision": outcome.decision,
        "reason": outcome.reason,
        "request_id": outcome.request_id,
    }))
}

/// POST /check_auto_approve
async fn check_auto_approve(
    State(state): State<AppState>,
    Json(body): Json<AgentBody>,
) -> impl IntoResponse {
    let auto_approve = state.bridge.check_auto_approve(&body.agent_id).await;
    Json(json!({ "auto_approve": auto_approve }))
}

/// POST /register_agent
async fn register_agent(
    State(state): State<AppState>,
    Json(body): Json<AgentBody>,
) -> impl IntoResponse {
    state.bridge.register_agent(&body.agent_id, &body.agent_name).await;
    Json(json!({ "status": "registered" }))
}

/// POST /unregister_agent
async fn unregister_agent(
    State(state): State<AppState>,
    Json(body): Json<AgentBody>,
) -> impl IntoResponse {
    state.bridge.unregister_agent(&body.agent_id).await;
    Json(json!({ "status": "unregistered" }))
}

/// POST /send_message — long-poll for queued operator messages.
/// Returns immediately when anything is queued, otherwise polls at ~1 s
/// granularity for up to min(timeout, 120) seconds.
async fn send_message(
    State(state): State<AppState>,
    Json(body): Json<MessagePollBody>,
) -> impl IntoResponse {
    let deadline = Duration::from_secs(body.timeout.min(SEND_MESSAGE_MAX_WAIT_SECS));
    let start = tokio::time::Instant::now();

    loop {
        let messages = state.bridge.drain_messages(&body.agent_id).await;
        if !messages.is_empty() {
            return Json(json!({ "messages": messages }));
        }
        if start.elapsed() >= deadline {
            return Json(json!({ "messages": [] }));
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// GET /status — health check plus a live snapshot.
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.bridge.snapshot().await;
    let sessions: Vec<&String> = snapshot.sessions.iter().map(|(id, _)| id).collect();
    Json(json!({
        "status": "running",
        "paused": snapshot.paused,
        "pending_approvals": snapshot.pending.len(),
        "active_sessions": sessions,
        "message_queues": snapshot.queues,
        "uptime": chrono::Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            bridge: Arc::new(BridgeState::new()),
            telegram: Arc::new(TelegramBridge::new(42)),
            default_timeout_secs: 300,
        }
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn status_reports_running() {
        let state = test_state();
        state.bridge.register_agent("main", "Claude Code").await;
        let app = build_router(state);

        let resp = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["status"], "running");
        assert_eq!(body["paused"], false);
        assert_eq!(body["pending_approvals"], 0);
        assert_eq!(body["active_sessions"][0], "main");
        assert_eq!(body["message_queues"]["main"], 0);
    }

    #[tokio::test]
    async fn register_then_check_auto_approve() {
        let app = build_router(test_state());

        let resp = app
            .clone()
            .oneshot(post_json(
                "/register_agent",
                r#"{"agent_id": "worker-1", "agent_name": "Worker"}"#,
            ))
            .await
            .expect("response");
        assert_eq!(body_json(resp).await["status"], "registered");

        let resp = app
            .clone()
            .oneshot(post_json("/check_auto_approve", r#"{"agent_id": "worker-1"}"#))
            .await
            .expect("response");
        assert_eq!(body_json(resp).await["auto_approve"], false);

        let resp = app
            .oneshot(post_json("/unregister_agent", r#"{"agent_id": "worker-1"}"#))
            .await
            .expect("response");
        assert_eq!(body_json(resp).await["status"], "unregistered");
    }

    #[tokio::test]
    async fn approve_passes_through_when_paused() {
        let state = test_state();
        state.bridge.set_paused(true).await;
        let app = build_router(state);

        let resp = app
            .oneshot(post_json(
                "/approve",
                r#"{"agent_id": "main", "agent_name": "CC", "tool_name": "bash",
                    "tool_input": "ls /", "timeout": 10}"#,
            ))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["decision"], "passthrough");
        assert_eq!(body["reason"], "bridge_paused");
    }

    #[tokio::test]
    async fn approve_denies_on_timeout() {
        // No bot connected: the prompt never reaches anyone, the latch times
        // out and the caller gets a deny.
        let app = build_router(test_state());

        let resp = app
            .oneshot(post_json(
                "/approve",
                r#"{"agent_id": "main", "agent_name": "CC", "tool_name": "bash",
                    "tool_input": "ls /", "timeout": 1}"#,
            ))
            .await
            .expect("response");
        let body = body_json(resp).await;
        assert_eq!(body["decision"], "deny");
        assert_eq!(body["reason"], "timeout");
        assert_eq!(body["request_id"].as_str().expect("id").len(), 8);
    }

    #[tokio::test]
    async fn send_message_drains_queued_messages() {
        let state = test_state();
        state.bridge.enqueue_message("main", "focus tests").await;
        let app = build_router(state.clone());

        let resp = app
            .oneshot(post_json("/send_message", r#"{"agent_id": "main", "timeout": 5}"#))
            .await
            .expect("response");
        let body = body_json(resp).await;
        assert_eq!(body["messages"][0], "focus tests");
        assert!(state.bridge.peek_messages("main").await.is_empty());
    }

    #[tokio::test]
    async fn send_message_empty_queue_returns_after_timeout() {
        let app = build_router(test_state());

        let resp = app
            .oneshot(post_json("/send_message", r#"{"agent_id": "main", "timeout": 0}"#))
            .await
            .expect("response");
        let body = body_json(resp).await;
        assert_eq!(body["messages"].as_array().expect("array").len(), 0);
    }

    #[tokio::test]
    async fn notify_without_bot_returns_500() {
        let app = build_router(test_state());

        let resp = app
            .oneshot(post_json("/notify", r#"{"message": "hello", "level": "info"}"#))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_error() {
        let app = build_router(test_state());

        let resp = app
            .oneshot(post_json("/approve", "not json"))
            .await
            .expect("response");
        assert!(resp.status().is_client_error());
    }
}
