//! tgbridge-hook — agent-side lifecycle hooks.
//!
//! One binary, four subcommands, wired into the agent host's hook slots:
//!
//! - `pre-tool`: reads the tool call from stdin and may emit a JSON decision
//!   on stdout; blocks on the bridge's `/approve` for sensitive tools
//! - `post-tool`: fire-and-forget activity notification
//! - `notification`: registers the agent, then forwards the notification
//! - `stop`: completion notification + unregister
//!
//! Every network problem fails open: the agent is never blocked by a bridge
//! outage, the operator just loses visibility.

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::io::Read;
use std::time::Duration;

/// Tools that always auto-approve without contacting the bridge.
const SAFE_TOOLS: &[&str] = &["read", "list_files", "search", "grep", "glob", "view"];

/// Tools that must always reach the operator, even with session auto-approve.
const CRITICAL_TOOLS: &[&str] = &["bash", "write", "edit", "execute"];

/// Post-tool notifications are limited to these tools to avoid spam.
const NOTIFY_TOOLS: &[&str] = &["bash", "write", "edit", "execute"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BridgeMode {
    /// Full approval flow over Telegram
    Telegram,
    /// Notify only, never block
    Notify,
    /// Bridge disabled, hooks are no-ops
    Local,
}

/// Lifecycle hooks for the Claude Code ↔ Telegram bridge
#[derive(Parser, Debug)]
#[command(name = "tgbridge-hook")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Bridge base URL
    #[arg(long, env = "CLAUDE_BRIDGE_URL", default_value = "http://127.0.0.1:7888")]
    bridge_url: String,

    /// Agent identifier
    #[arg(long, env = "CLAUDE_AGENT_ID", default_value = "main")]
    agent_id: String,

    /// Human-readable agent name
    #[arg(long, env = "CLAUDE_AGENT_NAME", default_value = "Claude Code")]
    agent_name: String,

    /// Hook behavior
    #[arg(long, env = "CLAUDE_BRIDGE_MODE", value_enum, default_value = "telegram")]
    mode: BridgeMode,

    #[command(subcommand)]
    hook: HookKind,
}

#[derive(Subcommand, Debug)]
enum HookKind {
    /// PreToolUse: may block on operator approval
    PreTool,
    /// PostToolUse: activity notification
    PostTool,
    /// Notification: register + forward
    Notification,
    /// Stop: completion notification + unregister
    Stop,
}

fn read_stdin() -> Value {
    let mut raw = String::new();
    if std::io::stdin().read_to_string(&mut raw).is_err() {
        return Value::Null;
    }
    serde_json::from_str(raw.trim()).unwrap_or(Value::Null)
}

/// Char-boundary-safe prefix, no ellipsis (mirrors the wire contract's
/// "already truncated" fields).
fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn emit_decision(decision: &str) {
    println!("{}", json!({ "decision": decision }));
}

/// Extract the operator's instructions from a composed approval reason.
fn instructions_from_reason(reason: &str) -> Option<&str> {
    reason
        .split_once("User instructions:")
        .map(|(_, rest)| rest.trim())
        .filter(|s| !s.is_empty())
}

struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
}

impl BridgeClient {
    fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn is_available(&self) -> bool {
        self.http
            .get(format!("{}/status", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok()
    }

    async fn post(&self, endpoint: &str, body: Value, timeout: Duration) -> Option<Value> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, endpoint))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .ok()?;
        resp.json().await.ok()
    }

    /// Fire-and-forget notification.
    async fn notify(&self, agent_id: &str, agent_name: &str, message: &str, level: &str) {
        let _ = self
            .post(
                "/notify",
                json!({
                    "agent_id": agent_id,
                    "agent_name": agent_name,
                    "message": message,
                    "level": level,
                }),
                Duration::from_secs(5),
            )
            .await;
    }
}

async fn pre_tool(cli: &Cli) {
    if cli.mode == BridgeMode::Local {
        return;
    }

    let input = read_stdin();
    if input.is_null() {
        emit_decision("approve");
        return;
    }

    let tool_name = input.get("tool_name").and_then(|v| v.as_str()).unwrap_or("unknown");
    let tool_input = input
        .get("tool_input")
        .map(|v| serde_json::to_string_pretty(v).unwrap_or_default())
        .unwrap_or_default();

    if SAFE_TOOLS.contains(&tool_name) {
        emit_decision("approve");
        return;
    }

    let client = BridgeClient::new(&cli.bridge_url);
    if !client.is_available().await {
        emit_decision("approve");
        return;
    }

    if cli.mode == BridgeMode::Notify {
        client
            .notify(
                &cli.agent_id,
                &cli.agent_name,
                &format!("🔧 Outil: {}\n\n{}", tool_name, clip(&tool_input, 500)),
                "info",
            )
            .await;
        emit_decision("approve");
        return;
    }

    // Session auto-approve short-circuit, except for critical tools.
    if !CRITICAL_TOOLS.contains(&tool_name) {
        let auto = client
            .post(
                "/check_auto_approve",
                json!({ "agent_id": cli.agent_id }),
                Duration::from_secs(5),
            )
            .await
            .and_then(|v| v.get("auto_approve").and_then(|b| b.as_bool()))
            .unwrap_or(false);
        if auto {
            emit_decision("approve");
            return;
        }
    }

    let response = client
        .post(
            "/approve",
            json!({
                "agent_id": cli.agent_id,
                "agent_name": cli.agent_name,
                "tool_name": tool_name,
                "tool_input": clip(&tool_input, 2000),
                "description": format!("L'agent veut utiliser {}", tool_name),
                "timeout": 300,
            }),
            Duration::from_secs(310),
        )
        .await;

    let Some(response) = response else {
        // Bridge vanished mid-approval: fail open.
        eprintln!("Bridge error: no response from /approve");
        emit_decision("approve");
        return;
    };

    let decision = response.get("decision").and_then(|v| v.as_str()).unwrap_or("deny");
    let reason = response.get("reason").and_then(|v| v.as_str()).unwrap_or("");

    // Paused bridge: emit nothing so the host applies its native policy.
    if decision == "passthrough" {
        return;
    }

    if let Some(instructions) = instructions_from_reason(reason) {
        let bar = "=".repeat(50);
        eprintln!("\n{bar}\n📨 INSTRUCTIONS UTILISATEUR:\n{instructions}\n{bar}\n");
    }

    emit_decision(decision);
}

async fn post_tool(cli: &Cli) {
    let input = read_stdin();
    if input.is_null() {
        return;
    }

    let tool_name = input.get("tool_name").and_then(|v| v.as_str()).unwrap_or("unknown");
    let tool_output = input
        .get("tool_output")
        .map(|v| match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        })
        .unwrap_or_default();
    let was_error = input.get("was_error").and_then(|v| v.as_bool()).unwrap_or(false);

    if !NOTIFY_TOOLS.contains(&tool_name) && !was_error {
        return;
    }

    let (level, status) = if was_error {
        ("error", "❌ Erreur")
    } else {
        ("success", "✅ OK")
    };
    let mut preview = clip(&tool_output, 300).to_string();
    if preview.len() < tool_output.len() {
        preview.push_str("...");
    }

    BridgeClient::new(&cli.bridge_url)
        .notify(
            &cli.agent_id,
            &cli.agent_name,
            &format!("Outil: {} → {}\n\n{}", tool_name, status, preview),
            level,
        )
        .await;
}

async fn notification(cli: &Cli) {
    let input = read_stdin();
    let message = input.get("message").and_then(|v| v.as_str()).unwrap_or("");
    let level = input.get("level").and_then(|v| v.as_str()).unwrap_or("info");
    if message.is_empty() {
        return;
    }

    let client = BridgeClient::new(&cli.bridge_url);
    // Register on first notification so the agent shows up in /agents.
    let _ = client
        .post(
            "/register_agent",
            json!({ "agent_id": cli.agent_id, "agent_name": cli.agent_name }),
            Duration::from_secs(3),
        )
        .await;
    client
        .notify(&cli.agent_id, &cli.agent_name, clip(message, 2000), level)
        .await;
}

async fn stop(cli: &Cli) {
    let input = read_stdin();
    let stop_reason = input.get("stop_reason").and_then(|v| v.as_str()).unwrap_or("");

    let mut message = "🏁 Agent terminé".to_string();
    if !stop_reason.is_empty() {
        message.push_str(&format!("\nRaison: {}", stop_reason));
    }

    let client = BridgeClient::new(&cli.bridge_url);
    client
        .notify(&cli.agent_id, &cli.agent_name, &message, "task_complete")
        .await;
    let _ = client
        .post(
            "/unregister_agent",
            json!({ "agent_id": cli.agent_id }),
            Duration::from_secs(5),
        )
        .await;
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.hook {
        HookKind::PreTool => pre_tool(&cli).await,
        HookKind::PostTool => post_tool(&cli).await,
        HookKind::Notification => notification(&cli).await,
        HookKind::Stop => stop(&cli).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_and_critical_tool_sets_are_disjoint() {
        for tool in SAFE_TOOLS {
            assert!(!CRITICAL_TOOLS.contains(tool));
        }
        assert!(SAFE_TOOLS.contains(&"grep"));
        assert!(CRITICAL_TOOLS.contains(&"bash"));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("hello", 10), "hello");
        assert_eq!(clip("hello", 3), "hel");
        assert_eq!(clip("ééééé", 2), "éé");
    }

    #[test]
    fn instructions_extracted_from_reason() {
        let reason = "user approved\n\nUser instructions:\nrun in /tmp only";
        assert_eq!(instructions_from_reason(reason), Some("run in /tmp only"));
        assert_eq!(instructions_from_reason("user approved"), None);
        assert_eq!(instructions_from_reason("User instructions:\n  "), None);
    }
}
