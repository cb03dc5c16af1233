//! Approval Coordinator
//!
//! The request/response rendezvous at the heart of the bridge: an approval
//! starts on HTTP, blocks on a one-shot latch, and is completed out-of-band
//! by a Telegram event (button, reply, bulk command) or by its own deadline.

use crate::state::{BridgeState, Decision, Resolution};
use crate::telegram::format::{self, PromptInput};
use crate::telegram::TelegramBridge;
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use uuid::Uuid;

/// Default `/approve` deadline when neither hook nor config say otherwise.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// What a hook asks the operator to approve.
#[derive(Debug, Clone)]
pub struct ApprovalParams {
    pub agent_id: String,
    pub agent_name: String,
    pub tool_name: String,
    pub tool_input: String,
    pub description: String,
    pub timeout_secs: u64,
}

/// What the hook gets back.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub decision: Decision,
    pub reason: String,
    pub request_id: String,
}

/// Two-row inline keyboard attached to every approval prompt.
fn approval_keyboard(request_id: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("✅ Approuver", format!("approve:{request_id}")),
            InlineKeyboardButton::callback("❌ Refuser", format!("deny:{request_id}")),
        ],
        vec![InlineKeyboardButton::callback(
            "✅ Approuver tout (session)",
            format!("approve_all:{request_id}"),
        )],
    ])
}

fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Send the approval to the operator and block until it is resolved or the
/// deadline passes.
///
/// When the bridge is paused this returns `passthrough` immediately without
/// touching Telegram. A failed prompt send is logged but does not abort the
/// wait: the operator simply never sees it and the request denies by timeout.
pub async fn request_approval(
    state: &Arc<BridgeState>,
    telegram: &TelegramBridge,
    params: ApprovalParams,
) -> ApprovalOutcome {
    if state.is_paused().await {
        return ApprovalOutcome {
            decision: Decision::Passthrough,
            reason: "bridge_paused".to_string(),
            request_id: String::new(),
        };
    }

    let request_id = new_request_id();
    tracing::info!(
        "Approval {}: {} wants {} (timeout {}s)",
        request_id,
        params.agent_name,
        params.tool_name,
        params.timeout_secs,
    );

    // Peek (without draining) so the prompt can show what is waiting; the
    // queue itself is only consumed once the approval resolves.
    let pending_messages = state.peek_messages(&params.agent_id).await;

    let latch = state
        .create_approval(&request_id, &params.agent_id, &params.agent_name, &params.tool_name)
        .await;

    let (markdown, plain) = format::approval_prompt(&PromptInput {
        request_id: &request_id,
        agent_name: &params.agent_name,
        tool_name: &params.tool_name,
        tool_input: &params.tool_input,
        description: &params.description,
        pending_messages: &pending_messages,
    });

    let prompt_msg_id = match telegram
        .send_two_tier(&markdown, &plain, Some(approval_keyboard(&request_id)))
        .await
    {
        Ok(sent) => {
            state.map_message_to_request(sent.id.0, &request_id).await;
            Some(sent.id.0)
        }
        Err(e) => {
            tracing::warn!(
                "Approval {}: prompt could not be sent ({}); will deny on timeout",
                request_id,
                e
            );
            None
        }
    };

    let outcome = match tokio::time::timeout(Duration::from_secs(params.timeout_secs), latch).await
    {
        Ok(Ok(resolution)) => {
            let mut reason = resolution.reason;
            let mut instructions = state.drain_messages(&params.agent_id).await;
            if let Some(user_message) = resolution.user_message {
                instructions.push(user_message);
            }
            if !instructions.is_empty() {
                reason = format!("{}\n\nUser instructions:\n{}", reason, instructions.join("\n"));
            }
            ApprovalOutcome {
                decision: resolution.decision,
                reason,
                request_id: request_id.clone(),
            }
        }
        // A dropped latch means the record vanished without a resolution
        // (shutdown teardown); callers observe the same deny as a timeout.
        Ok(Err(_)) | Err(_) => {
            state.remove_approval(&request_id).await;
            let _ = telegram
                .post_plain(&format!(
                    "⏰ Approbation {} expirée (timeout {}s). Refus par défaut.",
                    request_id, params.timeout_secs,
                ))
                .await;
            ApprovalOutcome {
                decision: Decision::Deny,
                reason: "timeout".to_string(),
                request_id: request_id.clone(),
            }
        }
    };

    if let Some(msg_id) = prompt_msg_id {
        state.unmap_message(msg_id).await;
    }

    tracing::info!("Approval {}: {}", request_id, outcome.decision.as_str());
    outcome
}
