//! Inbound Telegram dispatch.
//!
//! Three event kinds, all gated on the configured operator chat id:
//! commands (`/status`, `/msg`, ...), inline-button callbacks
//! (`approve:<id>` / `deny:<id>` / `approve_all:<id>`), and free text.
//! Free text replying to an approval prompt resolves that approval with the
//! text attached as instructions; anything else lands in an agent queue.

use super::format;
use crate::state::{BridgeState, Decision, Resolution};
use std::sync::Arc;
use teloxide::payloads::{AnswerCallbackQuerySetters, SendMessageSetters};
use teloxide::prelude::*;
use teloxide::types::{MaybeInaccessibleMessage, ParseMode};
use tokio_util::sync::CancellationToken;

/// Operator command, parsed from a leading-`/` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Start,
    Status,
    Agents,
    Msg { agent_id: String, text: String },
    MsgUsage,
    Pending,
    ApproveAll,
    DenyAll,
    Pause,
    Resume,
    Shutdown { confirmed: bool },
    Unknown,
}

/// Parse a command line. Returns `None` for non-command text. Accepts the
/// `/cmd@botname` form Telegram uses in group chats.
pub(crate) fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }
    let (head, rest) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    };
    let head = head.split('@').next().unwrap_or(head);

    let command = match head {
        "/start" => Command::Start,
        "/status" => Command::Status,
        "/agents" => Command::Agents,
        "/pending" => Command::Pending,
        "/approve_all" => Command::ApproveAll,
        "/deny_all" => Command::DenyAll,
        "/pause" => Command::Pause,
        "/resume" => Command::Resume,
        "/shutdown" => Command::Shutdown {
            confirmed: rest.eq_ignore_ascii_case("confirm"),
        },
        "/msg" => match rest.split_once(char::is_whitespace) {
            Some((agent_id, message)) if !message.trim().is_empty() => Command::Msg {
                agent_id: agent_id.to_string(),
                text: message.trim().to_string(),
            },
            _ => Command::MsgUsage,
        },
        _ => Command::Unknown,
    };
    Some(command)
}

/// Inline-button payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallbackAction {
    Approve(String),
    Deny(String),
    ApproveAll(String),
}

pub(crate) fn parse_callback(data: &str) -> Option<CallbackAction> {
    if let Some(id) = data.strip_prefix("approve_all:") {
        Some(CallbackAction::ApproveAll(id.to_string()))
    } else if let Some(id) = data.strip_prefix("approve:") {
        Some(CallbackAction::Approve(id.to_string()))
    } else if let Some(id) = data.strip_prefix("deny:") {
        Some(CallbackAction::Deny(id.to_string()))
    } else {
        None
    }
}

/// Pick the queue for non-reply operator text: a reply to a bot message that
/// names a registered agent id routes there (longest id first, so `worker-10`
/// is never shadowed by `worker-1`), everything else goes to `main`.
pub(crate) fn route_agent_id(reply_text: Option<&str>, known_ids: &[String]) -> String {
    if let Some(reply_text) = reply_text {
        let mut candidates: Vec<&String> = known_ids.iter().collect();
        candidates.sort_by(|a, b| b.len().cmp(&a.len()));
        for id in candidates {
            if reply_text.contains(id.as_str()) {
                return id.clone();
            }
        }
    }
    "main".to_string()
}

fn queue_ack(agent_id: &str, depth: usize, via_command: bool) -> String {
    let tail = if via_command {
        "_Le message sera transmis lors de la prochaine demande d'approbation\\._"
    } else {
        "_Sera transmis à la prochaine demande d'approbation\\._"
    };
    format!(
        "📨 Message ajouté à la file de `{}` \\({} en attente\\)\n\n{}",
        format::escape_markdown(agent_id),
        depth,
        tail,
    )
}

/// Reply with MarkdownV2, falling back to a stripped plain body.
async fn reply_markdown(bot: &Bot, chat: ChatId, markdown: &str) -> ResponseResult<()> {
    let sent = bot
        .send_message(chat, markdown)
        .parse_mode(ParseMode::MarkdownV2)
        .await;
    if let Err(e) = sent {
        tracing::warn!("Telegram: reply markup rejected, sending plain: {}", e);
        bot.send_message(chat, format::strip_markup(markdown)).await?;
    }
    Ok(())
}

pub(crate) async fn handle_message(
    bot: Bot,
    msg: Message,
    state: Arc<BridgeState>,
    authorized: ChatId,
    shutdown: CancellationToken,
) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let command = parse_command(text);

    if msg.chat.id != authorized {
        // Only the entry points talk back; everything else is dropped.
        if matches!(command, Some(Command::Start) | Some(Command::Shutdown { .. })) {
            bot.send_message(msg.chat.id, "⛔ Non autorisé.").await?;
        }
        tracing::debug!("Telegram: ignoring update from chat {}", msg.chat.id);
        return Ok(());
    }

    match command {
        Some(command) => handle_command(bot, msg.chat.id, command, state, shutdown).await,
        None => handle_text(bot, &msg, text, state).await,
    }
}

async fn handle_command(
    bot: Bot,
    chat: ChatId,
    command: Command,
    state: Arc<BridgeState>,
    shutdown: CancellationToken,
) -> ResponseResult<()> {
    match command {
        Command::Start => reply_markdown(&bot, chat, &format::help_text()).await?,
        Command::Status => {
            let snapshot = state.snapshot().await;
            reply_markdown(&bot, chat, &format::status_text(&snapshot)).await?;
        }
        Command::Agents => {
            let snapshot = state.snapshot().await;
            reply_markdown(&bot, chat, &format::agents_text(&snapshot)).await?;
        }
        Command::Pending => {
            let snapshot = state.snapshot().await;
            bot.send_message(chat, format::pending_text(&snapshot)).await?;
        }
        Command::Msg { agent_id, text } => {
            let depth = state.enqueue_message(&agent_id, &text).await;
            reply_markdown(&bot, chat, &queue_ack(&agent_id, depth, true)).await?;
        }
        Command::MsgUsage => {
            reply_markdown(
                &bot,
                chat,
                "Usage: `/msg <agent_id> <message>`\n\n\
                 Exemple: `/msg main Concentre-toi sur les tests`\n\n\
                 💡 Ou réponds directement à une demande d'approbation\\!",
            )
            .await?;
        }
        Command::ApproveAll => {
            let count = state.complete_all(Decision::Approve, "bulk approved").await;
            bot.send_message(chat, format!("✅ {count} approbation(s) approuvée(s)."))
                .await?;
        }
        Command::DenyAll => {
            let count = state.complete_all(Decision::Deny, "bulk denied").await;
            bot.send_message(chat, format!("❌ {count} approbation(s) refusée(s)."))
                .await?;
        }
        Command::Pause => {
            state.set_paused(true).await;
            bot.send_message(
                chat,
                "⏸️ Bridge en PAUSE\n\n\
                 Les approbations sont maintenant gérées dans le terminal.\n\
                 Tu peux interagir directement avec Claude Code.\n\n\
                 Tape /resume pour reprendre le contrôle sur Telegram.",
            )
            .await?;
        }
        Command::Resume => {
            state.set_paused(false).await;
            bot.send_message(
                chat,
                "▶️ Bridge ACTIF\n\nLes demandes d'approbation seront envoyées sur Telegram.",
            )
            .await?;
        }
        Command::Shutdown { confirmed: false } => {
            reply_markdown(
                &bot,
                chat,
                "⚠️ Es\\-tu sûr de vouloir arrêter le bridge?\n\n\
                 Tape `/shutdown confirm` pour confirmer\\.",
            )
            .await?;
        }
        Command::Shutdown { confirmed: true } => {
            bot.send_message(chat, "🔴 Arrêt du bridge en cours...").await?;
            tracing::info!("Shutdown requested by operator");
            tokio::spawn(async move {
                // Grace so the confirmation above reaches Telegram.
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                shutdown.cancel();
            });
        }
        Command::Unknown => {}
    }
    Ok(())
}

async fn handle_text(
    bot: Bot,
    msg: &Message,
    text: &str,
    state: Arc<BridgeState>,
) -> ResponseResult<()> {
    // A reply to an approval prompt resolves it with instructions attached.
    if let Some(reply) = msg.reply_to_message()
        && let Some(request_id) = state.lookup_message_to_request(reply.id.0).await
    {
        let resolution = Resolution {
            decision: Decision::Approve,
            reason: "approved with instructions".to_string(),
            user_message: Some(text.to_string()),
        };
        if state.complete_approval(&request_id, resolution).await.is_some() {
            let preview = format::escape_markdown(&crate::utils::truncate_str(text, 100));
            reply_markdown(
                &bot,
                msg.chat.id,
                &format!("✅ Approuvé avec instructions\\!\n\nMessage transmis: _{preview}_"),
            )
            .await?;
            return Ok(());
        }
    }

    // Otherwise queue it for an agent.
    let reply_text = msg
        .reply_to_message()
        .filter(|reply| reply.from.as_ref().is_some_and(|u| u.is_bot))
        .and_then(|reply| reply.text());
    let agent_id = route_agent_id(reply_text, &state.session_ids().await);
    let depth = state.enqueue_message(&agent_id, text).await;
    reply_markdown(&bot, msg.chat.id, &queue_ack(&agent_id, depth, false)).await?;
    Ok(())
}

pub(crate) async fn handle_callback(
    bot: Bot,
    query: CallbackQuery,
    state: Arc<BridgeState>,
    authorized: ChatId,
) -> ResponseResult<()> {
    let from_authorized = query
        .message
        .as_ref()
        .is_some_and(|m| m.chat().id == authorized);
    if !from_authorized {
        bot.answer_callback_query(&query.id)
            .text("Non autorisé")
            .show_alert(true)
            .await?;
        return Ok(());
    }

    let action = query.data.as_deref().and_then(parse_callback);
    let Some(action) = action else {
        // Unknown payload — ack so the button stops spinning.
        bot.answer_callback_query(&query.id).await?;
        return Ok(());
    };

    let (request_id, resolution, ack, status_line) = match &action {
        CallbackAction::Approve(id) => (
            id,
            Resolution::new(Decision::Approve, "user approved"),
            "✅ Approuvé!",
            "✅ APPROUVÉ",
        ),
        CallbackAction::Deny(id) => (
            id,
            Resolution::new(Decision::Deny, "user denied"),
            "❌ Refusé!",
            "❌ REFUSÉ",
        ),
        CallbackAction::ApproveAll(id) => (
            id,
            Resolution::new(Decision::Approve, "user approved (session auto-approve enabled)"),
            "✅ Approuvé! Auto-approbation activée pour cette session.",
            "✅ APPROUVÉ (auto-approve ON)",
        ),
    };

    let Some(completed) = state.complete_approval(request_id, resolution).await else {
        bot.answer_callback_query(&query.id)
            .text("⚠️ Requête expirée ou déjà traitée")
            .show_alert(true)
            .await?;
        return Ok(());
    };

    if matches!(action, CallbackAction::ApproveAll(_)) {
        state
            .set_auto_approve(&completed.agent_id, &completed.agent_name)
            .await;
    }

    bot.answer_callback_query(&query.id).text(ack).await?;

    // Append the outcome to the prompt so the chat history shows it.
    if let Some(MaybeInaccessibleMessage::Regular(prompt)) = query.message.as_ref() {
        let new_text = format!("{}\n\n{}", prompt.text().unwrap_or_default(), status_line);
        let _ = bot.edit_message_text(prompt.chat.id, prompt.id, new_text).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/start", Command::Start)]
    #[case("/status", Command::Status)]
    #[case("/status@tgbridge_bot", Command::Status)]
    #[case("/agents", Command::Agents)]
    #[case("/pending", Command::Pending)]
    #[case("/approve_all", Command::ApproveAll)]
    #[case("/deny_all", Command::DenyAll)]
    #[case("/pause", Command::Pause)]
    #[case("/resume", Command::Resume)]
    #[case("/shutdown", Command::Shutdown { confirmed: false })]
    #[case("/shutdown confirm", Command::Shutdown { confirmed: true })]
    #[case("/shutdown CONFIRM", Command::Shutdown { confirmed: true })]
    #[case("/shutdown later", Command::Shutdown { confirmed: false })]
    #[case("/msg", Command::MsgUsage)]
    #[case("/msg main", Command::MsgUsage)]
    #[case("/frobnicate", Command::Unknown)]
    fn parse_command_cases(#[case] input: &str, #[case] expected: Command) {
        assert_eq!(parse_command(input), Some(expected));
    }

    #[test]
    fn parse_command_msg_keeps_full_message() {
        assert_eq!(
            parse_command("/msg worker-1 focus on the tests"),
            Some(Command::Msg {
                agent_id: "worker-1".to_string(),
                text: "focus on the tests".to_string(),
            })
        );
    }

    #[test]
    fn parse_command_ignores_plain_text() {
        assert_eq!(parse_command("hello there"), None);
        assert_eq!(parse_command(""), None);
    }

    #[rstest]
    #[case("approve:abc12345", CallbackAction::Approve("abc12345".into()))]
    #[case("deny:abc12345", CallbackAction::Deny("abc12345".into()))]
    #[case("approve_all:abc12345", CallbackAction::ApproveAll("abc12345".into()))]
    fn parse_callback_cases(#[case] data: &str, #[case] expected: CallbackAction) {
        assert_eq!(parse_callback(data), Some(expected));
    }

    #[test]
    fn parse_callback_rejects_garbage() {
        assert_eq!(parse_callback("noop"), None);
        assert_eq!(parse_callback("reject:abc"), None);
    }

    #[test]
    fn route_defaults_to_main() {
        assert_eq!(route_agent_id(None, &["worker-1".to_string()]), "main");
        assert_eq!(route_agent_id(Some("no ids here"), &["worker-1".to_string()]), "main");
    }

    #[test]
    fn route_matches_longest_id_first() {
        let known = vec!["worker-1".to_string(), "worker-10".to_string()];
        assert_eq!(
            route_agent_id(Some("🏁 Agent terminé (id: worker-10)"), &known),
            "worker-10"
        );
        assert_eq!(
            route_agent_id(Some("approval for worker-1 pending"), &known),
            "worker-1"
        );
    }

    #[test]
    fn queue_ack_mentions_agent_and_depth() {
        let ack = queue_ack("main", 3, true);
        assert!(ack.contains("`main`"));
        assert!(ack.contains("3 en attente"));
        let ack = queue_ack("main", 1, false);
        assert!(ack.contains("Sera transmis"));
    }
}
