//! Outbound message formatting.
//!
//! Every operator-facing message is built here, in two variants: a MarkdownV2
//! body and a plain fallback used when Telegram rejects the markup. The
//! MarkdownV2 escaper lives here and nowhere else.

use crate::state::{PendingInfo, StatusSnapshot};
use crate::utils::{redact_tool_input, truncate_str};

/// Characters MarkdownV2 requires to be backslash-escaped.
const MARKDOWN_V2_SPECIAL: &str = "_*[]()~`>#+-=|{}.!\\";

/// Escape user-supplied text for safe embedding in MarkdownV2.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Strip markup and escapes from a MarkdownV2 body to get a plain fallback.
/// Good enough for command replies; approval prompts and notifications build
/// their plain variant explicitly.
pub fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(&next) = chars.peek() {
                    out.push(next);
                    chars.next();
                }
            }
            '*' | '_' | '`' => {}
            other => out.push(other),
        }
    }
    out
}

/// Emoji prefix for a notification level. Unknown levels get a pin.
pub fn level_emoji(level: &str) -> &'static str {
    match level {
        "info" => "ℹ️",
        "success" => "✅",
        "warning" => "⚠️",
        "error" => "❌",
        "task_complete" => "🏁",
        _ => "📌",
    }
}

/// Inputs for an approval prompt.
pub struct PromptInput<'a> {
    pub request_id: &'a str,
    pub agent_name: &'a str,
    pub tool_name: &'a str,
    pub tool_input: &'a str,
    pub description: &'a str,
    /// Queued operator messages at prompt time; the last 3 are shown.
    pub pending_messages: &'a [String],
}

/// Build the MarkdownV2 and plain bodies of an approval prompt.
///
/// Tool input is secret-redacted and truncated to 500 chars for display; the
/// hook already caps it at 2000 on its side.
pub fn approval_prompt(input: &PromptInput<'_>) -> (String, String) {
    let display_input = truncate_str(&redact_tool_input(input.tool_input), 500);

    let mut text = format!(
        "🔐 *Approbation requise*\n\n*Agent:* {}\n*Outil:* `{}`\n",
        escape_markdown(input.agent_name),
        escape_markdown(input.tool_name),
    );
    if !input.description.is_empty() {
        text.push_str(&format!(
            "*Description:* {}\n",
            escape_markdown(input.description)
        ));
    }
    if !display_input.is_empty() {
        text.push_str(&format!("\n```\n{}\n```\n", escape_markdown(&display_input)));
    }
    if !input.pending_messages.is_empty() {
        text.push_str("\n📨 *Messages en attente:*\n");
        for msg in last_three(input.pending_messages) {
            text.push_str(&format!("• {}\n", escape_markdown(&truncate_str(msg, 100))));
        }
    }
    text.push_str(&format!("\n_ID: {}_\n", escape_markdown(input.request_id)));
    text.push_str("_💡 Réponds à ce message pour envoyer des instructions_");

    let mut plain = format!(
        "🔐 Approbation requise\n\nAgent: {}\nOutil: {}\n",
        input.agent_name, input.tool_name,
    );
    if !input.description.is_empty() {
        plain.push_str(&format!("Description: {}\n", input.description));
    }
    if !display_input.is_empty() {
        plain.push_str(&format!("\nInput:\n{}\n", display_input));
    }
    if !input.pending_messages.is_empty() {
        plain.push_str("\n📨 Messages en attente:\n");
        for msg in last_three(input.pending_messages) {
            plain.push_str(&format!("• {}\n", truncate_str(msg, 100)));
        }
    }
    plain.push_str(&format!("\nID: {}", input.request_id));
    plain.push_str("\n💡 Réponds à ce message pour envoyer des instructions");

    (text, plain)
}

fn last_three(messages: &[String]) -> &[String] {
    &messages[messages.len().saturating_sub(3)..]
}

/// Build the MarkdownV2 and plain bodies of a notification.
pub fn notification(agent_name: &str, message: &str, level: &str) -> (String, String) {
    let emoji = level_emoji(level);
    let markdown = format!(
        "{} *{}*\n\n{}",
        emoji,
        escape_markdown(agent_name),
        escape_markdown(message)
    );
    let plain = format!("{} {}\n\n{}", emoji, agent_name, message);
    (markdown, plain)
}

/// Chat `/status` reply.
pub fn status_text(snapshot: &StatusSnapshot) -> String {
    let mode = if snapshot.paused {
        "⏸️ PAUSE \\(terminal\\)"
    } else {
        "▶️ ACTIF \\(telegram\\)"
    };
    let queued: usize = snapshot.queues.values().sum();
    let mut text = format!(
        "📊 *Bridge Status*\n\n• Mode: {}\n• Approbations en attente: {}\n• Sessions actives: {}\n• Messages en file: {}",
        mode,
        snapshot.pending.len(),
        snapshot.sessions.len(),
        queued,
    );
    if !snapshot.pending.is_empty() {
        text.push_str("\n\n*Approbations en attente:*\n");
        for info in &snapshot.pending {
            text.push_str(&pending_line(info));
        }
    }
    text
}

fn pending_line(info: &PendingInfo) -> String {
    format!(
        "• `{}` {} \\({}s\\)\n",
        escape_markdown(&info.request_id),
        escape_markdown(&info.tool_name),
        info.age_secs,
    )
}

/// Chat `/pending` reply (plain, as the original sends it).
pub fn pending_text(snapshot: &StatusSnapshot) -> String {
    if snapshot.pending.is_empty() {
        return "✅ Aucune approbation en attente.".to_string();
    }
    let mut lines = vec!["🔐 Approbations en attente:\n".to_string()];
    for info in &snapshot.pending {
        lines.push(format!(
            "• [{}] {} → {} ({}s)",
            info.request_id, info.agent_name, info.tool_name, info.age_secs,
        ));
    }
    lines.join("\n")
}

/// Chat `/agents` reply.
pub fn agents_text(snapshot: &StatusSnapshot) -> String {
    if snapshot.sessions.is_empty() {
        return "Aucun agent actif.\n\nL'agent s'enregistre automatiquement lors de sa première action."
            .to_string();
    }
    let mut lines = vec!["🤖 Agents actifs:\n".to_string()];
    for (id, name) in &snapshot.sessions {
        lines.push(format!(
            "• {} \\(id: `{}`\\)",
            escape_markdown(name),
            escape_markdown(id)
        ));
    }
    lines.join("\n")
}

/// Chat `/start` help text.
pub fn help_text() -> String {
    "🤖 *Claude Code Bridge* est actif\\!\n\n\
     *Commandes:*\n\
     /status \\- État du bridge\n\
     /agents \\- Agents actifs\n\
     /msg `agent_id` `message` \\- Envoyer un message à un agent\n\
     /pending \\- Approbations en attente\n\
     /approve\\_all \\- Tout approuver\n\
     /deny\\_all \\- Tout refuser\n\
     /pause \\- Approbations sur le terminal\n\
     /resume \\- Approbations sur Telegram\n\
     /shutdown \\- Arrêter le bridge\n\n\
     *💡 Astuce:* Réponds directement à une demande d'approbation pour envoyer des instructions à l'agent\\!"
        .to_string()
}
