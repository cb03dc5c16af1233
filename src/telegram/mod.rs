//! Telegram Chat Adapter
//!
//! Outbound: approval prompts, notifications, and status replies, each sent
//! with a two-tier policy (MarkdownV2 first, plain retry on markup failure).
//! Inbound: a dptree dispatcher routing operator commands, inline-button
//! callbacks, and free text into the state store.

pub mod format;
pub(crate) mod handler;

use crate::state::BridgeState;
use std::sync::Arc;
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, MessageId, ParseMode};
use teloxide::update_listeners::Polling;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Outbound send failure after both markup tiers were tried.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("telegram bot is not connected")]
    NotConnected,
    #[error("telegram send failed: {0}")]
    Request(#[from] teloxide::RequestError),
}

/// Result of a successful outbound send.
#[derive(Debug)]
pub struct SentMessage {
    pub id: MessageId,
    /// True when the MarkdownV2 attempt failed and the plain retry landed.
    pub plain_fallback: bool,
}

/// Shared outbound handle to the operator chat.
///
/// The bot slot is populated once the token is validated at startup; until
/// then every send fails with [`SendError::NotConnected`] and approvals run
/// their timeout course, which keeps the HTTP side fail-open.
pub struct TelegramBridge {
    bot: Mutex<Option<Bot>>,
    chat_id: ChatId,
}

impl TelegramBridge {
    pub fn new(chat_id: i64) -> Self {
        Self {
            bot: Mutex::new(None),
            chat_id: ChatId(chat_id),
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub async fn set_bot(&self, bot: Bot) {
        *self.bot.lock().await = Some(bot);
    }

    async fn bot(&self) -> Result<Bot, SendError> {
        self.bot.lock().await.clone().ok_or(SendError::NotConnected)
    }

    /// Send with the two-tier markup policy: MarkdownV2 body first, then the
    /// plain variant (same keyboard) if Telegram rejects the markup.
    pub async fn send_two_tier(
        &self,
        markdown: &str,
        plain: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<SentMessage, SendError> {
        let bot = self.bot().await?;

        let mut request = bot
            .send_message(self.chat_id, markdown)
            .parse_mode(ParseMode::MarkdownV2);
        if let Some(ref kb) = keyboard {
            request = request.reply_markup(kb.clone());
        }
        match request.await {
            Ok(message) => {
                return Ok(SentMessage {
                    id: message.id,
                    plain_fallback: false,
                });
            }
            Err(e) => {
                tracing::warn!("Telegram: markdown send failed, retrying plain: {}", e);
            }
        }

        let mut request = bot.send_message(self.chat_id, plain);
        if let Some(kb) = keyboard {
            request = request.reply_markup(kb);
        }
        let message = request.await?;
        Ok(SentMessage {
            id: message.id,
            plain_fallback: true,
        })
    }

    /// Send a plain-text message with no markup at all.
    pub async fn post_plain(&self, text: &str) -> Result<(), SendError> {
        let bot = self.bot().await?;
        bot.send_message(self.chat_id, text).await?;
        Ok(())
    }
}

/// Validate the bot token shape before handing it to teloxide:
/// `<numeric id>:<key of at least 30 chars>`.
fn token_looks_valid(token: &str) -> bool {
    let Some((id, key)) = token.split_once(':') else {
        return false;
    };
    id.parse::<u64>().is_ok() && key.len() >= 30
}

/// Start the Telegram side: validate the token, post the startup notice, and
/// run the dispatcher until `shutdown` fires. Cancels `shutdown` itself when
/// the dispatcher dies first, so the HTTP server goes down with it.
pub fn start(
    token: String,
    state: Arc<BridgeState>,
    bridge: Arc<TelegramBridge>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        // Cancelling here tears down the HTTP server too; a bridge without
        // its chat side would silently deny every approval by timeout.
        let _shutdown_on_exit = shutdown.clone().drop_guard();

        if !token_looks_valid(&token) {
            tracing::error!("Telegram bot token has invalid format, cannot start bridge");
            return;
        }

        let bot = Bot::new(token);
        match bot.get_me().await {
            Ok(me) => {
                tracing::info!(
                    "Telegram: bot @{} authenticated",
                    me.username.as_deref().unwrap_or("?")
                );
            }
            Err(e) => {
                tracing::error!("Telegram: token validation failed: {}", e);
                return;
            }
        }
        bridge.set_bot(bot.clone()).await;

        if let Err(e) = bridge
            .post_plain(
                "🟢 Claude Code Bridge démarré et prêt!\n\n💡 Réponds à une demande d'approbation pour envoyer des instructions.",
            )
            .await
        {
            tracing::warn!("Telegram: could not send startup message: {}", e);
        }

        let authorized = bridge.chat_id();

        let msg_handler = Update::filter_message().endpoint({
            let state = state.clone();
            let shutdown = shutdown.clone();
            move |bot: Bot, msg: Message| {
                let state = state.clone();
                let shutdown = shutdown.clone();
                async move { handler::handle_message(bot, msg, state, authorized, shutdown).await }
            }
        });

        let cb_handler = Update::filter_callback_query().endpoint({
            let state = state.clone();
            move |bot: Bot, query: CallbackQuery| {
                let state = state.clone();
                async move { handler::handle_callback(bot, query, state, authorized).await }
            }
        });

        let tree = dptree::entry().branch(msg_handler).branch(cb_handler);

        // Drop the backlog so buttons clicked while the bridge was down are
        // never acted upon against fresh approvals.
        let listener = Polling::builder(bot.clone()).drop_pending_updates().build();

        let mut dispatcher = Dispatcher::builder(bot, tree).build();
        let dispatcher_shutdown = dispatcher.shutdown_token();
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown.cancelled().await;
                if let Ok(stopped) = dispatcher_shutdown.shutdown() {
                    stopped.await;
                }
            }
        });

        tracing::info!("🤖 Telegram bot started");
        dispatcher
            .dispatch_with_listener(
                listener,
                LoggingErrorHandler::with_custom_text("Telegram update listener error"),
            )
            .await;
        tracing::info!("Telegram dispatcher stopped");
    })
}
