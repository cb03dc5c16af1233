//! tgbridge - Claude Code ↔ Telegram approval bridge
//!
//! A local server that sits between a coding agent's lifecycle hooks and a
//! human operator on Telegram. Sensitive tool calls become inline-keyboard
//! approval requests; the hook blocks on HTTP until the operator answers,
//! times out, or the bridge is paused.
//!
//! ## Features
//!
//! - **Synchronous approvals:** `/approve` blocks the hook until a button
//!   press, a reply with instructions, a bulk command, or the timeout
//! - **Side-channel messaging:** queue free-form instructions per agent,
//!   delivered with the next approval or via `/send_message` long-poll
//! - **Session auto-approve:** one button press silences a whole session
//! - **Fail-open:** a paused or unreachable bridge never wedges the agent
//!
//! ## Quick Start
//!
//! ```bash
//! # Start the bridge (reads config/config.json)
//! tgbridge
//!
//! # Wire the hooks into the agent host
//! CLAUDE_BRIDGE_URL=http://127.0.0.1:7888 tgbridge-hook pre-tool
//! ```

pub mod approval;
pub mod config;
pub mod http;
pub mod state;
pub mod telegram;
pub mod utils;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
