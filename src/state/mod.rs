//! Bridge State Store
//!
//! All shared mutable state lives here behind a single async lock: active
//! agent sessions, pending approvals, per-agent message queues, the
//! message-id → request-id map used to route operator replies, and the global
//! pause flag. Every operation is atomic with respect to the others.
//!
//! An approval's one-shot latch is the `oneshot::Sender` stored inside its
//! record: completing an approval removes the record and sends the resolution
//! through it in the same critical section, so a request is resolved at most
//! once and the resolved/timed-out states are mutually exclusive.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Instant;
use tokio::sync::{Mutex, oneshot};

/// Soft cap on a single agent's message queue. The oldest entry is dropped on
/// overflow so an operator spamming `/msg` cannot grow memory unbounded.
const MESSAGE_QUEUE_CAP: usize = 100;

/// Decision returned to the `/approve` caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Deny,
    /// Bridge is paused: the hook should defer to the host agent's own policy.
    Passthrough,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Deny => "deny",
            Decision::Passthrough => "passthrough",
        }
    }
}

/// How a pending approval was resolved, sent through its latch.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub decision: Decision,
    pub reason: String,
    /// Free-form text from a reply-to-the-prompt, if the operator sent one.
    pub user_message: Option<String>,
}

impl Resolution {
    pub fn new(decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
            user_message: None,
        }
    }
}

/// A registered agent session.
#[derive(Debug, Clone)]
pub struct AgentSession {
    pub name: String,
    pub registered_at: Instant,
    pub auto_approve: bool,
}

/// An approval awaiting the operator. The sender half of the latch lives
/// here; the receiver is held by the blocked `/approve` caller.
struct PendingApproval {
    agent_id: String,
    agent_name: String,
    tool_name: String,
    created_at: Instant,
    latch: oneshot::Sender<Resolution>,
}

/// Identity of a completed approval, handed back so the chat adapter can
/// flip the session's auto-approve flag without a second lookup.
#[derive(Debug, Clone)]
pub struct CompletedApproval {
    pub agent_id: String,
    pub agent_name: String,
}

/// One pending approval as rendered by `/status` and `/pending`.
#[derive(Debug, Clone)]
pub struct PendingInfo {
    pub request_id: String,
    pub agent_name: String,
    pub tool_name: String,
    pub age_secs: u64,
}

/// Point-in-time view of the store, used by both the HTTP `/status` endpoint
/// and the chat `/status` / `/pending` / `/agents` commands.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub paused: bool,
    pub pending: Vec<PendingInfo>,
    /// (agent_id, human name) pairs
    pub sessions: Vec<(String, String)>,
    /// agent_id → queued message count, stable order for JSON rendering
    pub queues: BTreeMap<String, usize>,
}

#[derive(Default)]
struct Inner {
    approvals: HashMap<String, PendingApproval>,
    sessions: HashMap<String, AgentSession>,
    queues: HashMap<String, VecDeque<String>>,
    message_to_request: HashMap<i32, String>,
    paused: bool,
}

/// The bridge's single synchronization domain.
pub struct BridgeState {
    inner: Mutex<Inner>,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    // ── Sessions ─────────────────────────────────────────────────────────

    /// Register (or re-register) an agent session. The latest name wins;
    /// a previously granted `auto_approve` survives re-registration.
    pub async fn register_agent(&self, agent_id: &str, agent_name: &str) {
        let mut inner = self.inner.lock().await;
        let auto_approve = inner
            .sessions
            .get(agent_id)
            .map(|s| s.auto_approve)
            .unwrap_or(false);
        inner.sessions.insert(
            agent_id.to_string(),
            AgentSession {
                name: agent_name.to_string(),
                registered_at: Instant::now(),
                auto_approve,
            },
        );
        inner.queues.entry(agent_id.to_string()).or_default();
        tracing::info!("Agent registered: {} ({})", agent_id, agent_name);
    }

    /// Drop an agent session and its message queue.
    pub async fn unregister_agent(&self, agent_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.sessions.remove(agent_id);
        inner.queues.remove(agent_id);
        tracing::info!("Agent unregistered: {}", agent_id);
    }

    pub async fn check_auto_approve(&self, agent_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(agent_id)
            .map(|s| s.auto_approve)
            .unwrap_or(false)
    }

    /// Grant session auto-approve, creating the session if the agent never
    /// registered explicitly.
    pub async fn set_auto_approve(&self, agent_id: &str, agent_name: &str) {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(agent_id) {
            Some(session) => {
                session.auto_approve = true;
                session.name = agent_name.to_string();
            }
            None => {
                inner.sessions.insert(
                    agent_id.to_string(),
                    AgentSession {
                        name: agent_name.to_string(),
                        registered_at: Instant::now(),
                        auto_approve: true,
                    },
                );
            }
        }
    }

    /// Registered agent ids, used for routing operator text by reply context.
    pub async fn session_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.sessions.keys().cloned().collect()
    }

    // ── Approvals ────────────────────────────────────────────────────────

    /// Create a pending approval and hand back the receiver half of its
    /// latch. The caller blocks on the receiver with its own deadline.
    pub async fn create_approval(
        &self,
        request_id: &str,
        agent_id: &str,
        agent_name: &str,
        tool_name: &str,
    ) -> oneshot::Receiver<Resolution> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().await;
        inner.approvals.insert(
            request_id.to_string(),
            PendingApproval {
                agent_id: agent_id.to_string(),
                agent_name: agent_name.to_string(),
                tool_name: tool_name.to_string(),
                created_at: Instant::now(),
                latch: tx,
            },
        );
        rx
    }

    /// Resolve a pending approval: remove the record and fire its latch.
    /// Returns `None` for an unknown or already-completed request, leaving
    /// the store untouched.
    pub async fn complete_approval(
        &self,
        request_id: &str,
        resolution: Resolution,
    ) -> Option<CompletedApproval> {
        let mut inner = self.inner.lock().await;
        let record = inner.approvals.remove(request_id)?;
        let completed = CompletedApproval {
            agent_id: record.agent_id,
            agent_name: record.agent_name,
        };
        // The receiver may already be gone if the caller timed out; either
        // way the record is removed and this latch can never fire again.
        let _ = record.latch.send(resolution);
        Some(completed)
    }

    /// Resolve every pending approval with the same decision/reason.
    /// Returns how many were completed.
    pub async fn complete_all(&self, decision: Decision, reason: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let drained: Vec<_> = inner.approvals.drain().collect();
        let count = drained.len();
        for (_, record) in drained {
            let _ = record.latch.send(Resolution::new(decision, reason));
        }
        count
    }

    /// Remove a pending approval without resolving it (timeout path).
    pub async fn remove_approval(&self, request_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.approvals.remove(request_id);
    }

    // ── Message queues ───────────────────────────────────────────────────

    /// Append a message to an agent's queue, returning the new depth.
    pub async fn enqueue_message(&self, agent_id: &str, text: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let queue = inner.queues.entry(agent_id.to_string()).or_default();
        if queue.len() >= MESSAGE_QUEUE_CAP {
            queue.pop_front();
        }
        queue.push_back(text.to_string());
        queue.len()
    }

    /// Take every queued message for an agent, in FIFO order.
    pub async fn drain_messages(&self, agent_id: &str) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        match inner.queues.get_mut(agent_id) {
            Some(queue) => queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Copy the queued messages for an agent without draining them.
    pub async fn peek_messages(&self, agent_id: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .queues
            .get(agent_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ── Reply routing ────────────────────────────────────────────────────

    pub async fn map_message_to_request(&self, message_id: i32, request_id: &str) {
        let mut inner = self.inner.lock().await;
        inner
            .message_to_request
            .insert(message_id, request_id.to_string());
    }

    pub async fn lookup_message_to_request(&self, message_id: i32) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.message_to_request.get(&message_id).cloned()
    }

    pub async fn unmap_message(&self, message_id: i32) {
        let mut inner = self.inner.lock().await;
        inner.message_to_request.remove(&message_id);
    }

    // ── Pause flag ───────────────────────────────────────────────────────

    pub async fn set_paused(&self, paused: bool) {
        let mut inner = self.inner.lock().await;
        inner.paused = paused;
    }

    pub async fn is_paused(&self) -> bool {
        self.inner.lock().await.paused
    }

    // ── Status ───────────────────────────────────────────────────────────

    pub async fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        let mut pending: Vec<PendingInfo> = inner
            .approvals
            .iter()
            .map(|(rid, record)| PendingInfo {
                request_id: rid.clone(),
                agent_name: record.agent_name.clone(),
                tool_name: record.tool_name.clone(),
                age_secs: now.duration_since(record.created_at).as_secs(),
            })
            .collect();
        pending.sort_by(|a, b| b.age_secs.cmp(&a.age_secs));

        StatusSnapshot {
            paused: inner.paused,
            pending,
            sessions: inner
                .sessions
                .iter()
                .map(|(id, s)| (id.clone(), s.name.clone()))
                .collect(),
            queues: inner
                .queues
                .iter()
                .map(|(id, q)| (id.clone(), q.len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_starts_without_auto_approve() {
        let state = BridgeState::new();
        state.register_agent("main", "Claude Code").await;
        assert!(!state.check_auto_approve("main").await);
    }

    #[tokio::test]
    async fn auto_approve_sticks_until_unregister() {
        let state = BridgeState::new();
        state.register_agent("worker-1", "Worker").await;
        state.set_auto_approve("worker-1", "Worker").await;
        assert!(state.check_auto_approve("worker-1").await);

        state.unregister_agent("worker-1").await;
        assert!(!state.check_auto_approve("worker-1").await);
    }

    #[tokio::test]
    async fn double_register_preserves_auto_approve() {
        let state = BridgeState::new();
        state.register_agent("main", "Claude Code").await;
        state.set_auto_approve("main", "Claude Code").await;

        // Notification hooks re-register on every event; the grant survives
        // and the latest name wins.
        state.register_agent("main", "CC v2").await;
        assert!(state.check_auto_approve("main").await);
        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.sessions, vec![("main".into(), "CC v2".into())]);
    }

    #[tokio::test]
    async fn set_auto_approve_creates_missing_session() {
        let state = BridgeState::new();
        state.set_auto_approve("ghost", "Ghost").await;
        assert!(state.check_auto_approve("ghost").await);
    }

    #[tokio::test]
    async fn queue_is_fifo_and_drains_exactly_once() {
        let state = BridgeState::new();
        state.enqueue_message("main", "first").await;
        let depth = state.enqueue_message("main", "second").await;
        assert_eq!(depth, 2);

        assert_eq!(state.peek_messages("main").await, vec!["first", "second"]);
        assert_eq!(state.drain_messages("main").await, vec!["first", "second"]);
        assert!(state.drain_messages("main").await.is_empty());
    }

    #[tokio::test]
    async fn queue_cap_drops_oldest() {
        let state = BridgeState::new();
        for i in 0..MESSAGE_QUEUE_CAP + 5 {
            state.enqueue_message("main", &format!("msg {i}")).await;
        }
        let messages = state.drain_messages("main").await;
        assert_eq!(messages.len(), MESSAGE_QUEUE_CAP);
        assert_eq!(messages[0], "msg 5");
    }

    #[tokio::test]
    async fn complete_approval_fires_latch_once() {
        let state = BridgeState::new();
        let rx = state.create_approval("abc12345", "main", "CC", "bash").await;

        let completed = state
            .complete_approval("abc12345", Resolution::new(Decision::Approve, "user approved"))
            .await
            .expect("first completion");
        assert_eq!(completed.agent_id, "main");

        let resolution = rx.await.expect("latch fired");
        assert_eq!(resolution.decision, Decision::Approve);
        assert_eq!(resolution.reason, "user approved");

        // Second completion is a no-op: the record is gone.
        assert!(
            state
                .complete_approval("abc12345", Resolution::new(Decision::Deny, "late"))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn complete_unknown_request_leaves_state_unchanged() {
        let state = BridgeState::new();
        assert!(
            state
                .complete_approval("nope", Resolution::new(Decision::Approve, "x"))
                .await
                .is_none()
        );
        assert_eq!(state.snapshot().await.pending.len(), 0);
    }

    #[tokio::test]
    async fn complete_all_resolves_every_pending() {
        let state = BridgeState::new();
        let rx1 = state.create_approval("aaaa1111", "main", "CC", "bash").await;
        let rx2 = state.create_approval("bbbb2222", "w1", "Worker", "write").await;

        let count = state.complete_all(Decision::Deny, "bulk denied").await;
        assert_eq!(count, 2);
        assert_eq!(rx1.await.expect("latch").decision, Decision::Deny);
        assert_eq!(rx2.await.expect("latch").reason, "bulk denied");
        assert!(state.snapshot().await.pending.is_empty());
    }

    #[tokio::test]
    async fn remove_approval_drops_latch() {
        let state = BridgeState::new();
        let rx = state.create_approval("abc12345", "main", "CC", "bash").await;
        state.remove_approval("abc12345").await;
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn message_map_roundtrip() {
        let state = BridgeState::new();
        state.map_message_to_request(77, "abc12345").await;
        assert_eq!(
            state.lookup_message_to_request(77).await.as_deref(),
            Some("abc12345")
        );
        state.unmap_message(77).await;
        assert!(state.lookup_message_to_request(77).await.is_none());
    }

    #[tokio::test]
    async fn snapshot_reports_counts_and_ages() {
        let state = BridgeState::new();
        state.register_agent("main", "Claude Code").await;
        state.enqueue_message("main", "hello").await;
        let _rx = state.create_approval("abc12345", "main", "CC", "bash").await;

        let snapshot = state.snapshot().await;
        assert!(!snapshot.paused);
        assert_eq!(snapshot.pending.len(), 1);
        assert_eq!(snapshot.pending[0].tool_name, "bash");
        assert_eq!(snapshot.queues.get("main"), Some(&1));
    }

    #[tokio::test]
    async fn pause_flag_roundtrip() {
        let state = BridgeState::new();
        assert!(!state.is_paused().await);
        state.set_paused(true).await;
        assert!(state.is_paused().await);
        state.set_paused(false).await;
        assert!(!state.is_paused().await);
    }
}
