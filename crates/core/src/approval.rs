use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

/// The decider's answer to a `tool_approval_required` event.
/// `Approve` carries the subset of the gated call ids the decider actually approved; any gated
/// call not named is treated as implicitly denied without terminating the round. `Deny` rejects
/// the whole gated batch and ends the turn with a denial message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve { approved_call_ids: Vec<String> },
    ApproveAll,
    Edit { instruction: String },
    Deny,
    /// Synthesized by [`ApprovalGate::await_decision`] itself when no external decider answers
    /// in time. Ends the round exactly like `Deny`, but the resulting
    /// synthetic tool results are tagged `error_reason=timeout` instead of `denied` so the next
    /// LLM round (and any observer) can tell the two apart.
    Timeout,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::Approve { .. } => "approve",
            ApprovalDecision::ApproveAll => "approve_all",
            ApprovalDecision::Edit { .. } => "edit",
            ApprovalDecision::Deny => "deny",
            ApprovalDecision::Timeout => "timeout",
        }
    }
}

/// Bridges the Turn Engine's async wait with an external decider's eventual call to
/// [`ApprovalGate::respond`] via a `oneshot` channel registered in a mutex-guarded map keyed
/// by a fresh UUID. Unanswered
/// approvals resolve to [`ApprovalDecision::Timeout`] after a configurable timeout rather than
/// hanging the turn forever.
pub struct ApprovalGate {
    pending: Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>,
    timeout: Duration,
}

impl ApprovalGate {
    pub fn new(timeout: Duration) -> Self {
        ApprovalGate {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Registers a fresh pending slot without blocking. Returns the id to publish in the
    /// `tool_approval_required` event and a receiver to hand to [`Self::await_decision`].
    pub fn begin(&self) -> (String, oneshot::Receiver<ApprovalDecision>) {
        let approval_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(approval_id.clone(), tx);
        (approval_id, rx)
    }

    /// Awaits a decision for a slot created by [`Self::begin`], collapsing a timeout or a
    /// dropped sender (e.g. the engine shutting down) to [`ApprovalDecision::Timeout`]. Always
    /// cleans up its own map entry, so a late external `respond` call is simply ignored.
    pub async fn await_decision(
        &self,
        approval_id: &str,
        rx: oneshot::Receiver<ApprovalDecision>,
    ) -> ApprovalDecision {
        let decision = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) | Err(_) => ApprovalDecision::Timeout,
        };
        self.pending.lock().remove(approval_id);
        decision
    }

    /// The external decider's entry point. Returns `false` if `approval_id` is unknown,
    /// already answered, or already timed out.
    pub fn respond(&self, approval_id: &str, decision: ApprovalDecision) -> bool {
        let sender = self.pending.lock().remove(approval_id);
        match sender {
            Some(tx) => tx.send(decision).is_ok(),
            None => {
                tracing::warn!(approval_id, "approval response for unknown or expired id");
                false
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}
