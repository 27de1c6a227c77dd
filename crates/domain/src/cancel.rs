use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cooperative cancellation flag shared by clone. Threaded into the LLM Port and the Tool
/// Runner so a cancel fired from outside the turn can be observed at every suspension point.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A registry of [`CancelToken`]s keyed by conversation id, with parent/child grouping so
/// cancelling a parent conversation cascades to any sub-agent conversations it spawned.
#[derive(Debug, Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl CancelMap {
    pub fn new() -> Self {
        CancelMap::default()
    }

    pub fn register(&self, conversation_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(conversation_id.to_string(), token.clone());
        token
    }

    /// Cancels the token for `conversation_id` and every conversation registered as its child,
    /// recursively. Returns whether anything was found to cancel.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let found = {
            let tokens = self.tokens.lock();
            if let Some(token) = tokens.get(conversation_id) {
                token.cancel();
                true
            } else {
                false
            }
        };
        let children: Vec<String> = self
            .groups
            .lock()
            .get(conversation_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for child in children {
            self.cancel(&child);
        }
        found
    }

    pub fn remove(&self, conversation_id: &str) {
        self.tokens.lock().remove(conversation_id);
        self.groups.lock().remove(conversation_id);
    }

    pub fn is_running(&self, conversation_id: &str) -> bool {
        self.tokens
            .lock()
            .get(conversation_id)
            .map(|t| !t.is_cancelled())
            .unwrap_or(false)
    }

    pub fn add_to_group(&self, parent: &str, child: &str) {
        self.groups
            .lock()
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }

    pub fn remove_from_group(&self, parent: &str, child: &str) {
        if let Some(set) = self.groups.lock().get_mut(parent) {
            set.remove(child);
        }
    }
}
