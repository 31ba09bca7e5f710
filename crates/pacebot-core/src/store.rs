//! Per-conversation rolling memory.
//!
//! Every conversation starts with the persona as a system turn and keeps at
//! most `cap` turns. When the cap is exceeded the oldest exchange turns go
//! first; the system turn at index 0 is never removed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::types::{Role, Turn};

/// Persisted form: conversation id -> ordered turns. Sorted so saved files diff cleanly.
pub type Snapshot = BTreeMap<String, Vec<Turn>>;

/// Shared handle; clones point at the same conversations.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    conversations: Arc<RwLock<HashMap<String, Vec<Turn>>>>,
    persona: Arc<str>,
    cap: usize,
}

impl ConversationStore {
    /// `cap` counts the system turn. Values below 2 are raised to 2.
    pub fn new(persona: impl Into<String>, cap: usize) -> Self {
        let persona: String = persona.into();
        Self {
            conversations: Arc::new(RwLock::new(HashMap::new())),
            persona: Arc::from(persona),
            cap: cap.max(2),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    fn seed(&self) -> Vec<Turn> {
        vec![Turn::system(self.persona.as_ref())]
    }

    /// Existing history, or a fresh one holding only the persona.
    pub async fn get_or_create(&self, id: &str) -> Vec<Turn> {
        if let Some(turns) = self.conversations.read().await.get(id) {
            return turns.clone();
        }
        let mut map = self.conversations.write().await;
        map.entry(id.to_string())
            .or_insert_with(|| {
                debug!(conversation_id = %id, "new conversation");
                self.seed()
            })
            .clone()
    }

    /// Append a turn, creating the conversation if needed. User and
    /// assistant appends are trimmed to the cap in the same critical section.
    pub async fn append(&self, id: &str, turn: Turn) {
        let role = turn.role;
        let mut map = self.conversations.write().await;
        let turns = map.entry(id.to_string()).or_insert_with(|| self.seed());
        turns.push(turn);
        if matches!(role, Role::User | Role::Assistant) {
            trim_history(turns, self.cap);
        }
    }

    /// Drop the oldest non-system turns until the cap holds. Idempotent.
    pub async fn trim(&self, id: &str) {
        let mut map = self.conversations.write().await;
        if let Some(turns) = map.get_mut(id) {
            trim_history(turns, self.cap);
        }
    }

    /// Copy of one conversation's turns.
    pub async fn turns(&self, id: &str) -> Option<Vec<Turn>> {
        self.conversations.read().await.get(id).cloned()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.conversations
            .read()
            .await
            .iter()
            .map(|(id, turns)| (id.clone(), turns.clone()))
            .collect()
    }

    /// Replace everything in memory with `snapshot`. Histories missing their
    /// system turn get the persona put back in front; oversized ones are trimmed.
    pub async fn restore(&self, snapshot: Snapshot) {
        let mut restored = HashMap::with_capacity(snapshot.len());
        for (id, mut turns) in snapshot {
            if turns.first().map(|t| t.role) != Some(Role::System) {
                warn!(conversation_id = %id, "restored history had no system turn, re-seeding persona");
                turns.insert(0, Turn::system(self.persona.as_ref()));
            }
            trim_history(&mut turns, self.cap);
            restored.insert(id, turns);
        }
        *self.conversations.write().await = restored;
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }
}

fn trim_history(turns: &mut Vec<Turn>, cap: usize) {
    if turns.len() <= cap {
        return;
    }
    let excess = turns.len() - cap;
    let keep_from = usize::from(turns.first().map(|t| t.role) == Some(Role::System));
    turns.drain(keep_from..keep_from + excess);
}
