//! RelayEvent enum: broadcast from the relay to front ends via tokio::broadcast.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::DispatchState;

pub type EventSender = broadcast::Sender<RelayEvent>;

/// Everything observable the relay does, in the order it happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RelayEvent {
    /// An inbound message passed the echo and empty-payload filters
    #[serde(rename = "received")]
    Received {
        conversation_id: String,
        text: String,
    },

    /// Identity probe answered with the canned reply, model skipped
    #[serde(rename = "bypassed")]
    Bypassed { conversation_id: String },

    #[serde(rename = "completion_failed")]
    CompletionFailed {
        conversation_id: String,
        error: String,
    },

    /// A reply left through the transport; `delay_ms` is the pause that follows
    #[serde(rename = "sent")]
    Sent {
        conversation_id: String,
        text: String,
        delay_ms: u64,
        timestamp: String,
    },

    #[serde(rename = "send_failed")]
    SendFailed {
        conversation_id: String,
        error: String,
        delay_ms: u64,
        timestamp: String,
    },

    /// Dispatch queue moved between idle and draining
    #[serde(rename = "queue_state")]
    QueueState(DispatchState),

    #[serde(rename = "persisted")]
    Persisted { conversations: usize },

    #[serde(rename = "persist_failed")]
    PersistFailed { error: String },
}

impl RelayEvent {
    /// `{"event": "...", "data": {...}}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Broadcast without caring whether anyone is listening.
pub(crate) fn emit(tx: &EventSender, event: RelayEvent) {
    let _ = tx.send(event);
}
