//! Per-message handling: filter, remember, complete, enqueue.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::completion::CompletionService;
use crate::config::Config;
use crate::dispatch::DispatchHandle;
use crate::events::{emit, EventSender, RelayEvent};
use crate::prompts::is_identity_probe;
use crate::store::ConversationStore;
use crate::types::{InboundMessage, ModelParams, PendingReply, Turn};

/// Which branch an inbound message ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// No text, or our own echo
    Ignored,
    /// Identity probe; canned reply queued, history untouched
    Bypassed,
    /// Model reply recorded and queued
    Enqueued,
    /// Model call failed; user turn kept, nothing queued
    CompletionFailed,
}

pub struct TurnProcessor {
    store: ConversationStore,
    completion: Arc<dyn CompletionService>,
    dispatch: DispatchHandle,
    events: EventSender,
    params: ModelParams,
    canned_reply: String,
    identity_probes: Vec<String>,
    self_id: Option<String>,
}

impl TurnProcessor {
    pub fn new(
        config: &Config,
        store: ConversationStore,
        completion: Arc<dyn CompletionService>,
        dispatch: DispatchHandle,
        events: EventSender,
    ) -> Self {
        Self {
            store,
            completion,
            dispatch,
            events,
            params: config.model_params(),
            canned_reply: config.canned_reply.clone(),
            identity_probes: config.identity_probes.clone(),
            self_id: config.self_id.clone(),
        }
    }

    fn is_own_echo(&self, msg: &InboundMessage) -> bool {
        msg.from_self
            || matches!(
                (&self.self_id, &msg.sender_id),
                (Some(me), Some(sender)) if me == sender
            )
    }

    pub async fn handle(&self, msg: InboundMessage) -> TurnOutcome {
        if self.is_own_echo(&msg) {
            debug!(conversation_id = %msg.conversation_id, "ignoring own message");
            return TurnOutcome::Ignored;
        }
        let Some(text) = msg.usable_text() else {
            return TurnOutcome::Ignored;
        };
        let id = msg.conversation_id.as_str();

        let truncated: String = text.chars().take(120).collect();
        info!(conversation_id = %id, "From {}: {}", id, truncated);
        emit(
            &self.events,
            RelayEvent::Received {
                conversation_id: id.to_string(),
                text: text.to_string(),
            },
        );

        self.store.get_or_create(id).await;

        // Canned replies are paced like any other but never enter the history.
        if is_identity_probe(text, &self.identity_probes) {
            info!(conversation_id = %id, "identity probe, sending canned reply");
            emit(
                &self.events,
                RelayEvent::Bypassed {
                    conversation_id: id.to_string(),
                },
            );
            self.enqueue(id, self.canned_reply.clone(), text);
            return TurnOutcome::Bypassed;
        }

        self.store.append(id, Turn::user(text)).await;
        self.store.trim(id).await;
        let history = self.store.turns(id).await.unwrap_or_default();

        match self.completion.complete(&history, &self.params).await {
            Ok(reply) => {
                self.store.append(id, Turn::assistant(reply.clone())).await;
                self.enqueue(id, reply, text);
                TurnOutcome::Enqueued
            }
            Err(e) => {
                error!(conversation_id = %id, error = %e, "Completion failed");
                emit(
                    &self.events,
                    RelayEvent::CompletionFailed {
                        conversation_id: id.to_string(),
                        error: e.to_string(),
                    },
                );
                TurnOutcome::CompletionFailed
            }
        }
    }

    fn enqueue(&self, id: &str, reply: String, inbound_text: &str) {
        let pending = PendingReply {
            conversation_id: id.to_string(),
            reply,
            inbound_text: inbound_text.to_string(),
        };
        if let Err(e) = self.dispatch.enqueue(pending) {
            warn!(conversation_id = %id, error = %e, "Dropping reply");
        }
    }
}
