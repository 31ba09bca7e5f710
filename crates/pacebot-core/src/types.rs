//! Core types: Role, Turn, InboundMessage, PendingReply, DispatchState.

use serde::{Deserialize, Serialize};

// ── Conversation turns ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message unit in a conversation. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ── Transport messages ──

/// An inbound event as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub conversation_id: String,
    /// `None` when the transport delivered something without a text payload
    /// (media, reactions, receipts).
    pub text: Option<String>,
    #[serde(default)]
    pub from_self: bool,
    #[serde(default)]
    pub sender_id: Option<String>,
}

impl InboundMessage {
    pub fn text(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            text: Some(text.into()),
            from_self: false,
            sender_id: None,
        }
    }

    /// The text payload, if it carries anything besides whitespace.
    pub fn usable_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// A reply waiting for its turn in the dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReply {
    pub conversation_id: String,
    pub reply: String,
    /// The inbound text this reply answers; feeds the pacing delay.
    pub inbound_text: String,
}

// ── Dispatch state ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchState {
    Idle,
    Draining,
}

impl std::fmt::Display for DispatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchState::Idle => write!(f, "idle"),
            DispatchState::Draining => write!(f, "draining"),
        }
    }
}

// ── Completion parameters ──

/// Fixed per-process parameters for every completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}
