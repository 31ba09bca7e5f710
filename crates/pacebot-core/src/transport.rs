//! Messaging transport seam. Session setup and inbound decoding belong to
//! the implementor; the relay only needs to send text back.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport is closed")]
    Closed,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget delivery attempt; the relay never retries.
    async fn send(&self, conversation_id: &str, text: &str) -> Result<(), TransportError>;
}
