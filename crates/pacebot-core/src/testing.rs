//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::completion::{CompletionError, CompletionService};
use crate::persistence::{ConversationRepository, PersistenceError};
use crate::store::Snapshot;
use crate::transport::{Transport, TransportError};
use crate::types::{ModelParams, Turn};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub conversation_id: String,
    pub text: String,
    pub at: Instant,
}

/// Records every send; optionally fails sends whose text matches.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    fail_on: Option<String>,
}

impl RecordingTransport {
    pub fn failing_on(text: &str) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_on: Some(text.to_string()),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, conversation_id: &str, text: &str) -> Result<(), TransportError> {
        lock(&self.sent).push(SentMessage {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            at: Instant::now(),
        });
        if self.fail_on.as_deref() == Some(text) {
            return Err(TransportError::Send("scripted failure".into()));
        }
        Ok(())
    }
}

/// Pops scripted results in order; records what it was asked.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    calls: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedCompletion {
    pub fn new(replies: Vec<Result<String, CompletionError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<Turn>> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(
        &self,
        turns: &[Turn],
        _params: &ModelParams,
    ) -> Result<String, CompletionError> {
        lock(&self.calls).push(turns.to_vec());
        lock(&self.replies)
            .pop_front()
            .unwrap_or(Err(CompletionError::EmptyResponse))
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    pub initial: Snapshot,
    pub saves: Mutex<Vec<Snapshot>>,
    pub fail_saves: bool,
    pub fail_loads: bool,
}

impl MemoryRepository {
    pub fn saves(&self) -> Vec<Snapshot> {
        lock(&self.saves).clone()
    }
}

#[async_trait]
impl ConversationRepository for MemoryRepository {
    async fn load(&self) -> Result<Snapshot, PersistenceError> {
        if self.fail_loads {
            return Err(PersistenceError::Io(std::io::Error::other("permission denied")));
        }
        Ok(self.initial.clone())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        if self.fail_saves {
            return Err(PersistenceError::Io(std::io::Error::other("disk full")));
        }
        lock(&self.saves).push(snapshot.clone());
        Ok(())
    }
}

/// Replies "echo: <last turn>", so replies can be matched to messages
/// regardless of task scheduling.
#[derive(Default)]
pub struct EchoCompletion;

#[async_trait]
impl CompletionService for EchoCompletion {
    async fn complete(
        &self,
        turns: &[Turn],
        _params: &ModelParams,
    ) -> Result<String, CompletionError> {
        let last = turns.last().ok_or(CompletionError::EmptyResponse)?;
        Ok(format!("echo: {}", last.content))
    }
}
