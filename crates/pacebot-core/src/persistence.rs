//! Durable conversation memory: a JSON file keyed by conversation id, flushed
//! on a fixed interval by a background task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::events::{emit, EventSender, RelayEvent};
use crate::store::{ConversationStore, Snapshot};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("memory file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("memory file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Everything saved so far. Nothing saved yet is an empty map, not an error.
    async fn load(&self) -> Result<Snapshot, PersistenceError>;
    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError>;
}

/// `{"<conversation id>": [{"role": ..., "content": ...}, ...], ...}`
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ConversationRepository for JsonFileRepository {
    async fn load(&self) -> Result<Snapshot, PersistenceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Snapshot::new()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Snapshot::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        // write-then-rename so a crash never leaves half a file behind
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Save `store` every `period` until `shutdown` flips to true (or its sender
/// is dropped), then save once more. Failures are logged and retried on the
/// next tick.
pub fn spawn_flusher(
    store: ConversationStore,
    repo: Arc<dyn ConversationRepository>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    events: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; nothing has changed yet at startup
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    flush(&store, repo.as_ref(), &events).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        flush(&store, repo.as_ref(), &events).await;
        info!("Memory flusher stopped.");
    })
}

async fn flush(store: &ConversationStore, repo: &dyn ConversationRepository, events: &EventSender) {
    let snapshot = store.snapshot().await;
    match repo.save(&snapshot).await {
        Ok(()) => {
            debug!(conversations = snapshot.len(), "memory flushed");
            emit(
                events,
                RelayEvent::Persisted {
                    conversations: snapshot.len(),
                },
            );
        }
        Err(e) => {
            error!(error = %e, "Failed to persist memory");
            emit(
                events,
                RelayEvent::PersistFailed {
                    error: e.to_string(),
                },
            );
        }
    }
}
