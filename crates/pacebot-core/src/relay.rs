//! The relay owns the store, the dispatch consumer and the memory flusher
//! for one process, and feeds inbound messages to the turn processor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::completion::CompletionService;
use crate::config::Config;
use crate::dispatch::DispatchQueue;
use crate::events::{EventSender, RelayEvent};
use crate::persistence::{spawn_flusher, ConversationRepository, PersistenceError};
use crate::processor::TurnProcessor;
use crate::store::ConversationStore;
use crate::transport::Transport;
use crate::types::InboundMessage;

pub struct Relay {
    config: Config,
    store: ConversationStore,
    transport: Arc<dyn Transport>,
    completion: Arc<dyn CompletionService>,
    repository: Arc<dyn ConversationRepository>,
    event_tx: EventSender,
}

impl Relay {
    /// Build the relay and load saved memory. Missing memory is an empty
    /// start; unreadable memory is an error, since the flusher would
    /// otherwise overwrite it with whatever this process holds.
    pub async fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        completion: Arc<dyn CompletionService>,
        repository: Arc<dyn ConversationRepository>,
    ) -> Result<Self, PersistenceError> {
        let (event_tx, _) = broadcast::channel(256);
        let store = ConversationStore::new(config.persona.clone(), config.history_cap);

        let snapshot = repository.load().await?;
        let count = snapshot.len();
        store.restore(snapshot).await;
        if count > 0 {
            info!("Memory loaded: {} conversation(s)", count);
        }

        Ok(Self {
            config,
            store,
            transport,
            completion,
            repository,
            event_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.event_tx.subscribe()
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Handle inbound messages until the channel closes or `shutdown` turns
    /// true. In-flight turns finish, memory gets a final flush, and queued
    /// replies are still sent (with pacing) before this returns.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let (flush_stop_tx, flush_stop_rx) = watch::channel(false);
        let flusher = spawn_flusher(
            self.store.clone(),
            Arc::clone(&self.repository),
            Duration::from_secs(self.config.flush_interval_seconds),
            flush_stop_rx,
            self.event_tx.clone(),
        );

        let (dispatch, dispatch_task) = DispatchQueue::spawn(
            Arc::clone(&self.transport),
            self.config.delay_model(),
            self.event_tx.clone(),
        );

        let processor = Arc::new(TurnProcessor::new(
            &self.config,
            self.store.clone(),
            Arc::clone(&self.completion),
            dispatch,
            self.event_tx.clone(),
        ));

        info!("Relay is ready.");

        // One task per message: a slow completion only holds up its own reply.
        let mut turns = JoinSet::new();
        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => {
                        let processor = Arc::clone(&processor);
                        turns.spawn(async move { processor.handle(msg).await });
                    }
                    None => {
                        info!("Inbound channel closed.");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received.");
                        break;
                    }
                }
                Some(joined) = turns.join_next(), if !turns.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Turn task failed");
                    }
                }
            }
        }

        while let Some(joined) = turns.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Turn task failed");
            }
        }

        // last handle to the queue; the consumer exits once the backlog is out
        drop(processor);

        let _ = flush_stop_tx.send(true);
        if let Err(e) = flusher.await {
            error!(error = %e, "Memory flusher task failed");
        }
        if let Err(e) = dispatch_task.await {
            error!(error = %e, "Dispatch task failed");
        }

        info!("Relay stopped.");
    }
}
