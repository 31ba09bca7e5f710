//! Outbound pacing queue.
//!
//! Replies from every conversation share one FIFO and one consumer task, so
//! the process never has two sends in flight. After each send the consumer
//! sleeps for the pacing delay of that reply before looking at the next one.
//!
//! The consumer is a two-state machine:
//!
//! | state    | event              | next     |
//! |----------|--------------------|----------|
//! | Idle     | entry received     | Draining |
//! | Draining | queue non-empty    | Draining |
//! | Draining | queue empty        | Idle     |
//!
//! The empty check happens only after the pacing sleep, so an entry that
//! arrives mid-sleep is picked up by the same drain.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::delay::DelayModel;
use crate::events::{emit, EventSender, RelayEvent};
use crate::transport::Transport;
use crate::types::{DispatchState, PendingReply};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch queue has shut down")]
    Closed,
}

/// Producer side of the queue. Cheap to clone; the consumer exits once every
/// handle is dropped and the backlog is sent.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<PendingReply>,
    state: watch::Receiver<DispatchState>,
}

impl DispatchHandle {
    pub fn enqueue(&self, reply: PendingReply) -> Result<(), DispatchError> {
        self.tx.send(reply).map_err(|_| DispatchError::Closed)
    }

    pub fn state(&self) -> DispatchState {
        *self.state.borrow()
    }
}

pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<PendingReply>,
    transport: Arc<dyn Transport>,
    delay: DelayModel,
    events: EventSender,
    state: watch::Sender<DispatchState>,
}

impl DispatchQueue {
    /// Start the single consumer task.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        delay: DelayModel,
        events: EventSender,
    ) -> (DispatchHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(DispatchState::Idle);
        let queue = Self {
            rx,
            transport,
            delay,
            events,
            state: state_tx,
        };
        let task = tokio::spawn(queue.run());
        (
            DispatchHandle {
                tx,
                state: state_rx,
            },
            task,
        )
    }

    async fn run(mut self) {
        while let Some(first) = self.rx.recv().await {
            self.transition(DispatchState::Draining);
            let mut next = Some(first);
            while let Some(reply) = next {
                self.deliver(reply).await;
                next = self.rx.try_recv().ok();
            }
            self.transition(DispatchState::Idle);
        }
        info!("Dispatch queue closed.");
    }

    fn transition(&self, state: DispatchState) {
        self.state.send_replace(state);
        emit(&self.events, RelayEvent::QueueState(state));
    }

    /// One delivery attempt, then the pacing pause. Failures are not retried.
    async fn deliver(&self, reply: PendingReply) {
        let delay = self.delay.compute(&reply.inbound_text, &reply.reply);
        let delay_ms = delay.as_millis() as u64;
        let timestamp = chrono::Utc::now().to_rfc3339();

        match self
            .transport
            .send(&reply.conversation_id, &reply.reply)
            .await
        {
            Ok(()) => {
                info!(conversation_id = %reply.conversation_id, "To {}: {}", reply.conversation_id, reply.reply);
                emit(
                    &self.events,
                    RelayEvent::Sent {
                        conversation_id: reply.conversation_id,
                        text: reply.reply,
                        delay_ms,
                        timestamp,
                    },
                );
            }
            Err(e) => {
                error!(conversation_id = %reply.conversation_id, error = %e, "Failed to send reply");
                emit(
                    &self.events,
                    RelayEvent::SendFailed {
                        conversation_id: reply.conversation_id,
                        error: e.to_string(),
                        delay_ms,
                        timestamp,
                    },
                );
            }
        }

        info!(delay_ms, "Waiting {:.1}s before next message", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::compute_delay;
    use crate::testing::RecordingTransport;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn reply(id: &str, inbound: &str, text: &str) -> PendingReply {
        PendingReply {
            conversation_id: id.into(),
            reply: text.into(),
            inbound_text: inbound.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_across_conversations_with_pacing() {
        let transport = Arc::new(RecordingTransport::default());
        let (events, _) = broadcast::channel(64);
        let (handle, task) =
            DispatchQueue::spawn(transport.clone(), DelayModel::default(), events);

        let entries = vec![
            reply("A", "hey there", "yo"),
            reply("B", &"long question ".repeat(20), "short"),
            reply("C", "", &"x".repeat(45)),
        ];
        for entry in &entries {
            handle.enqueue(entry.clone()).unwrap();
        }
        drop(handle);
        task.await.unwrap();

        let sent = transport.sent();
        let order: Vec<&str> = sent.iter().map(|s| s.conversation_id.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C"]);

        for (i, pair) in sent.windows(2).enumerate() {
            let gap = pair[1].at - pair[0].at;
            let expected = compute_delay(&entries[i].inbound_text, &entries[i].reply);
            assert!(gap >= expected, "gap {:?} shorter than {:?}", gap, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_still_paces_and_moves_on() {
        let transport = Arc::new(RecordingTransport::failing_on("boom"));
        let (events, mut rx) = broadcast::channel(64);
        let (handle, task) =
            DispatchQueue::spawn(transport.clone(), DelayModel::default(), events);

        handle.enqueue(reply("A", "", "boom")).unwrap();
        handle.enqueue(reply("B", "", "fine")).unwrap();
        drop(handle);
        task.await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].at - sent[0].at >= Duration::from_millis(10_000));

        let mut saw_failure = false;
        let mut saw_sent = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                RelayEvent::SendFailed { conversation_id, .. } => {
                    assert_eq!(conversation_id, "A");
                    saw_failure = true;
                }
                RelayEvent::Sent { conversation_id, .. } => {
                    assert_eq!(conversation_id, "B");
                    saw_sent = true;
                }
                _ => {}
            }
        }
        assert!(saw_failure && saw_sent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_machine_returns_to_idle_and_restarts() {
        let transport = Arc::new(RecordingTransport::default());
        let (events, mut rx) = broadcast::channel(64);
        let (handle, task) =
            DispatchQueue::spawn(transport.clone(), DelayModel::default(), events);
        assert_eq!(handle.state(), DispatchState::Idle);

        handle.enqueue(reply("A", "", "one")).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.state(), DispatchState::Draining);

        // arrives mid-sleep: same drain picks it up
        handle.enqueue(reply("B", "", "two")).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.state(), DispatchState::Idle);

        // queue empty and idle: a new entry starts a new drain
        handle.enqueue(reply("C", "", "three")).unwrap();
        drop(handle);
        task.await.unwrap();
        assert_eq!(transport.sent().len(), 3);

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RelayEvent::QueueState(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                DispatchState::Draining,
                DispatchState::Idle,
                DispatchState::Draining,
                DispatchState::Idle,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_consumer_exit_fails() {
        let transport = Arc::new(RecordingTransport::default());
        let (events, _) = broadcast::channel(8);
        let (handle, task) = DispatchQueue::spawn(transport, DelayModel::default(), events);
        task.abort();
        let _ = task.await;
        assert_eq!(handle.enqueue(reply("A", "", "x")), Err(DispatchError::Closed));
    }
}
