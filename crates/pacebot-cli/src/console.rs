//! Line-oriented console transport: stdin in, stdout out.
//!
//! `alice: hey` addresses conversation `alice`; a line without a prefix goes
//! to the `console` conversation. Sends print as `[alice] reply`.

use async_trait::async_trait;
use std::io::BufRead;
use std::thread;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use pacebot_core::transport::{Transport, TransportError};
use pacebot_core::types::InboundMessage;

pub const DEFAULT_CONVERSATION: &str = "console";

/// Turn one input line into an inbound message. Blank lines carry no text
/// and are passed through so the relay drops them like any empty payload.
pub fn parse_line(line: &str) -> InboundMessage {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some((id, text)) = line.split_once(':') {
        let id = id.trim();
        if !id.is_empty() && !id.contains(char::is_whitespace) {
            return InboundMessage::text(id, text.trim_start());
        }
    }
    InboundMessage::text(DEFAULT_CONVERSATION, line)
}

pub struct ConsoleTransport<W> {
    out: Mutex<W>,
}

impl<W> ConsoleTransport<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl<W> Transport for ConsoleTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, conversation_id: &str, text: &str) -> Result<(), TransportError> {
        let line = format!("[{}] {}\n", conversation_id, text);
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// Forward lines from `reader` until EOF, a read error, or the relay
/// hanging up. Blocking; runs on its own thread.
pub fn forward_lines<R: BufRead>(reader: R, tx: mpsc::Sender<InboundMessage>) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.blocking_send(parse_line(&line)).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "input read failed");
                return;
            }
        }
    }
    info!("input closed");
}

/// Read `reader` on a plain OS thread. A blocked read there never holds up
/// runtime shutdown, unlike tokio's stdin which parks a blocking-pool thread
/// the runtime waits for. Dropping the sender at EOF ends the relay's input.
pub fn spawn_line_reader<R>(
    reader: R,
    tx: mpsc::Sender<InboundMessage>,
) -> std::io::Result<thread::JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || forward_lines(reader, tx))
}

pub fn spawn_stdin_reader(
    tx: mpsc::Sender<InboundMessage>,
) -> std::io::Result<thread::JoinHandle<()>> {
    // StdinLock is not Send, so buffer the handle itself
    spawn_line_reader(std::io::BufReader::new(std::io::stdin()), tx)
}
