//! pacebot-core: Pure relay logic, no front end.
//!
//! This crate holds the conversation memory, the reply pacing queue and the
//! per-message turn handling for the pacebot chat relay. Front ends plug in a
//! [`transport::Transport`] and feed inbound messages over an mpsc channel;
//! everything observable is broadcast as [`events::RelayEvent`]s.

pub mod config;
pub mod events;
pub mod prompts;
pub mod types;

pub mod completion;
pub mod delay;
pub mod dispatch;
pub mod persistence;
pub mod processor;
pub mod relay;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
