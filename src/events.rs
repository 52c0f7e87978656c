//! Typed events produced by the protocol engine.

use bytes::Bytes;

use crate::error::Result;

/// One parsed server command, ready for dispatch.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    /// `INFO <json>`; carries the raw line for the caller to parse.
    Info(String),
    Ping,
    Pong,
    Ok,
    /// `-ERR <reason>`.
    Error(String),
    /// `MSG` whose sid resolved against the registry.
    Message(MessageReceived),
    /// `MSG` for a sid the registry no longer knows; recovered, not
    /// fatal (the server may be delivering to a subscription torn down
    /// mid-flight).
    UndefinedMessage(MessageReceived),
}

/// A correlated `MSG` frame.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageReceived {
    pub subject: String,
    pub sid: String,
    pub reply_to: Option<String>,
    pub payload: Bytes,
}

/// A decoded STAN delivery handed to the application handler.
#[derive(Clone, Debug, PartialEq)]
pub struct StanMessage {
    /// Sid of the owning subscription.
    pub sid: String,
    /// Channel the message was published on.
    pub subject: String,
    pub sequence: u64,
    pub data: Vec<u8>,
    pub timestamp: i64,
    pub redelivered: bool,
}

/// Application callback invoked for each delivery.
///
/// Runs to completion on the dispatch loop. Returning `Ok` acknowledges
/// the message; returning an error leaves it unacknowledged so the
/// server redelivers after the subscription's ack-wait.
pub type MessageHandler = Box<dyn FnMut(&StanMessage) -> Result<()> + Send>;
