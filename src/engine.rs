//! Command classification tick.
//!
//! Drains the frame buffer one command at a time, assembling
//! length-prefixed `MSG` payloads before producing a correlated message
//! event. An incomplete frame yields `Ok(None)` and consumes nothing, so
//! the next data tick retries. An unknown or malformed command is a
//! `Stream` error, surfaced and not retried.

use bytes::Bytes;

use crate::buffer::FrameBuffer;
use crate::error::{Error, Result};
use crate::events::{MessageReceived, ServerEvent};
use crate::protocol::{classify, MsgHeader, ServerCommand, CR_LF};
use crate::registry::SubscriptionRegistry;

/// Safety cap per buffer tick so a burst cannot starve the loop.
pub(crate) const MAX_COMMANDS_PER_TICK: usize = 10;

/// Take the next complete command off the buffer, if any.
pub(crate) fn next_event(
    buffer: &mut FrameBuffer,
    registry: &SubscriptionRegistry,
) -> Result<Option<ServerEvent>> {
    let Some(line) = buffer.get_line() else {
        return Ok(None);
    };

    let Some(command) = classify(&line) else {
        return Err(Error::Stream(format!("message not handled: {line}")));
    };

    if command == ServerCommand::Msg {
        return next_message(buffer, registry, &line);
    }

    buffer.acknowledge(&line);

    let event = match command {
        ServerCommand::Info => ServerEvent::Info(line),
        ServerCommand::Ping => ServerEvent::Ping,
        ServerCommand::Pong => ServerEvent::Pong,
        ServerCommand::Ok => ServerEvent::Ok,
        ServerCommand::Err => {
            ServerEvent::Error(line.trim_start_matches("-ERR").trim().to_string())
        }
        ServerCommand::Msg => unreachable!("handled above"),
    };

    Ok(Some(event))
}

fn next_message(
    buffer: &mut FrameBuffer,
    registry: &SubscriptionRegistry,
    line: &str,
) -> Result<Option<ServerEvent>> {
    let header = MsgHeader::parse(line)?;

    let payload = if header.length > 0 {
        match buffer.get(header.length, line.len() + CR_LF.len()) {
            Some(bytes) => Bytes::copy_from_slice(bytes),
            // Buffer has no full message yet; wait for the next tick.
            None => return Ok(None),
        }
    } else {
        Bytes::new()
    };

    buffer.acknowledge_message(line, header.length);

    let message = MessageReceived {
        subject: header.subject,
        sid: header.sid,
        reply_to: header.reply_to,
        payload,
    };

    let event = match registry.is_known(&message.sid) {
        true => ServerEvent::Message(message),
        false => ServerEvent::UndefinedMessage(message),
    };
    Ok(Some(event))
}
