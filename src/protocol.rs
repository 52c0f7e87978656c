//! NATS text protocol: command sets, header parsing, frame formatting.
//!
//! The protocol is line-oriented except for `MSG`/`PUB`, whose header
//! line is followed by a binary payload of declared length that may
//! itself contain CRLF bytes. This module only deals with single
//! frames; incremental assembly lives in [`crate::buffer`] and
//! [`crate::engine`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const CR_LF: &str = "\r\n";
pub const SPC: &str = " ";

/// Commands a client may send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    Connect,
    Pub,
    Sub,
    Unsub,
    Ping,
    Pong,
}

impl ClientCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientCommand::Connect => "CONNECT",
            ClientCommand::Pub => "PUB",
            ClientCommand::Sub => "SUB",
            ClientCommand::Unsub => "UNSUB",
            ClientCommand::Ping => "PING",
            ClientCommand::Pong => "PONG",
        }
    }
}

/// Commands the server may send, matched by line prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerCommand {
    Info,
    Msg,
    Ping,
    Pong,
    Err,
    Ok,
}

const SERVER_COMMANDS: [(ServerCommand, &str); 6] = [
    (ServerCommand::Info, "INFO"),
    (ServerCommand::Msg, "MSG"),
    (ServerCommand::Ping, "PING"),
    (ServerCommand::Pong, "PONG"),
    (ServerCommand::Err, "-ERR"),
    (ServerCommand::Ok, "+OK"),
];

/// Classify a protocol line by prefix against the fixed server command
/// set. `None` means the line is not a known command, which callers
/// must treat as a framing violation (distinct from an incomplete
/// frame, which never reaches classification).
pub fn classify(line: &str) -> Option<ServerCommand> {
    SERVER_COMMANDS
        .iter()
        .find(|(_, prefix)| line.starts_with(prefix))
        .map(|(command, _)| *command)
}

/// Parsed `MSG <subject> <sid> [reply-to] <length>` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsgHeader {
    pub subject: String,
    pub sid: String,
    pub reply_to: Option<String>,
    pub length: usize,
}

impl MsgHeader {
    /// Parse a `MSG` header line. Fewer than 3 fields after the command
    /// token, or an unparsable length, is a framing violation.
    pub fn parse(line: &str) -> Result<MsgHeader> {
        let mut fields = line.split_whitespace();
        fields.next(); // MSG token, already matched by the caller

        let fields: Vec<&str> = fields.collect();
        let (subject, sid, reply_to, length) = match fields.as_slice() {
            [subject, sid, length] => (*subject, *sid, None, *length),
            [subject, sid, reply_to, length] => (*subject, *sid, Some(*reply_to), *length),
            _ => return Err(Error::Stream(format!("wrong message format: {line}"))),
        };

        let length = length
            .parse::<usize>()
            .map_err(|_| Error::Stream(format!("wrong message format: {line}")))?;

        Ok(MsgHeader {
            subject: subject.to_string(),
            sid: sid.to_string(),
            reply_to: reply_to.map(str::to_string),
            length,
        })
    }
}

/// Format an outbound command frame: `<method> [params] [<nbytes>\r\n<payload>]\r\n`.
///
/// With a payload, the byte count is appended as the final parameter
/// and the payload follows on its own line, per the `PUB`/`CONNECT`
/// framing rules.
pub fn format_command(
    command: ClientCommand,
    params: &[&str],
    payload: Option<&[u8]>,
) -> Vec<u8> {
    let mut frame = command.as_str().as_bytes().to_vec();

    for param in params {
        frame.extend_from_slice(SPC.as_bytes());
        frame.extend_from_slice(param.as_bytes());
    }

    if let Some(payload) = payload {
        frame.extend_from_slice(SPC.as_bytes());
        frame.extend_from_slice(payload.len().to_string().as_bytes());
        frame.extend_from_slice(CR_LF.as_bytes());
        frame.extend_from_slice(payload);
    }

    frame.extend_from_slice(CR_LF.as_bytes());
    frame
}

/// Body of the raw `CONNECT` command.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectInfo {
    pub lang: String,
    pub version: String,
    pub verbose: bool,
    pub pedantic: bool,
    pub protocol: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
}

/// Subset of the server `INFO` body the client consumes.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServerInfo {
    pub server_id: String,
    pub max_payload: u64,
}

impl ServerInfo {
    /// Parse the JSON body following the `INFO` token.
    pub fn parse(line: &str) -> Result<ServerInfo> {
        let body = line.trim_start_matches("INFO").trim();
        serde_json::from_str(body).map_err(|e| Error::Stream(format!("invalid INFO body: {e}")))
    }
}
