//! Client configuration and per-session handshake state.
//!
//! `Config` is the static surface an external loader populates;
//! `Session` holds the subjects learned from the STAN connect handshake,
//! set once per successful handshake and invalidated on close.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::proto::ConnectResponse;

/// Default maximum payload until the server `INFO` advertises one.
pub const DEFAULT_MAX_PAYLOAD: u64 = 1024 * 1024;

/// Static client configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server address, e.g. `nats://localhost:4222`.
    pub dsn: String,
    /// Client identity within the cluster.
    pub client_id: String,
    /// STAN cluster to discover.
    pub cluster_id: String,
    /// Seconds to wait for the TCP connect and the connect handshake.
    pub connection_timeout: u64,
    /// Seconds to wait for a write (and its acknowledgment exchange).
    pub write_timeout: u64,
    /// Ask the server to echo `+OK` for every command.
    pub verbose: bool,
    /// Stricter server-side protocol checking.
    pub pedantic: bool,
    /// Protocol revision sent in `CONNECT`.
    pub protocol: u32,
    pub user: Option<String>,
    pub pass: Option<String>,
    /// Dump wire traffic at debug level.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dsn: "nats://localhost:4222".to_string(),
            client_id: String::new(),
            cluster_id: String::new(),
            connection_timeout: 30,
            write_timeout: 10,
            verbose: false,
            pedantic: false,
            protocol: 1,
            user: None,
            pass: None,
            debug: false,
        }
    }
}

impl Config {
    /// Host/port pair from the DSN.
    pub fn address(&self) -> Result<String> {
        let trimmed = self
            .dsn
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.dsn);

        let address = trimmed.trim_end_matches('/');
        if address.is_empty() {
            return Err(Error::Connection(format!("invalid dsn: {}", self.dsn)));
        }

        Ok(match address.contains(':') {
            true => address.to_string(),
            false => format!("{address}:4222"),
        })
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }
}

/// Per-session subjects obtained from the connect handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub pub_prefix: String,
    pub sub_requests: String,
    pub unsub_requests: String,
    pub sub_close_requests: String,
    pub close_requests: String,
}

impl From<&ConnectResponse> for Session {
    fn from(response: &ConnectResponse) -> Self {
        Self {
            pub_prefix: response.pub_prefix.clone(),
            sub_requests: response.sub_requests.clone(),
            unsub_requests: response.unsub_requests.clone(),
            sub_close_requests: response.sub_close_requests.clone(),
            close_requests: response.close_requests.clone(),
        }
    }
}
